use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::PaperRecord;

/// Header information printed at the top of a paper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PaperMetadata {
  pub school_name: String,
  pub exam_name: String,
  pub subject: String,
  pub class_name: String,
  /// Free-form, e.g. "3 hours"
  pub duration: String,
  /// Declared total; see [`Paper::computed_marks`] for the sum of questions
  pub total_marks: f64,
  pub instructions: String,
}

/// A single question within a section. `content` is editor HTML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubQuestion {
  pub content: String,
  pub marks: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Section {
  pub title: String,
  pub instructions: String,
  pub questions: Vec<SubQuestion>,
}

impl Section {
  pub fn marks(&self) -> f64 {
    self.questions.iter().map(|q| q.marks).sum()
  }
}

/// The exam document being authored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Paper {
  pub metadata: PaperMetadata,
  pub sections: Vec<Section>,
}

impl Paper {
  /// Sum of all sub-question marks.
  pub fn computed_marks(&self) -> f64 {
    self.sections.iter().map(Section::marks).sum()
  }

  pub fn question_count(&self) -> usize {
    self.sections.iter().map(|s| s.questions.len()).sum()
  }

  /// Convert into a record for the document store.
  pub fn to_record(&self, id: Option<String>) -> Result<PaperRecord> {
    let fields = match serde_json::to_value(self)
      .map_err(|e| eyre!("Failed to serialize paper: {}", e))?
    {
      Value::Object(fields) => fields,
      other => return Err(eyre!("Paper serialized to non-object: {}", other)),
    };

    let record = PaperRecord::new(fields);
    Ok(match id {
      Some(id) => record.with_id(id),
      None => record,
    })
  }

  /// Read the paper fields back out of a stored record.
  pub fn from_record(record: &PaperRecord) -> Result<Self> {
    serde_json::from_value(Value::Object(record.fields.clone()))
      .map_err(|e| eyre!("Record {:?} is not a paper: {}", record.id, e))
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;

  pub(crate) fn sample_paper() -> Paper {
    Paper {
      metadata: PaperMetadata {
        school_name: "Dhaka Model School".into(),
        exam_name: "প্রথম সাময়িক পরীক্ষা".into(),
        subject: "Physics".into(),
        class_name: "IX".into(),
        duration: "2 hours".into(),
        total_marks: 30.0,
        instructions: "Answer all questions.".into(),
      },
      sections: vec![
        Section {
          title: "Section A".into(),
          instructions: "Short answers".into(),
          questions: vec![
            SubQuestion {
              content: "<p>Define <b>velocity</b>.</p>".into(),
              marks: 5.0,
            },
            SubQuestion {
              content: "<p>State Newton's first law.</p>".into(),
              marks: 5.0,
            },
          ],
        },
        Section {
          title: "Section B".into(),
          instructions: String::new(),
          questions: vec![SubQuestion {
            content: "<p>Derive $v = u + at$.</p>".into(),
            marks: 20.0,
          }],
        },
      ],
    }
  }

  #[test]
  fn test_marks_and_counts() {
    let paper = sample_paper();
    assert_eq!(paper.computed_marks(), 30.0);
    assert_eq!(paper.question_count(), 3);
    assert_eq!(paper.sections[0].marks(), 10.0);
  }

  #[test]
  fn test_record_round_trip() {
    let paper = sample_paper();
    let record = paper.to_record(Some("p1".into())).unwrap();

    assert_eq!(record.id.as_deref(), Some("p1"));
    assert!(record.fields.contains_key("metadata"));
    assert!(record.fields.contains_key("sections"));
    assert_eq!(Paper::from_record(&record).unwrap(), paper);
  }

  #[test]
  fn test_partial_paper_uses_defaults() {
    let paper: Paper = serde_json::from_str(r#"{"metadata":{"examName":"Quiz"}}"#).unwrap();
    assert_eq!(paper.metadata.exam_name, "Quiz");
    assert!(paper.sections.is_empty());
  }
}
