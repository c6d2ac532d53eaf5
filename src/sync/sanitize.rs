//! HTML entity escaping for values captured while offline.

use serde_json::Value;

/// Escape `& < > " '` so the text is inert when rendered as HTML.
pub fn escape_html(input: &str) -> String {
  let mut out = String::with_capacity(input.len());
  for c in input.chars() {
    match c {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&#39;"),
      c => out.push(c),
    }
  }
  out
}

/// Escape every string in a JSON value. Object keys are left as-is.
pub fn sanitize_value(value: &Value) -> Value {
  match value {
    Value::String(s) => Value::String(escape_html(s)),
    Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
    Value::Object(map) => Value::Object(
      map
        .iter()
        .map(|(k, v)| (k.clone(), sanitize_value(v)))
        .collect(),
    ),
    other => other.clone(),
  }
}
