mod cache;
mod config;
mod context;
mod db;
mod kv;
mod logging;
mod paper;
mod sync;
#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cache::Request;
use crate::context::DefaultContext;
use crate::kv::codec::Decoded;
use crate::paper::{autosave, export};
use crate::sync::{Connectivity, SyncStatus};

#[derive(Parser, Debug)]
#[command(name = "qmaker")]
#[command(about = "Local-first storage and sync for Qmaker question papers")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/qmaker/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Start disconnected: writes are queued instead of pushed
  #[arg(long, global = true)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Encoded key/value storage
  #[command(subcommand)]
  Kv(KvCommand),
  /// Saved papers
  #[command(subcommand)]
  Paper(PaperCommand),
  /// Push queued offline writes, or show sync state
  Sync {
    #[command(subcommand)]
    command: Option<SyncCommand>,
  },
  /// Offline asset cache
  #[command(subcommand)]
  Cache(CacheCommand),
  /// Keep checking the remote and sync whenever it comes back, until Ctrl+C
  Watch,
}

#[derive(Subcommand, Debug)]
enum KvCommand {
  Get {
    key: String,
    /// JSON printed when the key is absent or unreadable
    #[arg(long)]
    default: Option<String>,
  },
  /// Store a JSON value
  Set { key: String, value: String },
  Remove { key: String },
  /// Remove namespaced keys except the ones listed
  Sweep {
    #[arg(long)]
    keep: Vec<String>,
  },
}

#[derive(Subcommand, Debug)]
enum PaperCommand {
  /// Save a paper from a JSON or export file
  Save {
    file: PathBuf,
    #[arg(long)]
    id: Option<String>,
  },
  List {
    /// Only the most recently modified papers
    #[arg(long)]
    recent: Option<usize>,
  },
  Show { id: String },
  Delete { id: String },
  /// Show the autosaved draft
  Draft {
    /// Discard the draft instead
    #[arg(long, conflicts_with = "save")]
    clear: bool,
    /// Restore the draft as a saved paper
    #[arg(long)]
    save: bool,
    #[arg(long, requires = "save")]
    id: Option<String>,
  },
  Export {
    id: String,
    #[arg(long)]
    out: Option<PathBuf>,
  },
}

#[derive(Subcommand, Debug)]
enum SyncCommand {
  Status,
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
  Install,
  Activate,
  /// Cache generations and their entry counts
  Status,
  Fetch {
    path: String,
    /// Fetch as a page navigation, which falls back to the offline shell
    #[arg(long)]
    navigate: bool,
  },
  /// Queue a JSON action for background sync
  Queue { data: String },
  /// Drain the background-sync queue
  Sync,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let data_dir = config.data_dir()?;
  std::fs::create_dir_all(&data_dir)
    .map_err(|e| eyre!("Failed to create data directory {}: {}", data_dir.display(), e))?;

  let _log_guard = logging::init(&config.logging, &data_dir)?;

  let ctx = DefaultContext::open(config, Connectivity::from_online(!args.offline))?;

  match args.command {
    Command::Kv(cmd) => run_kv(&ctx, cmd),
    Command::Paper(cmd) => run_paper(&ctx, cmd).await,
    Command::Sync { command } => run_sync(&ctx, command).await,
    Command::Cache(cmd) => run_cache(&ctx, cmd).await,
    Command::Watch => run_watch(&ctx).await,
  }
}

fn parse_json(text: &str) -> Result<Value> {
  serde_json::from_str(text).map_err(|e| eyre!("Value is not valid JSON: {}", e))
}

fn print_json(value: &Value) -> Result<()> {
  let text =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to format output: {}", e))?;
  println!("{}", text);
  Ok(())
}

fn run_kv(ctx: &DefaultContext, cmd: KvCommand) -> Result<()> {
  match cmd {
    KvCommand::Get {
      key,
      default: Some(default),
    } => print_json(&ctx.kv.get(&key, parse_json(&default)?)),
    KvCommand::Get { key, default: None } => match ctx.kv.try_get::<Value>(&key)? {
      Some(Decoded::Failed) => Err(eyre!("Value under {} is unreadable", key)),
      Some(decoded) => print_json(&decoded.unwrap_or(Value::Null)),
      None => Err(eyre!("No value stored under {}", key)),
    },
    KvCommand::Set { key, value } => ctx.kv.try_set(&key, &parse_json(&value)?),
    KvCommand::Remove { key } => {
      ctx.kv.remove(&key);
      Ok(())
    }
    KvCommand::Sweep { keep } => {
      let removed = ctx.kv.sweep(|key| keep.iter().any(|k| k == key))?;
      print_json(&json!({ "removed": removed }))
    }
  }
}

async fn run_paper(ctx: &DefaultContext, cmd: PaperCommand) -> Result<()> {
  match cmd {
    PaperCommand::Save { file, id } => {
      let text = std::fs::read_to_string(&file)
        .map_err(|e| eyre!("Failed to read {}: {}", file.display(), e))?;
      let paper = export::import_json(&text)?;
      let record = ctx.save_paper(&paper, id).await?;
      print_json(&json!({
        "id": record.id,
        "lastModified": record.last_modified,
        "synced": record.synced,
      }))
    }
    PaperCommand::List { recent } => {
      let records = match recent {
        Some(limit) => ctx.store.recent_records(limit).await?,
        None => ctx.store.list_records().await?,
      };
      let rows: Vec<Value> = records
        .iter()
        .map(|r| {
          json!({
            "id": r.id,
            "examName": r.fields.get("metadata").and_then(|m| m.get("examName")),
            "lastModified": r.last_modified,
            "synced": r.synced,
          })
        })
        .collect();
      print_json(&Value::Array(rows))
    }
    PaperCommand::Show { id } => {
      let record = ctx
        .store
        .get_record(&id)
        .await?
        .ok_or_else(|| eyre!("No paper with id {}", id))?;
      let value =
        serde_json::to_value(&record).map_err(|e| eyre!("Failed to format record: {}", e))?;
      print_json(&value)
    }
    PaperCommand::Delete { id } => {
      if !ctx.store.delete_record(&id).await? {
        return Err(eyre!("No paper with id {}", id));
      }
      Ok(())
    }
    PaperCommand::Draft { clear: true, .. } => {
      autosave::clear_draft(&ctx.kv);
      Ok(())
    }
    PaperCommand::Draft {
      save: true, id, ..
    } => {
      let draft = autosave::load_draft(&ctx.kv);
      let record = ctx.store.save_record(draft.to_record(id)?).await?;
      print_json(&json!({
        "id": record.id,
        "lastModified": record.last_modified,
        "synced": record.synced,
      }))
    }
    PaperCommand::Draft { .. } => {
      let draft = autosave::load_draft(&ctx.kv);
      print_json(&json!({
        "examName": draft.metadata.exam_name,
        "sections": draft.sections.len(),
        "questions": draft.question_count(),
        "totalMarks": draft.metadata.total_marks,
        "computedMarks": draft.computed_marks(),
      }))
    }
    PaperCommand::Export { id, out } => {
      let paper = ctx
        .load_paper(&id)
        .await?
        .ok_or_else(|| eyre!("No paper with id {}", id))?;
      let text = export::export_json(&paper)?;
      match out {
        Some(path) => std::fs::write(&path, text)
          .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e)),
        None => {
          println!("{}", text);
          Ok(())
        }
      }
    }
  }
}

async fn run_sync(ctx: &DefaultContext, cmd: Option<SyncCommand>) -> Result<()> {
  match cmd {
    Some(SyncCommand::Status) => print_json(&json!({
      "online": ctx.connectivity.is_online(),
      "pending": ctx.store.pending_count().await?,
      "offlineActions": ctx.store.offline_actions().await?.len(),
    })),
    None => {
      if !ctx.connectivity.is_online() {
        return Err(eyre!(
          "Offline, {} operations stay queued",
          ctx.store.pending_count().await?
        ));
      }
      let report = ctx.coordinator.drain_queue().await?;
      print_json(&json!({
        "pushed": report.pushed,
        "remaining": report.remaining,
        "status": ctx.coordinator.status(),
      }))
    }
  }
}

async fn run_cache(ctx: &DefaultContext, cmd: CacheCommand) -> Result<()> {
  match cmd {
    CacheCommand::Install => {
      ctx.worker.install().await?;
      print_json(&json!({ "installed": ctx.worker.names().static_name }))
    }
    CacheCommand::Activate => {
      let report = ctx.worker.activate().await?;
      print_json(&json!({
        "deleted": report.deleted,
        "clientsClaimed": ctx.worker.clients_claimed(),
      }))
    }
    CacheCommand::Status => {
      let storage = ctx.worker.storage();
      let mut caches = serde_json::Map::new();
      for name in storage.names()? {
        let entries = storage.len(&name)?;
        caches.insert(name, json!(entries));
      }
      print_json(&json!({
        "state": format!("{:?}", ctx.worker.state()),
        "current": ctx.worker.names().static_name,
        "shellCached": ctx.worker.shell_cached()?,
        "caches": caches,
      }))
    }
    CacheCommand::Fetch { path, navigate } => {
      let request = if navigate {
        Request::navigate(path)
      } else {
        Request::get(path)
      };
      let fetched = ctx.worker.fetch(&request).await?;
      print_json(&json!({
        "status": fetched.response.status,
        "source": format!("{:?}", fetched.source),
        "bytes": fetched.response.body.len(),
      }))
    }
    CacheCommand::Sync => {
      let tag = ctx.config.cache.sync_tag.clone();
      match ctx.worker.handle_sync(&tag).await? {
        Some(report) => print_json(&json!({
          "pushed": report.pushed,
          "remaining": report.remaining,
        })),
        None => Err(eyre!("Unknown sync tag {}", tag)),
      }
    }
    CacheCommand::Queue { data } => {
      let id = ctx.store.queue_offline_action(&parse_json(&data)?).await?;
      print_json(&json!({ "queued": id }))
    }
  }
}

async fn run_watch(ctx: &DefaultContext) -> Result<()> {
  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  let period = ctx.config.remote.poll_interval();
  let mut status = ctx.coordinator.subscribe_status();

  info!(
    endpoint = %ctx.coordinator.remote().endpoint(),
    every_secs = period.as_secs(),
    "Watching sync endpoint"
  );

  let report = async {
    loop {
      tokio::select! {
        signal = tokio::signal::ctrl_c() => {
          match signal {
            Ok(()) => info!("Received Ctrl+C, stopping"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C, stopping"),
          }
          break;
        }
        changed = status.changed() => {
          if changed.is_err() {
            break;
          }
          let current: SyncStatus = status.borrow_and_update().clone();
          if let Err(e) = print_status(&current) {
            warn!(error = %e, "Failed to print sync status");
          }
        }
      }
    }
    // Err only when the watcher already returned
    let _ = shutdown_tx.send(true);
  };

  tokio::join!(ctx.watch(period, shutdown_rx), report);
  Ok(())
}

fn print_status(status: &SyncStatus) -> Result<()> {
  let text =
    serde_json::to_string(status).map_err(|e| eyre!("Failed to format sync status: {}", e))?;
  println!("{}", text);
  Ok(())
}
