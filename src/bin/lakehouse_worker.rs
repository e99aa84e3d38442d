//! CLI: enqueue, execute, reap and inspect lakehouse pipeline runs.
//!
//! Every subcommand talks to the same SQLite run store, so any number of
//! `lakehouse_worker work` processes can share one database file.
//!
//! Usage: `lakehouse_worker [OPTIONS] <COMMAND>`
//! Example: lakehouse_worker enqueue --artifact-base /data/lake --plan plan.json
//!
//! Set RUST_LOG=lakehouse_executor=trace for TRACE-level span enter/exit and events.

use std::env;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use lakehouse_executor::{
  Executor, ExecutorConfig, HttpConfig, LocalArtifactStore, NewRun, PhaseDescriptor,
  PhaseRegistry, Reaper, ReaperConfig, RunStore, SqliteRunStore, default_worker_id,
};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

const DEFAULT_DATABASE_URL: &str = "sqlite://lakehouse_runs.db";

/// Stateless lakehouse pipeline worker.
#[derive(Parser, Debug)]
#[command(name = "lakehouse_worker")]
#[command(
  after_help = r#"Environment variables (override the matching flags when set):
  LAKEHOUSE_DATABASE_URL    Run store location (default: sqlite://lakehouse_runs.db).
  LAKEHOUSE_WORKER_ID       Identity recorded in claimed_by (default: worker-<pid>-<8 hex>).
  LAKEHOUSE_HEARTBEAT_SECS  Background heartbeat period while a phase runs (default: 10).

Examples:
  lakehouse_worker enqueue --artifact-base /data/lake --plan plan.json --param env=dev
  lakehouse_worker work --once
  lakehouse_worker reap --stale-after-secs 120
  lakehouse_worker status 4f0c..."#
)]
struct Args {
  /// Run store URL. Overridden by LAKEHOUSE_DATABASE_URL if set.
  #[arg(long, value_name = "URL", default_value = DEFAULT_DATABASE_URL)]
  database_url: String,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Queue a new run and print its id.
  Enqueue {
    /// Write root for the run's artifacts.
    #[arg(long, value_name = "URI")]
    artifact_base: String,
    /// JSON file holding the ordered list of phase descriptors.
    #[arg(long, value_name = "FILE")]
    plan: PathBuf,
    /// Run parameter as key=value; repeatable.
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    params: Vec<(String, String)>,
  },
  /// Claim and execute runs until Ctrl-C.
  Work {
    /// Process at most one run, then exit.
    #[arg(long)]
    once: bool,
    /// Worker identity. Overridden by LAKEHOUSE_WORKER_ID if set.
    #[arg(long, value_name = "ID")]
    worker_id: Option<String>,
    /// Heartbeat period in seconds. Overridden by LAKEHOUSE_HEARTBEAT_SECS if set.
    #[arg(long, value_name = "SECS")]
    heartbeat_secs: Option<u64>,
  },
  /// Requeue or time out runs whose worker stopped heartbeating.
  Reap {
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    stale_after_secs: u64,
    #[arg(long, value_name = "N", default_value_t = 3)]
    max_attempts: u32,
  },
  /// Print a run with its events and artifacts as JSON.
  Status {
    run_id: String,
  },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
  match raw.split_once('=') {
    Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
    _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
  }
}

fn fail(context: &str, e: impl std::fmt::Display) -> ! {
  eprintln!("{}: {}", context, e);
  process::exit(1);
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_span_events(FmtSpan::ENTER | FmtSpan::EXIT)
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  // Env vars override flags.
  let database_url = env::var("LAKEHOUSE_DATABASE_URL").unwrap_or(args.database_url);
  info!(database_url = %database_url, "lakehouse_worker starting");

  let store = match SqliteRunStore::connect(&database_url).await {
    Ok(s) => Arc::new(s),
    Err(e) => fail("Error opening run store", e),
  };

  match args.command {
    Command::Enqueue {
      artifact_base,
      plan,
      params,
    } => enqueue(store, artifact_base, plan, params).await,
    Command::Work {
      once,
      worker_id,
      heartbeat_secs,
    } => work(store, once, worker_id, heartbeat_secs).await,
    Command::Reap {
      stale_after_secs,
      max_attempts,
    } => reap(store, stale_after_secs, max_attempts).await,
    Command::Status { run_id } => status(store, &run_id).await,
  }
}

async fn enqueue(
  store: Arc<SqliteRunStore>,
  artifact_base: String,
  plan: PathBuf,
  params: Vec<(String, String)>,
) {
  let text = match fs::read_to_string(&plan) {
    Ok(s) => s,
    Err(e) => fail(&format!("Error reading {}", plan.display()), e),
  };
  let phases: Vec<PhaseDescriptor> = match serde_json::from_str(&text) {
    Ok(p) => p,
    Err(e) => fail("Error parsing plan", e),
  };
  let mut new_run = NewRun::new(artifact_base, phases);
  for (k, v) in params {
    new_run = new_run.with_param(k, v);
  }
  match store.enqueue(new_run).await {
    Ok(run) => {
      info!(run_id = %run.run_id, phases = run.phase_spec.len(), "run enqueued");
      println!("{}", run.run_id);
    }
    Err(e) => fail("Error enqueuing run", e),
  }
}

async fn work(
  store: Arc<SqliteRunStore>,
  once: bool,
  worker_id: Option<String>,
  heartbeat_secs: Option<u64>,
) {
  let worker_id = env::var("LAKEHOUSE_WORKER_ID")
    .ok()
    .or(worker_id)
    .unwrap_or_else(default_worker_id);
  let heartbeat_secs = env::var("LAKEHOUSE_HEARTBEAT_SECS")
    .ok()
    .and_then(|s| s.parse::<u64>().ok())
    .or(heartbeat_secs);
  let mut config = ExecutorConfig::new(worker_id);
  if let Some(secs) = heartbeat_secs {
    config = config.with_heartbeat_interval(Duration::from_secs(secs.max(1)));
  }
  info!(worker_id = %config.worker_id, heartbeat = ?config.heartbeat_interval, once, "options (env or flags)");

  let artifacts = Arc::new(LocalArtifactStore::new());
  let registry = match PhaseRegistry::with_defaults(artifacts.clone(), HttpConfig::default()) {
    Ok(r) => r,
    Err(e) => fail("Error building phase registry", e),
  };
  let executor = Executor::new(store, registry, artifacts, config);

  if once {
    match executor.process_next().await {
      Ok(Some(report)) => {
        println!("Run {} finished.", report.run_id);
        println!("  Status: {}", report.status);
        println!(
          "  Phases: {:?}",
          report
            .phases
            .iter()
            .map(|p| p.phase_name.as_str())
            .collect::<Vec<_>>()
        );
        println!("  Artifacts: {}", report.artifacts.len());
        if !report.succeeded() {
          process::exit(1);
        }
      }
      Ok(None) => println!("No queued runs."),
      Err(e) => fail("Worker error", e),
    }
    return;
  }

  let shutdown = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      eprintln!("Error installing Ctrl-C handler: {}", e);
    }
    info!("shutdown requested; finishing current run");
  };
  match executor.run_worker_loop(shutdown).await {
    Ok(processed) => println!("Processed {} runs.", processed),
    Err(e) => fail("Worker error", e),
  }
}

async fn reap(store: Arc<SqliteRunStore>, stale_after_secs: u64, max_attempts: u32) {
  let config = ReaperConfig {
    stale_after: Duration::from_secs(stale_after_secs),
    max_attempts,
  };
  let reaper = Reaper::new(store, config);
  match reaper.tick(Utc::now()).await {
    Ok(report) => {
      println!("Requeued: {:?}", report.requeued);
      println!("Timed out: {:?}", report.timed_out);
    }
    Err(e) => fail("Reaper error", e),
  }
}

async fn status(store: Arc<SqliteRunStore>, run_id: &str) {
  let run = match store.get_run(run_id).await {
    Ok(Some(run)) => run,
    Ok(None) => fail("Error", format!("run not found: {}", run_id)),
    Err(e) => fail("Error loading run", e),
  };
  let events = match store.list_events(run_id).await {
    Ok(e) => e,
    Err(e) => fail("Error loading events", e),
  };
  let artifacts = match store.list_artifacts(run_id).await {
    Ok(a) => a,
    Err(e) => fail("Error loading artifacts", e),
  };
  let doc = json!({"run": run, "events": events, "artifacts": artifacts});
  match serde_json::to_string_pretty(&doc) {
    Ok(text) => println!("{}", text),
    Err(e) => fail("Error encoding status", e),
  }
}
