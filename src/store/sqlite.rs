//! SQLite-backed run store.
//!
//! Workers in separate processes share one database file. The claim is a single
//! `UPDATE … RETURNING` statement, which SQLite executes as one write
//! transaction, so at most one worker can flip a queued run to `claimed`.
//! WAL journaling plus a busy timeout lets concurrent workers queue for the
//! write lock instead of failing.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use super::{ReapReport, RunStore};
use crate::error::{Error, Result};
use crate::types::{
  Artifact, ArtifactKind, ErrorCode, Event, EventLevel, NewEvent, NewRun, Run, RunCompletion,
  RunStatus,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
  run_id TEXT PRIMARY KEY,
  status TEXT NOT NULL,
  phase_spec TEXT NOT NULL,
  claimed_by TEXT,
  claimed_at_ms INTEGER,
  last_heartbeat_at_ms INTEGER,
  artifact_base_uri TEXT NOT NULL,
  params TEXT NOT NULL,
  attempts INTEGER NOT NULL DEFAULT 0,
  created_at_ms INTEGER NOT NULL,
  finished_at_ms INTEGER,
  failed_phase TEXT,
  error_code TEXT,
  error_message TEXT
);
CREATE INDEX IF NOT EXISTS runs_queue_idx ON runs (status, created_at_ms, run_id);
CREATE TABLE IF NOT EXISTS run_events (
  run_id TEXT NOT NULL REFERENCES runs (run_id),
  seq INTEGER NOT NULL,
  level TEXT NOT NULL,
  message TEXT NOT NULL,
  data TEXT NOT NULL,
  phase_name TEXT,
  ts_ms INTEGER NOT NULL,
  PRIMARY KEY (run_id, seq)
);
CREATE TABLE IF NOT EXISTS run_artifacts (
  artifact_id TEXT PRIMARY KEY,
  run_id TEXT NOT NULL REFERENCES runs (run_id),
  phase_name TEXT,
  kind TEXT NOT NULL,
  uri TEXT NOT NULL,
  sha256 TEXT,
  size_bytes INTEGER,
  meta TEXT NOT NULL,
  created_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS run_artifacts_run_idx ON run_artifacts (run_id);
"#;

const RUN_COLUMNS: &str = "run_id, status, phase_spec, claimed_by, claimed_at_ms, \
  last_heartbeat_at_ms, artifact_base_uri, params, attempts, created_at_ms, finished_at_ms, \
  failed_phase, error_code, error_message";

fn dt_to_ms(dt: DateTime<Utc>) -> i64 {
  dt.timestamp_millis()
}

fn ms_to_dt(ms: i64) -> DateTime<Utc> {
  Utc
    .timestamp_millis_opt(ms)
    .single()
    .unwrap_or_else(Utc::now)
}

fn parse_field<T: FromStr<Err = String>>(value: &str) -> Result<T> {
  value.parse::<T>().map_err(Error::store)
}

fn run_from_row(row: &SqliteRow) -> Result<Run> {
  let status: String = row.try_get("status")?;
  let phase_spec: String = row.try_get("phase_spec")?;
  let params: String = row.try_get("params")?;
  let attempts: i64 = row.try_get("attempts")?;
  let error_code: Option<String> = row.try_get("error_code")?;
  Ok(Run {
    run_id: row.try_get("run_id")?,
    status: parse_field(&status)?,
    phase_spec: serde_json::from_str(&phase_spec)?,
    claimed_by: row.try_get("claimed_by")?,
    claimed_at: row.try_get::<Option<i64>, _>("claimed_at_ms")?.map(ms_to_dt),
    last_heartbeat_at: row
      .try_get::<Option<i64>, _>("last_heartbeat_at_ms")?
      .map(ms_to_dt),
    artifact_base_uri: row.try_get("artifact_base_uri")?,
    params: serde_json::from_str(&params)?,
    attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
    created_at: ms_to_dt(row.try_get("created_at_ms")?),
    finished_at: row.try_get::<Option<i64>, _>("finished_at_ms")?.map(ms_to_dt),
    failed_phase: row.try_get("failed_phase")?,
    error_code: error_code.as_deref().map(parse_field::<ErrorCode>).transpose()?,
    error_message: row.try_get("error_message")?,
  })
}

fn event_from_row(row: &SqliteRow) -> Result<Event> {
  let level: String = row.try_get("level")?;
  let data: String = row.try_get("data")?;
  let seq: i64 = row.try_get("seq")?;
  Ok(Event {
    run_id: row.try_get("run_id")?,
    seq: u64::try_from(seq).unwrap_or_default(),
    level: parse_field::<EventLevel>(&level)?,
    message: row.try_get("message")?,
    data: serde_json::from_str(&data)?,
    phase_name: row.try_get("phase_name")?,
    timestamp: ms_to_dt(row.try_get("ts_ms")?),
  })
}

fn artifact_from_row(row: &SqliteRow) -> Result<Artifact> {
  let kind: String = row.try_get("kind")?;
  let meta: String = row.try_get("meta")?;
  let size_bytes: Option<i64> = row.try_get("size_bytes")?;
  Ok(Artifact {
    artifact_id: row.try_get("artifact_id")?,
    run_id: row.try_get("run_id")?,
    phase_name: row.try_get("phase_name")?,
    kind: serde_json::from_value::<ArtifactKind>(serde_json::Value::String(kind))?,
    uri: row.try_get("uri")?,
    sha256: row.try_get("sha256")?,
    size_bytes: size_bytes.and_then(|s| u64::try_from(s).ok()),
    meta: serde_json::from_str(&meta)?,
    created_at: ms_to_dt(row.try_get("created_at_ms")?),
  })
}

/// Run store over a SQLite database shared by every worker process.
#[derive(Clone, Debug)]
pub struct SqliteRunStore {
  pool: SqlitePool,
}

impl SqliteRunStore {
  /// Opens (creating if needed) the database at `url`, e.g. `sqlite://runs.db`, and applies the schema.
  #[instrument(level = "trace")]
  pub async fn connect(url: &str) -> Result<Self> {
    let options = SqliteConnectOptions::from_str(url)?
      .create_if_missing(true)
      .journal_mode(SqliteJournalMode::Wal)
      .busy_timeout(Duration::from_secs(10));
    let pool = SqlitePoolOptions::new()
      .max_connections(4)
      .connect_with(options)
      .await?;
    let store = Self { pool };
    store.migrate().await?;
    Ok(store)
  }

  /// Private in-memory database (single connection), for tests.
  pub async fn in_memory() -> Result<Self> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .idle_timeout(None)
      .max_lifetime(None)
      .connect_with(options)
      .await?;
    let store = Self { pool };
    store.migrate().await?;
    Ok(store)
  }

  async fn migrate(&self) -> Result<()> {
    sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
    Ok(())
  }

  /// Distinguishes a missing run from a lost claim after a guarded update matched nothing.
  async fn ownership_error(&self, run_id: &str, worker_id: &str) -> Error {
    match self.get_run(run_id).await {
      Ok(Some(_)) => Error::not_owner(run_id, worker_id),
      Ok(None) => Error::RunNotFound {
        run_id: run_id.to_string(),
      },
      Err(e) => e,
    }
  }
}

#[async_trait]
impl RunStore for SqliteRunStore {
  #[instrument(level = "trace", skip(self, new))]
  async fn enqueue(&self, new: NewRun) -> Result<Run> {
    let run = Run::queued(new, Utc::now());
    sqlx::query(
      "INSERT INTO runs (run_id, status, phase_spec, artifact_base_uri, params, attempts, created_at_ms)
       VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
    )
    .bind(&run.run_id)
    .bind(run.status.as_str())
    .bind(serde_json::to_string(&run.phase_spec)?)
    .bind(&run.artifact_base_uri)
    .bind(serde_json::to_string(&run.params)?)
    .bind(dt_to_ms(run.created_at))
    .execute(&self.pool)
    .await?;
    Ok(run)
  }

  #[instrument(level = "trace", skip(self))]
  async fn claim_next_run(&self, worker_id: &str) -> Result<Option<Run>> {
    let sql = format!(
      "UPDATE runs
       SET status = 'claimed', claimed_by = ?1, claimed_at_ms = ?2,
           last_heartbeat_at_ms = ?2, attempts = attempts + 1
       WHERE run_id = (
         SELECT run_id FROM runs
         WHERE status = 'queued' AND claimed_by IS NULL
         ORDER BY created_at_ms, run_id
         LIMIT 1
       )
       AND status = 'queued' AND claimed_by IS NULL
       RETURNING {}",
      RUN_COLUMNS
    );
    let row = sqlx::query(&sql)
      .bind(worker_id)
      .bind(dt_to_ms(Utc::now()))
      .fetch_optional(&self.pool)
      .await?;
    let run = row.as_ref().map(run_from_row).transpose()?;
    if let Some(ref r) = run {
      debug!(run_id = %r.run_id, worker_id, attempts = r.attempts, "claimed run");
    }
    Ok(run)
  }

  async fn mark_running(&self, run_id: &str, worker_id: &str) -> Result<()> {
    let done = sqlx::query(
      "UPDATE runs SET status = 'running', last_heartbeat_at_ms = ?3
       WHERE run_id = ?1 AND claimed_by = ?2 AND status IN ('claimed', 'running')",
    )
    .bind(run_id)
    .bind(worker_id)
    .bind(dt_to_ms(Utc::now()))
    .execute(&self.pool)
    .await?;
    if done.rows_affected() == 0 {
      return Err(self.ownership_error(run_id, worker_id).await);
    }
    Ok(())
  }

  async fn heartbeat(&self, run_id: &str, worker_id: &str) -> Result<()> {
    let done = sqlx::query(
      "UPDATE runs SET last_heartbeat_at_ms = ?3
       WHERE run_id = ?1 AND claimed_by = ?2 AND status IN ('claimed', 'running')",
    )
    .bind(run_id)
    .bind(worker_id)
    .bind(dt_to_ms(Utc::now()))
    .execute(&self.pool)
    .await?;
    if done.rows_affected() == 0 {
      return Err(self.ownership_error(run_id, worker_id).await);
    }
    Ok(())
  }

  #[instrument(level = "trace", skip(self, completion))]
  async fn complete_run(
    &self,
    run_id: &str,
    worker_id: &str,
    completion: RunCompletion,
  ) -> Result<Run> {
    if !matches!(completion.status, RunStatus::Succeeded | RunStatus::Failed) {
      return Err(Error::InvalidTransition {
        from: RunStatus::Running,
        to: completion.status,
      });
    }
    let sql = format!(
      "UPDATE runs
       SET status = ?3, failed_phase = ?4, error_code = ?5, error_message = ?6, finished_at_ms = ?7
       WHERE run_id = ?1 AND claimed_by = ?2 AND status IN ('claimed', 'running')
       RETURNING {}",
      RUN_COLUMNS
    );
    let row = sqlx::query(&sql)
      .bind(run_id)
      .bind(worker_id)
      .bind(completion.status.as_str())
      .bind(completion.failed_phase.as_deref())
      .bind(completion.error_code.map(|c| c.as_str()))
      .bind(completion.error_message.as_deref())
      .bind(dt_to_ms(Utc::now()))
      .fetch_optional(&self.pool)
      .await?;
    match row {
      Some(row) => run_from_row(&row),
      None => Err(self.ownership_error(run_id, worker_id).await),
    }
  }

  async fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
    let sql = format!("SELECT {} FROM runs WHERE run_id = ?1", RUN_COLUMNS);
    let row = sqlx::query(&sql)
      .bind(run_id)
      .fetch_optional(&self.pool)
      .await?;
    row.as_ref().map(run_from_row).transpose()
  }

  async fn list_runs(&self, status: Option<RunStatus>) -> Result<Vec<Run>> {
    let sql = format!(
      "SELECT {} FROM runs WHERE ?1 IS NULL OR status = ?1 ORDER BY created_at_ms, run_id",
      RUN_COLUMNS
    );
    let rows = sqlx::query(&sql)
      .bind(status.map(|s| s.as_str()))
      .fetch_all(&self.pool)
      .await?;
    rows.iter().map(run_from_row).collect()
  }

  async fn append_event(&self, run_id: &str, event: NewEvent) -> Result<Event> {
    let now = Utc::now();
    let row = sqlx::query(
      "INSERT INTO run_events (run_id, seq, level, message, data, phase_name, ts_ms)
       SELECT ?1, COALESCE(MAX(seq), 0) + 1, ?2, ?3, ?4, ?5, ?6
       FROM run_events WHERE run_id = ?1
       RETURNING seq",
    )
    .bind(run_id)
    .bind(event.level.as_str())
    .bind(&event.message)
    .bind(serde_json::to_string(&event.data)?)
    .bind(event.phase_name.as_deref())
    .bind(dt_to_ms(now))
    .fetch_one(&self.pool)
    .await?;
    let seq: i64 = row.try_get("seq")?;
    Ok(Event::from_new(
      run_id,
      u64::try_from(seq).unwrap_or_default(),
      event,
      ms_to_dt(dt_to_ms(now)),
    ))
  }

  async fn list_events(&self, run_id: &str) -> Result<Vec<Event>> {
    let rows = sqlx::query(
      "SELECT run_id, seq, level, message, data, phase_name, ts_ms
       FROM run_events WHERE run_id = ?1 ORDER BY seq",
    )
    .bind(run_id)
    .fetch_all(&self.pool)
    .await?;
    rows.iter().map(event_from_row).collect()
  }

  async fn insert_artifact(&self, artifact: &Artifact) -> Result<()> {
    sqlx::query(
      "INSERT INTO run_artifacts
       (artifact_id, run_id, phase_name, kind, uri, sha256, size_bytes, meta, created_at_ms)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )
    .bind(&artifact.artifact_id)
    .bind(&artifact.run_id)
    .bind(artifact.phase_name.as_deref())
    .bind(artifact.kind.as_str())
    .bind(&artifact.uri)
    .bind(artifact.sha256.as_deref())
    .bind(artifact.size_bytes.and_then(|s| i64::try_from(s).ok()))
    .bind(serde_json::to_string(&artifact.meta)?)
    .bind(dt_to_ms(artifact.created_at))
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn list_artifacts(&self, run_id: &str) -> Result<Vec<Artifact>> {
    let rows = sqlx::query(
      "SELECT artifact_id, run_id, phase_name, kind, uri, sha256, size_bytes, meta, created_at_ms
       FROM run_artifacts WHERE run_id = ?1 ORDER BY rowid",
    )
    .bind(run_id)
    .fetch_all(&self.pool)
    .await?;
    rows.iter().map(artifact_from_row).collect()
  }

  #[instrument(level = "trace", skip(self))]
  async fn reap_stale_runs(
    &self,
    stale_before: DateTime<Utc>,
    max_attempts: u32,
  ) -> Result<ReapReport> {
    let stale_ms = dt_to_ms(stale_before);
    let now_ms = dt_to_ms(Utc::now());
    let timed_out = sqlx::query(
      "UPDATE runs
       SET status = 'timed_out', error_code = 'TIMED_OUT', finished_at_ms = ?3,
           error_message = 'no heartbeat after ' || attempts || ' attempts'
       WHERE status IN ('claimed', 'running')
         AND (last_heartbeat_at_ms IS NULL OR last_heartbeat_at_ms < ?1)
         AND attempts >= ?2
       RETURNING run_id",
    )
    .bind(stale_ms)
    .bind(i64::from(max_attempts))
    .bind(now_ms)
    .fetch_all(&self.pool)
    .await?;
    let requeued = sqlx::query(
      "UPDATE runs
       SET status = 'queued', claimed_by = NULL, claimed_at_ms = NULL
       WHERE status IN ('claimed', 'running')
         AND (last_heartbeat_at_ms IS NULL OR last_heartbeat_at_ms < ?1)
         AND attempts < ?2
       RETURNING run_id",
    )
    .bind(stale_ms)
    .bind(i64::from(max_attempts))
    .fetch_all(&self.pool)
    .await?;
    let ids = |rows: Vec<SqliteRow>| -> Result<Vec<String>> {
      let mut ids = rows
        .iter()
        .map(|r| r.try_get::<String, _>("run_id").map_err(Error::from))
        .collect::<Result<Vec<_>>>()?;
      ids.sort();
      Ok(ids)
    };
    Ok(ReapReport {
      requeued: ids(requeued)?,
      timed_out: ids(timed_out)?,
    })
  }
}
