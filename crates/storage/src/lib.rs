use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::{migrate::MigrateError, sqlite::SqlitePoolOptions, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(StorageError::Connect)?;

        apply_pragmas(&pool).await?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle to the backfill run ledger.
    pub fn backfill_runs(&self) -> BackfillRunRepository {
        BackfillRunRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn apply_pragmas(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA journal_mode = WAL;")
        .fetch_one(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    Ok(())
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to apply pragma: {0}")]
    Pragma(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Lifecycle state of a recorded backfill run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn from_db(value: &str) -> Result<Self, LedgerError> {
        match value {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(LedgerError::UnknownValue(other.to_string())),
        }
    }
}

/// Per-job failure category recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Unresolved,
    WriteFailed,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::WriteFailed => "write_failed",
        }
    }

    fn from_db(value: &str) -> Result<Self, LedgerError> {
        match value {
            "unresolved" => Ok(Self::Unresolved),
            "write_failed" => Ok(Self::WriteFailed),
            other => Err(LedgerError::UnknownValue(other.to_string())),
        }
    }
}

/// Aggregate counters of a backfill run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub examined: u64,
    pub updated: u64,
    pub already_satisfied: u64,
    pub unresolved: u64,
    pub no_source: u64,
    pub failed: u64,
}

/// A backfill run as stored in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackfillRun {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub dry_run: bool,
    pub counts: RunCounts,
    pub error_message: Option<String>,
}

/// A per-job failure recorded during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackfillFailure {
    pub run_id: String,
    pub job_id: Option<String>,
    pub kind: FailureKind,
    pub detail: String,
    pub occurred_at: DateTime<Utc>,
}

/// Payload required to record a per-job failure.
pub struct NewBackfillFailure<'a> {
    pub run_id: &'a str,
    pub job_id: Option<&'a str>,
    pub kind: FailureKind,
    pub detail: &'a str,
    pub occurred_at: DateTime<Utc>,
}

/// Errors that can occur while reading or writing the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("backfill run {0} not found")]
    RunNotFound(String),
    #[error("unexpected ledger value: {0}")]
    UnknownValue(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for the `backfill_runs` and `backfill_failures` tables.
#[derive(Clone)]
pub struct BackfillRunRepository {
    pool: SqlitePool,
}

impl BackfillRunRepository {
    /// Inserts a new run in `running` state and returns its identifier.
    pub async fn start(
        &self,
        started_at: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<String, LedgerError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO backfill_runs (id, started_at, status, dry_run) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(to_rfc3339(started_at))
        .bind(RunStatus::Running.as_str())
        .bind(i64::from(dry_run))
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Marks a run as completed with its final counters.
    pub async fn complete(
        &self,
        run_id: &str,
        counts: &RunCounts,
        finished_at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        self.finish(run_id, RunStatus::Completed, counts, None, finished_at)
            .await
    }

    /// Marks a run as failed, keeping the counters reached before the failure.
    pub async fn fail(
        &self,
        run_id: &str,
        counts: &RunCounts,
        error_message: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        self.finish(
            run_id,
            RunStatus::Failed,
            counts,
            Some(error_message),
            finished_at,
        )
        .await
    }

    async fn finish(
        &self,
        run_id: &str,
        status: RunStatus,
        counts: &RunCounts,
        error_message: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            "UPDATE backfill_runs \
             SET status = ?, finished_at = ?, examined = ?, updated = ?, already_satisfied = ?, \
                 unresolved = ?, no_source = ?, failed = ?, error_message = ? \
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(to_rfc3339(finished_at))
        .bind(counts.examined as i64)
        .bind(counts.updated as i64)
        .bind(counts.already_satisfied as i64)
        .bind(counts.unresolved as i64)
        .bind(counts.no_source as i64)
        .bind(counts.failed as i64)
        .bind(error_message)
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::RunNotFound(run_id.to_string()));
        }
        Ok(())
    }

    /// Records a per-job failure for the given run.
    pub async fn record_failure(
        &self,
        failure: &NewBackfillFailure<'_>,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO backfill_failures (run_id, job_id, kind, detail, occurred_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(failure.run_id)
        .bind(failure.job_id)
        .bind(failure.kind.as_str())
        .bind(failure.detail)
        .bind(to_rfc3339(failure.occurred_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Lists the most recent runs, newest first.
    pub async fn list_recent(&self, limit: u32) -> Result<Vec<BackfillRun>, LedgerError> {
        let rows = sqlx::query_as::<_, BackfillRunRow>(
            "SELECT id, started_at, finished_at, status, dry_run, examined, updated, \
                    already_satisfied, unresolved, no_source, failed, error_message \
               FROM backfill_runs \
              ORDER BY started_at DESC, rowid DESC \
              LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BackfillRunRow::into_domain).collect()
    }

    /// Lists failures recorded for a run in insertion order.
    pub async fn list_failures(&self, run_id: &str) -> Result<Vec<BackfillFailure>, LedgerError> {
        let rows = sqlx::query_as::<_, BackfillFailureRow>(
            "SELECT run_id, job_id, kind, detail, occurred_at \
               FROM backfill_failures \
              WHERE run_id = ? \
              ORDER BY id ASC",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BackfillFailureRow::into_domain).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BackfillRunRow {
    id: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    status: String,
    dry_run: i64,
    examined: i64,
    updated: i64,
    already_satisfied: i64,
    unresolved: i64,
    no_source: i64,
    failed: i64,
    error_message: Option<String>,
}

impl BackfillRunRow {
    fn into_domain(self) -> Result<BackfillRun, LedgerError> {
        Ok(BackfillRun {
            status: RunStatus::from_db(&self.status)?,
            id: self.id,
            started_at: self.started_at,
            finished_at: self.finished_at,
            dry_run: self.dry_run != 0,
            counts: RunCounts {
                examined: self.examined.max(0) as u64,
                updated: self.updated.max(0) as u64,
                already_satisfied: self.already_satisfied.max(0) as u64,
                unresolved: self.unresolved.max(0) as u64,
                no_source: self.no_source.max(0) as u64,
                failed: self.failed.max(0) as u64,
            },
            error_message: self.error_message,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BackfillFailureRow {
    run_id: String,
    job_id: Option<String>,
    kind: String,
    detail: String,
    occurred_at: DateTime<Utc>,
}

impl BackfillFailureRow {
    fn into_domain(self) -> Result<BackfillFailure, LedgerError> {
        Ok(BackfillFailure {
            kind: FailureKind::from_db(&self.kind)?,
            run_id: self.run_id,
            job_id: self.job_id,
            detail: self.detail,
            occurred_at: self.occurred_at,
        })
    }
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    async fn setup_db() -> (Database, TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("ledger.db").display());
        let db = Database::connect(&url).await.expect("connect");
        db.run_migrations().await.expect("migrations");
        (db, dir)
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap()
    }

    #[tokio::test]
    async fn migrations_apply() {
        let (db, _dir) = setup_db().await;
        let tables: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE 'backfill_%'",
        )
        .fetch_one(db.pool())
        .await
        .expect("fetch tables");
        assert_eq!(tables.0, 2);
    }

    #[tokio::test]
    async fn completed_run_round_trips_counts() {
        let (db, _dir) = setup_db().await;
        let repo = db.backfill_runs();

        let run_id = repo.start(at(0), false).await.expect("start");
        let counts = RunCounts {
            examined: 10,
            updated: 4,
            already_satisfied: 3,
            unresolved: 1,
            no_source: 1,
            failed: 1,
        };
        repo.complete(&run_id, &counts, at(1)).await.expect("complete");

        let runs = repo.list_recent(5).await.expect("list");
        assert_eq!(runs.len(), 1);
        let run = &runs[0];
        assert_eq!(run.id, run_id);
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.counts, counts);
        assert_eq!(run.started_at, at(0));
        assert_eq!(run.finished_at, Some(at(1)));
        assert!(!run.dry_run);
        assert_eq!(run.error_message, None);
    }

    #[tokio::test]
    async fn failed_run_keeps_error_message() {
        let (db, _dir) = setup_db().await;
        let repo = db.backfill_runs();

        let run_id = repo.start(at(0), true).await.expect("start");
        repo.fail(&run_id, &RunCounts::default(), "listing failed", at(2))
            .await
            .expect("fail");

        let run = repo
            .list_recent(1)
            .await
            .expect("list")
            .into_iter()
            .next()
            .expect("run present");
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.dry_run);
        assert_eq!(run.error_message.as_deref(), Some("listing failed"));
    }

    #[tokio::test]
    async fn finishing_unknown_run_errors() {
        let (db, _dir) = setup_db().await;
        let err = db
            .backfill_runs()
            .complete("missing", &RunCounts::default(), at(0))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::RunNotFound(id) if id == "missing"));
    }

    #[tokio::test]
    async fn recent_runs_are_newest_first_and_limited() {
        let (db, _dir) = setup_db().await;
        let repo = db.backfill_runs();
        let mut ids = Vec::new();
        for minute in 0..3 {
            ids.push(repo.start(at(minute), false).await.expect("start"));
        }

        let runs = repo.list_recent(2).await.expect("list");
        let listed: Vec<_> = runs.iter().map(|run| run.id.clone()).collect();
        assert_eq!(listed, vec![ids[2].clone(), ids[1].clone()]);
        assert!(runs.iter().all(|run| run.status == RunStatus::Running));
    }

    #[tokio::test]
    async fn failures_are_listed_per_run() {
        let (db, _dir) = setup_db().await;
        let repo = db.backfill_runs();
        let first = repo.start(at(0), false).await.expect("start");
        let second = repo.start(at(1), false).await.expect("start");

        repo.record_failure(&NewBackfillFailure {
            run_id: &first,
            job_id: Some("job-1"),
            kind: FailureKind::WriteFailed,
            detail: "unexpected status 422",
            occurred_at: at(0) + Duration::seconds(5),
        })
        .await
        .expect("record");
        repo.record_failure(&NewBackfillFailure {
            run_id: &first,
            job_id: None,
            kind: FailureKind::Unresolved,
            detail: "reference:missing",
            occurred_at: at(0) + Duration::seconds(6),
        })
        .await
        .expect("record");

        let failures = repo.list_failures(&first).await.expect("list");
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].kind, FailureKind::WriteFailed);
        assert_eq!(failures[0].job_id.as_deref(), Some("job-1"));
        assert_eq!(failures[1].kind, FailureKind::Unresolved);

        assert!(repo.list_failures(&second).await.expect("list").is_empty());
    }
}
