use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use job_location_core::{
    resolve_business_ref, resolver::Clock, BackfillDecision, BusinessEntry, BusinessId, JobEntry,
    JobLocationPatch, JobRecord, LocationInheritanceResolver, LocationRecord,
    ReferenceResolution,
};
use job_location_records::{PageRequest, RecordStore, RecordsError};
use job_location_storage::{
    BackfillRunRepository, FailureKind, LedgerError, NewBackfillFailure, RunCounts,
};

/// Retroactively copies business locations onto jobs that lack one.
///
/// Jobs are processed one at a time in listing order; each read-then-patch is
/// its own unit of work, so an interrupted run can simply be started again.
pub struct BackfillMigrator<S> {
    store: S,
    ledger: BackfillRunRepository,
    resolver: LocationInheritanceResolver,
    clock: Clock,
    page_size: u32,
    fallback_actor: String,
    dry_run: bool,
}

impl<S: RecordStore> BackfillMigrator<S> {
    pub fn new(
        store: S,
        ledger: BackfillRunRepository,
        page_size: u32,
        fallback_actor: impl Into<String>,
    ) -> Self {
        let clock: Clock = Arc::new(Utc::now);
        Self {
            store,
            ledger,
            resolver: LocationInheritanceResolver::new().with_clock(clock.clone()),
            clock,
            page_size: page_size.max(1),
            fallback_actor: fallback_actor.into(),
            dry_run: false,
        }
    }

    /// Evaluates every job without issuing patches.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.resolver = LocationInheritanceResolver::new().with_clock(clock.clone());
        self.clock = clock;
        self
    }

    /// Executes one full pass and records it in the ledger.
    pub async fn run(&self) -> Result<BackfillReport, BackfillError> {
        let run_id = self.ledger.start(self.now(), self.dry_run).await?;
        info!(stage = "backfill", run = %run_id, dry_run = self.dry_run, page_size = self.page_size, "backfill run started");

        let mut counts = RunCounts::default();
        match self.process(&run_id, &mut counts).await {
            Ok(()) => {
                self.ledger.complete(&run_id, &counts, self.now()).await?;
                counter!("backfill_runs_total", "result" => "completed").increment(1);
                info!(
                    stage = "backfill",
                    run = %run_id,
                    examined = counts.examined,
                    updated = counts.updated,
                    already_satisfied = counts.already_satisfied,
                    unresolved = counts.unresolved,
                    no_source = counts.no_source,
                    failed = counts.failed,
                    "backfill run completed"
                );
                Ok(BackfillReport {
                    run_id,
                    dry_run: self.dry_run,
                    counts,
                })
            }
            Err(err) => {
                counter!("backfill_runs_total", "result" => "failed").increment(1);
                error!(stage = "backfill", run = %run_id, error = %err, "backfill run aborted");
                if let Err(ledger_err) = self
                    .ledger
                    .fail(&run_id, &counts, &err.to_string(), self.now())
                    .await
                {
                    warn!(stage = "ledger", run = %run_id, error = %ledger_err, "failed to mark run as failed");
                }
                Err(err)
            }
        }
    }

    async fn process(&self, run_id: &str, counts: &mut RunCounts) -> Result<(), BackfillError> {
        let locations = self.load_business_locations().await?;
        info!(stage = "backfill", businesses_with_location = locations.len(), "business locations loaded");

        let mut cursor: Option<String> = None;
        loop {
            let request = page_request(cursor.as_deref(), self.page_size);
            let page = self
                .store
                .list_jobs(request)
                .await
                .map_err(BackfillError::ListJobs)?;

            for entry in page.data {
                let outcome = self.process_entry(run_id, entry, &locations).await?;
                outcome.tally(counts);
                counter!("backfill_jobs_total", "outcome" => outcome.as_str()).increment(1);
            }

            cursor = next_cursor(cursor, page.cursor)?;
            if cursor.is_none() {
                break;
            }
        }
        Ok(())
    }

    async fn load_business_locations(
        &self,
    ) -> Result<HashMap<BusinessId, LocationRecord>, BackfillError> {
        let mut locations = HashMap::new();
        let mut cursor: Option<String> = None;
        loop {
            let request = page_request(cursor.as_deref(), self.page_size);
            let page = self
                .store
                .list_businesses(request)
                .await
                .map_err(BackfillError::ListBusinesses)?;

            for entry in page.data {
                let business = match entry {
                    BusinessEntry::Record(business) => business,
                    BusinessEntry::Malformed { id, reason } => {
                        warn!(stage = "backfill", business = id.as_deref().unwrap_or("<unknown>"), reason = %reason, "malformed business skipped");
                        continue;
                    }
                };
                if let Some(location) = business.location_source() {
                    locations.insert(BusinessId::new(business.id.trim()), location.clone());
                }
            }

            cursor = next_cursor(cursor, page.cursor)?;
            if cursor.is_none() {
                break;
            }
        }
        Ok(locations)
    }

    async fn process_entry(
        &self,
        run_id: &str,
        entry: JobEntry,
        locations: &HashMap<BusinessId, LocationRecord>,
    ) -> Result<JobOutcome, BackfillError> {
        let job = match entry {
            JobEntry::Record(job) => job,
            JobEntry::Malformed { id, reason } => {
                warn!(stage = "backfill", job = id.as_deref().unwrap_or("<unknown>"), reason = %reason, "malformed job skipped");
                self.record_failure(run_id, id.as_deref(), FailureKind::Unresolved, &reason)
                    .await?;
                return Ok(JobOutcome::Unresolved);
            }
        };

        let business_id = match resolve_business_ref(&job) {
            ReferenceResolution::Resolved(id) => id,
            ReferenceResolution::Unresolved(reason) => {
                debug!(stage = "backfill", job = %job.id, reason = reason.as_str(), "business reference unresolved");
                self.record_failure(
                    run_id,
                    Some(&job.id),
                    FailureKind::Unresolved,
                    reason.as_str(),
                )
                .await?;
                return Ok(JobOutcome::Unresolved);
            }
        };

        let source = locations.get(&business_id);
        if let Decided::Done(outcome) = self.decide(&job, source) {
            return Ok(outcome);
        }

        if self.dry_run {
            debug!(stage = "backfill", job = %job.id, business = %business_id, "job would be updated");
            return Ok(JobOutcome::Updated);
        }

        self.apply(run_id, &job.id, source).await
    }

    /// Re-reads the job right before writing so concurrent edits are not clobbered.
    async fn apply(
        &self,
        run_id: &str,
        job_id: &str,
        source: Option<&LocationRecord>,
    ) -> Result<JobOutcome, BackfillError> {
        let current = match self.store.get_job(job_id).await {
            Ok(Some(current)) => current,
            Ok(None) => {
                return self
                    .write_failed(run_id, job_id, "job no longer exists")
                    .await;
            }
            Err(err) if err.is_auth_failure() => return Err(BackfillError::Unauthorized(err)),
            Err(err) => return self.write_failed(run_id, job_id, &err.to_string()).await,
        };

        let patch = match self.decide(&current, source) {
            Decided::Done(outcome) => return Ok(outcome),
            Decided::Patch(patch) => patch,
        };

        match self.store.patch_job(job_id, &patch).await {
            Ok(()) => {
                info!(stage = "backfill", job = %job_id, address = patch.business_address.as_deref().unwrap_or(""), "job location backfilled");
                Ok(JobOutcome::Updated)
            }
            Err(err) if err.is_auth_failure() => Err(BackfillError::Unauthorized(err)),
            Err(err) => self.write_failed(run_id, job_id, &err.to_string()).await,
        }
    }

    fn decide(&self, job: &JobRecord, source: Option<&LocationRecord>) -> Decided {
        match self.resolver.backfill(job, source, &self.fallback_actor) {
            BackfillDecision::AlreadySatisfied => Decided::Done(JobOutcome::AlreadySatisfied),
            BackfillDecision::NoSource => Decided::Done(JobOutcome::NoSource),
            BackfillDecision::Apply(patch) => Decided::Patch(patch),
        }
    }

    async fn write_failed(
        &self,
        run_id: &str,
        job_id: &str,
        detail: &str,
    ) -> Result<JobOutcome, BackfillError> {
        warn!(stage = "backfill", job = %job_id, error = %detail, "job patch failed");
        self.record_failure(run_id, Some(job_id), FailureKind::WriteFailed, detail)
            .await?;
        Ok(JobOutcome::Failed)
    }

    async fn record_failure(
        &self,
        run_id: &str,
        job_id: Option<&str>,
        kind: FailureKind,
        detail: &str,
    ) -> Result<(), LedgerError> {
        self.ledger
            .record_failure(&NewBackfillFailure {
                run_id,
                job_id,
                kind,
                detail,
                occurred_at: self.now(),
            })
            .await
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

enum Decided {
    Done(JobOutcome),
    Patch(JobLocationPatch),
}

fn page_request(cursor: Option<&str>, limit: u32) -> PageRequest<'_> {
    match cursor {
        Some(cursor) => PageRequest::after(cursor, limit),
        None => PageRequest::first(limit),
    }
}

fn next_cursor(
    current: Option<String>,
    next: Option<String>,
) -> Result<Option<String>, BackfillError> {
    match (current, next) {
        (Some(current), Some(next)) if current == next => Err(BackfillError::CursorStalled(next)),
        (_, next) => Ok(next),
    }
}

/// Outcome of evaluating a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Updated,
    AlreadySatisfied,
    Unresolved,
    NoSource,
    Failed,
}

impl JobOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Updated => "updated",
            Self::AlreadySatisfied => "already_satisfied",
            Self::Unresolved => "unresolved",
            Self::NoSource => "no_source",
            Self::Failed => "failed",
        }
    }

    fn tally(self, counts: &mut RunCounts) {
        counts.examined += 1;
        match self {
            Self::Updated => counts.updated += 1,
            Self::AlreadySatisfied => counts.already_satisfied += 1,
            Self::Unresolved => counts.unresolved += 1,
            Self::NoSource => counts.no_source += 1,
            Self::Failed => counts.failed += 1,
        }
    }
}

/// Final report of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackfillReport {
    pub run_id: String,
    pub dry_run: bool,
    pub counts: RunCounts,
}

impl BackfillReport {
    pub fn render_text(&self) -> String {
        let counts = &self.counts;
        let mut out = format!("run: {}\n", self.run_id);
        if self.dry_run {
            out.push_str("mode: dry-run (no jobs were patched)\n");
        }
        out.push_str(&format!("examined: {}\n", counts.examined));
        out.push_str(&format!("updated: {}\n", counts.updated));
        out.push_str(&format!("already_satisfied: {}\n", counts.already_satisfied));
        out.push_str(&format!("unresolved: {}\n", counts.unresolved));
        out.push_str(&format!("no_source: {}\n", counts.no_source));
        out.push_str(&format!("failed: {}\n", counts.failed));
        out
    }
}

/// Failures that abort a whole run.
#[derive(Debug, Error)]
pub enum BackfillError {
    #[error("failed to list businesses: {0}")]
    ListBusinesses(RecordsError),
    #[error("failed to list jobs: {0}")]
    ListJobs(RecordsError),
    #[error("records api rejected credentials: {0}")]
    Unauthorized(RecordsError),
    #[error("records api returned cursor {0} twice")]
    CursorStalled(String),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}
