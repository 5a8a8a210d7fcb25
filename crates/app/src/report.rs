use serde::Serialize;

use job_location_storage::{BackfillFailure, BackfillRun, BackfillRunRepository, LedgerError};

/// Recent runs plus the failures recorded by the newest one.
#[derive(Debug, Serialize)]
pub struct LedgerReport {
    pub runs: Vec<BackfillRun>,
    pub latest_failures: Vec<BackfillFailure>,
}

pub async fn load(
    ledger: &BackfillRunRepository,
    limit: u32,
) -> Result<LedgerReport, LedgerError> {
    let runs = ledger.list_recent(limit.max(1)).await?;
    let latest_failures = match runs.first() {
        Some(latest) => ledger.list_failures(&latest.id).await?,
        None => Vec::new(),
    };
    Ok(LedgerReport {
        runs,
        latest_failures,
    })
}

impl LedgerReport {
    pub fn render_text(&self) -> String {
        if self.runs.is_empty() {
            return "no backfill runs recorded\n".to_string();
        }

        let mut out = String::new();
        for run in &self.runs {
            let counts = &run.counts;
            out.push_str(&format!(
                "{} {} {}{} examined={} updated={} already_satisfied={} unresolved={} no_source={} failed={}\n",
                run.started_at.to_rfc3339(),
                run.id,
                run.status.as_str(),
                if run.dry_run { " (dry-run)" } else { "" },
                counts.examined,
                counts.updated,
                counts.already_satisfied,
                counts.unresolved,
                counts.no_source,
                counts.failed,
            ));
            if let Some(message) = &run.error_message {
                out.push_str(&format!("  error: {message}\n"));
            }
        }

        if !self.latest_failures.is_empty() {
            out.push_str("\nfailures in latest run:\n");
            for failure in &self.latest_failures {
                out.push_str(&format!(
                    "  {} {} {}\n",
                    failure.job_id.as_deref().unwrap_or("<unknown>"),
                    failure.kind.as_str(),
                    failure.detail
                ));
            }
        }
        out
    }
}
