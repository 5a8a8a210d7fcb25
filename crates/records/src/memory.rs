use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

use job_location_core::{
    types::decode_job, BusinessEntry, BusinessRecord, JobEntry, JobLocationPatch, JobRecord,
};

use crate::store::{Page, PageRequest, RecordStore};
use crate::RecordsError;

/// In-process [`RecordStore`] holding raw business and job documents.
///
/// Documents are stored as JSON so that malformed ones can be represented,
/// and patches are merged key by key like a document store would.
#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    businesses: Vec<Value>,
    jobs: Vec<Value>,
    rejected: HashSet<String>,
    unavailable: bool,
    patches: Vec<(String, JobLocationPatch)>,
    job_listings: usize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a business document; fails only if the record cannot be serialized.
    pub fn insert_business(&self, business: &BusinessRecord) -> Result<(), RecordsError> {
        let value =
            serde_json::to_value(business).map_err(|err| RecordsError::Decode(err.to_string()))?;
        self.insert_raw_business(value);
        Ok(())
    }

    pub fn insert_raw_business(&self, business: Value) {
        self.state().businesses.push(business);
    }

    /// Inserts a job document; fails only if the record cannot be serialized.
    pub fn insert_job(&self, job: &JobRecord) -> Result<(), RecordsError> {
        let value =
            serde_json::to_value(job).map_err(|err| RecordsError::Decode(err.to_string()))?;
        self.insert_raw_job(value);
        Ok(())
    }

    pub fn insert_raw_job(&self, job: Value) {
        self.state().jobs.push(job);
    }

    /// Makes every patch to `job_id` fail with `422 Unprocessable Entity`.
    pub fn reject_patches_for(&self, job_id: impl Into<String>) {
        self.state().rejected.insert(job_id.into());
    }

    /// Makes listings fail with `503 Service Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Patches accepted so far, in order.
    pub fn patches(&self) -> Vec<(String, JobLocationPatch)> {
        self.state().patches.clone()
    }

    /// Number of job listing pages served.
    pub fn job_listings(&self) -> usize {
        self.state().job_listings
    }

    /// Current decoded state of a job.
    pub fn job(&self, id: &str) -> Option<JobRecord> {
        let state = self.state();
        find_job(&state.jobs, id).and_then(|value| decode_job(value.clone()).ok())
    }

    /// Current raw document of a job.
    pub fn raw_job(&self, id: &str) -> Option<Value> {
        let state = self.state();
        find_job(&state.jobs, id).cloned()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn list_businesses(
        &self,
        page: PageRequest<'_>,
    ) -> Result<Page<BusinessEntry>, RecordsError> {
        let state = self.state();
        if state.unavailable {
            return Err(unavailable());
        }
        Ok(paginate(&state.businesses, page)?.map(BusinessEntry::from_value))
    }

    async fn list_jobs(&self, page: PageRequest<'_>) -> Result<Page<JobEntry>, RecordsError> {
        let mut state = self.state();
        if state.unavailable {
            return Err(unavailable());
        }
        state.job_listings += 1;
        Ok(paginate(&state.jobs, page)?.map(JobEntry::from_value))
    }

    async fn get_job(&self, id: &str) -> Result<Option<JobRecord>, RecordsError> {
        let state = self.state();
        match find_job(&state.jobs, id) {
            Some(value) => decode_job(value.clone())
                .map(Some)
                .map_err(|err| RecordsError::Decode(err.to_string())),
            None => Ok(None),
        }
    }

    async fn patch_job(&self, id: &str, patch: &JobLocationPatch) -> Result<(), RecordsError> {
        let mut state = self.state();
        if state.rejected.contains(id) {
            return Err(RecordsError::Status {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                body: format!("patch rejected for job {id}"),
            });
        }

        let fields = serde_json::to_value(patch).map_err(|err| RecordsError::Decode(err.to_string()))?;
        let Some(document) = state
            .jobs
            .iter_mut()
            .find(|value| document_id(value) == Some(id))
        else {
            return Err(RecordsError::Status {
                status: StatusCode::NOT_FOUND,
                body: format!("job {id} not found"),
            });
        };

        if let (Value::Object(target), Value::Object(fields)) = (document, fields) {
            target.extend(fields);
        }
        state.patches.push((id.to_string(), patch.clone()));
        Ok(())
    }
}

fn paginate<T: Clone>(items: &[T], page: PageRequest<'_>) -> Result<Page<T>, RecordsError> {
    let start = match page.cursor {
        Some(cursor) => cursor.parse::<usize>().map_err(|_| RecordsError::Status {
            status: StatusCode::BAD_REQUEST,
            body: format!("invalid cursor {cursor}"),
        })?,
        None => 0,
    };
    let limit = page.limit.max(1) as usize;
    let end = start.saturating_add(limit).min(items.len());
    let data = items.get(start..end).map(<[T]>::to_vec).unwrap_or_default();
    let cursor = (end < items.len()).then(|| end.to_string());
    Ok(Page { data, cursor })
}

fn find_job<'a>(jobs: &'a [Value], id: &str) -> Option<&'a Value> {
    jobs.iter().find(|value| document_id(value) == Some(id))
}

fn document_id(value: &Value) -> Option<&str> {
    value
        .get("_id")
        .or_else(|| value.get("id"))
        .and_then(Value::as_str)
}

fn unavailable() -> RecordsError {
    RecordsError::Status {
        status: StatusCode::SERVICE_UNAVAILABLE,
        body: "records store unavailable".into(),
    }
}
