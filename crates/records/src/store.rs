use async_trait::async_trait;

use job_location_core::{BusinessEntry, JobEntry, JobLocationPatch, JobRecord};

use crate::RecordsError;

/// Cursor position requested from a listing endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest<'a> {
    pub cursor: Option<&'a str>,
    pub limit: u32,
}

impl<'a> PageRequest<'a> {
    pub fn first(limit: u32) -> Self {
        Self {
            cursor: None,
            limit,
        }
    }

    pub fn after(cursor: &'a str, limit: u32) -> Self {
        Self {
            cursor: Some(cursor),
            limit,
        }
    }
}

/// One page of a listing, with the cursor of the next page if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub cursor: Option<String>,
}

impl<T> Page<T> {
    /// Converts every item, keeping the cursor.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            data: self.data.into_iter().map(f).collect(),
            cursor: self.cursor,
        }
    }
}

/// Operations the derivation engine needs from the job/business persistence API.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Lists businesses; a document that fails to decode comes back as
    /// [`BusinessEntry::Malformed`] instead of failing the page.
    async fn list_businesses(
        &self,
        page: PageRequest<'_>,
    ) -> Result<Page<BusinessEntry>, RecordsError>;

    /// Lists jobs; individual documents that fail to decode come back as
    /// [`JobEntry::Malformed`] instead of failing the page.
    async fn list_jobs(&self, page: PageRequest<'_>) -> Result<Page<JobEntry>, RecordsError>;

    /// Fetches a single job, `None` when it no longer exists.
    async fn get_job(&self, id: &str) -> Result<Option<JobRecord>, RecordsError>;

    /// Writes only the fields present in `patch`.
    async fn patch_job(&self, id: &str, patch: &JobLocationPatch) -> Result<(), RecordsError>;
}
