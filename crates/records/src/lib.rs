pub mod client;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod retry;
pub mod store;

use reqwest::StatusCode;
use thiserror::Error;

pub use client::RecordsClient;
#[cfg(any(test, feature = "test-support"))]
pub use memory::MemoryRecordStore;
pub use retry::RetryPolicy;
pub use store::{Page, PageRequest, RecordStore};

/// Errors produced by records API collaborators.
#[derive(Debug, Error)]
pub enum RecordsError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl RecordsError {
    /// Returns `true` for failures worth retrying: timeouts, connection
    /// errors, 429 and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(err) => err.is_timeout() || err.is_connect(),
            Self::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            Self::Url(_) | Self::Decode(_) => false,
        }
    }

    /// Returns `true` when the API rejected the caller's credentials.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::Status { status, .. }
                if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
        )
    }
}
