//! Media acquisition
//!
//! Downloads from rate-limited platforms without exposing any single
//! identity to detection:
//! - Pool of authenticated cookie-bundle identities with health probing
//! - Per-identity pacing with jitter and an optional quiet-hours window
//! - Bounded retry with failover across identities
//! - Archive-file deduplication, reconciled against the filesystem

pub mod identity;
pub mod archive;
pub mod fetcher;
pub mod scheduler;

pub use identity::{Identity, IdentityPool};
pub use archive::DownloadArchive;
pub use fetcher::YtDlpFetcher;
pub use scheduler::{
    AcquisitionScheduler, BatchReport, SchedulerConfig, UrlOutcome, UrlStatus,
};

use thiserror::Error;

/// Acquisition-layer errors.
#[derive(Error, Debug)]
pub enum AcquireError {
    #[error("no healthy identities available for a multi-url batch")]
    NoIdentities,

    #[error("archive error: {0}")]
    Archive(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cancelled")]
    Cancelled,
}

impl AcquireError {
    pub fn code(&self) -> &'static str {
        match self {
            AcquireError::NoIdentities => "acquisition_auth_failed",
            AcquireError::Archive(_) => "acquisition_archive_stale",
            AcquireError::Io(_) => "acquisition_io_failed",
            AcquireError::Cancelled => "cancelled",
        }
    }
}

impl From<AcquireError> for quarry_core::Error {
    fn from(err: AcquireError) -> Self {
        match err {
            AcquireError::Cancelled => quarry_core::Error::Cancelled,
            other => quarry_core::Error::Acquisition(other.to_string()),
        }
    }
}
