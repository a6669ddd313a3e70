//! Failure taxonomy of a background capture job.
//!
//! Acquisition failures do not appear here: they degrade to placeholder
//! text and the job carries on.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    /// Nothing explicit, nothing cached, and discovery found no database.
    #[error("no target database for license {0}; set one with /set-database")]
    NoDatabase(String),

    /// The license lost its token between acknowledgment and execution.
    #[error("license {0} has no workspace token")]
    NotConnected(String),

    /// The completion reply broke the structured-output contract.
    #[error("extraction failed: {0:#}")]
    Extraction(anyhow::Error),

    /// The workspace rejected the page.
    #[error("page write failed: {0:#}")]
    Write(anyhow::Error),

    #[error("license store error: {0:#}")]
    Store(anyhow::Error),
}

impl CaptureError {
    /// Short stage label for structured logs.
    pub fn stage(&self) -> &'static str {
        match self {
            CaptureError::NoDatabase(_) => "discovery",
            CaptureError::NotConnected(_) => "authorization",
            CaptureError::Extraction(_) => "extraction",
            CaptureError::Write(_) => "write",
            CaptureError::Store(_) => "store",
        }
    }
}
