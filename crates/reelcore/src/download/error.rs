//! Error taxonomy of the download pipeline.
//!
//! Catalog and selection errors are answered right away and never create or
//! advance a session. Everything that goes wrong after a selection was
//! accepted ends up in [`PipelineError`] and moves the session to `Failed`.

use std::path::PathBuf;
use thiserror::Error;

use crate::chat::text;
use crate::core::error::TransportError;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Stream lookup failed: {0}")]
    Lookup(String),

    #[error("Malformed lookup output: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("No usable formats")]
    NoFormats,
}

impl CatalogError {
    /// Text shown to the user. Lookup internals are never included.
    pub fn user_message(&self) -> &'static str {
        match self {
            CatalogError::InvalidUrl(_) => text::INVALID_URL,
            CatalogError::NoFormats => text::NO_FORMATS,
            CatalogError::Lookup(_) | CatalogError::Malformed(_) => text::FAILED,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Malformed selection payload: {0:?}")]
    Malformed(String),

    #[error("No active session")]
    NoSession,

    #[error("Selection belongs to a previous format list")]
    Stale,

    #[error("Selection {index} out of range (1..={len})")]
    OutOfRange { index: usize, len: usize },

    #[error("Video-only format has no audio track to merge with")]
    MissingAudio,
}

impl SelectionError {
    pub fn user_message(&self) -> &'static str {
        match self {
            SelectionError::NoSession | SelectionError::Stale => text::SELECTION_EXPIRED,
            SelectionError::Malformed(_) | SelectionError::OutOfRange { .. } | SelectionError::MissingAudio => {
                text::SELECTION_INVALID
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Server responded with HTTP {0}")]
    Status(u16),

    #[error("Connection dropped after {received} bytes: {source}")]
    Interrupted {
        received: u64,
        #[source]
        source: reqwest::Error,
    },

    #[error("Stream ended after {received} of {expected} bytes")]
    Truncated { received: u64, expected: u64 },

    #[error("Disk error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transcoder exited with {}: {stderr}", .code.map_or_else(|| "signal".to_string(), |c| format!("code {}", c)))]
    Failed { code: Option<i32>, stderr: String },

    #[error("Transcoder produced no output at {0}")]
    MissingOutput(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Upload rejected: {0}")]
    Rejected(#[source] TransportError),

    #[error("Upload still rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker pool is closed")]
    Closed,

    #[error("Worker job panicked: {0}")]
    Panicked(String),

    #[error("Worker job was cancelled")]
    Cancelled,
}

impl From<tokio::task::JoinError> for WorkerError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            WorkerError::Panicked(err.to_string())
        } else {
            WorkerError::Cancelled
        }
    }
}

/// Anything that moves an accepted session to `Failed`.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("Session disappeared while the pipeline was running")]
    SessionLost,

    #[error("Working directory unavailable: {0}")]
    WorkDir(#[source] std::io::Error),

    #[error("Nothing was downloaded")]
    NothingToDeliver,
}

impl PipelineError {
    /// Short stable label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Transfer(_) => "transfer",
            PipelineError::Transcode(_) => "transcode",
            PipelineError::Delivery(_) => "delivery",
            PipelineError::Worker(_) => "worker",
            PipelineError::SessionLost => "session_lost",
            PipelineError::WorkDir(_) => "work_dir",
            PipelineError::NothingToDeliver => "nothing_to_deliver",
        }
    }
}
