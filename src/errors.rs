//! Error taxonomy for a backup run.
//!
//! Each external collaborator has its own closed error enum carrying the raw
//! facts (status code, body, underlying cause). `BackupError` tags those with
//! the pipeline stage that produced them so callers branch on kind instead of
//! parsing messages.

use std::{fmt, io};
use thiserror::Error;

/// Failures talking to the secret store or validating what it returned.
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret store unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),
    #[error("secret `{path}` not found")]
    NotFound { path: String },
    #[error("secret store answered {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("secret store response is malformed: {0}")]
    Malformed(String),
    #[error("secret bundle is missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
    #[error("secret field `{field}` is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Failures of a single call against the state-hosting API.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("response body is malformed: {0}")]
    MalformedBody(String),
    #[error("cannot build request URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// HTTP status of the failed call, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Transport failures, throttling and server-side errors may succeed on
    /// a later attempt. Everything else is final.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            FetchError::Transport(err) => !err.is_builder() && !err.is_decode(),
            FetchError::MalformedBody(_) | FetchError::InvalidUrl(_) => false,
        }
    }
}

/// Failures writing the payload to object storage.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("invalid archive key `{key}`: {reason}")]
    InvalidKey { key: String, reason: &'static str },
    #[error("object storage rejected s3://{bucket}/{key}: {message}")]
    Storage {
        bucket: String,
        key: String,
        message: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Pipeline stage, named after the external system it talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ResolvingSecrets,
    FetchingVersionId,
    DownloadingState,
    Uploading,
}

impl Stage {
    pub fn external_system(&self) -> &'static str {
        match self {
            Stage::ResolvingSecrets => "secret store",
            Stage::FetchingVersionId | Stage::DownloadingState => "state API",
            Stage::Uploading => "object storage",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ResolvingSecrets => "resolving secrets",
            Stage::FetchingVersionId => "fetching current state version id",
            Stage::DownloadingState => "downloading state",
            Stage::Uploading => "uploading archive",
        };
        write!(f, "{} ({})", name, self.external_system())
    }
}

/// The four ways a run can fail. Every one of them is fatal.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("failed to resolve secrets from `{path}`: {source}")]
    SecretResolution {
        path: String,
        #[source]
        source: SecretError,
    },
    #[error("failed to fetch current state version id: {0}")]
    StateLookup(#[source] FetchError),
    #[error("failed to download state version `{version}`: {source}")]
    StateDownload {
        version: String,
        #[source]
        source: FetchError,
    },
    #[error("failed to archive state: {0}")]
    ArchiveWrite(#[source] ArchiveError),
}

impl BackupError {
    pub fn stage(&self) -> Stage {
        match self {
            BackupError::SecretResolution { .. } => Stage::ResolvingSecrets,
            BackupError::StateLookup(_) => Stage::FetchingVersionId,
            BackupError::StateDownload { .. } => Stage::DownloadingState,
            BackupError::ArchiveWrite(_) => Stage::Uploading,
        }
    }
}
