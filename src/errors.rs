//! Typed error hierarchy for the stager.
//!
//! `StagingError` is the single error type returned by the orchestration core.
//! Each variant belongs to one [`ErrorKind`]; the HTTP adapter maps kinds to
//! status codes, so nothing below `api.rs` knows about transport vocabulary.

use stager_common::{LifecycleError, NamingError};
use thiserror::Error;

/// Classification used by callers to decide between "try again",
/// "already done" and "gave up".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input. Never retried.
    Client,
    /// A task already exists for this staging id.
    Conflict,
    /// The task or namespace does not exist.
    NotFound,
    /// Orchestrator or transport failure. Fatal for the current request.
    Infrastructure,
    /// The control plane refused the completion callback.
    CompletionRejected,
    /// The control plane could not be reached.
    CompletionUnavailable,
}

/// Errors from the staging orchestration core.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("Invalid identifier: {0}")]
    InvalidStagingId(#[from] NamingError),

    #[error("Staging task {task} already exists in namespace {namespace}")]
    TaskAlreadyExists { namespace: String, task: String },

    #[error("No staging task found for {staging_id} in tenant {tenant_id}")]
    NotFound {
        staging_id: String,
        tenant_id: String,
    },

    #[error("{context}: {source:#}")]
    Infrastructure {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Control plane rejected completion for {staging_id} (status {status}): {body}")]
    CompletionRejected {
        staging_id: String,
        status: u16,
        body: String,
    },

    #[error("Control plane unavailable for completion of {staging_id}: {message}")]
    CompletionUnavailable { staging_id: String, message: String },
}

impl StagingError {
    pub fn infrastructure(context: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        StagingError::Infrastructure {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StagingError::Lifecycle(_) | StagingError::InvalidStagingId(_) => ErrorKind::Client,
            StagingError::TaskAlreadyExists { .. } => ErrorKind::Conflict,
            StagingError::NotFound { .. } => ErrorKind::NotFound,
            StagingError::Infrastructure { .. } => ErrorKind::Infrastructure,
            StagingError::CompletionRejected { .. } => ErrorKind::CompletionRejected,
            StagingError::CompletionUnavailable { .. } => ErrorKind::CompletionUnavailable,
        }
    }
}
