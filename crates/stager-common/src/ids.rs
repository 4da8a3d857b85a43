//! Deterministic naming for staging namespaces and tasks.
//!
//! Names are pure functions of their inputs so that a restarted stager, or a
//! second replica, derives the same orchestrator resource names for the same
//! staging attempt without any shared state.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Prefix applied to every staging task name.
pub const TASK_NAME_PREFIX: &str = "task-";

/// Number of hex characters of the staging-id digest kept in a task name.
/// `task-` + 40 stays well inside the 63-character DNS label limit.
const TASK_HASH_LEN: usize = 40;

/// Staging and tenant ids end up in resource names and REST paths.
static ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap());

/// Errors from deriving resource names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamingError {
    #[error("tenant id must not be empty")]
    EmptyTenant,

    #[error("invalid tenant id '{0}': only letters, digits, '-' and '_' are allowed")]
    InvalidTenant(String),

    #[error("staging id must not be empty")]
    EmptyStagingId,

    #[error("invalid staging id '{0}': only letters, digits, '-' and '_' are allowed")]
    InvalidStagingId(String),
}

/// Name of the execution namespace owned by `tenant_id`.
pub fn namespace_name(prefix: &str, tenant_id: &str) -> String {
    format!("{}{}", prefix, tenant_id)
}

/// Name of the task that runs staging attempt `staging_id` for `tenant_id`.
///
/// The staging id is hashed rather than embedded so arbitrarily long ids
/// still produce a valid resource name. Two staging ids collide only if
/// their SHA-256 digests share the first 160 bits.
pub fn task_name(tenant_id: &str, staging_id: &str) -> Result<String, NamingError> {
    validate_tenant_id(tenant_id)?;
    validate_staging_id(staging_id)?;

    let digest = hex::encode(Sha256::digest(staging_id.as_bytes()));
    Ok(format!("{}{}", TASK_NAME_PREFIX, &digest[..TASK_HASH_LEN]))
}

/// Check that a staging id is usable as a task discriminator.
pub fn validate_staging_id(staging_id: &str) -> Result<(), NamingError> {
    if staging_id.is_empty() {
        return Err(NamingError::EmptyStagingId);
    }
    if !ID_PATTERN.is_match(staging_id) {
        return Err(NamingError::InvalidStagingId(staging_id.to_string()));
    }
    Ok(())
}

/// Check that a tenant id can be embedded in a namespace name.
pub fn validate_tenant_id(tenant_id: &str) -> Result<(), NamingError> {
    if tenant_id.is_empty() {
        return Err(NamingError::EmptyTenant);
    }
    if !ID_PATTERN.is_match(tenant_id) {
        return Err(NamingError::InvalidTenant(tenant_id.to_string()));
    }
    Ok(())
}

/// A staging guid of the form `<app-guid>-<task-id>`, where the app guid is a
/// regular five-group UUID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingGuid {
    pub app_id: String,
    pub task_id: String,
}

impl StagingGuid {
    /// Split a staging id into app guid and task id.
    ///
    /// Returns `None` unless the id has exactly six dash-separated pieces.
    pub fn decompose(staging_id: &str) -> Option<Self> {
        let pieces: Vec<&str> = staging_id.split('-').collect();
        if pieces.len() != 6 || pieces.iter().any(|p| p.is_empty()) {
            return None;
        }
        Some(Self {
            app_id: pieces[..5].join("-"),
            task_id: pieces[5].to_string(),
        })
    }
}

impl fmt::Display for StagingGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.app_id, self.task_id)
    }
}
