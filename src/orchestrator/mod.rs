//! Cluster orchestrator capability.
//!
//! The stager never owns namespace or task state. Everything it knows about
//! a staging attempt is re-read through this trait, and cross-request
//! exclusion relies on the orchestrator rejecting duplicate creates.
//!
//! | Backend                  | Used for                                  |
//! |--------------------------|-------------------------------------------|
//! | `KubernetesOrchestrator` | Namespaces + `batch/v1` Jobs over REST    |
//! | `InMemoryOrchestrator`   | Local development (`backend = "memory"`) and tests |

pub mod kubernetes;
pub mod memory;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use stager_common::{TaskRecord, TaskSpecification};
use thiserror::Error;

pub use kubernetes::KubernetesOrchestrator;
pub use memory::InMemoryOrchestrator;

/// Errors from the orchestrator capability.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("Orchestrator API returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, OrchestratorError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, OrchestratorError::AlreadyExists { .. })
    }
}

/// An execution namespace and its labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceSpec {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

/// Remote namespace/task primitives with create/get/delete semantics.
///
/// Creates must fail with [`OrchestratorError::AlreadyExists`] when the
/// resource exists, and gets/deletes with [`OrchestratorError::NotFound`]
/// when it does not.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn create_namespace(&self, namespace: &NamespaceSpec) -> Result<(), OrchestratorError>;

    async fn get_namespace(&self, name: &str) -> Result<NamespaceSpec, OrchestratorError>;

    async fn delete_namespace(&self, name: &str) -> Result<(), OrchestratorError>;

    async fn create_task(&self, spec: &TaskSpecification) -> Result<(), OrchestratorError>;

    async fn get_task(&self, namespace: &str, name: &str) -> Result<TaskRecord, OrchestratorError>;

    async fn delete_task(
        &self,
        namespace: &str,
        name: &str,
        grace_period: Duration,
    ) -> Result<(), OrchestratorError>;
}
