//! Lifecycle of the single task behind one staging attempt.
//!
//! At most one task exists per staging id: the task name is derived from the
//! id, and the orchestrator rejects a second create with the same name.

use std::sync::Arc;
use std::time::Duration;

use stager_common::{TaskPhase, TaskRecord, TaskSpecification, namespace_name, task_name};
use tracing::{debug, info, warn};

use crate::errors::StagingError;
use crate::orchestrator::Orchestrator;

pub struct TaskLifecycleController {
    orchestrator: Arc<dyn Orchestrator>,
    namespace_prefix: String,
}

impl TaskLifecycleController {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, namespace_prefix: impl Into<String>) -> Self {
        Self {
            orchestrator,
            namespace_prefix: namespace_prefix.into(),
        }
    }

    /// Create the task described by `spec`.
    ///
    /// An existing task is left untouched and reported as a conflict.
    pub async fn start(&self, spec: &TaskSpecification) -> Result<(), StagingError> {
        match self.orchestrator.create_task(spec).await {
            Ok(()) => {
                info!(
                    namespace = %spec.namespace,
                    task = %spec.name,
                    image = %spec.image,
                    "created staging task"
                );
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                warn!(namespace = %spec.namespace, task = %spec.name, "staging task already exists");
                Err(StagingError::TaskAlreadyExists {
                    namespace: spec.namespace.clone(),
                    task: spec.name.clone(),
                })
            }
            Err(e) => Err(StagingError::infrastructure(
                format!("Failed to create task {}/{}", spec.namespace, spec.name),
                e,
            )),
        }
    }

    /// Current state of the task for `staging_id`, or `None` if there is none.
    pub async fn lookup(
        &self,
        tenant_id: &str,
        staging_id: &str,
    ) -> Result<Option<TaskRecord>, StagingError> {
        let (namespace, name) = self.locate(tenant_id, staging_id)?;

        match self.orchestrator.get_task(&namespace, &name).await {
            Ok(record) if record.staging_id().is_some_and(|id| id != staging_id) => {
                warn!(
                    namespace = %namespace,
                    task = %name,
                    staging_id,
                    owner = ?record.staging_id(),
                    "task name belongs to another staging attempt"
                );
                Ok(None)
            }
            Ok(record) => {
                debug!(namespace = %namespace, task = %name, phase = %record.phase, "looked up staging task");
                Ok(Some(record))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(StagingError::infrastructure(
                format!("Failed to look up task {}/{}", namespace, name),
                e,
            )),
        }
    }

    /// Observed phase of the task for `staging_id`; `NotFound` if it is absent.
    pub async fn phase(
        &self,
        tenant_id: &str,
        staging_id: &str,
    ) -> Result<TaskPhase, StagingError> {
        Ok(self
            .lookup(tenant_id, staging_id)
            .await?
            .map_or(TaskPhase::NotFound, |record| record.phase))
    }

    /// Delete the task for `staging_id`. A missing task is not an error.
    pub async fn stop(
        &self,
        tenant_id: &str,
        staging_id: &str,
        grace_period: Duration,
    ) -> Result<(), StagingError> {
        let (namespace, name) = self.locate(tenant_id, staging_id)?;

        match self
            .orchestrator
            .delete_task(&namespace, &name, grace_period)
            .await
        {
            Ok(()) => {
                info!(
                    namespace = %namespace,
                    task = %name,
                    grace_secs = grace_period.as_secs(),
                    "deleted staging task"
                );
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(namespace = %namespace, task = %name, "staging task already gone");
                Ok(())
            }
            Err(e) => Err(StagingError::infrastructure(
                format!("Failed to delete task {}/{}", namespace, name),
                e,
            )),
        }
    }

    fn locate(&self, tenant_id: &str, staging_id: &str) -> Result<(String, String), StagingError> {
        let name = task_name(tenant_id, staging_id)?;
        Ok((namespace_name(&self.namespace_prefix, tenant_id), name))
    }
}
