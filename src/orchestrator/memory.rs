use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use stager_common::{TaskPhase, TaskRecord, TaskSpecification};
use tokio::sync::Mutex;

use super::{NamespaceSpec, Orchestrator, OrchestratorError};

#[derive(Debug, Default)]
struct State {
    namespaces: BTreeMap<String, NamespaceSpec>,
    tasks: HashMap<(String, String), StoredTask>,
    calls: Vec<String>,
}

#[derive(Debug, Clone)]
struct StoredTask {
    spec: TaskSpecification,
    record: TaskRecord,
}

/// Orchestrator that keeps namespaces and tasks in process memory.
///
/// Tasks never execute; their phase stays `Pending` until moved with
/// [`InMemoryOrchestrator::set_phase`]. Every call is recorded so callers can
/// assert which remote operations were attempted.
#[derive(Debug, Default)]
pub struct InMemoryOrchestrator {
    state: Mutex<State>,
    unavailable: AtomicBool,
}

impl InMemoryOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a transport error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Move a task to `phase`, as the cluster would while it executes.
    pub async fn set_phase(&self, namespace: &str, name: &str, phase: TaskPhase) -> bool {
        let mut state = self.state.lock().await;
        match state
            .tasks
            .get_mut(&(namespace.to_string(), name.to_string()))
        {
            Some(task) => {
                task.record.phase = phase;
                true
            }
            None => false,
        }
    }

    /// Specification a task was created with.
    pub async fn task_spec(&self, namespace: &str, name: &str) -> Option<TaskSpecification> {
        let state = self.state.lock().await;
        state
            .tasks
            .get(&(namespace.to_string(), name.to_string()))
            .map(|t| t.spec.clone())
    }

    pub async fn task_count(&self) -> usize {
        self.state.lock().await.tasks.len()
    }

    pub async fn namespace_names(&self) -> Vec<String> {
        self.state.lock().await.namespaces.keys().cloned().collect()
    }

    /// Operations attempted so far, e.g. `create_task ns-a/task-1`.
    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    async fn begin(&self, call: String) -> Result<tokio::sync::MutexGuard<'_, State>, OrchestratorError> {
        let mut state = self.state.lock().await;
        state.calls.push(call);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Transport(anyhow::anyhow!(
                "in-memory orchestrator marked unavailable"
            )));
        }
        Ok(state)
    }
}

#[async_trait]
impl Orchestrator for InMemoryOrchestrator {
    async fn create_namespace(&self, namespace: &NamespaceSpec) -> Result<(), OrchestratorError> {
        let mut state = self
            .begin(format!("create_namespace {}", namespace.name))
            .await?;
        if state.namespaces.contains_key(&namespace.name) {
            return Err(OrchestratorError::AlreadyExists {
                kind: "namespace",
                name: namespace.name.clone(),
            });
        }
        state
            .namespaces
            .insert(namespace.name.clone(), namespace.clone());
        Ok(())
    }

    async fn get_namespace(&self, name: &str) -> Result<NamespaceSpec, OrchestratorError> {
        let state = self.begin(format!("get_namespace {}", name)).await?;
        state
            .namespaces
            .get(name)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound {
                kind: "namespace",
                name: name.to_string(),
            })
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), OrchestratorError> {
        let mut state = self.begin(format!("delete_namespace {}", name)).await?;
        if state.namespaces.remove(name).is_none() {
            return Err(OrchestratorError::NotFound {
                kind: "namespace",
                name: name.to_string(),
            });
        }
        // Deleting a namespace takes its tasks with it
        state.tasks.retain(|(ns, _), _| ns != name);
        Ok(())
    }

    async fn create_task(&self, spec: &TaskSpecification) -> Result<(), OrchestratorError> {
        let mut state = self
            .begin(format!("create_task {}/{}", spec.namespace, spec.name))
            .await?;
        if !state.namespaces.contains_key(&spec.namespace) {
            return Err(OrchestratorError::NotFound {
                kind: "namespace",
                name: spec.namespace.clone(),
            });
        }
        let key = (spec.namespace.clone(), spec.name.clone());
        if state.tasks.contains_key(&key) {
            return Err(OrchestratorError::AlreadyExists {
                kind: "task",
                name: spec.name.clone(),
            });
        }
        let record = TaskRecord {
            name: spec.name.clone(),
            namespace: spec.namespace.clone(),
            phase: TaskPhase::Pending,
            labels: spec.labels.clone(),
            created_at: Some(Utc::now()),
        };
        state.tasks.insert(
            key,
            StoredTask {
                spec: spec.clone(),
                record,
            },
        );
        Ok(())
    }

    async fn get_task(&self, namespace: &str, name: &str) -> Result<TaskRecord, OrchestratorError> {
        let state = self
            .begin(format!("get_task {}/{}", namespace, name))
            .await?;
        state
            .tasks
            .get(&(namespace.to_string(), name.to_string()))
            .map(|t| t.record.clone())
            .ok_or_else(|| OrchestratorError::NotFound {
                kind: "task",
                name: name.to_string(),
            })
    }

    async fn delete_task(
        &self,
        namespace: &str,
        name: &str,
        _grace_period: Duration,
    ) -> Result<(), OrchestratorError> {
        let mut state = self
            .begin(format!("delete_task {}/{}", namespace, name))
            .await?;
        state
            .tasks
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| OrchestratorError::NotFound {
                kind: "task",
                name: name.to_string(),
            })
    }
}
