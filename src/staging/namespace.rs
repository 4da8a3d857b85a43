//! Per-tenant execution namespaces.

use std::collections::BTreeMap;
use std::sync::Arc;

use stager_common::task::labels;
use stager_common::{namespace_name, validate_tenant_id};
use tracing::{debug, info};

use crate::errors::StagingError;
use crate::orchestrator::{NamespaceSpec, Orchestrator};

/// Creates tenant namespaces on first use.
pub struct NamespaceManager {
    orchestrator: Arc<dyn Orchestrator>,
    prefix: String,
    stager_id: String,
}

impl NamespaceManager {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        prefix: impl Into<String>,
        stager_id: impl Into<String>,
    ) -> Self {
        Self {
            orchestrator,
            prefix: prefix.into(),
            stager_id: stager_id.into(),
        }
    }

    pub fn namespace_for(&self, tenant_id: &str) -> String {
        namespace_name(&self.prefix, tenant_id)
    }

    /// Make sure `tenant_id`'s namespace exists and return its name.
    ///
    /// A concurrent create by another request shows up as `AlreadyExists`
    /// and counts as success.
    pub async fn ensure(&self, tenant_id: &str) -> Result<String, StagingError> {
        validate_tenant_id(tenant_id)?;
        let name = self.namespace_for(tenant_id);

        match self.orchestrator.get_namespace(&name).await {
            Ok(_) => {
                debug!(namespace = %name, "namespace already present");
                return Ok(name);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                return Err(StagingError::infrastructure(
                    format!("Failed to look up namespace {}", name),
                    e,
                ));
            }
        }

        let spec = NamespaceSpec {
            name: name.clone(),
            labels: BTreeMap::from([
                (labels::TENANT.to_string(), tenant_id.to_string()),
                (labels::STAGER_ID.to_string(), self.stager_id.clone()),
            ]),
        };
        match self.orchestrator.create_namespace(&spec).await {
            Ok(()) => {
                info!(namespace = %name, tenant = tenant_id, "created staging namespace");
                Ok(name)
            }
            Err(e) if e.is_already_exists() => {
                debug!(namespace = %name, "namespace created concurrently");
                Ok(name)
            }
            Err(e) => Err(StagingError::infrastructure(
                format!("Failed to create namespace {}", name),
                e,
            )),
        }
    }

    /// Delete `tenant_id`'s namespace and everything in it. Absent is success.
    pub async fn remove(&self, tenant_id: &str) -> Result<(), StagingError> {
        validate_tenant_id(tenant_id)?;
        let name = self.namespace_for(tenant_id);

        match self.orchestrator.delete_namespace(&name).await {
            Ok(()) => {
                info!(namespace = %name, tenant = tenant_id, "removed staging namespace");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(namespace = %name, "namespace already absent");
                Ok(())
            }
            Err(e) => Err(StagingError::infrastructure(
                format!("Failed to delete namespace {}", name),
                e,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::orchestrator::{InMemoryOrchestrator, OrchestratorError};
    use async_trait::async_trait;
    use stager_common::{TaskRecord, TaskSpecification};
    use std::time::Duration;

    fn manager(orch: Arc<InMemoryOrchestrator>) -> NamespaceManager {
        NamespaceManager::new(orch, "ns-", "stager-0")
    }

    #[tokio::test]
    async fn test_ensure_creates_with_labels() {
        let orch = Arc::new(InMemoryOrchestrator::new());
        let name = manager(orch.clone()).ensure("tenantA").await.unwrap();
        assert_eq!(name, "ns-tenantA");

        let ns = orch.get_namespace("ns-tenantA").await.unwrap();
        assert_eq!(ns.labels[labels::TENANT], "tenantA");
        assert_eq!(ns.labels[labels::STAGER_ID], "stager-0");
    }

    #[tokio::test]
    async fn test_ensure_twice_succeeds_without_second_create() {
        let orch = Arc::new(InMemoryOrchestrator::new());
        let mgr = manager(orch.clone());
        mgr.ensure("tenantA").await.unwrap();
        mgr.ensure("tenantA").await.unwrap();

        let creates = orch
            .calls()
            .await
            .into_iter()
            .filter(|c| c.starts_with("create_namespace"))
            .count();
        assert_eq!(creates, 1);
    }

    #[tokio::test]
    async fn test_concurrent_ensure_both_succeed() {
        let orch = Arc::new(InMemoryOrchestrator::new());
        let mgr = Arc::new(manager(orch.clone()));
        let (a, b) = tokio::join!(mgr.ensure("tenantA"), mgr.ensure("tenantA"));
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(orch.namespace_names().await, vec!["ns-tenantA".to_string()]);
    }

    /// Reports the namespace missing but loses the create race.
    struct RacingOrchestrator;

    #[async_trait]
    impl Orchestrator for RacingOrchestrator {
        async fn create_namespace(&self, ns: &NamespaceSpec) -> Result<(), OrchestratorError> {
            Err(OrchestratorError::AlreadyExists {
                kind: "namespace",
                name: ns.name.clone(),
            })
        }
        async fn get_namespace(&self, name: &str) -> Result<NamespaceSpec, OrchestratorError> {
            Err(OrchestratorError::NotFound {
                kind: "namespace",
                name: name.to_string(),
            })
        }
        async fn delete_namespace(&self, _: &str) -> Result<(), OrchestratorError> {
            unreachable!()
        }
        async fn create_task(&self, _: &TaskSpecification) -> Result<(), OrchestratorError> {
            unreachable!()
        }
        async fn get_task(&self, _: &str, _: &str) -> Result<TaskRecord, OrchestratorError> {
            unreachable!()
        }
        async fn delete_task(&self, _: &str, _: &str, _: Duration) -> Result<(), OrchestratorError> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn test_already_exists_on_create_is_success() {
        let mgr = NamespaceManager::new(Arc::new(RacingOrchestrator), "ns-", "stager-0");
        assert_eq!(mgr.ensure("tenantA").await.unwrap(), "ns-tenantA");
    }

    #[tokio::test]
    async fn test_transport_failure_is_infrastructure() {
        let orch = Arc::new(InMemoryOrchestrator::new());
        orch.set_unavailable(true);
        let err = manager(orch).ensure("tenantA").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
    }

    #[tokio::test]
    async fn test_empty_tenant_is_client_error() {
        let orch = Arc::new(InMemoryOrchestrator::new());
        let err = manager(orch.clone()).ensure("").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Client);
        assert!(orch.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_tenant_with_path_segments_never_reaches_orchestrator() {
        let orch = Arc::new(InMemoryOrchestrator::new());
        let mgr = manager(orch.clone());
        for tenant in ["x/../../../apis/batch/v1/namespaces/kube-system", "a.b", "a b"] {
            let err = mgr.ensure(tenant).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Client, "tenant {:?}", tenant);
            let err = mgr.remove(tenant).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Client, "tenant {:?}", tenant);
        }
        assert!(orch.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let orch = Arc::new(InMemoryOrchestrator::new());
        let mgr = manager(orch.clone());
        mgr.ensure("tenantA").await.unwrap();
        mgr.remove("tenantA").await.unwrap();
        mgr.remove("tenantA").await.unwrap();
        assert!(orch.namespace_names().await.is_empty());
    }
}
