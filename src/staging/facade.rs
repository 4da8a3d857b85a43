//! Entry point for the HTTP layer: start, stop and report-complete.
//!
//! ```text
//! Requested → NamespaceEnsured → TaskCreated → {Succeeded|Failed} → Reported → Removed
//!                                    └──────────── stop ────────────────────────┘
//! ```
//!
//! Transitions happen only inside these three operations. Task phases are
//! owned by the orchestrator and observed on demand; nothing polls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::value::RawValue;
use stager_common::{CompletionOutcome, StagingRequest, TaskPhase, task_name};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, warn};

use crate::config::StagerConfig;
use crate::control_plane::ControlPlane;
use crate::errors::StagingError;
use crate::logging::staging_span;
use crate::orchestrator::Orchestrator;
use crate::staging::controller::TaskLifecycleController;
use crate::staging::namespace::NamespaceManager;
use crate::staging::reporter::CompletionReporter;
use crate::staging::translator::{Plan, Translator, TranslatorConfig};

const DEFAULT_DOCKER_COMPLETION_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_STOP_GRACE_PERIOD: Duration = Duration::from_secs(60);

/// Pending docker completions keyed by `(tenant, staging id)`.
type PendingMap = Arc<Mutex<HashMap<(String, String), JoinHandle<()>>>>;

pub struct StagingOrchestrator {
    translator: Translator,
    control_plane: Arc<dyn ControlPlane>,
    namespaces: NamespaceManager,
    controller: Arc<TaskLifecycleController>,
    reporter: Arc<CompletionReporter>,
    docker_completion_delay: Duration,
    stop_grace_period: Duration,
    pending: PendingMap,
}

impl StagingOrchestrator {
    pub fn new(
        config: TranslatorConfig,
        orchestrator: Arc<dyn Orchestrator>,
        control_plane: Arc<dyn ControlPlane>,
    ) -> Self {
        let namespaces = NamespaceManager::new(
            orchestrator.clone(),
            config.namespace_prefix.clone(),
            config.stager_id.clone(),
        );
        let controller = Arc::new(TaskLifecycleController::new(
            orchestrator,
            config.namespace_prefix.clone(),
        ));
        let reporter = Arc::new(CompletionReporter::new(
            control_plane.clone(),
            controller.clone(),
            DEFAULT_STOP_GRACE_PERIOD,
        ));

        Self {
            translator: Translator::new(config),
            control_plane,
            namespaces,
            controller,
            reporter,
            docker_completion_delay: DEFAULT_DOCKER_COMPLETION_DELAY,
            stop_grace_period: DEFAULT_STOP_GRACE_PERIOD,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn from_config(
        config: &StagerConfig,
        orchestrator: Arc<dyn Orchestrator>,
        control_plane: Arc<dyn ControlPlane>,
    ) -> anyhow::Result<Self> {
        let translator_config = TranslatorConfig::from_config(config)?;
        Ok(Self::new(translator_config, orchestrator, control_plane)
            .with_docker_completion_delay(config.docker_completion_delay())
            .with_stop_grace_period(config.stop_grace_period()))
    }

    pub fn with_docker_completion_delay(mut self, delay: Duration) -> Self {
        self.docker_completion_delay = delay;
        self
    }

    /// Grace period used by stop requests without one and by teardown.
    pub fn with_stop_grace_period(mut self, grace: Duration) -> Self {
        self.stop_grace_period = grace;
        self.reporter = Arc::new(CompletionReporter::new(
            self.control_plane.clone(),
            self.controller.clone(),
            grace,
        ));
        self
    }

    /// Begin staging. Docker requests are answered by a deferred report.
    pub async fn start_staging(&self, request: StagingRequest) -> Result<(), StagingError> {
        let span = staging_span("start", &request.staging_id, &request.tenant_id);

        async {
            match self.translator.translate(&request)? {
                Plan::DockerShortCircuit { outcome } => self.schedule_docker_completion(outcome).await,
                Plan::Task(spec) => {
                    self.namespaces.ensure(&request.tenant_id).await?;
                    self.controller.start(&spec).await
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Forward a task's result to the control plane and remove the task.
    pub async fn report_completion(
        &self,
        staging_id: &str,
        tenant_id: &str,
        payload: Box<RawValue>,
    ) -> Result<(), StagingError> {
        task_name(tenant_id, staging_id)?;

        let outcome = CompletionOutcome::from_payload(staging_id, tenant_id, payload);
        self.reporter
            .report_and_teardown(&outcome)
            .instrument(staging_span("complete", staging_id, tenant_id))
            .await
    }

    /// Stop a staging attempt.
    ///
    /// A docker completion that has not fired yet is cancelled and never
    /// reported. Otherwise the task is looked up first so a missing one can
    /// be reported as not found.
    pub async fn stop_staging(
        &self,
        staging_id: &str,
        tenant_id: &str,
        grace_period: Option<Duration>,
    ) -> Result<(), StagingError> {
        task_name(tenant_id, staging_id)?;

        let pending = self
            .pending
            .lock()
            .await
            .remove(&(tenant_id.to_string(), staging_id.to_string()));
        if let Some(handle) = pending {
            if !handle.is_finished() {
                handle.abort();
                info!(staging_id, tenant = tenant_id, "cancelled pending docker completion");
                return Ok(());
            }
        }

        match self.controller.phase(tenant_id, staging_id).await? {
            TaskPhase::NotFound => {
                debug!(staging_id, tenant = tenant_id, "no staging task to stop");
                return Err(StagingError::NotFound {
                    staging_id: staging_id.to_string(),
                    tenant_id: tenant_id.to_string(),
                });
            }
            phase if phase.is_terminal() => {
                debug!(staging_id, %phase, "stopping a finished staging task");
            }
            _ => {}
        }

        let grace = grace_period.unwrap_or(self.stop_grace_period);
        self.controller.stop(tenant_id, staging_id, grace).await
    }

    /// Whether a docker completion for this attempt is still waiting to fire.
    pub async fn has_pending_completion(&self, tenant_id: &str, staging_id: &str) -> bool {
        self.pending
            .lock()
            .await
            .get(&(tenant_id.to_string(), staging_id.to_string()))
            .is_some_and(|h| !h.is_finished())
    }

    async fn schedule_docker_completion(&self, outcome: CompletionOutcome) -> Result<(), StagingError> {
        let key = (outcome.tenant_id.clone(), outcome.staging_id.clone());
        let mut pending = self.pending.lock().await;

        if pending.get(&key).is_some_and(|h| !h.is_finished()) {
            warn!(staging_id = %outcome.staging_id, "docker staging already pending");
            return Err(StagingError::TaskAlreadyExists {
                namespace: self.translator.namespace_for(&outcome.tenant_id),
                task: outcome.staging_id.clone(),
            });
        }

        let delay = self.docker_completion_delay;
        let reporter = self.reporter.clone();
        let map = self.pending.clone();
        let task_key = key.clone();
        let span = staging_span("docker_complete", &outcome.staging_id, &outcome.tenant_id);

        let handle = tokio::spawn(
            async move {
                tokio::time::sleep(delay).await;
                // Past this point a stop can no longer suppress the report
                map.lock().await.remove(&task_key);
                if let Err(e) = reporter.report(&outcome).await {
                    warn!(error = %e, "docker staging completion was not delivered");
                }
            }
            .instrument(span),
        );
        pending.insert(key, handle);

        info!(delay_ms = delay.as_millis() as u64, "scheduled docker staging completion");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::testing::{RecordingControlPlane, Reply};
    use crate::errors::ErrorKind;
    use crate::orchestrator::InMemoryOrchestrator;
    use crate::staging::translator::test_config;
    use serde_json::json;
    use stager_common::{Buildpack, BuildpackLifecycle, DockerLifecycle, Lifecycle, TaskPhase};

    fn raw(value: serde_json::Value) -> Box<RawValue> {
        serde_json::value::to_raw_value(&value).unwrap()
    }

    fn facade(
        reply: Reply,
    ) -> (
        Arc<InMemoryOrchestrator>,
        Arc<RecordingControlPlane>,
        StagingOrchestrator,
    ) {
        let orch = Arc::new(InMemoryOrchestrator::new());
        let cp = Arc::new(RecordingControlPlane::new(reply));
        let facade = StagingOrchestrator::new(test_config(), orch.clone(), cp.clone())
            .with_docker_completion_delay(Duration::from_millis(50));
        (orch, cp, facade)
    }

    fn buildpack(staging_id: &str) -> StagingRequest {
        StagingRequest::new(
            staging_id,
            "tenantA",
            Lifecycle::Buildpack(BuildpackLifecycle {
                stack: "cflinuxfs3".to_string(),
                buildpacks: vec![Buildpack {
                    key: "go_buildpack".to_string(),
                    name: None,
                    url: "http://bp/go.zip".to_string(),
                }],
                ..Default::default()
            }),
        )
    }

    fn docker(staging_id: &str) -> StagingRequest {
        StagingRequest::new(
            staging_id,
            "tenantA",
            Lifecycle::Docker(DockerLifecycle {
                docker_image: "nginx:1.25".to_string(),
                docker_login_server: None,
                docker_user: None,
                docker_password: None,
                docker_email: None,
            }),
        )
    }

    #[tokio::test]
    async fn test_start_creates_namespace_and_task() {
        let (orch, _, facade) = facade(Reply::Ok);
        facade.start_staging(buildpack("stg-1")).await.unwrap();

        assert_eq!(orch.namespace_names().await, vec!["ns-tenantA".to_string()]);
        let name = task_name("tenantA", "stg-1").unwrap();
        let spec = orch.task_spec("ns-tenantA", &name).await.unwrap();
        assert_eq!(spec.environment["CF_STACK"], "cflinuxfs3");
        assert_eq!(spec.environment["CF_BUILDPACKS_ORDER"], "go_buildpack");
    }

    #[tokio::test]
    async fn test_duplicate_start_conflicts() {
        let (orch, _, facade) = facade(Reply::Ok);
        facade.start_staging(buildpack("stg-1")).await.unwrap();
        let err = facade.start_staging(buildpack("stg-1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(orch.task_count().await, 1);
    }

    #[tokio::test]
    async fn test_report_completion_then_stop_is_not_found() {
        let (orch, cp, facade) = facade(Reply::Ok);
        facade.start_staging(buildpack("stg-1")).await.unwrap();
        let name = task_name("tenantA", "stg-1").unwrap();
        orch.set_phase("ns-tenantA", &name, TaskPhase::Succeeded).await;

        facade
            .report_completion("stg-1", "tenantA", raw(json!({"succeeded": true})))
            .await
            .unwrap();
        assert_eq!(orch.task_count().await, 0);
        assert_eq!(cp.received().await[0].0, "stg-1");

        let err = facade
            .stop_staging("stg-1", "tenantA", Some(Duration::from_secs(30)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_stop_running_task() {
        let (orch, cp, facade) = facade(Reply::Ok);
        facade.start_staging(buildpack("stg-1")).await.unwrap();
        facade.stop_staging("stg-1", "tenantA", None).await.unwrap();
        assert_eq!(orch.task_count().await, 0);
        assert!(cp.received().await.is_empty());
    }

    #[tokio::test]
    async fn test_report_with_invalid_id_does_not_notify() {
        let (_, cp, facade) = facade(Reply::Ok);
        let err = facade
            .report_completion("bad id", "tenantA", raw(json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Client);
        assert!(cp.received().await.is_empty());
    }

    #[tokio::test]
    async fn test_docker_reports_image_without_task() {
        let (orch, cp, facade) = facade(Reply::Ok);
        facade.start_staging(docker("stg-d")).await.unwrap();
        assert!(facade.has_pending_completion("tenantA", "stg-d").await);

        tokio::time::sleep(Duration::from_millis(300)).await;

        let received = cp.received().await;
        assert_eq!(received.len(), 1);
        assert_eq!(
            received[0].1["result"]["lifecycle_metadata"]["docker_image"],
            "nginx:1.25"
        );
        assert!(orch.calls().await.is_empty());
        assert!(!facade.has_pending_completion("tenantA", "stg-d").await);
    }

    #[tokio::test]
    async fn test_stop_before_docker_delay_suppresses_report() {
        let (_, cp, facade) = facade(Reply::Ok);
        let facade = facade.with_docker_completion_delay(Duration::from_millis(200));
        facade.start_staging(docker("stg-d")).await.unwrap();

        facade.stop_staging("stg-d", "tenantA", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert!(cp.received().await.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_pending_docker_start_conflicts() {
        let (_, _, facade) = facade(Reply::Ok);
        let facade = facade.with_docker_completion_delay(Duration::from_secs(10));
        facade.start_staging(docker("stg-d")).await.unwrap();
        let err = facade.start_staging(docker("stg-d")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        facade.stop_staging("stg-d", "tenantA", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_completion_unavailable_still_tears_down() {
        let (orch, _, facade) = facade(Reply::Unavailable);
        facade.start_staging(buildpack("stg-1")).await.unwrap();
        let err = facade
            .report_completion("stg-1", "tenantA", raw(json!({"failed": true})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CompletionUnavailable);
        assert_eq!(orch.task_count().await, 0);
    }

    #[tokio::test]
    async fn test_start_with_orchestrator_down_is_infrastructure() {
        let (orch, _, facade) = facade(Reply::Ok);
        orch.set_unavailable(true);
        let err = facade.start_staging(buildpack("stg-1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
    }
}
