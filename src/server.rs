use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::{self, AppState, SharedState};
use crate::config::{OrchestratorBackend, StagerConfig};
use crate::control_plane::{CcClient, ControlPlane};
use crate::orchestrator::{InMemoryOrchestrator, KubernetesOrchestrator, Orchestrator};
use crate::staging::StagingOrchestrator;

/// Build the orchestrator selected by `orchestrator.backend`.
///
/// The Kubernetes backend is probed once so a wrong endpoint or token fails
/// at startup instead of on the first staging request.
pub async fn build_orchestrator(config: &StagerConfig) -> Result<Arc<dyn Orchestrator>> {
    match config.orchestrator.backend {
        OrchestratorBackend::Kubernetes => {
            let settings = config.kubernetes_settings()?;
            let orchestrator = KubernetesOrchestrator::new(&settings)
                .context("Failed to create Kubernetes client")?;
            let version = orchestrator.server_version().await.with_context(|| {
                format!("Can't connect to Kubernetes API {}", settings.endpoint)
            })?;
            info!(endpoint = %settings.endpoint, version = %version, "connected to Kubernetes API");
            Ok(Arc::new(orchestrator))
        }
        OrchestratorBackend::Memory => {
            warn!("using in-memory orchestrator; staging tasks will not run");
            Ok(Arc::new(InMemoryOrchestrator::new()))
        }
    }
}

/// Wire the staging core to its collaborators.
pub fn build_state(
    config: &StagerConfig,
    orchestrator: Arc<dyn Orchestrator>,
    control_plane: Arc<dyn ControlPlane>,
) -> Result<SharedState> {
    let staging = StagingOrchestrator::from_config(config, orchestrator, control_plane)?;
    Ok(Arc::new(AppState {
        staging,
        default_tenant: config.staging.default_tenant.clone(),
    }))
}

/// Build the full application router with request tracing.
pub fn build_router(state: SharedState) -> Router {
    api::api_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the stager server and serve until Ctrl+C.
pub async fn start_server(config: &StagerConfig) -> Result<()> {
    let problems = config.validate();
    if !problems.is_empty() {
        anyhow::bail!("Invalid configuration:\n  - {}", problems.join("\n  - "));
    }

    let orchestrator = build_orchestrator(config).await?;
    let control_plane: Arc<dyn ControlPlane> = Arc::new(
        CcClient::new(&config.control_plane_settings()?)
            .context("Failed to create control plane client")?,
    );
    let state = build_state(config, orchestrator, control_plane)?;
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.listen, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(
        address = %local_addr,
        stager_id = %config.server.stager_id,
        backend = ?config.orchestrator.backend,
        "stager listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("stager shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::testing::{RecordingControlPlane, Reply};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn memory_config() -> StagerConfig {
        let mut config = StagerConfig::default();
        config.server.advertise_address = Some("stager.internal".to_string());
        config.control_plane.base_url = Some("http://cc.internal".to_string());
        config.orchestrator.backend = OrchestratorBackend::Memory;
        config
    }

    async fn test_router() -> Router {
        let config = memory_config();
        let orchestrator = build_orchestrator(&config).await.unwrap();
        let state = build_state(
            &config,
            orchestrator,
            Arc::new(RecordingControlPlane::new(Reply::Ok)),
        )
        .unwrap();
        build_router(state)
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let app = test_router().await;
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let app = test_router().await;
        let req = Request::builder()
            .uri("/v2/staging/x")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_kubernetes_backend_requires_endpoint() {
        let mut config = memory_config();
        config.orchestrator.backend = OrchestratorBackend::Kubernetes;
        assert!(build_orchestrator(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_kubernetes_fails_at_startup() {
        let mut config = memory_config();
        config.orchestrator.backend = OrchestratorBackend::Kubernetes;
        config.orchestrator.endpoint = Some("http://127.0.0.1:1".to_string());
        let err = build_orchestrator(&config).await.err().unwrap();
        assert!(err.to_string().contains("Can't connect to Kubernetes API"));
    }

    #[tokio::test]
    async fn test_build_state_requires_advertise_address() {
        let mut config = memory_config();
        config.server.advertise_address = None;
        let orchestrator = build_orchestrator(&config).await.unwrap();
        let result = build_state(
            &config,
            orchestrator,
            Arc::new(RecordingControlPlane::new(Reply::Ok)),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_start_server_rejects_invalid_config() {
        let err = start_server(&StagerConfig::default()).await.unwrap_err();
        assert!(err.to_string().contains("Invalid configuration"));
    }
}
