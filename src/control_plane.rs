//! Completion callback to the control plane that requested staging.
//!
//! The control plane exposes one endpoint per staging attempt:
//!
//! | Method | Path                                      | Body                |
//! |--------|-------------------------------------------|---------------------|
//! | `POST` | `/internal/staging/{staging_id}/completed`| task result payload |
//!
//! Responses fall into three classes: success (2xx), rejection (4xx: bad
//! payload or already acknowledged), and unavailable (5xx or no response).

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde_json::value::RawValue;
use thiserror::Error;
use tracing::debug;

/// Classified failure of a completion callback.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("control plane rejected the callback with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("control plane unavailable: {0}")]
    Unavailable(String),
}

/// The control plane's staging-completion endpoint.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Deliver `payload` for `staging_id`. Exactly one attempt, no retries.
    async fn staging_complete(
        &self,
        staging_id: &str,
        payload: &RawValue,
    ) -> Result<(), CallbackError>;
}

/// Connection settings for the control plane's internal API.
#[derive(Debug, Clone, Default)]
pub struct ControlPlaneSettings {
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub skip_cert_verify: bool,
}

/// HTTP client for the control plane's internal staging API.
pub struct CcClient {
    client: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl CcClient {
    pub fn new(settings: &ControlPlaneSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(settings.skip_cert_verify)
            .build()
            .context("Failed to build control plane HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            username: settings.username.clone(),
            password: settings.password.clone(),
        })
    }

    fn completion_url(&self, staging_id: &str) -> String {
        format!("{}/internal/staging/{}/completed", self.base_url, staging_id)
    }
}

/// Classify a control plane response status.
fn classify_status(status: StatusCode, body: String) -> Result<(), CallbackError> {
    if status.is_success() {
        Ok(())
    } else if status.is_client_error() {
        Err(CallbackError::Rejected {
            status: status.as_u16(),
            body,
        })
    } else {
        Err(CallbackError::Unavailable(format!(
            "status {}: {}",
            status.as_u16(),
            body
        )))
    }
}

#[async_trait]
impl ControlPlane for CcClient {
    async fn staging_complete(
        &self,
        staging_id: &str,
        payload: &RawValue,
    ) -> Result<(), CallbackError> {
        let url = self.completion_url(staging_id);
        let mut request = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(payload.get().to_owned());
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_ref());
        }

        let resp = request
            .send()
            .await
            .map_err(|e| CallbackError::Unavailable(format!("POST {} failed: {}", url, e)))?;

        let status = resp.status();
        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) => {
                debug!(staging_id, error = %e, "failed to read control plane response body");
                format!("<unreadable response body: {}>", e)
            }
        };
        debug!(staging_id, status = status.as_u16(), "control plane responded");

        classify_status(status, body)
    }
}
