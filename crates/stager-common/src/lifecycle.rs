//! Staging requests and lifecycle payloads.
//!
//! The wire format carries the lifecycle as a name plus an untyped JSON
//! object. [`Lifecycle::decode`] turns that pair into a tagged union once, at
//! the boundary, so nothing downstream probes JSON fields.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from decoding a lifecycle at the boundary.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("unsupported lifecycle '{0}'. Valid values: buildpack, docker")]
    Unsupported(String),

    #[error("malformed {kind} lifecycle data: {source}")]
    Malformed {
        kind: LifecycleKind,
        #[source]
        source: serde_json::Error,
    },
}

/// Strategy used to produce a runnable artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleKind {
    /// Build a droplet from source with buildpacks
    Buildpack,
    /// Reference a pre-built image
    Docker,
}

impl LifecycleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleKind::Buildpack => "buildpack",
            LifecycleKind::Docker => "docker",
        }
    }
}

impl fmt::Display for LifecycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LifecycleKind {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buildpack" => Ok(LifecycleKind::Buildpack),
            "docker" => Ok(LifecycleKind::Docker),
            other => Err(LifecycleError::Unsupported(other.to_string())),
        }
    }
}

/// A buildpack reference as sent by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buildpack {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub url: String,
}

/// Payload of the `buildpack` lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildpackLifecycle {
    #[serde(default)]
    pub app_bits_download_uri: String,
    #[serde(default)]
    pub droplet_upload_uri: String,
    #[serde(default)]
    pub stack: String,
    /// Ordered; detection tries buildpacks in this order.
    #[serde(default)]
    pub buildpacks: Vec<Buildpack>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_artifacts_cache_download_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_artifacts_cache_upload_uri: Option<String>,
}

/// Payload of the `docker` lifecycle.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerLifecycle {
    pub docker_image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_login_server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_email: Option<String>,
}

// Registry credentials never reach the logs.
impl fmt::Debug for DockerLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DockerLifecycle")
            .field("docker_image", &self.docker_image)
            .field("docker_login_server", &self.docker_login_server)
            .field("docker_user", &self.docker_user)
            .field(
                "docker_password",
                &self.docker_password.as_ref().map(|_| "<redacted>"),
            )
            .field("docker_email", &self.docker_email)
            .finish()
    }
}

/// Lifecycle-specific part of a staging request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    Buildpack(BuildpackLifecycle),
    Docker(DockerLifecycle),
}

impl Lifecycle {
    /// Decode the wire pair `(lifecycle, lifecycle_data)`.
    pub fn decode(name: &str, data: serde_json::Value) -> Result<Self, LifecycleError> {
        let kind: LifecycleKind = name.parse()?;
        // A missing payload decodes like an empty object
        let data = if data.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            data
        };
        match kind {
            LifecycleKind::Buildpack => serde_json::from_value(data)
                .map(Lifecycle::Buildpack)
                .map_err(|source| LifecycleError::Malformed { kind, source }),
            LifecycleKind::Docker => serde_json::from_value(data)
                .map(Lifecycle::Docker)
                .map_err(|source| LifecycleError::Malformed { kind, source }),
        }
    }

    pub fn kind(&self) -> LifecycleKind {
        match self {
            Lifecycle::Buildpack(_) => LifecycleKind::Buildpack,
            Lifecycle::Docker(_) => LifecycleKind::Docker,
        }
    }
}

/// One `name=value` entry from the request's environment list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
}

/// A request to stage one application.
#[derive(Debug, Clone)]
pub struct StagingRequest {
    pub staging_id: String,
    pub tenant_id: String,
    pub lifecycle: Lifecycle,
    pub environment: BTreeMap<String, String>,
    pub completion_callback: Option<String>,
}

impl StagingRequest {
    pub fn new(
        staging_id: impl Into<String>,
        tenant_id: impl Into<String>,
        lifecycle: Lifecycle,
    ) -> Self {
        Self {
            staging_id: staging_id.into(),
            tenant_id: tenant_id.into(),
            lifecycle,
            environment: BTreeMap::new(),
            completion_callback: None,
        }
    }

    /// Set the environment from a wire list. Later duplicates win.
    pub fn with_environment<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = EnvironmentVariable>,
    {
        self.environment = vars.into_iter().map(|v| (v.name, v.value)).collect();
        self
    }

    pub fn with_completion_callback(mut self, callback: impl Into<String>) -> Self {
        self.completion_callback = Some(callback.into());
        self
    }
}
