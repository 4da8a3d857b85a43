//! Stager configuration.
//!
//! Settings are layered: `stager.toml` → environment (`STAGER_*`, including
//! a `.env` file) → command-line flags. The resolved [`StagerConfig`] is an
//! explicit value handed to the components that need it; nothing reads
//! configuration from global state.
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0"
//! port = 8080
//! advertise_address = "stager.internal"
//! stager_id = "stager-0"
//!
//! [staging]
//! image = "registry.example.com/buildpack-stager:latest"
//! custom_command = "/lifecycle/builder --verbose"
//! app_lifecycle_url = "http://file-server/buildpack_app_lifecycle.tgz"
//! namespace_prefix = "ns-"
//! default_tenant = "furnace-staging"
//! stop_grace_period_secs = 60
//!
//! [orchestrator]
//! backend = "kubernetes"
//! endpoint = "https://kubernetes.default.svc"
//! token_file = "/var/run/secrets/kubernetes.io/serviceaccount/token"
//!
//! [control_plane]
//! base_url = "https://cloud-controller.internal"
//! username = "internal_user"
//! password = "internal_password"
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::control_plane::ControlPlaneSettings;
use crate::orchestrator::kubernetes::KubernetesSettings;

/// Which orchestrator implementation to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestratorBackend {
    #[default]
    Kubernetes,
    /// Keep namespaces and tasks in memory; tasks never run
    Memory,
}

impl std::str::FromStr for OrchestratorBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kubernetes" => Ok(OrchestratorBackend::Kubernetes),
            "memory" => Ok(OrchestratorBackend::Memory),
            _ => anyhow::bail!(
                "Invalid orchestrator backend '{}'. Valid values: kubernetes, memory",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: text, json", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Host name tasks use to reach this stager
    #[serde(default)]
    pub advertise_address: Option<String>,
    #[serde(default = "default_stager_id")]
    pub stager_id: String,
}

fn default_listen() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_stager_id() -> String {
    "stager-0".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
            advertise_address: None,
            stager_id: default_stager_id(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingSection {
    #[serde(default = "default_image")]
    pub image: String,
    /// Whitespace-separated command overriding the image entrypoint
    #[serde(default)]
    pub custom_command: Option<String>,
    #[serde(default)]
    pub app_lifecycle_url: String,
    #[serde(default)]
    pub skip_cert_verify: bool,
    #[serde(default = "default_namespace_prefix")]
    pub namespace_prefix: String,
    /// Tenant used when a request does not name one
    #[serde(default = "default_tenant")]
    pub default_tenant: String,
    #[serde(default = "default_stop_grace_period_secs")]
    pub stop_grace_period_secs: u64,
    #[serde(default = "default_docker_completion_delay_ms")]
    pub docker_completion_delay_ms: u64,
}

fn default_image() -> String {
    "cfstager/buildpack-stager:latest".to_string()
}

fn default_namespace_prefix() -> String {
    "ns-".to_string()
}

fn default_tenant() -> String {
    "furnace-staging".to_string()
}

fn default_stop_grace_period_secs() -> u64 {
    60
}

fn default_docker_completion_delay_ms() -> u64 {
    2000
}

impl Default for StagingSection {
    fn default() -> Self {
        Self {
            image: default_image(),
            custom_command: None,
            app_lifecycle_url: String::new(),
            skip_cert_verify: false,
            namespace_prefix: default_namespace_prefix(),
            default_tenant: default_tenant(),
            stop_grace_period_secs: default_stop_grace_period_secs(),
            docker_completion_delay_ms: default_docker_completion_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default)]
    pub backend: OrchestratorBackend,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    #[serde(default)]
    pub ca_cert_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlPlaneSection {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Command-line and environment overrides applied on top of the file.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct ConfigOverrides {
    /// Address to listen on
    #[arg(long, global = true, env = "STAGER_LISTEN")]
    pub listen: Option<String>,

    /// Port to listen on
    #[arg(long, global = true, env = "STAGER_PORT")]
    pub port: Option<u16>,

    /// Address of this stager as used by staging tasks
    #[arg(long, global = true, env = "STAGER_ADVERTISE_ADDRESS")]
    pub advertise_address: Option<String>,

    /// Identifier of this stager instance
    #[arg(long = "id", global = true, env = "STAGER_ID")]
    pub stager_id: Option<String>,

    /// Image used for buildpack staging tasks
    #[arg(long, global = true, env = "STAGER_STAGING_IMAGE")]
    pub staging_image: Option<String>,

    /// Custom entrypoint for the staging image
    #[arg(long, global = true, env = "STAGER_CUSTOM_IMAGE_COMMAND")]
    pub custom_image_command: Option<String>,

    /// Application lifecycle bundle URL
    #[arg(long, global = true, env = "STAGER_APP_LIFECYCLE_URL")]
    pub app_lifecycle_url: Option<String>,

    /// Skip certificate validation when staging
    #[arg(long, global = true, env = "STAGER_SKIP_CERT_VERIFY")]
    pub skip_cert_verify: Option<bool>,

    /// Orchestrator backend: kubernetes, memory
    #[arg(long, global = true, env = "STAGER_BACKEND")]
    pub backend: Option<OrchestratorBackend>,

    /// Kubernetes API endpoint
    #[arg(long, global = true, env = "STAGER_K8S_ENDPOINT")]
    pub k8s_endpoint: Option<String>,

    /// Control plane internal API base URL
    #[arg(long, global = true, env = "STAGER_CC_BASE_URL")]
    pub cc_base_url: Option<String>,

    /// Control plane internal API username
    #[arg(long, global = true, env = "STAGER_CC_USERNAME")]
    pub cc_username: Option<String>,

    /// Control plane internal API password
    #[arg(long, global = true, env = "STAGER_CC_PASSWORD", hide_env_values = true)]
    pub cc_password: Option<String>,

    /// Grace period in seconds when stopping staging tasks
    #[arg(long, global = true, env = "STAGER_STOP_GRACE_PERIOD")]
    pub stop_grace_period: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "STAGER_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log format: text, json
    #[arg(long, global = true, env = "STAGER_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,
}

/// Fully resolved stager configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub staging: StagingSection,
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub control_plane: ControlPlaneSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl StagerConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse stager.toml")
    }

    /// Load from `path` if given, otherwise from `./stager.toml` when present.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default_path = Path::new("stager.toml");
                if default_path.exists() {
                    Self::load(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Apply environment/CLI overrides. Unset overrides keep file values.
    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }
        fn set_opt<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                *target = value.clone();
            }
        }

        set(&mut self.server.listen, &overrides.listen);
        set(&mut self.server.port, &overrides.port);
        set_opt(&mut self.server.advertise_address, &overrides.advertise_address);
        set(&mut self.server.stager_id, &overrides.stager_id);
        set(&mut self.staging.image, &overrides.staging_image);
        set_opt(&mut self.staging.custom_command, &overrides.custom_image_command);
        set(&mut self.staging.app_lifecycle_url, &overrides.app_lifecycle_url);
        set(&mut self.staging.skip_cert_verify, &overrides.skip_cert_verify);
        set(&mut self.staging.stop_grace_period_secs, &overrides.stop_grace_period);
        set(&mut self.orchestrator.backend, &overrides.backend);
        set_opt(&mut self.orchestrator.endpoint, &overrides.k8s_endpoint);
        set_opt(&mut self.control_plane.base_url, &overrides.cc_base_url);
        set_opt(&mut self.control_plane.username, &overrides.cc_username);
        set_opt(&mut self.control_plane.password, &overrides.cc_password);
        set(&mut self.logging.level, &overrides.log_level);
        set(&mut self.logging.format, &overrides.log_format);
    }

    /// Problems that prevent the stager from serving requests.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.staging.image.trim().is_empty() {
            problems.push("staging.image must not be empty".to_string());
        }
        if self.advertise_address().is_none() {
            problems.push(
                "server.advertise_address is required when listening on all interfaces"
                    .to_string(),
            );
        }
        if self.control_plane.base_url.is_none() {
            problems.push("control_plane.base_url is required".to_string());
        }
        if self.orchestrator.backend == OrchestratorBackend::Kubernetes
            && self.orchestrator.endpoint.is_none()
        {
            problems.push(
                "orchestrator.endpoint is required for the kubernetes backend".to_string(),
            );
        }
        if let Err(e) = stager_common::validate_tenant_id(&self.staging.default_tenant) {
            problems.push(format!("staging.default_tenant: {}", e));
        }

        problems
    }

    /// Address staging tasks use for their completion callback.
    ///
    /// Falls back to the listen address unless that is the wildcard.
    pub fn advertise_address(&self) -> Option<String> {
        match &self.server.advertise_address {
            Some(addr) if !addr.is_empty() => Some(addr.clone()),
            _ if self.server.listen != "0.0.0.0" && !self.server.listen.is_empty() => {
                Some(self.server.listen.clone())
            }
            _ => None,
        }
    }

    pub fn stop_grace_period(&self) -> Duration {
        Duration::from_secs(self.staging.stop_grace_period_secs)
    }

    pub fn docker_completion_delay(&self) -> Duration {
        Duration::from_millis(self.staging.docker_completion_delay_ms)
    }

    /// Kubernetes connection settings, reading token and CA files.
    pub fn kubernetes_settings(&self) -> Result<KubernetesSettings> {
        let section = &self.orchestrator;
        let endpoint = section
            .endpoint
            .clone()
            .context("orchestrator.endpoint is not configured")?;

        let token = match (&section.token, &section.token_file) {
            (Some(token), _) => Some(token.clone()),
            (None, Some(path)) => Some(
                std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read token file: {}", path.display()))?
                    .trim()
                    .to_string(),
            ),
            (None, None) => None,
        };

        let ca_cert_pem = section
            .ca_cert_file
            .as_ref()
            .map(|path| {
                std::fs::read(path)
                    .with_context(|| format!("Failed to read CA certificate: {}", path.display()))
            })
            .transpose()?;

        Ok(KubernetesSettings {
            endpoint,
            token,
            ca_cert_pem,
            skip_cert_verify: self.staging.skip_cert_verify,
        })
    }

    pub fn control_plane_settings(&self) -> Result<ControlPlaneSettings> {
        let base_url = self
            .control_plane
            .base_url
            .clone()
            .context("control_plane.base_url is not configured")?;

        Ok(ControlPlaneSettings {
            base_url,
            username: self.control_plane.username.clone(),
            password: self.control_plane.password.clone(),
            skip_cert_verify: self.staging.skip_cert_verify,
        })
    }

    /// Serialize for display, masking secrets.
    pub fn to_redacted_toml(&self) -> Result<String> {
        let mut shown = self.clone();
        if shown.control_plane.password.is_some() {
            shown.control_plane.password = Some("********".to_string());
        }
        if shown.orchestrator.token.is_some() {
            shown.orchestrator.token = Some("********".to_string());
        }
        toml::to_string_pretty(&shown).context("Failed to serialize configuration")
    }
}
