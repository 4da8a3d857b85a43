//! Translation of staging requests into task specifications.
//!
//! The translator is pure: it never talks to the orchestrator or the control
//! plane. A docker lifecycle produces no task at all, because the image is
//! already runnable; the caller reports a synthesized outcome instead.

use std::collections::BTreeMap;

use anyhow::Context;
use serde::Serialize;
use stager_common::task::labels;
use stager_common::{
    BuildpackLifecycle, CompletionOutcome, Lifecycle, STAGING_RUN_AS_USER, StagingGuid,
    StagingRequest, TaskSpecification, namespace_name, task_name,
};

use crate::config::StagerConfig;
use crate::errors::StagingError;

/// Static inputs to translation, fixed for the lifetime of the server.
#[derive(Debug, Clone)]
pub struct TranslatorConfig {
    pub image: String,
    pub custom_command: Option<String>,
    pub app_lifecycle_url: String,
    pub advertise_address: String,
    pub port: u16,
    pub skip_cert_verify: bool,
    pub stager_id: String,
    pub namespace_prefix: String,
}

impl TranslatorConfig {
    pub fn from_config(config: &StagerConfig) -> anyhow::Result<Self> {
        let advertise_address = config
            .advertise_address()
            .context("server.advertise_address is not configured")?;

        Ok(Self {
            image: config.staging.image.clone(),
            custom_command: config.staging.custom_command.clone(),
            app_lifecycle_url: config.staging.app_lifecycle_url.clone(),
            advertise_address,
            port: config.server.port,
            skip_cert_verify: config.staging.skip_cert_verify,
            stager_id: config.server.stager_id.clone(),
            namespace_prefix: config.staging.namespace_prefix.clone(),
        })
    }
}

/// What to do for a staging request.
#[derive(Debug, Clone)]
pub enum Plan {
    /// Nothing to run; report `outcome` after the completion delay.
    DockerShortCircuit { outcome: CompletionOutcome },
    /// Run this task.
    Task(TaskSpecification),
}

/// Buildpack entry as the staging image expects it in `CF_BUILDPACKS`.
#[derive(Serialize)]
struct BuildpackEnv<'a> {
    id: &'a str,
    url: &'a str,
}

pub struct Translator {
    config: TranslatorConfig,
}

impl Translator {
    pub fn new(config: TranslatorConfig) -> Self {
        Self { config }
    }

    /// Namespace holding `tenant_id`'s staging tasks.
    pub fn namespace_for(&self, tenant_id: &str) -> String {
        namespace_name(&self.config.namespace_prefix, tenant_id)
    }

    /// Callback URL the staging task posts its result to.
    pub fn completion_callback_url(&self, staging_id: &str) -> String {
        format!(
            "http://{}:{}/v1/staging/{}/completed",
            self.config.advertise_address, self.config.port, staging_id
        )
    }

    pub fn translate(&self, request: &StagingRequest) -> Result<Plan, StagingError> {
        // Validates both ids even when no task will be created
        let name = task_name(&request.tenant_id, &request.staging_id)?;

        match &request.lifecycle {
            Lifecycle::Docker(docker) => Ok(Plan::DockerShortCircuit {
                outcome: CompletionOutcome::docker(
                    &request.staging_id,
                    &request.tenant_id,
                    &docker.docker_image,
                )
                .map_err(|e| StagingError::infrastructure("Failed to encode docker completion", e))?,
            }),
            Lifecycle::Buildpack(buildpack) => {
                Ok(Plan::Task(self.buildpack_task(request, buildpack, name)?))
            }
        }
    }

    fn buildpack_task(
        &self,
        request: &StagingRequest,
        lifecycle: &BuildpackLifecycle,
        name: String,
    ) -> Result<TaskSpecification, StagingError> {
        let buildpacks: Vec<BuildpackEnv<'_>> = lifecycle
            .buildpacks
            .iter()
            .map(|bp| BuildpackEnv {
                id: &bp.key,
                url: &bp.url,
            })
            .collect();
        let buildpacks_json = serde_json::to_string(&buildpacks)
            .map_err(|e| StagingError::infrastructure("Failed to serialize buildpacks", e))?;
        let order = lifecycle
            .buildpacks
            .iter()
            .map(|bp| bp.key.as_str())
            .collect::<Vec<_>>()
            .join(",");

        let mut environment = request.environment.clone();
        let injected = [
            ("CF_STACK", lifecycle.stack.clone()),
            ("CF_BUILDPACKS", buildpacks_json),
            ("CF_BUILDPACKS_ORDER", order),
            ("CF_BUILDPACK_APP_LIFECYCLE", self.config.app_lifecycle_url.clone()),
            ("CF_APP_PACKAGE", lifecycle.app_bits_download_uri.clone()),
            ("CF_DROPLET_UPLOAD_LOCATION", lifecycle.droplet_upload_uri.clone()),
            ("CF_SKIP_CERT_VERIFY", self.config.skip_cert_verify.to_string()),
            ("CF_SKIP_DETECT", "false".to_string()),
            (
                "CF_COMPLETION_CALLBACK_URL",
                self.completion_callback_url(&request.staging_id),
            ),
        ];
        for (key, value) in injected {
            environment.insert(key.to_string(), value);
        }
        if let Some(uri) = &lifecycle.build_artifacts_cache_download_uri {
            environment.insert("CF_BUILD_ARTIFACTS_CACHE_DOWNLOAD_URI".to_string(), uri.clone());
        }
        if let Some(uri) = &lifecycle.build_artifacts_cache_upload_uri {
            environment.insert("CF_BUILD_ARTIFACTS_CACHE_UPLOAD_URI".to_string(), uri.clone());
        }

        Ok(TaskSpecification {
            namespace: self.namespace_for(&request.tenant_id),
            name,
            image: self.config.image.clone(),
            command: self.command(),
            environment,
            labels: self.task_labels(request),
            run_as_user: STAGING_RUN_AS_USER,
        })
    }

    fn command(&self) -> Option<Vec<String>> {
        let command: Vec<String> = self
            .config
            .custom_command
            .as_deref()?
            .split_whitespace()
            .map(String::from)
            .collect();
        if command.is_empty() { None } else { Some(command) }
    }

    fn task_labels(&self, request: &StagingRequest) -> BTreeMap<String, String> {
        let mut task_labels = BTreeMap::from([
            (labels::TENANT.to_string(), request.tenant_id.clone()),
            (labels::STAGING_ID.to_string(), request.staging_id.clone()),
            (
                labels::LIFECYCLE.to_string(),
                request.lifecycle.kind().to_string(),
            ),
            (labels::STAGER_ID.to_string(), self.config.stager_id.clone()),
        ]);
        if let Some(guid) = StagingGuid::decompose(&request.staging_id) {
            task_labels.insert(labels::APP_ID.to_string(), guid.app_id);
            task_labels.insert(labels::TASK_ID.to_string(), guid.task_id);
        }
        if let Some(callback) = &request.completion_callback {
            task_labels.insert(labels::COMPLETION_CALLBACK.to_string(), callback.clone());
        }
        task_labels
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> TranslatorConfig {
    TranslatorConfig {
        image: "stager:latest".to_string(),
        custom_command: None,
        app_lifecycle_url: "http://files/lifecycle.tgz".to_string(),
        advertise_address: "stager.internal".to_string(),
        port: 8080,
        skip_cert_verify: false,
        stager_id: "stager-0".to_string(),
        namespace_prefix: "ns-".to_string(),
    }
}
