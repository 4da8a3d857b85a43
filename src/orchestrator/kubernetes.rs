//! Kubernetes backend: namespaces and `batch/v1` Jobs over the REST API.
//!
//! Each staging task is a Job with `backoffLimit: 0` and a single container
//! whose pod uses `restartPolicy: Never`, so a failed attempt is reported
//! rather than retried by the cluster.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};
use stager_common::{TaskPhase, TaskRecord, TaskSpecification};
use tracing::debug;

use super::{NamespaceSpec, Orchestrator, OrchestratorError};

/// Maximum length of a Kubernetes label value.
const MAX_LABEL_VALUE_LEN: usize = 63;

/// Connection settings for the Kubernetes API.
#[derive(Debug, Clone, Default)]
pub struct KubernetesSettings {
    pub endpoint: String,
    pub token: Option<String>,
    pub ca_cert_pem: Option<Vec<u8>>,
    pub skip_cert_verify: bool,
}

/// [`Orchestrator`] backed by a Kubernetes API server.
pub struct KubernetesOrchestrator {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl KubernetesOrchestrator {
    pub fn new(settings: &KubernetesSettings) -> Result<Self> {
        let mut builder =
            reqwest::Client::builder().danger_accept_invalid_certs(settings.skip_cert_verify);

        if let Some(pem) = &settings.ca_cert_pem {
            let cert = reqwest::Certificate::from_pem(pem)
                .context("Failed to parse Kubernetes CA certificate")?;
            builder = builder.add_root_certificate(cert);
        }

        let client = builder
            .build()
            .context("Failed to build Kubernetes HTTP client")?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
        })
    }

    /// Query `/version` to confirm the API server is reachable.
    pub async fn server_version(&self) -> Result<String> {
        let resp = self
            .request(Method::GET, "/version")
            .send()
            .await
            .with_context(|| format!("Failed to connect to Kubernetes API {}", self.endpoint))?
            .error_for_status()
            .context("Kubernetes API version endpoint returned error status")?;

        let body: Value = resp
            .json()
            .await
            .context("Failed to parse Kubernetes version response")?;
        Ok(body
            .get("gitVersion")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string())
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.endpoint, path);
        let builder = self
            .client
            .request(method, url)
            .header("Accept", "application/json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        kind: &'static str,
        name: &str,
    ) -> Result<Value, OrchestratorError> {
        let resp = builder
            .send()
            .await
            .with_context(|| format!("Kubernetes request for {} {} failed", kind, name))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .with_context(|| format!("Failed to read Kubernetes response for {} {}", kind, name))?;
        debug!(kind, name, status = status.as_u16(), "kubernetes response");

        classify_response(status, &body, kind, name)
    }
}

/// Map an API response to a value or a classified error.
fn classify_response(
    status: StatusCode,
    body: &str,
    kind: &'static str,
    name: &str,
) -> Result<Value, OrchestratorError> {
    if status.is_success() {
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        return serde_json::from_str(body)
            .with_context(|| format!("Failed to parse Kubernetes response for {} {}", kind, name))
            .map_err(OrchestratorError::Transport);
    }

    match status {
        StatusCode::NOT_FOUND => Err(OrchestratorError::NotFound {
            kind,
            name: name.to_string(),
        }),
        StatusCode::CONFLICT => Err(OrchestratorError::AlreadyExists {
            kind,
            name: name.to_string(),
        }),
        _ => {
            // Kubernetes wraps errors in a Status object with a message field
            let message = serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
                .unwrap_or_else(|| body.to_string());
            Err(OrchestratorError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

fn is_valid_label_value(value: &str) -> bool {
    value.len() <= MAX_LABEL_VALUE_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && value
            .chars()
            .next()
            .is_none_or(|c| c.is_ascii_alphanumeric())
        && value
            .chars()
            .last()
            .is_none_or(|c| c.is_ascii_alphanumeric())
}

/// Split labels into valid Kubernetes labels and annotations.
///
/// Every entry is kept as an annotation; entries whose value is not a valid
/// label value (long staging ids, for example) are dropped from the labels.
fn split_labels(labels: &BTreeMap<String, String>) -> (Value, Value) {
    let valid: BTreeMap<&String, &String> = labels
        .iter()
        .filter(|(_, v)| is_valid_label_value(v))
        .collect();
    (json!(valid), json!(labels))
}

pub(crate) fn namespace_manifest(namespace: &NamespaceSpec) -> Value {
    let (labels, annotations) = split_labels(&namespace.labels);
    json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": namespace.name,
            "labels": labels,
            "annotations": annotations,
        }
    })
}

pub(crate) fn job_manifest(spec: &TaskSpecification) -> Value {
    let (labels, annotations) = split_labels(&spec.labels);
    let env: Vec<Value> = spec
        .environment
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();

    let mut container = json!({
        "name": spec.name,
        "image": spec.image,
        "env": env,
    });
    if let Some(command) = &spec.command {
        container["command"] = json!(command);
    }

    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": spec.name,
            "namespace": spec.namespace,
            "labels": labels,
            "annotations": annotations,
        },
        "spec": {
            "backoffLimit": 0,
            "template": {
                "metadata": {
                    "name": spec.name,
                    "namespace": spec.namespace,
                    "labels": labels,
                },
                "spec": {
                    "restartPolicy": "Never",
                    "securityContext": {
                        "runAsUser": spec.run_as_user,
                        "runAsNonRoot": true,
                    },
                    "containers": [container],
                }
            }
        }
    })
}

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(|v| v.as_object())
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Derive a [`TaskRecord`] from a Job object.
pub(crate) fn parse_job(job: &Value) -> Result<TaskRecord> {
    let metadata = job.get("metadata").context("Job has no metadata")?;
    let name = metadata
        .get("name")
        .and_then(|v| v.as_str())
        .context("Job metadata has no name")?
        .to_string();
    let namespace = metadata
        .get("namespace")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    // Annotations hold every label, including values too long for a label
    let mut labels = string_map(metadata.get("annotations"));
    labels.extend(string_map(metadata.get("labels")));

    let created_at = metadata
        .get("creationTimestamp")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let count = |field: &str| {
        job.get("status")
            .and_then(|s| s.get(field))
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
    };
    let phase = if count("succeeded") > 0 {
        TaskPhase::Succeeded
    } else if count("failed") > 0 {
        TaskPhase::Failed
    } else if count("active") > 0 {
        TaskPhase::Running
    } else {
        TaskPhase::Pending
    };

    Ok(TaskRecord {
        name,
        namespace,
        phase,
        labels,
        created_at,
    })
}

#[async_trait]
impl Orchestrator for KubernetesOrchestrator {
    async fn create_namespace(&self, namespace: &NamespaceSpec) -> Result<(), OrchestratorError> {
        let builder = self
            .request(Method::POST, "/api/v1/namespaces")
            .json(&namespace_manifest(namespace));
        self.send(builder, "namespace", &namespace.name).await?;
        Ok(())
    }

    async fn get_namespace(&self, name: &str) -> Result<NamespaceSpec, OrchestratorError> {
        let builder = self.request(Method::GET, &format!("/api/v1/namespaces/{}", name));
        let body = self.send(builder, "namespace", name).await?;
        Ok(NamespaceSpec {
            name: name.to_string(),
            labels: string_map(body.get("metadata").and_then(|m| m.get("labels"))),
        })
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), OrchestratorError> {
        let builder = self.request(Method::DELETE, &format!("/api/v1/namespaces/{}", name));
        self.send(builder, "namespace", name).await?;
        Ok(())
    }

    async fn create_task(&self, spec: &TaskSpecification) -> Result<(), OrchestratorError> {
        let builder = self
            .request(
                Method::POST,
                &format!("/apis/batch/v1/namespaces/{}/jobs", spec.namespace),
            )
            .json(&job_manifest(spec));
        self.send(builder, "task", &spec.name).await?;
        Ok(())
    }

    async fn get_task(&self, namespace: &str, name: &str) -> Result<TaskRecord, OrchestratorError> {
        let builder = self.request(
            Method::GET,
            &format!("/apis/batch/v1/namespaces/{}/jobs/{}", namespace, name),
        );
        let body = self.send(builder, "task", name).await?;
        parse_job(&body).map_err(OrchestratorError::Transport)
    }

    async fn delete_task(
        &self,
        namespace: &str,
        name: &str,
        grace_period: Duration,
    ) -> Result<(), OrchestratorError> {
        // Background propagation removes the job's pods along with it
        let options = json!({
            "apiVersion": "v1",
            "kind": "DeleteOptions",
            "gracePeriodSeconds": grace_period.as_secs(),
            "propagationPolicy": "Background",
        });
        let builder = self
            .request(
                Method::DELETE,
                &format!("/apis/batch/v1/namespaces/{}/jobs/{}", namespace, name),
            )
            .json(&options);
        self.send(builder, "task", name).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::Path,
        http::StatusCode as AxumStatus,
        routing::{get, post},
    };
    use stager_common::task::labels;
    use tokio::net::TcpListener;

    fn spec() -> TaskSpecification {
        let mut environment = BTreeMap::new();
        environment.insert("CF_STACK".to_string(), "cflinuxfs3".to_string());
        let mut task_labels = BTreeMap::new();
        task_labels.insert(labels::TENANT.to_string(), "tenantA".to_string());
        task_labels.insert(labels::STAGING_ID.to_string(), "x".repeat(70));
        TaskSpecification {
            namespace: "ns-tenantA".to_string(),
            name: "task-abc".to_string(),
            image: "stager:latest".to_string(),
            command: Some(vec!["/bin/stage".to_string(), "--fast".to_string()]),
            environment,
            labels: task_labels,
            run_as_user: 2000,
        }
    }

    #[test]
    fn test_job_manifest_is_single_shot_and_non_root() {
        let manifest = job_manifest(&spec());
        assert_eq!(manifest["kind"], "Job");
        assert_eq!(manifest["spec"]["backoffLimit"], 0);
        let pod = &manifest["spec"]["template"]["spec"];
        assert_eq!(pod["restartPolicy"], "Never");
        assert_eq!(pod["securityContext"]["runAsUser"], 2000);
        assert_eq!(pod["securityContext"]["runAsNonRoot"], true);

        let container = &pod["containers"][0];
        assert_eq!(container["image"], "stager:latest");
        assert_eq!(container["command"][0], "/bin/stage");
        assert_eq!(container["env"][0]["name"], "CF_STACK");
        assert_eq!(container["env"][0]["value"], "cflinuxfs3");
    }

    #[test]
    fn test_job_manifest_omits_command_when_unset() {
        let mut spec = spec();
        spec.command = None;
        let manifest = job_manifest(&spec);
        assert!(manifest["spec"]["template"]["spec"]["containers"][0]
            .get("command")
            .is_none());
    }

    #[test]
    fn test_long_label_values_move_to_annotations() {
        let manifest = job_manifest(&spec());
        let metadata = &manifest["metadata"];
        assert_eq!(metadata["labels"][labels::TENANT], "tenantA");
        assert!(metadata["labels"].get(labels::STAGING_ID).is_none());
        assert_eq!(metadata["annotations"][labels::STAGING_ID], "x".repeat(70));
    }

    #[test]
    fn test_label_value_rules() {
        assert!(is_valid_label_value(""));
        assert!(is_valid_label_value("stg-1"));
        assert!(!is_valid_label_value("-leading"));
        assert!(!is_valid_label_value("has/slash"));
        assert!(!is_valid_label_value(&"a".repeat(64)));
    }

    #[test]
    fn test_parse_job_phases() {
        let cases = [
            (json!({"succeeded": 1}), TaskPhase::Succeeded),
            (json!({"failed": 1}), TaskPhase::Failed),
            (json!({"active": 1}), TaskPhase::Running),
            (json!({}), TaskPhase::Pending),
        ];
        for (status, expected) in cases {
            let job = json!({
                "metadata": {
                    "name": "task-abc",
                    "namespace": "ns-a",
                    "creationTimestamp": "2024-01-01T12:00:00Z",
                    "labels": {"cf-space": "a"},
                    "annotations": {"staging-id": "stg-1", "cf-space": "a"}
                },
                "status": status,
            });
            let record = parse_job(&job).unwrap();
            assert_eq!(record.phase, expected);
            assert_eq!(record.staging_id(), Some("stg-1"));
            assert!(record.created_at.is_some());
        }
    }

    #[test]
    fn test_classify_response() {
        assert!(
            classify_response(StatusCode::NOT_FOUND, "{}", "task", "t")
                .unwrap_err()
                .is_not_found()
        );
        assert!(
            classify_response(StatusCode::CONFLICT, "{}", "task", "t")
                .unwrap_err()
                .is_already_exists()
        );
        match classify_response(
            StatusCode::FORBIDDEN,
            r#"{"kind":"Status","message":"jobs is forbidden"}"#,
            "task",
            "t",
        ) {
            Err(OrchestratorError::Api { status, message }) => {
                assert_eq!(status, 403);
                assert_eq!(message, "jobs is forbidden");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
        assert_eq!(
            classify_response(StatusCode::OK, "", "task", "t").unwrap(),
            Value::Null
        );
    }

    /// Start a fake API server; returns None when sockets are unavailable.
    async fn fake_api(router: Router) -> Option<String> {
        let listener = match TcpListener::bind("127.0.0.1:0").await {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Skipping fake Kubernetes API test (sandbox): {:?}", e);
                return None;
            }
        };
        let addr = listener.local_addr().ok()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Some(format!("http://{}", addr))
    }

    #[tokio::test]
    async fn test_round_trip_against_fake_api() {
        let router = Router::new()
            .route("/version", get(|| async { Json(json!({"gitVersion": "v1.29.0"})) }))
            .route(
                "/api/v1/namespaces",
                post(|| async { (AxumStatus::CONFLICT, Json(json!({"message": "exists"}))) }),
            )
            .route(
                "/api/v1/namespaces/{name}",
                get(|Path(name): Path<String>| async move {
                    if name == "ns-a" {
                        (AxumStatus::OK, Json(json!({"metadata": {"name": name, "labels": {"stager-id": "s0"}}})))
                    } else {
                        (AxumStatus::NOT_FOUND, Json(json!({"message": "not found"})))
                    }
                }),
            )
            .route(
                "/apis/batch/v1/namespaces/{ns}/jobs/{name}",
                get(|Path((ns, name)): Path<(String, String)>| async move {
                    Json(json!({
                        "metadata": {"name": name, "namespace": ns},
                        "status": {"active": 1}
                    }))
                }),
            );

        let Some(endpoint) = fake_api(router).await else {
            return;
        };
        let orch = KubernetesOrchestrator::new(&KubernetesSettings {
            endpoint,
            token: Some("secret".to_string()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(orch.server_version().await.unwrap(), "v1.29.0");

        let ns = orch.get_namespace("ns-a").await.unwrap();
        assert_eq!(ns.labels.get("stager-id").map(String::as_str), Some("s0"));
        assert!(orch.get_namespace("ns-b").await.unwrap_err().is_not_found());

        let err = orch
            .create_namespace(&NamespaceSpec {
                name: "ns-a".to_string(),
                labels: BTreeMap::new(),
            })
            .await
            .unwrap_err();
        assert!(err.is_already_exists());

        let record = orch.get_task("ns-a", "task-abc").await.unwrap();
        assert_eq!(record.phase, TaskPhase::Running);
        assert_eq!(record.namespace, "ns-a");
    }

    #[tokio::test]
    async fn test_unreachable_api_is_transport_error() {
        let orch = KubernetesOrchestrator::new(&KubernetesSettings {
            endpoint: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        })
        .unwrap();
        let err = orch.get_namespace("ns-a").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Transport(_)));
    }
}
