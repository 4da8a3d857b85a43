//! Completion outcomes reported back to the control plane.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Result of one staging attempt.
///
/// `payload` is produced by the staging task (or synthesized for docker
/// lifecycles) and forwarded to the control plane byte for byte.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionOutcome {
    pub staging_id: String,
    pub tenant_id: String,
    pub succeeded: bool,
    pub payload: Box<RawValue>,
}

impl CompletionOutcome {
    /// Build an outcome from a task-supplied payload, inferring success.
    ///
    /// `"failed": true` or a non-null `"error"` mark a failure. An explicit
    /// `"succeeded"` flag is honoured otherwise. Anything else is a success.
    /// Inference reads a parsed copy; `payload` itself is left untouched.
    pub fn from_payload(
        staging_id: impl Into<String>,
        tenant_id: impl Into<String>,
        payload: Box<RawValue>,
    ) -> Self {
        let parsed: serde_json::Value =
            serde_json::from_str(payload.get()).unwrap_or(serde_json::Value::Null);
        let failed = parsed.get("failed").and_then(|v| v.as_bool()) == Some(true)
            || parsed.get("error").is_some_and(|e| !e.is_null());
        let succeeded = !failed
            && parsed
                .get("succeeded")
                .and_then(|v| v.as_bool())
                .unwrap_or(true);

        Self {
            staging_id: staging_id.into(),
            tenant_id: tenant_id.into(),
            succeeded,
            payload,
        }
    }

    /// Completion for a docker lifecycle: the image is already runnable.
    pub fn docker(
        staging_id: impl Into<String>,
        tenant_id: impl Into<String>,
        docker_image: &str,
    ) -> Result<Self, serde_json::Error> {
        let payload = serde_json::value::to_raw_value(&serde_json::json!({
            "result": {
                "execution_metadata": "{}",
                "process_types": { "web": "start" },
                "lifecycle_type": "docker",
                "lifecycle_metadata": { "docker_image": docker_image },
            }
        }))?;
        Ok(Self {
            staging_id: staging_id.into(),
            tenant_id: tenant_id.into(),
            succeeded: true,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(raw: &str) -> CompletionOutcome {
        CompletionOutcome::from_payload("s", "t", RawValue::from_string(raw.to_string()).unwrap())
    }

    #[test]
    fn test_explicit_success_flag() {
        assert!(outcome(r#"{"succeeded": true}"#).succeeded);
        assert!(!outcome(r#"{"succeeded": false}"#).succeeded);
    }

    #[test]
    fn test_failure_markers() {
        assert!(!outcome(r#"{"failed": true}"#).succeeded);
        assert!(!outcome(r#"{"error": {"id": "StagingError", "message": "boom"}}"#).succeeded);
        assert!(outcome(r#"{"error": null}"#).succeeded);
        assert!(outcome(r#""plain string""#).succeeded);
    }

    #[test]
    fn test_payload_is_kept_verbatim() {
        let raw = r#"{"zeta":1, "alpha":{"big":123456789012345678901234567890}}"#;
        let outcome = outcome(raw);
        assert!(outcome.succeeded);
        assert_eq!(outcome.payload.get(), raw);
    }

    #[test]
    fn test_docker_outcome_carries_image() {
        let outcome = CompletionOutcome::docker("stg-9", "tenantB", "nginx:1.25").unwrap();
        assert!(outcome.succeeded);
        let payload: serde_json::Value = serde_json::from_str(outcome.payload.get()).unwrap();
        assert_eq!(
            payload["result"]["lifecycle_metadata"]["docker_image"],
            "nginx:1.25"
        );
        assert_eq!(payload["result"]["lifecycle_type"], "docker");
        assert_eq!(payload["result"]["process_types"]["web"], "start");
    }
}
