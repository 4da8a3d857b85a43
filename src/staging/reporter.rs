//! Completion reporting.
//!
//! One notification attempt per invocation, then unconditional teardown: a
//! staging task must not outlive its reporting attempt, whatever the control
//! plane answered.

use std::sync::Arc;
use std::time::Duration;

use stager_common::CompletionOutcome;
use tracing::{error, info, warn};

use crate::control_plane::{CallbackError, ControlPlane};
use crate::errors::StagingError;
use crate::staging::controller::TaskLifecycleController;

pub struct CompletionReporter {
    control_plane: Arc<dyn ControlPlane>,
    controller: Arc<TaskLifecycleController>,
    teardown_grace: Duration,
}

impl CompletionReporter {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        controller: Arc<TaskLifecycleController>,
        teardown_grace: Duration,
    ) -> Self {
        Self {
            control_plane,
            controller,
            teardown_grace,
        }
    }

    /// Forward `outcome` to the control plane. No teardown.
    pub async fn report(&self, outcome: &CompletionOutcome) -> Result<(), StagingError> {
        let result = self
            .control_plane
            .staging_complete(&outcome.staging_id, &outcome.payload)
            .await;

        match result {
            Ok(()) => {
                info!(
                    staging_id = %outcome.staging_id,
                    tenant = %outcome.tenant_id,
                    succeeded = outcome.succeeded,
                    "reported staging completion"
                );
                Ok(())
            }
            Err(e) => {
                warn!(staging_id = %outcome.staging_id, error = %e, "completion callback failed");
                Err(classify(&outcome.staging_id, e))
            }
        }
    }

    /// Forward `outcome`, then delete the task regardless of the result.
    ///
    /// A callback failure takes precedence over a teardown failure in the
    /// returned error; the teardown failure is still logged.
    pub async fn report_and_teardown(&self, outcome: &CompletionOutcome) -> Result<(), StagingError> {
        let reported = self.report(outcome).await;

        let teardown = self
            .controller
            .stop(&outcome.tenant_id, &outcome.staging_id, self.teardown_grace)
            .await;
        if let Err(e) = &teardown {
            error!(staging_id = %outcome.staging_id, error = %e, "failed to tear down staging task");
        }

        reported.and(teardown)
    }
}

fn classify(staging_id: &str, err: CallbackError) -> StagingError {
    match err {
        CallbackError::Rejected { status, body } => StagingError::CompletionRejected {
            staging_id: staging_id.to_string(),
            status,
            body,
        },
        CallbackError::Unavailable(message) => StagingError::CompletionUnavailable {
            staging_id: staging_id.to_string(),
            message,
        },
    }
}
