//! Shared domain types for the staging bridge.
//!
//! - `ids`: deterministic namespace/task naming and staging-guid parsing
//! - `lifecycle`: staging requests and the buildpack/docker lifecycle union
//! - `task`: task specifications and observed task records
//! - `outcome`: completion outcomes forwarded to the control plane

pub mod ids;
pub mod lifecycle;
pub mod outcome;
pub mod task;

pub use ids::{NamingError, StagingGuid, namespace_name, task_name, validate_tenant_id};
pub use lifecycle::{
    Buildpack, BuildpackLifecycle, DockerLifecycle, EnvironmentVariable, Lifecycle,
    LifecycleError, LifecycleKind, StagingRequest,
};
pub use outcome::CompletionOutcome;
pub use task::{STAGING_RUN_AS_USER, TaskPhase, TaskRecord, TaskSpecification};
