//! Staging orchestration core.
//!
//! | Module       | Role                                                        |
//! |--------------|-------------------------------------------------------------|
//! | `translator` | Staging request → task specification (or docker short-circuit) |
//! | `namespace`  | Idempotent per-tenant namespace creation                    |
//! | `controller` | Create, look up and delete the task for one staging attempt |
//! | `reporter`   | Notify the control plane once, then tear the task down      |
//! | `facade`     | `start_staging`, `stop_staging`, `report_completion`        |
//!
//! No module here holds orchestrator state. Everything observable is
//! re-read from the orchestrator on demand.

pub mod controller;
pub mod facade;
pub mod namespace;
pub mod reporter;
pub mod translator;

pub use controller::TaskLifecycleController;
pub use facade::StagingOrchestrator;
pub use namespace::NamespaceManager;
pub use reporter::CompletionReporter;
pub use translator::{Plan, Translator, TranslatorConfig};
