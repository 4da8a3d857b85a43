pub mod api;
pub mod config;
pub mod control_plane;
pub mod errors;
pub mod logging;
pub mod orchestrator;
pub mod server;
pub mod staging;
