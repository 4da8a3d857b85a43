//! CLI command implementations.
//!
//! | Module      | Commands handled |
//! |-------------|------------------|
//! | `run`       | `Run`            |
//! | `namespace` | `Namespace`      |
//! | `config`    | `Config`         |

pub mod config;
pub mod namespace;
pub mod run;

pub use config::{cmd_config, load_config};
pub use namespace::cmd_namespace;
pub use run::cmd_run;
