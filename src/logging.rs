//! Logging initialization and span helpers.
//!
//! `RUST_LOG` takes precedence over the configured level so operators can
//! turn up a single module without editing `stager.toml`.

use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogFormat;

static INIT: Once = Once::new();

/// Build the filter: `RUST_LOG` if set and valid, else `level`.
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Logs go to stderr.
///
/// Safe to call more than once; only the first call has an effect.
pub fn init_logging(level: &str, format: LogFormat) {
    INIT.call_once(|| {
        let filter = env_filter(level);
        let registry = tracing_subscriber::registry().with(filter);

        match format {
            LogFormat::Json => registry
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init(),
            LogFormat::Text => registry
                .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
                .init(),
        }
    });
}

/// Span covering one staging operation.
#[must_use]
pub fn staging_span(operation: &str, staging_id: &str, tenant: &str) -> Span {
    tracing::info_span!(
        "staging",
        op = operation,
        staging_id = staging_id,
        tenant = tenant,
    )
}
