//! Structured-logging setup
//!
//! Honors `LOG_LEVEL` and `LOG_FORMAT` from the configuration. The JSON
//! formatter is used when the migration runs as a cluster job so the step
//! events (`migrationStep`, `migrationStepsTotal`) can be consumed by
//! external tooling.

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, Logging};

/// Initialize the global tracing subscriber.
///
/// The configured level applies to this crate and to `kube`; everything
/// else defaults to `warn` to keep step logs readable.
pub fn init(logging: &Logging) {
    let directives = format!(
        "warn,cloudsql_migrator={level},setup={level},promote={level},finalize={level},rollback={level},kube={level}",
        level = logging.level.to_lowercase()
    );
    let filter =
        EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"));

    match logging.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}
