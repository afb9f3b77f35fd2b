use tracing_subscriber::{fmt, EnvFilter};

/// Initialize human-readable logging.
///
/// `RUST_LOG` wins when set; `default_level` (e.g. "info",
/// "hm_daemon=debug,warn") applies otherwise. Safe to call more than
/// once; later calls are no-ops.
pub fn init_logging(service_name: &str, default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .try_init()
        .ok();

    tracing::info!(service = service_name, "logging initialised");
}

/// Initialize JSON logging for shipping to a log pipeline.
///
/// Same filter rules as [`init_logging`]; safe to call more than once.
pub fn init_logging_json(service_name: &str, default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .json()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .try_init()
        .ok();

    tracing::info!(service = service_name, "logging initialised (json)");
}
