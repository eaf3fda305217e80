use tracing_subscriber::{EnvFilter, fmt};

/// Default directives when `RUST_LOG` is unset. sqlx logs every statement at
/// `info`, which drowns out request logs.
const DEFAULT_DIRECTIVES: &str = "info,sqlx=warn";

/// Install the global tracing subscriber.
///
/// A second call (e.g. from several tests in one binary) is a no-op.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
