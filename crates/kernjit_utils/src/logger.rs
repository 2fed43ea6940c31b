use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "KERNJIT_LOG";

const DEFAULT_DIRECTIVE: &str = "warn";

static INIT: Once = Once::new();

/// Installs the global fmt subscriber.
///
/// The filter comes from `KERNJIT_LOG`, then `RUST_LOG`, then defaults to
/// `warn`. Calling this more than once is harmless; only the first call
/// installs a subscriber, and an already-installed foreign subscriber is left
/// in place.
pub fn init_logging() {
    let directive = std::env::var(LOG_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| DEFAULT_DIRECTIVE.to_string());
    init_logging_with(&directive);
}

/// Installs the global fmt subscriber with an explicit filter directive.
pub fn init_logging_with(directive: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_new(directive)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .with_target(true)
            .try_init();
    });
}
