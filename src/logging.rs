use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const DEFAULT_DIRECTIVE: &str = "ans_expenses=info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Initializes console logging (RUST_LOG overrides the default directive).
/// `json` switches the console layer to one JSON object per event.
pub fn init_logging(json: bool) {
    let registry = tracing_subscriber::registry().with(env_filter());

    let result = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };

    // A second init (tests, embedding) keeps the first subscriber
    if result.is_err() {
        tracing::debug!("logging already initialized");
    }
}
