//! Subscriber setup for binaries and tests that want engine logs on stderr.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::EngineError;

/// Install a global fmt subscriber. `RUST_LOG` wins over `default_filter`.
///
/// Returns `Ok(false)` when a global subscriber is already set, so every
/// `Engine::open` can call this. A malformed `default_filter` is always an
/// error.
pub fn init_logging(default_filter: &str) -> Result<bool, EngineError> {
    let fallback = EnvFilter::try_new(default_filter).map_err(|e| {
        EngineError::Config(format!("invalid log filter {default_filter:?}: {e}"))
    })?;
    let filter = EnvFilter::try_from_default_env().unwrap_or(fallback);

    Ok(tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .try_init()
        .is_ok())
}
