//! Logging and observability
//!
//! Structured logging setup shared by the CLI binary and tests.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the logging system.
///
/// Respects `CLAWKER_LOG` first, then `RUST_LOG`, defaulting to `info`.
/// All log output goes to stderr so stdout stays machine-parseable.
pub fn init() -> anyhow::Result<()> {
    let filter = std::env::var("CLAWKER_LOG")
        .ok()
        .and_then(|spec| spec.parse::<EnvFilter>().ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    tracing::debug!("Logging initialized");
    Ok(())
}
