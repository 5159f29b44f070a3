//! Tracing setup for the backup daemon.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber filtered at the configured level.
pub fn init(level: &str) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(filter_for(level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// The level handed in (from the `--log-level` flag or the config file) is
/// authoritative; an ambient `RUST_LOG` does not override what the operator
/// configured. Accepts full filter directives, so per-module levels like
/// `info,simple_backup::storage=debug` work too. An unparseable value falls
/// back to `info`.
fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}
