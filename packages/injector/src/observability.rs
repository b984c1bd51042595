// packages/injector/src/observability.rs
//! Logging setup
//!
//! Activation diagnostics go to the [`DEBUG_TARGET`] target and are only
//! emitted when debug logging is enabled in the configuration. Configuration
//! errors are logged at `error` regardless.

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

/// Target of the debug-gated activation log lines
pub const DEBUG_TARGET: &str = "socks_injector::debug";

static SUBSCRIBER: OnceCell<bool> = OnceCell::new();

/// Install the global subscriber for the `socksctl` binary.
///
/// `RUST_LOG` wins when set; otherwise `info`, with the activation lines
/// visible.
pub fn init_tracing() -> anyhow::Result<()> {
    install(|| format!("info,{}=info", DEBUG_TARGET));
    Ok(())
}

/// Install a subscriber that surfaces the activation lines of a host program
/// while keeping everything else at `warn`. Does nothing when the host
/// already installed a subscriber.
pub fn init_debug_logging() -> bool {
    install(|| format!("warn,{}=info", DEBUG_TARGET))
}

fn install(default_filter: impl FnOnce() -> String) -> bool {
    *SUBSCRIBER.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter()));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .compact()
            .try_init()
            .is_ok()
    })
}
