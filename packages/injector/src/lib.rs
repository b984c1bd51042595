// packages/injector/src/lib.rs
//! SOCKS Injector Library
//!
//! Routes all outbound HTTP(S) traffic of a process through a SOCKS5 proxy,
//! configured purely through environment variables.
//!
//! # Architecture
//!
//! The library is structured into several key modules:
//!
//! - **runtime**: the process's network entry points and default transports
//! - **transport**: direct and SOCKS5 connection establishment, TLS
//! - **interception**: proxy activation and the shims it installs
//! - **observability**: logging setup
//! - **cli**: the `socksctl` helper
//! - **utils**: configuration and errors
//!
//! # Usage
//!
//! ```no_run
//! #[tokio::main]
//! async fn main() {
//!     socks_injector::bootstrap();
//!
//!     let response = socks_injector::runtime()
//!         .https()
//!         .get("https://api.ipify.org/?format=json")
//!         .await;
//!     # let _ = response;
//! }
//! ```

// Public module exports
pub mod cli;
pub mod interception;
pub mod observability;
pub mod runtime;
pub mod transport;
pub mod utils;

// Re-export commonly used types
pub use interception::{ActivationResult, Interceptor, LayerStatus, PatchRecord, PatchState};
pub use runtime::{EntryPoint, FetchInit, NetRuntime, Protocol, RequestOptions, Response};
pub use transport::{ProxyEndpoint, ProxyTransport, Transport};
pub use utils::config::ProxyConfig;
pub use utils::errors::{ConfigurationError, DelegationError, PatchFailure, Result};

use once_cell::sync::Lazy;
use std::sync::Arc;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

static RUNTIME: Lazy<Arc<NetRuntime>> = Lazy::new(|| Arc::new(NetRuntime::new()));

static INTERCEPTOR: Lazy<Interceptor> = Lazy::new(|| Interceptor::new(Arc::clone(&RUNTIME)));

/// The process-wide network runtime
pub fn runtime() -> &'static NetRuntime {
    &RUNTIME
}

/// The interceptor bound to [`runtime()`]
pub fn interceptor() -> &'static Interceptor {
    &INTERCEPTOR
}

/// Activate the proxy layer on the process-wide runtime.
/// Only the first call has an effect.
pub fn activate(config: &ProxyConfig) -> ActivationResult {
    INTERCEPTOR.activate(config)
}

/// Startup hook: activate from the environment when the launch options ask
/// for the preload directive. Returns `None` when they do not.
pub fn bootstrap() -> Option<ActivationResult> {
    let config = ProxyConfig::resolve();

    if !config.preload_requested() {
        return None;
    }

    if config.debug_log_enabled {
        observability::init_debug_logging();
    }

    Some(activate(&config))
}
