// packages/injector/src/interception/mod.rs
//! Proxy interception layer
//!
//! Routes every outbound HTTP call of the process through one SOCKS5 proxy
//! without changes to application code:
//!
//! - **Interceptor**: builds the proxy transport and patches the runtime once
//! - **Library Shims**: wrappers installed over request/get and fetch
//! - **Record**: per-entry-point outcome of an activation
//!
//! # Architecture
//!
//! ```text
//! Application Code (Unmodified)
//!     │
//!     ├─ Default transports  → replaced by ProxyTransport
//!     ├─ request / get       → ProxyInjectingRequest → previous handler
//!     └─ fetch               → TransportForcingFetch → provider or global fetch
//! ```

pub mod interceptor;
pub mod library_shims;
pub mod record;

// Re-export commonly used types
pub use interceptor::Interceptor;
pub use library_shims::{FetchSource, ProxyInjectingRequest, TransportForcingFetch};
pub use record::{ActivationResult, LayerStatus, PatchRecord, PatchState};
