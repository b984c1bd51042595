// packages/injector/src/utils/errors.rs
//! Error types for the injector
//!
//! Three kinds, matching where a failure can happen:
//!
//! - **ConfigurationError**: the proxy URI cannot be turned into a transport.
//!   Fatal to activation; nothing is patched.
//! - **PatchFailure**: one entry point refused its substitution. Recorded and
//!   isolated from the other entry points.
//! - **DelegationError**: a request failed at call time. Propagated to the
//!   caller exactly as the unpatched entry point would report it.

use crate::runtime::EntryPoint;
use thiserror::Error;

/// Proxy URI could not be turned into a working transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("invalid proxy URI `{uri}`: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("unsupported proxy scheme `{0}` (expected socks5 or socks5h)")]
    UnsupportedScheme(String),

    #[error("proxy URI `{0}` has no host")]
    MissingHost(String),

    #[error("TLS client setup failed: {0}")]
    Tls(String),

    #[error("transport construction failed: {0}")]
    Transport(String),
}

/// An individual entry point substitution failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchFailure {
    #[error("{0} is sealed and cannot be replaced")]
    Sealed(EntryPoint),

    #[error("{entry_point} installation aborted: {reason}")]
    Aborted { entry_point: EntryPoint, reason: String },
}

/// A request failed while being carried out by an entry point
#[derive(Debug, Error)]
pub enum DelegationError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("fetch is not available in this runtime")]
    FetchUnavailable,

    #[error("protocol \"{found}:\" not supported, expected \"{expected}:\"")]
    ProtocolMismatch { expected: &'static str, found: String },

    #[error("connection failed: {0}")]
    Connect(#[from] std::io::Error),

    #[error("SOCKS5 proxy error: {0}")]
    Proxy(#[from] tokio_socks::Error),

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("invalid response body: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DelegationError>;
