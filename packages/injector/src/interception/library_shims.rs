// packages/injector/src/interception/library_shims.rs
//! Proxy shims installed over the runtime's entry points
//!
//! Each shim wraps the implementation that was in the slot before it and
//! delegates to it after adjusting the transport:
//!
//! - **ProxyInjectingRequest**: request/get; supplies the proxy only when the
//!   caller chose no transport
//! - **TransportForcingFetch**: fetch; always supplies the proxy
//!
//! A shim remembers the transport it injects so the same slot is never
//! wrapped twice for one transport.

use crate::runtime::{FetchHandler, FetchInit, RequestHandler, RequestOptions, Response};
use crate::transport::{same_transport, Transport};
use crate::utils::errors::Result;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Request/get shim
pub struct ProxyInjectingRequest {
    inner: Arc<dyn RequestHandler>,
    transport: Arc<dyn Transport>,
}

impl ProxyInjectingRequest {
    pub fn new(inner: Arc<dyn RequestHandler>, transport: Arc<dyn Transport>) -> Self {
        Self { inner, transport }
    }

    /// Whether `handler` is already a shim injecting `transport`
    pub fn is_installed(handler: &Arc<dyn RequestHandler>, transport: &Arc<dyn Transport>) -> bool {
        handler
            .injected_transport()
            .map(|t| same_transport(t, transport))
            .unwrap_or(false)
    }
}

impl RequestHandler for ProxyInjectingRequest {
    fn call(&self, mut options: RequestOptions) -> BoxFuture<'static, Result<Response>> {
        if options.transport.is_none() {
            trace!("Injecting {} into request", self.transport.describe());
            options.transport = Some(Arc::clone(&self.transport));
        }
        self.inner.call(options)
    }

    fn injected_transport(&self) -> Option<&Arc<dyn Transport>> {
        Some(&self.transport)
    }
}

/// Which fetch implementation a fetch shim delegates to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchSource {
    /// Provider loaded from the module registry
    Provider(String),

    /// The runtime's global fetch as found at activation
    Ambient,
}

impl fmt::Display for FetchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchSource::Provider(name) => write!(f, "provider module {}", name),
            FetchSource::Ambient => f.write_str("global fetch"),
        }
    }
}

/// Fetch shim
pub struct TransportForcingFetch {
    inner: Arc<dyn FetchHandler>,
    transport: Arc<dyn Transport>,
    source: FetchSource,
}

impl TransportForcingFetch {
    pub fn new(inner: Arc<dyn FetchHandler>, transport: Arc<dyn Transport>, source: FetchSource) -> Self {
        Self {
            inner,
            transport,
            source,
        }
    }

    pub fn source(&self) -> &FetchSource {
        &self.source
    }

    /// Whether `handler` is already a shim forcing `transport`
    pub fn is_installed(handler: &Arc<dyn FetchHandler>, transport: &Arc<dyn Transport>) -> bool {
        handler
            .forced_transport()
            .map(|t| same_transport(t, transport))
            .unwrap_or(false)
    }
}

impl FetchHandler for TransportForcingFetch {
    fn fetch(&self, url: String, mut init: FetchInit) -> BoxFuture<'static, Result<Response>> {
        trace!("Forcing {} onto fetch {} via {}", self.transport.describe(), url, self.source);
        init.transport = Some(Arc::clone(&self.transport));
        self.inner.fetch(url, init)
    }

    fn forced_transport(&self) -> Option<&Arc<dyn Transport>> {
        Some(&self.transport)
    }
}
