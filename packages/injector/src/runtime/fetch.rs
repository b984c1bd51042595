// packages/injector/src/runtime/fetch.rs
//! Fetch-style entry point and optional fetch providers
//!
//! `fetch(url, init)` resolves to a [`Response`]. The runtime may or may not
//! ship a global fetch; independently, a proxy-capable fetch implementation
//! can be registered as an optional module and loaded by name.

use super::registry::TransportRegistry;
use super::request::{exchange, Response};
use super::Protocol;
use crate::transport::Transport;
use crate::utils::errors::{DelegationError, Result};
use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, Uri};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Module name under which a proxy-capable fetch provider is looked up
pub const PROXY_FETCH_MODULE: &str = "proxy-fetch";

/// Options for one fetch call
#[derive(Clone, Default)]
pub struct FetchInit {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,

    /// Transport (agent/dispatcher) override
    pub transport: Option<Arc<dyn Transport>>,
}

impl FetchInit {
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }
}

impl fmt::Debug for FetchInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchInit")
            .field("method", &self.method)
            .field("headers", &self.headers.len())
            .field("body", &self.body.len())
            .field("transport", &self.transport.as_ref().map(|t| t.describe()))
            .finish()
    }
}

/// A function with the fetch signature that honours a transport override
pub trait FetchHandler: Send + Sync {
    fn fetch(&self, url: String, init: FetchInit) -> BoxFuture<'static, Result<Response>>;

    /// Transport this handler forces onto every call, when it is a proxy
    /// wrapper
    fn forced_transport(&self) -> Option<&Arc<dyn Transport>> {
        None
    }
}

impl<F> FetchHandler for F
where
    F: Fn(String, FetchInit) -> BoxFuture<'static, Result<Response>> + Send + Sync,
{
    fn fetch(&self, url: String, init: FetchInit) -> BoxFuture<'static, Result<Response>> {
        self(url, init)
    }
}

/// The runtime's own fetch
pub struct NativeFetch {
    registry: Arc<dyn TransportRegistry>,
}

impl NativeFetch {
    pub fn new(registry: Arc<dyn TransportRegistry>) -> Self {
        Self { registry }
    }
}

impl FetchHandler for NativeFetch {
    fn fetch(&self, url: String, init: FetchInit) -> BoxFuture<'static, Result<Response>> {
        let target = url
            .parse::<Uri>()
            .map_err(|e| DelegationError::InvalidRequest(format!("invalid URL {}: {}", url, e)))
            .and_then(|uri| {
                let protocol = uri
                    .scheme_str()
                    .and_then(Protocol::from_scheme)
                    .ok_or_else(|| {
                        DelegationError::InvalidRequest(format!("fetch cannot load {}", url))
                    })?;
                Ok((uri, protocol))
            });

        let FetchInit {
            method,
            headers,
            body,
            transport,
        } = init;
        let registry = Arc::clone(&self.registry);

        Box::pin(async move {
            let (uri, protocol) = target?;
            let transport = transport.unwrap_or_else(|| registry.get_default(protocol));
            exchange(transport, uri, method, headers, body).await
        })
    }
}

/// Optional modules that can be loaded at runtime
#[derive(Default)]
pub struct ModuleRegistry {
    fetch_providers: Arc<RwLock<HashMap<String, Arc<dyn FetchHandler>>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a fetch provider available under `name`
    pub fn register_fetch_provider(&self, name: impl Into<String>, provider: Arc<dyn FetchHandler>) {
        let name = name.into();
        info!("Registering fetch provider module {}", name);
        self.fetch_providers.write().insert(name, provider);
    }

    pub fn unregister_fetch_provider(&self, name: &str) -> bool {
        self.fetch_providers.write().remove(name).is_some()
    }

    /// Load a fetch provider; resolves to `None` when no such module exists
    pub fn load_fetch_provider(&self, name: &str) -> BoxFuture<'static, Option<Arc<dyn FetchHandler>>> {
        let providers = Arc::clone(&self.fetch_providers);
        let name = name.to_string();

        Box::pin(async move {
            let provider = providers.read().get(&name).cloned();
            debug!(
                "Fetch provider module {} {}",
                name,
                if provider.is_some() { "loaded" } else { "not available" }
            );
            provider
        })
    }
}
