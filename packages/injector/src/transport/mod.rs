// packages/injector/src/transport/mod.rs
//! Connection establishment
//!
//! A [`Transport`] turns a request URI into an established byte stream that
//! is ready for HTTP: TCP for `http` targets, TCP plus TLS for `https`
//! targets. Entry points never open sockets themselves; they ask whichever
//! transport the caller chose, or the runtime default.
//!
//! - **DirectTransport**: the runtime's own transport, connects straight to
//!   the target
//! - **ProxyTransport**: tunnels through a SOCKS5 proxy
//! - **tls**: rustls client configuration shared by both

pub mod socks;
pub mod tls;

pub use socks::{ProxyEndpoint, ProxyScheme, ProxyTransport, Socks5Factory, TransportFactory};

use crate::utils::errors::{DelegationError, Result};
use futures::future::BoxFuture;
use http::Uri;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

/// Byte stream produced by a transport
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedIo = Box<dyn Io>;

/// Establishes the connection underneath a request
///
/// Implementations are shared across every in-flight request and must be
/// usable concurrently.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Open a connection suitable for sending a request to `dst`
    fn connect(&self, dst: &Uri) -> BoxFuture<'static, Result<BoxedIo>>;

    /// Short human-readable description for logs
    fn describe(&self) -> String;
}

/// Whether two transport handles are the same instance
pub fn same_transport(a: &Arc<dyn Transport>, b: &Arc<dyn Transport>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Where a request URI points
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Hostname or IP literal without IPv6 brackets
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

impl Target {
    pub fn from_uri(uri: &Uri) -> Result<Self> {
        let secure = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            Some(other) => {
                return Err(DelegationError::InvalidRequest(format!(
                    "unsupported URL scheme: {}",
                    other
                )))
            }
            None => {
                return Err(DelegationError::InvalidRequest(format!(
                    "URL has no scheme: {}",
                    uri
                )))
            }
        };

        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| DelegationError::InvalidRequest(format!("URL has no host: {}", uri)))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        let port = uri.port_u16().unwrap_or(if secure { 443 } else { 80 });

        Ok(Self { host, port, secure })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// The runtime's built-in transport: connect directly to the target
#[derive(Debug, Default, Clone)]
pub struct DirectTransport;

impl DirectTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for DirectTransport {
    fn connect(&self, dst: &Uri) -> BoxFuture<'static, Result<BoxedIo>> {
        let target = Target::from_uri(dst);

        Box::pin(async move {
            let target = target?;
            debug!("Connecting directly to {}", target);

            let stream = TcpStream::connect((target.host.as_str(), target.port)).await?;
            stream.set_nodelay(true)?;

            if target.secure {
                let connector = tls::connector().map_err(|e| DelegationError::Tls(e.to_string()))?;
                tls::handshake(&connector, &target.host, stream).await
            } else {
                Ok(Box::new(stream) as BoxedIo)
            }
        })
    }

    fn describe(&self) -> String {
        "direct".to_string()
    }
}
