// packages/injector/src/transport/socks.rs
//! SOCKS5 proxy transport
//!
//! Parses `socks5://[user:pass@]host[:port]` URIs and tunnels connections
//! through the proxy with `tokio-socks`. `socks5` resolves the target locally
//! and hands the proxy an address; `socks5h` hands the proxy the hostname.

use super::{tls, BoxedIo, Target, Transport};
use crate::utils::errors::{ConfigurationError, Result};
use futures::future::BoxFuture;
use http::Uri;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_socks::tcp::Socks5Stream;
use tokio_socks::IntoTargetAddr;
use tracing::debug;
use url::Url;

/// Port used when the proxy URI does not name one
pub const DEFAULT_SOCKS_PORT: u16 = 1080;

/// Longest username or password the SOCKS5 password sub-negotiation carries
const MAX_CREDENTIAL_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyScheme {
    /// Target resolved locally
    Socks5,
    /// Target resolved by the proxy
    Socks5h,
}

impl ProxyScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyScheme::Socks5 => "socks5",
            ProxyScheme::Socks5h => "socks5h",
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Parsed proxy URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub scheme: ProxyScheme,
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
}

impl ProxyEndpoint {
    pub fn parse(uri: &str) -> std::result::Result<Self, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidUri {
            uri: redact(uri),
            reason,
        };

        let url = Url::parse(uri.trim()).map_err(|e| invalid(e.to_string()))?;

        let scheme = match url.scheme() {
            "socks5" => ProxyScheme::Socks5,
            "socks5h" => ProxyScheme::Socks5h,
            other => return Err(ConfigurationError::UnsupportedScheme(other.to_string())),
        };

        let host = url
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConfigurationError::MissingHost(redact(uri)))?
            .to_string();

        let port = url.port().unwrap_or(DEFAULT_SOCKS_PORT);

        let credentials = if url.username().is_empty() {
            None
        } else {
            let username = urlencoding::decode(url.username())
                .map_err(|e| invalid(format!("username is not UTF-8: {}", e)))?
                .into_owned();
            let password = urlencoding::decode(url.password().unwrap_or(""))
                .map_err(|e| invalid(format!("password is not UTF-8: {}", e)))?
                .into_owned();
            for (field, value) in [("username", &username), ("password", &password)] {
                if !(1..=MAX_CREDENTIAL_LEN).contains(&value.len()) {
                    return Err(invalid(format!(
                        "{} must be 1 to {} bytes",
                        field, MAX_CREDENTIAL_LEN
                    )));
                }
            }
            Some(Credentials { username, password })
        };

        Ok(Self {
            scheme,
            host,
            port,
            credentials,
        })
    }

    /// `host:port` of the proxy itself
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    async fn tunnel(&self, target: &Target) -> Result<TcpStream> {
        let proxy = self.authority();

        let stream = match self.scheme {
            ProxyScheme::Socks5h => {
                self.handshake(&proxy, (target.host.as_str(), target.port)).await?
            }
            ProxyScheme::Socks5 => {
                let addr = tokio::net::lookup_host((target.host.as_str(), target.port))
                    .await?
                    .next()
                    .ok_or_else(|| {
                        io::Error::new(
                            io::ErrorKind::NotFound,
                            format!("no address found for {}", target.host),
                        )
                    })?;
                self.handshake(&proxy, addr).await?
            }
        };

        Ok(stream.into_inner())
    }

    async fn handshake<'t, T>(
        &self,
        proxy: &str,
        target: T,
    ) -> std::result::Result<Socks5Stream<TcpStream>, tokio_socks::Error>
    where
        T: IntoTargetAddr<'t>,
    {
        match &self.credentials {
            Some(creds) => {
                Socks5Stream::connect_with_password(proxy, target, &creds.username, &creds.password)
                    .await
            }
            None => Socks5Stream::connect(proxy, target).await,
        }
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme.as_str(), self.authority())
    }
}

/// Strip userinfo so credentials never reach logs or errors
pub(crate) fn redact(uri: &str) -> String {
    match (uri.find("://"), uri.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &uri[..scheme_end], &uri[at + 1..])
        }
        _ => uri.to_string(),
    }
}

/// Transport tunnelling every connection through one SOCKS5 proxy
pub struct ProxyTransport {
    endpoint: ProxyEndpoint,
    tls: TlsConnector,
}

impl ProxyTransport {
    pub fn new(endpoint: ProxyEndpoint) -> std::result::Result<Self, ConfigurationError> {
        let tls = tls::connector()?;
        Ok(Self { endpoint, tls })
    }

    pub fn endpoint(&self) -> &ProxyEndpoint {
        &self.endpoint
    }
}

impl fmt::Debug for ProxyTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyTransport")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl Transport for ProxyTransport {
    fn connect(&self, dst: &Uri) -> BoxFuture<'static, Result<BoxedIo>> {
        let endpoint = self.endpoint.clone();
        let tls = self.tls.clone();
        let target = Target::from_uri(dst);

        Box::pin(async move {
            let target = target?;
            debug!("Tunnelling {} through {}", target, endpoint);

            let stream = endpoint.tunnel(&target).await?;
            stream.set_nodelay(true)?;

            if target.secure {
                tls::handshake(&tls, &target.host, stream).await
            } else {
                Ok(Box::new(stream) as BoxedIo)
            }
        })
    }

    fn describe(&self) -> String {
        self.endpoint.to_string()
    }
}

/// Builds the shared proxy transport from a parsed endpoint
pub trait TransportFactory: Send + Sync {
    fn build(&self, endpoint: &ProxyEndpoint) -> std::result::Result<Arc<dyn Transport>, ConfigurationError>;
}

impl<F> TransportFactory for F
where
    F: Fn(&ProxyEndpoint) -> std::result::Result<Arc<dyn Transport>, ConfigurationError> + Send + Sync,
{
    fn build(&self, endpoint: &ProxyEndpoint) -> std::result::Result<Arc<dyn Transport>, ConfigurationError> {
        self(endpoint)
    }
}

/// Factory producing real SOCKS5 transports
#[derive(Debug, Default, Clone, Copy)]
pub struct Socks5Factory;

impl TransportFactory for Socks5Factory {
    fn build(&self, endpoint: &ProxyEndpoint) -> std::result::Result<Arc<dyn Transport>, ConfigurationError> {
        Ok(Arc::new(ProxyTransport::new(endpoint.clone())?))
    }
}
