// packages/injector/src/transport/tls.rs
//! TLS client setup for secure targets
//!
//! One rustls client configuration (webpki roots, ring provider, HTTP/1.1
//! ALPN) is built on first use and shared by every transport.

use super::BoxedIo;
use crate::utils::errors::{ConfigurationError, DelegationError, Result};
use once_cell::sync::OnceCell;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;
use tracing::debug;

static CLIENT_CONFIG: OnceCell<Arc<ClientConfig>> = OnceCell::new();

/// Connector backed by the shared client configuration
pub fn connector() -> std::result::Result<TlsConnector, ConfigurationError> {
    let config = CLIENT_CONFIG.get_or_try_init(build_client_config)?;
    Ok(TlsConnector::from(Arc::clone(config)))
}

fn build_client_config() -> std::result::Result<Arc<ClientConfig>, ConfigurationError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ConfigurationError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    debug!("TLS client configuration built with {} roots", webpki_roots::TLS_SERVER_ROOTS.len());
    Ok(Arc::new(config))
}

/// Run the client handshake for `host` over an established stream
pub async fn handshake<S>(connector: &TlsConnector, host: &str, stream: S) -> Result<BoxedIo>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| DelegationError::Tls(format!("invalid server name {}: {}", host, e)))?;

    let tls = connector
        .connect(server_name, stream)
        .await
        .map_err(|e| DelegationError::Tls(e.to_string()))?;

    Ok(Box::new(tls))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_builds_once() {
        assert!(connector().is_ok());
        let first = CLIENT_CONFIG.get().map(Arc::as_ptr);
        assert!(connector().is_ok());
        assert_eq!(first, CLIENT_CONFIG.get().map(Arc::as_ptr));
    }

    #[tokio::test]
    async fn test_handshake_rejects_bad_server_name() {
        let (client, _server) = tokio::io::duplex(64);
        let connector = connector().unwrap();

        let result = handshake(&connector, "not a host name", client).await;
        assert!(matches!(result, Err(DelegationError::Tls(_))));
    }
}
