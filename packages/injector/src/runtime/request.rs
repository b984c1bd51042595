// packages/injector/src/runtime/request.rs
//! Request construction and the request/get entry points
//!
//! A request can be described three ways, all accepted by every entry point:
//! a URL string, a parsed URL, or a [`RequestOptions`] map whose target may be
//! given as host/port/path and completed by the entry point's protocol.

use super::registry::TransportRegistry;
use super::Protocol;
use crate::transport::Transport;
use crate::utils::errors::{DelegationError, Result};
use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::{HeaderName, HeaderValue, HOST};
use http::{HeaderMap, Method, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Where a request goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestTarget {
    /// Absolute URL
    Url(Uri),

    /// Host, port and path; scheme comes from the entry point
    Parts {
        host: String,
        port: Option<u16>,
        path: String,
    },
}

/// Everything an entry point needs to carry out one request
#[derive(Clone)]
pub struct RequestOptions {
    pub target: RequestTarget,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,

    /// Explicit transport; `None` means the runtime default
    pub transport: Option<Arc<dyn Transport>>,
}

impl RequestOptions {
    /// GET to an absolute URL
    pub fn new(url: Uri) -> Self {
        Self::with_target(RequestTarget::Url(url))
    }

    /// GET to `/` on `host`, scheme and default port from the entry point
    pub fn host(host: impl Into<String>) -> Self {
        Self::with_target(RequestTarget::Parts {
            host: host.into(),
            port: None,
            path: "/".to_string(),
        })
    }

    fn with_target(target: RequestTarget) -> Self {
        Self {
            target,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            transport: None,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        if let RequestTarget::Parts { port: p, .. } = &mut self.target {
            *p = Some(port);
        }
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        if let RequestTarget::Parts { path: p, .. } = &mut self.target {
            *p = path.into();
        }
        self
    }

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

    /// Absolute URL for this request as sent through `protocol`
    pub fn resolve_uri(&self, protocol: Protocol) -> Result<Uri> {
        match &self.target {
            RequestTarget::Url(uri) => {
                let scheme = uri.scheme_str().unwrap_or_default();
                if scheme != protocol.scheme() {
                    return Err(DelegationError::ProtocolMismatch {
                        expected: protocol.scheme(),
                        found: scheme.to_string(),
                    });
                }
                Ok(uri.clone())
            }
            RequestTarget::Parts { host, port, path } => {
                let host = if host.contains(':') && !host.starts_with('[') {
                    format!("[{}]", host)
                } else {
                    host.clone()
                };
                let authority = match port {
                    Some(port) => format!("{}:{}", host, port),
                    None => host,
                };
                let path = if path.starts_with('/') {
                    path.clone()
                } else {
                    format!("/{}", path)
                };

                Uri::builder()
                    .scheme(protocol.scheme())
                    .authority(authority)
                    .path_and_query(path)
                    .build()
                    .map_err(|e| DelegationError::InvalidRequest(e.to_string()))
            }
        }
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("target", &self.target)
            .field("method", &self.method)
            .field("headers", &self.headers.len())
            .field("body", &self.body.len())
            .field("transport", &self.transport.as_ref().map(|t| t.describe()))
            .finish()
    }
}

/// Argument shapes accepted by the request and get entry points
pub trait IntoRequestOptions {
    fn into_options(self) -> Result<RequestOptions>;
}

impl IntoRequestOptions for RequestOptions {
    fn into_options(self) -> Result<RequestOptions> {
        Ok(self)
    }
}

impl IntoRequestOptions for Uri {
    fn into_options(self) -> Result<RequestOptions> {
        Ok(RequestOptions::new(self))
    }
}

impl IntoRequestOptions for &str {
    fn into_options(self) -> Result<RequestOptions> {
        let uri: Uri = self
            .parse()
            .map_err(|e| DelegationError::InvalidRequest(format!("invalid URL {}: {}", self, e)))?;
        Ok(RequestOptions::new(uri))
    }
}

impl IntoRequestOptions for String {
    fn into_options(self) -> Result<RequestOptions> {
        self.as_str().into_options()
    }
}

impl IntoRequestOptions for url::Url {
    fn into_options(self) -> Result<RequestOptions> {
        self.as_str().into_options()
    }
}

/// Response returned by every entry point
pub struct Response {
    url: Uri,
    status: StatusCode,
    headers: HeaderMap,
    body: Incoming,
}

impl Response {
    pub(crate) fn new(url: Uri, response: hyper::Response<Incoming>) -> Self {
        let (parts, body) = response.into_parts();
        Self {
            url,
            status: parts.status,
            headers: parts.headers,
            body,
        }
    }

    pub fn url(&self) -> &Uri {
        &self.url
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Status is 2xx
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub async fn bytes(self) -> Result<Bytes> {
        Ok(self.body.collect().await?.to_bytes())
    }

    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("url", &self.url)
            .field("status", &self.status)
            .finish()
    }
}

/// Request or get entry point
pub trait RequestHandler: Send + Sync {
    fn call(&self, options: RequestOptions) -> BoxFuture<'static, Result<Response>>;

    /// Transport injected by this handler, when it is a proxy wrapper
    fn injected_transport(&self) -> Option<&Arc<dyn Transport>> {
        None
    }
}

impl<F> RequestHandler for F
where
    F: Fn(RequestOptions) -> BoxFuture<'static, Result<Response>> + Send + Sync,
{
    fn call(&self, options: RequestOptions) -> BoxFuture<'static, Result<Response>> {
        self(options)
    }
}

/// The runtime's own request/get implementation
pub struct NativeRequest {
    protocol: Protocol,
    registry: Arc<dyn TransportRegistry>,

    /// Get helpers always issue GET regardless of the options
    force_get: bool,
}

impl NativeRequest {
    pub fn request(protocol: Protocol, registry: Arc<dyn TransportRegistry>) -> Self {
        Self {
            protocol,
            registry,
            force_get: false,
        }
    }

    pub fn get(protocol: Protocol, registry: Arc<dyn TransportRegistry>) -> Self {
        Self {
            protocol,
            registry,
            force_get: true,
        }
    }
}

impl RequestHandler for NativeRequest {
    fn call(&self, options: RequestOptions) -> BoxFuture<'static, Result<Response>> {
        let uri = options.resolve_uri(self.protocol);
        let RequestOptions {
            method,
            headers,
            body,
            transport,
            ..
        } = options;

        let transport = transport.unwrap_or_else(|| self.registry.get_default(self.protocol));
        let method = if self.force_get { Method::GET } else { method };

        Box::pin(async move { exchange(transport, uri?, method, headers, body).await })
    }
}

/// Run one HTTP/1.1 exchange over a fresh connection from `transport`
pub(crate) async fn exchange(
    transport: Arc<dyn Transport>,
    uri: Uri,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    debug!("{} {} via {}", method, uri, transport.describe());

    let io = transport.connect(&uri).await?;
    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(io)).await?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            trace!("Connection closed with error: {}", e);
        }
    });

    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let mut request = hyper::Request::builder()
        .method(method)
        .uri(path)
        .body(Full::new(body))
        .map_err(|e| DelegationError::InvalidRequest(e.to_string()))?;

    *request.headers_mut() = headers;
    if !request.headers().contains_key(HOST) {
        if let Some(authority) = uri.authority() {
            let value = HeaderValue::from_str(authority.as_str())
                .map_err(|e| DelegationError::InvalidRequest(e.to_string()))?;
            request.headers_mut().insert(HOST, value);
        }
    }

    let response = sender.send_request(request).await?;
    Ok(Response::new(uri, response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::registry::DefaultTransports;
    use crate::runtime::testing::{serve_json, RecordingTransport};

    #[test]
    fn test_string_and_uri_shapes() {
        let from_str = "http://example.com/a?b=1".into_options().unwrap();
        let from_uri = "http://example.com/a?b=1".parse::<Uri>().unwrap().into_options().unwrap();
        let from_url = url::Url::parse("http://example.com/a?b=1").unwrap().into_options().unwrap();

        assert_eq!(from_str.target, from_uri.target);
        assert_eq!(from_str.target, from_url.target);
        assert_eq!(from_str.method, Method::GET);
        assert!(from_str.transport.is_none());
    }

    #[test]
    fn test_invalid_url_string() {
        assert!(matches!(
            "http://exa mple.com".into_options(),
            Err(DelegationError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_parts_resolve_against_protocol() {
        let options = RequestOptions::host("ipv4.example.com").path("ip");
        let uri = options.resolve_uri(Protocol::Secure).unwrap();
        assert_eq!(uri.to_string(), "https://ipv4.example.com/ip");

        let options = RequestOptions::host("::1").port(8080);
        let uri = options.resolve_uri(Protocol::Plain).unwrap();
        assert_eq!(uri.to_string(), "http://[::1]:8080/");
    }

    #[test]
    fn test_url_must_match_protocol() {
        let options = "https://example.com/".into_options().unwrap();
        let err = options.resolve_uri(Protocol::Plain).unwrap_err();
        assert!(matches!(
            err,
            DelegationError::ProtocolMismatch { expected: "http", .. }
        ));
    }

    #[tokio::test]
    async fn test_native_request_uses_default_transport() {
        let default = RecordingTransport::serving(serve_json(r#"{"ip":"10.0.0.1"}"#));
        let registry = Arc::new(DefaultTransports::with_transports(
            default.clone(),
            default.clone(),
        ));
        let handler = NativeRequest::request(Protocol::Plain, registry);

        let response = handler
            .call("http://api.example.test/ip".into_options().unwrap())
            .await
            .unwrap();

        assert!(response.ok());
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["ip"], "10.0.0.1");
        assert_eq!(default.connects(), vec!["http://api.example.test/ip".to_string()]);
    }

    #[tokio::test]
    async fn test_native_request_respects_explicit_transport() {
        let default = RecordingTransport::serving(serve_json("{}"));
        let explicit = RecordingTransport::serving(serve_json(r#"{"ip":"explicit"}"#));
        let registry = Arc::new(DefaultTransports::with_transports(
            default.clone(),
            default.clone(),
        ));
        let handler = NativeRequest::request(Protocol::Secure, registry);

        let options = RequestOptions::host("api.example.test").transport(explicit.clone());
        let response = handler.call(options).await.unwrap();

        assert_eq!(response.text().await.unwrap(), r#"{"ip":"explicit"}"#);
        assert_eq!(explicit.connect_count(), 1);
        assert_eq!(default.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_native_get_forces_get() {
        let transport = RecordingTransport::serving(serve_json("{}"));
        let registry = Arc::new(DefaultTransports::with_transports(
            transport.clone(),
            transport.clone(),
        ));
        let handler = NativeRequest::get(Protocol::Plain, registry);

        let options = RequestOptions::host("example.test").method(Method::POST);
        handler.call(options).await.unwrap();

        assert_eq!(transport.methods(), vec![Method::GET]);
    }

    #[tokio::test]
    async fn test_connect_failure_propagates() {
        let transport = RecordingTransport::refusing();
        let registry = Arc::new(DefaultTransports::with_transports(
            transport.clone(),
            transport.clone(),
        ));
        let handler = NativeRequest::request(Protocol::Plain, registry);

        let result = handler.call("http://down.example.test/".into_options().unwrap()).await;
        assert!(matches!(result, Err(DelegationError::Connect(_))));
    }
}
