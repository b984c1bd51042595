// packages/injector/src/runtime/mod.rs
//! Network runtime
//!
//! The runtime owns every entry point through which a process makes outbound
//! HTTP calls:
//!
//! - **Default transports**: one per protocol, used when a call names none
//! - **request / get**: per protocol, accept a URL or an options map
//! - **fetch**: optional, URL plus init options
//! - **Modules**: optional providers loaded by name at runtime
//!
//! # Architecture
//!
//! ```text
//! Application Code (Unmodified)
//!     │
//!     ├─ http().get(..)   ─┐
//!     ├─ https().request ──┼─→ RequestHandler slot ─→ Transport ─→ network
//!     └─ fetch(..)        ─┘        (replaceable)      (default or explicit)
//! ```
//!
//! Each entry point lives in a replaceable slot so the interception layer can
//! install wrappers around the implementation already there.

pub mod fetch;
pub mod registry;
pub mod request;

pub use fetch::{FetchHandler, FetchInit, ModuleRegistry, NativeFetch, PROXY_FETCH_MODULE};
pub use registry::{DefaultTransports, TransportRegistry};
pub use request::{IntoRequestOptions, NativeRequest, RequestHandler, RequestOptions, RequestTarget, Response};

use crate::transport::Transport;
use crate::utils::errors::{DelegationError, Result};
use registry::Slot;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Outbound protocol an entry point serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    /// `http`
    Plain,
    /// `https`
    Secure,
}

impl Protocol {
    pub const ALL: [Protocol; 2] = [Protocol::Plain, Protocol::Secure];

    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Plain => "http",
            Protocol::Secure => "https",
        }
    }

    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "http" => Some(Protocol::Plain),
            "https" => Some(Protocol::Secure),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Every replaceable entry point of the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryPoint {
    DefaultTransportPlain,
    DefaultTransportSecure,
    RequestPlain,
    RequestSecure,
    GetPlain,
    GetSecure,
    Fetch,
}

impl EntryPoint {
    pub const ALL: [EntryPoint; 7] = [
        EntryPoint::DefaultTransportPlain,
        EntryPoint::DefaultTransportSecure,
        EntryPoint::RequestPlain,
        EntryPoint::RequestSecure,
        EntryPoint::GetPlain,
        EntryPoint::GetSecure,
        EntryPoint::Fetch,
    ];

    pub fn default_transport(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Plain => EntryPoint::DefaultTransportPlain,
            Protocol::Secure => EntryPoint::DefaultTransportSecure,
        }
    }

    pub fn request(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Plain => EntryPoint::RequestPlain,
            Protocol::Secure => EntryPoint::RequestSecure,
        }
    }

    pub fn get(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Plain => EntryPoint::GetPlain,
            Protocol::Secure => EntryPoint::GetSecure,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryPoint::DefaultTransportPlain => "http default transport",
            EntryPoint::DefaultTransportSecure => "https default transport",
            EntryPoint::RequestPlain => "http.request",
            EntryPoint::RequestSecure => "https.request",
            EntryPoint::GetPlain => "http.get",
            EntryPoint::GetSecure => "https.get",
            EntryPoint::Fetch => "fetch",
        }
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct ProtocolSlots {
    request: Slot<Arc<dyn RequestHandler>>,
    get: Slot<Arc<dyn RequestHandler>>,
}

impl ProtocolSlots {
    fn native(protocol: Protocol, registry: &Arc<dyn TransportRegistry>) -> Self {
        Self {
            request: Slot::new(
                EntryPoint::request(protocol),
                Arc::new(NativeRequest::request(protocol, Arc::clone(registry))),
            ),
            get: Slot::new(
                EntryPoint::get(protocol),
                Arc::new(NativeRequest::get(protocol, Arc::clone(registry))),
            ),
        }
    }
}

/// Builder for [`NetRuntime`]
pub struct NetRuntimeBuilder {
    registry: Option<Arc<dyn TransportRegistry>>,
    with_fetch: bool,
}

impl NetRuntimeBuilder {
    /// Use a custom default transport registry
    pub fn registry(mut self, registry: Arc<dyn TransportRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Use `transport` as the default for both protocols
    pub fn default_transport(self, transport: Arc<dyn Transport>) -> Self {
        self.registry(Arc::new(DefaultTransports::with_transports(
            Arc::clone(&transport),
            transport,
        )))
    }

    /// Build a runtime that has no global fetch
    pub fn without_fetch(mut self) -> Self {
        self.with_fetch = false;
        self
    }

    pub fn build(self) -> NetRuntime {
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(DefaultTransports::new()));

        let fetch: Option<Arc<dyn FetchHandler>> = if self.with_fetch {
            Some(Arc::new(NativeFetch::new(Arc::clone(&registry))))
        } else {
            None
        };

        NetRuntime {
            plain: ProtocolSlots::native(Protocol::Plain, &registry),
            secure: ProtocolSlots::native(Protocol::Secure, &registry),
            fetch: Slot::new(EntryPoint::Fetch, fetch),
            modules: ModuleRegistry::new(),
            registry,
        }
    }
}

/// The process's network entry points
pub struct NetRuntime {
    registry: Arc<dyn TransportRegistry>,
    plain: ProtocolSlots,
    secure: ProtocolSlots,
    fetch: Slot<Option<Arc<dyn FetchHandler>>>,
    modules: ModuleRegistry,
}

impl NetRuntime {
    /// Runtime with direct default transports and a global fetch
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> NetRuntimeBuilder {
        NetRuntimeBuilder {
            registry: None,
            with_fetch: true,
        }
    }

    pub fn http(&self) -> ProtocolModule<'_> {
        self.protocol(Protocol::Plain)
    }

    pub fn https(&self) -> ProtocolModule<'_> {
        self.protocol(Protocol::Secure)
    }

    pub fn protocol(&self, protocol: Protocol) -> ProtocolModule<'_> {
        ProtocolModule {
            runtime: self,
            protocol,
        }
    }

    /// Global fetch
    pub async fn fetch(&self, url: impl Into<String>, init: FetchInit) -> Result<Response> {
        let handler = self.fetch.get().ok_or(DelegationError::FetchUnavailable)?;
        handler.fetch(url.into(), init).await
    }

    pub fn has_fetch(&self) -> bool {
        self.fetch.get().is_some()
    }

    pub fn registry(&self) -> &Arc<dyn TransportRegistry> {
        &self.registry
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    /// Refuse any further replacement of `entry_point`
    pub fn seal(&self, entry_point: EntryPoint) {
        match entry_point {
            EntryPoint::DefaultTransportPlain => self.registry.seal(Protocol::Plain),
            EntryPoint::DefaultTransportSecure => self.registry.seal(Protocol::Secure),
            EntryPoint::RequestPlain => self.plain.request.seal(),
            EntryPoint::RequestSecure => self.secure.request.seal(),
            EntryPoint::GetPlain => self.plain.get.seal(),
            EntryPoint::GetSecure => self.secure.get.seal(),
            EntryPoint::Fetch => self.fetch.seal(),
        }
    }

    fn slots(&self, protocol: Protocol) -> &ProtocolSlots {
        match protocol {
            Protocol::Plain => &self.plain,
            Protocol::Secure => &self.secure,
        }
    }

    pub(crate) fn request_slot(&self, protocol: Protocol) -> &Slot<Arc<dyn RequestHandler>> {
        &self.slots(protocol).request
    }

    pub(crate) fn get_slot(&self, protocol: Protocol) -> &Slot<Arc<dyn RequestHandler>> {
        &self.slots(protocol).get
    }

    pub(crate) fn fetch_slot(&self) -> &Slot<Option<Arc<dyn FetchHandler>>> {
        &self.fetch
    }
}

impl Default for NetRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// The `http` or `https` face of the runtime
pub struct ProtocolModule<'a> {
    runtime: &'a NetRuntime,
    protocol: Protocol,
}

impl<'a> ProtocolModule<'a> {
    /// Transport used when a call names none
    pub fn default_transport(&self) -> Arc<dyn Transport> {
        self.runtime.registry.get_default(self.protocol)
    }

    /// Issue a request described by a URL or options
    pub async fn request(&self, target: impl IntoRequestOptions) -> Result<Response> {
        let options = target.into_options()?;
        let handler = self.runtime.request_slot(self.protocol).get();
        handler.call(options).await
    }

    /// Issue a GET
    pub async fn get(&self, target: impl IntoRequestOptions) -> Result<Response> {
        let options = target.into_options()?;
        let handler = self.runtime.get_slot(self.protocol).get();
        handler.call(options).await
    }

    /// Issue a GET and hand the outcome to `callback` when it completes.
    /// Must be called from within a tokio runtime.
    pub fn get_with<F>(&self, target: impl IntoRequestOptions, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<Response>) + Send + 'static,
    {
        let call = target
            .into_options()
            .map(|options| self.runtime.get_slot(self.protocol).get().call(options));

        tokio::spawn(async move {
            let outcome = match call {
                Ok(call) => call.await,
                Err(e) => Err(e),
            };
            callback(outcome);
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transports, servers and log capture for behavioural tests

    use super::*;
    use crate::transport::BoxedIo;
    use bytes::Bytes;
    use futures::future::BoxFuture;
    use http::{Method, StatusCode, Uri};
    use http_body_util::Full;
    use hyper::body::Incoming;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper_util::rt::TokioIo;
    use parking_lot::Mutex;
    use std::convert::Infallible;
    use std::io;
    use tracing_subscriber::fmt::MakeWriter;

    /// Shared in-memory sink for a test subscriber
    #[derive(Clone, Default)]
    pub(crate) struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    /// Run `f` with every event on this thread written to a buffer, and
    /// return the rendered log alongside the result
    pub(crate) fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
        let buffer = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(buffer.clone())
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_target(true)
            .finish();

        let result = tracing::subscriber::with_default(subscriber, f);
        let logs = String::from_utf8_lossy(&buffer.0.lock()).into_owned();
        (result, logs)
    }

    pub(crate) type Responder = Arc<dyn Fn(&Method, &Uri) -> (StatusCode, String) + Send + Sync>;

    pub(crate) fn serve_json(body: &str) -> Responder {
        let body = body.to_string();
        Arc::new(move |_, _| (StatusCode::OK, body.clone()))
    }

    /// Transport that records every connect and answers with an in-process
    /// HTTP server
    pub(crate) struct RecordingTransport {
        name: String,
        responder: Option<Responder>,
        connects: Mutex<Vec<String>>,
        methods: Arc<Mutex<Vec<Method>>>,
    }

    impl RecordingTransport {
        pub(crate) fn serving(responder: Responder) -> Arc<Self> {
            Self::named("recording", Some(responder))
        }

        pub(crate) fn refusing() -> Arc<Self> {
            Self::named("refusing", None)
        }

        pub(crate) fn named(name: &str, responder: Option<Responder>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                responder,
                connects: Mutex::new(Vec::new()),
                methods: Arc::new(Mutex::new(Vec::new())),
            })
        }

        pub(crate) fn connects(&self) -> Vec<String> {
            self.connects.lock().clone()
        }

        pub(crate) fn connect_count(&self) -> usize {
            self.connects.lock().len()
        }

        pub(crate) fn methods(&self) -> Vec<Method> {
            self.methods.lock().clone()
        }
    }

    impl fmt::Debug for RecordingTransport {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("RecordingTransport")
                .field("name", &self.name)
                .finish()
        }
    }

    impl Transport for RecordingTransport {
        fn connect(&self, dst: &Uri) -> BoxFuture<'static, Result<BoxedIo>> {
            self.connects.lock().push(dst.to_string());

            let responder = self.responder.clone();
            let methods = Arc::clone(&self.methods);

            Box::pin(async move {
                let responder = responder.ok_or_else(|| {
                    io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused")
                })?;

                let (client, server) = tokio::io::duplex(64 * 1024);

                tokio::spawn(async move {
                    let service = service_fn(move |req: hyper::Request<Incoming>| {
                        methods.lock().push(req.method().clone());
                        let (status, body) = (*responder)(req.method(), req.uri());
                        async move {
                            let response = hyper::Response::builder()
                                .status(status)
                                .header("content-type", "application/json")
                                .body(Full::new(Bytes::from(body)))
                                .unwrap();
                            Ok::<_, Infallible>(response)
                        }
                    });

                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(server), service)
                        .await;
                });

                Ok(Box::new(client) as BoxedIo)
            })
        }

        fn describe(&self) -> String {
            self.name.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{serve_json, RecordingTransport};
    use super::*;
    use crate::transport::same_transport;

    #[test]
    fn test_protocol_schemes() {
        assert_eq!(Protocol::from_scheme("https"), Some(Protocol::Secure));
        assert_eq!(Protocol::from_scheme("ws"), None);
        assert_eq!(Protocol::Plain.to_string(), "http");
    }

    #[test]
    fn test_entry_point_names() {
        assert_eq!(EntryPoint::get(Protocol::Secure).to_string(), "https.get");
        assert_eq!(EntryPoint::ALL.len(), 7);
    }

    #[test]
    fn test_runtime_without_fetch() {
        let runtime = NetRuntime::builder().without_fetch().build();
        assert!(!runtime.has_fetch());
        assert!(NetRuntime::new().has_fetch());
    }

    #[tokio::test]
    async fn test_fetch_unavailable_error() {
        let runtime = NetRuntime::builder().without_fetch().build();
        let result = runtime.fetch("https://example.test/", FetchInit::default()).await;
        assert!(matches!(result, Err(DelegationError::FetchUnavailable)));
    }

    #[tokio::test]
    async fn test_protocol_module_routes_through_default() {
        let transport = RecordingTransport::serving(serve_json(r#"{"ip":"203.0.113.7"}"#));
        let runtime = NetRuntime::builder()
            .default_transport(transport.clone())
            .build();

        let response = runtime.https().get("https://api.example.test/?format=json").await.unwrap();
        let body: serde_json::Value = response.json().await.unwrap();

        assert_eq!(body["ip"], "203.0.113.7");
        assert_eq!(transport.connect_count(), 1);
        let expected: Arc<dyn Transport> = transport;
        assert!(same_transport(&runtime.https().default_transport(), &expected));
    }

    #[tokio::test]
    async fn test_get_with_callback() {
        let transport = RecordingTransport::serving(serve_json(r#"{"ip":"198.51.100.2"}"#));
        let runtime = NetRuntime::builder()
            .default_transport(transport.clone())
            .build();

        let (tx, rx) = tokio::sync::oneshot::channel();
        runtime
            .http()
            .get_with("http://api.example.test/", move |outcome| {
                let _ = tx.send(outcome.map(|r| r.status()));
            })
            .await
            .unwrap();

        assert_eq!(rx.await.unwrap().unwrap(), http::StatusCode::OK);
    }

    #[tokio::test]
    async fn test_get_with_reports_invalid_target() {
        let runtime = NetRuntime::new();
        let (tx, rx) = tokio::sync::oneshot::channel();

        runtime
            .http()
            .get_with("not a url", move |outcome| {
                let _ = tx.send(outcome.is_err());
            })
            .await
            .unwrap();

        assert!(rx.await.unwrap());
    }

    #[test]
    fn test_seal_blocks_replacement() {
        let runtime = NetRuntime::new();
        runtime.seal(EntryPoint::GetSecure);

        assert!(runtime.get_slot(Protocol::Secure).is_sealed());
        assert!(!runtime.get_slot(Protocol::Plain).is_sealed());
        assert!(!runtime.request_slot(Protocol::Secure).is_sealed());
    }
}
