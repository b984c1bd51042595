// packages/injector/src/interception/interceptor.rs
//! Proxy activation
//!
//! Builds the shared proxy transport once and substitutes it into every
//! entry point of a [`NetRuntime`]. Substitutions are independent of each
//! other: a refused slot is recorded and the remaining slots are still
//! patched. Activation happens at most once per interceptor.

use super::library_shims::{FetchSource, ProxyInjectingRequest, TransportForcingFetch};
use super::record::{ActivationResult, PatchRecord, PatchState};
use crate::runtime::registry::Slot;
use crate::runtime::{EntryPoint, FetchHandler, NetRuntime, Protocol, RequestHandler, PROXY_FETCH_MODULE};
use crate::transport::{same_transport, ProxyEndpoint, Socks5Factory, Transport, TransportFactory};
use crate::utils::config::ProxyConfig;
use crate::utils::errors::{ConfigurationError, PatchFailure};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::error;

/// Activation diagnostics, emitted only when debug logging is enabled
macro_rules! debug_log {
    ($enabled:expr, $($arg:tt)+) => {
        if $enabled {
            tracing::info!(target: crate::observability::DEBUG_TARGET, $($arg)+);
        }
    };
}

type FetchInstall = Shared<BoxFuture<'static, PatchState>>;

enum LayerState {
    Uninitialized,
    Inactive,
    Failed(ConfigurationError),
    Active {
        transport: Arc<dyn Transport>,
        record: Arc<Mutex<PatchRecord>>,
        fetch: FetchInstall,
    },
}

/// Installs one proxy transport into a runtime
pub struct Interceptor {
    runtime: Arc<NetRuntime>,
    factory: Arc<dyn TransportFactory>,
    state: Mutex<LayerState>,
}

impl Interceptor {
    /// Interceptor building real SOCKS5 transports
    pub fn new(runtime: Arc<NetRuntime>) -> Self {
        Self::with_factory(runtime, Arc::new(Socks5Factory))
    }

    /// Interceptor building its transport through `factory`
    pub fn with_factory(runtime: Arc<NetRuntime>, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            runtime,
            factory,
            state: Mutex::new(LayerState::Uninitialized),
        }
    }

    pub fn runtime(&self) -> &Arc<NetRuntime> {
        &self.runtime
    }

    /// Activate the layer from `config`
    ///
    /// Default transports, request and get entry points are patched before
    /// this returns. Fetch installation may still be in flight (reported as
    /// [`PatchState::Pending`]); await [`Interceptor::settled`] for the final
    /// record. Later calls return the outcome of the first one.
    pub fn activate(&self, config: &ProxyConfig) -> ActivationResult {
        let mut state = self.state.lock();

        if matches!(*state, LayerState::Uninitialized) {
            *state = self.initialize(config);
        } else {
            debug_log!(config.debug_log_enabled, "Proxy layer already activated; keeping existing patches");
        }

        Self::snapshot(&state)
    }

    /// Outcome so far, `None` before the first activation
    pub fn result(&self) -> Option<ActivationResult> {
        let state = self.state.lock();
        match *state {
            LayerState::Uninitialized => None,
            _ => Some(Self::snapshot(&state)),
        }
    }

    /// Outcome once fetch installation has finished
    pub async fn settled(&self) -> Option<ActivationResult> {
        let fetch = match &*self.state.lock() {
            LayerState::Active { fetch, .. } => Some(fetch.clone()),
            _ => None,
        };

        if let Some(fetch) = fetch {
            fetch.await;
        }

        self.result()
    }

    /// The shared proxy transport, once built
    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        match &*self.state.lock() {
            LayerState::Active { transport, .. } => Some(Arc::clone(transport)),
            _ => None,
        }
    }

    fn snapshot(state: &LayerState) -> ActivationResult {
        match state {
            LayerState::Uninitialized | LayerState::Inactive => ActivationResult::inactive(),
            LayerState::Failed(e) => ActivationResult::failed(e.clone()),
            LayerState::Active { record, .. } => ActivationResult::from_record(record.lock().clone()),
        }
    }

    fn initialize(&self, config: &ProxyConfig) -> LayerState {
        let debug = config.debug_log_enabled;

        let uri = match config.uri.as_deref() {
            Some(uri) => uri,
            None => {
                debug_log!(debug, "No proxy URI configured; network entry points left untouched");
                return LayerState::Inactive;
            }
        };

        let transport = match ProxyEndpoint::parse(uri).and_then(|endpoint| {
            debug_log!(debug, "Proxy configured: {}", endpoint);
            self.factory.build(&endpoint)
        }) {
            Ok(transport) => transport,
            Err(e) => {
                error!("Proxy setup failed, continuing without proxy: {}", e);
                return LayerState::Failed(e);
            }
        };
        debug_log!(debug, "Proxy transport created: {}", transport.describe());

        let mut record = PatchRecord::new();

        for protocol in Protocol::ALL {
            let state = self.patch_default(protocol, &transport, debug);
            record.set(EntryPoint::default_transport(protocol), state);
        }

        for protocol in Protocol::ALL {
            let entry_point = EntryPoint::request(protocol);
            let state = wrap_handler(self.runtime.request_slot(protocol), entry_point, &transport, debug);
            record.set(entry_point, state);

            let entry_point = EntryPoint::get(protocol);
            let state = wrap_handler(self.runtime.get_slot(protocol), entry_point, &transport, debug);
            record.set(entry_point, state);
        }

        record.set(EntryPoint::Fetch, PatchState::Pending);
        let record = Arc::new(Mutex::new(record));
        let fetch = self.start_fetch_install(&transport, &record, debug);

        LayerState::Active {
            transport,
            record,
            fetch,
        }
    }

    fn patch_default(&self, protocol: Protocol, transport: &Arc<dyn Transport>, debug: bool) -> PatchState {
        let entry_point = EntryPoint::default_transport(protocol);
        let registry = self.runtime.registry();

        if same_transport(&registry.get_default(protocol), transport) {
            debug_log!(debug, "{} already routed through proxy", entry_point);
            return PatchState::Patched;
        }

        match registry.set_default(protocol, Arc::clone(transport)) {
            Ok(_) => {
                debug_log!(debug, "{} patched", entry_point);
                PatchState::Patched
            }
            Err(failure) => {
                debug_log!(debug, "{} not patched: {}", entry_point, failure);
                PatchState::Failed(failure)
            }
        }
    }

    fn start_fetch_install(
        &self,
        transport: &Arc<dyn Transport>,
        record: &Arc<Mutex<PatchRecord>>,
        debug: bool,
    ) -> FetchInstall {
        let install = install_fetch(Arc::clone(&self.runtime), Arc::clone(transport), debug);
        let record = Arc::clone(record);

        let install = async move {
            let state = install.await;
            record.lock().set(EntryPoint::Fetch, state.clone());
            state
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let join = handle.spawn(install);
                async move {
                    match join.await {
                        Ok(state) => state,
                        Err(e) => PatchState::Failed(PatchFailure::Aborted {
                            entry_point: EntryPoint::Fetch,
                            reason: e.to_string(),
                        }),
                    }
                }
                .boxed()
                .shared()
            }
            Err(_) => {
                let state = futures::executor::block_on(install);
                futures::future::ready(state).boxed().shared()
            }
        }
    }
}

fn wrap_handler(
    slot: &Slot<Arc<dyn RequestHandler>>,
    entry_point: EntryPoint,
    transport: &Arc<dyn Transport>,
    debug: bool,
) -> PatchState {
    let outcome = slot.update(|current| {
        if ProxyInjectingRequest::is_installed(current, transport) {
            None
        } else {
            let shim: Arc<dyn RequestHandler> =
                Arc::new(ProxyInjectingRequest::new(Arc::clone(current), Arc::clone(transport)));
            Some(shim)
        }
    });

    match outcome {
        Ok(Some(_)) => {
            debug_log!(debug, "{} patched", entry_point);
            PatchState::Patched
        }
        Ok(None) => {
            debug_log!(debug, "{} already patched", entry_point);
            PatchState::Patched
        }
        Err(failure) => {
            debug_log!(debug, "{} not patched: {}", entry_point, failure);
            PatchState::Failed(failure)
        }
    }
}

/// Pick a fetch implementation and install the forcing shim over it: the
/// proxy-fetch provider module when it loads, else the global fetch
async fn install_fetch(runtime: Arc<NetRuntime>, transport: Arc<dyn Transport>, debug: bool) -> PatchState {
    let provider = runtime.modules().load_fetch_provider(PROXY_FETCH_MODULE).await;
    let slot = runtime.fetch_slot();

    let (base, source) = match provider {
        Some(provider) => (Some(provider), FetchSource::Provider(PROXY_FETCH_MODULE.to_string())),
        None => {
            debug_log!(debug, "Module {} unavailable; falling back to global fetch", PROXY_FETCH_MODULE);
            (slot.get(), FetchSource::Ambient)
        }
    };

    let base = match base {
        Some(base) => base,
        None => {
            debug_log!(debug, "No fetch available in this runtime; skipping fetch patch");
            return PatchState::Unpatched;
        }
    };

    let outcome = slot.update(|current| {
        if let Some(current) = current {
            if TransportForcingFetch::is_installed(current, &transport) {
                return None;
            }
        }
        let shim: Arc<dyn FetchHandler> =
            Arc::new(TransportForcingFetch::new(base, Arc::clone(&transport), source.clone()));
        Some(Some(shim))
    });

    match outcome {
        Ok(Some(_)) => {
            debug_log!(debug, "fetch patched using {}", source);
            PatchState::Patched
        }
        Ok(None) => {
            debug_log!(debug, "fetch already patched");
            PatchState::Patched
        }
        Err(failure) => {
            debug_log!(debug, "fetch not patched: {}", failure);
            PatchState::Failed(failure)
        }
    }
}
