// packages/injector/src/runtime/registry.rs
//! Default transport registry
//!
//! Holds the transport used by any request that does not pick one itself,
//! separately for the plain and secure protocols. Also provides [`Slot`],
//! the replaceable cell every runtime entry point lives in.

use super::{EntryPoint, Protocol};
use crate::transport::{DirectTransport, Transport};
use crate::utils::errors::PatchFailure;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Replaceable, sealable cell holding one entry point implementation
pub(crate) struct Slot<T: Clone> {
    entry_point: EntryPoint,
    value: RwLock<T>,
    sealed: AtomicBool,
}

impl<T: Clone> Slot<T> {
    pub(crate) fn new(entry_point: EntryPoint, value: T) -> Self {
        Self {
            entry_point,
            value: RwLock::new(value),
            sealed: AtomicBool::new(false),
        }
    }

    pub(crate) fn get(&self) -> T {
        self.value.read().clone()
    }

    /// Replace the value, returning the previous one
    pub(crate) fn replace(&self, next: T) -> Result<T, PatchFailure> {
        if self.is_sealed() {
            return Err(PatchFailure::Sealed(self.entry_point));
        }

        Ok(std::mem::replace(&mut *self.value.write(), next))
    }

    /// Compute a replacement from the current value under the write lock.
    /// Returns the previous value when `f` produced a replacement.
    pub(crate) fn update<F>(&self, f: F) -> Result<Option<T>, PatchFailure>
    where
        F: FnOnce(&T) -> Option<T>,
    {
        if self.is_sealed() {
            return Err(PatchFailure::Sealed(self.entry_point));
        }

        let mut guard = self.value.write();
        match f(&guard) {
            Some(next) => Ok(Some(std::mem::replace(&mut *guard, next))),
            None => Ok(None),
        }
    }

    pub(crate) fn seal(&self) {
        debug!("Sealing {}", self.entry_point);
        self.sealed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }
}

/// Access to the runtime's default transports
pub trait TransportRegistry: Send + Sync {
    /// Transport used when a request names none
    fn get_default(&self, protocol: Protocol) -> Arc<dyn Transport>;

    /// Replace the default transport, returning the previous one
    fn set_default(
        &self,
        protocol: Protocol,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<dyn Transport>, PatchFailure>;

    /// Refuse any further replacement of the default for `protocol`
    fn seal(&self, protocol: Protocol);
}

/// The runtime's built-in registry
pub struct DefaultTransports {
    plain: Slot<Arc<dyn Transport>>,
    secure: Slot<Arc<dyn Transport>>,
}

impl DefaultTransports {
    /// Registry whose defaults connect directly
    pub fn new() -> Self {
        Self::with_transports(Arc::new(DirectTransport::new()), Arc::new(DirectTransport::new()))
    }

    pub fn with_transports(plain: Arc<dyn Transport>, secure: Arc<dyn Transport>) -> Self {
        Self {
            plain: Slot::new(EntryPoint::DefaultTransportPlain, plain),
            secure: Slot::new(EntryPoint::DefaultTransportSecure, secure),
        }
    }

    fn slot(&self, protocol: Protocol) -> &Slot<Arc<dyn Transport>> {
        match protocol {
            Protocol::Plain => &self.plain,
            Protocol::Secure => &self.secure,
        }
    }
}

impl Default for DefaultTransports {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportRegistry for DefaultTransports {
    fn get_default(&self, protocol: Protocol) -> Arc<dyn Transport> {
        self.slot(protocol).get()
    }

    fn set_default(
        &self,
        protocol: Protocol,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<dyn Transport>, PatchFailure> {
        let description = transport.describe();
        let previous = self.slot(protocol).replace(transport)?;
        debug!("Default {} transport set to {}", protocol, description);
        Ok(previous)
    }

    fn seal(&self, protocol: Protocol) {
        self.slot(protocol).seal();
    }
}
