// packages/injector/src/interception/record.rs
//! Activation outcome
//!
//! Tracks, per entry point, whether the proxy substitution happened.

use crate::runtime::EntryPoint;
use crate::utils::errors::{ConfigurationError, PatchFailure};
use std::collections::BTreeMap;

/// Substitution state of one entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchState {
    /// Left as the runtime provided it
    Unpatched,

    /// Installation still in flight
    Pending,

    Patched,

    Failed(PatchFailure),
}

impl PatchState {
    pub fn is_patched(&self) -> bool {
        matches!(self, PatchState::Patched)
    }
}

/// Per-entry-point substitution states
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRecord {
    states: BTreeMap<EntryPoint, PatchState>,
}

impl PatchRecord {
    /// Every entry point unpatched
    pub fn new() -> Self {
        Self {
            states: EntryPoint::ALL
                .iter()
                .map(|ep| (*ep, PatchState::Unpatched))
                .collect(),
        }
    }

    pub fn get(&self, entry_point: EntryPoint) -> &PatchState {
        self.states
            .get(&entry_point)
            .unwrap_or(&PatchState::Unpatched)
    }

    pub fn set(&mut self, entry_point: EntryPoint, state: PatchState) {
        self.states.insert(entry_point, state);
    }

    pub fn patched(&self) -> Vec<EntryPoint> {
        self.states
            .iter()
            .filter(|(_, state)| state.is_patched())
            .map(|(ep, _)| *ep)
            .collect()
    }

    pub fn failed(&self) -> Vec<(EntryPoint, PatchFailure)> {
        self.states
            .iter()
            .filter_map(|(ep, state)| match state {
                PatchState::Failed(failure) => Some((*ep, failure.clone())),
                _ => None,
            })
            .collect()
    }

    /// No installation is still in flight
    pub fn is_settled(&self) -> bool {
        !self.states.values().any(|s| matches!(s, PatchState::Pending))
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntryPoint, &PatchState)> {
        self.states.iter().map(|(ep, state)| (*ep, state))
    }
}

impl Default for PatchRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Overall state of the interception layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerStatus {
    /// No proxy configured, or no default transport could be replaced
    Inactive,

    /// Requests that name no transport go through the proxy
    Active,

    /// The proxy transport could not be built; nothing was patched
    Failed(ConfigurationError),
}

/// What `activate` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationResult {
    pub status: LayerStatus,
    pub record: PatchRecord,
}

impl ActivationResult {
    pub fn inactive() -> Self {
        Self {
            status: LayerStatus::Inactive,
            record: PatchRecord::new(),
        }
    }

    pub fn failed(error: ConfigurationError) -> Self {
        Self {
            status: LayerStatus::Failed(error),
            record: PatchRecord::new(),
        }
    }

    /// Derive the status from what got patched
    pub fn from_record(record: PatchRecord) -> Self {
        let active = record.get(EntryPoint::DefaultTransportPlain).is_patched()
            || record.get(EntryPoint::DefaultTransportSecure).is_patched();

        Self {
            status: if active {
                LayerStatus::Active
            } else {
                LayerStatus::Inactive
            },
            record,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == LayerStatus::Active
    }

    pub fn configuration_error(&self) -> Option<&ConfigurationError> {
        match &self.status {
            LayerStatus::Failed(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_unpatched() {
        let record = PatchRecord::new();
        assert!(record.patched().is_empty());
        assert!(record.failed().is_empty());
        assert!(record.is_settled());
        assert_eq!(record.iter().count(), EntryPoint::ALL.len());
    }

    #[test]
    fn test_pending_is_not_settled() {
        let mut record = PatchRecord::new();
        record.set(EntryPoint::Fetch, PatchState::Pending);
        assert!(!record.is_settled());
    }

    #[test]
    fn test_status_follows_default_transports() {
        let mut record = PatchRecord::new();
        record.set(EntryPoint::RequestPlain, PatchState::Patched);
        assert_eq!(ActivationResult::from_record(record.clone()).status, LayerStatus::Inactive);

        record.set(EntryPoint::DefaultTransportSecure, PatchState::Patched);
        record.set(
            EntryPoint::DefaultTransportPlain,
            PatchState::Failed(PatchFailure::Sealed(EntryPoint::DefaultTransportPlain)),
        );
        let result = ActivationResult::from_record(record);
        assert!(result.is_active());
        assert_eq!(result.record.failed().len(), 1);
    }

    #[test]
    fn test_failed_result_carries_error() {
        let result = ActivationResult::failed(ConfigurationError::UnsupportedScheme("http".into()));
        assert!(!result.is_active());
        assert!(result.configuration_error().is_some());
        assert!(result.record.patched().is_empty());
    }
}
