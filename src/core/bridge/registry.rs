//! Per-process registry of active call bridges.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use super::state::{BridgeReport, CallBridge};

/// Active bridges keyed by connection id.
///
/// Owned by the application state and cloned into each connection handler.
#[derive(Clone, Default)]
pub struct CallRegistry {
    calls: Arc<DashMap<Uuid, Arc<CallBridge>>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `bridge` until the returned guard is dropped.
    #[must_use = "the bridge is unregistered when the guard is dropped"]
    pub fn register(&self, bridge: Arc<CallBridge>) -> RegistryGuard {
        let connection_id = bridge.connection_id();
        self.calls.insert(connection_id, bridge);
        tracing::debug!(%connection_id, active = self.calls.len(), "Registered call bridge");
        RegistryGuard {
            calls: self.calls.clone(),
            connection_id,
        }
    }

    pub fn get(&self, connection_id: &Uuid) -> Option<Arc<CallBridge>> {
        self.calls.get(connection_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Reports for every active bridge, in no particular order.
    pub fn snapshot(&self) -> Vec<BridgeReport> {
        self.calls.iter().map(|entry| entry.value().report()).collect()
    }
}

/// Removes its bridge from the registry on drop.
pub struct RegistryGuard {
    calls: Arc<DashMap<Uuid, Arc<CallBridge>>>,
    connection_id: Uuid,
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        self.calls.remove(&self.connection_id);
        tracing::debug!(connection_id = %self.connection_id, "Unregistered call bridge");
    }
}
