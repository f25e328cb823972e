//! Handles shared by every worker thread

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use gmwire::{Channel, MountError};
use log::info;

use crate::events::{EventBus, MountEvent};
use crate::providers::{NoTransform, TransformProvider};
use crate::store::DataStore;

/// Interruptible sleep shared between a worker and whoever stops it
#[derive(Debug, Default)]
pub struct StopSignal {
    lock: Mutex<bool>,
    cvar: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        *self.lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cvar.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for `timeout` or until stopped. Returns true when stopped.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .cvar
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    /// Block until stopped
    pub fn wait(&self) {
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _guard = self
            .cvar
            .wait_while(guard, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// Store, event bus and transform provider, cloned into every loop
#[derive(Clone)]
pub struct CoreContext {
    pub store: Arc<DataStore>,
    pub bus: Arc<EventBus>,
    pub transform: Arc<dyn TransformProvider>,
}

impl CoreContext {
    pub fn new() -> Self {
        Self {
            store: Arc::new(DataStore::new()),
            bus: Arc::new(EventBus::new()),
            transform: Arc::new(NoTransform),
        }
    }

    pub fn with_transform(mut self, transform: Arc<dyn TransformProvider>) -> Self {
        self.transform = transform;
        self
    }

    /// Record the outcome of one exchange on `channel` and republish any
    /// change of the connected bits
    pub fn record_exchange(
        &self,
        channel: Channel,
        endpoint: &str,
        connected: bool,
        error: Option<&MountError>,
    ) {
        let change = self
            .store
            .set_connection(channel, connected, endpoint, error.map(|e| e.to_string()));
        if change.channel_changed {
            info!(
                "{} channel {}",
                channel,
                if connected { "connected" } else { "disconnected" }
            );
            self.bus.publish(MountEvent::Connection { channel, connected });
        }
        if let Some(any) = change.any_connected {
            self.bus.publish(MountEvent::AnyConnected(any));
        }
    }

    pub fn record_disconnected(&self, channel: Channel, endpoint: &str) {
        self.record_exchange(channel, endpoint, false, None);
    }
}

impl Default for CoreContext {
    fn default() -> Self {
        Self::new()
    }
}
