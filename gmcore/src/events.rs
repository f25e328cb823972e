//! Notifications fanned out to subscribers
//!
//! Each subscriber gets its own mpsc receiver. A subscriber that drops its
//! receiver is pruned on the next publish.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Mutex, PoisonError};

use gmwire::{Channel, FastReply, Firmware, PierSide};

/// Pointing fields from one `Ginfo` sample
#[derive(Debug, Clone, PartialEq)]
pub struct PointingSample {
    pub ra_jnow: f64,
    pub dec_jnow: f64,
    pub az: f64,
    pub alt: f64,
    pub pierside: PierSide,
    pub status: u32,
    pub slewing: bool,
}

impl From<&FastReply> for PointingSample {
    fn from(fast: &FastReply) -> Self {
        Self {
            ra_jnow: fast.ra_jnow,
            dec_jnow: fast.dec_jnow,
            az: fast.az,
            alt: fast.alt,
            pierside: fast.pierside,
            status: fast.status,
            slewing: fast.slewing,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MountEvent {
    /// Fresh pointing sample
    Pointing(PointingSample),
    /// The mount's slewing flag went from 1 to 0
    SlewFinished,
    Connection { channel: Channel, connected: bool },
    /// "Any channel connected" flipped
    AnyConnected(bool),
    FirmwareRead(Firmware),
    ModelNamesRefreshed(usize),
    AlignmentRefreshed { stars: usize, generation: u64 },
    /// The dispatcher has joined every worker
    Stopped,
}

#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<MountEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<MountEvent> {
        let (tx, rx) = channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn publish(&self, event: MountEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_all_subscribers() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.publish(MountEvent::SlewFinished);
        assert_eq!(a.try_recv().unwrap(), MountEvent::SlewFinished);
        assert_eq!(b.try_recv().unwrap(), MountEvent::SlewFinished);
    }

    #[test]
    fn test_dropped_subscriber_pruned() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        drop(bus.subscribe());
        bus.publish(MountEvent::AnyConnected(true));
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(a.try_recv().unwrap(), MountEvent::AnyConnected(true));
    }
}
