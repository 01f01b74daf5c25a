//! Auth-change event delivery.
//!
//! Subscriptions are explicit handles over an unbounded channel. Tearing a
//! subscription down consumes the handle, so a double-unsubscribe cannot be
//! written; the registry tracks live subscriber count so callers can assert
//! the single-subscription invariant.

use crate::session::AuthEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// A live auth-change subscription.
///
/// Events are queued in arrival order and drained one at a time by the
/// consumer, never delivered re-entrantly.
pub struct AuthSubscription {
    id: u64,
    receiver: UnboundedReceiver<AuthEvent>,
}

impl AuthSubscription {
    /// Registry-assigned subscription id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event. Returns `None` once the registry is gone.
    pub async fn next_event(&mut self) -> Option<AuthEvent> {
        self.receiver.recv().await
    }

    /// Drain one already-queued event without waiting.
    pub fn try_next(&mut self) -> Option<AuthEvent> {
        self.receiver.try_recv().ok()
    }
}

/// Registry of auth-change subscribers.
#[derive(Default)]
pub struct AuthEventRegistry {
    subscribers: Mutex<HashMap<u64, UnboundedSender<AuthEvent>>>,
    next_id: AtomicU64,
}

impl AuthEventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> AuthSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().insert(id, sender);
        AuthSubscription { id, receiver }
    }

    /// Remove a subscriber. Consumes the handle.
    pub fn unsubscribe(&self, subscription: AuthSubscription) {
        self.subscribers.lock().unwrap().remove(&subscription.id);
    }

    /// Number of live subscriptions.
    pub fn active_subscriptions(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Deliver an event to every live subscriber.
    pub fn emit(&self, event: AuthEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        // A closed receiver means the subscriber was dropped without
        // unsubscribing; prune it here.
        subscribers.retain(|_, sender| sender.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_and_unsubscribe_track_count() {
        let registry = AuthEventRegistry::new();
        assert_eq!(registry.active_subscriptions(), 0);

        let sub = registry.subscribe();
        assert_eq!(registry.active_subscriptions(), 1);

        registry.unsubscribe(sub);
        assert_eq!(registry.active_subscriptions(), 0);
    }

    #[test]
    fn test_emit_reaches_subscriber_in_order() {
        let registry = AuthEventRegistry::new();
        let mut sub = registry.subscribe();

        registry.emit(AuthEvent::recovery_requested());
        registry.emit(AuthEvent::signed_out());

        let first = sub.try_next().unwrap();
        let second = sub.try_next().unwrap();
        assert_eq!(first.change, crate::AuthChange::RecoveryRequested);
        assert_eq!(second.change, crate::AuthChange::SignedOut);
        assert!(sub.try_next().is_none());
    }

    #[test]
    fn test_emit_prunes_dropped_subscribers() {
        let registry = AuthEventRegistry::new();
        let sub = registry.subscribe();
        drop(sub);

        registry.emit(AuthEvent::signed_out());
        assert_eq!(registry.active_subscriptions(), 0);
    }

    #[test]
    fn test_subscription_ids_are_distinct() {
        let registry = AuthEventRegistry::new();
        let a = registry.subscribe();
        let b = registry.subscribe();
        assert_ne!(a.id(), b.id());
    }
}
