//! Inbound URL delivery.
//!
//! The OS-level link dispatcher is abstracted behind `LinkSource`; the
//! registry mirrors the auth gateway's subscription shape so both listeners
//! share the same explicit attach/detach lifecycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// A live inbound-URL subscription.
pub struct LinkSubscription {
    id: u64,
    receiver: UnboundedReceiver<String>,
}

impl LinkSubscription {
    /// Registry-assigned subscription id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next inbound URL. Returns `None` once the source is gone.
    pub async fn next_url(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    /// Drain one already-queued URL without waiting.
    pub fn try_next(&mut self) -> Option<String> {
        self.receiver.try_recv().ok()
    }
}

/// Registry of inbound-URL subscribers.
#[derive(Default)]
pub struct LinkRegistry {
    subscribers: Mutex<HashMap<u64, UnboundedSender<String>>>,
    next_id: AtomicU64,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> LinkSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().insert(id, sender);
        LinkSubscription { id, receiver }
    }

    /// Remove a subscriber. Consumes the handle.
    pub fn unsubscribe(&self, subscription: LinkSubscription) {
        self.subscribers.lock().unwrap().remove(&subscription.id);
    }

    /// Number of live subscriptions.
    pub fn active_subscriptions(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Deliver an inbound URL to every live subscriber.
    pub fn dispatch(&self, url: &str) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|_, sender| sender.send(url.to_string()).is_ok());
    }
}

/// OS-level mechanism delivering the launch URL and subsequent inbound URLs.
#[allow(async_fn_in_trait)]
pub trait LinkSource {
    /// URL that launched the process, if any. Queried once at startup.
    async fn launch_url(&self) -> Option<String>;

    /// Subscribe to inbound URLs delivered while running.
    fn subscribe(&self) -> LinkSubscription;

    /// Tear down a subscription. Consumes the handle, so a subscription
    /// cannot be torn down twice.
    fn unsubscribe(&self, subscription: LinkSubscription);
}
