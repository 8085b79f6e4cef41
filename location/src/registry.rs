use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_channel::{Receiver, Sender, unbounded};
use log::{debug, warn};

use crate::{LocationUpdate, Subscription, SubscriptionId};

/// Maps FFI handles to the sending half of each live subscription.
///
/// Platform callbacks arrive on OS-owned threads with nothing but a numeric
/// handle; the registry routes them to the right channel. Closing an entry
/// drops its sender, which ends the subscriber's stream once it has drained,
/// and wakes every [`close_signal`](Self::close_signal) for that handle.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    next_handle: AtomicU64,
    senders: Mutex<HashMap<SubscriptionId, Entry>>,
}

#[derive(Debug)]
struct Entry {
    updates: Sender<LocationUpdate>,
    // Never sent on; closing it wakes every `closed` receiver.
    closing: Sender<()>,
    closed: Receiver<()>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry. Handles start at 1 so 0 can mean "none" across FFI.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            senders: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a handle and its channel.
    pub fn open(&self) -> Subscription {
        let id = SubscriptionId(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let (updates, receiver) = unbounded();
        let (closing, closed) = unbounded();
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                Entry {
                    updates,
                    closing,
                    closed,
                },
            );
        Subscription::new(id, receiver)
    }

    /// Route an update to its subscriber.
    ///
    /// Returns `false` if the handle is unknown or its receiver is gone.
    pub fn deliver(&self, id: SubscriptionId, update: LocationUpdate) -> bool {
        let sender = {
            let senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
            senders.get(&id).map(|entry| entry.updates.clone())
        };

        let Some(sender) = sender else {
            debug!("dropping location update for closed subscription {id}");
            return false;
        };

        if let Err(err) = sender.try_send(update) {
            warn!("dropping location update for subscription {id}: {err}");
            return false;
        }
        true
    }

    /// Close a subscription. Returns `false` if it was not open.
    pub fn close(&self, id: SubscriptionId) -> bool {
        let entry = self
            .senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        entry.is_some_and(|entry| entry.closing.close())
    }

    /// A receiver that ends once `id` is closed.
    ///
    /// `recv()` on it never yields a value; it returns an error as soon as the
    /// subscription is closed, or right away if `id` is not open.
    #[must_use]
    pub fn close_signal(&self, id: SubscriptionId) -> Receiver<()> {
        let senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        match senders.get(&id) {
            Some(entry) => entry.closed.clone(),
            None => unbounded().1,
        }
    }

    /// Whether a subscription is still open.
    #[must_use]
    pub fn is_open(&self, id: SubscriptionId) -> bool {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    /// Number of open subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no subscription is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
