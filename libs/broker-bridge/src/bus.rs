use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::BusError;

// ═══════════════════════════════════════════════════════════════
//  Subscription
// ═══════════════════════════════════════════════════════════════

/// Receiving side of one bus subscriber.
///
/// `recv()` yields every item published while subscribed, in publish order,
/// then `None` once the bus is closed. `None` is the completion signal and is
/// observed exactly once per subscription; later calls keep returning `None`.
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Non-blocking receive. `None` when nothing is buffered.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

// ═══════════════════════════════════════════════════════════════
//  ObserverBus
// ═══════════════════════════════════════════════════════════════

struct BusState<T> {
    next_id: u64,
    subscribers: BTreeMap<u64, mpsc::UnboundedSender<T>>,
    closed: bool,
}

/// In-process multicast channel.
///
/// Every subscriber present at publish time receives the item exactly once.
/// Delivery is unbounded: a slow subscriber buffers, it never loses items.
pub struct ObserverBus<T> {
    state: Mutex<BusState<T>>,
}

impl<T: Clone + Send + 'static> Default for ObserverBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> ObserverBus<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BusState {
                next_id: 0,
                subscribers: BTreeMap::new(),
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusState<T>> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("observer bus lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Register a subscriber. On a closed bus the subscription completes immediately.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        if !state.closed {
            state.subscribers.insert(id, tx);
        }
        Subscription { id, rx }
    }

    /// Callback-style subscription driven by a spawned task.
    ///
    /// The returned handle resolves after the completion signal has been
    /// observed. Must be called from within a tokio runtime.
    pub fn for_each<F>(&self, mut on_next: F) -> JoinHandle<()>
    where
        F: FnMut(T) + Send + 'static,
    {
        let mut sub = self.subscribe();
        tokio::spawn(async move {
            while let Some(item) = sub.recv().await {
                on_next(item);
            }
        })
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        self.lock().subscribers.remove(&id).is_some()
    }

    /// Deliver `item` to every current subscriber. Returns the number reached.
    pub fn publish(&self, item: T) -> Result<usize, BusError> {
        let mut state = self.lock();
        if state.closed {
            return Err(BusError::Closed);
        }
        // Dropped subscriptions are pruned lazily.
        state.subscribers.retain(|_, tx| tx.send(item.clone()).is_ok());
        Ok(state.subscribers.len())
    }

    /// Signal completion to all subscribers. Returns `false` if already closed.
    pub fn close(&self) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        state.subscribers.clear();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}
