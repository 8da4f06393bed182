//! Notifier chains
//!
//! A chain is an ordered list of listeners invoked synchronously when an
//! event is published. Entries hold weak references: the chain never keeps a
//! listener alive, and entries whose listener was dropped are pruned on the
//! next publish.
//!
//! Callbacks run without the chain lock held, so a listener may register or
//! unregister (itself included) from inside its callback.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

/// Receives events of type `E`
pub trait Listener<E>: Send + Sync {
    fn on_event(&self, event: E);
}

impl<E, F> Listener<E> for F
where
    F: Fn(E) + Send + Sync,
{
    fn on_event(&self, event: E) {
        self(event)
    }
}

/// Handle returned by [`NotifierChain::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

struct Entry<E> {
    id: SubscriberId,
    listener: Weak<dyn Listener<E>>,
}

struct ChainState<E> {
    entries: Vec<Entry<E>>,
    next_id: u64,
}

/// Ordered, synchronous publish/subscribe list
pub struct NotifierChain<E> {
    name: &'static str,
    state: Mutex<ChainState<E>>,
}

impl<E: Copy + std::fmt::Debug> NotifierChain<E> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(ChainState {
                entries: Vec::new(),
                next_id: 1,
            }),
        }
    }

    /// Append a listener. The chain only keeps a weak reference; the caller
    /// owns the `Arc`.
    pub fn register(&self, listener: &Arc<dyn Listener<E>>) -> SubscriberId {
        let mut state = self.state.lock();
        let id = SubscriberId(state.next_id);
        state.next_id += 1;
        state.entries.push(Entry {
            id,
            listener: Arc::downgrade(listener),
        });
        trace!("{}: registered subscriber {}", self.name, id.0);
        id
    }

    /// Remove a listener. Returns `false` if it was not registered, which
    /// includes a second unregister of the same ID.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|e| e.id != id);
        before != state.entries.len()
    }

    /// Invoke every live listener in registration order. Returns how many
    /// listeners ran.
    pub fn notify(&self, event: E) -> usize {
        let live: Vec<Arc<dyn Listener<E>>> = {
            let mut state = self.state.lock();
            state.entries.retain(|e| e.listener.strong_count() > 0);
            state
                .entries
                .iter()
                .filter_map(|e| e.listener.upgrade())
                .collect()
        };

        trace!("{}: {:?} -> {} subscribers", self.name, event, live.len());
        for listener in &live {
            listener.on_event(event);
        }
        live.len()
    }

    /// Number of registered entries, including ones not yet pruned
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
