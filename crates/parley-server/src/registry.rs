//! Live call sessions, keyed by call id.
//!
//! Calls run on a multi-threaded runtime, so both maps sit behind locks.
//! Every lock is held only for a map operation and never across an `.await`,
//! which keeps `std::sync::RwLock` safe here and cheaper than the tokio one.

use crate::connection::LiveConnection;
use parley_agent::ConversationContext;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Conversation state shared between the relay task and signaling handlers.
pub type SharedContext = Arc<tokio::sync::Mutex<ConversationContext>>;

/// A keyed store with no eviction policy of its own.
#[derive(Debug)]
pub struct SessionMap<V> {
    entries: RwLock<HashMap<String, V>>,
}

impl<V> Default for SessionMap<V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V: Clone> SessionMap<V> {
    /// Inserts `value`, returning whatever it replaced.
    pub fn register(&self, call_id: impl Into<String>, value: V) -> Option<V> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(call_id.into(), value)
    }

    /// Returns the existing entry, or inserts the one built by `make`.
    pub fn get_or_insert_with(&self, call_id: &str, make: impl FnOnce() -> V) -> V {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(call_id.to_string())
            .or_insert_with(make)
            .clone()
    }

    pub fn get(&self, call_id: &str) -> Option<V> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(call_id)
            .cloned()
    }

    pub fn remove(&self, call_id: &str) -> Option<V> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(call_id)
    }

    /// Removes the entry only if `matches` accepts it.
    pub fn remove_if(&self, call_id: &str, matches: impl FnOnce(&V) -> bool) -> Option<V> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.get(call_id).is_some_and(matches) {
            entries.remove(call_id)
        } else {
            None
        }
    }

    /// Registered ids in sorted order.
    pub fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn count(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn snapshot(&self) -> Vec<(String, V)> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, value)| (id.clone(), value.clone()))
            .collect()
    }
}

/// Per-call engine state and transport state, kept side by side.
///
/// The media relay and the conversation service are the only writers. A call
/// id present in one map must be present in the other until its teardown
/// finishes.
#[derive(Debug, Default)]
pub struct CallSessionRegistry {
    pub contexts: SessionMap<SharedContext>,
    pub connections: SessionMap<LiveConnection>,
}

impl CallSessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}
