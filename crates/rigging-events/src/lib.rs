//! Name-keyed event dispatch for rigging script hosts
//!
//! Handlers are registered under an event name and run synchronously, in
//! registration order, on the thread that posts the event. The bus is generic
//! over the payload so the host side and the script side can each pick their
//! own event type without this crate depending on either.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// A registered event handler
pub type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Identifies one registration, for later removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

/// Multi-listener dispatch table keyed by event name
pub struct EventBus<E> {
    handlers: RwLock<HashMap<String, Vec<(HandlerId, Handler<E>)>>>,
    next_id: AtomicU64,
}

impl<E> EventBus<E> {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a handler for the named event
    pub fn listen<F>(&self, name: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let name = name.into();
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(target: "events", "Registering handler {:?} for '{}'", id, name);
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Unregister the handlers with the given ids, returning how many were found
    pub fn remove<I>(&self, ids: I) -> usize
    where
        I: IntoIterator<Item = HandlerId>,
    {
        let ids: HashSet<HandlerId> = ids.into_iter().collect();
        if ids.is_empty() {
            return 0;
        }

        let mut guard = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        for list in guard.values_mut() {
            let before = list.len();
            list.retain(|(id, _)| !ids.contains(id));
            removed += before - list.len();
        }
        guard.retain(|_, list| !list.is_empty());
        removed
    }

    /// Post an event to every handler registered under `name`
    ///
    /// The handler list is snapshotted before dispatch, so handlers that register
    /// further handlers only affect later posts. A panicking handler is logged and
    /// does not prevent the remaining handlers from running.
    ///
    /// Returns the number of handlers invoked.
    pub fn post(&self, name: &str, event: &E) -> usize {
        let handlers: Vec<Handler<E>> = {
            let guard = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
            match guard.get(name) {
                Some(list) => list.iter().map(|(_, handler)| handler.clone()).collect(),
                None => return 0,
            }
        };

        for handler in &handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!(target: "events", "Handler for '{}' panicked", name);
            }
        }

        handlers.len()
    }

    /// Number of handlers registered for `name`
    pub fn handler_count(&self, name: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map_or(0, Vec::len)
    }

    /// Names that currently have at least one handler, sorted
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Returns true if no handlers are registered
    pub fn is_empty(&self) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .all(Vec::is_empty)
    }

    /// Remove every registered handler
    pub fn clear(&self) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<&str, usize> = guard
            .iter()
            .map(|(name, list)| (name.as_str(), list.len()))
            .collect();
        f.debug_struct("EventBus").field("handlers", &counts).finish()
    }
}
