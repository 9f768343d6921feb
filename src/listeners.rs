//! Listener registry.
//!
//! Handlers are stored in an arena of slots, one per `(subscriber, event kind)`
//! pair. Registering again under the same key replaces the handler in place,
//! so a subscriber that re-attaches after a reconnect still fires exactly once
//! per event. Handles carry a generation so a late `deregister` cannot remove
//! a newer registration that reused the slot.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::protocol::{EventKind, ServerEvent};

/// Logical identity of a listener owner (a UI component, a logger, ...).
pub type SubscriberId = String;

/// Callback invoked for each matching inbound event.
pub type Handler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

/// Proof of one registration, used to remove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    index: usize,
    generation: u64,
}

struct Slot {
    subscriber: SubscriberId,
    kind: EventKind,
    generation: u64,
    handler: Handler,
}

#[derive(Default)]
pub struct ListenerRegistry {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    index: HashMap<(SubscriberId, EventKind), usize>,
    next_generation: u64,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("active", &self.len())
            .finish()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `handler` for `kind` on behalf of `subscriber`, replacing any
    /// handler that subscriber already had for that kind.
    pub fn register(
        &mut self,
        subscriber: impl Into<SubscriberId>,
        kind: EventKind,
        handler: Handler,
    ) -> ListenerHandle {
        let subscriber = subscriber.into();
        self.next_generation += 1;
        let generation = self.next_generation;

        let key = (subscriber.clone(), kind);
        if let Some(&index) = self.index.get(&key) {
            if let Some(Some(slot)) = self.slots.get_mut(index) {
                debug!(subscriber = %slot.subscriber, kind = kind.as_str(), "replacing listener");
                slot.generation = generation;
                slot.handler = handler;
                return ListenerHandle { index, generation };
            }
        }

        let slot = Slot {
            subscriber,
            kind,
            generation,
            handler,
        };
        let index = match self.free.pop() {
            Some(index) => {
                if let Some(entry) = self.slots.get_mut(index) {
                    *entry = Some(slot);
                }
                index
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, index);
        ListenerHandle { index, generation }
    }

    /// Remove the registration behind `handle`. Returns `false` if it was
    /// already replaced or removed.
    pub fn deregister(&mut self, handle: ListenerHandle) -> bool {
        let Some(entry) = self.slots.get_mut(handle.index) else {
            return false;
        };
        match entry {
            Some(slot) if slot.generation == handle.generation => {
                self.index.remove(&(slot.subscriber.clone(), slot.kind));
                *entry = None;
                self.free.push(handle.index);
                true
            }
            _ => false,
        }
    }

    /// Remove every registration owned by `subscriber`. Returns how many.
    pub fn deregister_subscriber(&mut self, subscriber: &str) -> usize {
        let handles: Vec<ListenerHandle> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| match entry {
                Some(slot) if slot.subscriber == subscriber => Some(ListenerHandle {
                    index,
                    generation: slot.generation,
                }),
                _ => None,
            })
            .collect();
        handles.into_iter().filter(|h| self.deregister(*h)).count()
    }

    /// Handlers registered for `kind`, cloned so they can be invoked without
    /// holding the registry.
    pub fn handlers_for(&self, kind: EventKind) -> Vec<Handler> {
        self.slots
            .iter()
            .flatten()
            .filter(|slot| slot.kind == kind)
            .map(|slot| Arc::clone(&slot.handler))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Drop every registration.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
    }
}

/// Invoke every handler for `event`'s kind.
pub fn dispatch(handlers: &[Handler], event: &ServerEvent) {
    for handler in handlers {
        handler(event);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::protocol::RoomPendingPayload;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, Handler) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (
            count,
            Arc::new(move |_: &ServerEvent| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    fn pending() -> ServerEvent {
        ServerEvent::RoomPending(RoomPendingPayload::default())
    }

    #[test]
    fn re_registering_replaces_previous_handler() {
        let mut registry = ListenerRegistry::new();
        let (first, h1) = counter();
        let (second, h2) = counter();
        registry.register("board", EventKind::RoomPending, h1);
        registry.register("board", EventKind::RoomPending, h2);

        dispatch(&registry.handlers_for(EventKind::RoomPending), &pending());
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn distinct_subscribers_both_fire() {
        let mut registry = ListenerRegistry::new();
        let (a, ha) = counter();
        let (b, hb) = counter();
        registry.register("board", EventKind::RoomPending, ha);
        registry.register("banner", EventKind::RoomPending, hb);
        dispatch(&registry.handlers_for(EventKind::RoomPending), &pending());
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
        assert!(registry.handlers_for(EventKind::NumberCalled).is_empty());
    }

    #[test]
    fn stale_handle_does_not_remove_replacement() {
        let mut registry = ListenerRegistry::new();
        let (_, h1) = counter();
        let (count, h2) = counter();
        let old = registry.register("board", EventKind::RoomPending, h1);
        let new = registry.register("board", EventKind::RoomPending, h2);

        assert!(!registry.deregister(old));
        dispatch(&registry.handlers_for(EventKind::RoomPending), &pending());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(registry.deregister(new));
        assert!(registry.is_empty());
    }

    #[test]
    fn freed_slot_is_reused_with_new_generation() {
        let mut registry = ListenerRegistry::new();
        let (_, h1) = counter();
        let (_, h2) = counter();
        let old = registry.register("board", EventKind::RoomPending, h1);
        registry.deregister(old);
        let new = registry.register("banner", EventKind::NumberCalled, h2);
        assert_ne!(old, new);
        assert!(!registry.deregister(old));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn deregister_subscriber_removes_all_kinds() {
        let mut registry = ListenerRegistry::new();
        let (_, h) = counter();
        registry.register("board", EventKind::RoomPending, Arc::clone(&h));
        registry.register("board", EventKind::NumberCalled, Arc::clone(&h));
        registry.register("banner", EventKind::NumberCalled, h);
        assert_eq!(registry.deregister_subscriber("board"), 2);
        assert_eq!(registry.len(), 1);
    }
}
