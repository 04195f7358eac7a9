use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::events::types::{Event, EventType};

/// Type-erased broadcast sender
pub trait AnyBroadcastSender: Send + Sync + Debug + Any {
    fn receiver_count(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
}

/// Typed broadcast sender for a specific event type
pub type TypedBroadcastSender<E> = broadcast::Sender<Arc<E>>;

/// Typed broadcast receiver for a specific event type
pub type TypedBroadcastReceiver<E> = broadcast::Receiver<Arc<E>>;

impl<E: Event> AnyBroadcastSender for TypedBroadcastSender<E> {
    fn receiver_count(&self) -> usize {
        broadcast::Sender::receiver_count(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Registry for type-specific broadcast channels
#[derive(Debug)]
pub struct TypeRegistry {
    /// Map from event type to type-erased broadcast sender
    channels: DashMap<EventType, Box<dyn AnyBroadcastSender>>,
    /// Default channel capacity
    capacity: usize,
}

impl TypeRegistry {
    /// Create a new type registry with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Get or create a broadcast sender for a specific event type
    pub fn get_or_create<E: Event>(&self) -> TypedBroadcastSender<E> {
        let event_type = E::event_type();

        // Holding the entry guard makes lookup and creation atomic per type
        let existing = {
            let entry = self.channels.entry(event_type).or_insert_with(|| {
                let (tx, _) = broadcast::channel::<Arc<E>>(self.capacity);
                Box::new(tx) as Box<dyn AnyBroadcastSender>
            });
            entry.value().as_any().downcast_ref::<TypedBroadcastSender<E>>().cloned()
        };

        if let Some(sender) = existing {
            return sender;
        }

        // Two event types share a name; keep the newest registration
        tracing::error!("Type registry contains wrong type for {}", event_type);
        let (tx, _) = broadcast::channel::<Arc<E>>(self.capacity);
        self.channels.insert(event_type, Box::new(tx.clone()));
        tx
    }

    /// Number of live receivers for an event type
    pub fn receiver_count<E: Event>(&self) -> usize {
        self.channels
            .get(E::event_type())
            .map(|entry| entry.value().receiver_count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Tick;

    impl Event for Tick {
        fn event_type() -> EventType {
            "test.tick"
        }
    }

    #[test]
    fn test_one_channel_per_event_type() {
        let registry = TypeRegistry::new(4);
        assert_eq!(registry.receiver_count::<Tick>(), 0);

        let _first = registry.get_or_create::<Tick>().subscribe();
        let _second = registry.get_or_create::<Tick>().subscribe();
        assert_eq!(registry.receiver_count::<Tick>(), 2);
    }
}
