use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{trace, warn};

use crate::events::registry::{TypeRegistry, TypedBroadcastReceiver, TypedBroadcastSender};
use crate::events::types::{Event, EventError, EventResult};

/// Configuration for an [`EventBus`]
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Capacity of each per-type broadcast channel
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// Fan-out dispatcher for typed events.
///
/// Cloning the bus is cheap and every clone shares the same channels, so a
/// single bus can be handed to every component that publishes or subscribes.
#[derive(Debug, Clone)]
pub struct EventBus {
    registry: Arc<TypeRegistry>,
}

impl EventBus {
    /// Create a new event bus with the default configuration
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Create a new event bus with a custom configuration
    pub fn with_config(config: EventBusConfig) -> Self {
        Self {
            registry: Arc::new(TypeRegistry::new(config.channel_capacity)),
        }
    }

    /// Publish an event to every current subscriber.
    ///
    /// Returns the number of subscribers that received the event. Having no
    /// subscribers is not an error.
    pub fn publish<E: Event>(&self, event: E) -> usize {
        let sender = self.registry.get_or_create::<E>();
        match sender.send(Arc::new(event)) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!("No subscribers for {}", E::event_type());
                0
            }
        }
    }

    /// Create a publisher bound to one event type
    pub fn publisher<E: Event>(&self) -> Publisher<E> {
        Publisher {
            sender: self.registry.get_or_create::<E>(),
            _phantom: PhantomData,
        }
    }

    /// Subscribe to an event type. Only events published after this call are seen.
    pub fn subscribe<E: Event>(&self) -> Subscriber<E> {
        Subscriber {
            receiver: self.registry.get_or_create::<E>().subscribe(),
        }
    }

    /// Number of live subscribers for an event type
    pub fn subscriber_count<E: Event>(&self) -> usize {
        self.registry.receiver_count::<E>()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Publisher for a specific event type
#[derive(Debug, Clone)]
pub struct Publisher<E: Event> {
    sender: TypedBroadcastSender<E>,
    _phantom: PhantomData<E>,
}

impl<E: Event> Publisher<E> {
    /// Publish an event; never blocks and never fails for lack of subscribers
    pub fn publish(&self, event: E) -> usize {
        self.sender.send(Arc::new(event)).unwrap_or(0)
    }

    /// Subscribe to the same channel this publisher writes to
    pub fn subscribe(&self) -> Subscriber<E> {
        Subscriber {
            receiver: self.sender.subscribe(),
        }
    }
}

/// Subscriber for a specific event type
#[derive(Debug)]
pub struct Subscriber<E: Event> {
    receiver: TypedBroadcastReceiver<E>,
}

impl<E: Event> Subscriber<E> {
    /// Wait for the next event.
    ///
    /// A subscriber that falls behind skips the events it missed and keeps
    /// going; only a closed channel is reported as an error.
    pub async fn recv(&mut self) -> EventResult<Arc<E>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Ok(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Subscriber for {} lagged, skipped {} events", E::event_type(), skipped);
                }
                Err(RecvError::Closed) => {
                    return Err(EventError::ChannelClosed(E::event_type().to_string()));
                }
            }
        }
    }

    /// Take the next event if one is already buffered
    pub fn try_recv(&mut self) -> Option<Arc<E>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("Subscriber for {} lagged, skipped {} events", E::event_type(), skipped);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drain every buffered event
    pub fn drain(&mut self) -> Vec<Arc<E>> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }
}
