/*!
Event System

Typed publish/subscribe for inter-component notifications. Every event type
gets its own broadcast channel inside an [`EventBus`]; any component can
publish and any number of collaborators can subscribe. Publishing never
waits for subscribers.
*/

pub mod bus;
pub mod registry;
pub mod types;

pub use bus::{EventBus, EventBusConfig, Publisher, Subscriber};
pub use registry::TypeRegistry;
pub use types::{Event, EventError, EventPriority, EventResult, EventType};
