/*!
Switchboard Infrastructure Common

This crate provides the shared infrastructure used by the routing core:

- Event bus for publishing and subscribing to typed notifications
- Logging setup on top of `tracing-subscriber`
- Layered configuration loading (file + environment)
- Common error types
*/

pub mod config;
pub mod errors;
pub mod events;
pub mod logging;

pub use errors::{Error, Result};
pub use events::{Event, EventBus, EventPriority, Publisher, Subscriber};
