/*!
Logging

Standardized `tracing` subscriber setup for switchboard processes and tests.
*/

pub mod setup;

pub use setup::{parse_log_level, setup_logging, LogFormat, LoggingConfig};
