/*!
Configuration System

Layered configuration loading: an optional file (TOML, YAML or JSON by
extension) overridden by prefixed environment variables.
*/

pub mod loader;

pub use loader::ConfigLoader;
