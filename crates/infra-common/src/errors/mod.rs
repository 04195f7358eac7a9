/*!
Error Handling

Standardized error type shared by the infrastructure components.
*/

pub mod types;

pub use types::{Error, Result};
