//! Layered configuration: built-in defaults, `.flotilla/*.yaml`, then
//! `FLOTILLA_*` environment variables.

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
