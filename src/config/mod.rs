//! Configuration module for Crucible.

mod sandbox;

pub use sandbox::{ConfigError, SandboxConfig};
