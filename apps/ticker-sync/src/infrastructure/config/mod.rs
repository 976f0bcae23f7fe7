//! Configuration Module
//!
//! Environment-driven configuration for the synchronizer service.

mod settings;

pub use settings::{ConfigError, EndpointSettings, PollSettings, StreamSettings, SyncConfig};
