//! Application Layer - Use cases and port definitions.
//!
//! Holds the synchronizer that owns the ticker table and the ports it
//! depends on.

/// Port interfaces for external systems (bookmark storage).
pub mod ports;

/// Application services: table synchronization and feed wiring.
pub mod services;
