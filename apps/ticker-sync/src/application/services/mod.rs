//! Application Services
//!
//! - `SyncHandle`: serialized owner of the ticker table
//! - `SyncEngine`: drives the feed's streams into the synchronizer

pub mod engine;
pub mod synchronizer;

pub use engine::{EngineError, EngineSettings, SyncEngine};
pub use synchronizer::{SyncError, SyncHandle, SyncSettings, TableEvent, TableView};
