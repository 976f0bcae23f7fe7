//! Domain Layer - Ticker table, merge rules and ordering.
//!
//! Pure types with no I/O. The application layer drives these from a
//! single task so every merge is serialized.

/// Transient bookmark notices with expiry deadlines.
pub mod notice;

/// Search filter over the observed table.
pub mod filter;

/// Sort keys, directions and the row comparator.
pub mod sorting;

/// Ticker table and merge rules.
pub mod table;

/// Ticker entity, upstream fields and currency references.
pub mod ticker;
