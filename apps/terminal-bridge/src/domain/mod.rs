//! Domain Layer - Terminal records and streaming types.
//!
//! Plain data types with serialization support. Nothing here performs I/O.

/// Typed records returned by terminal commands.
pub mod records;

/// Stream task keys and updates.
pub mod streaming;
