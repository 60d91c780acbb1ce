//! Application Services
//!
//! - `StreamTaskManager`: runs keyed periodic fetch loops

/// Keyed periodic fetch loops.
pub mod stream_tasks;

pub use stream_tasks::{StreamTaskError, StreamTaskManager, StreamTaskStats, new_request_id};
