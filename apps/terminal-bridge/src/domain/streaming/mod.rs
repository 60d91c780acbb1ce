//! Streaming Types
//!
//! Keys and updates exchanged between periodic stream tasks and their
//! consumer.

use chrono::{DateTime, Utc};
use serde::Serialize;

// =============================================================================
// Keys
// =============================================================================

/// Composite key addressing one stream task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StreamKey {
    /// Instrument symbol the task polls.
    pub symbol: String,
    /// Request the task belongs to.
    pub request_id: String,
}

impl StreamKey {
    /// Create a key.
    #[must_use]
    pub fn new(symbol: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            request_id: request_id.into(),
        }
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.symbol, self.request_id)
    }
}

// =============================================================================
// Updates
// =============================================================================

/// Result of one stream tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StreamPayload<T> {
    /// A fetched value.
    Data(T),
    /// The fetch failed; the task keeps running.
    Error(String),
}

impl<T> StreamPayload<T> {
    /// Whether this payload carries data.
    #[must_use]
    pub const fn is_data(&self) -> bool {
        matches!(self, Self::Data(_))
    }

    /// The data, if any.
    #[must_use]
    pub const fn data(&self) -> Option<&T> {
        match self {
            Self::Data(value) => Some(value),
            Self::Error(_) => None,
        }
    }
}

/// One message delivered to a stream sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamUpdate<T> {
    /// Request the update belongs to.
    pub request_id: String,
    /// Symbol, when the update is tied to one.
    pub symbol: Option<String>,
    /// Fetched value or error.
    pub payload: StreamPayload<T>,
    /// When the update was produced.
    pub produced_at: DateTime<Utc>,
}

impl<T> StreamUpdate<T> {
    /// Create an update for a task key.
    #[must_use]
    pub fn for_key(key: &StreamKey, payload: StreamPayload<T>) -> Self {
        Self {
            request_id: key.request_id.clone(),
            symbol: Some(key.symbol.clone()),
            payload,
            produced_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_display_joins_symbol_and_request() {
        let key = StreamKey::new("EURUSD", "req1");
        assert_eq!(key.to_string(), "EURUSD-req1");
    }

    #[test]
    fn update_for_key_carries_both_ids() {
        let key = StreamKey::new("GBPUSD", "req7");
        let update = StreamUpdate::for_key(&key, StreamPayload::Data(5_u32));
        assert_eq!(update.request_id, "req7");
        assert_eq!(update.symbol.as_deref(), Some("GBPUSD"));
        assert_eq!(update.payload.data(), Some(&5));
        assert!(update.payload.is_data());

        let failed: StreamPayload<u32> = StreamPayload::Error("boom".to_string());
        assert!(!failed.is_data());
        assert!(failed.data().is_none());
    }
}
