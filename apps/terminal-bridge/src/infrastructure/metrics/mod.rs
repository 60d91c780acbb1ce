//! Prometheus Metrics Module
//!
//! # Metrics
//!
//! - `terminal_bridge_requests_total{command, outcome}`: reply-channel calls
//! - `terminal_bridge_request_seconds{command}`: reply-channel round trips
//! - `terminal_bridge_stream_frames_total{outcome}`: stream-channel frames
//! - `terminal_bridge_stream_tasks`: registered stream tasks
//! - `terminal_bridge_fetch_total{outcome}`: stream task fetches
//! - `terminal_bridge_reconnects_total`: liveness retries in the binary
//!
//! Exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Later calls return the same handle.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "terminal_bridge_requests_total",
        "Reply-channel requests by command and outcome"
    );
    describe_histogram!(
        "terminal_bridge_request_seconds",
        "Reply-channel round trip time"
    );
    describe_counter!(
        "terminal_bridge_stream_frames_total",
        "Frames read from the stream channel by outcome"
    );
    describe_gauge!(
        "terminal_bridge_stream_tasks",
        "Number of registered stream tasks"
    );
    describe_counter!(
        "terminal_bridge_fetch_total",
        "Stream task fetches by outcome"
    );
    describe_counter!(
        "terminal_bridge_reconnects_total",
        "Liveness check retries"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for reply-channel requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Reply decoded and matched.
    Ok,
    /// Transport failure.
    Transport,
    /// Reply could not be framed.
    Framing,
    /// Reply code did not match.
    Mismatch,
    /// Reply fields did not map to a record.
    Field,
}

impl RequestOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Transport => "transport",
            Self::Framing => "framing",
            Self::Mismatch => "mismatch",
            Self::Field => "field",
        }
    }
}

/// Record one reply-channel request.
pub fn record_request(command: &'static str, outcome: RequestOutcome, duration: Duration) {
    counter!(
        "terminal_bridge_requests_total",
        "command" => command,
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!("terminal_bridge_request_seconds", "command" => command)
        .record(duration.as_secs_f64());
}

/// Record one stream-channel frame.
pub fn record_stream_frame(outcome: &'static str) {
    counter!("terminal_bridge_stream_frames_total", "outcome" => outcome).increment(1);
}

/// Update the stream task gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_stream_tasks(count: usize) {
    gauge!("terminal_bridge_stream_tasks").set(count as f64);
}

/// Record one stream task fetch.
pub fn record_fetch(outcome: &'static str) {
    counter!("terminal_bridge_fetch_total", "outcome" => outcome).increment(1);
}

/// Record a liveness retry.
pub fn record_reconnect() {
    counter!("terminal_bridge_reconnects_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_outcome_as_str() {
        assert_eq!(RequestOutcome::Ok.as_str(), "ok");
        assert_eq!(RequestOutcome::Transport.as_str(), "transport");
        assert_eq!(RequestOutcome::Framing.as_str(), "framing");
        assert_eq!(RequestOutcome::Mismatch.as_str(), "mismatch");
        assert_eq!(RequestOutcome::Field.as_str(), "field");
    }

    #[test]
    fn recording_without_recorder_is_harmless() {
        record_request("F000", RequestOutcome::Ok, Duration::from_millis(3));
        record_stream_frame("ok");
        set_stream_tasks(2);
        record_fetch("ok");
        record_reconnect();
    }
}
