#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Terminal Bridge - Trading Terminal Socket Client
//!
//! Talks to a trading terminal that exposes a caret-delimited text protocol
//! over TCP. Requests go over a reply channel that opens one connection per
//! request; pushed data arrives on a persistent stream channel. Per-symbol
//! polling tasks sit on top of the reply channel.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Typed records and streaming types
//!   - `records`: Account, instrument, tick and clock records
//!   - `streaming`: Stream task keys and updates
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Fetch source interface for stream tasks
//!   - `services`: Keyed periodic fetch loops
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `protocol`: Frame codec, field conversions, legacy transform
//!   - `terminal`: Sockets, command client, retry policy
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!   - `metrics`, `telemetry`: Observability
//!
//! # Data Flow
//!
//! ```text
//!                     ┌────────────────┐   F0xx request    ┌──────────┐
//! StreamTaskManager ─►│ CommandClient  │──────────────────►│          │
//!   (per symbol)      │                │◄──── reply ───────│ Terminal │
//!        │            └────────────────┘                   │          │
//!        ▼                                                 │          │
//!   update sink       Connection::open_stream ◄─ frames ───│          │
//!                                                          └──────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Terminal records with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::records::{
    BrokerServerTime, DynamicAccountInfo, FromFrame, InstrumentInfo, LicenseType,
    MarketWatchStatus, StaticAccountInfo, TickInfo,
};
pub use domain::streaming::{StreamKey, StreamPayload, StreamUpdate};

// Application services
pub use application::ports::{FetchError, FetchSource, fetch_fn};
pub use application::services::{
    StreamTaskError, StreamTaskManager, StreamTaskStats, new_request_id,
};

// Protocol
pub use infrastructure::protocol::{DecodeError, FieldError, Frame, WireMode, decode, encode};

// Terminal client
pub use infrastructure::terminal::{
    CommandClient, CommandCode, CommandError, Connection, ConnectionConfig, ConnectionError,
    ConnectionState, StreamEvent, StreamStatus, TickFetcher,
};

// Infrastructure config
pub use infrastructure::config::{
    AuthCode, BridgeConfig, ConfigError, ServerSettings, StreamSettings, TerminalSettings,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
