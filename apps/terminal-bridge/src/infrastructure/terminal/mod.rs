//! Terminal adapters: socket connection, command client and retry policy.

pub mod client;
pub mod connection;
pub mod reconnect;

pub use client::{CommandClient, CommandCode, CommandError, RemoteError, TickFetcher};
pub use connection::{
    Connection, ConnectionConfig, ConnectionError, ConnectionErrorKind, ConnectionState,
    IoStage, StreamEvent, StreamStatus,
};
pub use reconnect::{ReconnectConfig, ReconnectPolicy, retry_with_backoff};
