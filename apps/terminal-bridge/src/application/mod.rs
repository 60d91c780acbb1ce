//! Application Layer - Use cases and port definitions.
//!
//! Stream task scheduling and the ports it depends on.

/// Port interfaces for data sources.
pub mod ports;

/// Application services (stream task management).
pub mod services;
