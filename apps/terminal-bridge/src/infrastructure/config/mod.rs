//! Configuration Module
//!
//! Configuration loading for the terminal bridge.

mod settings;

pub use settings::{
    AuthCode, BridgeConfig, ConfigError, ServerSettings, StreamSettings, TerminalSettings,
};
