//! Bridge Configuration Settings
//!
//! Configuration types for the terminal bridge, loaded from environment
//! variables.

use std::time::Duration;

use crate::infrastructure::protocol::{DELIMITER, WireMode};

/// Authorization code appended to reply-channel requests.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthCode(String);

impl AuthCode {
    /// Wrap a code.
    #[must_use]
    pub const fn new(code: String) -> Self {
        Self(code)
    }

    /// The raw code.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AuthCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthCode([REDACTED])")
    }
}

/// Terminal connection settings.
#[derive(Debug, Clone)]
pub struct TerminalSettings {
    /// Terminal host name or address.
    pub host: String,
    /// Reply channel port.
    pub reply_port: u16,
    /// Stream channel port.
    pub stream_port: u16,
    /// Inbound byte encoding.
    pub wire_mode: WireMode,
    /// Connect timeout for both channels.
    pub connect_timeout: Duration,
    /// Upper bound on reading one reply.
    pub read_timeout: Duration,
    /// Silence after the first reply bytes that ends an unterminated reply.
    pub reply_idle_gap: Duration,
    /// Reply read ceiling in bytes.
    pub max_reply_bytes: usize,
    /// Bounded read interval on the stream channel.
    pub stream_poll_interval: Duration,
    /// Authorization code, if the terminal requires one.
    pub auth_code: Option<AuthCode>,
    /// Character that ends each reply or pushed frame.
    pub reply_terminator: Option<char>,
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            reply_port: 15556,
            stream_port: 15557,
            wire_mode: WireMode::Plain,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
            reply_idle_gap: Duration::from_millis(200),
            max_reply_bytes: 65_536,
            stream_poll_interval: Duration::from_millis(500),
            auth_code: None,
            reply_terminator: None,
        }
    }
}

/// Stream task settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Symbols to poll at startup.
    pub symbols: Vec<String>,
    /// Poll interval per symbol.
    pub interval: Duration,
    /// Capacity of the update sink channel.
    pub sink_capacity: usize,
    /// Whether to open the push stream channel.
    pub use_stream_channel: bool,
    /// Liveness attempts before giving up (0 = unlimited).
    pub liveness_max_attempts: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            interval: Duration::from_secs(1),
            sink_capacity: 1024,
            use_stream_channel: false,
            liveness_max_attempts: 10,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    /// Terminal connection settings.
    pub terminal: TerminalSettings,
    /// Stream task settings.
    pub stream: StreamSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl BridgeConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty host, an unknown wire mode or an invalid
    /// terminator.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let terminal_defaults = TerminalSettings::default();
        let stream_defaults = StreamSettings::default();

        let host = env
            .get("TERMINAL_HOST")
            .unwrap_or(terminal_defaults.host);
        if host.trim().is_empty() {
            return Err(ConfigError::EmptyValue("TERMINAL_HOST".to_string()));
        }

        let wire_mode = match env.get("TERMINAL_WIRE_MODE") {
            Some(raw) => raw.parse::<WireMode>().map_err(|reason| ConfigError::InvalidValue {
                key: "TERMINAL_WIRE_MODE".to_string(),
                value: raw.clone(),
                reason,
            })?,
            None => terminal_defaults.wire_mode,
        };

        let reply_terminator = env
            .get("TERMINAL_REPLY_TERMINATOR")
            .filter(|raw| !raw.is_empty())
            .map(|raw| parse_terminator(&raw))
            .transpose()?;

        let terminal = TerminalSettings {
            host,
            reply_port: env.parse_or("TERMINAL_REPLY_PORT", terminal_defaults.reply_port),
            stream_port: env.parse_or("TERMINAL_STREAM_PORT", terminal_defaults.stream_port),
            wire_mode,
            connect_timeout: env.millis_or(
                "TERMINAL_CONNECT_TIMEOUT_MS",
                terminal_defaults.connect_timeout,
            ),
            read_timeout: env.millis_or("TERMINAL_READ_TIMEOUT_MS", terminal_defaults.read_timeout),
            reply_idle_gap: env.millis_or(
                "TERMINAL_REPLY_IDLE_MS",
                terminal_defaults.reply_idle_gap,
            ),
            max_reply_bytes: env.parse_or(
                "TERMINAL_MAX_REPLY_BYTES",
                terminal_defaults.max_reply_bytes,
            ),
            stream_poll_interval: env.millis_or(
                "TERMINAL_STREAM_POLL_MS",
                terminal_defaults.stream_poll_interval,
            ),
            auth_code: env
                .get("TERMINAL_AUTH_CODE")
                .filter(|code| !code.is_empty())
                .map(AuthCode::new),
            reply_terminator,
        };

        let stream = StreamSettings {
            symbols: env
                .get("BRIDGE_STREAM_SYMBOLS")
                .map(|raw| parse_symbols(&raw))
                .unwrap_or_default(),
            interval: env.millis_or("BRIDGE_STREAM_INTERVAL_MS", stream_defaults.interval),
            sink_capacity: env
                .parse_or("BRIDGE_SINK_CAPACITY", stream_defaults.sink_capacity)
                .max(1),
            use_stream_channel: env
                .get("BRIDGE_USE_STREAM_CHANNEL")
                .map_or(stream_defaults.use_stream_channel, |raw| parse_flag(&raw)),
            liveness_max_attempts: env.parse_or(
                "BRIDGE_LIVENESS_MAX_ATTEMPTS",
                stream_defaults.liveness_max_attempts,
            ),
        };

        let server = ServerSettings {
            health_port: env.parse_or("BRIDGE_HEALTH_PORT", ServerSettings::default().health_port),
        };

        Ok(Self {
            terminal,
            stream,
            server,
        })
    }

    /// Reply channel address.
    #[must_use]
    pub fn reply_address(&self) -> String {
        format!("{}:{}", self.terminal.host, self.terminal.reply_port)
    }

    /// Stream channel address.
    #[must_use]
    pub fn stream_address(&self) -> String {
        format!("{}:{}", self.terminal.host, self.terminal.stream_port)
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable holds an unusable value.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
        /// What is wrong with it.
        reason: String,
    },
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse_or<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn millis_or(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

fn parse_symbols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_uppercase)
        .collect()
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_terminator(raw: &str) -> Result<char, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidValue {
        key: "TERMINAL_REPLY_TERMINATOR".to_string(),
        value: raw.to_string(),
        reason: reason.to_string(),
    };

    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c == DELIMITER => Err(invalid("terminator cannot be the delimiter")),
        (Some(c), None) if c.is_ascii() => Ok(c),
        _ => Err(invalid("expected a single ASCII character")),
    }
}
