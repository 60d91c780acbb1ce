//! Command Client
//!
//! One method per terminal operation. Each builds a request frame, sends it
//! over the reply channel, checks the reply's command code and maps the
//! positional fields to a record.
//!
//! | Operation | Code | Request field |
//! |---|---|---|
//! | liveness check | `F000` | |
//! | static account info | `F001` | |
//! | dynamic account info | `F002` | |
//! | instrument info | `F003` | symbol |
//! | market watch check | `F004` | symbol |
//! | broker server time | `F005` | |
//! | license check | `F006` | |
//! | broker instrument names | `F007` | |
//! | last tick info | `F020` | symbol |

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use super::connection::{Connection, ConnectionError};
use crate::application::ports::{FetchError, FetchSource};
use crate::domain::records::{
    BrokerServerTime, DynamicAccountInfo, FromFrame, InstrumentInfo, LicenseType,
    MarketWatchStatus, StaticAccountInfo, TickInfo,
};
use crate::infrastructure::config::AuthCode;
use crate::infrastructure::metrics::{self, RequestOutcome};
use crate::infrastructure::protocol::{DecodeError, FieldError, Frame, error_codes};

// =============================================================================
// Command Codes
// =============================================================================

/// Terminal operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    /// Liveness check.
    CheckConnection,
    /// Static account properties.
    StaticAccountInfo,
    /// Dynamic account state.
    DynamicAccountInfo,
    /// Instrument trading properties.
    InstrumentInfo,
    /// Market watch membership.
    MarketWatch,
    /// Broker server clock.
    BrokerServerTime,
    /// License type.
    License,
    /// Instruments offered by the broker.
    BrokerInstrumentNames,
    /// Last tick for an instrument.
    LastTickInfo,
}

impl CommandCode {
    /// Wire code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CheckConnection => "F000",
            Self::StaticAccountInfo => "F001",
            Self::DynamicAccountInfo => "F002",
            Self::InstrumentInfo => "F003",
            Self::MarketWatch => "F004",
            Self::BrokerServerTime => "F005",
            Self::License => "F006",
            Self::BrokerInstrumentNames => "F007",
            Self::LastTickInfo => "F020",
        }
    }

    /// Sub-command: `2` when the request carries an instrument.
    const fn sub_command(with_instrument: bool) -> &'static str {
        if with_instrument { "2" } else { "1" }
    }
}

impl std::fmt::Display for CommandCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Error Type
// =============================================================================

/// Errors from command operations.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The terminal could not be reached or the socket failed.
    #[error("transport error: {0}")]
    Transport(ConnectionError),

    /// The reply was not a valid frame.
    #[error("framing error: {0}")]
    Framing(DecodeError),

    /// The reply carried a different command code.
    #[error("expected {expected} reply, got {received:?}{}", remote_suffix(.remote_error.as_ref()))]
    ProtocolMismatch {
        /// Code that was sent.
        expected: CommandCode,
        /// Code that came back.
        received: String,
        /// Known terminal error found in the reply.
        remote_error: Option<RemoteError>,
    },

    /// The reply fields did not map to the record.
    #[error("unexpected reply fields: {0}")]
    Field(#[from] FieldError),
}

fn remote_suffix(remote: Option<&RemoteError>) -> String {
    remote.map_or_else(String::new, |r| format!(" ({r})"))
}

impl From<ConnectionError> for CommandError {
    fn from(error: ConnectionError) -> Self {
        match error {
            ConnectionError::Decode { source, .. } => Self::Framing(source),
            other => Self::Transport(other),
        }
    }
}

impl CommandError {
    /// Whether the peer could not be reached.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Whether the peer replied out of protocol.
    #[must_use]
    pub const fn is_protocol_mismatch(&self) -> bool {
        matches!(self, Self::ProtocolMismatch { .. })
    }

    const fn outcome(&self) -> RequestOutcome {
        match self {
            Self::Transport(_) => RequestOutcome::Transport,
            Self::Framing(_) => RequestOutcome::Framing,
            Self::ProtocolMismatch { .. } => RequestOutcome::Mismatch,
            Self::Field(_) => RequestOutcome::Field,
        }
    }
}

impl From<CommandError> for FetchError {
    fn from(error: CommandError) -> Self {
        match error {
            CommandError::Transport(_) => Self::Transport(error.to_string()),
            _ => Self::Protocol(error.to_string()),
        }
    }
}

/// Terminal error code reported in place of a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    /// Five-digit code.
    pub code: String,
    /// Description from the error dictionary.
    pub description: &'static str,
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.description)
    }
}

// =============================================================================
// Command Client
// =============================================================================

/// Typed operations over the reply channel.
#[derive(Debug, Clone)]
pub struct CommandClient {
    connection: Arc<Connection>,
    auth_code: Option<AuthCode>,
}

impl CommandClient {
    /// Create a client over a shared connection.
    #[must_use]
    pub const fn new(connection: Arc<Connection>) -> Self {
        Self {
            connection,
            auth_code: None,
        }
    }

    /// Append `code` as a trailing field on every request.
    #[must_use]
    pub fn with_auth_code(mut self, code: Option<AuthCode>) -> Self {
        self.auth_code = code;
        self
    }

    /// Underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Build the request frame for `code`.
    #[must_use]
    pub fn request_frame(&self, code: CommandCode, instrument: Option<&str>) -> Frame {
        let mut frame = Frame::new(
            code.as_str(),
            CommandCode::sub_command(instrument.is_some()),
        );
        if let Some(instrument) = instrument {
            frame = frame.with_field(instrument);
        }
        if let Some(auth) = &self.auth_code {
            frame = frame.with_field(auth.expose());
        }
        frame
    }

    /// Send a request and return the reply if its code matches.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Transport`] or [`CommandError::Framing`] when
    /// no valid reply arrives and [`CommandError::ProtocolMismatch`] when
    /// the reply code differs.
    pub async fn execute(
        &self,
        code: CommandCode,
        instrument: Option<&str>,
    ) -> Result<Frame, CommandError> {
        let request = self.request_frame(code, instrument);
        let reply = self.connection.send_request(&request).await?;

        if reply.command != code.as_str() {
            let remote_error = error_codes::describe_reply(&reply)
                .map(|(code, description)| RemoteError { code, description });
            tracing::warn!(
                expected = %code,
                received = %reply.command,
                remote_error = ?remote_error,
                "Reply command mismatch"
            );
            return Err(CommandError::ProtocolMismatch {
                expected: code,
                received: reply.command,
                remote_error,
            });
        }

        Ok(reply)
    }

    async fn fetch_record<R: FromFrame>(
        &self,
        code: CommandCode,
        instrument: Option<&str>,
    ) -> Result<R, CommandError> {
        let started = Instant::now();
        let result = match self.execute(code, instrument).await {
            Ok(reply) => R::from_frame(&reply).map_err(CommandError::from),
            Err(e) => Err(e),
        };

        let outcome = result
            .as_ref()
            .map_or_else(CommandError::outcome, |_| RequestOutcome::Ok);
        metrics::record_request(code.as_str(), outcome, started.elapsed());
        if let Err(e) = &result {
            tracing::debug!(
                command = %code,
                instrument = ?instrument,
                error = %e,
                "Command failed"
            );
        }
        result
    }

    /// Check that the terminal answers.
    ///
    /// Returns `Ok(false)` when a reply arrives with the wrong code.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when no valid reply arrives.
    pub async fn check_connection(&self) -> Result<bool, CommandError> {
        let started = Instant::now();
        let result = self.execute(CommandCode::CheckConnection, None).await;
        let outcome = result
            .as_ref()
            .map_or_else(CommandError::outcome, |_| RequestOutcome::Ok);
        metrics::record_request(CommandCode::CheckConnection.as_str(), outcome, started.elapsed());

        match result {
            Ok(_) => Ok(true),
            Err(CommandError::ProtocolMismatch { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Fetch static account properties.
    ///
    /// # Errors
    ///
    /// See [`CommandClient::execute`]; also [`CommandError::Field`].
    pub async fn static_account_info(&self) -> Result<StaticAccountInfo, CommandError> {
        self.fetch_record(CommandCode::StaticAccountInfo, None).await
    }

    /// Fetch dynamic account state.
    ///
    /// # Errors
    ///
    /// See [`CommandClient::execute`]; also [`CommandError::Field`].
    pub async fn dynamic_account_info(&self) -> Result<DynamicAccountInfo, CommandError> {
        self.fetch_record(CommandCode::DynamicAccountInfo, None).await
    }

    /// Fetch instrument trading properties.
    ///
    /// # Errors
    ///
    /// See [`CommandClient::execute`]; also [`CommandError::Field`].
    pub async fn instrument_info(&self, instrument: &str) -> Result<InstrumentInfo, CommandError> {
        let mut info: InstrumentInfo = self
            .fetch_record(CommandCode::InstrumentInfo, Some(instrument))
            .await?;
        info.instrument = instrument.to_string();
        Ok(info)
    }

    /// Check whether an instrument is in the market watch.
    ///
    /// # Errors
    ///
    /// See [`CommandClient::execute`]; also [`CommandError::Field`].
    pub async fn market_watch(&self, instrument: &str) -> Result<MarketWatchStatus, CommandError> {
        let mut status: MarketWatchStatus = self
            .fetch_record(CommandCode::MarketWatch, Some(instrument))
            .await?;
        status.instrument = instrument.to_string();
        Ok(status)
    }

    /// Read the broker server clock.
    ///
    /// # Errors
    ///
    /// See [`CommandClient::execute`]; also [`CommandError::Field`].
    pub async fn broker_server_time(&self) -> Result<BrokerServerTime, CommandError> {
        self.fetch_record(CommandCode::BrokerServerTime, None).await
    }

    /// Read the license type.
    ///
    /// # Errors
    ///
    /// See [`CommandClient::execute`]; also [`CommandError::Field`].
    pub async fn license(&self) -> Result<LicenseType, CommandError> {
        self.fetch_record(CommandCode::License, None).await
    }

    /// List the instruments the broker offers.
    ///
    /// # Errors
    ///
    /// See [`CommandClient::execute`].
    pub async fn broker_instrument_names(&self) -> Result<Vec<String>, CommandError> {
        self.fetch_record(CommandCode::BrokerInstrumentNames, None).await
    }

    /// Fetch the last tick for an instrument.
    ///
    /// # Errors
    ///
    /// See [`CommandClient::execute`]; also [`CommandError::Field`].
    pub async fn last_tick_info(&self, instrument: &str) -> Result<TickInfo, CommandError> {
        let mut tick: TickInfo = self
            .fetch_record(CommandCode::LastTickInfo, Some(instrument))
            .await?;
        tick.instrument = instrument.to_string();
        Ok(tick)
    }
}

// =============================================================================
// Fetch Source
// =============================================================================

/// Stream task source that polls the last tick per symbol.
#[derive(Debug, Clone)]
pub struct TickFetcher {
    client: CommandClient,
}

impl TickFetcher {
    /// Poll ticks through `client`.
    #[must_use]
    pub const fn new(client: CommandClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FetchSource for TickFetcher {
    type Output = TickInfo;

    async fn fetch(&self, symbol: &str) -> Result<TickInfo, FetchError> {
        Ok(self.client.last_tick_info(symbol).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::terminal::ConnectionConfig;
    use test_case::test_case;

    fn client(auth: Option<&str>) -> CommandClient {
        let connection = Arc::new(Connection::new(ConnectionConfig::default()));
        CommandClient::new(connection).with_auth_code(auth.map(|c| AuthCode::new(c.to_string())))
    }

    #[test_case(CommandCode::CheckConnection, None, "F000^1^")]
    #[test_case(CommandCode::StaticAccountInfo, None, "F001^1^")]
    #[test_case(CommandCode::InstrumentInfo, Some("EURUSD"), "F003^2^EURUSD^")]
    #[test_case(CommandCode::LastTickInfo, Some("GBPUSD"), "F020^2^GBPUSD^")]
    #[test_case(CommandCode::BrokerInstrumentNames, None, "F007^1^")]
    fn request_frames(code: CommandCode, instrument: Option<&str>, expected: &str) {
        assert_eq!(client(None).request_frame(code, instrument).encode(), expected);
    }

    #[test]
    fn auth_code_is_trailing_field() {
        let c = client(Some("ABC123"));
        assert_eq!(
            c.request_frame(CommandCode::CheckConnection, None).encode(),
            "F000^1^ABC123^"
        );
        assert_eq!(
            c.request_frame(CommandCode::LastTickInfo, Some("EURUSD")).encode(),
            "F020^2^EURUSD^ABC123^"
        );
    }

    #[test]
    fn decode_errors_become_framing_errors() {
        let err: CommandError = ConnectionError::Decode {
            endpoint: "h:1".to_string(),
            source: DecodeError::TooShort { tokens: 1 },
        }
        .into();
        assert!(matches!(err, CommandError::Framing(_)));
        assert!(!err.is_transport());

        let err: CommandError = ConnectionError::Closed {
            endpoint: "h:1".to_string(),
        }
        .into();
        assert!(err.is_transport());
        assert!(!err.is_protocol_mismatch());
    }

    #[test]
    fn mismatch_message_includes_remote_error() {
        let err = CommandError::ProtocolMismatch {
            expected: CommandCode::LastTickInfo,
            received: "F999".to_string(),
            remote_error: Some(RemoteError {
                code: "00301".to_string(),
                description: "Unknown instrument for broker",
            }),
        };
        assert_eq!(
            err.to_string(),
            "expected F020 reply, got \"F999\" (00301: Unknown instrument for broker)"
        );
        assert!(err.is_protocol_mismatch());

        let fetch: FetchError = err.into();
        assert_eq!(fetch.kind(), "protocol");
    }
}
