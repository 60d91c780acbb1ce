//! Terminal Records
//!
//! Typed views of the terminal's replies. Numeric fields are optional:
//! `None` means the terminal reported the value as unset, which is not the
//! same as zero.

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

mod from_frame;

pub use from_frame::FromFrame;

// =============================================================================
// Account
// =============================================================================

/// Static account properties.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaticAccountInfo {
    /// Account holder name.
    pub name: String,
    /// Account login number.
    pub login: Option<i64>,
    /// Deposit currency.
    pub currency: String,
    /// Account type (demo, real, contest).
    pub account_type: String,
    /// Leverage (e.g. 100 for 1:100).
    pub leverage: Option<i64>,
    /// Whether trading is allowed for the account.
    pub trade_allowed: Option<bool>,
    /// Maximum number of pending orders.
    pub limit_orders: Option<i32>,
    /// Margin call level.
    pub margin_call: Option<f64>,
    /// Stop-out level.
    pub margin_close: Option<f64>,
    /// Broker company name.
    pub company: String,
}

/// Dynamic account state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DynamicAccountInfo {
    /// Balance in deposit currency.
    pub balance: Option<Decimal>,
    /// Equity in deposit currency.
    pub equity: Option<Decimal>,
    /// Floating profit.
    pub profit: Option<Decimal>,
    /// Margin in use.
    pub margin: Option<Decimal>,
    /// Margin level in percent.
    pub margin_level: Option<Decimal>,
    /// Free margin.
    pub margin_free: Option<Decimal>,
}

// =============================================================================
// Instruments
// =============================================================================

/// Trading properties of one instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentInfo {
    /// Instrument symbol.
    pub instrument: String,
    /// Price digits after the decimal point.
    pub digits: Option<i32>,
    /// Maximum volume per order.
    pub max_lotsize: Option<Decimal>,
    /// Minimum volume per order.
    pub min_lotsize: Option<Decimal>,
    /// Volume step.
    pub lot_step: Option<Decimal>,
    /// Point size.
    pub point: Option<f64>,
    /// Minimal price change.
    pub tick_size: Option<f64>,
    /// Value of one tick in deposit currency.
    pub tick_value: Option<f64>,
    /// Long swap.
    pub swap_long: Option<f64>,
    /// Short swap.
    pub swap_short: Option<f64>,
    /// Minimal stop distance in points.
    pub stop_level: Option<i32>,
    /// Contract size.
    pub contract_size: Option<f64>,
}

/// Last known tick for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickInfo {
    /// Instrument symbol.
    pub instrument: String,
    /// Tick time in seconds since the epoch.
    pub date: Option<i64>,
    /// Ask price.
    pub ask: Option<f64>,
    /// Bid price.
    pub bid: Option<f64>,
    /// Last deal price.
    pub last: Option<f64>,
    /// Volume for the last deal.
    pub volume: Option<i64>,
    /// Spread in points.
    pub spread: Option<f64>,
    /// Tick time in milliseconds since the epoch.
    pub date_in_ms: Option<i64>,
}

impl TickInfo {
    /// Tick timestamp, preferring millisecond precision.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.date_in_ms
            .and_then(DateTime::from_timestamp_millis)
            .or_else(|| self.date.and_then(|s| DateTime::from_timestamp(s, 0)))
    }

    /// Ask minus bid, when both are set.
    #[must_use]
    pub fn raw_spread(&self) -> Option<f64> {
        Some(self.ask? - self.bid?)
    }
}

// =============================================================================
// Terminal State
// =============================================================================

/// Broker server clock reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BrokerServerTime {
    /// Wall-clock time on the broker server (no zone information).
    pub time: NaiveDateTime,
}

/// Whether an instrument is in the terminal's market watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketWatchStatus {
    /// Instrument symbol.
    pub instrument: String,
    /// Status text returned by the terminal.
    pub status: String,
}

impl MarketWatchStatus {
    /// Status text for instruments present in the market watch.
    pub const IN_MARKET_WATCH: &'static str = "Market watch";

    /// Whether the instrument is in the market watch.
    #[must_use]
    pub fn is_in_market_watch(&self) -> bool {
        self.status == Self::IN_MARKET_WATCH
    }
}

/// License the bridge component runs under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LicenseType {
    /// Demo license (restricted instruments).
    Demo,
    /// Full license.
    Licensed,
    /// Unrecognized license text.
    Unknown(String),
}

impl LicenseType {
    /// Classify the terminal's license text.
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        match text {
            "Demo" => Self::Demo,
            "Licensed" => Self::Licensed,
            other => Self::Unknown(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick() -> TickInfo {
        TickInfo {
            instrument: "EURUSD".to_string(),
            date: Some(1_700_000_000),
            ask: Some(1.0852),
            bid: Some(1.0850),
            last: None,
            volume: Some(0),
            spread: Some(2.0),
            date_in_ms: Some(1_700_000_000_250),
        }
    }

    #[test]
    fn timestamp_prefers_milliseconds() {
        let ts = tick().timestamp().unwrap();
        assert_eq!(ts.timestamp_millis(), 1_700_000_000_250);
    }

    #[test]
    fn timestamp_falls_back_to_seconds() {
        let mut t = tick();
        t.date_in_ms = None;
        assert_eq!(t.timestamp().unwrap().timestamp(), 1_700_000_000);
        t.date = None;
        assert!(t.timestamp().is_none());
    }

    #[test]
    fn raw_spread_needs_both_sides() {
        let mut t = tick();
        assert!((t.raw_spread().unwrap() - 0.0002).abs() < 1e-9);
        t.ask = None;
        assert!(t.raw_spread().is_none());
    }

    #[test]
    fn license_and_market_watch() {
        assert_eq!(LicenseType::from_text("Demo"), LicenseType::Demo);
        assert_eq!(LicenseType::from_text("Licensed"), LicenseType::Licensed);
        assert_eq!(
            LicenseType::from_text("Trial"),
            LicenseType::Unknown("Trial".to_string())
        );

        let status = MarketWatchStatus {
            instrument: "EURUSD".to_string(),
            status: "Market watch".to_string(),
        };
        assert!(status.is_in_market_watch());
    }
}
