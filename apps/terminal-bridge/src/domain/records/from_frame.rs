//! Positional field mapping from decoded frames to records.

use chrono::{NaiveDate, NaiveDateTime};

use super::{
    BrokerServerTime, DynamicAccountInfo, InstrumentInfo, LicenseType, MarketWatchStatus,
    StaticAccountInfo, TickInfo,
};
use crate::infrastructure::protocol::{FieldError, FieldKind, Frame};

/// Build a record from a decoded reply frame.
pub trait FromFrame: Sized {
    /// Map the frame's positional fields to a record.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError`] when a required field is absent or malformed.
    fn from_frame(frame: &Frame) -> Result<Self, FieldError>;
}

impl FromFrame for StaticAccountInfo {
    fn from_frame(frame: &Frame) -> Result<Self, FieldError> {
        let mut r = frame.reader();
        Ok(Self {
            name: r.next_text()?,
            login: r.next_long()?,
            currency: r.next_text()?,
            account_type: r.next_text()?,
            leverage: r.next_long()?,
            trade_allowed: r.next_bool()?,
            limit_orders: r.next_int()?,
            margin_call: r.next_double()?,
            margin_close: r.next_double()?,
            company: r.next_text()?,
        })
    }
}

impl FromFrame for DynamicAccountInfo {
    fn from_frame(frame: &Frame) -> Result<Self, FieldError> {
        let mut r = frame.reader();
        r.require(1, FieldKind::Decimal)?;
        Ok(Self {
            balance: r.next_decimal()?,
            equity: r.next_decimal()?,
            profit: r.next_decimal()?,
            margin: r.next_decimal()?,
            margin_level: r.next_decimal()?,
            margin_free: r.next_decimal()?,
        })
    }
}

impl FromFrame for InstrumentInfo {
    fn from_frame(frame: &Frame) -> Result<Self, FieldError> {
        let mut r = frame.reader();
        r.require(1, FieldKind::Int)?;
        Ok(Self {
            instrument: String::new(),
            digits: r.next_int()?,
            max_lotsize: r.next_decimal()?,
            min_lotsize: r.next_decimal()?,
            lot_step: r.next_decimal()?,
            point: r.next_double()?,
            tick_size: r.next_double()?,
            tick_value: r.next_double()?,
            swap_long: r.next_double()?,
            swap_short: r.next_double()?,
            stop_level: r.next_int()?,
            contract_size: r.next_double()?,
        })
    }
}

impl FromFrame for TickInfo {
    fn from_frame(frame: &Frame) -> Result<Self, FieldError> {
        let mut r = frame.reader();
        r.require(1, FieldKind::Long)?;
        Ok(Self {
            instrument: String::new(),
            date: r.next_long()?,
            ask: r.next_double()?,
            bid: r.next_double()?,
            last: r.next_double()?,
            volume: r.next_long()?,
            spread: r.next_double()?,
            date_in_ms: r.next_long()?,
        })
    }
}

impl FromFrame for BrokerServerTime {
    fn from_frame(frame: &Frame) -> Result<Self, FieldError> {
        let raw = frame.reader().next_text()?;
        parse_broker_time(&raw)
            .map(|time| Self { time })
            .ok_or(FieldError::Invalid {
                position: 0,
                kind: FieldKind::BrokerTime,
                value: raw,
            })
    }
}

impl FromFrame for MarketWatchStatus {
    fn from_frame(frame: &Frame) -> Result<Self, FieldError> {
        Ok(Self {
            instrument: String::new(),
            status: frame.reader().next_text()?,
        })
    }
}

impl FromFrame for LicenseType {
    fn from_frame(frame: &Frame) -> Result<Self, FieldError> {
        let mut r = frame.reader();
        r.skip();
        Ok(Self::from_text(&r.next_text()?))
    }
}

impl FromFrame for Vec<String> {
    fn from_frame(frame: &Frame) -> Result<Self, FieldError> {
        Ok(frame.reader().rest())
    }
}

/// Parse `Y-M-D-h-m-s` into a naive timestamp.
fn parse_broker_time(raw: &str) -> Option<NaiveDateTime> {
    let parts: Vec<u32> = raw
        .split('-')
        .map(|p| p.trim().parse().ok())
        .collect::<Option<_>>()?;
    let [year, month, day, hour, minute, second] = parts.as_slice() else {
        return None;
    };
    NaiveDate::from_ymd_opt(i32::try_from(*year).ok()?, *month, *day)?
        .and_hms_opt(*hour, *minute, *second)
}
