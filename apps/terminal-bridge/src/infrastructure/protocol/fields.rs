//! Typed Field Codec
//!
//! Converts raw frame fields to and from typed values. The terminal marks a
//! value as unset either with an empty field or with a reserved maximum
//! literal; both decode to `None`, which stays distinct from zero.

use std::num::{ParseFloatError, ParseIntError};
use std::str::FromStr;

use rust_decimal::Decimal;

/// Reserved "unset" value for 32-bit integers.
pub const UNSET_INTEGER: i32 = i32::MAX;

/// Reserved "unset" value for 64-bit integers.
pub const UNSET_LONG: i64 = i64::MAX;

/// Reserved "unset" value for doubles.
pub const UNSET_DOUBLE: f64 = f64::MAX;

/// Literal the terminal uses for positive infinity.
pub const INFINITY_LITERAL: &str = "Infinity";

/// Wire literals that mark a decimal as unset.
const UNSET_DECIMAL_LITERALS: [&str; 3] = [
    "2147483647",
    "9223372036854775807",
    "1.7976931348623157E308",
];

/// Decimal places written for doubles before trailing zeros are trimmed.
const DOUBLE_PRECISION: usize = 8;

/// Value kind, used in error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Free text.
    Text,
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    Long,
    /// Double precision float.
    Double,
    /// Exact decimal.
    Decimal,
    /// Integer-encoded boolean.
    Bool,
    /// `Y-M-D-h-m-s` broker timestamp.
    BrokerTime,
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Int => "int",
            Self::Long => "long",
            Self::Double => "double",
            Self::Decimal => "decimal",
            Self::Bool => "bool",
            Self::BrokerTime => "broker time",
        };
        f.write_str(name)
    }
}

/// Errors reading typed values out of a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    /// A required field is absent.
    #[error("missing {kind} field at position {position}")]
    Missing {
        /// Zero-based data field index.
        position: usize,
        /// Expected kind.
        kind: FieldKind,
    },

    /// A field is present but does not parse as the expected kind.
    #[error("field {position}: cannot parse {value:?} as {kind}")]
    Invalid {
        /// Zero-based data field index.
        position: usize,
        /// Expected kind.
        kind: FieldKind,
        /// Raw field text.
        value: String,
    },
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode a 32-bit integer field.
///
/// # Errors
///
/// Returns the parse error when the field is neither empty nor an integer.
pub fn decode_int(raw: &str) -> Result<Option<i32>, ParseIntError> {
    if raw.is_empty() {
        return Ok(None);
    }
    let value = raw.parse::<i32>()?;
    Ok((value != UNSET_INTEGER).then_some(value))
}

/// Decode a 64-bit integer field.
///
/// # Errors
///
/// Returns the parse error when the field is neither empty nor an integer.
pub fn decode_long(raw: &str) -> Result<Option<i64>, ParseIntError> {
    if raw.is_empty() {
        return Ok(None);
    }
    let value = raw.parse::<i64>()?;
    Ok((value != UNSET_LONG).then_some(value))
}

/// Decode a double field. `Infinity` maps to positive infinity.
///
/// # Errors
///
/// Returns the parse error when the field is neither empty nor a number.
#[allow(clippy::float_cmp)]
pub fn decode_double(raw: &str) -> Result<Option<f64>, ParseFloatError> {
    if raw.is_empty() {
        return Ok(None);
    }
    if raw == INFINITY_LITERAL {
        return Ok(Some(f64::INFINITY));
    }
    let value = raw.parse::<f64>()?;
    Ok((value != UNSET_DOUBLE).then_some(value))
}

/// Decode an exact decimal field.
///
/// Any of the integer, long or double sentinels marks the decimal as unset.
///
/// # Errors
///
/// Returns the parse error when the field is not a decimal literal.
pub fn decode_decimal(raw: &str) -> Result<Option<Decimal>, rust_decimal::Error> {
    if raw.is_empty() || UNSET_DECIMAL_LITERALS.contains(&raw) {
        return Ok(None);
    }
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map(Some)
}

/// Decode a boolean field. The terminal sends integers; `true`/`false` are
/// accepted too.
///
/// # Errors
///
/// Returns the parse error when the field is neither a word nor an integer.
pub fn decode_bool(raw: &str) -> Result<Option<bool>, ParseIntError> {
    if raw.eq_ignore_ascii_case("true") {
        return Ok(Some(true));
    }
    if raw.eq_ignore_ascii_case("false") {
        return Ok(Some(false));
    }
    Ok(decode_long(raw)?.map(|v| v != 0))
}

// ============================================================================
// Encoding
// ============================================================================

/// Encode a 32-bit integer field. Unset and the sentinel encode as empty.
#[must_use]
pub fn int_field(value: Option<i32>) -> String {
    match value {
        Some(v) if v != UNSET_INTEGER => v.to_string(),
        _ => String::new(),
    }
}

/// Encode a 64-bit integer field. Unset and the sentinel encode as empty.
#[must_use]
pub fn long_field(value: Option<i64>) -> String {
    match value {
        Some(v) if v != UNSET_LONG => v.to_string(),
        _ => String::new(),
    }
}

/// Encode a double field with up to eight decimals, trailing zeros trimmed.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn double_field(value: Option<f64>) -> String {
    match value {
        Some(v) if v == f64::INFINITY => INFINITY_LITERAL.to_string(),
        Some(v) if v.is_finite() && v != UNSET_DOUBLE => {
            let text = format!("{v:.prec$}", prec = DOUBLE_PRECISION);
            let text = text.trim_end_matches('0').trim_end_matches('.');
            if text == "-0" {
                "0".to_string()
            } else {
                text.to_string()
            }
        }
        _ => String::new(),
    }
}

/// Encode a decimal field in plain notation.
#[must_use]
pub fn decimal_field(value: Option<Decimal>) -> String {
    value.map(|d| d.normalize().to_string()).unwrap_or_default()
}

// ============================================================================
// Sequential Reader
// ============================================================================

/// Cursor over a frame's data fields.
///
/// Trailing empty fields are trimmed while decoding a frame, so a numeric
/// read past the end is treated as an unset value. Text reads past the end
/// are an error.
#[derive(Debug, Clone)]
pub struct FieldReader<'a> {
    fields: &'a [String],
    position: usize,
}

impl<'a> FieldReader<'a> {
    /// Create a reader positioned at the first field.
    #[must_use]
    pub const fn new(fields: &'a [String]) -> Self {
        Self {
            fields,
            position: 0,
        }
    }

    /// Current position.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Number of fields not yet consumed.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.fields.len().saturating_sub(self.position)
    }

    /// Fail unless at least `count` fields remain.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::Missing`] at the first absent position.
    pub fn require(&self, count: usize, kind: FieldKind) -> Result<(), FieldError> {
        if self.remaining() < count {
            return Err(FieldError::Missing {
                position: self.fields.len(),
                kind,
            });
        }
        Ok(())
    }

    /// Skip one field.
    pub fn skip(&mut self) {
        self.position += 1;
    }

    fn advance(&mut self) -> (usize, Option<&'a str>) {
        let position = self.position;
        self.position += 1;
        (position, self.fields.get(position).map(String::as_str))
    }

    /// Read the next field as text.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::Missing`] when the fields are exhausted.
    pub fn next_text(&mut self) -> Result<String, FieldError> {
        match self.advance() {
            (_, Some(raw)) => Ok(raw.to_string()),
            (position, None) => Err(FieldError::Missing {
                position,
                kind: FieldKind::Text,
            }),
        }
    }

    fn next_typed<T, E>(
        &mut self,
        kind: FieldKind,
        parse: impl FnOnce(&str) -> Result<Option<T>, E>,
    ) -> Result<Option<T>, FieldError> {
        match self.advance() {
            (_, None) => Ok(None),
            (position, Some(raw)) => parse(raw).map_err(|_| FieldError::Invalid {
                position,
                kind,
                value: raw.to_string(),
            }),
        }
    }

    /// Read the next field as a 32-bit integer.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::Invalid`] when the field is not an integer.
    pub fn next_int(&mut self) -> Result<Option<i32>, FieldError> {
        self.next_typed(FieldKind::Int, decode_int)
    }

    /// Read the next field as a 64-bit integer.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::Invalid`] when the field is not an integer.
    pub fn next_long(&mut self) -> Result<Option<i64>, FieldError> {
        self.next_typed(FieldKind::Long, decode_long)
    }

    /// Read the next field as a double.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::Invalid`] when the field is not a number.
    pub fn next_double(&mut self) -> Result<Option<f64>, FieldError> {
        self.next_typed(FieldKind::Double, decode_double)
    }

    /// Read the next field as an exact decimal.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::Invalid`] when the field is not a decimal.
    pub fn next_decimal(&mut self) -> Result<Option<Decimal>, FieldError> {
        self.next_typed(FieldKind::Decimal, decode_decimal)
    }

    /// Read the next field as a boolean.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::Invalid`] when the field is not a boolean.
    pub fn next_bool(&mut self) -> Result<Option<bool>, FieldError> {
        self.next_typed(FieldKind::Bool, decode_bool)
    }

    /// Collect every remaining field as text.
    pub fn rest(&mut self) -> Vec<String> {
        let rest = self
            .fields
            .get(self.position..)
            .unwrap_or_default()
            .to_vec();
        self.position = self.fields.len();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn int_sentinel_and_empty_are_unset() {
        assert_eq!(decode_int("").unwrap(), None);
        assert_eq!(decode_int("2147483647").unwrap(), None);
        assert_eq!(decode_int("0").unwrap(), Some(0));
        assert_eq!(decode_int("-12").unwrap(), Some(-12));
        assert!(decode_int("abc").is_err());
    }

    #[test]
    fn long_sentinel_is_unset() {
        assert_eq!(decode_long("9223372036854775807").unwrap(), None);
        assert_eq!(decode_long("1700000000000").unwrap(), Some(1_700_000_000_000));
    }

    #[test]
    fn double_sentinel_and_infinity() {
        assert_eq!(decode_double("").unwrap(), None);
        assert_eq!(decode_double("1.7976931348623157E308").unwrap(), None);
        assert_eq!(decode_double("Infinity").unwrap(), Some(f64::INFINITY));
        assert_eq!(decode_double("1.08512").unwrap(), Some(1.08512));
        assert_eq!(decode_double("0").unwrap(), Some(0.0));
    }

    #[test_case("" ; "empty")]
    #[test_case("2147483647" ; "int sentinel")]
    #[test_case("9223372036854775807" ; "long sentinel")]
    #[test_case("1.7976931348623157E308" ; "double sentinel")]
    fn decimal_sentinels_are_unset(raw: &str) {
        assert_eq!(decode_decimal(raw).unwrap(), None);
    }

    #[test]
    fn decimal_parses_plain_and_scientific() {
        assert_eq!(decode_decimal("10250.75").unwrap(), Some(dec("10250.75")));
        assert_eq!(decode_decimal("1e-5").unwrap(), Some(dec("0.00001")));
        assert!(decode_decimal("ten").is_err());
    }

    #[test_case("1", Some(true))]
    #[test_case("0", Some(false))]
    #[test_case("true", Some(true))]
    #[test_case("FALSE", Some(false))]
    #[test_case("", None)]
    fn bool_decoding(raw: &str, expected: Option<bool>) {
        assert_eq!(decode_bool(raw).unwrap(), expected);
    }

    #[test]
    fn writers_emit_empty_for_unset() {
        assert_eq!(int_field(None), "");
        assert_eq!(int_field(Some(UNSET_INTEGER)), "");
        assert_eq!(int_field(Some(0)), "0");
        assert_eq!(long_field(Some(UNSET_LONG)), "");
        assert_eq!(long_field(Some(42)), "42");
        assert_eq!(double_field(None), "");
        assert_eq!(double_field(Some(UNSET_DOUBLE)), "");
        assert_eq!(decimal_field(None), "");
    }

    #[test_case(1.5, "1.5")]
    #[test_case(2.0, "2")]
    #[test_case(0.000_012_34, "0.00001234")]
    #[test_case(-0.25, "-0.25")]
    #[test_case(f64::INFINITY, "Infinity")]
    fn double_writer_trims(value: f64, expected: &str) {
        assert_eq!(double_field(Some(value)), expected);
    }

    #[test]
    fn decimal_writer_is_plain() {
        assert_eq!(decimal_field(Some(dec("100.500"))), "100.5");
        assert_eq!(decimal_field(Some(dec("0"))), "0");
    }

    #[test]
    fn writer_output_decodes_back_to_unset() {
        assert_eq!(decode_int(&int_field(None)).unwrap(), None);
        assert_eq!(decode_double(&double_field(None)).unwrap(), None);
        assert_eq!(decode_decimal(&decimal_field(None)).unwrap(), None);
    }

    #[test]
    fn reader_walks_fields_in_order() {
        let fields: Vec<String> = ["Alice", "12345", "1.5", "1", "99.95"]
            .iter()
            .map(ToString::to_string)
            .collect();
        let mut reader = FieldReader::new(&fields);

        assert_eq!(reader.next_text().unwrap(), "Alice");
        assert_eq!(reader.next_long().unwrap(), Some(12345));
        assert_eq!(reader.next_double().unwrap(), Some(1.5));
        assert_eq!(reader.next_bool().unwrap(), Some(true));
        assert_eq!(reader.next_decimal().unwrap(), Some(dec("99.95")));
        assert_eq!(reader.remaining(), 0);

        // Past the end: numeric reads are unset, text reads fail.
        assert_eq!(reader.next_int().unwrap(), None);
        assert!(matches!(
            reader.next_text(),
            Err(FieldError::Missing { position: 6, .. })
        ));
    }

    #[test]
    fn reader_reports_invalid_position() {
        let fields = vec!["x".to_string(), "nope".to_string()];
        let mut reader = FieldReader::new(&fields);
        reader.skip();
        let err = reader.next_int().unwrap_err();
        assert_eq!(
            err,
            FieldError::Invalid {
                position: 1,
                kind: FieldKind::Int,
                value: "nope".to_string(),
            }
        );
    }

    #[test]
    fn reader_rest_and_require() {
        let fields: Vec<String> = ["a", "b", "c"].iter().map(ToString::to_string).collect();
        let mut reader = FieldReader::new(&fields);
        assert!(reader.require(3, FieldKind::Text).is_ok());
        assert!(reader.require(4, FieldKind::Text).is_err());
        reader.skip();
        assert_eq!(reader.rest(), vec!["b", "c"]);
        assert!(reader.rest().is_empty());
    }
}
