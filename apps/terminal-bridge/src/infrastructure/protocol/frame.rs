//! Frame Codec
//!
//! Encodes and decodes the terminal's delimited text frames.
//!
//! # Wire Format
//!
//! ```text
//! CODE^SUB^field1^field2^...^fieldN^
//! ```
//!
//! `^` is the only delimiter. There is no escaping, no length prefix and no
//! checksum. A serialized frame always ends with the delimiter, so decoding
//! trims trailing empty tokens. An empty token that survives the trim sits
//! between two data fields and means a delimiter leaked into a value.

use serde::Serialize;

use super::fields::FieldReader;

/// The reserved field delimiter.
pub const DELIMITER: char = '^';

/// Minimum number of tokens in a valid frame (command, sub-command, data).
const MIN_TOKENS: usize = 3;

/// Framing errors produced by [`decode`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Fewer than three delimiter-separated tokens.
    #[error("frame too short: expected at least {MIN_TOKENS} tokens, got {tokens}")]
    TooShort {
        /// Number of tokens found.
        tokens: usize,
    },

    /// An empty data field appears before the last non-empty field.
    #[error("hidden delimiter detected at data field {position}")]
    HiddenDelimiter {
        /// Zero-based index of the empty data field.
        position: usize,
    },
}

impl DecodeError {
    /// Short label used for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TooShort { .. } => "too_short",
            Self::HiddenDelimiter { .. } => "hidden_delimiter",
        }
    }
}

/// One decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    /// Fixed-width command code (e.g. `F020`).
    pub command: String,
    /// Sub-command token.
    pub sub_command: String,
    /// Ordered data fields.
    pub fields: Vec<String>,
}

impl Frame {
    /// Create a frame with no data fields.
    #[must_use]
    pub fn new(command: impl Into<String>, sub_command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            sub_command: sub_command.into(),
            fields: Vec::new(),
        }
    }

    /// Append one data field.
    #[must_use]
    pub fn with_field(mut self, field: impl ToString) -> Self {
        self.fields.push(field.to_string());
        self
    }

    /// Append several data fields in order.
    #[must_use]
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        self.fields
            .extend(fields.into_iter().map(|f| f.to_string()));
        self
    }

    /// Serialize this frame to its wire string.
    #[must_use]
    pub fn encode(&self) -> String {
        encode(&self.command, &self.sub_command, &self.fields)
    }

    /// Get a data field by position.
    #[must_use]
    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    /// Sequential typed reader over the data fields.
    #[must_use]
    pub fn reader(&self) -> FieldReader<'_> {
        FieldReader::new(&self.fields)
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

impl std::str::FromStr for Frame {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode(s)
    }
}

/// Encode a command, sub-command and ordered fields into a wire string.
///
/// Fields must not contain [`DELIMITER`]. This is not checked: the protocol
/// has no escaping, so an embedded delimiter is a caller error that only the
/// remote side would notice.
#[must_use]
pub fn encode<S: AsRef<str>>(command: &str, sub_command: &str, fields: &[S]) -> String {
    let capacity = command.len()
        + sub_command.len()
        + fields.iter().map(|f| f.as_ref().len() + 1).sum::<usize>()
        + 2;
    let mut wire = String::with_capacity(capacity);

    wire.push_str(command);
    wire.push(DELIMITER);
    wire.push_str(sub_command);
    wire.push(DELIMITER);
    for field in fields {
        wire.push_str(field.as_ref());
        wire.push(DELIMITER);
    }

    wire
}

/// Decode a wire string into a [`Frame`].
///
/// # Errors
///
/// Returns [`DecodeError::TooShort`] when there are fewer than three tokens
/// and [`DecodeError::HiddenDelimiter`] when an empty data field precedes the
/// last non-empty one.
pub fn decode(wire: &str) -> Result<Frame, DecodeError> {
    let tokens: Vec<&str> = wire.split(DELIMITER).collect();

    if tokens.len() < MIN_TOKENS {
        return Err(DecodeError::TooShort {
            tokens: tokens.len(),
        });
    }

    let data = &tokens[2..];
    let last_non_empty = data.iter().rposition(|t| !t.is_empty());
    let data = last_non_empty.map_or(&data[..0], |last| &data[..=last]);

    if let Some(position) = data.iter().position(|t| t.is_empty()) {
        return Err(DecodeError::HiddenDelimiter { position });
    }

    Ok(Frame {
        command: tokens[0].to_string(),
        sub_command: tokens[1].to_string(),
        fields: data.iter().map(|t| (*t).to_string()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test]
    fn encode_appends_trailing_delimiter() {
        assert_eq!(encode::<&str>("F000", "1", &[]), "F000^1^");
        assert_eq!(encode("F020", "2", &["EURUSD"]), "F020^2^EURUSD^");
        assert_eq!(
            encode("F123", "Y", &["param1", "param2", "param3"]),
            "F123^Y^param1^param2^param3^"
        );
    }

    #[test]
    fn decode_trims_trailing_empties() {
        let frame = decode("F123^Y^param1^param2^param3^^").unwrap();
        assert_eq!(frame.command, "F123");
        assert_eq!(frame.sub_command, "Y");
        assert_eq!(frame.fields, vec!["param1", "param2", "param3"]);
    }

    #[test]
    fn decode_rejects_hidden_delimiter() {
        let err = decode("F123^Y^param1^^param3^").unwrap_err();
        assert_eq!(err, DecodeError::HiddenDelimiter { position: 1 });
        assert_eq!(err.kind(), "hidden_delimiter");
    }

    #[test]
    fn decode_rejects_short_frame() {
        let err = decode("F123^Y").unwrap_err();
        assert_eq!(err, DecodeError::TooShort { tokens: 2 });
        assert_eq!(err.kind(), "too_short");
    }

    #[test_case("F000^1^", &[] ; "no data")]
    #[test_case("F000^1^^^^", &[] ; "only empties")]
    #[test_case("F001^1^Alice^12345^USD^", &["Alice", "12345", "USD"] ; "account fields")]
    #[test_case("F020^2^EURUSD", &["EURUSD"] ; "unterminated field")]
    fn decode_accepts(wire: &str, expected: &[&str]) {
        let frame = decode(wire).unwrap();
        assert_eq!(frame.fields, expected);
    }

    #[test_case("" ; "empty input")]
    #[test_case("F000" ; "command only")]
    #[test_case("F000^1" ; "no trailing delimiter")]
    #[test_case("^" ; "single delimiter")]
    fn decode_too_short(wire: &str) {
        assert!(matches!(decode(wire), Err(DecodeError::TooShort { .. })));
    }

    #[test]
    fn empty_command_tokens_are_preserved() {
        let frame = decode("^^value^").unwrap();
        assert_eq!(frame.command, "");
        assert_eq!(frame.sub_command, "");
        assert_eq!(frame.fields, vec!["value"]);
    }

    #[test]
    fn frame_builder_and_display() {
        let frame = Frame::new("F003", "2").with_field("GBPUSD").with_fields([1, 2]);
        assert_eq!(frame.to_string(), "F003^2^GBPUSD^1^2^");
        assert_eq!(frame.field(0), Some("GBPUSD"));
        assert_eq!(frame.field(3), None);

        let parsed: Frame = "F003^2^GBPUSD^1^2^".parse().unwrap();
        assert_eq!(parsed, frame);
    }

    fn field_strategy() -> impl Strategy<Value = String> {
        "[A-Za-z0-9._ -]{1,12}"
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(
            command in "[A-Z][0-9]{3}",
            sub_command in "[0-9A-Z]{1,2}",
            fields in proptest::collection::vec(field_strategy(), 0..8),
        ) {
            let wire = encode(&command, &sub_command, &fields);
            let frame = decode(&wire).unwrap();
            prop_assert_eq!(frame.command, command);
            prop_assert_eq!(frame.sub_command, sub_command);
            prop_assert_eq!(frame.fields, fields);
        }
    }
}
