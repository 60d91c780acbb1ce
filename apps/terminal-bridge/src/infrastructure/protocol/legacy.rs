//! Legacy Wire Transform
//!
//! Older terminal builds obfuscate replies: each character is shifted up by
//! [`SHIFT_OFFSET`] and the resulting bytes are run-length compressed as
//! `(byte, count)` pairs. Inbound traffic is expanded then shifted back.
//! Outbound requests are always sent in plain text; the encoders here exist
//! for building fixtures and fake terminals.

use std::str::FromStr;
use std::string::FromUtf8Error;

/// Offset added to each character code by the legacy encoder.
pub const SHIFT_OFFSET: u8 = 42;

/// Longest run a single `(byte, count)` pair can describe.
const MAX_RUN: usize = u8::MAX as usize;

/// Errors applying the inbound transform.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    /// A byte below the shift offset cannot come from the legacy encoder.
    #[error("byte {byte} at offset {offset} is below the shift offset")]
    BelowOffset {
        /// Offending byte value.
        byte: u8,
        /// Position in the expanded stream.
        offset: usize,
    },

    /// A character cannot be represented after shifting.
    #[error("character {0:?} cannot be shift-encoded")]
    Unencodable(char),

    /// Plain replies must be UTF-8.
    #[error("reply is not valid UTF-8: {0}")]
    Utf8(#[from] FromUtf8Error),
}

/// How inbound bytes are turned into text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WireMode {
    /// Bytes are UTF-8 text.
    #[default]
    Plain,
    /// Bytes are run-length compressed and shifted.
    Legacy,
}

impl WireMode {
    /// Configuration name of this mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Legacy => "legacy",
        }
    }

    /// Convert inbound bytes to text.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError`] when the bytes are not valid for this mode.
    pub fn decode_inbound(self, bytes: &[u8]) -> Result<String, TransformError> {
        match self {
            Self::Plain => Ok(String::from_utf8(bytes.to_vec())?),
            Self::Legacy => decode_legacy(bytes),
        }
    }

    /// Convert text to the bytes a terminal in this mode would send.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError::Unencodable`] for characters outside the
    /// legacy range.
    pub fn encode_outbound(self, text: &str) -> Result<Vec<u8>, TransformError> {
        match self {
            Self::Plain => Ok(text.as_bytes().to_vec()),
            Self::Legacy => encode_legacy(text),
        }
    }
}

impl FromStr for WireMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" => Ok(Self::Plain),
            "legacy" => Ok(Self::Legacy),
            other => Err(format!("unknown wire mode: {other}")),
        }
    }
}

impl std::fmt::Display for WireMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expand `(byte, count)` pairs. A trailing unpaired byte is emitted once.
#[must_use]
pub fn run_length_expand(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut pairs = bytes.chunks_exact(2);

    for pair in pairs.by_ref() {
        let (byte, count) = (pair[0], pair[1]);
        out.extend(std::iter::repeat_n(byte, usize::from(count)));
    }
    out.extend_from_slice(pairs.remainder());

    out
}

/// Compress bytes into `(byte, count)` pairs with runs capped at 255.
#[must_use]
pub fn run_length_compress(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().copied().peekable();

    while let Some(byte) = iter.next() {
        let mut count = 1usize;
        while count < MAX_RUN && iter.peek() == Some(&byte) {
            iter.next();
            count += 1;
        }
        out.push(byte);
        #[allow(clippy::cast_possible_truncation)]
        out.push(count as u8);
    }

    out
}

/// Shift every byte down by [`SHIFT_OFFSET`] and read it as a character.
///
/// # Errors
///
/// Returns [`TransformError::BelowOffset`] for bytes below the offset.
pub fn shift_decode(bytes: &[u8]) -> Result<String, TransformError> {
    bytes
        .iter()
        .enumerate()
        .map(|(offset, &byte)| {
            byte.checked_sub(SHIFT_OFFSET)
                .map(char::from)
                .ok_or(TransformError::BelowOffset { byte, offset })
        })
        .collect()
}

/// Shift every character up by [`SHIFT_OFFSET`].
///
/// # Errors
///
/// Returns [`TransformError::Unencodable`] when a shifted code would not fit
/// in a byte.
pub fn shift_encode(text: &str) -> Result<Vec<u8>, TransformError> {
    text.chars()
        .map(|c| {
            u8::try_from(u32::from(c))
                .ok()
                .and_then(|b| b.checked_add(SHIFT_OFFSET))
                .ok_or(TransformError::Unencodable(c))
        })
        .collect()
}

/// Full inbound transform: expand, then shift back.
///
/// # Errors
///
/// See [`shift_decode`].
pub fn decode_legacy(bytes: &[u8]) -> Result<String, TransformError> {
    shift_decode(&run_length_expand(bytes))
}

/// Inverse of [`decode_legacy`].
///
/// # Errors
///
/// See [`shift_encode`].
pub fn encode_legacy(text: &str) -> Result<Vec<u8>, TransformError> {
    Ok(run_length_compress(&shift_encode(text)?))
}

/// Inbound transform over a byte stream whose reads may split a UTF-8
/// character or a `(byte, count)` pair.
///
/// Each [`push`](Self::push) returns the text completed so far and holds the
/// unfinished tail for the next read.
#[derive(Debug, Clone, Default)]
pub struct InboundDecoder {
    mode: WireMode,
    pending: Vec<u8>,
}

impl InboundDecoder {
    /// Create a decoder for `mode`.
    #[must_use]
    pub const fn new(mode: WireMode) -> Self {
        Self {
            mode,
            pending: Vec::new(),
        }
    }

    /// Bytes held back until a later read completes them.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Decode everything `bytes` completes.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError`] when the completed bytes are invalid for
    /// the mode. An incomplete tail is never an error here.
    pub fn push(&mut self, bytes: &[u8]) -> Result<String, TransformError> {
        self.pending.extend_from_slice(bytes);

        let ready = match self.mode {
            WireMode::Plain => match std::str::from_utf8(&self.pending) {
                Ok(_) => self.pending.len(),
                Err(e) if e.error_len().is_none() => e.valid_up_to(),
                Err(_) => {
                    return String::from_utf8(std::mem::take(&mut self.pending))
                        .map_err(TransformError::from);
                }
            },
            WireMode::Legacy => self.pending.len() - self.pending.len() % 2,
        };

        let complete: Vec<u8> = self.pending.drain(..ready).collect();
        self.mode.decode_inbound(&complete)
    }

    /// Decode the held-back tail once no more bytes will arrive.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError`] for a truncated UTF-8 character.
    pub fn finish(&mut self) -> Result<String, TransformError> {
        let rest = std::mem::take(&mut self.pending);
        self.mode.decode_inbound(&rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn expands_pairs() {
        assert_eq!(run_length_expand(&[65, 3, 66, 1]), b"AAAB");
    }

    #[test]
    fn zero_count_emits_nothing() {
        assert_eq!(run_length_expand(&[65, 0, 66, 2]), b"BB");
    }

    #[test]
    fn trailing_lone_byte_is_kept() {
        assert_eq!(run_length_expand(&[65, 2, 67]), b"AAC");
        assert_eq!(run_length_expand(&[]), b"");
    }

    #[test]
    fn long_runs_split_at_255() {
        let input = vec![7u8; 300];
        let compressed = run_length_compress(&input);
        assert_eq!(compressed, vec![7, 255, 7, 45]);
        assert_eq!(run_length_expand(&compressed), input);
    }

    #[test]
    fn literal_bytes_survive_compress_then_expand() {
        let literal = b"hello";
        assert_eq!(run_length_expand(&run_length_compress(literal)), literal);
    }

    #[test]
    fn decodes_known_fixture() {
        // "F000^1^" shifted by 42 then compressed.
        let wire = [112, 1, 90, 3, 136, 1, 91, 1, 136, 1];
        assert_eq!(decode_legacy(&wire).unwrap(), "F000^1^");
    }

    #[test]
    fn below_offset_is_rejected() {
        let err = shift_decode(&[100, 41]).unwrap_err();
        assert_eq!(err, TransformError::BelowOffset { byte: 41, offset: 1 });
    }

    #[test]
    fn unencodable_character() {
        assert_eq!(
            shift_encode("\u{20ac}").unwrap_err(),
            TransformError::Unencodable('\u{20ac}')
        );
        // 250 + 42 overflows a byte.
        assert!(shift_encode("\u{fa}").is_err());
    }

    #[test]
    fn legacy_text_round_trips() {
        let text = "F020^2^1700000000^1.08512^1.08510^0^100^2^1700000000123^";
        let bytes = WireMode::Legacy.encode_outbound(text).unwrap();
        assert_eq!(WireMode::Legacy.decode_inbound(&bytes).unwrap(), text);
    }

    #[test]
    fn plain_mode_rejects_invalid_utf8() {
        assert!(matches!(
            WireMode::Plain.decode_inbound(&[0xff, 0xfe]),
            Err(TransformError::Utf8(_))
        ));
    }

    #[test_case("plain", WireMode::Plain)]
    #[test_case("LEGACY", WireMode::Legacy)]
    #[test_case(" legacy ", WireMode::Legacy)]
    fn parses_wire_mode(raw: &str, expected: WireMode) {
        assert_eq!(raw.parse::<WireMode>().unwrap(), expected);
    }

    #[test]
    fn rejects_unknown_wire_mode() {
        assert!("binary".parse::<WireMode>().is_err());
    }

    #[test]
    fn plain_decoder_holds_split_character() {
        let mut decoder = InboundDecoder::new(WireMode::Plain);
        assert_eq!(decoder.push(b"Zo\xC3").unwrap(), "Zo");
        assert_eq!(decoder.pending_len(), 1);
        assert_eq!(decoder.push(b"\xAB^").unwrap(), "\u{eb}^");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn plain_decoder_rejects_invalid_bytes() {
        let mut decoder = InboundDecoder::new(WireMode::Plain);
        assert!(matches!(
            decoder.push(&[b'F', 0xff, b'0']),
            Err(TransformError::Utf8(_))
        ));
    }

    #[test]
    fn plain_decoder_finish_reports_truncated_character() {
        let mut decoder = InboundDecoder::new(WireMode::Plain);
        assert_eq!(decoder.push(b"ok\xC3").unwrap(), "ok");
        assert!(decoder.finish().is_err());
    }

    #[test]
    fn legacy_decoder_holds_split_pair() {
        let wire = encode_legacy("F000^1^").unwrap();
        let mut decoder = InboundDecoder::new(WireMode::Legacy);
        assert_eq!(decoder.push(&wire[..3]).unwrap(), "F");
        assert_eq!(decoder.pending_len(), 1);
        assert_eq!(decoder.push(&wire[3..]).unwrap(), "000^1^");
        assert_eq!(decoder.finish().unwrap(), "");
    }

    #[test]
    fn legacy_decoder_finish_emits_lone_byte() {
        let mut decoder = InboundDecoder::new(WireMode::Legacy);
        assert_eq!(decoder.push(&[112, 1, 90]).unwrap(), "F");
        assert_eq!(decoder.finish().unwrap(), "0");
    }
}
