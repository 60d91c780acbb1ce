//! Remote error-code dictionary.
//!
//! The terminal reports failures with five-digit codes in place of the
//! expected reply. Lookups attach a readable description to protocol
//! mismatches.

use super::frame::Frame;

/// Known terminal error codes.
const ERROR_CODES: &[(&str, &str)] = &[
    ("00001", "Undefined check connection error"),
    ("00101", "IP address error"),
    ("00102", "Port number error"),
    ("00103", "Connection error with license EA"),
    ("00104", "Undefined answer from license EA"),
    ("00301", "Unknown instrument for broker"),
    ("00302", "Instrument not in demo"),
    ("00304", "Unknown instrument for broker"),
    ("08201", "Log file not existing"),
    ("08202", "Log file empty"),
    ("08203", "Error in reading log file"),
    ("08204", "Function not implemented"),
    ("09101", "Trading not allowed"),
    ("09102", "Unknown instrument for broker"),
    ("09103", "Function not implemented"),
    ("99900", "Wrong authorization code"),
    ("99901", "Undefined error"),
    ("99999", "Dummy"),
];

/// Describe a remote error code.
#[must_use]
pub fn describe(code: &str) -> Option<&'static str> {
    ERROR_CODES
        .iter()
        .find(|(known, _)| *known == code.trim())
        .map(|(_, description)| *description)
}

/// Find the first known error code in a reply's leading tokens.
#[must_use]
pub fn describe_reply(frame: &Frame) -> Option<(String, &'static str)> {
    std::iter::once(frame.command.as_str())
        .chain(std::iter::once(frame.sub_command.as_str()))
        .chain(frame.fields.first().map(String::as_str))
        .find_map(|token| describe(token).map(|d| (token.trim().to_string(), d)))
}
