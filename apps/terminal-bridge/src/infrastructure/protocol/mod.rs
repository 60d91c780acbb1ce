//! Terminal wire protocol: frame codec, typed fields and the legacy transform.

pub mod error_codes;
pub mod fields;
pub mod frame;
pub mod legacy;

pub use fields::{
    FieldError, FieldKind, FieldReader, INFINITY_LITERAL, UNSET_DOUBLE, UNSET_INTEGER,
    UNSET_LONG, decimal_field, double_field, int_field, long_field,
};
pub use frame::{DELIMITER, DecodeError, Frame, decode, encode};
pub use legacy::{InboundDecoder, TransformError, WireMode};
