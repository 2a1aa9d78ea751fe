//! Debezium packed decimal decoding
//!
//! Debezium emits `DECIMAL`/`NUMERIC` columns (with `decimal.handling.mode=precise`)
//! as an object `{"value": "<base64>", "scale": n}`. The bytes are the unscaled
//! value as a big-endian two's-complement integer of arbitrary length.

use base64::Engine;
use num_bigint::BigInt;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecimalDecodeError {
    #[error("invalid base64: {0}")]
    Base64(String),

    #[error("scale {0} is outside 0..={max}", max = Decimal::MAX_SCALE)]
    Scale(i64),

    #[error("unscaled value {0} does not fit a 96-bit decimal")]
    Overflow(BigInt),
}

/// Decode `packed` at `scale`, degrading to zero on failure.
pub fn decode(packed: &[u8], scale: i64) -> Decimal {
    try_decode(packed, scale).unwrap_or_else(|e| {
        warn!(error = %e, scale, "Error decoding decimal, returning 0");
        Decimal::ZERO
    })
}

/// Decode the base64 text Debezium puts in `price.value`, degrading to zero on failure.
pub fn decode_base64(encoded: &str, scale: i64) -> Decimal {
    try_decode_base64(encoded, scale).unwrap_or_else(|e| {
        warn!(error = %e, value = encoded, scale, "Error decoding decimal, returning 0");
        Decimal::ZERO
    })
}

pub fn try_decode_base64(encoded: &str, scale: i64) -> Result<Decimal, DecimalDecodeError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| DecimalDecodeError::Base64(e.to_string()))?;
    try_decode(&bytes, scale)
}

/// Strict decode. An empty byte sequence is zero.
pub fn try_decode(packed: &[u8], scale: i64) -> Result<Decimal, DecimalDecodeError> {
    let scale = u32::try_from(scale)
        .ok()
        .filter(|s| *s <= Decimal::MAX_SCALE)
        .ok_or(DecimalDecodeError::Scale(scale))?;

    let unscaled = BigInt::from_signed_bytes_be(packed);
    let mantissa =
        i128::try_from(&unscaled).map_err(|_| DecimalDecodeError::Overflow(unscaled.clone()))?;

    Decimal::try_from_i128_with_scale(mantissa, scale)
        .map_err(|_| DecimalDecodeError::Overflow(unscaled))
}

/// Encode `value` the way Debezium does: minimal big-endian two's complement.
pub fn encode(value: Decimal) -> (Vec<u8>, u32) {
    let unscaled = BigInt::from(value.mantissa());
    (unscaled.to_signed_bytes_be(), value.scale())
}
