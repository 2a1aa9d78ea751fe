use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use tracing::debug;

use super::decimal;
use crate::error::{AppError, Result};

static NULL: Value = Value::Null;

/// Row state as carried in `before`/`after`, in the connector's column order.
pub type RowImage = Map<String, Value>;

/// CDC operation types from Debezium
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CdcOperation {
    /// c = create
    Create,
    /// u = update
    Update,
    /// d = delete
    Delete,
    /// r = read (snapshot)
    Read,
    /// Missing or unrecognised op code
    Unknown,
}

impl CdcOperation {
    pub fn from_code(code: Option<&str>) -> Self {
        match code {
            Some("c") => Self::Create,
            Some("u") => Self::Update,
            Some("d") => Self::Delete,
            Some("r") => Self::Read,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for CdcOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Read => "read",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Result of parsing one raw message.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedMessage {
    /// Empty or tombstone payload; nothing to process.
    Skip,
    Change(ChangeEnvelope),
}

/// A Debezium change event for a single row.
///
/// Parsing is permissive: each envelope field that is missing or has the
/// wrong shape is replaced by its default (`Unknown`, `false`, `None`).
/// Only a payload that is not JSON at all is rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEnvelope {
    pub operation: CdcOperation,
    pub is_snapshot: bool,
    pub before: Option<RowImage>,
    pub after: Option<RowImage>,
    /// `source.table`, when the connector sends it
    pub table: Option<String>,
    /// Transaction timestamp in milliseconds since epoch
    pub ts_ms: Option<i64>,
}

impl ChangeEnvelope {
    /// Parse a raw message payload.
    ///
    /// Accepts both converter layouts: `{"schema": .., "payload": {..}}` and the
    /// bare payload produced with `schemas.enable=false`.
    pub fn parse(raw: Option<&[u8]>) -> Result<ParsedMessage> {
        let raw = match raw {
            Some(raw) if !raw.iter().all(u8::is_ascii_whitespace) => raw,
            _ => return Ok(ParsedMessage::Skip),
        };

        let json: Value = serde_json::from_slice(raw)
            .map_err(|e| AppError::MalformedEnvelope(format!("invalid JSON: {}", e)))?;

        Ok(ParsedMessage::Change(Self::from_value(&json)))
    }

    pub fn from_value(json: &Value) -> Self {
        let payload = match json.get("payload") {
            Some(payload) => payload,
            None if json.get("op").is_some() => json,
            None => {
                debug!("CDC envelope has no payload, using defaults");
                &NULL
            }
        };

        let operation = CdcOperation::from_code(payload.get("op").and_then(Value::as_str));

        let is_snapshot = match payload.get("source").and_then(|s| s.get("snapshot")) {
            Some(Value::String(marker)) => marker == "true" || marker == "last",
            Some(Value::Bool(marker)) => *marker,
            _ => false,
        };

        Self {
            operation,
            is_snapshot,
            before: row_image(payload, "before"),
            after: row_image(payload, "after"),
            table: payload
                .get("source")
                .and_then(|s| s.get("table"))
                .and_then(Value::as_str)
                .map(str::to_string),
            ts_ms: payload.get("ts_ms").and_then(Value::as_i64),
        }
    }
}

fn row_image(payload: &Value, field: &str) -> Option<RowImage> {
    match payload.get(field) {
        Some(Value::Object(row)) => Some(row.clone()),
        None | Some(Value::Null) => None,
        Some(other) => {
            debug!(field, value = %other, "CDC row image is not an object, treating as absent");
            None
        }
    }
}

/// The products row with `price` decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRow {
    pub id: i64,
    pub name: String,
    pub price: Decimal,
}

impl DecodedRow {
    /// Decode a row image.
    ///
    /// Missing or null columns default to `0` / `""` / `0`. An `id` or `name`
    /// of the wrong JSON type is a validation error; any problem inside
    /// `price` degrades to zero.
    pub fn from_image(row: &RowImage) -> Result<Self> {
        Ok(Self {
            id: decode_id(row)?,
            name: match row.get("name") {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(name)) => name.clone(),
                Some(other) => {
                    return Err(AppError::Validation(format!(
                        "Field 'name' is not a string: {}",
                        other
                    )))
                }
            },
            price: decode_price(row.get("price")),
        })
    }
}

pub fn decode_id(row: &RowImage) -> Result<i64> {
    match row.get("id") {
        None | Some(Value::Null) => Ok(0),
        Some(value) => value
            .as_i64()
            .ok_or_else(|| AppError::Validation(format!("Field 'id' is not an integer: {}", value))),
    }
}

fn decode_price(price: Option<&Value>) -> Decimal {
    let price = match price {
        None | Some(Value::Null) => return Decimal::ZERO,
        Some(Value::Object(price)) => price,
        Some(other) => {
            tracing::warn!(value = %other, "Field 'price' is not a packed decimal, returning 0");
            return Decimal::ZERO;
        }
    };

    let scale = match price.get("scale") {
        None | Some(Value::Null) => 0,
        Some(scale) => match scale.as_i64() {
            Some(scale) => scale,
            None => {
                tracing::warn!(scale = %scale, "Decimal scale is not an integer, returning 0");
                return Decimal::ZERO;
            }
        },
    };

    match price.get("value") {
        Some(Value::String(encoded)) => decimal::decode_base64(encoded, scale),
        None | Some(Value::Null) => Decimal::ZERO,
        Some(other) => {
            tracing::warn!(value = %other, "Decimal value is not base64 text, returning 0");
            Decimal::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    fn parse(value: Value) -> ChangeEnvelope {
        let raw = serde_json::to_vec(&value).unwrap();
        match ChangeEnvelope::parse(Some(&raw)).unwrap() {
            ParsedMessage::Change(envelope) => envelope,
            ParsedMessage::Skip => panic!("unexpected skip"),
        }
    }

    fn row(value: Value) -> RowImage {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_operation_codes() {
        assert_eq!(CdcOperation::from_code(Some("c")), CdcOperation::Create);
        assert_eq!(CdcOperation::from_code(Some("u")), CdcOperation::Update);
        assert_eq!(CdcOperation::from_code(Some("d")), CdcOperation::Delete);
        assert_eq!(CdcOperation::from_code(Some("r")), CdcOperation::Read);
        assert_eq!(CdcOperation::from_code(Some("t")), CdcOperation::Unknown);
        assert_eq!(CdcOperation::from_code(None), CdcOperation::Unknown);
    }

    #[test]
    fn test_parse_schema_wrapped_update() {
        let envelope = parse(json!({
            "schema": {"type": "struct"},
            "payload": {
                "op": "u",
                "before": {"id": 1, "name": "A"},
                "after": {"id": 1, "name": "A2"},
                "source": {"snapshot": "false", "table": "products"},
                "ts_ms": 1700000000000i64
            }
        }));

        assert_eq!(envelope.operation, CdcOperation::Update);
        assert!(!envelope.is_snapshot);
        assert_eq!(envelope.before.unwrap()["name"], json!("A"));
        assert_eq!(envelope.after.unwrap()["name"], json!("A2"));
        assert_eq!(envelope.table.as_deref(), Some("products"));
        assert_eq!(envelope.ts_ms, Some(1700000000000));
    }

    #[test]
    fn test_parse_unwrapped_payload() {
        let envelope = parse(json!({"op": "c", "before": null, "after": {"id": 7}}));
        assert_eq!(envelope.operation, CdcOperation::Create);
        assert!(envelope.before.is_none());
        assert_eq!(envelope.after.unwrap()["id"], json!(7));
    }

    #[test]
    fn test_snapshot_markers() {
        for (marker, expected) in [
            (json!("true"), true),
            (json!("last"), true),
            (json!("first"), false),
            (json!("false"), false),
            (json!(true), true),
            (json!(1), false),
        ] {
            let envelope = parse(json!({"payload": {"op": "r", "source": {"snapshot": marker}}}));
            assert_eq!(envelope.is_snapshot, expected, "marker {:?}", marker);
        }

        let envelope = parse(json!({"payload": {"op": "r", "source": {}}}));
        assert!(!envelope.is_snapshot);
    }

    #[test]
    fn test_missing_shape_defaults() {
        let envelope = parse(json!({"unrelated": true}));
        assert_eq!(envelope.operation, CdcOperation::Unknown);
        assert!(!envelope.is_snapshot);
        assert!(envelope.before.is_none());
        assert!(envelope.after.is_none());

        let envelope = parse(json!({"payload": {"op": 5, "after": "oops"}}));
        assert_eq!(envelope.operation, CdcOperation::Unknown);
        assert!(envelope.after.is_none());
    }

    #[test]
    fn test_empty_payload_is_skip() {
        assert_eq!(ChangeEnvelope::parse(None).unwrap(), ParsedMessage::Skip);
        assert_eq!(ChangeEnvelope::parse(Some(b"")).unwrap(), ParsedMessage::Skip);
        assert_eq!(ChangeEnvelope::parse(Some(b" \n")).unwrap(), ParsedMessage::Skip);
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        let err = ChangeEnvelope::parse(Some(b"{not json")).unwrap_err();
        assert!(matches!(err, AppError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_decode_row() {
        let decoded = DecodedRow::from_image(&row(json!({
            "id": 42,
            "name": "Widget",
            "price": {"value": "MDk=", "scale": 2}
        })))
        .unwrap();

        assert_eq!(decoded.id, 42);
        assert_eq!(decoded.name, "Widget");
        assert_eq!(decoded.price, Decimal::from_str("123.45").unwrap());
    }

    #[test]
    fn test_decode_row_defaults() {
        let decoded = DecodedRow::from_image(&row(json!({"extra": 1}))).unwrap();
        assert_eq!(decoded.id, 0);
        assert_eq!(decoded.name, "");
        assert_eq!(decoded.price, Decimal::ZERO);

        let decoded = DecodedRow::from_image(&row(json!({"price": {"value": "MDk="}}))).unwrap();
        assert_eq!(decoded.price, Decimal::from(12345));
    }

    #[test]
    fn test_decode_row_bad_price_is_zero() {
        for price in [
            json!("12.50"),
            json!({"value": "%%%", "scale": 2}),
            json!({"value": "MDk=", "scale": "two"}),
            json!({"value": 12345, "scale": 2}),
        ] {
            let decoded = DecodedRow::from_image(&row(json!({"id": 1, "price": price}))).unwrap();
            assert_eq!(decoded.price, Decimal::ZERO);
        }
    }

    #[test]
    fn test_decode_row_type_mismatch_fails() {
        assert!(matches!(
            DecodedRow::from_image(&row(json!({"id": "abc"}))),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            DecodedRow::from_image(&row(json!({"name": 3}))),
            Err(AppError::Validation(_))
        ));
    }
}
