//! Helpers for turning provider payloads into normalized values

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use marketsync_core::NormalizedOrder;
use marketsync_registry::{PollResult, ProviderError, ProviderResult, RejectedOrder};
use rust_decimal::Decimal;
use serde_json::{Map, Value as JsonValue};
use std::str::FromStr;

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Decimal amount from a string such as "123.45"
pub fn parse_amount(raw: &str) -> ProviderResult<Decimal> {
    Decimal::from_str(raw.trim())
        .map_err(|e| ProviderError::Decode(format!("invalid amount '{}': {}", raw, e)))
}

/// Decimal amount from a JSON string or number
pub fn json_amount(value: &JsonValue) -> Option<Decimal> {
    match value {
        JsonValue::String(s) => Decimal::from_str(s.trim()).ok(),
        JsonValue::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

/// Like [`json_amount`] but a missing or malformed value is a decode error
pub fn required_amount(value: &JsonValue, field: &str) -> ProviderResult<Decimal> {
    json_amount(value).ok_or_else(|| {
        ProviderError::Decode(format!("missing or invalid amount '{}': {}", field, value))
    })
}

/// Integer minor units (cents, grosze) to a decimal amount
pub fn from_minor_units(units: i64) -> Decimal {
    Decimal::new(units, 2)
}

pub fn to_minor_units(amount: Decimal) -> i64 {
    (amount * Decimal::ONE_HUNDRED).round().mantissa() as i64
}

/// Collects one poll's orders, keeping decode failures apart so a single
/// bad payload does not sink the page.
#[derive(Debug, Default)]
pub struct OrderBatch {
    orders: Vec<NormalizedOrder>,
    rejected: Vec<RejectedOrder>,
}

impl OrderBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, external_id: Option<String>, result: ProviderResult<NormalizedOrder>) {
        match result {
            Ok(order) => self.orders.push(order),
            Err(error) => self.rejected.push(RejectedOrder {
                external_id: external_id.unwrap_or_else(|| "<unknown>".to_string()),
                error,
            }),
        }
    }

    /// Orders seen so far, accepted or not
    pub fn len(&self) -> usize {
        self.orders.len() + self.rejected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn finish(self, next_cursor: Option<String>) -> PollResult {
        PollResult::new(self.orders, next_cursor).with_rejected(self.rejected)
    }
}

/// Order id as a string whether the payload carries it as text or a number
pub fn json_id(value: &JsonValue, pointer: &str) -> Option<String> {
    match value.pointer(pointer)? {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// RFC 3339 timestamps, or naive timestamps taken as UTC
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// New timestamp cursor when `candidate` is strictly later than `current`.
///
/// An empty or unparsable current cursor is always superseded.
pub fn advance_timestamp_cursor(current: &str, candidate: Option<DateTime<Utc>>) -> Option<String> {
    let candidate = candidate?;
    match parse_timestamp(current) {
        Some(existing) if candidate <= existing => None,
        _ => Some(format_timestamp(candidate)),
    }
}

pub fn join_name(first: Option<&str>, last: Option<&str>) -> String {
    [first, last]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Object payloads as a map; anything else is wrapped under `raw`
pub fn raw_map(value: JsonValue) -> Map<String, JsonValue> {
    match value {
        JsonValue::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("raw".to_string(), other);
            map
        }
    }
}

/// Case-insensitive lookup in a status table
pub fn lookup_status<T: Copy>(table: &[(&str, T)], native: &str) -> Option<T> {
    let native = native.trim();
    table
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(native))
        .map(|(_, status)| *status)
}

/// String at a JSON pointer, if non-empty
pub fn pointer_str(value: &JsonValue, pointer: &str) -> Option<String> {
    match value.pointer(pointer) {
        Some(JsonValue::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(JsonValue::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

pub fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Split "Prosta 12/4" into street and building number
pub fn split_street(street: &str) -> (String, String) {
    let street = street.trim();
    match street.rsplit_once(' ') {
        Some((name, number)) if number.chars().next().is_some_and(|c| c.is_ascii_digit()) => {
            (name.trim().to_string(), number.to_string())
        }
        _ => (street.to_string(), String::new()),
    }
}
