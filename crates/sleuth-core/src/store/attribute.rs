//! Store-native attribute values.
//!
//! The durable store has no floating-point type: every number is held as a
//! precise decimal. Values headed for the store are converted recursively
//! through nested maps and lists.

use super::StoreError;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// One stored item: attribute name to value.
pub type Item = BTreeMap<String, AttributeValue>;

/// A single attribute value in the store's type system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    #[serde(rename = "S")]
    S(String),
    #[serde(rename = "N")]
    N(Decimal),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null,
    #[serde(rename = "L")]
    L(Vec<AttributeValue>),
    #[serde(rename = "M")]
    M(BTreeMap<String, AttributeValue>),
}

impl AttributeValue {
    pub fn as_s(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_n(&self) -> Option<Decimal> {
        match self {
            AttributeValue::N(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_m(&self) -> Option<&BTreeMap<String, AttributeValue>> {
        match self {
            AttributeValue::M(m) => Some(m),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::S(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::S(value)
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        AttributeValue::N(Decimal::from(value))
    }
}

/// Converts a JSON value into its store representation.
///
/// Floats become decimals through their shortest textual form, so `0.1`
/// is stored as exactly `0.1`.
pub fn to_attribute(value: &serde_json::Value) -> Result<AttributeValue, StoreError> {
    use serde_json::Value;

    Ok(match value {
        Value::Null => AttributeValue::Null,
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Number(n) => AttributeValue::N(number_to_decimal(n)?),
        Value::Array(items) => {
            AttributeValue::L(items.iter().map(to_attribute).collect::<Result<_, _>>()?)
        }
        Value::Object(map) => AttributeValue::M(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), to_attribute(v)?)))
                .collect::<Result<_, StoreError>>()?,
        ),
    })
}

/// Converts a stored value back into JSON.
pub fn from_attribute(value: &AttributeValue) -> serde_json::Value {
    use serde_json::Value;

    match value {
        AttributeValue::Null => Value::Null,
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => decimal_to_json(*n),
        AttributeValue::L(items) => Value::Array(items.iter().map(from_attribute).collect()),
        AttributeValue::M(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), from_attribute(v)))
                .collect(),
        ),
    }
}

fn number_to_decimal(n: &serde_json::Number) -> Result<Decimal, StoreError> {
    if let Some(i) = n.as_i64() {
        return Ok(Decimal::from(i));
    }
    if let Some(u) = n.as_u64() {
        return Ok(Decimal::from(u));
    }
    let f = n
        .as_f64()
        .ok_or_else(|| StoreError::Conversion(format!("unsupported number {n}")))?;
    Decimal::from_str(&f.to_string())
        .or_else(|_| Decimal::try_from(f))
        .map_err(|e| StoreError::Conversion(format!("{f} is not representable as a decimal: {e}")))
}

fn decimal_to_json(n: Decimal) -> serde_json::Value {
    if n.fract().is_zero()
        && let Some(i) = n.to_i64()
    {
        return serde_json::Value::from(i);
    }
    n.to_f64()
        .and_then(serde_json::Number::from_f64)
        .map(serde_json::Value::Number)
        .unwrap_or_else(|| serde_json::Value::String(n.to_string()))
}
