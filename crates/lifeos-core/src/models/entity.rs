//! Syncable entity model

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

/// A domain record that takes part in conflict resolution.
///
/// Wraps a JSON object carrying at least `id` and `updated_at`; every other
/// field is opaque to the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct SyncableEntity {
    fields: Map<String, Value>,
}

impl SyncableEntity {
    /// Entity identifier
    pub fn id(&self) -> &str {
        self.fields
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Raw `updated_at` value as stored on the record
    pub fn updated_at(&self) -> &Value {
        self.fields.get("updated_at").unwrap_or(&Value::Null)
    }

    /// `updated_at` as Unix milliseconds, `None` when it cannot be parsed
    pub fn updated_at_millis(&self) -> Option<i64> {
        parse_timestamp_millis(self.updated_at())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub const fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub(crate) fn fields_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.fields
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl TryFrom<Value> for SyncableEntity {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Object(fields) = value else {
            return Err(Error::InvalidEntity("expected a JSON object".to_string()));
        };

        match fields.get("id") {
            Some(Value::String(id)) if !id.trim().is_empty() => {}
            Some(Value::Number(number)) => {
                // Numeric ids are normalized to strings so `id()` stays total.
                let mut fields = fields.clone();
                fields.insert("id".to_string(), Value::String(number.to_string()));
                return Self::try_from(Value::Object(fields));
            }
            _ => {
                return Err(Error::InvalidEntity(
                    "entity must carry a non-empty `id`".to_string(),
                ))
            }
        }

        match fields.get("updated_at") {
            Some(Value::String(_) | Value::Number(_)) => Ok(Self { fields }),
            _ => Err(Error::InvalidEntity(
                "entity must carry `updated_at` as a timestamp string or number".to_string(),
            )),
        }
    }
}

impl From<SyncableEntity> for Value {
    fn from(entity: SyncableEntity) -> Self {
        entity.into_value()
    }
}

/// Parse an ISO-8601 string or epoch-millisecond number into Unix milliseconds.
#[allow(clippy::cast_possible_truncation)]
pub fn parse_timestamp_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|millis| millis.is_finite())
                .map(|millis| millis.trunc() as i64)
        }),
        Value::String(text) => parse_timestamp_text(text.trim()),
        _ => None,
    }
}

fn parse_timestamp_text(text: &str) -> Option<i64> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.timestamp_millis());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Some(parsed.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|datetime| datetime.and_utc().timestamp_millis())
}
