use chrono::NaiveDate;
use serde_json::Value;
use uuid::Uuid;

/// Distinguishes a PATCH field that was left out from one explicitly set to
/// null, so "clear this field" and "leave it alone" stay separate requests.
pub enum NullableValue {
    Omitted,
    Null,
    String(String),
}

pub fn classify_nullable(optional_value: Option<&Value>) -> Result<NullableValue, String> {
    match optional_value {
        None => Ok(NullableValue::Omitted),
        Some(Value::Null) => Ok(NullableValue::Null),
        Some(Value::String(s)) => Ok(NullableValue::String(s.to_owned())),
        Some(other) => Err(format!("expected string or null, got {other}")),
    }
}

impl NullableValue {
    /// `None` = omitted, `Some(None)` = clear, `Some(Some(date))` = set.
    pub fn into_date_change(self, field: &str) -> Result<Option<Option<NaiveDate>>, String> {
        match self {
            NullableValue::Omitted => Ok(None),
            NullableValue::Null => Ok(Some(None)),
            NullableValue::String(value) => NaiveDate::parse_from_str(&value, "%Y-%m-%d")
                .map(|date| Some(Some(date)))
                .map_err(|_| format!("{field} must be a YYYY-MM-DD date")),
        }
    }

    pub fn into_uuid_change(self, field: &str) -> Result<Option<Option<Uuid>>, String> {
        match self {
            NullableValue::Omitted => Ok(None),
            NullableValue::Null => Ok(Some(None)),
            NullableValue::String(value) => Uuid::parse_str(&value)
                .map(|id| Some(Some(id)))
                .map_err(|_| format!("{field} must be a uuid")),
        }
    }
}
