use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{DataType, LedgerError, LedgerResult, OBJECT_ID_FIELD, Table, UPDATED_AT_FIELD, Value};

/// A validated business object as handed over by the ingestion layer.
pub trait ClientPayload: Send + Sync {
    /// `None` covers both an absent key and an explicit null.
    fn read_field(&self, name: &str) -> Option<Value>;
    fn table_name(&self) -> &str;

    fn object_id(&self) -> LedgerResult<String> {
        match self.read_field(OBJECT_ID_FIELD) {
            Some(Value::String(object_id)) if !object_id.is_empty() => Ok(object_id),
            Some(other) => Err(LedgerError::validation(format!(
                "object_id on '{}' must be a non-empty string, got {}",
                self.table_name(),
                other.data_type()
            ))),
            None => Err(LedgerError::validation(format!(
                "payload for '{}' has no object_id",
                self.table_name()
            ))),
        }
    }

    fn updated_at(&self) -> LedgerResult<DateTime<Utc>> {
        match self.read_field(UPDATED_AT_FIELD) {
            Some(Value::Timestamp(updated_at)) => Ok(updated_at),
            Some(other) => Err(LedgerError::validation(format!(
                "updated_at on '{}' must be a timestamp, got {}",
                self.table_name(),
                other.data_type()
            ))),
            None => Err(LedgerError::validation(format!(
                "payload for '{}' has no updated_at",
                self.table_name()
            ))),
        }
    }
}

/// Owned object: one row of a client table, or a payload built by hand.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientObject {
    pub table_name: String,
    pub data: BTreeMap<String, Option<Value>>,
}

impl ClientObject {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(name.into(), Some(value.into()));
        self
    }

    pub fn with_null(mut self, name: impl Into<String>) -> Self {
        self.data.insert(name.into(), None);
        self
    }

    /// Parses a JSON object against `table`, coercing each declared field to its
    /// column type. Keys the table does not declare are ignored.
    pub fn from_json(table: &Table, payload: &JsonValue) -> LedgerResult<Self> {
        let object = payload.as_object().ok_or_else(|| {
            LedgerError::validation(format!("payload for '{}' is not an object", table.name))
        })?;
        let mut data = BTreeMap::new();
        for (name, raw) in object {
            let Some(field) = table.fields.get(name) else {
                continue;
            };
            let value = json_to_value(field.data_type, raw).map_err(|message| {
                LedgerError::validation(format!("{}.{name}: {message}", table.name))
            })?;
            if value.is_none() && !field.nullable {
                return Err(LedgerError::validation(format!(
                    "{}.{name} is not nullable",
                    table.name
                )));
            }
            data.insert(name.clone(), value);
        }
        let parsed = Self {
            table_name: table.name.clone(),
            data,
        };
        parsed.object_id()?;
        parsed.updated_at()?;
        Ok(parsed)
    }
}

impl ClientPayload for ClientObject {
    fn read_field(&self, name: &str) -> Option<Value> {
        self.data.get(name).cloned().flatten()
    }

    fn table_name(&self) -> &str {
        &self.table_name
    }
}

fn json_to_value(data_type: DataType, raw: &JsonValue) -> Result<Option<Value>, String> {
    if raw.is_null() {
        return Ok(None);
    }
    let value = match data_type {
        DataType::Bool => raw.as_bool().map(Value::Bool),
        DataType::Int => raw.as_i64().map(Value::Int),
        DataType::Float => raw.as_f64().map(Value::Float),
        DataType::String => raw.as_str().map(|value| Value::String(value.to_string())),
        DataType::Timestamp => match raw.as_str() {
            Some(text) => Some(Value::Timestamp(
                DateTime::parse_from_rfc3339(text)
                    .map_err(|err| format!("invalid timestamp '{text}': {err}"))?
                    .with_timezone(&Utc),
            )),
            None => None,
        },
        DataType::Unknown => return Err("field has an unknown data type".to_string()),
    };
    value
        .map(Some)
        .ok_or_else(|| format!("expected {data_type}, got {raw}"))
}
