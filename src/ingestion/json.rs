//! JSON ingestion implementation.
//!
//! Supported inputs:
//! - A JSON array of objects: `[{"a":1}, {"a":2}]`
//! - A single JSON object (one row)
//! - Newline-delimited JSON (NDJSON): `{"a":1}\n{"a":2}\n`
//!
//! The column list is the union of object keys in first-seen order; rows missing a key get
//! [`Value::Null`]. Nested objects and arrays are kept as their JSON text.

use crate::error::{IngestionError, IngestionResult};
use crate::types::{Table, Value};

/// Ingest JSON bytes into a [`Table`].
pub fn ingest_json_from_bytes(source_name: &str, bytes: &[u8]) -> IngestionResult<Table> {
    let text = std::str::from_utf8(bytes).map_err(|e| IngestionError::Malformed {
        source_name: source_name.to_string(),
        message: format!("json input is not valid utf-8: {e}"),
    })?;
    ingest_json_from_str(source_name, text)
}

/// Ingest JSON from an in-memory string into a [`Table`].
pub fn ingest_json_from_str(source_name: &str, input: &str) -> IngestionResult<Table> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(IngestionError::Empty {
            source_name: source_name.to_string(),
        });
    }

    // First try parsing as a single JSON value (array or object).
    let values = match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Array(items)) => items,
        Ok(v @ serde_json::Value::Object(_)) => vec![v],
        Ok(_) => {
            return Err(IngestionError::Malformed {
                source_name: source_name.to_string(),
                message: "json must be an object, an array of objects, or NDJSON".to_string(),
            });
        }
        // Fall back to NDJSON.
        Err(_) => trimmed
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(serde_json::from_str::<serde_json::Value>)
            .collect::<Result<Vec<_>, _>>()?,
    };

    table_from_values(source_name, &values)
}

fn table_from_values(source_name: &str, values: &[serde_json::Value]) -> IngestionResult<Table> {
    let mut objects = Vec::with_capacity(values.len());
    for (idx0, v) in values.iter().enumerate() {
        let obj = v.as_object().ok_or_else(|| IngestionError::Malformed {
            source_name: source_name.to_string(),
            message: format!("row {} is not a json object", idx0 + 1),
        })?;
        objects.push(obj);
    }

    let mut headers: Vec<String> = Vec::new();
    for obj in &objects {
        for key in obj.keys() {
            if !headers.iter().any(|h| h == key) {
                headers.push(key.clone());
            }
        }
    }

    let rows = objects
        .iter()
        .map(|obj| {
            headers
                .iter()
                .map(|h| obj.get(h).map(convert_json_value).unwrap_or(Value::Null))
                .collect()
        })
        .collect();

    Ok(Table::new(&headers, rows))
}

fn convert_json_value(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int64(i),
            None => n.as_f64().map(Value::Float64).unwrap_or(Value::Null),
        },
        serde_json::Value::String(s) if s.trim().is_empty() => Value::Null,
        serde_json::Value::String(s) => Value::Utf8(s.clone()),
        other => Value::Utf8(other.to_string()),
    }
}
