//! Token map (de)serialization.
//!
//! A session's token map is stored as one JSON object:
//!
//! ```json
//! {
//!   "default": { "token": "9F86D0…", "created": "2024-05-01T10:00:00Z", "expires": "2024-05-01T10:30:00Z" },
//!   "checkout": { "token": "…", "created": "…", "expires": "…" }
//! }
//! ```
//!
//! Decoding is lenient: an entry that does not parse is dropped (and
//! logged) rather than failing the whole map, since foreign or corrupt data
//! under a token key must behave like an absent token.

use crate::error::{CsrfError, Result};
use crate::token::{TokenMap, TokenRecord};
use serde_json::Value;

/// Result of decoding a stored map.
#[derive(Debug, Default)]
pub struct Decoded {
    pub map: TokenMap,
    /// Entries that were present but unusable
    pub dropped: usize,
}

/// Serialize a token map for storage.
pub fn encode_map(map: &TokenMap) -> Result<String> {
    Ok(serde_json::to_string(map.records())?)
}

/// Decode one stored entry.
pub fn decode_record(key: &str, value: Value) -> Result<TokenRecord> {
    let record: TokenRecord =
        serde_json::from_value(value).map_err(|e| CsrfError::MalformedRecord {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

    if record.token.is_empty() {
        return Err(CsrfError::MalformedRecord {
            key: key.to_string(),
            reason: "empty token".to_string(),
        });
    }

    Ok(record)
}

/// Decode a stored map, skipping malformed entries.
///
/// `storage_key` only labels log output.
pub fn decode_map(storage_key: &str, raw: &str) -> Decoded {
    let entries = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(entries)) => entries,
        Ok(other) => {
            tracing::warn!(
                storage_key,
                kind = value_kind(&other),
                "Token map is not an object; treating as empty"
            );
            return Decoded { map: TokenMap::new(), dropped: 1 };
        }
        Err(e) => {
            tracing::warn!(storage_key, error = %e, "Token map is not valid JSON; treating as empty");
            return Decoded { map: TokenMap::new(), dropped: 1 };
        }
    };

    let mut dropped = 0;
    let map = entries
        .into_iter()
        .filter_map(|(key, value)| match decode_record(&key, value) {
            Ok(record) => Some((key, record)),
            Err(e) => {
                tracing::warn!(storage_key, error = %e, "Skipping malformed token record");
                dropped += 1;
                None
            }
        })
        .collect();

    Decoded { map, dropped }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
