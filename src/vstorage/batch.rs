//! Batched `abci_query` requests against the vstorage module.
//!
//! One POST carries every watched key. Each request item's `id` is its index
//! in the key list, so responses are matched back by id even when the node
//! reorders them or answers a single-item batch with a bare object.
//!
//! Per-item failures (non-zero code, missing value, undecodable payload)
//! become a `QueryResult::Error` for that key only.

use super::capdata::{decode_payload, CapDataDecoder};
use super::types::{PathKind, QueryResult, WatchedKey};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("rpc returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("remote error: {0}")]
    Remote(String),
    #[error("could not get vstorage path {0}")]
    NotFound(String),
}

/// The network round trip behind the watcher.
#[async_trait]
pub trait StorageQuery: Send + Sync {
    /// Results are keyed by [`WatchedKey::canonical`]. Keys missing from the
    /// response are missing from the map.
    async fn query(&self, keys: &[WatchedKey])
        -> Result<HashMap<String, QueryResult>, QueryError>;
}

pub fn build_batch_body(keys: &[WatchedKey]) -> Value {
    Value::Array(
        keys.iter()
            .enumerate()
            .map(|(id, key)| {
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "method": "abci_query",
                    "params": { "path": key.rpc_path() },
                })
            })
            .collect(),
    )
}

/// Match a JSON-RPC batch response back to `keys`.
///
/// Only a response that is neither an array nor an object is an error;
/// everything else is classified per key.
pub fn decode_batch_response(
    keys: &[WatchedKey],
    response: Value,
    decoder: &dyn CapDataDecoder,
) -> Result<HashMap<String, QueryResult>, QueryError> {
    let entries = match response {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        other => {
            return Err(QueryError::Decode(format!(
                "expected a batch response, got {other}"
            )))
        }
    };

    let mut results = HashMap::with_capacity(keys.len());
    for entry in entries {
        let key = entry
            .get("id")
            .and_then(Value::as_u64)
            .and_then(|id| usize::try_from(id).ok())
            .and_then(|id| keys.get(id));
        let Some(key) = key else {
            let id = entry.get("id").cloned().unwrap_or_default();
            warn!(id = %id, "response id does not match any request, ignoring");
            continue;
        };
        results.insert(key.canonical(), decode_entry(key, &entry, decoder));
    }
    Ok(results)
}

fn decode_entry(key: &WatchedKey, entry: &Value, decoder: &dyn CapDataDecoder) -> QueryResult {
    if let Some(err) = entry.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return QueryResult::Error(message);
    }

    let Some(response) = entry.pointer("/result/response") else {
        return QueryResult::Error(format!("missing result.response for {key}"));
    };

    let code = response.get("code").and_then(Value::as_i64).unwrap_or(0);
    if code != 0 {
        let log = response.get("log").and_then(Value::as_str).unwrap_or_default();
        return QueryResult::Error(log.to_string());
    }

    let encoded = response
        .get("value")
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty());
    let Some(encoded) = encoded else {
        return QueryResult::Error(format!(
            "cannot find value in response for {key}: {response}"
        ));
    };

    decode_value(key, encoded, decoder).unwrap_or_else(QueryResult::Error)
}

fn decode_value(
    key: &WatchedKey,
    encoded: &str,
    decoder: &dyn CapDataDecoder,
) -> Result<QueryResult, String> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| format!("bad base64 for {key}: {e}"))?;
    let text = String::from_utf8(bytes).map_err(|e| format!("bad utf-8 for {key}: {e}"))?;
    let data: Value =
        serde_json::from_str(&text).map_err(|e| format!("bad json for {key}: {e}"))?;

    match key.kind() {
        PathKind::Children => Ok(QueryResult::Value {
            value: data
                .get("children")
                .cloned()
                .unwrap_or_else(|| Value::Array(Vec::new())),
            block_height: None,
        }),
        PathKind::Data => decode_data(key, &data, decoder),
    }
}

/// `{ "value": "<stream cell json>" }` where the stream cell is
/// `{ "blockHeight": "123", "values": ["<capdata json>", ...] }`.
fn decode_data(
    key: &WatchedKey,
    data: &Value,
    decoder: &dyn CapDataDecoder,
) -> Result<QueryResult, String> {
    let raw = data
        .get("value")
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing data value for {key}"))?;
    let cell: Value =
        serde_json::from_str(raw).map_err(|e| format!("bad stream cell for {key}: {e}"))?;

    let block_height = cell.get("blockHeight").and_then(parse_height);
    let latest = match cell.get("values") {
        Some(Value::Array(values)) => values
            .last()
            .cloned()
            .ok_or_else(|| format!("no values published at {key}"))?,
        Some(other) => return Err(format!("values is not a list for {key}: {other}")),
        None => cell.clone(),
    };

    let payload = match latest {
        Value::String(s) => {
            serde_json::from_str(&s).map_err(|e| format!("bad payload for {key}: {e}"))?
        }
        other => other,
    };

    let value = match decode_payload(decoder, payload) {
        Ok(value) => value,
        Err(fallback) => {
            debug!(key = %key, reason = %fallback.reason, "capdata decode fell back to raw body");
            fallback.value
        }
    };

    Ok(QueryResult::Value {
        value,
        block_height,
    })
}

fn parse_height(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
