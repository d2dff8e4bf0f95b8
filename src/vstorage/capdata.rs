//! CapData decoding for values published to chain storage.
//!
//! Published values are `{ "body": "#<json>", "slots": [...] }`. The body is
//! "smallcaps" JSON: strings carry a one-character type tag.
//!
//! - `+123` / `-5`: bigint, kept as an exact decimal string
//! - `$0.Alleged: ATOM brand`: remotable at slot 0 with its interface name
//! - `&1`: promise at slot 1
//! - `!text`: string whose first character needed escaping
//! - `#undefined`: special value
//!
//! Some published values reference board slots that are `null` (quotes do
//! this). Those fail to decode and fall back to a raw parse of the body.

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CapDataError {
    #[error("body is missing the '#' smallcaps prefix")]
    MissingPrefix,
    #[error("body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bad board slot {0}")]
    BadSlot(String),
    #[error("slot index {0} out of range")]
    SlotOutOfRange(usize),
}

#[derive(Debug, Clone, Deserialize)]
pub struct CapData {
    pub body: String,
    #[serde(default)]
    pub slots: Vec<Value>,
}

/// Converts CapData into plain JSON.
pub trait CapDataDecoder: Send + Sync {
    fn decode(&self, data: &CapData) -> Result<Value, CapDataError>;
}

/// Payload recovered when the canonical decode fails.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFallback {
    pub value: Value,
    pub reason: String,
}

/// Decode a published payload.
///
/// Payloads without a `slots` field are not CapData and pass through
/// unchanged. The error side is never a hard failure: it carries the best
/// value that could be recovered.
pub fn decode_payload(decoder: &dyn CapDataDecoder, payload: Value) -> Result<Value, RawFallback> {
    if payload.get("slots").is_none() {
        return Ok(payload);
    }

    let data: CapData = match serde_json::from_value(payload.clone()) {
        Ok(data) => data,
        Err(e) => {
            return Err(RawFallback {
                value: payload,
                reason: e.to_string(),
            })
        }
    };

    match decoder.decode(&data) {
        Ok(value) => Ok(value),
        Err(e) => {
            let mut chars = data.body.chars();
            chars.next();
            let value = serde_json::from_str(chars.as_str()).unwrap_or(payload);
            Err(RawFallback {
                value,
                reason: e.to_string(),
            })
        }
    }
}

/// Decoder for values published through the board (`fromBoard.fromCapData`).
///
/// Remotables become `{ "boardId": <slot>, "iface": <name> }`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoardDecoder;

impl CapDataDecoder for BoardDecoder {
    fn decode(&self, data: &CapData) -> Result<Value, CapDataError> {
        let json = data
            .body
            .strip_prefix('#')
            .ok_or(CapDataError::MissingPrefix)?;
        let body: Value = serde_json::from_str(json)?;
        revive(body, &data.slots)
    }
}

fn revive(value: Value, slots: &[Value]) -> Result<Value, CapDataError> {
    match value {
        Value::String(s) => revive_string(s, slots),
        Value::Array(items) => items
            .into_iter()
            .map(|v| revive(v, slots))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k, revive(v, slots)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other),
    }
}

fn revive_string(s: String, slots: &[Value]) -> Result<Value, CapDataError> {
    let Some(tag) = s.chars().next() else {
        return Ok(Value::String(s));
    };
    let rest = &s[tag.len_utf8()..];
    match tag {
        '+' if is_digits(rest) => Ok(Value::String(rest.to_string())),
        '-' if is_digits(rest) => Ok(Value::String(s)),
        '$' | '&' => revive_slot(rest, slots),
        '!' => Ok(Value::String(rest.to_string())),
        '#' if rest == "undefined" => Ok(Value::Null),
        _ => Ok(Value::String(s)),
    }
}

fn revive_slot(reference: &str, slots: &[Value]) -> Result<Value, CapDataError> {
    let (index, iface) = match reference.split_once('.') {
        Some((index, iface)) => (index, Some(iface)),
        None => (reference, None),
    };
    let index: usize = index
        .parse()
        .map_err(|_| CapDataError::BadSlot(reference.to_string()))?;
    let slot = slots.get(index).ok_or(CapDataError::SlotOutOfRange(index))?;
    if slot.is_null() {
        return Err(CapDataError::BadSlot("null".to_string()));
    }

    let mut remotable = Map::new();
    remotable.insert("boardId".to_string(), slot.clone());
    if let Some(iface) = iface {
        remotable.insert("iface".to_string(), Value::String(iface.to_string()));
    }
    Ok(Value::Object(remotable))
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}
