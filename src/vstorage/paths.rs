//! Vault factory paths in chain storage and decoding of what they publish.

use crate::store::{VaultRecord, VaultState};
use serde_json::Value;
use thiserror::Error;

/// Asset catalog: `[denom, { brand, issuerName, displayInfo }]` entries.
pub const VBANK_ASSET_PATH: &str = "published.agoricNames.vbankAsset";
pub const BRAND_PATH: &str = "published.agoricNames.brand";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PayloadError {
    #[error("path {0} does not name a vault manager")]
    BadPath(String),
    #[error("payload is missing {0}")]
    MissingField(&'static str),
    #[error("unknown vault state {0}")]
    UnknownState(String),
}

pub fn vault_path(manager_id: u64, vault_id: u64) -> String {
    format!("published.vaultFactory.managers.manager{manager_id}.vaults.vault{vault_id}")
}

pub fn quote_path(manager_id: u64) -> String {
    format!("published.vaultFactory.managers.manager{manager_id}.quotes")
}

pub fn governance_path(manager_id: u64) -> String {
    format!("published.vaultFactory.managers.manager{manager_id}.governance")
}

pub fn manager_id_from_path(path: &str) -> Option<u64> {
    let rest = path.split("managers.").nth(1)?;
    rest.split('.').next()?.strip_prefix("manager")?.parse().ok()
}

pub fn vault_id_from_path(path: &str) -> Option<u64> {
    let rest = path.split("vaults.").nth(1)?;
    rest.split('.').next()?.strip_prefix("vault")?.parse().ok()
}

/// Amounts arrive as JSON numbers, bigint strings (`"123"`), or raw
/// smallcaps strings (`"+123"`) when decoding fell back.
pub fn parse_amount(value: &Value) -> Option<u128> {
    match value {
        Value::Number(n) => n.as_u64().map(u128::from),
        Value::String(s) => s.strip_prefix('+').unwrap_or(s).parse().ok(),
        _ => None,
    }
}

/// Lookup keys for a brand reference, board id first.
///
/// A decoded remotable yields its board id and interface name; a raw
/// `"$1.Alleged: ATOM brand"` reference only yields the interface name.
pub fn brand_keys(brand: &Value) -> Vec<String> {
    match brand {
        Value::Object(map) => ["boardId", "iface"]
            .iter()
            .filter_map(|k| map.get(*k).and_then(Value::as_str))
            .map(str::to_string)
            .collect(),
        Value::String(s) => match s.strip_prefix('$') {
            Some(reference) => reference
                .split_once('.')
                .map(|(_, iface)| vec![iface.to_string()])
                .unwrap_or_default(),
            None => vec![s.clone()],
        },
        _ => Vec::new(),
    }
}

/// Decode the state published at a vault path.
pub fn vault_from_state(path: &str, state: &Value) -> Result<VaultRecord, PayloadError> {
    let manager_id =
        manager_id_from_path(path).ok_or_else(|| PayloadError::BadPath(path.to_string()))?;
    let vault_id =
        vault_id_from_path(path).ok_or_else(|| PayloadError::BadPath(path.to_string()))?;

    let locked = state
        .pointer("/locked/value")
        .and_then(parse_amount)
        .ok_or(PayloadError::MissingField("locked.value"))?;
    let debt = state
        .pointer("/debtSnapshot/debt/value")
        .and_then(parse_amount)
        .ok_or(PayloadError::MissingField("debtSnapshot.debt.value"))?;
    let raw_state = state
        .get("vaultState")
        .and_then(Value::as_str)
        .ok_or(PayloadError::MissingField("vaultState"))?;
    let state = raw_state
        .parse::<VaultState>()
        .map_err(|_| PayloadError::UnknownState(raw_state.to_string()))?;

    Ok(VaultRecord {
        manager_id,
        vault_id,
        locked,
        debt,
        state,
    })
}

/// Price quote published for a vault manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteUpdate {
    pub manager_id: u64,
    /// Collateral side of the quote.
    pub amount_in: u128,
    /// Debt-asset side of the quote.
    pub amount_out: u128,
    pub in_brand: Vec<String>,
    pub out_brand: Vec<String>,
}

pub fn quote_from_state(path: &str, state: &Value) -> Result<QuoteUpdate, PayloadError> {
    let manager_id =
        manager_id_from_path(path).ok_or_else(|| PayloadError::BadPath(path.to_string()))?;
    let quote = state
        .pointer("/quoteAmount/value/0")
        .ok_or(PayloadError::MissingField("quoteAmount.value[0]"))?;

    let amount_in = quote
        .pointer("/amountIn/value")
        .and_then(parse_amount)
        .ok_or(PayloadError::MissingField("amountIn.value"))?;
    let amount_out = quote
        .pointer("/amountOut/value")
        .and_then(parse_amount)
        .ok_or(PayloadError::MissingField("amountOut.value"))?;

    Ok(QuoteUpdate {
        manager_id,
        amount_in,
        amount_out,
        in_brand: quote.pointer("/amountIn/brand").map(brand_keys).unwrap_or_default(),
        out_brand: quote.pointer("/amountOut/brand").map(brand_keys).unwrap_or_default(),
    })
}
