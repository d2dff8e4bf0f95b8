//! Persistent records and the async CRUD trait the follower talks to.
//!
//! Relations:
//!   vaults         (manager_id, vault_id) → VaultRecord
//!   quotes         manager_id             → QuoteRecord
//!   brands         issuer_name            → BrandRecord
//!   users          user_id                → UserRecord
//!   notifiers      id                     → NotifierRecord   (FK user, vault)
//!   notifications  append-only            → NotificationRecord
//!
//! Two backends:
//! - `MemoryStore`: maps behind a tokio `RwLock`, used in tests and when
//!   Valkey is disabled
//! - `ValkeyStore`: Redis-compatible, JSON values under a key prefix

pub mod memory;
#[cfg(test)]
mod suite;
pub mod valkey;

pub use memory::MemoryStore;
pub use valkey::ValkeyStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("valkey error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("{0} not found")]
    NotFound(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VaultState {
    Active,
    Liquidating,
    Liquidated,
    Closed,
    Transfer,
}

impl VaultState {
    /// Closed and liquidated vaults are no longer monitored.
    pub fn is_terminal(&self) -> bool {
        matches!(self, VaultState::Liquidated | VaultState::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VaultState::Active => "active",
            VaultState::Liquidating => "liquidating",
            VaultState::Liquidated => "liquidated",
            VaultState::Closed => "closed",
            VaultState::Transfer => "transfer",
        }
    }
}

impl std::fmt::Display for VaultState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown vault state {0}")]
pub struct ParseVaultStateError(pub String);

impl std::str::FromStr for VaultState {
    type Err = ParseVaultStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(VaultState::Active),
            "liquidating" => Ok(VaultState::Liquidating),
            "liquidated" => Ok(VaultState::Liquidated),
            "closed" => Ok(VaultState::Closed),
            "transfer" => Ok(VaultState::Transfer),
            other => Err(ParseVaultStateError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaultRecord {
    pub manager_id: u64,
    pub vault_id: u64,
    /// Collateral, in the locked asset's smallest unit.
    pub locked: u128,
    /// Debt, in the debt asset's smallest unit.
    pub debt: u128,
    pub state: VaultState,
}

/// Latest price quote of a vault manager. One row per manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuoteRecord {
    pub manager_id: u64,
    pub amount_in: u128,
    pub amount_out: u128,
    pub in_issuer_name: String,
    pub out_issuer_name: String,
    /// Unix millis of the last update.
    pub latest_timestamp: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Nat,
    Set,
    CopySet,
    CopyBag,
}

impl AssetKind {
    /// Parse the chain's `displayInfo.assetKind` spelling.
    pub fn from_chain(s: &str) -> Option<Self> {
        match s {
            "nat" => Some(AssetKind::Nat),
            "set" => Some(AssetKind::Set),
            "copySet" | "copy_set" => Some(AssetKind::CopySet),
            "copyBag" | "copy_bag" => Some(AssetKind::CopyBag),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrandRecord {
    pub issuer_name: String,
    pub asset_kind: AssetKind,
    pub decimal_places: u32,
    /// Board id of the brand, or its interface name when no id was published.
    pub brand: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    pub id: u64,
    pub email: String,
    pub verified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotifierRecord {
    pub id: u64,
    pub user_id: u64,
    pub manager_id: u64,
    pub vault_id: u64,
    /// Percent.
    pub threshold: u32,
    /// Alert sent, waiting for the ratio to recover.
    pub active: bool,
    /// Terminal.
    pub expired: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotifier {
    pub user_id: u64,
    pub manager_id: u64,
    pub vault_id: u64,
    pub threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationRecord {
    pub id: u64,
    pub user_id: u64,
    pub manager_id: u64,
    pub vault_id: u64,
    pub threshold: u32,
    pub actual_ratio: u64,
    pub notifier_id: u64,
    /// Unix millis.
    pub sent_at: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub user_id: u64,
    pub manager_id: u64,
    pub vault_id: u64,
    pub threshold: u32,
    pub actual_ratio: u64,
    pub notifier_id: u64,
    pub message: String,
}

/// Each call is atomic on its own; callers never hold a transaction.
#[async_trait]
pub trait Store: Send + Sync {
    // --- Vaults ---
    async fn upsert_vault(&self, vault: &VaultRecord) -> Result<(), StoreError>;
    async fn get_vault(
        &self,
        manager_id: u64,
        vault_id: u64,
    ) -> Result<Option<VaultRecord>, StoreError>;
    async fn vaults_by_manager(&self, manager_id: u64) -> Result<Vec<VaultRecord>, StoreError>;
    /// Managers with at least one stored vault, ascending.
    async fn manager_ids(&self) -> Result<Vec<u64>, StoreError>;

    // --- Quotes ---
    async fn upsert_quote(&self, quote: &QuoteRecord) -> Result<(), StoreError>;
    async fn get_quote(&self, manager_id: u64) -> Result<Option<QuoteRecord>, StoreError>;

    // --- Brands ---
    async fn upsert_brand(&self, brand: &BrandRecord) -> Result<(), StoreError>;
    async fn get_brand(&self, issuer_name: &str) -> Result<Option<BrandRecord>, StoreError>;
    async fn list_brands(&self) -> Result<Vec<BrandRecord>, StoreError>;

    // --- Users ---
    async fn upsert_user(&self, user: &UserRecord) -> Result<(), StoreError>;
    async fn get_user(&self, user_id: u64) -> Result<Option<UserRecord>, StoreError>;

    // --- Notifiers ---
    async fn create_notifier(&self, notifier: NewNotifier) -> Result<NotifierRecord, StoreError>;
    async fn get_notifier(&self, id: u64) -> Result<Option<NotifierRecord>, StoreError>;
    /// Returns whether a row was removed.
    async fn delete_notifier(&self, id: u64) -> Result<bool, StoreError>;
    /// Ordered by threshold ascending.
    async fn notifiers_by_user(&self, user_id: u64) -> Result<Vec<NotifierRecord>, StoreError>;
    async fn notifiers_by_vault(
        &self,
        manager_id: u64,
        vault_id: u64,
    ) -> Result<Vec<NotifierRecord>, StoreError>;
    /// Distinct `(manager_id, vault_id)` pairs with a non-expired notifier.
    async fn watched_vaults(&self) -> Result<Vec<(u64, u64)>, StoreError>;
    async fn set_notifier_active(&self, id: u64, active: bool) -> Result<(), StoreError>;
    async fn expire_notifier(&self, id: u64) -> Result<(), StoreError>;

    // --- Notifications ---
    async fn create_notification(
        &self,
        notification: NewNotification,
    ) -> Result<NotificationRecord, StoreError>;
    /// Newest first.
    async fn notifications_by_user(
        &self,
        user_id: u64,
    ) -> Result<Vec<NotificationRecord>, StoreError>;
}
