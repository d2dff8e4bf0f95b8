//! Asset reference cache: brand ↔ issuer name ↔ decimal places.
//!
//! Maps between:
//! - brand board id (`board0257`) or interface name (`Alleged: IST brand`)
//!   ↔ issuer name (`IST`)
//! - issuer name ↔ `BrandRecord` (asset kind, decimal places)
//!
//! Filled from the asset catalog at `published.agoricNames.vbankAsset`,
//! from the store on startup, and lazily from the chain when an unknown
//! brand shows up in a quote. A brand that could not be resolved is not
//! looked up again for `UNRESOLVED_COOLDOWN`, unless a catalog update
//! names it first.

use super::batch::StorageQuery;
use super::paths::{brand_keys, VBANK_ASSET_PATH};
use super::types::{QueryResult, WatchedKey};
use crate::store::{AssetKind, BrandRecord, Store, StoreError};
use dashmap::DashMap;
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub(crate) const LOOKUP_ATTEMPTS: u32 = 4;
pub const UNRESOLVED_COOLDOWN: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct BrandCache {
    /// issuer name → record
    by_issuer: Arc<DashMap<String, BrandRecord>>,
    /// board id or interface name → issuer name
    brand_to_issuer: Arc<DashMap<String, String>>,
    /// brand key → when its last lookup gave up
    unresolved: Arc<DashMap<String, Instant>>,
    store: Arc<dyn Store>,
    querier: Arc<dyn StorageQuery>,
}

impl BrandCache {
    pub fn new(store: Arc<dyn Store>, querier: Arc<dyn StorageQuery>) -> Self {
        Self {
            by_issuer: Arc::new(DashMap::new()),
            brand_to_issuer: Arc::new(DashMap::new()),
            unresolved: Arc::new(DashMap::new()),
            store,
            querier,
        }
    }

    /// Warm the cache from persisted brands.
    pub async fn load_from_store(&self) -> Result<usize, StoreError> {
        let brands = self.store.list_brands().await?;
        let count = brands.len();
        for record in brands {
            let alias = record.brand.clone();
            self.insert(record, &[alias]);
        }
        info!(brands = count, "brand cache loaded from store");
        Ok(count)
    }

    pub fn insert(&self, record: BrandRecord, aliases: &[String]) {
        for alias in aliases.iter().filter(|a| !a.is_empty()) {
            self.unresolved.remove(alias);
            self.brand_to_issuer
                .insert(alias.clone(), record.issuer_name.clone());
        }
        self.by_issuer.insert(record.issuer_name.clone(), record);
    }

    pub fn get(&self, issuer_name: &str) -> Option<BrandRecord> {
        self.by_issuer.get(issuer_name).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.by_issuer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_issuer.is_empty()
    }

    /// Cached issuer for any of a brand's lookup keys.
    pub fn issuer_for_brand(&self, keys: &[String]) -> Option<String> {
        keys.iter()
            .find_map(|k| self.brand_to_issuer.get(k).map(|e| e.value().clone()))
    }

    /// Decimal places for an issuer, falling back to the store.
    pub async fn decimal_places(&self, issuer_name: &str) -> Option<u32> {
        if let Some(record) = self.get(issuer_name) {
            return Some(record.decimal_places);
        }
        match self.store.get_brand(issuer_name).await {
            Ok(Some(record)) => {
                let decimals = record.decimal_places;
                let alias = record.brand.clone();
                self.insert(record, &[alias]);
                Some(decimals)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(issuer = %issuer_name, error = %e, "brand lookup failed");
                None
            }
        }
    }

    /// Parse an asset catalog value into the cache. Returns what was added.
    pub fn ingest(&self, catalog: &Value) -> Vec<BrandRecord> {
        let entries = parse_catalog(catalog);
        let mut records = Vec::with_capacity(entries.len());
        for (record, aliases) in entries {
            self.insert(record.clone(), &aliases);
            records.push(record);
        }
        records
    }

    /// Ingest a catalog and upsert every brand concurrently.
    /// Returns how many upserts succeeded.
    pub async fn refresh_from_catalog(&self, catalog: &Value) -> usize {
        let records = self.ingest(catalog);
        let results = join_all(records.iter().map(|r| self.store.upsert_brand(r))).await;

        let mut stored = 0;
        for (record, result) in records.iter().zip(results) {
            match result {
                Ok(()) => stored += 1,
                Err(e) => warn!(issuer = %record.issuer_name, error = %e, "failed to store brand"),
            }
        }
        debug!(brands = records.len(), stored = stored, "asset catalog processed");
        stored
    }

    /// Resolve a brand to its issuer name, reading the asset catalog from
    /// the chain when the brand is not cached yet.
    /// Uses exponential backoff since a new asset may not be published yet.
    pub async fn resolve_issuer(&self, keys: &[String]) -> Option<String> {
        if let Some(issuer) = self.issuer_for_brand(keys) {
            return Some(issuer);
        }
        if keys.is_empty() {
            return None;
        }
        if self.recently_unresolved(keys) {
            debug!(brand = ?keys, "brand lookup failed recently, skipping");
            return None;
        }

        let catalog_key = WatchedKey::data(VBANK_ASSET_PATH);
        let mut delay = Duration::from_millis(500);
        for attempt in 0..LOOKUP_ATTEMPTS {
            match self.querier.query(std::slice::from_ref(&catalog_key)).await {
                Ok(mut results) => match results.remove(&catalog_key.canonical()) {
                    Some(QueryResult::Value { value, .. }) => {
                        self.refresh_from_catalog(&value).await;
                        if let Some(issuer) = self.issuer_for_brand(keys) {
                            info!(
                                brand = ?keys,
                                issuer = %issuer,
                                attempt = attempt,
                                "brand resolved from asset catalog"
                            );
                            return Some(issuer);
                        }
                        debug!(brand = ?keys, attempt = attempt, "brand not in asset catalog yet");
                    }
                    Some(QueryResult::Error(message)) => {
                        debug!(error = %message, attempt = attempt, "asset catalog query failed");
                    }
                    None => debug!(attempt = attempt, "asset catalog missing from response"),
                },
                Err(e) => warn!(error = %e, attempt = attempt, "asset catalog request error"),
            }

            if attempt + 1 < LOOKUP_ATTEMPTS {
                tokio::time::sleep(delay).await;
                delay *= 2; // 500ms, 1s, 2s
            }
        }

        warn!(brand = ?keys, "failed to resolve brand after {LOOKUP_ATTEMPTS} attempts");
        let now = Instant::now();
        for key in keys {
            self.unresolved.insert(key.clone(), now);
        }
        None
    }

    fn recently_unresolved(&self, keys: &[String]) -> bool {
        keys.iter().any(|k| {
            self.unresolved
                .get(k)
                .is_some_and(|failed_at| failed_at.elapsed() < UNRESOLVED_COOLDOWN)
        })
    }
}

/// `[[denom, { brand, issuerName, displayInfo: { assetKind, decimalPlaces } }], ...]`
///
/// Entries without an issuer name are skipped.
pub fn parse_catalog(catalog: &Value) -> Vec<(BrandRecord, Vec<String>)> {
    let Some(entries) = catalog.as_array() else {
        warn!("asset catalog is not a list");
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let info = entry.get(1)?;
            let issuer_name = info.get("issuerName")?.as_str()?.to_string();
            let aliases = info.get("brand").map(brand_keys).unwrap_or_default();
            let display = info.get("displayInfo");
            let asset_kind = display
                .and_then(|d| d.get("assetKind"))
                .and_then(Value::as_str)
                .and_then(AssetKind::from_chain)
                .unwrap_or(AssetKind::Nat);
            let decimal_places = display
                .and_then(|d| d.get("decimalPlaces"))
                .and_then(Value::as_u64)
                .and_then(|d| u32::try_from(d).ok())
                .unwrap_or(0);
            let record = BrandRecord {
                issuer_name,
                asset_kind,
                decimal_places,
                brand: aliases.first().cloned().unwrap_or_default(),
            };
            Some((record, aliases))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::vstorage::batch::QueryError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn catalog() -> Value {
        json!([
            ["ubld", {
                "brand": {"boardId": "board0566", "iface": "Alleged: BLD brand"},
                "issuerName": "BLD",
                "displayInfo": {"assetKind": "nat", "decimalPlaces": 6}
            }],
            ["ibc/BA31", {
                "brand": {"boardId": "board05557", "iface": "Alleged: ATOM brand"},
                "issuerName": "ATOM",
                "displayInfo": {"assetKind": "nat", "decimalPlaces": 6}
            }],
            ["bogus", {"brand": "x"}]
        ])
    }

    /// Serves the catalog after `empty_polls` empty answers.
    struct CatalogQuery {
        empty_polls: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StorageQuery for CatalogQuery {
        async fn query(
            &self,
            keys: &[WatchedKey],
        ) -> Result<HashMap<String, QueryResult>, QueryError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let value = if n < self.empty_polls { json!([]) } else { catalog() };
            Ok(keys
                .iter()
                .map(|k| {
                    (
                        k.canonical(),
                        QueryResult::Value {
                            value: value.clone(),
                            block_height: Some(1),
                        },
                    )
                })
                .collect())
        }
    }

    fn make_cache(store: Arc<MemoryStore>, empty_polls: usize) -> (BrandCache, Arc<CatalogQuery>) {
        let query = Arc::new(CatalogQuery {
            empty_polls,
            calls: AtomicUsize::new(0),
        });
        (BrandCache::new(store, query.clone()), query)
    }

    #[test]
    fn test_parse_catalog() {
        let parsed = parse_catalog(&catalog());
        assert_eq!(parsed.len(), 2);
        let (atom, aliases) = &parsed[1];
        assert_eq!(atom.issuer_name, "ATOM");
        assert_eq!(atom.decimal_places, 6);
        assert_eq!(atom.asset_kind, AssetKind::Nat);
        assert_eq!(atom.brand, "board05557");
        assert_eq!(
            aliases,
            &vec!["board05557".to_string(), "Alleged: ATOM brand".to_string()]
        );
    }

    #[tokio::test]
    async fn test_refresh_from_catalog_persists() {
        let store = Arc::new(MemoryStore::new());
        let (cache, _) = make_cache(store.clone(), 0);

        assert_eq!(cache.refresh_from_catalog(&catalog()).await, 2);
        assert_eq!(cache.len(), 2);
        assert_eq!(
            cache.issuer_for_brand(&["Alleged: BLD brand".to_string()]),
            Some("BLD".to_string())
        );
        assert!(store.get_brand("ATOM").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_issuer_retries_until_published() {
        let store = Arc::new(MemoryStore::new());
        let (cache, query) = make_cache(store, 2);

        let issuer = cache.resolve_issuer(&["board05557".to_string()]).await;
        assert_eq!(issuer, Some("ATOM".to_string()));
        assert_eq!(query.calls.load(Ordering::SeqCst), 3);

        // cached now
        cache.resolve_issuer(&["board05557".to_string()]).await;
        assert_eq!(query.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_unknown_brand_gives_up() {
        let store = Arc::new(MemoryStore::new());
        let (cache, query) = make_cache(store, 0);
        assert_eq!(cache.resolve_issuer(&["board999".to_string()]).await, None);
        assert_eq!(query.calls.load(Ordering::SeqCst), LOOKUP_ATTEMPTS as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolved_brand_not_retried_until_cooldown() {
        let store = Arc::new(MemoryStore::new());
        let (cache, query) = make_cache(store, 0);
        let brand = vec!["board999".to_string()];
        let attempts = LOOKUP_ATTEMPTS as usize;

        assert_eq!(cache.resolve_issuer(&brand).await, None);
        assert_eq!(cache.resolve_issuer(&brand).await, None);
        assert_eq!(query.calls.load(Ordering::SeqCst), attempts);

        tokio::time::sleep(UNRESOLVED_COOLDOWN).await;
        assert_eq!(cache.resolve_issuer(&brand).await, None);
        assert_eq!(query.calls.load(Ordering::SeqCst), 2 * attempts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_catalog_update_clears_unresolved_brand() {
        let store = Arc::new(MemoryStore::new());
        let (cache, query) = make_cache(store, LOOKUP_ATTEMPTS as usize);
        let brand = vec!["board05557".to_string()];

        assert_eq!(cache.resolve_issuer(&brand).await, None);
        cache.refresh_from_catalog(&catalog()).await;
        assert_eq!(cache.resolve_issuer(&brand).await, Some("ATOM".to_string()));
        assert_eq!(query.calls.load(Ordering::SeqCst), LOOKUP_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn test_decimal_places_falls_back_to_store() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_brand(&BrandRecord {
                issuer_name: "IST".into(),
                asset_kind: AssetKind::Nat,
                decimal_places: 6,
                brand: "board0257".into(),
            })
            .await
            .unwrap();
        let (cache, _) = make_cache(store, 0);

        assert_eq!(cache.decimal_places("IST").await, Some(6));
        assert_eq!(cache.decimal_places("NOPE").await, None);
        assert_eq!(
            cache.issuer_for_brand(&["board0257".to_string()]),
            Some("IST".to_string())
        );
    }
}
