//! Follower loop: vault, quote and asset catalog updates in, alerts out.
//!
//! Notifier transitions per evaluation:
//!   inactive → active   ratio at or below threshold (alert persisted + sent)
//!   active   → inactive ratio back above threshold
//!   any      → expired  vault closed or liquidated

use super::paths::PathFollower;
use super::{EventReceiver, FollowerEvent, UpdateKind};
use crate::email::{self, Mailer};
use crate::ratio::{collateralization_ratio, RatioInputs, RatioUnit};
use crate::store::{NewNotification, NotifierRecord, QuoteRecord, Store, StoreError, VaultRecord};
use crate::vstorage::paths::{
    quote_from_state, quote_path, vault_from_state, vault_path, QuoteUpdate, VBANK_ASSET_PATH,
};
use crate::vstorage::BrandCache;
use chrono::Utc;
use dashmap::DashSet;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Follower {
    store: Arc<dyn Store>,
    mailer: Arc<dyn Mailer>,
    brands: BrandCache,
    paths: PathFollower,
    /// Notifiers already reported as having no user
    orphaned: DashSet<u64>,
}

impl Follower {
    pub fn new(
        store: Arc<dyn Store>,
        mailer: Arc<dyn Mailer>,
        brands: BrandCache,
        paths: PathFollower,
    ) -> Self {
        Self {
            store,
            mailer,
            brands,
            paths,
            orphaned: DashSet::new(),
        }
    }

    pub fn paths(&self) -> &PathFollower {
        &self.paths
    }

    /// Consume events until every sender is gone.
    pub async fn run(&self, mut events: EventReceiver) {
        info!("follower started");
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        info!("follower channel closed");
    }

    pub async fn handle_event(&self, event: FollowerEvent) {
        match event {
            FollowerEvent::Update { kind, path, value } => match kind {
                UpdateKind::Vault => self.handle_vault(&path, &value).await,
                UpdateKind::Quote => self.handle_quote(&path, &value).await,
                UpdateKind::AssetCatalog => self.handle_asset_catalog(&value).await,
            },
            FollowerEvent::PathError {
                kind,
                path,
                message,
            } => {
                warn!(kind = %kind, path = %path, error = %message, "vstorage path error");
            }
        }
    }

    pub async fn handle_vault(&self, path: &str, value: &Value) {
        let vault = match vault_from_state(path, value) {
            Ok(vault) => vault,
            Err(e) => {
                warn!(path = %path, error = %e, "undecodable vault update");
                return;
            }
        };

        if let Err(e) = self.store.upsert_vault(&vault).await {
            warn!(
                manager_id = vault.manager_id,
                vault_id = vault.vault_id,
                error = %e,
                "failed to store vault"
            );
        }

        if vault.state.is_terminal() {
            self.stop_watching_vault(&vault).await;
            return;
        }
        if vault.debt == 0 {
            debug!(manager_id = vault.manager_id, vault_id = vault.vault_id, "vault has no debt");
            return;
        }

        let quote = match self.store.get_quote(vault.manager_id).await {
            Ok(Some(quote)) => quote,
            Ok(None) => {
                warn!(manager_id = vault.manager_id, "no quote for manager, skipping vault");
                return;
            }
            Err(e) => {
                warn!(manager_id = vault.manager_id, error = %e, "quote lookup failed");
                return;
            }
        };

        if let Some(ratio) = self.vault_ratio(&vault, &quote).await {
            self.evaluate(ratio as f64, vault.manager_id, vault.vault_id)
                .await;
        }
    }

    pub async fn handle_quote(&self, path: &str, value: &Value) {
        let update = match quote_from_state(path, value) {
            Ok(update) => update,
            Err(e) => {
                warn!(path = %path, error = %e, "undecodable quote update");
                return;
            }
        };
        let manager_id = update.manager_id;

        let existing = match self.store.get_quote(manager_id).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(manager_id = manager_id, error = %e, "quote lookup failed");
                None
            }
        };
        let quote = match existing {
            Some(q) if !q.in_issuer_name.is_empty() && !q.out_issuer_name.is_empty() => {
                QuoteRecord {
                    manager_id,
                    amount_in: update.amount_in,
                    amount_out: update.amount_out,
                    in_issuer_name: q.in_issuer_name,
                    out_issuer_name: q.out_issuer_name,
                    latest_timestamp: Utc::now().timestamp_millis(),
                }
            }
            _ => quote_record(&self.brands, &update).await,
        };

        if let Err(e) = self.store.upsert_quote(&quote).await {
            warn!(manager_id = manager_id, error = %e, "failed to store quote");
        }

        let vaults = match self.store.vaults_by_manager(manager_id).await {
            Ok(vaults) => vaults,
            Err(e) => {
                warn!(manager_id = manager_id, error = %e, "vault lookup failed");
                return;
            }
        };
        let live = vaults
            .iter()
            .filter(|v| v.debt > 0 && !v.state.is_terminal());
        for vault in live {
            let Some(ratio) = self.vault_ratio(vault, &quote).await else {
                continue;
            };
            self.evaluate(ratio as f64, vault.manager_id, vault.vault_id)
                .await;
        }
    }

    pub async fn handle_asset_catalog(&self, value: &Value) {
        let stored = self.brands.refresh_from_catalog(value).await;
        info!(brands = stored, cached = self.brands.len(), "asset catalog updated");
    }

    /// Ratio in percent, or `None` (logged) when it cannot be computed.
    pub async fn vault_ratio(&self, vault: &VaultRecord, quote: &QuoteRecord) -> Option<u64> {
        let Some(decimals_in) = self.brands.decimal_places(&quote.in_issuer_name).await else {
            warn!(issuer = %quote.in_issuer_name, manager_id = quote.manager_id, "decimal places unknown");
            return None;
        };
        let Some(decimals_out) = self.brands.decimal_places(&quote.out_issuer_name).await else {
            warn!(issuer = %quote.out_issuer_name, manager_id = quote.manager_id, "decimal places unknown");
            return None;
        };

        let inputs = RatioInputs {
            locked: vault.locked,
            debt: vault.debt,
            quote_amount_in: quote.amount_in,
            quote_amount_out: quote.amount_out,
            decimals_in,
            decimals_out,
        };
        match collateralization_ratio(&inputs, RatioUnit::Percent) {
            Ok(ratio) => Some(ratio),
            Err(e) => {
                warn!(
                    manager_id = vault.manager_id,
                    vault_id = vault.vault_id,
                    error = %e,
                    "ratio not computable"
                );
                None
            }
        }
    }

    /// Alert every breached notifier of the vault, then reset the ones
    /// that recovered.
    pub async fn evaluate(&self, current_ratio: f64, manager_id: u64, vault_id: u64) {
        if !current_ratio.is_finite() {
            warn!(manager_id = manager_id, vault_id = vault_id, ratio = current_ratio, "non-finite ratio ignored");
            return;
        }

        let notifiers = match self.store.notifiers_by_vault(manager_id, vault_id).await {
            Ok(notifiers) => notifiers,
            Err(e) => {
                warn!(manager_id = manager_id, vault_id = vault_id, error = %e, "notifier lookup failed");
                return;
            }
        };

        let mut breached: Vec<&NotifierRecord> = notifiers
            .iter()
            .filter(|n| !n.expired && !n.active && f64::from(n.threshold) >= current_ratio)
            .collect();
        breached.sort_by(|a, b| b.threshold.cmp(&a.threshold));

        if !breached.is_empty() {
            let asset = self.collateral_name(manager_id).await;
            for notifier in breached {
                self.notify(notifier, current_ratio, &asset).await;
            }
        }

        let recovered = notifiers
            .iter()
            .filter(|n| n.active && !n.expired && f64::from(n.threshold) < current_ratio);
        for notifier in recovered {
            match self.store.set_notifier_active(notifier.id, false).await {
                Ok(()) => info!(
                    notifier_id = notifier.id,
                    threshold = notifier.threshold,
                    ratio = current_ratio,
                    "notifier reset"
                ),
                Err(e) => warn!(notifier_id = notifier.id, error = %e, "failed to reset notifier"),
            }
        }
    }

    async fn collateral_name(&self, manager_id: u64) -> String {
        match self.store.get_quote(manager_id).await {
            Ok(Some(quote)) if !quote.in_issuer_name.is_empty() => quote.in_issuer_name,
            _ => "collateral".to_string(),
        }
    }

    async fn notify(&self, notifier: &NotifierRecord, current_ratio: f64, asset: &str) {
        let user = match self.store.get_user(notifier.user_id).await {
            Ok(Some(user)) => {
                self.orphaned.remove(&notifier.id);
                user
            }
            Ok(None) => {
                if self.orphaned.insert(notifier.id) {
                    warn!(notifier_id = notifier.id, user_id = notifier.user_id, "notifier has no user");
                } else {
                    debug!(notifier_id = notifier.id, user_id = notifier.user_id, "notifier has no user");
                }
                return;
            }
            Err(e) => {
                warn!(notifier_id = notifier.id, error = %e, "user lookup failed");
                return;
            }
        };

        let message =
            email::threshold_breached(&user.email, asset, notifier.vault_id, notifier.threshold);
        let record = NewNotification {
            user_id: notifier.user_id,
            manager_id: notifier.manager_id,
            vault_id: notifier.vault_id,
            threshold: notifier.threshold,
            actual_ratio: current_ratio as u64,
            notifier_id: notifier.id,
            message: message.text.clone(),
        };
        if let Err(e) = self.store.create_notification(record).await {
            warn!(notifier_id = notifier.id, error = %e, "failed to store notification");
        }

        match self.mailer.send(&message).await {
            Ok(()) => info!(
                notifier_id = notifier.id,
                vault_id = notifier.vault_id,
                threshold = notifier.threshold,
                ratio = current_ratio,
                "threshold alert sent"
            ),
            Err(e) => warn!(notifier_id = notifier.id, error = %e, "threshold alert delivery failed"),
        }

        if let Err(e) = self.store.set_notifier_active(notifier.id, true).await {
            warn!(notifier_id = notifier.id, error = %e, "failed to activate notifier");
        }
    }

    /// Stop following a closed or liquidated vault and expire its notifiers.
    async fn stop_watching_vault(&self, vault: &VaultRecord) {
        self.paths
            .remove_path(&vault_path(vault.manager_id, vault.vault_id));

        let notifiers = match self
            .store
            .notifiers_by_vault(vault.manager_id, vault.vault_id)
            .await
        {
            Ok(notifiers) => notifiers,
            Err(e) => {
                warn!(vault_id = vault.vault_id, error = %e, "notifier lookup failed");
                return;
            }
        };
        for notifier in notifiers.iter().filter(|n| !n.expired) {
            if let Err(e) = self.store.expire_notifier(notifier.id).await {
                warn!(notifier_id = notifier.id, error = %e, "failed to expire notifier");
            }
        }
        info!(
            manager_id = vault.manager_id,
            vault_id = vault.vault_id,
            state = %vault.state,
            "vault no longer monitored"
        );
    }

    /// Follow the asset catalog, the quotes of every stored manager and
    /// every vault with a live notifier.
    pub async fn follow_stored(&self) -> Result<(), StoreError> {
        self.paths
            .watch_path(VBANK_ASSET_PATH, UpdateKind::AssetCatalog);

        let managers = self.store.manager_ids().await?;
        for manager_id in &managers {
            self.paths
                .watch_path(&quote_path(*manager_id), UpdateKind::Quote);
        }

        let vaults = self.store.watched_vaults().await?;
        for (manager_id, vault_id) in &vaults {
            self.paths
                .watch_path(&vault_path(*manager_id, *vault_id), UpdateKind::Vault);
        }

        info!(managers = managers.len(), vaults = vaults.len(), "following stored paths");
        Ok(())
    }
}

/// Build a quote row for `update`, naming both sides through the brand cache.
/// Unresolved names are left empty.
pub(crate) async fn quote_record(brands: &BrandCache, update: &QuoteUpdate) -> QuoteRecord {
    let in_issuer_name = brands.resolve_issuer(&update.in_brand).await;
    let out_issuer_name = brands.resolve_issuer(&update.out_brand).await;
    if in_issuer_name.is_none() || out_issuer_name.is_none() {
        warn!(
            manager_id = update.manager_id,
            in_brand = ?update.in_brand,
            out_brand = ?update.out_brand,
            "quote brands not resolved"
        );
    }
    QuoteRecord {
        manager_id: update.manager_id,
        amount_in: update.amount_in,
        amount_out: update.amount_out,
        in_issuer_name: in_issuer_name.unwrap_or_default(),
        out_issuer_name: out_issuer_name.unwrap_or_default(),
        latest_timestamp: Utc::now().timestamp_millis(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::email::{EmailMessage, MailError};
    use crate::store::{AssetKind, BrandRecord, MemoryStore, NewNotifier, UserRecord, VaultState};
    use crate::vstorage::{
        ChainStorageWatcher, QueryError, QueryResult, StorageQuery, WatchedKey, WatcherConfig,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use crate::vstorage::cache::LOOKUP_ATTEMPTS;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Answers nothing; counts asset catalog reads.
    #[derive(Default)]
    pub(crate) struct EmptyQuery {
        catalog_reads: AtomicUsize,
    }

    #[async_trait]
    impl StorageQuery for EmptyQuery {
        async fn query(
            &self,
            keys: &[WatchedKey],
        ) -> Result<HashMap<String, QueryResult>, QueryError> {
            if keys.iter().any(|k| k.path() == VBANK_ASSET_PATH) {
                self.catalog_reads.fetch_add(1, Ordering::SeqCst);
            }
            Ok(HashMap::new())
        }
    }

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<EmailMessage>>,
        fail: bool,
    }

    impl RecordingMailer {
        fn texts(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|m| m.text.clone()).collect()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
            self.sent.lock().unwrap().push(message.clone());
            if self.fail {
                return Err(MailError::ApiError {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            Ok(())
        }
    }

    /// Brand cache knowing ATOM (board05557) and IST (board0257), 6 decimals each.
    pub(crate) fn seeded_brands(store: Arc<MemoryStore>, query: Arc<dyn StorageQuery>) -> BrandCache {
        let brands = BrandCache::new(store, query);
        brands.insert(
            BrandRecord {
                issuer_name: "ATOM".into(),
                asset_kind: AssetKind::Nat,
                decimal_places: 6,
                brand: "board05557".into(),
            },
            &["board05557".to_string(), "Alleged: ATOM brand".to_string()],
        );
        brands.insert(
            BrandRecord {
                issuer_name: "IST".into(),
                asset_kind: AssetKind::Nat,
                decimal_places: 6,
                brand: "board0257".into(),
            },
            &["board0257".to_string(), "Alleged: IST brand".to_string()],
        );
        brands
    }

    struct Harness {
        follower: Follower,
        store: Arc<MemoryStore>,
        mailer: Arc<RecordingMailer>,
        query: Arc<EmptyQuery>,
        _events: EventReceiver,
    }

    /// User 1 and a manager 0 quote where `locked / 10_000` is the ratio in
    /// percent for a vault with debt 7_548_495.
    async fn harness(fail_delivery: bool) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let counting = Arc::new(EmptyQuery::default());
        let query: Arc<dyn StorageQuery> = counting.clone();
        let brands = seeded_brands(store.clone(), query.clone());
        store
            .upsert_user(&UserRecord {
                id: 1,
                email: "holder@example.com".into(),
                verified: true,
            })
            .await
            .unwrap();
        store
            .upsert_quote(&QuoteRecord {
                manager_id: 0,
                amount_in: 1_000_000,
                amount_out: DEBT,
                in_issuer_name: "ATOM".into(),
                out_issuer_name: "IST".into(),
                latest_timestamp: 0,
            })
            .await
            .unwrap();

        let watcher = ChainStorageWatcher::start(query, WatcherConfig::default(), None);
        let (tx, rx) = mpsc::unbounded_channel();
        let mailer = Arc::new(RecordingMailer {
            fail: fail_delivery,
            ..Default::default()
        });
        let follower = Follower::new(
            store.clone(),
            mailer.clone(),
            brands,
            PathFollower::new(watcher, tx),
        );
        Harness {
            follower,
            store,
            mailer,
            query: counting,
            _events: rx,
        }
    }

    const DEBT: u128 = 7_548_495;

    async fn add_notifier(store: &MemoryStore, vault_id: u64, threshold: u32) -> NotifierRecord {
        store
            .create_notifier(NewNotifier {
                user_id: 1,
                manager_id: 0,
                vault_id,
                threshold,
            })
            .await
            .unwrap()
    }

    fn vault_state(locked: u128, debt: u128, state: &str) -> Value {
        json!({
            "locked": {"brand": {"boardId": "board05557"}, "value": locked.to_string()},
            "debtSnapshot": {"debt": {"brand": {"boardId": "board0257"}, "value": debt.to_string()}},
            "vaultState": state
        })
    }

    fn quote_state() -> Value {
        json!({
            "quoteAmount": {"value": [{
                "amountIn": {"brand": {"boardId": "board05557", "iface": "Alleged: ATOM brand"}, "value": "+1000000"},
                "amountOut": {"brand": "$1.Alleged: IST brand", "value": "+7548495"}
            }]}
        })
    }

    #[tokio::test]
    async fn test_hysteresis() {
        let h = harness(false).await;
        let n = add_notifier(&h.store, 1, 500).await;

        h.follower.evaluate(100.0, 0, 1).await;
        assert_eq!(h.mailer.texts().len(), 1);
        assert!(h.store.get_notifier(n.id).await.unwrap().unwrap().active);

        h.follower.evaluate(101.0, 0, 1).await;
        assert_eq!(h.mailer.texts().len(), 1);

        h.follower.evaluate(501.0, 0, 1).await;
        assert!(!h.store.get_notifier(n.id).await.unwrap().unwrap().active);
        assert_eq!(h.mailer.texts().len(), 1);

        h.follower.evaluate(200.0, 0, 1).await;
        assert_eq!(h.mailer.texts().len(), 2);
        assert!(h.store.get_notifier(n.id).await.unwrap().unwrap().active);

        let history = h.store.notifications_by_user(1).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].actual_ratio, 200);
        assert_eq!(history[1].actual_ratio, 100);
    }

    #[tokio::test]
    async fn test_breached_notifiers_alert_highest_first() {
        let h = harness(false).await;
        add_notifier(&h.store, 1, 150).await;
        add_notifier(&h.store, 1, 300).await;
        add_notifier(&h.store, 1, 200).await;
        add_notifier(&h.store, 1, 110).await;

        h.follower.evaluate(120.0, 0, 1).await;

        let texts = h.mailer.texts();
        assert_eq!(texts.len(), 3);
        assert!(texts[0].contains("300%"));
        assert!(texts[1].contains("200%"));
        assert!(texts[2].contains("150%"));
    }

    #[tokio::test]
    async fn test_non_finite_ratio_ignored() {
        let h = harness(false).await;
        add_notifier(&h.store, 1, 150).await;
        h.follower.evaluate(f64::NAN, 0, 1).await;
        h.follower.evaluate(f64::INFINITY, 0, 1).await;
        assert!(h.mailer.texts().is_empty());
    }

    #[tokio::test]
    async fn test_vault_update_alerts_with_collateral_name() {
        let h = harness(false).await;
        let n = add_notifier(&h.store, 1, 150).await;

        h.follower
            .handle_vault(&vault_path(0, 1), &vault_state(1_000_000, DEBT, "active"))
            .await;

        assert_eq!(
            h.mailer.texts(),
            vec!["Your ATOM vault #1, has crossed below the 150% collateralization level.".to_string()]
        );
        let history = h.store.notifications_by_user(1).await.unwrap();
        assert_eq!(history[0].actual_ratio, 100);
        assert_eq!(history[0].notifier_id, n.id);
        assert_eq!(h.store.get_vault(0, 1).await.unwrap().unwrap().locked, 1_000_000);
    }

    #[tokio::test]
    async fn test_closed_vault_expires_notifiers() {
        let h = harness(false).await;
        let n = add_notifier(&h.store, 1, 500).await;
        let path = vault_path(0, 1);
        h.follower.paths().watch_path(&path, UpdateKind::Vault);

        h.follower
            .handle_vault(&path, &vault_state(1_000_000, DEBT, "closed"))
            .await;

        assert!(h.store.get_notifier(n.id).await.unwrap().unwrap().expired);
        assert!(!h.follower.paths().is_following(&path));
        assert_eq!(
            h.store.get_vault(0, 1).await.unwrap().unwrap().state,
            VaultState::Closed
        );

        // expired is terminal
        h.follower.evaluate(100.0, 0, 1).await;
        assert!(h.mailer.texts().is_empty());
        assert!(h.store.watched_vaults().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_debt_and_missing_quote_skip() {
        let h = harness(false).await;
        add_notifier(&h.store, 1, 150).await;

        h.follower
            .handle_vault(&vault_path(0, 1), &vault_state(1_000_000, 0, "active"))
            .await;
        h.follower
            .handle_vault(&vault_path(5, 1), &vault_state(1_000_000, DEBT, "active"))
            .await;

        assert!(h.mailer.texts().is_empty());
        assert!(h.store.get_vault(5, 1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_quote_update_evaluates_live_vaults() {
        let h = harness(false).await;
        for (vault_id, debt, state) in [
            (1, DEBT, VaultState::Active),
            (2, 0, VaultState::Active),
            (3, DEBT, VaultState::Closed),
        ] {
            h.store
                .upsert_vault(&VaultRecord {
                    manager_id: 0,
                    vault_id,
                    locked: 1_000_000,
                    debt,
                    state,
                })
                .await
                .unwrap();
            add_notifier(&h.store, vault_id, 150).await;
        }

        h.follower.handle_quote(&quote_path(0), &quote_state()).await;

        let texts = h.mailer.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("vault #1,"));
        let quote = h.store.get_quote(0).await.unwrap().unwrap();
        assert_eq!(quote.in_issuer_name, "ATOM");
        assert!(quote.latest_timestamp > 0);
    }

    #[tokio::test]
    async fn test_new_quote_names_resolved_from_brands() {
        let h = harness(false).await;
        h.follower.handle_quote(&quote_path(1), &quote_state()).await;

        let quote = h.store.get_quote(1).await.unwrap().unwrap();
        assert_eq!(quote.in_issuer_name, "ATOM");
        assert_eq!(quote.out_issuer_name, "IST");
        assert_eq!(quote.amount_out, DEBT);
    }

    #[tokio::test]
    async fn test_delivery_failure_still_marks_active() {
        let h = harness(true).await;
        let n = add_notifier(&h.store, 1, 150).await;

        h.follower.evaluate(100.0, 0, 1).await;

        assert_eq!(h.mailer.texts().len(), 1);
        assert!(h.store.get_notifier(n.id).await.unwrap().unwrap().active);
        assert_eq!(h.store.notifications_by_user(1).await.unwrap().len(), 1);

        // no retry while active
        h.follower.evaluate(90.0, 0, 1).await;
        assert_eq!(h.mailer.texts().len(), 1);
    }

    #[tokio::test]
    async fn test_notifier_without_user_skipped() {
        let h = harness(false).await;
        let orphan = h
            .store
            .create_notifier(NewNotifier {
                user_id: 42,
                manager_id: 0,
                vault_id: 1,
                threshold: 150,
            })
            .await
            .unwrap();

        h.follower.evaluate(100.0, 0, 1).await;

        assert!(h.mailer.texts().is_empty());
        assert!(!h.store.get_notifier(orphan.id).await.unwrap().unwrap().active);
    }

    #[tokio::test]
    async fn test_orphaned_notifier_reported_until_user_appears() {
        let h = harness(false).await;
        let orphan = h
            .store
            .create_notifier(NewNotifier {
                user_id: 42,
                manager_id: 0,
                vault_id: 1,
                threshold: 150,
            })
            .await
            .unwrap();

        h.follower.evaluate(100.0, 0, 1).await;
        h.follower.evaluate(100.0, 0, 1).await;
        assert!(h.follower.orphaned.contains(&orphan.id));
        assert_eq!(h.follower.orphaned.len(), 1);
        assert!(h.mailer.texts().is_empty());

        h.store
            .upsert_user(&UserRecord {
                id: 42,
                email: "late@example.com".into(),
                verified: true,
            })
            .await
            .unwrap();
        h.follower.evaluate(100.0, 0, 1).await;

        assert_eq!(h.mailer.texts().len(), 1);
        assert!(h.store.get_notifier(orphan.id).await.unwrap().unwrap().active);
        assert!(!h.follower.orphaned.contains(&orphan.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_quote_brand_not_looked_up_twice() {
        let h = harness(false).await;
        let mut state = quote_state();
        state["quoteAmount"]["value"][0]["amountIn"]["brand"] = json!({"boardId": "board9999"});

        h.follower.handle_quote(&quote_path(3), &state).await;
        assert_eq!(h.query.catalog_reads.load(Ordering::SeqCst), LOOKUP_ATTEMPTS as usize);
        let quote = h.store.get_quote(3).await.unwrap().unwrap();
        assert_eq!(quote.in_issuer_name, "");
        assert_eq!(quote.out_issuer_name, "IST");

        h.follower.handle_quote(&quote_path(3), &state).await;
        assert_eq!(h.query.catalog_reads.load(Ordering::SeqCst), LOOKUP_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn test_asset_catalog_event_stores_brands() {
        let h = harness(false).await;
        let catalog = json!([
            ["ubld", {
                "brand": {"boardId": "board0566", "iface": "Alleged: BLD brand"},
                "issuerName": "BLD",
                "displayInfo": {"assetKind": "nat", "decimalPlaces": 6}
            }]
        ]);

        h.follower
            .handle_event(FollowerEvent::Update {
                kind: UpdateKind::AssetCatalog,
                path: VBANK_ASSET_PATH.to_string(),
                value: catalog,
            })
            .await;

        assert!(h.store.get_brand("BLD").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_follow_stored_paths() {
        let h = harness(false).await;
        for (manager_id, vault_id) in [(0, 1), (2, 4)] {
            h.store
                .upsert_vault(&VaultRecord {
                    manager_id,
                    vault_id,
                    locked: 1,
                    debt: 1,
                    state: VaultState::Active,
                })
                .await
                .unwrap();
        }
        add_notifier(&h.store, 1, 150).await;

        h.follower.follow_stored().await.unwrap();

        let paths = h.follower.paths();
        assert!(paths.is_following(VBANK_ASSET_PATH));
        assert!(paths.is_following(&quote_path(0)));
        assert!(paths.is_following(&quote_path(2)));
        assert!(paths.is_following(&vault_path(0, 1)));
        assert!(!paths.is_following(&vault_path(2, 4)));
        assert_eq!(paths.paths().len(), 4);
    }
}
