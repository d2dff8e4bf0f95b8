use super::{
    BrandRecord, NewNotification, NewNotifier, NotificationRecord, NotifierRecord, QuoteRecord,
    Store, StoreError, UserRecord, VaultRecord,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    vaults: BTreeMap<(u64, u64), VaultRecord>,
    quotes: HashMap<u64, QuoteRecord>,
    brands: BTreeMap<String, BrandRecord>,
    users: HashMap<u64, UserRecord>,
    notifiers: BTreeMap<u64, NotifierRecord>,
    notifications: Vec<NotificationRecord>,
    last_notifier_id: u64,
    last_notification_id: u64,
}

/// In-process store. Cloning shares the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_vault(&self, vault: &VaultRecord) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        t.vaults
            .insert((vault.manager_id, vault.vault_id), vault.clone());
        Ok(())
    }

    async fn get_vault(
        &self,
        manager_id: u64,
        vault_id: u64,
    ) -> Result<Option<VaultRecord>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.vaults.get(&(manager_id, vault_id)).cloned())
    }

    async fn vaults_by_manager(&self, manager_id: u64) -> Result<Vec<VaultRecord>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.vaults
            .range((manager_id, 0)..=(manager_id, u64::MAX))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn manager_ids(&self) -> Result<Vec<u64>, StoreError> {
        let t = self.tables.read().await;
        let ids: BTreeSet<u64> = t.vaults.keys().map(|(m, _)| *m).collect();
        Ok(ids.into_iter().collect())
    }

    async fn upsert_quote(&self, quote: &QuoteRecord) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        t.quotes.insert(quote.manager_id, quote.clone());
        Ok(())
    }

    async fn get_quote(&self, manager_id: u64) -> Result<Option<QuoteRecord>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.quotes.get(&manager_id).cloned())
    }

    async fn upsert_brand(&self, brand: &BrandRecord) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        t.brands.insert(brand.issuer_name.clone(), brand.clone());
        Ok(())
    }

    async fn get_brand(&self, issuer_name: &str) -> Result<Option<BrandRecord>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.brands.get(issuer_name).cloned())
    }

    async fn list_brands(&self) -> Result<Vec<BrandRecord>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.brands.values().cloned().collect())
    }

    async fn upsert_user(&self, user: &UserRecord) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        t.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, user_id: u64) -> Result<Option<UserRecord>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.users.get(&user_id).cloned())
    }

    async fn create_notifier(&self, notifier: NewNotifier) -> Result<NotifierRecord, StoreError> {
        let mut t = self.tables.write().await;
        t.last_notifier_id += 1;
        let record = NotifierRecord {
            id: t.last_notifier_id,
            user_id: notifier.user_id,
            manager_id: notifier.manager_id,
            vault_id: notifier.vault_id,
            threshold: notifier.threshold,
            active: false,
            expired: false,
        };
        t.notifiers.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_notifier(&self, id: u64) -> Result<Option<NotifierRecord>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.notifiers.get(&id).cloned())
    }

    async fn delete_notifier(&self, id: u64) -> Result<bool, StoreError> {
        let mut t = self.tables.write().await;
        Ok(t.notifiers.remove(&id).is_some())
    }

    async fn notifiers_by_user(&self, user_id: u64) -> Result<Vec<NotifierRecord>, StoreError> {
        let t = self.tables.read().await;
        let mut out: Vec<NotifierRecord> = t
            .notifiers
            .values()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by_key(|n| (n.threshold, n.id));
        Ok(out)
    }

    async fn notifiers_by_vault(
        &self,
        manager_id: u64,
        vault_id: u64,
    ) -> Result<Vec<NotifierRecord>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.notifiers
            .values()
            .filter(|n| n.manager_id == manager_id && n.vault_id == vault_id)
            .cloned()
            .collect())
    }

    async fn watched_vaults(&self) -> Result<Vec<(u64, u64)>, StoreError> {
        let t = self.tables.read().await;
        let pairs: BTreeSet<(u64, u64)> = t
            .notifiers
            .values()
            .filter(|n| !n.expired)
            .map(|n| (n.manager_id, n.vault_id))
            .collect();
        Ok(pairs.into_iter().collect())
    }

    async fn set_notifier_active(&self, id: u64, active: bool) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        let notifier = t
            .notifiers
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("notifier {id}")))?;
        notifier.active = active;
        Ok(())
    }

    async fn expire_notifier(&self, id: u64) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        let notifier = t
            .notifiers
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("notifier {id}")))?;
        notifier.expired = true;
        Ok(())
    }

    async fn create_notification(
        &self,
        notification: NewNotification,
    ) -> Result<NotificationRecord, StoreError> {
        let mut t = self.tables.write().await;
        t.last_notification_id += 1;
        let record = NotificationRecord {
            id: t.last_notification_id,
            user_id: notification.user_id,
            manager_id: notification.manager_id,
            vault_id: notification.vault_id,
            threshold: notification.threshold,
            actual_ratio: notification.actual_ratio,
            notifier_id: notification.notifier_id,
            sent_at: chrono::Utc::now().timestamp_millis(),
            message: notification.message,
        };
        t.notifications.push(record.clone());
        Ok(record)
    }

    async fn notifications_by_user(
        &self,
        user_id: u64,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.notifications
            .iter()
            .rev()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect())
    }
}
