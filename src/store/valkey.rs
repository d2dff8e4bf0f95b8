//! Valkey (Redis-compatible) backend.
//!
//! Data model:
//!   vault:{m}:{v}            → JSON VaultRecord
//!   manager_vaults:{m}       → SET of vault ids
//!   managers                 → SET of manager ids
//!   quote:{m}                → JSON QuoteRecord
//!   brand:{issuer}           → JSON BrandRecord
//!   brands                   → SET of issuer names
//!   user:{id}                → JSON UserRecord
//!   notifier:{id}            → JSON NotifierRecord
//!   notifier_seq             → INCR counter
//!   notifiers                → SET of notifier ids
//!   user_notifiers:{user}    → SET of notifier ids
//!   vault_notifiers:{m}:{v}  → SET of notifier ids
//!   notification_seq         → INCR counter
//!   notifications:{user}     → LIST of JSON NotificationRecord (newest first)

use super::{
    BrandRecord, NewNotification, NewNotifier, NotificationRecord, NotifierRecord, QuoteRecord,
    Store, StoreError, UserRecord, VaultRecord,
};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

/// All keys are namespaced under a configurable prefix so several
/// deployments can share one Valkey. Default prefix: "vault-alerts".
#[derive(Clone)]
pub struct ValkeyStore {
    conn: MultiplexedConnection,
    prefix: String,
}

impl ValkeyStore {
    pub async fn connect(url: &str, prefix: &str) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!(url = url, prefix = prefix, "connected to Valkey");
        Ok(Self {
            conn,
            prefix: prefix.to_string(),
        })
    }

    /// Build a namespaced key: "{prefix}:{suffix}"
    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.prefix, suffix)
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!(response = %pong, "Valkey ping");
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(key).await?;
        match json {
            Some(j) => Ok(Some(serde_json::from_str(&j)?)),
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string(value)?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, json).await?;
        Ok(())
    }

    async fn members(&self, key: &str) -> Result<Vec<u64>, StoreError> {
        let mut conn = self.conn.clone();
        let mut ids: Vec<u64> = conn.smembers(key).await?;
        ids.sort_unstable();
        Ok(ids)
    }

    async fn notifiers_in(&self, set_key: &str) -> Result<Vec<NotifierRecord>, StoreError> {
        let mut out = Vec::new();
        for id in self.members(set_key).await? {
            match self.get_notifier(id).await? {
                Some(n) => out.push(n),
                None => warn!(notifier_id = id, index = %set_key, "dangling notifier index entry"),
            }
        }
        Ok(out)
    }

    async fn update_notifier(
        &self,
        id: u64,
        apply: impl FnOnce(&mut NotifierRecord) + Send,
    ) -> Result<(), StoreError> {
        let mut notifier = self
            .get_notifier(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("notifier {id}")))?;
        apply(&mut notifier);

        // XX: a notifier deleted since the read above stays deleted
        let json = serde_json::to_string(&notifier)?;
        let mut conn = self.conn.clone();
        let written: Option<String> = redis::cmd("SET")
            .arg(self.key(&format!("notifier:{id}")))
            .arg(json)
            .arg("XX")
            .query_async(&mut conn)
            .await?;
        match written {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(format!("notifier {id}"))),
        }
    }
}

#[async_trait]
impl Store for ValkeyStore {
    // --- Vaults ---

    async fn upsert_vault(&self, vault: &VaultRecord) -> Result<(), StoreError> {
        let key = self.key(&format!("vault:{}:{}", vault.manager_id, vault.vault_id));
        self.set_json(&key, vault).await?;

        let mut conn = self.conn.clone();
        let index = self.key(&format!("manager_vaults:{}", vault.manager_id));
        conn.sadd::<_, _, ()>(&index, vault.vault_id).await?;
        conn.sadd::<_, _, ()>(&self.key("managers"), vault.manager_id)
            .await?;

        debug!(
            manager_id = vault.manager_id,
            vault_id = vault.vault_id,
            state = %vault.state,
            "stored vault"
        );
        Ok(())
    }

    async fn get_vault(
        &self,
        manager_id: u64,
        vault_id: u64,
    ) -> Result<Option<VaultRecord>, StoreError> {
        self.get_json(&self.key(&format!("vault:{manager_id}:{vault_id}")))
            .await
    }

    async fn vaults_by_manager(&self, manager_id: u64) -> Result<Vec<VaultRecord>, StoreError> {
        let mut vaults = Vec::new();
        for vault_id in self
            .members(&self.key(&format!("manager_vaults:{manager_id}")))
            .await?
        {
            if let Some(v) = self.get_vault(manager_id, vault_id).await? {
                vaults.push(v);
            }
        }
        Ok(vaults)
    }

    async fn manager_ids(&self) -> Result<Vec<u64>, StoreError> {
        self.members(&self.key("managers")).await
    }

    // --- Quotes ---

    async fn upsert_quote(&self, quote: &QuoteRecord) -> Result<(), StoreError> {
        self.set_json(&self.key(&format!("quote:{}", quote.manager_id)), quote)
            .await
    }

    async fn get_quote(&self, manager_id: u64) -> Result<Option<QuoteRecord>, StoreError> {
        self.get_json(&self.key(&format!("quote:{manager_id}"))).await
    }

    // --- Brands ---

    async fn upsert_brand(&self, brand: &BrandRecord) -> Result<(), StoreError> {
        self.set_json(&self.key(&format!("brand:{}", brand.issuer_name)), brand)
            .await?;
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(&self.key("brands"), &brand.issuer_name)
            .await?;
        Ok(())
    }

    async fn get_brand(&self, issuer_name: &str) -> Result<Option<BrandRecord>, StoreError> {
        self.get_json(&self.key(&format!("brand:{issuer_name}"))).await
    }

    async fn list_brands(&self) -> Result<Vec<BrandRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let mut names: Vec<String> = conn.smembers(&self.key("brands")).await?;
        names.sort();
        let mut brands = Vec::with_capacity(names.len());
        for name in names {
            if let Some(b) = self.get_brand(&name).await? {
                brands.push(b);
            }
        }
        Ok(brands)
    }

    // --- Users ---

    async fn upsert_user(&self, user: &UserRecord) -> Result<(), StoreError> {
        self.set_json(&self.key(&format!("user:{}", user.id)), user)
            .await
    }

    async fn get_user(&self, user_id: u64) -> Result<Option<UserRecord>, StoreError> {
        self.get_json(&self.key(&format!("user:{user_id}"))).await
    }

    // --- Notifiers ---

    async fn create_notifier(&self, notifier: NewNotifier) -> Result<NotifierRecord, StoreError> {
        let mut conn = self.conn.clone();
        let id: u64 = conn.incr(&self.key("notifier_seq"), 1u64).await?;
        let record = NotifierRecord {
            id,
            user_id: notifier.user_id,
            manager_id: notifier.manager_id,
            vault_id: notifier.vault_id,
            threshold: notifier.threshold,
            active: false,
            expired: false,
        };
        self.set_json(&self.key(&format!("notifier:{id}")), &record)
            .await?;

        conn.sadd::<_, _, ()>(&self.key("notifiers"), id).await?;
        conn.sadd::<_, _, ()>(&self.key(&format!("user_notifiers:{}", record.user_id)), id)
            .await?;
        conn.sadd::<_, _, ()>(
            &self.key(&format!(
                "vault_notifiers:{}:{}",
                record.manager_id, record.vault_id
            )),
            id,
        )
        .await?;

        info!(
            notifier_id = id,
            user_id = record.user_id,
            manager_id = record.manager_id,
            vault_id = record.vault_id,
            threshold = record.threshold,
            "notifier created"
        );
        Ok(record)
    }

    async fn get_notifier(&self, id: u64) -> Result<Option<NotifierRecord>, StoreError> {
        self.get_json(&self.key(&format!("notifier:{id}"))).await
    }

    async fn delete_notifier(&self, id: u64) -> Result<bool, StoreError> {
        let Some(record) = self.get_notifier(id).await? else {
            return Ok(false);
        };
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(&self.key(&format!("notifier:{id}"))).await?;
        conn.srem::<_, _, ()>(&self.key("notifiers"), id).await?;
        conn.srem::<_, _, ()>(&self.key(&format!("user_notifiers:{}", record.user_id)), id)
            .await?;
        conn.srem::<_, _, ()>(
            &self.key(&format!(
                "vault_notifiers:{}:{}",
                record.manager_id, record.vault_id
            )),
            id,
        )
        .await?;
        Ok(true)
    }

    async fn notifiers_by_user(&self, user_id: u64) -> Result<Vec<NotifierRecord>, StoreError> {
        let mut out = self
            .notifiers_in(&self.key(&format!("user_notifiers:{user_id}")))
            .await?;
        out.sort_by_key(|n| (n.threshold, n.id));
        Ok(out)
    }

    async fn notifiers_by_vault(
        &self,
        manager_id: u64,
        vault_id: u64,
    ) -> Result<Vec<NotifierRecord>, StoreError> {
        self.notifiers_in(&self.key(&format!("vault_notifiers:{manager_id}:{vault_id}")))
            .await
    }

    async fn watched_vaults(&self) -> Result<Vec<(u64, u64)>, StoreError> {
        let mut pairs: Vec<(u64, u64)> = self
            .notifiers_in(&self.key("notifiers"))
            .await?
            .into_iter()
            .filter(|n| !n.expired)
            .map(|n| (n.manager_id, n.vault_id))
            .collect();
        pairs.sort_unstable();
        pairs.dedup();
        Ok(pairs)
    }

    async fn set_notifier_active(&self, id: u64, active: bool) -> Result<(), StoreError> {
        self.update_notifier(id, |n| n.active = active).await
    }

    async fn expire_notifier(&self, id: u64) -> Result<(), StoreError> {
        self.update_notifier(id, |n| n.expired = true).await
    }

    // --- Notifications ---

    async fn create_notification(
        &self,
        notification: NewNotification,
    ) -> Result<NotificationRecord, StoreError> {
        let mut conn = self.conn.clone();
        let id: u64 = conn.incr(&self.key("notification_seq"), 1u64).await?;
        let record = NotificationRecord {
            id,
            user_id: notification.user_id,
            manager_id: notification.manager_id,
            vault_id: notification.vault_id,
            threshold: notification.threshold,
            actual_ratio: notification.actual_ratio,
            notifier_id: notification.notifier_id,
            sent_at: chrono::Utc::now().timestamp_millis(),
            message: notification.message,
        };

        let json = serde_json::to_string(&record)?;
        let log_key = self.key(&format!("notifications:{}", record.user_id));
        conn.lpush::<_, _, ()>(&log_key, &json).await?;

        debug!(
            notification_id = id,
            notifier_id = record.notifier_id,
            ratio = record.actual_ratio,
            "notification recorded"
        );
        Ok(record)
    }

    async fn notifications_by_user(
        &self,
        user_id: u64,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let jsons: Vec<String> = conn
            .lrange(&self.key(&format!("notifications:{user_id}")), 0, -1)
            .await?;
        let mut out = Vec::with_capacity(jsons.len());
        for j in jsons {
            out.push(serde_json::from_str(&j)?);
        }
        Ok(out)
    }
}
