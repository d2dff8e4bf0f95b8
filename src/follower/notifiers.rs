//! Notifier management: create, list, delete.
//!
//! Creating a notifier for a vault the store has never seen reads the vault
//! (and its manager's quote) from chain storage first, then follows both
//! paths so the follower starts evaluating it.

use super::engine::quote_record;
use super::paths::PathFollower;
use super::UpdateKind;
use crate::store::{NewNotifier, NotifierRecord, Store, StoreError};
use crate::vstorage::paths::{quote_from_state, quote_path, vault_from_state, vault_path, PayloadError};
use crate::vstorage::{query_data, BrandCache, QueryError, StorageQuery};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Highest accepted threshold, in percent.
pub const MAX_THRESHOLD: u32 = 100_000;

#[derive(Error, Debug)]
pub enum NotifierError {
    #[error("invalid notifier: {0}")]
    Validation(String),
    #[error("vault {vault_id} of manager {manager_id} not found")]
    VaultNotFound { manager_id: u64, vault_id: u64 },
    #[error("vault {vault_id} of manager {manager_id} is closed or liquidated")]
    VaultInactive { manager_id: u64, vault_id: u64 },
    #[error("notifier {0} not found")]
    NotFound(u64),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("chain query failed: {0}")]
    Query(#[from] QueryError),
    #[error("unexpected chain payload: {0}")]
    Payload(#[from] PayloadError),
}

#[derive(Clone)]
pub struct NotifierService {
    store: Arc<dyn Store>,
    querier: Arc<dyn StorageQuery>,
    brands: BrandCache,
    paths: PathFollower,
}

impl NotifierService {
    pub fn new(
        store: Arc<dyn Store>,
        querier: Arc<dyn StorageQuery>,
        brands: BrandCache,
        paths: PathFollower,
    ) -> Self {
        Self {
            store,
            querier,
            brands,
            paths,
        }
    }

    pub async fn create(
        &self,
        user_id: u64,
        manager_id: u64,
        vault_id: u64,
        threshold: u32,
    ) -> Result<NotifierRecord, NotifierError> {
        if threshold == 0 || threshold > MAX_THRESHOLD {
            return Err(NotifierError::Validation(format!(
                "threshold {threshold} outside 1..={MAX_THRESHOLD}"
            )));
        }

        let vault_key = vault_path(manager_id, vault_id);
        match self.store.get_vault(manager_id, vault_id).await? {
            Some(vault) if vault.state.is_terminal() => {
                return Err(NotifierError::VaultInactive {
                    manager_id,
                    vault_id,
                });
            }
            Some(_) => {}
            None => {
                let state = match query_data(self.querier.as_ref(), &vault_key).await {
                    Ok(state) => state,
                    Err(QueryError::NotFound(_)) => {
                        return Err(NotifierError::VaultNotFound {
                            manager_id,
                            vault_id,
                        });
                    }
                    Err(e) => return Err(e.into()),
                };
                let vault = vault_from_state(&vault_key, &state)?;
                if vault.state.is_terminal() {
                    return Err(NotifierError::VaultInactive {
                        manager_id,
                        vault_id,
                    });
                }
                self.store.upsert_vault(&vault).await?;
                debug!(manager_id = manager_id, vault_id = vault_id, "vault fetched from chain");
            }
        }

        let quote_key = quote_path(manager_id);
        if self.store.get_quote(manager_id).await?.is_none() {
            let state = query_data(self.querier.as_ref(), &quote_key).await?;
            let update = quote_from_state(&quote_key, &state)?;
            let quote = quote_record(&self.brands, &update).await;
            self.store.upsert_quote(&quote).await?;
            debug!(manager_id = manager_id, "quote fetched from chain");
        }

        let notifier = self
            .store
            .create_notifier(NewNotifier {
                user_id,
                manager_id,
                vault_id,
                threshold,
            })
            .await?;

        self.paths.watch_path(&quote_key, UpdateKind::Quote);
        self.paths.watch_path(&vault_key, UpdateKind::Vault);
        info!(
            notifier_id = notifier.id,
            user_id = user_id,
            manager_id = manager_id,
            vault_id = vault_id,
            threshold = threshold,
            "notifier created"
        );
        Ok(notifier)
    }

    /// A user's notifiers, lowest threshold first.
    pub async fn list(&self, user_id: u64) -> Result<Vec<NotifierRecord>, NotifierError> {
        Ok(self.store.notifiers_by_user(user_id).await?)
    }

    pub async fn delete(&self, user_id: u64, notifier_id: u64) -> Result<(), NotifierError> {
        let notifier = match self.store.get_notifier(notifier_id).await? {
            Some(n) if n.user_id == user_id => n,
            _ => return Err(NotifierError::NotFound(notifier_id)),
        };
        if !self.store.delete_notifier(notifier_id).await? {
            return Err(NotifierError::NotFound(notifier_id));
        }

        let remaining = self
            .store
            .notifiers_by_vault(notifier.manager_id, notifier.vault_id)
            .await?;
        if remaining.iter().all(|n| n.expired) {
            self.paths
                .remove_path(&vault_path(notifier.manager_id, notifier.vault_id));
        }
        info!(notifier_id = notifier_id, user_id = user_id, "notifier deleted");
        Ok(())
    }
}
