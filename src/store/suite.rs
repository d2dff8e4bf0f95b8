//! Behaviour every `Store` backend must share. Each function runs against a
//! fresh, empty store.

use super::{
    AssetKind, BrandRecord, NewNotification, NewNotifier, QuoteRecord, Store, StoreError,
    VaultRecord, VaultState,
};

fn vault(manager_id: u64, vault_id: u64) -> VaultRecord {
    VaultRecord {
        manager_id,
        vault_id,
        locked: 10,
        debt: 5,
        state: VaultState::Active,
    }
}

fn new_notifier(user_id: u64, vault_id: u64, threshold: u32) -> NewNotifier {
    NewNotifier {
        user_id,
        manager_id: 0,
        vault_id,
        threshold,
    }
}

fn notification(ratio: u64) -> NewNotification {
    NewNotification {
        user_id: 1,
        manager_id: 0,
        vault_id: 1,
        threshold: 150,
        actual_ratio: ratio,
        notifier_id: 1,
        message: "m".into(),
    }
}

pub(crate) async fn vaults_by_manager(store: &dyn Store) {
    store.upsert_vault(&vault(0, 2)).await.unwrap();
    store.upsert_vault(&vault(0, 1)).await.unwrap();
    store.upsert_vault(&vault(1, 1)).await.unwrap();
    // upsert overwrites
    let mut closed = vault(0, 2);
    closed.state = VaultState::Closed;
    store.upsert_vault(&closed).await.unwrap();

    let vaults = store.vaults_by_manager(0).await.unwrap();
    let ids: Vec<u64> = vaults.iter().map(|v| v.vault_id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(vaults[1].state, VaultState::Closed);
    assert_eq!(store.manager_ids().await.unwrap(), vec![0, 1]);
    assert!(store.get_vault(3, 3).await.unwrap().is_none());
}

pub(crate) async fn quotes_and_brands(store: &dyn Store) {
    let quote = QuoteRecord {
        manager_id: 0,
        amount_in: 1_000_000,
        amount_out: 7_548_495,
        in_issuer_name: "ATOM".into(),
        out_issuer_name: "IST".into(),
        latest_timestamp: 1,
    };
    store.upsert_quote(&quote).await.unwrap();
    assert_eq!(store.get_quote(0).await.unwrap(), Some(quote));
    assert!(store.get_quote(1).await.unwrap().is_none());

    for (issuer, brand) in [("IST", "board0257"), ("ATOM", "board05557")] {
        store
            .upsert_brand(&BrandRecord {
                issuer_name: issuer.into(),
                asset_kind: AssetKind::Nat,
                decimal_places: 6,
                brand: brand.into(),
            })
            .await
            .unwrap();
    }
    let names: Vec<String> = store
        .list_brands()
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.issuer_name)
        .collect();
    assert_eq!(names, vec!["ATOM".to_string(), "IST".to_string()]);
}

pub(crate) async fn notifiers_ordered_by_threshold(store: &dyn Store) {
    store.create_notifier(new_notifier(7, 1, 300)).await.unwrap();
    store.create_notifier(new_notifier(7, 1, 150)).await.unwrap();
    store.create_notifier(new_notifier(8, 1, 100)).await.unwrap();

    let thresholds: Vec<u32> = store
        .notifiers_by_user(7)
        .await
        .unwrap()
        .iter()
        .map(|n| n.threshold)
        .collect();
    assert_eq!(thresholds, vec![150, 300]);
}

pub(crate) async fn watched_vaults_skip_expired(store: &dyn Store) {
    let a = store.create_notifier(new_notifier(1, 1, 150)).await.unwrap();
    store.create_notifier(new_notifier(2, 1, 200)).await.unwrap();
    let c = store.create_notifier(new_notifier(1, 2, 150)).await.unwrap();

    store.expire_notifier(c.id).await.unwrap();
    assert_eq!(store.watched_vaults().await.unwrap(), vec![(0, 1)]);

    store.expire_notifier(a.id).await.unwrap();
    assert_eq!(store.watched_vaults().await.unwrap(), vec![(0, 1)]);

    store.set_notifier_active(a.id, true).await.unwrap();
    let a = store.get_notifier(a.id).await.unwrap().unwrap();
    assert!(a.active && a.expired);

    assert!(matches!(
        store.set_notifier_active(9_999, true).await,
        Err(StoreError::NotFound(_))
    ));
}

pub(crate) async fn delete_notifier_clears_indexes(store: &dyn Store) {
    let kept = store.create_notifier(new_notifier(1, 1, 150)).await.unwrap();
    let gone = store.create_notifier(new_notifier(1, 1, 200)).await.unwrap();
    let other = store.create_notifier(new_notifier(1, 2, 120)).await.unwrap();

    assert!(store.delete_notifier(gone.id).await.unwrap());
    assert!(!store.delete_notifier(gone.id).await.unwrap());
    assert!(store.get_notifier(gone.id).await.unwrap().is_none());

    let by_vault: Vec<u64> = store
        .notifiers_by_vault(0, 1)
        .await
        .unwrap()
        .iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(by_vault, vec![kept.id]);
    let by_user: Vec<u64> = store
        .notifiers_by_user(1)
        .await
        .unwrap()
        .iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(by_user, vec![other.id, kept.id]);

    store.delete_notifier(kept.id).await.unwrap();
    assert_eq!(store.watched_vaults().await.unwrap(), vec![(0, 2)]);

    // a late state change must not bring a deleted notifier back
    assert!(matches!(
        store.set_notifier_active(gone.id, true).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.expire_notifier(kept.id).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(store.get_notifier(gone.id).await.unwrap().is_none());
}

pub(crate) async fn notifications_append_only_newest_first(store: &dyn Store) {
    let mut ids = Vec::new();
    for ratio in 0..1_100u64 {
        ids.push(store.create_notification(notification(ratio)).await.unwrap().id);
    }
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    let log = store.notifications_by_user(1).await.unwrap();
    assert_eq!(log.len(), 1_100);
    assert_eq!(log[0].actual_ratio, 1_099);
    assert_eq!(log[1_099].actual_ratio, 0);
    assert!(log[0].sent_at >= log[1_099].sent_at);
    assert!(store.notifications_by_user(2).await.unwrap().is_empty());
}
