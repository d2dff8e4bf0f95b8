//! Registry of followed vstorage paths.

use super::{EventSender, FollowerEvent, UpdateKind};
use crate::vstorage::{ChainStorageWatcher, Unsubscribe, WatchedKey};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Maps a followed path to its kind and watcher subscription.
#[derive(Clone)]
pub struct PathFollower {
    watcher: ChainStorageWatcher,
    events: EventSender,
    followed: Arc<DashMap<String, (UpdateKind, Unsubscribe)>>,
}

impl PathFollower {
    pub fn new(watcher: ChainStorageWatcher, events: EventSender) -> Self {
        Self {
            watcher,
            events,
            followed: Arc::new(DashMap::new()),
        }
    }

    /// Follow `path`. A path that is already followed is left as is.
    pub fn watch_path(&self, path: &str, kind: UpdateKind) {
        let Entry::Vacant(slot) = self.followed.entry(path.to_string()) else {
            return;
        };

        let update_tx = self.events.clone();
        let update_path = path.to_string();
        let error_tx = self.events.clone();
        let error_path = path.to_string();
        // The watcher may replay a cached value synchronously here; the
        // callbacks only push into the channel.
        let unsubscribe = self.watcher.watch_latest(
            WatchedKey::data(path),
            move |value: &Value| {
                let _ = update_tx.send(FollowerEvent::Update {
                    kind,
                    path: update_path.clone(),
                    value: value.clone(),
                });
            },
            move |message: &str| {
                let _ = error_tx.send(FollowerEvent::PathError {
                    kind,
                    path: error_path.clone(),
                    message: message.to_string(),
                });
            },
        );
        slot.insert((kind, unsubscribe));
        debug!(path = %path, kind = %kind, "following path");
    }

    pub fn watch_paths(&self, paths: &[(String, UpdateKind)]) {
        for (path, kind) in paths {
            self.watch_path(path, *kind);
        }
    }

    /// Stop following `path`. Returns false if it was not followed.
    pub fn remove_path(&self, path: &str) -> bool {
        let Some((_, (kind, unsubscribe))) = self.followed.remove(path) else {
            return false;
        };
        if let Err(e) = unsubscribe.unsubscribe() {
            warn!(path = %path, error = %e, "unsubscribe failed");
        }
        debug!(path = %path, kind = %kind, "stopped following path");
        true
    }

    pub fn is_following(&self, path: &str) -> bool {
        self.followed.contains_key(path)
    }

    /// Followed paths, sorted.
    pub fn paths(&self) -> Vec<(String, UpdateKind)> {
        let mut paths: Vec<(String, UpdateKind)> = self
            .followed
            .iter()
            .map(|e| (e.key().clone(), e.value().0))
            .collect();
        paths.sort_by(|a, b| a.0.cmp(&b.0));
        paths
    }
}
