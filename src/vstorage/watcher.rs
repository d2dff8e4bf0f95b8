//! Chain storage watcher.
//!
//! Keeps a registry of watched keys and polls all of them in one batched
//! query from a single background task.
//!
//! Scheduling:
//! - no keys watched: the task parks until a key is added
//! - a key gained its first subscriber since the last poll: poll after
//!   `new_path_query_delay` (a burst of new keys shares one poll)
//! - otherwise: poll after a uniformly random delay in
//!   `[refresh_lower_bound, refresh_upper_bound]`
//!
//! Each key has a cached `(change token, value)`. A polled value whose token
//! matches the cache is dropped; anything else updates the cache and reaches
//! every subscriber. Callbacks run outside the registry lock.

use super::batch::{QueryError, StorageQuery};
use super::types::{ChangeToken, QueryResult, WatchedKey};
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

pub type PollErrorFn = Box<dyn Fn(&QueryError) + Send + Sync>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum WatcherError {
    #[error("{0} has no such subscriber")]
    NotWatched(String),
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub new_path_query_delay: Duration,
    pub refresh_lower_bound: Duration,
    pub refresh_upper_bound: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            new_path_query_delay: Duration::from_millis(20),
            refresh_lower_bound: Duration::from_millis(2000),
            refresh_upper_bound: Duration::from_millis(4000),
        }
    }
}

impl WatcherConfig {
    fn steady_delay(&self) -> Duration {
        let lo = self.refresh_lower_bound.as_millis() as u64;
        let hi = self.refresh_upper_bound.as_millis() as u64;
        if hi <= lo {
            return self.refresh_lower_bound;
        }
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }
}

struct Subscriber {
    id: u64,
    on_update: Box<dyn Fn(&Value) + Send + Sync>,
    on_error: Box<dyn Fn(&str) + Send + Sync>,
}

struct KeyEntry {
    key: WatchedKey,
    subscribers: Vec<Arc<Subscriber>>,
}

struct CacheEntry {
    token: ChangeToken,
    value: Value,
}

#[derive(Default)]
struct WatcherState {
    /// canonical key → subscribers. Never holds an empty entry.
    keys: HashMap<String, KeyEntry>,
    /// canonical key → last delivered value. Only for keys in `keys`.
    cache: HashMap<String, CacheEntry>,
    new_key_watched: bool,
    next_subscriber_id: u64,
}

struct Shared {
    state: Mutex<WatcherState>,
    wake: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, WatcherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fold one polled result into the cache and collect who to tell.
    fn apply(&self, canonical: &str, result: QueryResult) -> Option<Delivery> {
        let mut state = self.lock();
        let subscribers = state.keys.get(canonical)?.subscribers.clone();
        let token = result.change_token();
        match (result, token) {
            (QueryResult::Error(message), _) => Some(Delivery::Error(subscribers, message)),
            (QueryResult::Value { value, .. }, Some(token)) => {
                if state
                    .cache
                    .get(canonical)
                    .is_some_and(|cached| cached.token == token)
                {
                    return None;
                }
                state.cache.insert(
                    canonical.to_string(),
                    CacheEntry {
                        token,
                        value: value.clone(),
                    },
                );
                Some(Delivery::Update(subscribers, value))
            }
            (QueryResult::Value { .. }, None) => None,
        }
    }
}

enum Delivery {
    Update(Vec<Arc<Subscriber>>, Value),
    Error(Vec<Arc<Subscriber>>, String),
}

impl Delivery {
    fn run(self) {
        match self {
            Delivery::Update(subscribers, value) => {
                for sub in subscribers {
                    (sub.on_update)(&value);
                }
            }
            Delivery::Error(subscribers, message) => {
                for sub in subscribers {
                    (sub.on_error)(&message);
                }
            }
        }
    }
}

/// Handle to a running watcher. Clones share the registry and the task.
#[derive(Clone)]
pub struct ChainStorageWatcher {
    shared: Arc<Shared>,
    task: AbortHandle,
}

impl ChainStorageWatcher {
    /// Spawn the scheduler task. Must be called inside a tokio runtime.
    pub fn start(
        querier: Arc<dyn StorageQuery>,
        config: WatcherConfig,
        on_poll_error: Option<PollErrorFn>,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(WatcherState::default()),
            wake: Notify::new(),
        });
        let task = tokio::spawn(run_scheduler(
            shared.clone(),
            querier,
            config,
            on_poll_error,
        ))
        .abort_handle();
        Self { shared, task }
    }

    /// Subscribe to the latest value at `key`.
    ///
    /// A cached value is delivered to `on_update` before this returns.
    pub fn watch_latest<U, E>(&self, key: WatchedKey, on_update: U, on_error: E) -> Unsubscribe
    where
        U: Fn(&Value) + Send + Sync + 'static,
        E: Fn(&str) + Send + Sync + 'static,
    {
        let canonical = key.canonical();
        let (subscriber, replay, wake) = {
            let mut state = self.shared.lock();
            state.next_subscriber_id += 1;
            let subscriber = Arc::new(Subscriber {
                id: state.next_subscriber_id,
                on_update: Box::new(on_update),
                on_error: Box::new(on_error),
            });

            let replay = state.cache.get(&canonical).map(|c| c.value.clone());
            let mut wake = false;
            match state.keys.get_mut(&canonical) {
                Some(entry) => entry.subscribers.push(subscriber.clone()),
                None => {
                    info!(key = %canonical, "watching new vstorage key");
                    state.keys.insert(
                        canonical.clone(),
                        KeyEntry {
                            key,
                            subscribers: vec![subscriber.clone()],
                        },
                    );
                    wake = !state.new_key_watched;
                    state.new_key_watched = true;
                }
            }
            (subscriber, replay, wake)
        };

        if wake {
            self.shared.wake.notify_one();
        }
        if let Some(value) = replay {
            (subscriber.on_update)(&value);
        }

        Unsubscribe {
            shared: self.shared.clone(),
            canonical,
            id: subscriber.id,
        }
    }

    /// Canonical keys currently watched, sorted.
    pub fn watched_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.shared.lock().keys.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn cached_value(&self, key: &WatchedKey) -> Option<Value> {
        self.shared
            .lock()
            .cache
            .get(&key.canonical())
            .map(|c| c.value.clone())
    }

    /// Stop polling. Subscriptions stay registered but receive nothing.
    pub fn shutdown(&self) {
        self.task.abort();
        info!("vstorage watcher stopped");
    }
}

/// Removes exactly one subscriber.
pub struct Unsubscribe {
    shared: Arc<Shared>,
    canonical: String,
    id: u64,
}

impl Unsubscribe {
    pub fn key(&self) -> &str {
        &self.canonical
    }

    /// Dropping the last subscriber of a key stops polling it and purges
    /// its cached value.
    pub fn unsubscribe(&self) -> Result<(), WatcherError> {
        let mut state = self.shared.lock();
        let not_watched = || WatcherError::NotWatched(self.canonical.clone());
        let entry = state.keys.get_mut(&self.canonical).ok_or_else(not_watched)?;

        let before = entry.subscribers.len();
        entry.subscribers.retain(|sub| sub.id != self.id);
        if entry.subscribers.len() == before {
            return Err(not_watched());
        }

        if entry.subscribers.is_empty() {
            state.keys.remove(&self.canonical);
            state.cache.remove(&self.canonical);
            info!(key = %self.canonical, "stopped watching vstorage key");
        }
        Ok(())
    }
}

async fn run_scheduler(
    shared: Arc<Shared>,
    querier: Arc<dyn StorageQuery>,
    config: WatcherConfig,
    on_poll_error: Option<PollErrorFn>,
) {
    loop {
        let (has_keys, fast) = {
            let mut state = shared.lock();
            if state.keys.is_empty() {
                // A key added and dropped before we ran leaves the flag set.
                state.new_key_watched = false;
            }
            (!state.keys.is_empty(), state.new_key_watched)
        };
        if !has_keys {
            shared.wake.notified().await;
            continue;
        }

        let delay = if fast {
            config.new_path_query_delay
        } else {
            config.steady_delay()
        };
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            // A new key arrived while waiting out a steady-state delay.
            _ = shared.wake.notified() => continue,
        }

        poll_once(&shared, querier.as_ref(), on_poll_error.as_ref()).await;
    }
}

async fn poll_once(
    shared: &Shared,
    querier: &dyn StorageQuery,
    on_poll_error: Option<&PollErrorFn>,
) {
    let keys: Vec<WatchedKey> = {
        let mut state = shared.lock();
        state.new_key_watched = false;
        state.keys.values().map(|e| e.key.clone()).collect()
    };
    if keys.is_empty() {
        return;
    }

    let results = match querier.query(&keys).await {
        Ok(results) => results,
        Err(e) => {
            match on_poll_error {
                Some(callback) => callback(&e),
                None => warn!(error = %e, keys = keys.len(), "vstorage poll failed"),
            }
            return;
        }
    };
    debug!(keys = keys.len(), results = results.len(), "vstorage poll");

    for (canonical, result) in results {
        if let Some(delivery) = shared.apply(&canonical, result) {
            delivery.run();
        }
    }
}
