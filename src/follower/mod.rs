//! Vault follower: turns vstorage updates into threshold alerts.
//!
//! - `PathFollower` subscribes vstorage paths on the watcher and forwards
//!   every update into an unbounded mpsc channel as a `FollowerEvent`
//! - `Follower` is the single consumer of that channel, so notifier
//!   transitions never race each other
//! - `NotifierService` creates, lists and deletes notifiers

pub mod engine;
pub mod notifiers;
pub mod paths;

pub use engine::Follower;
pub use notifiers::{NotifierError, NotifierService, MAX_THRESHOLD};
pub use paths::PathFollower;

use serde_json::Value;
use tokio::sync::mpsc;

/// What a followed path publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    Vault,
    Quote,
    AssetCatalog,
}

impl std::fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateKind::Vault => write!(f, "vault"),
            UpdateKind::Quote => write!(f, "quote"),
            UpdateKind::AssetCatalog => write!(f, "asset_catalog"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FollowerEvent {
    Update {
        kind: UpdateKind,
        path: String,
        value: Value,
    },
    PathError {
        kind: UpdateKind,
        path: String,
        message: String,
    },
}

pub type EventSender = mpsc::UnboundedSender<FollowerEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<FollowerEvent>;
