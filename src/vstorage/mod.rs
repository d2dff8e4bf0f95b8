//! Chain storage (vstorage) access for the vault factory.
//!
//! Polls published vstorage keys over Tendermint RPC `abci_query` and
//! pushes changed values to subscribers.
//!
//! Architecture:
//! - `VstorageClient`: reqwest transport, one batched POST per poll
//! - `batch`: JSON-RPC batch encoding and per-key response classification
//! - `capdata`: decoding of published CapData with a raw-body fallback
//! - `ChainStorageWatcher`: background task that owns the subscription
//!   registry and change cache, and decides when to poll
//! - `BrandCache`: brand ↔ issuer name ↔ decimal places
//! - `paths`: path builders and vault/quote payload decoding
//!
//! Subscribers are plain callbacks; the follower forwards them into a
//! `tokio::sync::mpsc` channel and does its work there.

pub mod batch;
pub mod cache;
pub mod capdata;
pub mod client;
pub mod paths;
pub mod types;
pub mod watcher;

pub use batch::{QueryError, StorageQuery};
pub use cache::BrandCache;
pub use capdata::{BoardDecoder, CapDataDecoder};
pub use client::{fetch_network_config, query_data, NetworkConfig, VstorageClient};
pub use types::{PathKind, QueryResult, WatchedKey};
pub use watcher::{ChainStorageWatcher, Unsubscribe, WatcherConfig, WatcherError};
