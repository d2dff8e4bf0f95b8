//! HTTP transport for vstorage queries.
//!
//! The RPC endpoint is either pinned in config or taken from the network
//! config document the chain publishes (`{ chainName, rpcAddrs }`).

use super::batch::{build_batch_body, decode_batch_response, QueryError, StorageQuery};
use super::capdata::CapDataDecoder;
use super::types::{QueryResult, WatchedKey};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Remote log returned by the node for a path that does not exist.
pub const PATH_NOT_FOUND_LOG: &str = "could not get vstorage path";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    pub chain_name: String,
    #[serde(default)]
    pub rpc_addrs: Vec<String>,
}

impl NetworkConfig {
    pub fn rpc_url(&self) -> Option<&str> {
        self.rpc_addrs.first().map(String::as_str)
    }
}

pub async fn fetch_network_config(
    http: &reqwest::Client,
    url: &str,
) -> Result<NetworkConfig, QueryError> {
    let resp = http.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(QueryError::Status {
            status: status.as_u16(),
            body,
        });
    }
    let config: NetworkConfig = resp.json().await?;
    info!(
        chain = %config.chain_name,
        rpc_addrs = config.rpc_addrs.len(),
        "fetched network config"
    );
    Ok(config)
}

pub struct VstorageClient {
    http: reqwest::Client,
    rpc_url: String,
    decoder: Arc<dyn CapDataDecoder>,
}

impl VstorageClient {
    pub fn new(
        rpc_url: impl Into<String>,
        timeout: Duration,
        decoder: Arc<dyn CapDataDecoder>,
    ) -> Result<Self, QueryError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            rpc_url: rpc_url.into(),
            decoder,
        })
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// One POST for all `keys`.
    pub async fn batch_query(
        &self,
        keys: &[WatchedKey],
    ) -> Result<HashMap<String, QueryResult>, QueryError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let resp = self
            .http
            .post(&self.rpc_url)
            .json(&build_batch_body(keys))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(QueryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = resp.json().await?;
        let results = decode_batch_response(keys, body, self.decoder.as_ref())?;
        debug!(keys = keys.len(), results = results.len(), "batch query");
        Ok(results)
    }

    /// Read the latest value at a data path.
    pub async fn query_data(&self, path: &str) -> Result<Value, QueryError> {
        query_data(self, path).await
    }
}

/// Read the latest value at a data path through any [`StorageQuery`].
///
/// A path the node does not know yields [`QueryError::NotFound`].
pub async fn query_data(querier: &dyn StorageQuery, path: &str) -> Result<Value, QueryError> {
    let key = WatchedKey::data(path);
    let mut results = querier.query(std::slice::from_ref(&key)).await?;
    match results.remove(&key.canonical()) {
        Some(QueryResult::Value { value, .. }) => Ok(value),
        Some(QueryResult::Error(log)) => Err(classify_remote_error(path, log)),
        None => Err(QueryError::Decode(format!("no response for {path}"))),
    }
}

fn classify_remote_error(path: &str, log: String) -> QueryError {
    if log.contains(PATH_NOT_FOUND_LOG) {
        QueryError::NotFound(path.to_string())
    } else {
        QueryError::Remote(log)
    }
}

#[async_trait]
impl StorageQuery for VstorageClient {
    async fn query(
        &self,
        keys: &[WatchedKey],
    ) -> Result<HashMap<String, QueryResult>, QueryError> {
        self.batch_query(keys).await
    }
}
