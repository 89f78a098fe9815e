//! Consul KV backend over the HTTP API.
//!
//! Watches use blocking queries: a recursive read long-polled with the last
//! seen `X-Consul-Index`, so every wakeup yields the full subtree.

use crate::common::{Error, Result};
use crate::kv::{KvPair, KvStore, WatchStream, WATCH_CHANNEL_CAPACITY};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

/// Characters escaped inside key paths. `/` stays literal: Consul keys are
/// hierarchical.
const KEY_ENCODE_SET: &AsciiSet = &CONTROLS.add(b' ').add(b'%').add(b'?').add(b'#').add(b'&');

/// Long-poll duration for blocking queries. Must stay below the client
/// timeout.
const WAIT: &str = "30s";

#[derive(Debug, Deserialize)]
struct ConsulKvEntry {
    #[serde(rename = "Key")]
    key: String,

    /// Base64-encoded payload; absent for directory placeholders
    #[serde(rename = "Value")]
    value: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ConsulStore {
    client: reqwest::Client,
    base: String,
}

impl ConsulStore {
    pub fn from_url(url: &Url) -> Result<Self> {
        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidConfig(format!("missing host in {}", url)))?;
        let port = url.port().unwrap_or(8500);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            base: format!("http://{}:{}", host, port),
        })
    }

    fn kv_url(&self, key: &str) -> String {
        format!(
            "{}/v1/kv/{}",
            self.base,
            utf8_percent_encode(key, KEY_ENCODE_SET)
        )
    }

    /// Recursive read of `prefix`, blocking until the subtree changes past
    /// `index` (or the wait expires). Returns the subtree and the next index.
    async fn list_tree(&self, prefix: &str, index: u64) -> Result<(Vec<KvPair>, u64)> {
        let url = format!(
            "{}?recurse=true&index={}&wait={}",
            self.kv_url(prefix),
            index,
            WAIT
        );
        let resp = self.client.get(&url).send().await?;

        let next_index = resp
            .headers()
            .get("X-Consul-Index")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(index);

        // An empty subtree is a 404, not an error.
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok((Vec::new(), next_index));
        }

        let entries: Vec<ConsulKvEntry> = resp.error_for_status()?.json().await?;
        let mut pairs = Vec::with_capacity(entries.len());
        for entry in entries {
            let value = match entry.value {
                Some(encoded) => BASE64.decode(encoded.as_bytes()).map_err(|e| {
                    Error::Decode(format!("consul value for {}: {}", entry.key, e))
                })?,
                None => Vec::new(),
            };
            pairs.push(KvPair {
                key: entry.key,
                value,
            });
        }

        Ok((pairs, next_index))
    }
}

#[async_trait]
impl KvStore for ConsulStore {
    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.client
            .put(self.kv_url(key))
            .body(value.to_vec())
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn delete_tree(&self, prefix: &str) -> Result<()> {
        let url = format!("{}?recurse=true", self.kv_url(prefix));
        self.client
            .delete(&url)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn watch_tree(&self, prefix: &str) -> Result<WatchStream> {
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);

        // The initial read runs before the task detaches so establishment
        // failures surface to the caller.
        let (initial, mut index) = self.list_tree(prefix, 0).await?;
        let _ = tx.send(initial).await;

        let this = self.clone();
        let prefix = prefix.to_string();
        tokio::spawn(async move {
            loop {
                match this.list_tree(&prefix, index).await {
                    Ok((pairs, next_index)) => {
                        // The wait expired without a change.
                        if next_index == index {
                            continue;
                        }
                        // Consul documents that indexes can move backwards;
                        // restart from scratch when they do.
                        index = if next_index < index { 0 } else { next_index };
                        if tx.send(pairs).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("consul watch on {} failed: {}", prefix, e);
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn probe(&self) -> Result<()> {
        let url = format!("{}/v1/status/leader", self.base);
        self.client.get(&url).send().await?.error_for_status()?;
        Ok(())
    }
}
