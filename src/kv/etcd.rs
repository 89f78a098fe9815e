//! etcd backend over the v3 JSON gateway.
//!
//! etcd watches deliver deltas, so the watch task re-lists the prefix after
//! each event batch to honor the adapter contract of one full subtree per
//! batch.

use crate::common::{Error, Result};
use crate::kv::{KvPair, KvStore, WatchStream, WATCH_CHANNEL_CAPACITY};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::BytesMut;
use futures_util::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

#[derive(Debug, Deserialize)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<EtcdKv>,
}

#[derive(Debug, Deserialize)]
struct EtcdKv {
    /// Base64-encoded key
    key: String,
    /// Base64-encoded payload; absent for empty values
    value: Option<String>,
}

#[derive(Clone, Debug)]
pub struct EtcdStore {
    client: reqwest::Client,
    /// Separate client without an overall timeout: watch responses stream
    /// indefinitely.
    watch_client: reqwest::Client,
    base: String,
}

impl EtcdStore {
    pub fn from_url(url: &Url) -> Result<Self> {
        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidConfig(format!("missing host in {}", url)))?;
        let port = url.port().unwrap_or(2379);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let watch_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            watch_client,
            base: format!("http://{}:{}", host, port),
        })
    }

    fn range_body(prefix: &str) -> serde_json::Value {
        serde_json::json!({
            "key": BASE64.encode(prefix.as_bytes()),
            "range_end": BASE64.encode(prefix_range_end(prefix.as_bytes())),
        })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>> {
        let resp = self
            .client
            .post(format!("{}/v3/kv/range", self.base))
            .json(&Self::range_body(prefix))
            .send()
            .await?
            .error_for_status()?;

        let parsed: RangeResponse = resp.json().await?;
        let mut pairs = Vec::with_capacity(parsed.kvs.len());
        for kv in parsed.kvs {
            let key = BASE64
                .decode(kv.key.as_bytes())
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .ok_or_else(|| Error::Decode(format!("etcd key {}", kv.key)))?;
            let value = match kv.value {
                Some(encoded) => BASE64
                    .decode(encoded.as_bytes())
                    .map_err(|e| Error::Decode(format!("etcd value for {}: {}", key, e)))?,
                None => Vec::new(),
            };
            pairs.push(KvPair { key, value });
        }

        Ok(pairs)
    }
}

#[async_trait]
impl KvStore for EtcdStore {
    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let body = serde_json::json!({
            "key": BASE64.encode(key.as_bytes()),
            "value": BASE64.encode(value),
        });
        self.client
            .post(format!("{}/v3/kv/put", self.base))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn delete_tree(&self, prefix: &str) -> Result<()> {
        self.client
            .post(format!("{}/v3/kv/deleterange", self.base))
            .json(&Self::range_body(prefix))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn watch_tree(&self, prefix: &str) -> Result<WatchStream> {
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);

        let initial = self.list(prefix).await?;
        let _ = tx.send(initial).await;

        let body = serde_json::json!({ "create_request": Self::range_body(prefix) });
        let resp = self
            .watch_client
            .post(format!("{}/v3/watch", self.base))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let this = self.clone();
        let prefix = prefix.to_string();
        tokio::spawn(async move {
            let mut stream = resp.bytes_stream();
            let mut buf = BytesMut::new();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        tracing::warn!("etcd watch stream on {} failed: {}", prefix, e);
                        return;
                    }
                };
                buf.extend_from_slice(&chunk);

                // The gateway emits one JSON object per line.
                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let line = buf.split_to(pos + 1);
                    let line = &line[..line.len() - 1];
                    if line.iter().all(|b| b.is_ascii_whitespace()) {
                        continue;
                    }

                    let msg: serde_json::Value = match serde_json::from_slice(line) {
                        Ok(msg) => msg,
                        Err(e) => {
                            tracing::warn!("unparseable etcd watch message: {}", e);
                            continue;
                        }
                    };

                    // Skip the creation ack and progress notifies.
                    let has_events = msg
                        .pointer("/result/events")
                        .and_then(|e| e.as_array())
                        .map(|a| !a.is_empty())
                        .unwrap_or(false);
                    if !has_events {
                        continue;
                    }

                    match this.list(&prefix).await {
                        Ok(pairs) => {
                            if tx.send(pairs).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            tracing::warn!("etcd re-list of {} failed: {}", prefix, e);
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn probe(&self) -> Result<()> {
        let url = format!("{}/version", self.base);
        self.client.get(&url).send().await?.error_for_status()?;
        Ok(())
    }
}

/// Smallest key strictly greater than every key under `prefix`, in etcd's
/// range_end convention.
fn prefix_range_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xff {
            *last += 1;
            return end;
        }
        end.pop();
    }
    // All-0xff prefix: range to the end of the keyspace.
    vec![0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_range_end() {
        assert_eq!(prefix_range_end(b"ballast/services"), b"ballast/servicet");
        assert_eq!(prefix_range_end(b"a"), b"b");
        assert_eq!(prefix_range_end(&[b'a', 0xff]), vec![b'b']);
        assert_eq!(prefix_range_end(&[0xff, 0xff]), vec![0]);
    }

    #[test]
    fn test_from_url_defaults_port() {
        let store = EtcdStore::from_url(&Url::parse("etcd://etcd.local").unwrap()).unwrap();
        assert_eq!(store.base, "http://etcd.local:2379");
    }

    #[test]
    fn test_range_response_parsing() {
        let raw = r#"{"kvs":[{"key":"YmFsbGFzdC9h","value":"eyJ4IjoxfQ=="}],"count":"1"}"#;
        let parsed: RangeResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.kvs.len(), 1);
        assert_eq!(parsed.kvs[0].key, "YmFsbGFzdC9h");

        let empty: RangeResponse = serde_json::from_str(r#"{"count":"0"}"#).unwrap();
        assert!(empty.kvs.is_empty());
    }
}
