//! In-process backend for tests and embedded use.
//!
//! Honors the same contract as the network backends: each watch batch is the
//! full subtree under the watched prefix, starting with the state at
//! establishment.

use crate::common::Result;
use crate::kv::{KvPair, KvStore, WatchStream, WATCH_CHANNEL_CAPACITY};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug)]
struct Watcher {
    prefix: String,
    tx: mpsc::Sender<Vec<KvPair>>,
}

#[derive(Debug, Default)]
struct Shared {
    data: BTreeMap<String, Vec<u8>>,
    watchers: Vec<Watcher>,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every active watch stream, as a lost backend connection would.
    /// Lets tests exercise watch re-establishment.
    pub async fn disconnect_watchers(&self) {
        self.shared.lock().await.watchers.clear();
    }

    fn subtree(data: &BTreeMap<String, Vec<u8>>, prefix: &str) -> Vec<KvPair> {
        data.range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| KvPair {
                key: key.clone(),
                value: value.clone(),
            })
            .collect()
    }

    async fn fan_out(shared: &mut Shared) {
        let snapshots: Vec<Vec<KvPair>> = shared
            .watchers
            .iter()
            .map(|w| Self::subtree(&shared.data, &w.prefix))
            .collect();

        let mut alive = Vec::with_capacity(shared.watchers.len());
        for (watcher, batch) in shared.watchers.drain(..).zip(snapshots) {
            if watcher.tx.send(batch).await.is_ok() {
                alive.push(watcher);
            }
        }
        shared.watchers = alive;
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut shared = self.shared.lock().await;
        shared.data.insert(key.to_string(), value.to_vec());
        Self::fan_out(&mut shared).await;
        Ok(())
    }

    async fn delete_tree(&self, prefix: &str) -> Result<()> {
        let mut shared = self.shared.lock().await;
        shared.data.retain(|key, _| !key.starts_with(prefix));
        Self::fan_out(&mut shared).await;
        Ok(())
    }

    async fn watch_tree(&self, prefix: &str) -> Result<WatchStream> {
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let mut shared = self.shared.lock().await;

        let _ = tx.send(Self::subtree(&shared.data, prefix)).await;
        shared.watchers.push(Watcher {
            prefix: prefix.to_string(),
            tx,
        });

        Ok(rx)
    }

    async fn probe(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subtree_boundaries() {
        let store = MemoryStore::new();
        store.put("app/services/a/config", b"1").await.unwrap();
        store.put("app/services/b/config", b"2").await.unwrap();
        store.put("app/destinations/a/d1", b"3").await.unwrap();

        let mut rx = store.watch_tree("app/services").await.unwrap();
        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].key, "app/services/a/config");
        assert_eq!(batch[1].key, "app/services/b/config");
    }

    #[tokio::test]
    async fn test_watch_sees_changes() {
        let store = MemoryStore::new();
        let mut rx = store.watch_tree("app/").await.unwrap();
        assert!(rx.recv().await.unwrap().is_empty());

        store.put("app/x", b"1").await.unwrap();
        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].value, b"1");

        store.delete_tree("app/").await.unwrap();
        assert!(rx.recv().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_ends_stream() {
        let store = MemoryStore::new();
        let mut rx = store.watch_tree("app/").await.unwrap();
        assert!(rx.recv().await.unwrap().is_empty());

        store.disconnect_watchers().await;
        assert!(rx.recv().await.is_none());
    }
}
