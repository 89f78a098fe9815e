//! KV adapter: uniform put / delete-subtree / watch-subtree over pluggable
//! backends.
//!
//! This layer knows nothing about domain types. Backends are selected by the
//! connection URL's scheme through an explicit [`BackendRegistry`] passed in
//! by the caller, not through process-global registration. No retry or
//! backoff lives here; failures surface to the caller.

pub mod consul;
pub mod etcd;
pub mod memory;

use crate::common::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

/// A single key/value entry as stored by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: Vec<u8>,
}

/// Receiver half of a subtree watch.
///
/// Each item is the full current subtree under the watched prefix: the first
/// batch reflects the state at establishment, then one batch follows each
/// change. The stream ends when the backend connection is lost and is not
/// restartable; call [`KvStore::watch_tree`] again.
pub type WatchStream = mpsc::Receiver<Vec<KvPair>>;

/// Depth of the channel between a backend watch task and its consumer.
pub(crate) const WATCH_CHANNEL_CAPACITY: usize = 16;

#[async_trait]
pub trait KvStore: Send + Sync + std::fmt::Debug {
    /// Store `value` under `key`, overwriting any existing entry.
    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Delete `prefix` and every key under it.
    async fn delete_tree(&self, prefix: &str) -> Result<()>;

    /// Watch the subtree under `prefix`.
    async fn watch_tree(&self, prefix: &str) -> Result<WatchStream>;

    /// Cheap connectivity check, run once at construction.
    async fn probe(&self) -> Result<()>;
}

/// Builds a backend client from a parsed connection URL.
pub type BackendFactory = Arc<dyn Fn(&Url) -> Result<Arc<dyn KvStore>> + Send + Sync>;

/// Explicit registry of supported backends.
///
/// Passed into [`BackendRegistry::connect`] (and from there into the state
/// store) so the set of supported backends is a plain value the caller owns;
/// tests inject in-memory backends the same way.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    /// Registry with no backends; combine with [`BackendRegistry::register`].
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the stock backends: `consul` and `etcd`.
    pub fn defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(
            "consul",
            Arc::new(|url| {
                consul::ConsulStore::from_url(url).map(|s| Arc::new(s) as Arc<dyn KvStore>)
            }),
        );
        registry.register(
            "etcd",
            Arc::new(|url| {
                etcd::EtcdStore::from_url(url).map(|s| Arc::new(s) as Arc<dyn KvStore>)
            }),
        );
        registry
    }

    pub fn register(&mut self, scheme: &str, factory: BackendFactory) {
        self.factories.insert(scheme.to_string(), factory);
    }

    /// Build and probe the backend selected by the URL scheme.
    ///
    /// Unknown schemes fail with [`Error::UnsupportedStore`]; an unreachable
    /// backend fails with [`Error::Connection`]. Both are fatal to startup.
    pub async fn connect(&self, address: &str) -> Result<Arc<dyn KvStore>> {
        let url = Url::parse(address)
            .map_err(|e| Error::InvalidConfig(format!("bad store address {}: {}", address, e)))?;

        let factory = self
            .factories
            .get(url.scheme())
            .ok_or_else(|| Error::UnsupportedStore(url.scheme().to_string()))?;

        let store = factory(&url)?;
        store
            .probe()
            .await
            .map_err(|e| Error::Connection(format!("{}: {}", address, e)))?;

        Ok(store)
    }
}
