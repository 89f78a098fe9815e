//! State store: persists services, destinations, and check specs into the
//! cluster KV store and fans out decoded snapshots to in-process
//! subscribers.
//!
//! Three watch loops (one per entity kind) run as background tasks. Each
//! loop re-establishes its watch under exponential backoff when the stream
//! fails, decodes every entry of each batch independently, and broadcasts
//! one snapshot per batch to the registered subscriber channels. Slow or
//! vanished subscribers are disconnected after a configured send timeout
//! instead of stalling the loop. Connectivity transitions are surfaced as
//! typed [`HealthEvent`]s.

use crate::common::{utils, Config, Error, Result, WatchConfig};
use crate::kv::{BackendRegistry, KvPair, KvStore, WatchStream};
use crate::types::{CheckSpec, Destination, Service};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Entity kind a health event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Services,
    Destinations,
    Checks,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Services => write!(f, "services"),
            EntityKind::Destinations => write!(f, "destinations"),
            EntityKind::Checks => write!(f, "checks"),
        }
    }
}

/// Connectivity state of one watch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchState {
    Connected,
    Degraded { reason: String },
}

#[derive(Debug, Clone)]
pub struct HealthEvent {
    pub kind: EntityKind,
    pub state: WatchState,
}

type Registry<T> = Arc<Mutex<Vec<mpsc::Sender<Vec<T>>>>>;

pub struct StateStore {
    kv: Arc<dyn KvStore>,
    prefix: String,
    watch_config: WatchConfig,

    services: Registry<Service>,
    destinations: Registry<Destination>,
    checks: Registry<CheckSpec>,

    health: broadcast::Sender<HealthEvent>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl StateStore {
    pub fn new(kv: Arc<dyn KvStore>, prefix: impl Into<String>, watch_config: WatchConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (health, _) = broadcast::channel(64);

        Self {
            kv,
            prefix: prefix.into(),
            watch_config,
            services: Arc::new(Mutex::new(Vec::new())),
            destinations: Arc::new(Mutex::new(Vec::new())),
            checks: Arc::new(Mutex::new(Vec::new())),
            health,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Build a store from configuration: select the backend by URL scheme
    /// from `registry` and probe it. Fatal on unknown schemes and
    /// unreachable backends.
    pub async fn connect(registry: &BackendRegistry, config: &Config) -> Result<Self> {
        let kv = registry.connect(&config.store_address).await?;
        Ok(Self::new(
            kv,
            config.store_prefix.clone(),
            config.watch.clone(),
        ))
    }

    // === Key layout ===

    fn service_key(&self, id: &str) -> String {
        format!("{}/services/{}/config", self.prefix, id)
    }

    fn service_tree(&self, id: &str) -> String {
        format!("{}/services/{}", self.prefix, id)
    }

    fn destination_key(&self, service_id: &str, destination_id: &str) -> String {
        format!("{}/destinations/{}/{}", self.prefix, service_id, destination_id)
    }

    fn check_key(&self, service_id: &str, check_id: &str) -> String {
        format!("{}/checks/{}/{}", self.prefix, service_id, check_id)
    }

    // === Write path ===

    pub async fn add_service(&self, svc: &Service) -> Result<()> {
        let value = serde_json::to_vec(svc).map_err(|e| Error::Encoding {
            entity: format!("service {}", svc.id),
            source: e,
        })?;
        self.kv.put(&self.service_key(&svc.id), &value).await?;
        tracing::debug!("stored service {}", svc.id);
        Ok(())
    }

    /// Remove the service config plus everything keyed under the service:
    /// its destinations and its check specs.
    pub async fn delete_service(&self, svc: &Service) -> Result<()> {
        self.kv.delete_tree(&self.service_tree(&svc.id)).await?;
        self.kv
            .delete_tree(&format!("{}/destinations/{}", self.prefix, svc.id))
            .await?;
        self.kv
            .delete_tree(&format!("{}/checks/{}", self.prefix, svc.id))
            .await?;
        tracing::debug!("deleted service {}", svc.id);
        Ok(())
    }

    pub async fn add_destination(&self, svc: &Service, dst: &Destination) -> Result<()> {
        let value = serde_json::to_vec(dst).map_err(|e| Error::Encoding {
            entity: format!("destination {}", dst.id),
            source: e,
        })?;
        self.kv
            .put(&self.destination_key(&svc.id, &dst.id), &value)
            .await?;
        tracing::debug!("stored destination {} under service {}", dst.id, svc.id);
        Ok(())
    }

    pub async fn delete_destination(&self, svc: &Service, dst: &Destination) -> Result<()> {
        self.kv
            .delete_tree(&self.destination_key(&svc.id, &dst.id))
            .await?;
        tracing::debug!("deleted destination {} under service {}", dst.id, svc.id);
        Ok(())
    }

    /// Store a check spec under a locally generated random id. Identity is
    /// not content-derived: storing an identical spec twice yields two
    /// entries.
    pub async fn add_check(&self, spec: &CheckSpec) -> Result<()> {
        let id = utils::random_id();
        let value = serde_json::to_vec(spec).map_err(|e| Error::Encoding {
            entity: format!("check spec for service {}", spec.service_id),
            source: e,
        })?;
        self.kv
            .put(&self.check_key(&spec.service_id, &id), &value)
            .await?;
        tracing::debug!("stored check {} for service {}", id, spec.service_id);
        Ok(())
    }

    // === Subscribe path ===
    //
    // Registration is append-only; there is no unsubscribe. Each registry
    // shares one lock with its broadcast step, so a registration never
    // observes a half-delivered cycle. Subscribers that stall past the send
    // timeout or drop their receiver are pruned by the watch loop.

    pub async fn subscribe_services(&self, tx: mpsc::Sender<Vec<Service>>) {
        self.services.lock().await.push(tx);
    }

    pub async fn subscribe_destinations(&self, tx: mpsc::Sender<Vec<Destination>>) {
        self.destinations.lock().await.push(tx);
    }

    pub async fn subscribe_checks(&self, tx: mpsc::Sender<Vec<CheckSpec>>) {
        self.checks.lock().await.push(tx);
    }

    /// Connectivity transitions of the watch loops.
    pub fn health_events(&self) -> broadcast::Receiver<HealthEvent> {
        self.health.subscribe()
    }

    // === Watch path ===

    /// Start the three watch loops. Each runs until [`StateStore::shutdown`].
    pub fn spawn_watchers(&self) -> Vec<JoinHandle<()>> {
        vec![
            self.spawn_watch_loop(EntityKind::Services, self.services.clone()),
            self.spawn_watch_loop(EntityKind::Destinations, self.destinations.clone()),
            self.spawn_watch_loop(EntityKind::Checks, self.checks.clone()),
        ]
    }

    fn spawn_watch_loop<T>(&self, kind: EntityKind, registry: Registry<T>) -> JoinHandle<()>
    where
        T: DeserializeOwned + Clone + Send + 'static,
    {
        let watch_loop = WatchLoop {
            kv: self.kv.clone(),
            prefix: format!("{}/{}", self.prefix, kind),
            kind,
            registry,
            health: self.health.clone(),
            config: self.watch_config.clone(),
            shutdown: self.shutdown_rx.clone(),
        };
        tokio::spawn(watch_loop.run())
    }

    /// Signal every watch loop to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

struct WatchLoop<T> {
    kv: Arc<dyn KvStore>,
    prefix: String,
    kind: EntityKind,
    registry: Registry<T>,
    health: broadcast::Sender<HealthEvent>,
    config: WatchConfig,
    shutdown: watch::Receiver<bool>,
}

impl<T> WatchLoop<T>
where
    T: DeserializeOwned + Clone + Send + 'static,
{
    /// Supervised watch: establish, pump, and re-establish under backoff
    /// with jitter until shutdown. The backoff resets after each successful
    /// establishment.
    async fn run(mut self) {
        let mut attempt: u32 = 0;
        loop {
            if *self.shutdown.borrow() {
                return;
            }

            match self.kv.watch_tree(&self.prefix).await {
                Ok(stream) => {
                    attempt = 0;
                    self.emit(WatchState::Connected);
                    tracing::debug!("{} watch established on {}", self.kind, self.prefix);

                    self.pump(stream).await;
                    if *self.shutdown.borrow() {
                        return;
                    }
                    self.emit(WatchState::Degraded {
                        reason: "watch stream ended".to_string(),
                    });
                    tracing::warn!("{} watch stream ended, re-establishing", self.kind);
                }
                Err(e) => {
                    self.emit(WatchState::Degraded {
                        reason: e.to_string(),
                    });
                    tracing::warn!("{} watch establishment failed: {}", self.kind, e);
                }
            }

            let delay = utils::backoff_with_jitter(
                attempt,
                self.config.backoff_initial(),
                self.config.backoff_max(),
            );
            attempt = attempt.saturating_add(1);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => return,
            }
        }
    }

    /// Consume one watch stream until it ends or shutdown fires. Each batch
    /// produces exactly one broadcast.
    async fn pump(&mut self, mut stream: WatchStream) {
        loop {
            let batch = tokio::select! {
                batch = stream.recv() => match batch {
                    Some(batch) => batch,
                    None => return,
                },
                _ = self.shutdown.changed() => return,
            };

            let snapshot = self.decode_batch(&batch);
            self.broadcast(snapshot).await;
        }
    }

    /// Decode every entry of a batch independently. A malformed entry is
    /// logged and skipped; it never aborts the cycle.
    fn decode_batch(&self, batch: &[KvPair]) -> Vec<T> {
        let mut snapshot = Vec::with_capacity(batch.len());
        for pair in batch {
            match serde_json::from_slice::<T>(&pair.value) {
                Ok(entity) => snapshot.push(entity),
                Err(e) => {
                    tracing::warn!("skipping undecodable {} entry {}: {}", self.kind, pair.key, e);
                }
            }
        }
        snapshot
    }

    /// Deliver one snapshot to every registered subscriber in registration
    /// order. Each subscriber receives its own copy. A subscriber that
    /// stalls past the send timeout, or whose receiver is gone, is
    /// disconnected.
    async fn broadcast(&self, snapshot: Vec<T>) {
        let timeout = self.config.send_timeout();
        let mut subscribers = self.registry.lock().await;

        let mut index = 0;
        while index < subscribers.len() {
            match subscribers[index]
                .send_timeout(snapshot.clone(), timeout)
                .await
            {
                Ok(()) => index += 1,
                Err(SendTimeoutError::Timeout(_)) => {
                    tracing::warn!(
                        "{} subscriber {} stalled past {:?}, disconnecting",
                        self.kind,
                        index,
                        timeout
                    );
                    subscribers.remove(index);
                }
                Err(SendTimeoutError::Closed(_)) => {
                    tracing::debug!("{} subscriber {} went away", self.kind, index);
                    subscribers.remove(index);
                }
            }
        }
    }

    fn emit(&self, state: WatchState) {
        let _ = self.health.send(HealthEvent {
            kind: self.kind,
            state,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::MemoryStore;

    fn store() -> StateStore {
        StateStore::new(
            Arc::new(MemoryStore::new()),
            "ballast",
            WatchConfig::default(),
        )
    }

    #[test]
    fn test_key_layout() {
        let store = store();
        assert_eq!(store.service_key("web"), "ballast/services/web/config");
        assert_eq!(store.service_tree("web"), "ballast/services/web");
        assert_eq!(
            store.destination_key("web", "web-1"),
            "ballast/destinations/web/web-1"
        );
        assert_eq!(
            store.check_key("web", "abc123"),
            "ballast/checks/web/abc123"
        );
    }

    #[test]
    fn test_entity_kind_display() {
        assert_eq!(EntityKind::Services.to_string(), "services");
        assert_eq!(EntityKind::Destinations.to_string(), "destinations");
        assert_eq!(EntityKind::Checks.to_string(), "checks");
    }
}
