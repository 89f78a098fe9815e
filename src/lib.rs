//! # ballast
//!
//! Distributed service-state synchronization for load balancer control
//! planes:
//! - persists services, destinations, and health-check specs into a
//!   replicated KV store (Consul or etcd)
//! - watches the store for changes made by any cluster member and fans out
//!   decoded snapshots to in-process subscribers, with supervised
//!   reconnects and typed health events
//! - allocates VIPs from configured address ranges against the current
//!   service set
//!
//! ## Architecture
//!
//! ```text
//!  writers ──► StateStore ──► KvStore ──► Consul / etcd
//!                  ▲                          │
//!                  │         change batches   │
//!    subscribers ◄─┴── watch loops ◄──────────┘
//!         │
//!         ▼
//!   cluster state ──(snapshot)──► Ipam (VIP allocation)
//! ```
//!
//! The data plane, the control API, and the store's own consensus are
//! external collaborators; this crate only consumes a generic put /
//! delete-subtree / watch-subtree capability.
//!
//! ## Usage
//!
//! ```no_run
//! use ballast::{BackendRegistry, Config, StateStore};
//! use tokio::sync::mpsc;
//!
//! # async fn run() -> ballast::Result<()> {
//! let config = Config::load(None)?;
//! let registry = BackendRegistry::defaults();
//! let store = StateStore::connect(&registry, &config).await?;
//!
//! let (tx, mut rx) = mpsc::channel(config.watch.subscriber_queue);
//! store.subscribe_services(tx).await;
//! let _handles = store.spawn_watchers();
//!
//! while let Some(services) = rx.recv().await {
//!     println!("cluster now has {} services", services.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod ipam;
pub mod kv;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use ipam::Ipam;
pub use kv::BackendRegistry;
pub use store::StateStore;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
