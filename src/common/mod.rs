//! Common utilities and types shared across ballast

pub mod config;
pub mod error;
pub mod utils;

pub use config::{Config, IpamConfig, WatchConfig};
pub use error::{Error, Result};
pub use utils::{backoff_with_jitter, random_id};
