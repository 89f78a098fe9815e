//! Utility functions for ballast

use rand::Rng;
use std::time::Duration;

/// Generate a random identifier for a stored check spec.
///
/// Identifiers are not content-derived: storing the same spec twice yields
/// two distinct entries.
pub fn random_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Exponential backoff delay with up to 25% added jitter.
pub fn backoff_with_jitter(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let base = initial.saturating_mul(2u32.saturating_pow(attempt));
    let capped = base.min(max);
    let jitter = rand::thread_rng().gen_range(0.0..=0.25);
    capped.mul_f64(1.0 + jitter)
}
