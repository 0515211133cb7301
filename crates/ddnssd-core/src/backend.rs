//! Backend contract
//!
//! A backend maps the publish/suppress vocabulary onto a concrete
//! authoritative DNS store. The hard part of the contract is what the
//! operations mean *atomically* for grouped records:
//!
//! - `publish_record` upserts the whole `(name, type)` rrset for A/AAAA/CNAME
//!   and TXT (one TXT per instance name), but *adds to* the rrset for SRV
//!   (siblings preserved, set TTL follows the new record) and PTR (value
//!   added only if absent).
//! - `suppress_record` removes exactly `(name, type, value)`. Removing the
//!   last SRV at a name also removes the instance TXT at that name and the
//!   matching target from the parent service PTR, so a service instance
//!   disappears from the tree as a unit.
//! - `suppress_shared_records` tears down the browse-tree PTR records the
//!   daemon would have created; it runs only on graceful total shutdown.
//!
//! Both mutations are idempotent: publishing a present record or suppressing
//! an absent one is a warning-level no-op.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::error::Result;
use crate::record::DnsRecord;

/// Trait implemented by every DNS backend.
///
/// Backends own their consistency handling: transient failures retry with
/// [`Backoff`] inside the call, conflicts re-read and recompute, invariant
/// violations (vanished zone) are logged and dropped. Only fatal errors
/// (credentials, schema) escape to the event loop.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Human-readable tag for logs and metrics
    fn name(&self) -> &str;

    /// Snapshot of every managed-type record currently in the zone.
    ///
    /// No ownership filtering; the reconciler partitions the result itself.
    async fn dns_records(&self) -> Result<Vec<DnsRecord>>;

    /// Ensure `rr` is present, per the type-specific contract above.
    async fn publish_record(&self, rr: &DnsRecord) -> Result<()>;

    /// Remove exactly `(name, type, value)`, with SRV-set coupling.
    async fn suppress_record(&self, rr: &DnsRecord) -> Result<()>;

    /// Remove the zone-enumeration PTR and the per-service PTR rrsets.
    async fn suppress_shared_records(&self) -> Result<()>;

    /// Advisory hook invoked when the event queue drains.
    async fn rest(&self) {}
}

impl std::fmt::Debug for dyn Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").field("name", &self.name()).finish()
    }
}

/// Helper trait for constructing backends from configuration
///
/// Construction is async because some backends have to establish their
/// client (credential discovery, connection pool) up front; a failure here
/// is fatal and stops the daemon before the loop starts.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    /// Create a backend instance from its configuration entry
    async fn create(
        &self,
        config: &crate::config::BackendConfig,
        host: &crate::config::HostContext,
    ) -> Result<Box<dyn Backend>>;
}

/// Default number of attempts for a retried backend operation
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

const INITIAL_INTERVAL_MILLIS: u64 = 200;
const MAX_INTERVAL_SECS: u64 = 15;
const MULTIPLIER: f64 = 2.0;
const RANDOMIZATION_FACTOR: f64 = 0.2;

/// Bounded exponential backoff with jitter, shared by the backends.
///
/// Yields at most `max_attempts - 1` pauses; `next()` returns `None` once the
/// budget is spent, at which point the caller gives up and lets the next
/// reconciliation retry.
#[derive(Debug)]
pub struct Backoff {
    current: Duration,
    attempts_left: u32,
}

impl Backoff {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            current: Duration::from_millis(INITIAL_INTERVAL_MILLIS),
            attempts_left: max_attempts.saturating_sub(1),
        }
    }

    /// Next pause to take before retrying, or `None` when the budget is spent.
    pub fn next(&mut self) -> Option<Duration> {
        if self.attempts_left == 0 {
            return None;
        }
        self.attempts_left -= 1;

        let jittered = jitter(self.current);
        let grown = self.current.as_secs_f64() * MULTIPLIER;
        self.current = Duration::from_secs_f64(grown).min(Duration::from_secs(MAX_INTERVAL_SECS));
        Some(jittered)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

fn jitter(interval: Duration) -> Duration {
    let secs = interval.as_secs_f64();
    let delta = secs * RANDOMIZATION_FACTOR;
    let jittered = rand::thread_rng().gen_range((secs - delta)..=(secs + delta));
    Duration::from_secs_f64(jittered.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_bounded() {
        let mut backoff = Backoff::new(4);
        let pauses: Vec<_> = std::iter::from_fn(|| backoff.next()).collect();
        assert_eq!(pauses.len(), 3);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let mut backoff = Backoff::new(20);
        let pauses: Vec<_> = std::iter::from_fn(|| backoff.next()).collect();
        // Monotonic growth modulo jitter: compare against generous envelopes.
        assert!(pauses.first().unwrap() < &Duration::from_millis(300));
        assert!(pauses.last().unwrap() <= &Duration::from_secs(MAX_INTERVAL_SECS + 4));
        assert!(pauses.last().unwrap() >= &Duration::from_secs(10));
    }

    #[test]
    fn zero_attempts_never_pauses() {
        assert!(Backoff::new(0).next().is_none());
        assert!(Backoff::new(1).next().is_none());
    }
}
