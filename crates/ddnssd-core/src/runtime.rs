//! Container-runtime interface
//!
//! The daemon consumes two things from the runtime: lifecycle events
//! (delivered by a watcher task producing into the event queue) and container
//! metadata (queried here). Only the query side is a trait; the watcher is
//! wired up by the daemon binary against the concrete client.

use std::net::{Ipv4Addr, Ipv6Addr};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One advertised DNS-SD service of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Service name including protocol label, e.g. `_http._tcp`
    pub service: String,
    /// Port the service listens on
    pub port: u16,
    /// SRV priority
    #[serde(default)]
    pub priority: u16,
    /// SRV weight
    #[serde(default)]
    pub weight: u16,
    /// `key=value` TXT attributes, declaration order preserved
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Snapshot of the runtime-provided metadata needed to derive records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMetadata {
    /// Runtime-assigned container id
    pub id: String,
    /// Container name; used as the DNS-SD instance label
    pub name: String,
    /// IPv4 address on the primary network, if any
    pub ipv4: Option<Ipv4Addr>,
    /// IPv6 address on the primary network, if any
    pub ipv6: Option<Ipv6Addr>,
    /// Services the container advertises
    pub services: Vec<ServiceSpec>,
}

/// Query interface to the container runtime.
///
/// Implementations must be thread-safe; the event loop and the reconciler
/// share one client. Lifecycle events arrive through the event queue, not
/// through this trait.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Fetch metadata for a single container.
    ///
    /// Returns `Ok(None)` when the runtime no longer knows the id; callers
    /// treat that as "vanished", not as an error.
    async fn get(&self, id: &str) -> Result<Option<ContainerMetadata>>;

    /// Enumerate the ids of all live containers.
    ///
    /// The list endpoint returns a different schema than the get endpoint, so
    /// reconciliation follows up with [`ContainerRuntime::get`] per id.
    async fn list(&self) -> Result<Vec<String>>;
}
