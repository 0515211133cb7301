// # ddnssd-core
//
// Core library for the DDNS-SD service-discovery daemon.
//
// ## Architecture Overview
//
// This library provides the reconciliation and event-processing engine that
// keeps DNS-SD records in step with the containers running on a host:
// - **DnsRecord**: value type for a single resource record, with canonical
//   wire-text identity
// - **Container**: per-container state flags and the derived record set
// - **Backend**: trait every DNS backend implements (publish / suppress /
//   enumerate, with SRV/TXT-set coupling)
// - **System**: the single-consumer event loop owning the container map
// - **Reconciler**: set-difference pass aligning a backend with the desired
//   record set
// - **BackendRegistry**: plugin-based registry for backend construction
//
// ## Design Principles
//
// 1. **Single writer**: one event-loop task owns all mutable state; everything
//    else only produces into the queue
// 2. **Owned vs shared**: A/AAAA/SRV records under the host suffix are ours to
//    delete; PTR/TXT/CNAME are co-authored and only ever added to
// 3. **Self-healing**: per-record failures are logged, not propagated; the
//    periodic reconciliation repairs drift

pub mod backend;
pub mod config;
pub mod container;
pub mod error;
pub mod metrics;
pub mod reconciler;
pub mod record;
pub mod registry;
pub mod runtime;
pub mod system;

// Re-export core types for convenience
pub use backend::{Backend, BackendFactory, Backoff};
pub use config::{BackendConfig, Config, HostContext};
pub use container::{Container, ContainerMap};
pub use error::{Error, Result};
pub use record::{DnsRecord, RecordData, RecordType};
pub use registry::BackendRegistry;
pub use runtime::{ContainerMetadata, ContainerRuntime, ServiceSpec};
pub use system::{Event, System};
