//! Container model
//!
//! A [`Container`] is the event loop's view of one tracked container: the
//! metadata snapshot it was created from, the `stopped`/`crashed` lifecycle
//! flags, and the derived DNS record set. Records are derived once and stay
//! stable for the container's lifetime, so the same set that was published is
//! the set that gets suppressed.

use std::collections::HashMap;
use std::sync::OnceLock;

use tracing::warn;

use crate::backend::Backend;
use crate::config::HostContext;
use crate::error::Result;
use crate::record::{DnsRecord, enumeration_name};
use crate::runtime::ContainerMetadata;

/// TTL applied to all derived records
const RECORD_TTL: u32 = 60;

/// Mapping container-id → container; owned exclusively by the event loop.
pub type ContainerMap = HashMap<String, Container>;

/// One tracked container and its derived record set.
#[derive(Debug)]
pub struct Container {
    metadata: ContainerMetadata,
    host: HostContext,
    /// Stop intent observed before the death event
    pub stopped: bool,
    /// Died uncleanly; records stay published until a restart or removal
    pub crashed: bool,
    records: OnceLock<Vec<DnsRecord>>,
}

impl Container {
    pub fn new(metadata: ContainerMetadata, host: &HostContext) -> Self {
        Self {
            metadata,
            host: host.clone(),
            stopped: false,
            crashed: false,
            records: OnceLock::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// The derived record set, computed on first use.
    ///
    /// Per RFC 6763, with the container name as the instance label:
    /// address records at `<name>.<hostname>`, SRV and TXT at the instance
    /// name `<name>.<svc>.<base>`, a service PTR pointing at the instance,
    /// and a zone-enumeration PTR pointing at the service.
    pub fn dns_records(&self) -> &[DnsRecord] {
        self.records.get_or_init(|| derive_records(&self.metadata, &self.host))
    }

    /// Publish every derived record to `backend`.
    ///
    /// Idempotent; a non-fatal per-record failure is logged and the rest of
    /// the set is still attempted.
    pub async fn publish_records(&self, backend: &dyn Backend) -> Result<()> {
        for rr in self.dns_records() {
            let result = backend.publish_record(rr).await;
            crate::metrics::record_backend_op(backend.name(), "publish", result.is_ok());
            if let Err(e) = result {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!(
                    backend = backend.name(),
                    container = self.name(),
                    record = %rr,
                    error = %e,
                    "failed to publish record"
                );
            }
        }
        Ok(())
    }

    /// Suppress every derived record on `backend`.
    ///
    /// Each service's SRV is suppressed before its TXT and PTR entries, so
    /// the backend-side SRV cleanup cascade runs first and the direct
    /// suppressions that follow are idempotent no-ops.
    pub async fn suppress_records(&self, backend: &dyn Backend) -> Result<()> {
        for rr in self.dns_records() {
            let result = backend.suppress_record(rr).await;
            crate::metrics::record_backend_op(backend.name(), "suppress", result.is_ok());
            if let Err(e) = result {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!(
                    backend = backend.name(),
                    container = self.name(),
                    record = %rr,
                    error = %e,
                    "failed to suppress record"
                );
            }
        }
        Ok(())
    }
}

fn derive_records(metadata: &ContainerMetadata, host: &HostContext) -> Vec<DnsRecord> {
    let mut records = Vec::new();
    let address_name = format!("{}.{}", metadata.name, host.hostname);

    if let Some(ipv4) = metadata.ipv4 {
        records.push(DnsRecord::a(&address_name, RECORD_TTL, ipv4));
    }
    if let Some(ipv6) = metadata.ipv6 {
        records.push(DnsRecord::aaaa(&address_name, RECORD_TTL, ipv6));
    }

    for spec in &metadata.services {
        let service_name = format!("{}.{}", spec.service, host.base_domain);
        let instance_name = format!("{}.{}", metadata.name, service_name);

        records.push(DnsRecord::srv(
            &instance_name,
            RECORD_TTL,
            spec.priority,
            spec.weight,
            spec.port,
            &address_name,
        ));
        records.push(DnsRecord::txt(&instance_name, RECORD_TTL, spec.tags.clone()));
        records.push(DnsRecord::ptr(&service_name, RECORD_TTL, &instance_name));
        records.push(DnsRecord::ptr(
            enumeration_name(&host.base_domain),
            RECORD_TTL,
            &service_name,
        ));
    }

    records
}
