// # Route 53 Backend
//
// This crate implements the backend contract over the Route 53 change-batch
// API.
//
// ## Consistency model
//
// The API forbids conflicting changes within one batch, so every mutation is
// expressed as exactly one primitive per (name, type) rrset: the backend
// computes the full target record set (merging with its cached view for the
// SRV/PTR set types) and issues a single UPSERT, or a DELETE carrying the
// previously observed set when the target is empty. Carrying the observed
// set is what turns a concurrent edit into an `InvalidChangeBatch` rejection
// instead of a silent overwrite; the backend then refetches, recomputes and
// retries with backoff.
//
// Every accepted change invalidates the cache entry for the touched
// (name, type), so the next mutation starts from the authoritative view.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use aws_sdk_route53::Client;
use aws_sdk_route53::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_route53::types::{
    Change, ChangeAction, ChangeBatch, ResourceRecord, ResourceRecordSet, RrType,
};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use ddnssd_core::config::{BackendConfig, HostContext};
use ddnssd_core::record::{DnsRecord, RecordType, canonical_name, enumeration_name};
use ddnssd_core::registry::BackendRegistry;
use ddnssd_core::{Backend, BackendFactory, Backoff, Error, Result};

pub struct Route53Backend {
    client: Client,
    configured_zone_id: Option<String>,
    zone_id: OnceCell<String>,
    base_domain: String,
    /// Lazily fetched rrset view, keyed by (name, type)
    cache: Mutex<HashMap<(String, RecordType), Vec<DnsRecord>>>,
}

impl Route53Backend {
    pub fn new(client: Client, zone_id: Option<String>, base_domain: &str) -> Self {
        Self {
            client,
            configured_zone_id: zone_id,
            zone_id: OnceCell::new(),
            base_domain: canonical_name(base_domain),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The hosted zone id, resolved from the base domain on first use.
    async fn zone_id(&self) -> Result<&str> {
        self.zone_id
            .get_or_try_init(|| async {
                if let Some(id) = &self.configured_zone_id {
                    return Ok(id.clone());
                }
                let output = self
                    .client
                    .list_hosted_zones()
                    .send()
                    .await
                    .map_err(|e| classify(e, "list hosted zones"))?;
                output
                    .hosted_zones()
                    .iter()
                    .find(|hz| canonical_name(hz.name()) == self.base_domain)
                    .map(|hz| hz.id().to_string())
                    .ok_or_else(|| {
                        Error::invariant(format!(
                            "no hosted zone found for base domain {}",
                            self.base_domain
                        ))
                    })
            })
            .await
            .map(String::as_str)
    }

    fn cached(&self, name: &str, rtype: RecordType) -> Option<Vec<DnsRecord>> {
        self.cache
            .lock()
            .unwrap()
            .get(&(name.to_string(), rtype))
            .cloned()
    }

    fn invalidate(&self, name: &str, rtype: RecordType) {
        self.cache.lock().unwrap().remove(&(name.to_string(), rtype));
    }

    /// Current rrset at (name, type), from cache or a scoped list call.
    async fn rrset(&self, name: &str, rtype: RecordType) -> Result<Vec<DnsRecord>> {
        if let Some(records) = self.cached(name, rtype) {
            return Ok(records);
        }

        let zone_id = self.zone_id().await?;
        let output = self
            .client
            .list_resource_record_sets()
            .hosted_zone_id(zone_id)
            .start_record_name(name)
            .start_record_type(rr_type(rtype))
            .send()
            .await
            .map_err(|e| classify(e, "list resource record sets"))?;

        let mut records = Vec::new();
        for rrs in output.resource_record_sets() {
            if canonical_name(rrs.name()) != name || rrs.r#type() != &rr_type(rtype) {
                // Listing is lexicographic from the start marker; the first
                // mismatch means our rrset is exhausted.
                break;
            }
            records.extend(parse_rrset(rrs));
        }

        self.cache
            .lock()
            .unwrap()
            .insert((name.to_string(), rtype), records.clone());
        Ok(records)
    }

    /// Run `compute` against the live rrset and apply the resulting change,
    /// retrying through conflicts and transient failures.
    async fn mutate_rrset<F>(&self, name: &str, rtype: RecordType, op: &str, compute: F) -> Result<()>
    where
        F: Fn(&[DnsRecord]) -> Option<(Vec<DnsRecord>, u32)>,
    {
        let mut backoff = Backoff::default();
        loop {
            let result = match self.rrset(name, rtype).await {
                Ok(current) => {
                    let Some((target, ttl)) = compute(&current) else {
                        debug!(name, %rtype, op, "already in the desired state");
                        return Ok(());
                    };
                    self.apply_change(name, rtype, &current, &target, ttl).await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    self.invalidate(name, rtype);
                    return Ok(());
                }
                Err(e) if e.is_conflict() => {
                    // Another writer moved the rrset; drop the stale view and
                    // recompute from a fresh read.
                    warn!(name, %rtype, op, error = %e, "change batch conflicted, refetching");
                    self.invalidate(name, rtype);
                }
                Err(e) if e.is_transient() => {
                    warn!(name, %rtype, op, error = %e, "transient failure");
                }
                Err(e) => return Err(e),
            }

            match backoff.next() {
                Some(pause) => tokio::time::sleep(pause).await,
                None => {
                    return Err(Error::transient(format!(
                        "retry budget exhausted for {op} of {name} {rtype}"
                    )));
                }
            }
        }
    }

    async fn apply_change(
        &self,
        name: &str,
        rtype: RecordType,
        current: &[DnsRecord],
        target: &[DnsRecord],
        ttl: u32,
    ) -> Result<()> {
        let (action, records) = if target.is_empty() {
            // DELETE must carry the rrset as previously observed.
            (ChangeAction::Delete, current)
        } else {
            (ChangeAction::Upsert, target)
        };

        let values = records
            .iter()
            .map(|rr| {
                ResourceRecord::builder()
                    .value(rr.value())
                    .build()
                    .map_err(|e| Error::bug(format!("resource record build: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        let rrset = ResourceRecordSet::builder()
            .name(name)
            .r#type(rr_type(rtype))
            .ttl(ttl as i64)
            .set_resource_records(Some(values))
            .build()
            .map_err(|e| Error::bug(format!("rrset build: {e}")))?;
        let batch = ChangeBatch::builder()
            .changes(
                Change::builder()
                    .action(action.clone())
                    .resource_record_set(rrset)
                    .build()
                    .map_err(|e| Error::bug(format!("change build: {e}")))?,
            )
            .build()
            .map_err(|e| Error::bug(format!("change batch build: {e}")))?;

        let zone_id = self.zone_id().await?;
        debug!(name, %rtype, action = ?action, records = records.len(), "submitting change batch");
        self.client
            .change_resource_record_sets()
            .hosted_zone_id(zone_id)
            .change_batch(batch)
            .send()
            .await
            .map_err(|e| classify(e, "change resource record sets"))?;
        Ok(())
    }

    /// Remove one value from an rrset, without any type-specific cascade.
    async fn suppress_value(&self, rr: &DnsRecord) -> Result<()> {
        self.mutate_rrset(rr.name(), rr.rtype(), "suppress", |current| {
            suppress_target(current, rr)
        })
        .await
    }

    /// Delete a whole rrset if it exists.
    async fn delete_rrset(&self, name: &str, rtype: RecordType) -> Result<()> {
        self.mutate_rrset(name, rtype, "delete", |current| {
            if current.is_empty() {
                None
            } else {
                Some((Vec::new(), current[0].ttl()))
            }
        })
        .await
    }
}

#[async_trait]
impl Backend for Route53Backend {
    fn name(&self) -> &str {
        "route53"
    }

    async fn dns_records(&self) -> Result<Vec<DnsRecord>> {
        let zone_id = self.zone_id().await?.to_string();
        let mut records = Vec::new();
        let mut name_marker: Option<String> = None;
        let mut type_marker: Option<RrType> = None;

        loop {
            let mut request = self
                .client
                .list_resource_record_sets()
                .hosted_zone_id(&zone_id);
            if let Some(name) = &name_marker {
                request = request.start_record_name(name);
            }
            if let Some(rtype) = &type_marker {
                request = request.start_record_type(rtype.clone());
            }
            let output = request
                .send()
                .await
                .map_err(|e| classify(e, "list resource record sets"))?;

            for rrs in output.resource_record_sets() {
                if record_type(rrs.r#type()).is_some() {
                    records.extend(parse_rrset(rrs));
                }
            }

            if !output.is_truncated() {
                break;
            }
            name_marker = output.next_record_name().map(str::to_string);
            type_marker = output.next_record_type().cloned();
        }

        Ok(records)
    }

    async fn publish_record(&self, rr: &DnsRecord) -> Result<()> {
        self.mutate_rrset(rr.name(), rr.rtype(), "publish", |current| {
            publish_target(current, rr)
        })
        .await
    }

    async fn suppress_record(&self, rr: &DnsRecord) -> Result<()> {
        self.suppress_value(rr).await?;

        if rr.rtype() == RecordType::Srv {
            // Cache was invalidated by the mutation, so this read is live.
            let remaining = self.rrset(rr.name(), RecordType::Srv).await?;
            if remaining.is_empty() {
                self.delete_rrset(rr.name(), RecordType::Txt).await?;
                if let Some(parent) = rr.parent_name() {
                    let entry = DnsRecord::ptr(parent, rr.ttl(), rr.name());
                    self.suppress_value(&entry).await?;
                }
            }
        }
        Ok(())
    }

    async fn suppress_shared_records(&self) -> Result<()> {
        let enumeration = enumeration_name(&self.base_domain);
        self.invalidate(&enumeration, RecordType::Ptr);
        let services = self.rrset(&enumeration, RecordType::Ptr).await?;

        for service_ptr in &services {
            let service = canonical_name(&service_ptr.value());
            self.delete_rrset(&service, RecordType::Ptr).await?;
        }
        self.delete_rrset(&enumeration, RecordType::Ptr).await
    }
}

/// Target set for a publish, or `None` when the zone already matches.
fn publish_target(current: &[DnsRecord], rr: &DnsRecord) -> Option<(Vec<DnsRecord>, u32)> {
    match rr.rtype() {
        // Upsert types: the rrset becomes exactly the one given value.
        RecordType::A | RecordType::Aaaa | RecordType::Cname | RecordType::Txt => {
            if current.len() == 1 && &current[0] == rr && current[0].ttl() == rr.ttl() {
                None
            } else {
                Some((vec![rr.clone()], rr.ttl()))
            }
        }
        // Set types: merge with the siblings already present.
        RecordType::Srv | RecordType::Ptr => {
            if current.contains(rr) {
                None
            } else {
                let mut merged = current.to_vec();
                merged.push(rr.clone());
                Some((merged, rr.ttl()))
            }
        }
    }
}

/// Remaining set after a suppress, or `None` when the value is absent.
fn suppress_target(current: &[DnsRecord], rr: &DnsRecord) -> Option<(Vec<DnsRecord>, u32)> {
    if !current.contains(rr) {
        return None;
    }
    let remaining: Vec<DnsRecord> = current.iter().filter(|c| *c != rr).cloned().collect();
    Some((remaining, current[0].ttl()))
}

fn rr_type(rtype: RecordType) -> RrType {
    match rtype {
        RecordType::A => RrType::A,
        RecordType::Aaaa => RrType::Aaaa,
        RecordType::Srv => RrType::Srv,
        RecordType::Ptr => RrType::Ptr,
        RecordType::Txt => RrType::Txt,
        RecordType::Cname => RrType::Cname,
    }
}

fn record_type(rtype: &RrType) -> Option<RecordType> {
    match rtype {
        RrType::A => Some(RecordType::A),
        RrType::Aaaa => Some(RecordType::Aaaa),
        RrType::Srv => Some(RecordType::Srv),
        RrType::Ptr => Some(RecordType::Ptr),
        RrType::Txt => Some(RecordType::Txt),
        RrType::Cname => Some(RecordType::Cname),
        _ => None,
    }
}

/// Parse every value of an API rrset; unparsable values are skipped with a
/// warning rather than failing the whole listing.
fn parse_rrset(rrs: &ResourceRecordSet) -> Vec<DnsRecord> {
    let Some(rtype) = record_type(rrs.r#type()) else {
        return Vec::new();
    };
    let name = canonical_name(rrs.name());
    let ttl = rrs.ttl().unwrap_or(60) as u32;

    rrs.resource_records()
        .iter()
        .filter_map(|value| match DnsRecord::parse(&name, ttl, rtype, value.value()) {
            Ok(rr) => Some(rr),
            Err(e) => {
                warn!(name, %rtype, value = value.value(), error = %e, "skipping unparsable record");
                None
            }
        })
        .collect()
}

fn classify<E, R>(err: SdkError<E, R>, what: &str) -> Error
where
    E: ProvideErrorMetadata + std::fmt::Debug,
    R: std::fmt::Debug,
{
    let code = ProvideErrorMetadata::code(&err).map(str::to_string);
    match code.as_deref() {
        Some("InvalidChangeBatch") => Error::conflict(format!("{what}: {err:?}")),
        Some("NoSuchHostedZone") => Error::invariant(format!("{what}: hosted zone is gone")),
        Some(
            "AccessDenied"
            | "AccessDeniedException"
            | "InvalidClientTokenId"
            | "SignatureDoesNotMatch"
            | "ExpiredToken"
            | "UnrecognizedClientException",
        ) => Error::fatal(format!("{what}: {err:?}")),
        // Throttling, 5xx and anything the SDK could not even dispatch.
        _ => Error::transient(format!("{what}: {err:?}")),
    }
}

/// Factory for creating Route 53 backends
pub struct Route53Factory;

#[async_trait]
impl BackendFactory for Route53Factory {
    async fn create(
        &self,
        config: &BackendConfig,
        host: &HostContext,
    ) -> Result<Box<dyn Backend>> {
        match config {
            BackendConfig::Route53 { zone_id } => {
                let sdk_config =
                    aws_config::defaults(aws_config::BehaviorVersion::latest()).load().await;
                let client = Client::new(&sdk_config);
                Ok(Box::new(Route53Backend::new(
                    client,
                    zone_id.clone(),
                    &host.base_domain,
                )))
            }
            _ => Err(Error::config("invalid config for route53 backend")),
        }
    }
}

/// Register the Route 53 backend with a registry.
pub fn register(registry: &BackendRegistry) {
    registry.register("route53", Box::new(Route53Factory));
}
