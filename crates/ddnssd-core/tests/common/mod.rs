//! Test doubles and common utilities for the contract tests
//!
//! [`MemoryBackend`] implements the full backend contract over an in-memory
//! zone, including the SRV/TXT-set coupling, so the lifecycle and reconcile
//! tests observe the same semantics a conforming production backend provides.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ddnssd_core::config::{BackendConfig, Config};
use ddnssd_core::error::Result;
use ddnssd_core::record::{DnsRecord, RecordType, enumeration_name};
use ddnssd_core::runtime::{ContainerMetadata, ContainerRuntime, ServiceSpec};
use ddnssd_core::Backend;

struct Inner {
    base_domain: String,
    zone: Mutex<Vec<DnsRecord>>,
    rest_calls: AtomicUsize,
}

/// An in-memory backend implementing the full publish/suppress contract.
///
/// Cloning shares the underlying zone, so tests can keep a handle for
/// assertions while the event loop owns the boxed copy.
#[derive(Clone)]
pub struct MemoryBackend {
    name: &'static str,
    inner: Arc<Inner>,
}

impl MemoryBackend {
    pub fn new(name: &'static str, base_domain: &str) -> Self {
        Self {
            name,
            inner: Arc::new(Inner {
                base_domain: base_domain.to_string(),
                zone: Mutex::new(Vec::new()),
                rest_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Prepopulate the zone, bypassing the publish contract.
    pub fn seed(&self, rr: DnsRecord) {
        self.inner.zone.lock().unwrap().push(rr);
    }

    pub fn contains(&self, rr: &DnsRecord) -> bool {
        self.inner.zone.lock().unwrap().contains(rr)
    }

    pub fn records(&self) -> Vec<DnsRecord> {
        self.inner.zone.lock().unwrap().clone()
    }

    pub fn records_at(&self, name: &str, rtype: RecordType) -> Vec<DnsRecord> {
        self.inner
            .zone
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.name() == name && r.rtype() == rtype)
            .cloned()
            .collect()
    }

    pub fn rest_calls(&self) -> usize {
        self.inner.rest_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        self.name
    }

    async fn dns_records(&self) -> Result<Vec<DnsRecord>> {
        Ok(self.records())
    }

    async fn publish_record(&self, rr: &DnsRecord) -> Result<()> {
        let mut zone = self.inner.zone.lock().unwrap();
        match rr.rtype() {
            // Upsert: the (name, type) key is replaced wholesale.
            RecordType::A | RecordType::Aaaa | RecordType::Cname | RecordType::Txt => {
                zone.retain(|r| !(r.name() == rr.name() && r.rtype() == rr.rtype()));
                zone.push(rr.clone());
            }
            // Set types: add the value, preserving siblings.
            RecordType::Srv | RecordType::Ptr => {
                if !zone.contains(rr) {
                    zone.push(rr.clone());
                }
            }
        }
        Ok(())
    }

    async fn suppress_record(&self, rr: &DnsRecord) -> Result<()> {
        let mut zone = self.inner.zone.lock().unwrap();
        zone.retain(|r| r != rr);

        if rr.rtype() == RecordType::Srv {
            let srv_left = zone
                .iter()
                .any(|r| r.name() == rr.name() && r.rtype() == RecordType::Srv);
            if !srv_left {
                // Last SRV at this name: drop the instance TXT and the
                // service PTR entry pointing at it.
                zone.retain(|r| !(r.name() == rr.name() && r.rtype() == RecordType::Txt));
                if let Some(parent) = rr.parent_name() {
                    let entry = DnsRecord::ptr(parent, rr.ttl(), rr.name());
                    zone.retain(|r| r != &entry);
                }
            }
        }
        Ok(())
    }

    async fn suppress_shared_records(&self) -> Result<()> {
        let mut zone = self.inner.zone.lock().unwrap();
        let enumeration = enumeration_name(&self.inner.base_domain);

        let services: Vec<String> = zone
            .iter()
            .filter(|r| r.name() == enumeration && r.rtype() == RecordType::Ptr)
            .map(|r| r.value().trim_end_matches('.').to_string())
            .collect();

        zone.retain(|r| {
            !(r.rtype() == RecordType::Ptr
                && (r.name() == enumeration || services.iter().any(|s| s == r.name())))
        });
        Ok(())
    }

    async fn rest(&self) {
        self.inner.rest_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// A runtime whose containers the test script controls directly.
#[derive(Clone, Default)]
pub struct ScriptedRuntime {
    containers: Arc<Mutex<HashMap<String, ContainerMetadata>>>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, metadata: ContainerMetadata) {
        self.containers
            .lock()
            .unwrap()
            .insert(metadata.id.clone(), metadata);
    }

    pub fn remove(&self, id: &str) {
        self.containers.lock().unwrap().remove(id);
    }
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    async fn get(&self, id: &str) -> Result<Option<ContainerMetadata>> {
        Ok(self.containers.lock().unwrap().get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.containers.lock().unwrap().keys().cloned().collect())
    }
}

/// Poll `condition` until it holds or two seconds pass.
///
/// The event loop runs on its own task; tests synchronise on observable zone
/// state rather than on internals.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    while !condition() {
        if std::time::Instant::now() > deadline {
            panic!("condition not reached within timeout");
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}

pub const BASE_DOMAIN: &str = "example.com";
pub const HOSTNAME: &str = "host.example.com";

/// A config pointing at one custom backend slot; tests construct their
/// backends directly, so the entry is never instantiated.
pub fn test_config() -> Config {
    let mut config = Config::new(BASE_DOMAIN, HOSTNAME);
    config.backends.push(BackendConfig::Custom {
        factory: "memory".to_string(),
        config: serde_json::Value::Null,
    });
    config
}

/// Metadata for a container advertising one `_http._tcp` service.
pub fn http_container(id: &str, name: &str, ipv4: &str) -> ContainerMetadata {
    ContainerMetadata {
        id: id.to_string(),
        name: name.to_string(),
        ipv4: Some(ipv4.parse().unwrap()),
        ipv6: None,
        services: vec![ServiceSpec {
            service: "_http._tcp".to_string(),
            port: 80,
            priority: 0,
            weight: 0,
            tags: Vec::new(),
        }],
    }
}
