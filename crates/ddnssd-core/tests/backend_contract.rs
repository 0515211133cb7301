//! Backend Contract: publish/suppress semantics
//!
//! Exercises the type-specific publish and suppress rules every backend has
//! to provide, against the in-memory reference backend:
//! - publish and suppress are idempotent
//! - A/AAAA/CNAME/TXT upsert the whole (name, type) key
//! - SRV and PTR are set types preserving siblings
//! - removing the last SRV at a name tears down the instance TXT and the
//!   service PTR entry with it

mod common;

use common::{BASE_DOMAIN, MemoryBackend};
use ddnssd_core::record::{DnsRecord, RecordType};
use ddnssd_core::Backend;

fn backend() -> MemoryBackend {
    MemoryBackend::new("memory", BASE_DOMAIN)
}

#[tokio::test]
async fn publish_is_idempotent() {
    let backend = backend();
    let rr = DnsRecord::a("c1.host.example.com", 60, "10.0.0.1".parse().unwrap());

    backend.publish_record(&rr).await.unwrap();
    backend.publish_record(&rr).await.unwrap();

    assert_eq!(backend.dns_records().await.unwrap(), vec![rr]);
}

#[tokio::test]
async fn suppress_is_idempotent() {
    let backend = backend();
    let rr = DnsRecord::a("c1.host.example.com", 60, "10.0.0.1".parse().unwrap());

    backend.publish_record(&rr).await.unwrap();
    backend.suppress_record(&rr).await.unwrap();
    // Second suppress of an absent record must not error.
    backend.suppress_record(&rr).await.unwrap();

    assert!(backend.dns_records().await.unwrap().is_empty());
}

#[tokio::test]
async fn address_publish_replaces_the_rrset() {
    let backend = backend();
    let old = DnsRecord::a("c1.host.example.com", 60, "10.0.0.1".parse().unwrap());
    let new = DnsRecord::a("c1.host.example.com", 60, "10.0.0.2".parse().unwrap());

    backend.publish_record(&old).await.unwrap();
    backend.publish_record(&new).await.unwrap();

    assert_eq!(
        backend.records_at("c1.host.example.com", RecordType::A),
        vec![new]
    );
}

#[tokio::test]
async fn txt_publish_keeps_one_record_per_name() {
    let backend = backend();
    let old = DnsRecord::txt("c1._http._tcp.example.com", 60, vec!["vers=1".into()]);
    let new = DnsRecord::txt("c1._http._tcp.example.com", 60, vec!["vers=2".into()]);

    backend.publish_record(&old).await.unwrap();
    backend.publish_record(&new).await.unwrap();

    assert_eq!(
        backend.records_at("c1._http._tcp.example.com", RecordType::Txt),
        vec![new]
    );
}

#[tokio::test]
async fn srv_publish_preserves_siblings() {
    let backend = backend();
    let r1 = DnsRecord::srv("c1._http._tcp.example.com", 60, 0, 0, 80, "c1.host.example.com");
    let r2 = DnsRecord::srv("c1._http._tcp.example.com", 60, 0, 0, 81, "c1.host.example.com");

    backend.publish_record(&r1).await.unwrap();
    backend.publish_record(&r2).await.unwrap();

    let set = backend.records_at("c1._http._tcp.example.com", RecordType::Srv);
    assert_eq!(set.len(), 2);
    assert!(set.contains(&r1) && set.contains(&r2));
}

#[tokio::test]
async fn ptr_publish_adds_only_missing_values() {
    let backend = backend();
    let c1 = DnsRecord::ptr("_http._tcp.example.com", 60, "c1._http._tcp.example.com");
    let c2 = DnsRecord::ptr("_http._tcp.example.com", 60, "c2._http._tcp.example.com");

    backend.publish_record(&c1).await.unwrap();
    backend.publish_record(&c1).await.unwrap();
    backend.publish_record(&c2).await.unwrap();

    let set = backend.records_at("_http._tcp.example.com", RecordType::Ptr);
    assert_eq!(set.len(), 2);
}

#[tokio::test]
async fn last_srv_takes_txt_and_ptr_entry_with_it() {
    let backend = backend();
    let r1 = DnsRecord::srv("c1._http._tcp.example.com", 60, 0, 0, 80, "c1.host.example.com");
    let r2 = DnsRecord::srv("c1._http._tcp.example.com", 60, 0, 0, 81, "c1.host.example.com");
    let txt = DnsRecord::txt("c1._http._tcp.example.com", 60, vec![]);
    let own_ptr = DnsRecord::ptr("_http._tcp.example.com", 60, "c1._http._tcp.example.com");
    let other_ptr = DnsRecord::ptr("_http._tcp.example.com", 60, "c2._http._tcp.example.com");

    for rr in [&r1, &r2, &txt, &own_ptr, &other_ptr] {
        backend.publish_record(rr).await.unwrap();
    }

    // A sibling SRV remains: the TXT and PTR entry must stay.
    backend.suppress_record(&r1).await.unwrap();
    assert!(backend.contains(&r2));
    assert!(backend.contains(&txt));
    assert!(backend.contains(&own_ptr));

    // Removing the last SRV cascades.
    backend.suppress_record(&r2).await.unwrap();
    assert!(backend.records_at("c1._http._tcp.example.com", RecordType::Srv).is_empty());
    assert!(!backend.contains(&txt));
    assert!(!backend.contains(&own_ptr));
    // Other instances in the same service are untouched.
    assert!(backend.contains(&other_ptr));
}

#[tokio::test]
async fn suppress_shared_records_tears_down_the_browse_tree() {
    let backend = backend();
    let enumeration = DnsRecord::ptr(
        "_services._dns-sd._udp.example.com",
        60,
        "_http._tcp.example.com",
    );
    let service = DnsRecord::ptr("_http._tcp.example.com", 60, "c1._http._tcp.example.com");
    let foreign = DnsRecord::a("other.example.com", 60, "192.0.2.1".parse().unwrap());

    backend.publish_record(&enumeration).await.unwrap();
    backend.publish_record(&service).await.unwrap();
    backend.seed(foreign.clone());

    backend.suppress_shared_records().await.unwrap();

    assert!(!backend.contains(&enumeration));
    assert!(!backend.contains(&service));
    // Records outside the browse tree are untouched.
    assert!(backend.contains(&foreign));
}
