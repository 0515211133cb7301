//! Shutdown Contract: graceful suppression
//!
//! A graceful shutdown with suppression enabled withdraws every owned record
//! and the shared browse-tree entries the daemon created, then terminates
//! cleanly.

mod common;

use std::sync::Arc;

use common::{MemoryBackend, ScriptedRuntime, http_container, test_config};
use ddnssd_core::record::DnsRecord;
use ddnssd_core::system::{Event, System};

#[tokio::test]
async fn suppress_all_withdraws_everything_we_created() {
    let runtime = ScriptedRuntime::new();
    let backend = MemoryBackend::new("memory", common::BASE_DOMAIN);
    runtime.insert(http_container("aaa", "c1", "10.0.0.1"));

    // A record belonging to another tenant of the zone.
    let foreign = DnsRecord::a("unrelated.example.com", 60, "192.0.2.77".parse().unwrap());
    backend.seed(foreign.clone());

    let system = System::new(
        &test_config(),
        vec![Box::new(backend.clone())],
        Arc::new(runtime.clone()),
    );
    let tx = system.queue();
    let handle = tokio::spawn(system.run());

    tx.send(Event::Started { id: "aaa".into() }).await.unwrap();
    tx.send(Event::SuppressAll).await.unwrap();
    tx.send(Event::Terminate).await.unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(
        backend.records(),
        vec![foreign],
        "shutdown left daemon records behind: {:?}",
        backend.records()
    );
}

#[tokio::test]
async fn terminate_alone_keeps_records_published() {
    let runtime = ScriptedRuntime::new();
    let backend = MemoryBackend::new("memory", common::BASE_DOMAIN);
    runtime.insert(http_container("aaa", "c1", "10.0.0.1"));

    let system = System::new(
        &test_config(),
        vec![Box::new(backend.clone())],
        Arc::new(runtime.clone()),
    );
    let tx = system.queue();
    let handle = tokio::spawn(system.run());

    tx.send(Event::Started { id: "aaa".into() }).await.unwrap();
    tx.send(Event::Terminate).await.unwrap();
    handle.await.unwrap().unwrap();

    // Without suppression the records stay for the next daemon generation.
    assert!(backend.contains(&DnsRecord::a(
        "c1.host.example.com",
        60,
        "10.0.0.1".parse().unwrap()
    )));
}

#[tokio::test]
async fn shutdown_suppression_spans_all_backends() {
    let runtime = ScriptedRuntime::new();
    let first = MemoryBackend::new("first", common::BASE_DOMAIN);
    let second = MemoryBackend::new("second", common::BASE_DOMAIN);
    runtime.insert(http_container("aaa", "c1", "10.0.0.1"));

    let system = System::new(
        &test_config(),
        vec![Box::new(first.clone()), Box::new(second.clone())],
        Arc::new(runtime.clone()),
    );
    let tx = system.queue();
    let handle = tokio::spawn(system.run());

    tx.send(Event::Started { id: "aaa".into() }).await.unwrap();
    tx.send(Event::SuppressAll).await.unwrap();
    tx.send(Event::Terminate).await.unwrap();
    handle.await.unwrap().unwrap();

    assert!(first.records().is_empty());
    assert!(second.records().is_empty());
}
