//! Event loop
//!
//! One task owns the container map and drives the backends. Producers (the
//! runtime watcher, the signal handler) only send [`Event`]s into the bounded
//! queue; a message is processed to completion before the next is taken, so
//! events for the same container are serialised in arrival order.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, error, info, warn};

use crate::backend::Backend;
use crate::config::{Config, HostContext};
use crate::container::{Container, ContainerMap};
use crate::error::{Error, Result};
use crate::metrics;
use crate::reconciler;
use crate::record::DnsRecord;
use crate::runtime::ContainerRuntime;

/// Messages carried by the event queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A container started
    Started { id: String },
    /// A stop was requested for a container (no DNS mutation yet)
    Stopped { id: String },
    /// A container's main process exited
    Died { id: String, exit_code: i64 },
    /// A container was removed from the runtime
    Removed { id: String },
    /// Run a full reconciliation pass against every backend
    ReconcileAll,
    /// Withdraw all published records; used at graceful shutdown
    SuppressAll,
    /// Break the loop
    Terminate,
}

impl Event {
    /// Tag used for logging and the per-event metric.
    pub fn tag(&self) -> &'static str {
        match self {
            Event::Started { .. } => "started",
            Event::Stopped { .. } => "stopped",
            Event::Died { .. } => "died",
            Event::Removed { .. } => "removed",
            Event::ReconcileAll => "reconcile_all",
            Event::SuppressAll => "suppress_all",
            Event::Terminate => "terminate",
        }
    }
}

/// The reconciliation and event-processing engine.
///
/// Owns the container map, the backends and the queue receiver. Construct
/// with [`System::new`], hand [`System::queue`] clones to producers, then
/// consume the system with [`System::run`].
pub struct System {
    host: HostContext,
    containers: ContainerMap,
    backends: Vec<Box<dyn Backend>>,
    runtime: Arc<dyn ContainerRuntime>,
    tx: mpsc::Sender<Event>,
    rx: mpsc::Receiver<Event>,
}

impl System {
    pub fn new(
        config: &Config,
        backends: Vec<Box<dyn Backend>>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        Self {
            host: config.host_context(),
            containers: ContainerMap::new(),
            backends,
            runtime,
            tx,
            rx,
        }
    }

    /// A producer handle for the event queue.
    pub fn queue(&self) -> mpsc::Sender<Event> {
        self.tx.clone()
    }

    /// Run the loop until [`Event::Terminate`] or a fatal error.
    ///
    /// Non-fatal errors are logged and the loop continues; the next
    /// reconciliation pass will repair whatever was missed.
    pub async fn run(mut self) -> Result<()> {
        info!(backends = self.backends.len(), "event loop started");

        loop {
            let event = match self.rx.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) => {
                    // Queue drained: let the backends flush or sleep before
                    // blocking for the next message.
                    for backend in &self.backends {
                        backend.rest().await;
                    }
                    match self.rx.recv().await {
                        Some(event) => event,
                        None => break,
                    }
                }
                Err(TryRecvError::Disconnected) => break,
            };

            metrics::record_event(event.tag());

            if matches!(event, Event::Terminate) {
                info!("terminate received, leaving event loop");
                break;
            }

            if let Err(e) = self.handle(event).await {
                if e.is_fatal() {
                    error!(error = %e, "fatal backend error, terminating");
                    return Err(e);
                }
                match e {
                    Error::Bug(_) => error!(error = %e, "internal error, continuing"),
                    _ => warn!(error = %e, "event dropped"),
                }
            }

            metrics::set_containers_tracked(self.containers.len());
        }

        Ok(())
    }

    async fn handle(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Started { id } => self.handle_started(&id).await,
            Event::Stopped { id } => self.handle_stopped(&id),
            Event::Died { id, exit_code } => self.handle_died(&id, exit_code).await,
            Event::Removed { id } => self.handle_removed(&id).await,
            Event::ReconcileAll => self.reconcile_all().await,
            Event::SuppressAll => self.suppress_all().await,
            // Terminate is intercepted in run(); reaching here is a bug.
            Event::Terminate => Err(Error::bug("terminate reached the dispatcher")),
        }
    }

    async fn handle_started(&mut self, id: &str) -> Result<()> {
        let Some(metadata) = self.runtime.get(id).await? else {
            return Err(Error::not_tracked(format!(
                "started container {id} has no metadata"
            )));
        };

        // A crashed predecessor still has its records published; clean up the
        // stale generation before the fresh one goes out.
        if let Some(stale) = self.containers.get(id) {
            if stale.crashed {
                info!(container = stale.name(), "suppressing records of crashed predecessor");
                for backend in &self.backends {
                    stale.suppress_records(backend.as_ref()).await?;
                }
            }
        }

        let container = Container::new(metadata, &self.host);
        info!(container = container.name(), id, "container started, publishing records");
        for backend in &self.backends {
            container.publish_records(backend.as_ref()).await?;
        }
        self.containers.insert(id.to_string(), container);
        Ok(())
    }

    fn handle_stopped(&mut self, id: &str) -> Result<()> {
        match self.containers.get_mut(id) {
            Some(container) => {
                debug!(container = container.name(), "stop intent recorded");
                container.stopped = true;
                Ok(())
            }
            None => Err(Error::not_tracked(format!("stopped event for unknown {id}"))),
        }
    }

    async fn handle_died(&mut self, id: &str, exit_code: i64) -> Result<()> {
        let Some(container) = self.containers.get(id) else {
            return Err(Error::not_tracked(format!("died event for unknown {id}")));
        };

        if exit_code == 0 || container.stopped {
            let container = self.containers.remove(id).expect("checked above");
            info!(container = container.name(), exit_code, "container exited, suppressing records");
            for backend in &self.backends {
                container.suppress_records(backend.as_ref()).await?;
            }
        } else {
            // Unclean death: keep the records so clients retain the address
            // through a crash-restart loop.
            let container = self.containers.get_mut(id).expect("checked above");
            warn!(container = container.name(), exit_code, "container crashed, retaining records");
            container.crashed = true;
        }
        Ok(())
    }

    async fn handle_removed(&mut self, id: &str) -> Result<()> {
        let Some(container) = self.containers.remove(id) else {
            return Err(Error::not_tracked(format!("removed event for unknown {id}")));
        };
        info!(container = container.name(), "container removed, suppressing records");
        for backend in &self.backends {
            container.suppress_records(backend.as_ref()).await?;
        }
        Ok(())
    }

    async fn reconcile_all(&mut self) -> Result<()> {
        self.rebuild_containers().await?;
        let desired = self.desired_records();

        for backend in &self.backends {
            let result =
                reconciler::reconcile_backend(backend.as_ref(), &desired, &self.host.hostname)
                    .await;
            metrics::record_reconcile(backend.name(), result.is_ok());
            if let Err(e) = result {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!(backend = backend.name(), error = %e, "reconciliation pass failed");
            }
        }
        Ok(())
    }

    async fn suppress_all(&mut self) -> Result<()> {
        for backend in &self.backends {
            for container in self.containers.values() {
                container.suppress_records(backend.as_ref()).await?;
            }
            backend.suppress_shared_records().await?;
        }
        Ok(())
    }

    /// Rebuild the container map from a full runtime enumeration.
    ///
    /// Containers that vanish between listing and fetching are dropped
    /// silently. Lifecycle flags survive the rebuild, and crashed containers
    /// that are no longer listed stay tracked so their records are retained.
    async fn rebuild_containers(&mut self) -> Result<()> {
        let ids = self.runtime.list().await?;
        let mut rebuilt = ContainerMap::new();

        for id in ids {
            match self.runtime.get(&id).await? {
                Some(metadata) => {
                    let mut container = Container::new(metadata, &self.host);
                    if let Some(previous) = self.containers.get(&id) {
                        container.stopped = previous.stopped;
                        container.crashed = previous.crashed;
                    }
                    rebuilt.insert(id, container);
                }
                None => debug!(id, "container vanished during enumeration"),
            }
        }

        for (id, container) in self.containers.drain() {
            if container.crashed && !rebuilt.contains_key(&id) {
                rebuilt.insert(id, container);
            }
        }

        self.containers = rebuilt;
        Ok(())
    }

    /// Union of all tracked containers' records plus the host record.
    fn desired_records(&self) -> HashSet<DnsRecord> {
        let mut desired: HashSet<DnsRecord> = self
            .containers
            .values()
            .flat_map(|c| c.dns_records().iter().cloned())
            .collect();
        if let Some(host_record) = &self.host.host_record {
            desired.insert(host_record.clone());
        }
        desired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_tags() {
        assert_eq!(Event::Started { id: "x".into() }.tag(), "started");
        assert_eq!(
            Event::Died {
                id: "x".into(),
                exit_code: 137
            }
            .tag(),
            "died"
        );
        assert_eq!(Event::ReconcileAll.tag(), "reconcile_all");
        assert_eq!(Event::Terminate.tag(), "terminate");
    }
}
