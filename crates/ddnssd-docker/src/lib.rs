// # Docker Runtime Client
//
// This crate provides the container-runtime side of the daemon: queries
// against the Docker Engine HTTP API (list / inspect) and the long-lived
// event stream that feeds the event queue.
//
// ## Service labels
//
// Containers advertise services through labels under the `org.ddnssd.`
// prefix:
//
// ```text
// org.ddnssd._http._tcp.port       = "80"
// org.ddnssd._http._tcp.priority   = "10"     (optional, default 0)
// org.ddnssd._http._tcp.weight     = "5"      (optional, default 0)
// org.ddnssd._http._tcp.tag.path   = "/api"   (optional TXT attributes)
// ```
//
// Tag attributes are emitted in key order, since label maps carry no
// ordering of their own.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use ddnssd_core::runtime::{ContainerMetadata, ContainerRuntime, ServiceSpec};
use ddnssd_core::system::Event;
use ddnssd_core::{Error, Result};

const LABEL_PREFIX: &str = "org.ddnssd.";

/// Pause between reconnect attempts of the event stream
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Client for the Docker Engine HTTP API.
pub struct DockerRuntime {
    base_url: String,
    client: reqwest::Client,
}

impl DockerRuntime {
    /// Create a client for `docker_host` (`http://` or `tcp://` endpoint).
    ///
    /// No global request timeout: the event stream is long-lived by design.
    pub fn new(docker_host: &str) -> Result<Self> {
        let base_url = docker_host
            .replace("tcp://", "http://")
            .trim_end_matches('/')
            .to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::config(format!(
                "unsupported docker host {docker_host}; expected an http:// or tcp:// endpoint"
            )));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::config(format!("cannot build docker client: {e}")))?;

        Ok(Self { base_url, client })
    }

    /// Consume the runtime event stream, producing into the event queue.
    ///
    /// Runs until the queue closes; stream failures reconnect after a short
    /// pause. Only produces into the queue, never touches the container map.
    pub async fn watch(&self, tx: mpsc::Sender<Event>) {
        loop {
            if let Err(e) = self.stream_events(&tx).await {
                warn!(error = %e, "event stream failed");
            }
            if tx.is_closed() {
                info!("event queue closed, watcher exiting");
                return;
            }
            debug!("reconnecting to the event stream");
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn stream_events(&self, tx: &mpsc::Sender<Event>) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/events", self.base_url))
            .query(&[("filters", r#"{"type":["container"]}"#)])
            .send()
            .await
            .map_err(|e| Error::runtime(format!("event stream request failed: {e}")))?
            .error_for_status()
            .map_err(|e| Error::runtime(format!("event stream rejected: {e}")))?;

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| Error::runtime(format!("event stream read failed: {e}")))?;
            buffer.extend_from_slice(&chunk);

            // The API emits one JSON document per line.
            while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                let line = &line[..line.len() - 1];
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_slice::<DockerEvent>(line) {
                    Ok(event) => {
                        if let Some(event) = map_event(&event) {
                            debug!(event = ?event, "runtime event");
                            if tx.send(event).await.is_err() {
                                return Ok(());
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "skipping undecodable event line"),
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn get(&self, id: &str) -> Result<Option<ContainerMetadata>> {
        let response = self
            .client
            .get(format!("{}/containers/{id}/json", self.base_url))
            .send()
            .await
            .map_err(|e| Error::runtime(format!("container inspect failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| Error::runtime(format!("container inspect rejected: {e}")))?;
        let inspect: Inspect = response
            .json()
            .await
            .map_err(|e| Error::runtime(format!("container inspect undecodable: {e}")))?;

        Ok(Some(metadata_of(inspect)))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/containers/json", self.base_url))
            .send()
            .await
            .map_err(|e| Error::runtime(format!("container list failed: {e}")))?
            .error_for_status()
            .map_err(|e| Error::runtime(format!("container list rejected: {e}")))?;

        let summaries: Vec<ContainerSummary> = response
            .json()
            .await
            .map_err(|e| Error::runtime(format!("container list undecodable: {e}")))?;
        Ok(summaries.into_iter().map(|s| s.id).collect())
    }
}

#[derive(Debug, Deserialize)]
struct ContainerSummary {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct Inspect {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Config", default)]
    config: InspectConfig,
    #[serde(rename = "NetworkSettings", default)]
    network_settings: NetworkSettings,
}

#[derive(Debug, Default, Deserialize)]
struct InspectConfig {
    #[serde(rename = "Labels", default)]
    labels: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct NetworkSettings {
    #[serde(rename = "Networks", default)]
    networks: HashMap<String, Network>,
}

#[derive(Debug, Default, Deserialize)]
struct Network {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
    #[serde(rename = "GlobalIPv6Address", default)]
    global_ipv6_address: String,
}

#[derive(Debug, Default, Deserialize)]
struct DockerEvent {
    #[serde(rename = "Action", default)]
    action: String,
    #[serde(rename = "Actor", default)]
    actor: Actor,
}

#[derive(Debug, Default, Deserialize)]
struct Actor {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(rename = "Attributes", default)]
    attributes: HashMap<String, String>,
}

fn metadata_of(inspect: Inspect) -> ContainerMetadata {
    let mut ipv4 = None;
    let mut ipv6 = None;
    // Networks is a map, so pick addresses in name order for determinism.
    let networks: BTreeMap<_, _> = inspect.network_settings.networks.iter().collect();
    for network in networks.values() {
        if ipv4.is_none() {
            ipv4 = network.ip_address.parse().ok();
        }
        if ipv6.is_none() {
            ipv6 = network.global_ipv6_address.parse().ok();
        }
    }

    ContainerMetadata {
        id: inspect.id,
        name: inspect.name.trim_start_matches('/').to_string(),
        ipv4,
        ipv6,
        services: parse_services(&inspect.config.labels),
    }
}

/// Extract the advertised services from the container's labels.
fn parse_services(labels: &HashMap<String, String>) -> Vec<ServiceSpec> {
    #[derive(Default)]
    struct Partial {
        port: Option<u16>,
        priority: u16,
        weight: u16,
        tags: BTreeMap<String, String>,
    }

    let mut partials: BTreeMap<String, Partial> = BTreeMap::new();

    for (key, value) in labels {
        let Some(rest) = key.strip_prefix(LABEL_PREFIX) else {
            continue;
        };
        if let Some((service, tag_key)) = rest.split_once(".tag.") {
            partials
                .entry(service.to_string())
                .or_default()
                .tags
                .insert(tag_key.to_string(), value.clone());
            continue;
        }
        let Some((service, field)) = rest.rsplit_once('.') else {
            continue;
        };
        let partial = partials.entry(service.to_string()).or_default();
        match field {
            "port" => partial.port = value.parse().ok(),
            "priority" => partial.priority = value.parse().unwrap_or(0),
            "weight" => partial.weight = value.parse().unwrap_or(0),
            other => debug!(label = key, field = other, "ignoring unknown service label"),
        }
    }

    partials
        .into_iter()
        .filter_map(|(service, partial)| {
            let Some(port) = partial.port else {
                warn!(service, "service label set has no usable port, skipping");
                return None;
            };
            Some(ServiceSpec {
                service,
                port,
                priority: partial.priority,
                weight: partial.weight,
                tags: partial
                    .tags
                    .into_iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect(),
            })
        })
        .collect()
}

/// Map a runtime event to a queue message, or `None` for events the loop
/// does not care about.
fn map_event(event: &DockerEvent) -> Option<Event> {
    let id = event.actor.id.clone();
    match event.action.as_str() {
        "start" => Some(Event::Started { id }),
        // A graceful-stop signal is the stop intent; the die event follows.
        "kill" => match event.actor.attributes.get("signal").map(String::as_str) {
            Some("15" | "SIGTERM" | "3" | "SIGQUIT" | "2" | "SIGINT") => {
                Some(Event::Stopped { id })
            }
            _ => None,
        },
        "die" => {
            // A die without a readable exit code is treated as unclean, so
            // records are retained rather than dropped by guesswork.
            let exit_code = event
                .actor
                .attributes
                .get("exitCode")
                .and_then(|c| c.parse().ok())
                .unwrap_or(-1);
            Some(Event::Died { id, exit_code })
        }
        "destroy" => Some(Event::Removed { id }),
        _ => None,
    }
}
