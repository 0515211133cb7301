//! Configuration types for the DDNS-SD system

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::record::{DnsRecord, canonical_name};

/// Default capacity of the event queue.
///
/// When full, producers (the runtime watcher) apply backpressure by awaiting;
/// the queue is never dropped from.
fn default_queue_capacity() -> usize {
    1000
}

/// Main daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Zone suffix; all emitted names end with it
    pub base_domain: String,

    /// Local host FQDN; ownership suffix for A/AAAA names and SRV targets
    pub hostname: String,

    /// Ordered, non-empty list of backend configurations
    pub backends: Vec<BackendConfig>,

    /// Expose Prometheus metrics on port 9218
    pub enable_metrics: bool,

    /// Optional record for the host itself, always part of the desired set
    pub host_dns_record: Option<DnsRecord>,

    /// Container-runtime endpoint (e.g. `http://127.0.0.1:2375`)
    pub docker_host: String,

    /// Withdraw all published records on graceful shutdown
    pub suppress_on_exit: bool,

    /// Event queue capacity
    pub queue_capacity: usize,
}

impl Config {
    pub fn new(base_domain: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            base_domain: canonical_name(&base_domain.into()),
            hostname: canonical_name(&hostname.into()),
            backends: Vec::new(),
            enable_metrics: false,
            host_dns_record: None,
            docker_host: "http://127.0.0.1:2375".to_string(),
            suppress_on_exit: false,
            queue_capacity: default_queue_capacity(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.base_domain.is_empty() {
            return Err(Error::config("base domain cannot be empty"));
        }
        if self.hostname.is_empty() {
            return Err(Error::config("hostname cannot be empty"));
        }
        if self.hostname != self.base_domain
            && !self.hostname.ends_with(&format!(".{}", self.base_domain))
        {
            return Err(Error::config(format!(
                "hostname {} must end with base domain {}",
                self.hostname, self.base_domain
            )));
        }
        if self.backends.is_empty() {
            return Err(Error::config("at least one backend must be configured"));
        }
        if let Some(rr) = &self.host_dns_record {
            if rr.name() != self.hostname
                && !rr.name().ends_with(&format!(".{}", self.base_domain))
            {
                return Err(Error::config(format!(
                    "host record name {} is outside base domain {}",
                    rr.name(),
                    self.base_domain
                )));
            }
        }
        if self.queue_capacity == 0 {
            return Err(Error::config("queue capacity must be > 0"));
        }
        Ok(())
    }

    /// The capability object handed to containers and backends.
    pub fn host_context(&self) -> HostContext {
        HostContext {
            base_domain: self.base_domain.clone(),
            hostname: self.hostname.clone(),
            host_record: self.host_dns_record.clone(),
        }
    }
}

/// Backend configuration, tagged by backend type name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Route 53 change-batch backend
    Route53 {
        /// Hosted zone id; resolved from the base domain when absent
        zone_id: Option<String>,
    },

    /// PowerDNS SQL backend
    PowerDns {
        /// Connection string for the server carrying the PowerDNS schema
        database_url: String,
    },

    /// Custom backend resolved through the registry
    Custom {
        /// Factory name to use
        factory: String,
        /// Backend-specific configuration data
        config: serde_json::Value,
    },
}

impl BackendConfig {
    /// Get the backend type name used for registry lookup
    pub fn type_name(&self) -> &str {
        match self {
            BackendConfig::Route53 { .. } => "route53",
            BackendConfig::PowerDns { .. } => "power_dns",
            BackendConfig::Custom { factory, .. } => factory,
        }
    }
}

/// The slice of host state the container model needs to derive records.
///
/// Passed at construction instead of a back-pointer to the whole system.
#[derive(Debug, Clone)]
pub struct HostContext {
    pub base_domain: String,
    pub hostname: String,
    pub host_record: Option<DnsRecord>,
}
