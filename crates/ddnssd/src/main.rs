// # ddnssd - DNS-SD daemon
//
// Thin integration layer: reads configuration from the environment, wires
// the backends, the Docker watcher and the metrics endpoint together, and
// runs the event loop from ddnssd-core. No DNS or lifecycle logic lives
// here.
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// - `DDNSSD_BASE_DOMAIN`: zone suffix all records live under (required)
// - `DDNSSD_HOSTNAME`: this host's FQDN, the ownership suffix (required)
// - `DDNSSD_BACKENDS`: comma-separated backend list, e.g. "route53" or
//   "route53,power_dns" (required)
// - `DDNSSD_DOCKER_HOST`: Docker Engine endpoint (default
//   http://127.0.0.1:2375)
// - `DDNSSD_ENABLE_METRICS`: serve Prometheus metrics on port 9218
// - `DDNSSD_HOST_IP_ADDRESS`: publish an address record for the host itself
// - `DDNSSD_SUPPRESS_ON_EXIT`: withdraw all records on graceful shutdown
// - `DDNSSD_RECONCILE_INTERVAL_SECS`: periodic reconciliation interval
//   (default 3600, 0 disables the timer)
// - `DDNSSD_ROUTE53_ZONE_ID`: hosted zone id (optional, resolved by name)
// - `DDNSSD_POWERDNS_DATABASE_URL`: DSN of the PowerDNS database
// - `DDNSSD_LOG_LEVEL`: trace|debug|info|warn|error (default info)
// - `DDNSSD_GIT_REVISION`: build label on the start-time metric
//
// AWS credentials come from the usual SDK sources (environment, profile,
// IMDS).

mod metrics;

use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

use ddnssd_core::config::BackendConfig;
use ddnssd_core::record::DnsRecord;
use ddnssd_core::system::Event;
use ddnssd_core::{BackendRegistry, Config, System};
use ddnssd_docker::DockerRuntime;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for the daemon
///
/// - 0: clean shutdown
/// - 1: configuration or startup error
/// - 2: fatal backend or runtime error
#[derive(Debug, Clone, Copy)]
enum DdnssdExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<DdnssdExitCode> for ExitCode {
    fn from(code: DdnssdExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Default periodic reconciliation interval
const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 3600;

/// Environment-derived daemon settings
struct EnvConfig {
    config: Config,
    log_level: String,
    git_revision: String,
    reconcile_interval_secs: u64,
}

impl EnvConfig {
    fn from_env() -> Result<Self> {
        let base_domain = require("DDNSSD_BASE_DOMAIN")?;
        let hostname = require("DDNSSD_HOSTNAME")?;
        let mut config = Config::new(base_domain, hostname);

        let backend_names = require("DDNSSD_BACKENDS")?;
        for name in backend_names.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            config.backends.push(backend_config(name)?);
        }

        if let Ok(docker_host) = env::var("DDNSSD_DOCKER_HOST") {
            config.docker_host = docker_host;
        }
        config.enable_metrics = flag("DDNSSD_ENABLE_METRICS");
        config.suppress_on_exit = flag("DDNSSD_SUPPRESS_ON_EXIT");

        if let Ok(address) = env::var("DDNSSD_HOST_IP_ADDRESS") {
            let address = address.parse().map_err(|e| {
                anyhow::anyhow!("DDNSSD_HOST_IP_ADDRESS is not an IPv4 address: {e}")
            })?;
            config.host_dns_record = Some(DnsRecord::a(&config.hostname, 60, address));
        }

        config.validate()?;

        let reconcile_interval_secs = match env::var("DDNSSD_RECONCILE_INTERVAL_SECS") {
            Ok(value) => value.parse().map_err(|e| {
                anyhow::anyhow!("DDNSSD_RECONCILE_INTERVAL_SECS is not an integer: {e}")
            })?,
            Err(_) => DEFAULT_RECONCILE_INTERVAL_SECS,
        };

        Ok(Self {
            config,
            log_level: env::var("DDNSSD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            git_revision: env::var("DDNSSD_GIT_REVISION")
                .unwrap_or_else(|_| "unknown".to_string()),
            reconcile_interval_secs,
        })
    }
}

fn require(name: &str) -> Result<String> {
    env::var(name).map_err(|_| anyhow::anyhow!("{name} is required"))
}

fn flag(name: &str) -> bool {
    matches!(
        env::var(name).unwrap_or_default().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn backend_config(name: &str) -> Result<BackendConfig> {
    match name {
        "route53" => Ok(BackendConfig::Route53 {
            zone_id: env::var("DDNSSD_ROUTE53_ZONE_ID").ok(),
        }),
        "power_dns" | "powerdns" => Ok(BackendConfig::PowerDns {
            database_url: require("DDNSSD_POWERDNS_DATABASE_URL")?,
        }),
        other => anyhow::bail!(
            "DDNSSD_BACKENDS names unsupported backend '{other}'. \
            Supported backends: route53, power_dns"
        ),
    }
}

fn main() -> ExitCode {
    let env_config = match EnvConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return DdnssdExitCode::ConfigError.into();
        }
    };

    let log_level = match env_config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => {
            eprintln!("Invalid DDNSSD_LOG_LEVEL '{other}'");
            return DdnssdExitCode::ConfigError.into();
        }
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
        return DdnssdExitCode::ConfigError.into();
    }

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {e}");
            return DdnssdExitCode::RuntimeError.into();
        }
    };

    rt.block_on(run_daemon(env_config)).into()
}

async fn run_daemon(env_config: EnvConfig) -> DdnssdExitCode {
    let config = env_config.config;
    info!(
        base_domain = config.base_domain,
        hostname = config.hostname,
        backends = config.backends.len(),
        "starting ddnssd"
    );
    ddnssd_core::metrics::mark_start(&env_config.git_revision);

    // Register the built-in backends.
    let registry = BackendRegistry::new();
    #[cfg(feature = "route53")]
    ddnssd_backend_route53::register(&registry);
    #[cfg(feature = "power_dns")]
    ddnssd_backend_powerdns::register(&registry);

    // Instantiate the configured backends; any failure here is fatal.
    let host = config.host_context();
    let mut backends = Vec::new();
    for entry in &config.backends {
        match registry.create(entry, &host).await {
            Ok(backend) => {
                info!(backend = backend.name(), "backend ready");
                backends.push(backend);
            }
            Err(e) => {
                error!(backend = entry.type_name(), error = %e, "backend construction failed");
                return DdnssdExitCode::ConfigError;
            }
        }
    }

    let runtime = match DockerRuntime::new(&config.docker_host) {
        Ok(runtime) => Arc::new(runtime),
        Err(e) => {
            error!(error = %e, "docker client construction failed");
            return DdnssdExitCode::ConfigError;
        }
    };

    let system = System::new(&config, backends, runtime.clone());
    let tx = system.queue();

    // Startup order: watcher, metrics, initial reconcile, then the loop.
    let watcher = {
        let tx = tx.clone();
        let runtime = runtime.clone();
        tokio::spawn(async move { runtime.watch(tx).await })
    };
    let metrics_server = config
        .enable_metrics
        .then(|| tokio::spawn(metrics::serve()));
    let reconcile_timer = (env_config.reconcile_interval_secs > 0).then(|| {
        let tx = tx.clone();
        let period = std::time::Duration::from_secs(env_config.reconcile_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick fires immediately; startup already reconciles.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if tx.send(Event::ReconcileAll).await.is_err() {
                    return;
                }
            }
        })
    });

    if tx.send(Event::ReconcileAll).await.is_err() {
        error!("event queue closed before startup");
        return DdnssdExitCode::RuntimeError;
    }
    let mut system_task = tokio::spawn(system.run());

    let exit_code = tokio::select! {
        result = &mut system_task => {
            match result {
                Ok(Ok(())) => {
                    info!("event loop finished");
                    DdnssdExitCode::CleanShutdown
                }
                Ok(Err(e)) => {
                    error!(error = %e, "event loop failed");
                    DdnssdExitCode::RuntimeError
                }
                Err(e) => {
                    error!(error = %e, "event loop panicked");
                    DdnssdExitCode::RuntimeError
                }
            }
        }
        signal_result = wait_for_shutdown() => {
            match signal_result {
                Ok(signal_name) => info!(signal = signal_name, "shutting down"),
                Err(e) => {
                    // Without signal handlers the loop can only end on its
                    // own; shut down now rather than run unstoppable.
                    error!(error = %e, "signal handling unavailable, shutting down");
                }
            }
            if config.suppress_on_exit {
                let _ = tx.send(Event::SuppressAll).await;
            }
            let _ = tx.send(Event::Terminate).await;
            match system_task.await {
                Ok(Ok(())) => DdnssdExitCode::CleanShutdown,
                Ok(Err(e)) => {
                    error!(error = %e, "event loop failed during shutdown");
                    DdnssdExitCode::RuntimeError
                }
                Err(e) => {
                    error!(error = %e, "event loop panicked during shutdown");
                    DdnssdExitCode::RuntimeError
                }
            }
        }
    };

    watcher.abort();
    if let Some(timer) = reconcile_timer {
        timer.abort();
    }
    if let Some(server) = metrics_server {
        server.abort();
    }
    exit_code
}

/// Wait for SIGTERM or SIGINT; resolves to the signal name.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("cannot install SIGTERM handler: {e}"))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("cannot install SIGINT handler: {e}"))?;
    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Fallback for non-Unix platforms: CTRL-C only.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("cannot wait for CTRL-C: {e}"))?;
    Ok("SIGINT")
}
