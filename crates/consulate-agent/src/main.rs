//! Consulate Agent
//!
//! Registers a service with Consul, keeps its heartbeat alive and serves
//! status endpoints until interrupted.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use consulate_agent::address::{AddressResolver, LocalAddressResolver, StaticAddressResolver};
use consulate_agent::backend::{InMemoryBackend, InMemoryFactory};
use consulate_agent::kv::read_defaults_file;
use consulate_agent::observability::{init_metrics, init_tracing, shutdown_tracing, TracingConfig};
use consulate_agent::{api, version, Agent, AgentConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "consulate-agent")]
#[command(about = "Service registration and liveness agent for Consul")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    /// Consul HTTP API
    Http,
    /// In-process backend, for running without Consul
    Memory,
}

#[derive(Subcommand)]
enum Commands {
    /// Register, heartbeat and serve status endpoints
    Run {
        #[arg(long, value_enum, env = "CONSULATE_BACKEND", default_value = "http")]
        backend: BackendKind,

        /// Status API bind address
        #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:9090")]
        bind_addr: String,

        #[arg(long, env = "CONSUL_HOST")]
        consul_host: Option<String>,

        #[arg(long, env = "CONSUL_HTTP_PORT")]
        consul_port: Option<u16>,

        #[arg(long, env = "SERVICE_ID")]
        service_id: Option<String>,

        #[arg(long, env = "SERVICE_NAME")]
        service_name: Option<String>,

        #[arg(long, env = "SERVER_PORT")]
        service_port: Option<u16>,

        /// JSON file with default configuration to bootstrap
        #[arg(long, requires = "defaults_version")]
        defaults: Option<PathBuf>,

        /// Version tag of the defaults file
        #[arg(long, requires = "defaults")]
        defaults_version: Option<String>,
    },
    /// Print build information
    Version,
}

struct RunArgs {
    backend: BackendKind,
    bind_addr: String,
    defaults: Option<(PathBuf, String)>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("{}", version::build_info());
            Ok(())
        }
        Commands::Run {
            backend,
            bind_addr,
            consul_host,
            consul_port,
            service_id,
            service_name,
            service_port,
            defaults,
            defaults_version,
        } => {
            let mut config = AgentConfig::from_env();
            if let Some(host) = consul_host {
                config.consul_host = host;
            }
            if let Some(port) = consul_port {
                config.consul_http_port = port;
            }
            if let Some(id) = service_id {
                config.service_id = id;
            }
            if let Some(name) = service_name {
                config.service_name = name;
            }
            if let Some(port) = service_port {
                config.service_port = port;
            }

            let args = RunArgs {
                backend,
                bind_addr,
                defaults: defaults.zip(defaults_version),
            };
            run(config, args).await
        }
    }
}

fn build_agent(config: &AgentConfig, backend: BackendKind) -> anyhow::Result<Agent> {
    let agent = match backend {
        BackendKind::Http => Agent::from_config(config)?,
        BackendKind::Memory => {
            let resolver: Box<dyn AddressResolver> = match &config.advertise_address {
                Some(address) => Box::new(StaticAddressResolver::new(
                    address.clone(),
                    config
                        .hostname
                        .clone()
                        .unwrap_or_else(consulate_agent::address::system_hostname),
                )),
                None => Box::new(LocalAddressResolver::new(config.hostname.clone())),
            };
            Agent::new(
                config,
                Arc::new(InMemoryFactory::new(InMemoryBackend::new())),
                "memory",
                resolver.as_ref(),
            )?
        }
    };
    Ok(agent)
}

async fn run(config: AgentConfig, args: RunArgs) -> anyhow::Result<()> {
    init_tracing(TracingConfig::from_env()).map_err(|e| anyhow::anyhow!(e))?;

    info!(version = %version::full_version(), "Starting consulate-agent");

    let metrics_state = match init_metrics() {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(error = %e, "Metrics disabled");
            None
        }
    };

    let agent = Arc::new(build_agent(&config, args.backend).context("invalid agent configuration")?);

    let outcome = agent
        .start()
        .await
        .context("initial service registration failed")?;
    info!(
        registration_id = %agent.identity().registration_id(),
        outcome = %outcome,
        "Service registration complete"
    );

    if let Some((path, defaults_version)) = &args.defaults {
        let defaults = read_defaults_file(path)
            .with_context(|| format!("failed to load defaults from {}", path.display()))?;
        let outcome = agent
            .bootstrap_config(&defaults, defaults_version)
            .await
            .context("configuration bootstrap failed")?;
        info!(outcome = ?outcome, version = %defaults_version, "Configuration bootstrap complete");
    }

    let heartbeat = agent.spawn_heartbeat();

    let readiness = Arc::new(AtomicBool::new(false));
    let state = api::AppState {
        agent: agent.clone(),
        metrics_state,
        readiness: readiness.clone(),
    };
    let app = api::create_router(state);

    info!(bind_addr = %args.bind_addr, "Starting status API");
    let listener = tokio::net::TcpListener::bind(&args.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", args.bind_addr))?;
    readiness.store(true, Ordering::Release);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    heartbeat.abort();
    if let Err(e) = agent.shutdown().await {
        warn!(error = %e, "Failed to deregister service");
    }
    shutdown_tracing();

    Ok(())
}
