//! iotcomm - inspect communication configuration, service descriptors and the network
//!
//! Loads the layered communication configuration, validates service spec and query files,
//! shows which transport module a protocol resolves to and browses the local network for
//! advertised services.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use iotcomm_core::{CommConfig, DiscoveryConfig, ServiceQuery, ServiceSpec};
use iotcomm_discovery::{DiscoveryEngine, MdnsSdBackend, QueryPredicate};
use iotcomm_plugin_api::{PluginResolver, Role, TransportRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// iotcomm - service advertise/discover over mDNS with pluggable transports
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the effective communication configuration
    Config,

    /// Show which module file and interface descriptor a protocol resolves to
    Locate {
        /// Protocol name, e.g. zmqpubsub
        protocol: String,

        #[arg(long, value_enum, default_value = "client")]
        role: RoleArg,
    },

    /// Validate a service spec file and print it normalized
    CheckSpec { path: PathBuf },

    /// Validate a service query file and print it normalized
    CheckQuery { path: PathBuf },

    /// Browse for services matching a query file
    Discover {
        path: PathBuf,

        /// Stop after this many seconds
        #[arg(long, default_value = "10")]
        seconds: u64,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RoleArg {
    Client,
    Service,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Client => Role::Client,
            RoleArg::Service => Role::Service,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = CommConfig::global();

    match args.command {
        Command::Config => {
            println!("plugin search path:    {}", config.plugin_dirs);
            println!("interface search path: {}", config.plugin_interface_dirs);
            println!("client file suffix:    {}", config.client_file_suffix);
            println!("service file suffix:   {}", config.service_file_suffix);
            for dir in config.plugin_search_dirs() {
                println!("  plugin dir:    {}", dir.display());
            }
            for dir in config.interface_search_dirs() {
                println!("  interface dir: {}", dir.display());
            }
        }
        Command::Locate { protocol, role } => {
            let resolver = PluginResolver::new(config, Arc::new(TransportRegistry::new()));
            let module = resolver
                .locate_module(&protocol, role.into())
                .with_context(|| format!("Failed to locate {} module", protocol))?;
            println!("module: {}", module.display());

            let interface = match Role::from(role) {
                Role::Client => iotcomm_plugin_api::CLIENT_INTERFACE,
                Role::Service => iotcomm_plugin_api::SERVICE_INTERFACE,
            };
            match resolver.locate_interface(interface) {
                Ok(path) => println!("interface: {}", path.display()),
                Err(e) => warn!("{}", e),
            }
        }
        Command::CheckSpec { path } => {
            let spec = ServiceSpec::spec_from_file(&path)
                .with_context(|| format!("Invalid service spec: {:?}", path))?;
            println!("{}", spec.to_json_pretty()?);
        }
        Command::CheckQuery { path } => {
            let query = ServiceSpec::query_from_file(&path)
                .with_context(|| format!("Invalid service query: {:?}", path))?;
            println!("{}", query.to_json_pretty()?);
        }
        Command::Discover { path, seconds } => {
            let query = ServiceSpec::query_from_file(&path)
                .with_context(|| format!("Invalid service query: {:?}", path))?;

            let backend = Arc::new(MdnsSdBackend::new()?);
            let resolver = Arc::new(PluginResolver::new(config, Arc::new(TransportRegistry::new())));
            let engine = DiscoveryEngine::builder(backend, resolver)
                .config(DiscoveryConfig::short())
                .build()?;

            let cancel = CancellationToken::new();
            let timer = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(seconds)).await;
                timer.cancel();
            });

            // No transports are linked into this binary, so candidates are listed and
            // vetoed before resolution.
            let list: QueryPredicate = Box::new(|candidate: &ServiceQuery| {
                println!(
                    "{} {}:{}",
                    candidate.service_name,
                    candidate.address.as_deref().unwrap_or("?"),
                    candidate.port
                );
                false
            });

            info!("Browsing for {} for {}s", query.service_string(), seconds);
            engine
                .discover_filtered(query, Some(list), cancel, |delivered| {
                    if let Err(e) = delivered {
                        error!("[{}] {}", e.code(), e);
                    }
                })
                .await?;
        }
    }

    Ok(())
}
