//! dockerdns daemon entry point.

use std::sync::Arc;

use log::{error, info, warn};
use tokio::signal;
use tokio_util::sync::CancellationToken;

mod config;
mod dns_server;
mod error;
mod extract;
mod names;
mod parser;
mod reconciler;
mod registry;
mod responder;
mod runtime;
mod types;
mod zones;

use config::Config;
use dns_server::{run_dns_server, DockerDns};
use extract::NetworkPolicy;
use names::NameResolver;
use parser::ContainerParser;
use reconciler::Reconciler;
use registry::Registry;
use responder::Responder;
use runtime::{ContainerRuntime, DockerRuntime};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!("Starting dockerdns with config: {:?}", cfg);
    let zones = cfg.zones()?;
    info!(
        "Serving zones {:?}",
        zones.iter().map(ToString::to_string).collect::<Vec<_>>()
    );

    // Container Runtime (Docker)
    let docker = DockerRuntime::connect(cfg.endpoint.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to Docker: {}", e))?
        .with_swarm(cfg.swarm);
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(docker);

    // Permitted networks, discovered from our own containers if unset
    let mut networks = cfg.networks.clone();
    if networks.is_empty() {
        if let Some(identity) = cfg.identity.as_deref() {
            match runtime.identity_networks(identity).await {
                Ok(found) => {
                    info!("Discovered networks for identity {}: {:?}", identity, found);
                    networks = found;
                }
                Err(e) => warn!("Failed to discover networks for {}: {}", identity, e),
            }
        }
    }
    let policy = NetworkPolicy::new(networks);
    if policy.allowed().is_empty() {
        info!("Publishing addresses from all networks");
    } else {
        info!("Publishing addresses from networks {:?}", policy.allowed());
    }

    // Registry and reconciler
    let registry = Arc::new(Registry::new(!cfg.no_reverse));
    let parser = ContainerParser::new(
        Arc::clone(&runtime),
        policy,
        NameResolver::new(zones.clone(), cfg.name_options()),
        cfg.eligibility(),
        cfg.require_ipv4,
    );
    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&runtime),
        parser,
        Arc::clone(&registry),
    ));

    reconciler
        .scan()
        .await
        .map_err(|e| anyhow::anyhow!("Initial container scan failed: {}", e))?;
    reconciler.scan_services().await;
    if reconciler.registry().is_empty() {
        warn!("No containers published after initial scan");
    } else {
        info!("Registry holds {} records", reconciler.registry().len());
    }

    let cancel = CancellationToken::new();
    let reconciler_handle = tokio::spawn(Arc::clone(&reconciler).run(cancel.clone()));

    // DNS Server
    let responder = Arc::new(Responder::new(zones, registry, cfg.fallthrough()));
    let handler = DockerDns::new(responder, cfg.ttl, cfg.forward_upstream);
    let dns_bind = cfg.dns_bind;
    let dns_handle = tokio::spawn(async move {
        if let Err(e) = run_dns_server(dns_bind, handler).await {
            error!("DNS server failed: {}", e);
        }
    });

    // Graceful Shutdown
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down...");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }

    cancel.cancel();
    dns_handle.abort();
    if let Err(e) = reconciler_handle.await {
        error!("Event listener task failed: {}", e);
    }

    info!("Shutdown complete.");
    Ok(())
}
