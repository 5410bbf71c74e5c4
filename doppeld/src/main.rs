mod acceptor;
mod config;
mod handlers;
mod mdns;
mod registry;
mod tls;
mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use mdns_sd::ServiceDaemon;

use crate::config::{expand_home, Config};
use crate::mdns::advertise::{self, Advertiser, MdnsRegistrar};
use crate::mdns::browser::{Browser, MdnsBackend};
use crate::registry::{Endpoint, MemoryRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("doppeld=info")),
        )
        .init();

    tracing::info!("Starting doppeld");

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/doppel/doppeld.toml".to_string());

    let config = if std::path::Path::new(&config_path).exists() {
        let config = Config::load(&config_path)
            .with_context(|| format!("Failed to load config from {}", config_path))?;
        tracing::info!("Loaded config from {}", config_path);
        config
    } else {
        tracing::info!("No config at {}, using defaults", config_path);
        Config::default()
    };

    // Seed the host registry from configuration
    let registry = Arc::new(MemoryRegistry::new());
    for host in &config.known_hosts {
        let mut endpoint = Endpoint::new(host.ip, host.hostname.clone());
        endpoint.mac = host.mac.clone();
        registry.add_host(endpoint);
    }
    tracing::info!("Seeded registry with {} known hosts", config.known_hosts.len());

    // Create mDNS daemon, optionally bound to one interface
    let daemon = ServiceDaemon::new().context("Failed to create mDNS daemon")?;
    if let Some(interface) = &config.discovery.interface {
        daemon
            .disable_interface(mdns_sd::IfKind::All)
            .context("Failed to disable default interfaces")?;
        daemon
            .enable_interface(interface.as_str())
            .with_context(|| format!("Failed to enable interface {}", interface))?;
    }

    // Start discovery from the DNS-SD meta-query
    let browser = Browser::new(
        Arc::new(MdnsBackend::new(daemon.clone())),
        registry.clone(),
        config.discovery.domain.clone(),
    );
    browser.start()?;

    // Log correlated discoveries as they arrive
    let mut events = browser.subscribe();
    let logger_handle = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let host = event
                        .endpoint
                        .map(|e| e.ip.to_string())
                        .unwrap_or_else(|| "?".to_string());
                    tracing::info!(
                        "{} on {host} port {}",
                        event.service.instance_name(),
                        event.service.port
                    );
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("discovery event logger lagged by {n} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let advertiser = Advertiser::new(
        Arc::new(MdnsRegistrar::new(daemon.clone())),
        config.advertise.clone(),
        config.ipp.clone(),
    );

    // Either replay a declared service list or impersonate a discovered host
    if let Some(path) = &config.advertise.services {
        advertiser.start_from_file(&expand_home(path)).await?;
    } else if let Some(target) = config.advertise.impersonate {
        tracing::info!(
            "warming up discovery for {}s before impersonating {target}",
            config.advertise.impersonate_warmup_secs
        );
        tokio::time::sleep(Duration::from_secs(config.advertise.impersonate_warmup_secs)).await;

        let services = advertise::services_for_address(&browser, target);
        if services.is_empty() {
            tracing::warn!("nothing discovered for {target}, not advertising");
        } else {
            if let Some(path) = &config.advertise.save_discovered {
                let path = expand_home(path);
                types::save_services(&path, &services)
                    .with_context(|| format!("could not save services to {}", path.display()))?;
                tracing::info!("saved {} services to {}", services.len(), path.display());
            }
            advertiser
                .start(services, format!("impersonation of {target}"))
                .await?;
        }
    }

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    browser.stop();
    browser.wait().await;
    logger_handle.abort();

    if advertiser.is_active().await {
        if let Err(e) = advertiser.stop().await {
            tracing::error!("Failed to stop advertiser: {}", e);
        }
    }

    if let Err(e) = daemon.shutdown() {
        tracing::error!("Failed to shutdown mDNS daemon: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
