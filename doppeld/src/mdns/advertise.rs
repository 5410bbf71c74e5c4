//! Decoy service advertisement.
//!
//! Loads a declarative service list, registers every entry on the
//! network, and runs a protocol acceptor for each entry served locally.
//! Registration is all-or-nothing; a single failure tears down whatever
//! already made it onto the wire.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use mdns_sd::{ServiceDaemon, ServiceInfo};
use rand::Rng;
use tokio::sync::Mutex;

use crate::acceptor::Acceptor;
use crate::config::{AdvertiseConfig, IppConfig};
use crate::mdns::browser::Browser;
use crate::types::{load_services, ServiceData};

/// Pause between the flushing unregister and the real registration,
/// giving caches time to drop stale records.
const FLUSH_PAUSE: Duration = Duration::from_secs(1);

/// Seam over the mDNS daemon registration surface.
pub trait Registrar: Send + Sync {
    fn register(&self, info: ServiceInfo) -> Result<()>;
    fn unregister(&self, fullname: &str) -> Result<()>;
}

pub struct MdnsRegistrar {
    daemon: ServiceDaemon,
}

impl MdnsRegistrar {
    pub fn new(daemon: ServiceDaemon) -> Self {
        Self { daemon }
    }
}

impl Registrar for MdnsRegistrar {
    fn register(&self, info: ServiceInfo) -> Result<()> {
        let fullname = info.get_fullname().to_string();
        self.daemon
            .register(info)
            .with_context(|| format!("could not register {fullname}"))
    }

    fn unregister(&self, fullname: &str) -> Result<()> {
        self.daemon
            .unregister(fullname)
            .with_context(|| format!("could not unregister {fullname}"))?;
        Ok(())
    }
}

struct Active {
    source: String,
    fullnames: Vec<String>,
    acceptors: Vec<Acceptor>,
}

pub struct Advertiser {
    registrar: Arc<dyn Registrar>,
    config: AdvertiseConfig,
    ipp: IppConfig,
    state: Mutex<Option<Active>>,
}

impl Advertiser {
    pub fn new(registrar: Arc<dyn Registrar>, config: AdvertiseConfig, ipp: IppConfig) -> Self {
        Self {
            registrar,
            config,
            ipp,
            state: Mutex::new(None),
        }
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Advertise the services declared in a YAML file.
    pub async fn start_from_file(&self, path: &std::path::Path) -> Result<()> {
        let services = load_services(path)?;
        tracing::info!("loaded {} services from {}", services.len(), path.display());
        self.start(services, path.display().to_string()).await
    }

    /// Register every entry and start an acceptor per locally served one.
    pub async fn start(&self, mut services: Vec<ServiceData>, source: String) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(active) = state.as_ref() {
            bail!("advertiser already started for {}", active.source);
        }
        if services.is_empty() {
            bail!("no services to advertise in {source}");
        }

        let local_host = local_hostname()?;
        fix_ports(&mut services);

        // Registrations run concurrently; the first failure aborts the
        // whole start and whatever was registered is torn down.
        let mut handles = Vec::with_capacity(services.len());
        for svc in &services {
            let registrar = Arc::clone(&self.registrar);
            let svc = svc.clone();
            let local_host = local_host.clone();
            handles.push(tokio::spawn(async move {
                register_service(registrar, svc, local_host).await
            }));
        }

        let mut registered = Vec::new();
        let mut first_error = None;
        for handle in handles {
            match handle.await.context("registration task panicked")? {
                Ok(fullname) => registered.push(fullname),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        if let Some(e) = first_error {
            for fullname in &registered {
                if let Err(e) = self.registrar.unregister(fullname) {
                    tracing::warn!("rollback of {fullname} failed: {e}");
                }
            }
            return Err(e);
        }

        // Acceptors only serve entries without an external responder.
        let local: Vec<&ServiceData> = services.iter().filter(|s| s.is_local()).collect();
        let mut acceptors = Vec::new();
        if !local.is_empty() {
            let tls = match crate::tls::build_acceptor(&self.config) {
                Ok(tls) => tls,
                Err(e) => {
                    self.rollback(&registered, acceptors).await;
                    return Err(e);
                }
            };
            for svc in local {
                match Acceptor::start(
                    svc,
                    &local_host,
                    tls.clone(),
                    self.ipp.save_path.clone(),
                )
                .await
                {
                    Ok(acceptor) => acceptors.push(acceptor),
                    Err(e) => {
                        self.rollback(&registered, acceptors).await;
                        return Err(e);
                    }
                }
            }
        }

        tracing::info!(
            "advertising {} services ({} local acceptors)",
            registered.len(),
            acceptors.len()
        );

        *state = Some(Active {
            source,
            fullnames: registered,
            acceptors,
        });
        Ok(())
    }

    async fn rollback(&self, fullnames: &[String], acceptors: Vec<Acceptor>) {
        for fullname in fullnames {
            if let Err(e) = self.registrar.unregister(fullname) {
                tracing::warn!("rollback of {fullname} failed: {e}");
            }
        }
        for acceptor in acceptors {
            acceptor.stop().await;
        }
    }

    /// Unregister everything and stop the acceptors.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let active = state.take().ok_or_else(|| anyhow!("advertiser not started"))?;

        tracing::info!("stopping {} services", active.fullnames.len());
        for fullname in &active.fullnames {
            if let Err(e) = self.registrar.unregister(fullname) {
                tracing::warn!("could not unregister {fullname}: {e}");
            }
        }

        tracing::info!("stopping {} acceptors", active.acceptors.len());
        for acceptor in active.acceptors {
            acceptor.stop().await;
        }
        Ok(())
    }
}

/// Everything a discovered host advertises, as a service list we can
/// replay ourselves.
pub fn services_for_address(browser: &Browser, ip: IpAddr) -> Vec<ServiceData> {
    browser
        .services_by_address(Some(ip))
        .into_iter()
        .flat_map(|bucket| bucket.services)
        .map(|entry| ServiceData::from(&entry))
        .collect()
}

async fn register_service(
    registrar: Arc<dyn Registrar>,
    svc: ServiceData,
    local_host: String,
) -> Result<String> {
    let fullname = registered_fullname(&svc);

    let info = match &svc.responder {
        None => {
            let host = format!("{}.local.", local_host.trim_end_matches(".local"));
            let info = ServiceInfo::new(
                &svc.full_type(),
                &svc.name,
                &host,
                "",
                svc.port,
                svc.txt_properties(),
            )
            .with_context(|| format!("could not build record for {fullname}"))?
            .enable_addr_auto();
            tracing::info!(
                "advertising {fullname} with hostname={host} port={}",
                svc.port
            );
            info
        }
        Some(responder) => {
            let responder = responder.clone();
            let host = responder_hostname(&responder).await;
            let info = ServiceInfo::new(
                &svc.full_type(),
                &svc.name,
                &host,
                responder.as_str(),
                svc.port,
                svc.txt_properties(),
            )
            .with_context(|| format!("could not build record for {fullname}"))?;
            tracing::info!(
                "advertising {fullname} with responder={responder} hostname={host} port={}",
                svc.port
            );
            info
        }
    };

    // Register, withdraw the record again so a goodbye flushes any
    // stale cache entry under this name, pause, then register for real.
    registrar.register(info.clone())?;
    if let Err(e) = registrar.unregister(&fullname) {
        tracing::debug!("flush unregister of {fullname}: {e}");
    }
    tokio::time::sleep(FLUSH_PAUSE).await;
    registrar.register(info)?;
    Ok(fullname)
}

/// Reverse-resolve the responder address; fall back to a nip.io name
/// that resolves back to it without any DNS setup.
async fn responder_hostname(responder: &str) -> String {
    if let Ok(ip) = responder.parse::<IpAddr>() {
        let resolved = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip)).await;
        match resolved {
            Ok(Ok(name)) if !name.is_empty() => {
                return format!("{}.", name.trim_end_matches('.'));
            }
            Ok(Ok(_)) => tracing::debug!("empty reverse lookup for responder {responder}"),
            Ok(Err(e)) => tracing::debug!("could not resolve responder {responder}: {e}"),
            Err(e) => tracing::debug!("responder lookup task failed: {e}"),
        }
    }
    format!("{}.nip.io.", responder.replace('.', "-"))
}

fn registered_fullname(svc: &ServiceData) -> String {
    format!("{}.{}", svc.name.trim_matches('.'), svc.full_type())
}

fn local_hostname() -> Result<String> {
    let name = hostname::get().context("could not get hostname")?;
    Ok(name.to_string_lossy().replace(".local", ""))
}

/// An entry advertising port 0, a port something already listens on, or
/// a port claimed twice in the list gets a random replacement.
fn fix_ports(services: &mut [ServiceData]) {
    let mut rng = rand::thread_rng();
    let mut taken = HashSet::new();
    for i in 0..services.len() {
        if !services[i].is_local() {
            continue;
        }
        while services[i].port == 0
            || !port_available(services[i].port)
            || taken.contains(&services[i].port)
        {
            let new_port: u16 = rng.gen_range(1024..65535);
            tracing::warn!(
                "port {} for service {} is not available, trying {new_port}",
                services[i].port,
                services[i].full_name()
            );
            services[i].port = new_port;
        }
        taken.insert(services[i].port);
    }
}

fn port_available(port: u16) -> bool {
    std::net::TcpStream::connect_timeout(
        &std::net::SocketAddr::from(([127, 0, 0, 1], port)),
        Duration::from_millis(10),
    )
    .is_err()
}
