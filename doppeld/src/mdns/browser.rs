//! mDNS service discovery and host correlation.
//!
//! The browser starts from the DNS-SD meta-query, spawns a resolver per
//! discovered service type, and correlates every resolved instance with
//! the host registry by advertised address.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{Context, Result};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::registry::{Endpoint, HostRegistry};
use crate::types::ServiceEntry;

/// DNS-SD meta-query; its "instances" are the service types present on
/// the network.
pub const META_QUERY_SERVICE: &str = "_services._dns-sd._udp";

/// Emitted for every resolved instance that matched a known host.
#[derive(Debug, Clone)]
pub struct DiscoveryEvent {
    pub service: ServiceEntry,
    pub endpoint: Option<Endpoint>,
}

/// Seam over the mDNS daemon so correlation logic is testable without
/// multicast sockets.
pub trait ResolveBackend: Send + Sync {
    fn browse(&self, full_type: &str) -> Result<flume::Receiver<ServiceEvent>>;
    fn stop_browse(&self, full_type: &str) -> Result<()>;
}

pub struct MdnsBackend {
    daemon: ServiceDaemon,
}

impl MdnsBackend {
    pub fn new(daemon: ServiceDaemon) -> Self {
        Self { daemon }
    }
}

impl ResolveBackend for MdnsBackend {
    fn browse(&self, full_type: &str) -> Result<flume::Receiver<ServiceEvent>> {
        self.daemon
            .browse(full_type)
            .with_context(|| format!("could not browse {full_type}"))
    }

    fn stop_browse(&self, full_type: &str) -> Result<()> {
        self.daemon
            .stop_browse(full_type)
            .with_context(|| format!("could not stop browsing {full_type}"))
    }
}

/// One service list per discovered address, for presentation.
#[derive(Debug, Clone)]
pub struct AddressServices {
    pub address: IpAddr,
    pub services: Vec<ServiceEntry>,
}

pub struct Browser {
    backend: Arc<dyn ResolveBackend>,
    registry: Arc<dyn HostRegistry>,
    domain: String,
    /// Service types with an active resolver, keyed by bare type
    /// (e.g. "_ipp._tcp").
    resolvers: RwLock<HashMap<String, ()>>,
    /// Resolved instances grouped by advertised address, then by full
    /// instance name.
    services_by_ip: RwLock<HashMap<IpAddr, HashMap<String, ServiceEntry>>>,
    events: broadcast::Sender<DiscoveryEvent>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Browser {
    pub fn new(
        backend: Arc<dyn ResolveBackend>,
        registry: Arc<dyn HostRegistry>,
        domain: impl Into<String>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            backend,
            registry,
            domain: domain.into(),
            resolvers: RwLock::new(HashMap::new()),
            services_by_ip: RwLock::new(HashMap::new()),
            events,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Kick off discovery with the meta-query resolver.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        tracing::info!("starting mDNS discovery on domain {}", self.domain);
        self.start_browsing(META_QUERY_SERVICE)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe()
    }

    /// Start a resolver for the given service type. A second call for a
    /// type already being browsed is a no-op.
    pub fn start_browsing(self: &Arc<Self>, service_type: &str) -> Result<()> {
        let stype = service_type.trim_matches('.').to_string();
        if self.resolvers.read().unwrap().contains_key(&stype) {
            return Ok(());
        }
        {
            let mut resolvers = self.resolvers.write().unwrap();
            if resolvers.insert(stype.clone(), ()).is_some() {
                return Ok(());
            }
        }

        let full_type = format!("{}.{}.", stype, self.domain.trim_matches('.'));
        let receiver = match self.backend.browse(&full_type) {
            Ok(receiver) => receiver,
            Err(e) => {
                self.resolvers.write().unwrap().remove(&stype);
                return Err(e);
            }
        };

        tracing::debug!("browsing {full_type}");

        let browser = Arc::clone(self);
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = receiver.recv_async() => match event {
                        Ok(ServiceEvent::ServiceFound(ty, fullname)) => {
                            if ty.trim_matches('.').starts_with(META_QUERY_SERVICE) {
                                browser.on_service_discovered(meta_entry(
                                    &fullname,
                                    &browser.domain,
                                ));
                            }
                        }
                        Ok(ServiceEvent::ServiceResolved(info)) => {
                            browser.on_service_discovered(entry_from_info(
                                &info,
                                &browser.domain,
                            ));
                        }
                        Ok(ServiceEvent::ServiceRemoved(_, fullname)) => {
                            browser.on_service_removed(&fullname);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!("resolver for {stype} stopped: {e}");
                            break;
                        }
                    },
                    _ = cancel.cancelled() => break,
                }
            }
        });
        self.tasks.lock().unwrap().push(handle);
        Ok(())
    }

    /// Route a discovery: meta-query answers spawn a new resolver, real
    /// instances are correlated against the host registry.
    pub fn on_service_discovered(self: &Arc<Self>, entry: ServiceEntry) {
        tracing::debug!(
            "discovered {} ({} addresses)",
            entry.instance_name(),
            entry.addresses().len()
        );

        if entry.stype == META_QUERY_SERVICE && entry.addresses().is_empty() {
            let service_type = entry.instance.clone();
            if let Err(e) = self.start_browsing(&service_type) {
                tracing::error!("could not browse discovered type {service_type}: {e}");
            }
            return;
        }

        let mut matched = None;
        for ip in entry.addresses() {
            let Some(_) = self.registry.lookup_by_ip(ip) else {
                continue;
            };
            matched = Some(ip);
            break;
        }

        let Some(ip) = matched else {
            tracing::debug!(
                "no known host for {}, dropping discovery",
                entry.instance_name()
            );
            return;
        };

        self.services_by_ip
            .write()
            .unwrap()
            .entry(ip)
            .or_default()
            .insert(entry.instance_name(), entry.clone());

        self.registry.update_metadata(ip, endpoint_meta(&entry));
        let proto = if entry.stype.contains("_udp") { "udp" } else { "tcp" };
        self.registry
            .merge_open_port(ip, entry.port, proto, &entry.stype);

        let endpoint = self.registry.lookup_by_ip(ip);
        let _ = self.events.send(DiscoveryEvent {
            service: entry,
            endpoint,
        });
    }

    fn on_service_removed(&self, fullname: &str) {
        tracing::debug!("service removed: {fullname}");
        let mut by_ip = self.services_by_ip.write().unwrap();
        for services in by_ip.values_mut() {
            services.remove(fullname);
        }
        by_ip.retain(|_, services| !services.is_empty());
    }

    /// Snapshot of everything discovered so far, sorted by address and
    /// then instance name. An optional filter narrows to one host.
    pub fn services_by_address(&self, filter: Option<IpAddr>) -> Vec<AddressServices> {
        let by_ip = self.services_by_ip.read().unwrap();
        let mut out: Vec<AddressServices> = by_ip
            .iter()
            .filter(|(ip, _)| filter.is_none_or(|want| want == **ip))
            .map(|(ip, services)| {
                let mut services: Vec<ServiceEntry> = services.values().cloned().collect();
                services.sort_by_key(|s| s.instance_name());
                AddressServices {
                    address: *ip,
                    services,
                }
            })
            .collect();
        out.sort_by_key(|a| a.address);
        out
    }

    /// Stop all resolvers. Discovery state is kept for inspection.
    pub fn stop(&self) {
        tracing::info!("stopping mDNS discovery");
        self.cancel.cancel();
        let types: Vec<String> = self.resolvers.read().unwrap().keys().cloned().collect();
        for stype in types {
            let full_type = format!("{}.{}.", stype, self.domain.trim_matches('.'));
            if let Err(e) = self.backend.stop_browse(&full_type) {
                tracing::debug!("stop browse {full_type}: {e}");
            }
        }
    }

    /// Wait for resolver tasks to wind down after stop().
    pub async fn wait(&self) {
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in tasks {
            let _ = task.await;
        }
    }
}

/// Metadata merged into the endpoint for every resolved instance.
fn endpoint_meta(entry: &ServiceEntry) -> HashMap<String, String> {
    let prefix = format!("mdns:{}", entry.stype);
    let mut meta = HashMap::new();
    meta.insert(format!("{prefix}:name"), entry.service_name());
    meta.insert(format!("{prefix}:hostname"), entry.hostname.clone());
    meta.insert(format!("{prefix}:port"), entry.port.to_string());
    for (i, addr) in entry.addr_v4.iter().enumerate() {
        meta.insert(format!("{prefix}:ipv4[{i}]"), addr.to_string());
    }
    for (i, addr) in entry.addr_v6.iter().enumerate() {
        meta.insert(format!("{prefix}:ipv6[{i}]"), addr.to_string());
    }
    for (key, value) in entry.txt_map() {
        meta.insert(format!("{prefix}:info:{key}"), value);
    }
    meta
}

/// A meta-query answer names a service type, not a real instance.
fn meta_entry(fullname: &str, domain: &str) -> ServiceEntry {
    let domain = domain.trim_matches('.');
    let instance = fullname
        .trim_matches('.')
        .strip_suffix(&format!(".{domain}"))
        .unwrap_or_else(|| fullname.trim_matches('.'))
        .to_string();
    ServiceEntry {
        instance,
        stype: META_QUERY_SERVICE.to_string(),
        subtypes: Vec::new(),
        domain: domain.to_string(),
        hostname: String::new(),
        port: 0,
        txt: Vec::new(),
        addr_v4: Vec::new(),
        addr_v6: Vec::new(),
    }
}

fn entry_from_info(info: &ServiceInfo, domain: &str) -> ServiceEntry {
    let domain = domain.trim_matches('.');
    let ty = info.get_type().trim_matches('.');
    let stype = ty
        .strip_suffix(&format!(".{domain}"))
        .unwrap_or(ty)
        .to_string();
    let instance = info
        .get_fullname()
        .strip_suffix(&format!(".{}", info.get_type().trim_end_matches('.')))
        .or_else(|| info.get_fullname().strip_suffix(info.get_type()))
        .unwrap_or(info.get_fullname())
        .trim_matches('.')
        .to_string();

    let mut addr_v4 = Vec::new();
    let mut addr_v6 = Vec::new();
    for addr in info.get_addresses() {
        match addr {
            IpAddr::V4(v4) => addr_v4.push(*v4),
            IpAddr::V6(v6) => addr_v6.push(*v6),
        }
    }
    addr_v4.sort();
    addr_v6.sort();

    let mut txt: Vec<String> = info
        .get_properties()
        .iter()
        .map(|prop| {
            let value = prop.val_str();
            if value.is_empty() {
                prop.key().to_string()
            } else {
                format!("{}={}", prop.key(), value)
            }
        })
        .collect();
    txt.sort();

    ServiceEntry {
        instance,
        stype,
        subtypes: info.get_subtype().iter().map(|s| s.to_string()).collect(),
        domain: domain.to_string(),
        hostname: info.get_hostname().to_string(),
        port: info.get_port(),
        txt,
        addr_v4,
        addr_v6,
    }
}
