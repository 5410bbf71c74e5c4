use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// An open port attached to a known host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPort {
    pub port: u16,
    pub proto: String,
    pub service: String,
}

/// A known host on the local segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: IpAddr,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub meta: HashMap<String, String>,
    /// Snapshot of the host's open ports. Replaced wholesale on merge,
    /// never mutated in place, so concurrent readers keep a consistent
    /// view even while discovery and a port scanner both write.
    #[serde(default)]
    pub open_ports: Arc<HashMap<u16, OpenPort>>,
}

impl Endpoint {
    pub fn new(ip: IpAddr, hostname: impl Into<String>) -> Self {
        Endpoint {
            ip,
            mac: None,
            hostname: hostname.into(),
            vendor: String::new(),
            meta: HashMap::new(),
            open_ports: Arc::new(HashMap::new()),
        }
    }
}

/// The narrow slice of the host registry consumed by discovery.
pub trait HostRegistry: Send + Sync {
    /// Known endpoint for an IP, if any.
    fn lookup_by_ip(&self, ip: IpAddr) -> Option<Endpoint>;

    /// Merge the given metadata into the endpoint. An empty hostname is
    /// opportunistically filled from any `*:hostname` entry in the map.
    fn update_metadata(&self, ip: IpAddr, meta: HashMap<String, String>);

    /// Record an open port on the endpoint. The port map is replaced with
    /// a new snapshot, never mutated in place.
    fn merge_open_port(&self, ip: IpAddr, port: u16, proto: &str, service: &str);
}

/// In-memory registry, seeded from configuration. Stands in for whatever
/// recon subsystem owns the real host table.
#[derive(Default)]
pub struct MemoryRegistry {
    hosts: RwLock<HashMap<IpAddr, Endpoint>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_host(&self, endpoint: Endpoint) {
        self.hosts.write().unwrap().insert(endpoint.ip, endpoint);
    }
}

impl HostRegistry for MemoryRegistry {
    fn lookup_by_ip(&self, ip: IpAddr) -> Option<Endpoint> {
        self.hosts.read().unwrap().get(&ip).cloned()
    }

    fn update_metadata(&self, ip: IpAddr, meta: HashMap<String, String>) {
        let mut hosts = self.hosts.write().unwrap();
        let Some(endpoint) = hosts.get_mut(&ip) else {
            return;
        };

        if endpoint.hostname.is_empty() {
            if let Some(hostname) = meta
                .iter()
                .find(|(k, _)| k.ends_with(":hostname"))
                .map(|(_, v)| v.clone())
            {
                endpoint.hostname = hostname;
            }
        }

        endpoint.meta.extend(meta);
    }

    fn merge_open_port(&self, ip: IpAddr, port: u16, proto: &str, service: &str) {
        let mut hosts = self.hosts.write().unwrap();
        let Some(endpoint) = hosts.get_mut(&ip) else {
            return;
        };
        if endpoint.open_ports.contains_key(&port) {
            return;
        }

        let mut ports = (*endpoint.open_ports).clone();
        ports.insert(
            port,
            OpenPort {
                port,
                proto: proto.to_string(),
                service: service.to_string(),
            },
        );
        endpoint.open_ports = Arc::new(ports);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn lookup_misses_unknown_hosts() {
        let reg = MemoryRegistry::new();
        reg.add_host(Endpoint::new(ip("192.168.1.10"), "nas"));

        assert!(reg.lookup_by_ip(ip("192.168.1.10")).is_some());
        assert!(reg.lookup_by_ip(ip("192.168.1.11")).is_none());
    }

    #[test]
    fn metadata_update_fills_empty_hostname() {
        let reg = MemoryRegistry::new();
        reg.add_host(Endpoint::new(ip("192.168.1.10"), ""));

        reg.update_metadata(
            ip("192.168.1.10"),
            HashMap::from([
                ("mdns:_ipp._tcp:hostname".to_string(), "printer.local.".to_string()),
                ("mdns:_ipp._tcp:port".to_string(), "631".to_string()),
            ]),
        );

        let ep = reg.lookup_by_ip(ip("192.168.1.10")).unwrap();
        assert_eq!(ep.hostname, "printer.local.");
        assert_eq!(ep.meta.get("mdns:_ipp._tcp:port").map(String::as_str), Some("631"));
    }

    #[test]
    fn metadata_update_keeps_known_hostname() {
        let reg = MemoryRegistry::new();
        reg.add_host(Endpoint::new(ip("192.168.1.10"), "nas"));

        reg.update_metadata(
            ip("192.168.1.10"),
            HashMap::from([("mdns:_smb._tcp:hostname".to_string(), "other.".to_string())]),
        );

        assert_eq!(reg.lookup_by_ip(ip("192.168.1.10")).unwrap().hostname, "nas");
    }

    #[test]
    fn open_port_merge_replaces_snapshot() {
        let reg = MemoryRegistry::new();
        reg.add_host(Endpoint::new(ip("192.168.1.10"), "nas"));

        let before = reg.lookup_by_ip(ip("192.168.1.10")).unwrap().open_ports;
        reg.merge_open_port(ip("192.168.1.10"), 631, "tcp", "_ipp._tcp");
        let after = reg.lookup_by_ip(ip("192.168.1.10")).unwrap().open_ports;

        // old snapshot untouched, new snapshot is a different allocation
        assert!(before.is_empty());
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.get(&631).unwrap().service, "_ipp._tcp");

        // re-merge of a known port is a no-op
        reg.merge_open_port(ip("192.168.1.10"), 631, "tcp", "other");
        let again = reg.lookup_by_ip(ip("192.168.1.10")).unwrap().open_ports;
        assert_eq!(again.get(&631).unwrap().service, "_ipp._tcp");
    }
}
