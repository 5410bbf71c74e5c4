use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// A discovered DNS-SD service instance.
///
/// Immutable once built except for address/TXT accumulation while the
/// resolver is still collecting records for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEntry {
    /// Instance name, e.g. "Office Printer"
    pub instance: String,

    /// Service type, e.g. "_ipp._tcp"
    pub stype: String,

    /// Service subtypes, fully qualified
    #[serde(default)]
    pub subtypes: Vec<String>,

    /// Domain, "local" unless the record says otherwise
    pub domain: String,

    /// Host machine DNS name, e.g. "printer.local."
    pub hostname: String,

    /// Service port
    pub port: u16,

    /// TXT records as raw "key=value" strings
    #[serde(default)]
    pub txt: Vec<String>,

    /// Accumulated IPv4 addresses
    #[serde(default)]
    pub addr_v4: Vec<Ipv4Addr>,

    /// Accumulated IPv6 addresses
    #[serde(default)]
    pub addr_v6: Vec<Ipv6Addr>,
}

impl ServiceEntry {
    /// Complete service name, e.g. "_ipp._tcp.local."
    pub fn service_name(&self) -> String {
        format!("{}.{}.", trim_dots(&self.stype), trim_dots(&self.domain))
    }

    /// Complete instance name, e.g. "Office Printer._ipp._tcp.local."
    pub fn instance_name(&self) -> String {
        format!("{}.{}", trim_dots(&self.instance), self.service_name())
    }

    /// All advertised addresses, IPv4 first then IPv6.
    pub fn addresses(&self) -> Vec<IpAddr> {
        self.addr_v4
            .iter()
            .copied()
            .map(IpAddr::V4)
            .chain(self.addr_v6.iter().copied().map(IpAddr::V6))
            .collect()
    }

    /// TXT records as key/value pairs; a record without '=' maps the whole
    /// string to an empty value.
    pub fn txt_map(&self) -> Vec<(String, String)> {
        self.txt
            .iter()
            .filter_map(|raw| {
                let raw = raw.trim();
                if raw.is_empty() {
                    return None;
                }
                match raw.split_once('=') {
                    Some((k, v)) => Some((k.trim().to_string(), v.trim().to_string())),
                    None => Some((raw.to_string(), String::new())),
                }
            })
            .collect()
    }
}

/// One advertised decoy service, as declared in the YAML service file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceData {
    /// Instance name (e.g. "Office Printer")
    pub name: String,

    /// Service type (e.g. "_ipp._tcp")
    pub service: String,

    /// Domain, defaults to "local"
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Service port; 0 lets the advertiser pick one
    #[serde(default)]
    pub port: u16,

    /// Service TXT records
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<String>,

    /// Optional IP of an external responder to direct clients at instead
    /// of a local acceptor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responder: Option<String>,

    /// Optional IPP printer-attribute overrides
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub ipp: HashMap<String, String>,

    /// Optional HTTP path -> body overrides
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub http: HashMap<String, String>,
}

fn default_domain() -> String {
    "local".to_string()
}

impl ServiceData {
    /// Complete instance name, e.g. "Office Printer._ipp._tcp.local"
    pub fn full_name(&self) -> String {
        format!(
            "{}.{}.{}",
            trim_dots(&self.name),
            trim_dots(&self.service),
            trim_dots(&self.domain)
        )
    }

    /// Fully qualified service type for registration/browsing,
    /// e.g. "_ipp._tcp.local."
    pub fn full_type(&self) -> String {
        format!("{}.{}.", trim_dots(&self.service), trim_dots(&self.domain))
    }

    /// TXT records as the key/value map the mDNS layer wants.
    pub fn txt_properties(&self) -> HashMap<String, String> {
        self.records
            .iter()
            .filter_map(|raw| {
                let raw = raw.trim();
                if raw.is_empty() {
                    return None;
                }
                match raw.split_once('=') {
                    Some((k, v)) => Some((k.to_string(), v.to_string())),
                    None => Some((raw.to_string(), String::new())),
                }
            })
            .collect()
    }

    /// Whether this entry is served by a local acceptor rather than an
    /// external responder.
    pub fn is_local(&self) -> bool {
        self.responder.is_none()
    }
}

impl From<&ServiceEntry> for ServiceData {
    fn from(entry: &ServiceEntry) -> Self {
        ServiceData {
            name: entry.instance.clone(),
            service: entry.stype.clone(),
            domain: entry.domain.clone(),
            port: entry.port,
            records: entry.txt.clone(),
            responder: None,
            ipp: HashMap::new(),
            http: HashMap::new(),
        }
    }
}

/// Load a declarative service list from a YAML file.
pub fn load_services(path: impl AsRef<Path>) -> Result<Vec<ServiceData>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("could not read service file {}", path.display()))?;
    let services: Vec<ServiceData> = serde_yaml::from_str(&contents)
        .with_context(|| format!("could not deserialize service file {}", path.display()))?;
    Ok(services)
}

/// Save a service list to a YAML file, for later replay by the advertiser.
pub fn save_services(path: impl AsRef<Path>, services: &[ServiceData]) -> Result<()> {
    let path = path.as_ref();
    let contents = serde_yaml::to_string(services).context("could not serialize services")?;
    std::fs::write(path, contents)
        .with_context(|| format!("could not write service file {}", path.display()))?;
    Ok(())
}

fn trim_dots(s: &str) -> &str {
    s.trim_matches('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> ServiceEntry {
        ServiceEntry {
            instance: "Office Printer".to_string(),
            stype: "_ipp._tcp".to_string(),
            subtypes: vec![],
            domain: "local".to_string(),
            hostname: "printer.local.".to_string(),
            port: 631,
            txt: vec!["rp=ipp/print".to_string(), "pdl=application/pdf".to_string()],
            addr_v4: vec![Ipv4Addr::new(192, 168, 1, 40)],
            addr_v6: vec![],
        }
    }

    #[test]
    fn derived_names_are_fully_qualified() {
        let e = entry();
        assert_eq!(e.service_name(), "_ipp._tcp.local.");
        assert_eq!(e.instance_name(), "Office Printer._ipp._tcp.local.");
    }

    #[test]
    fn addresses_are_v4_then_v6() {
        let mut e = entry();
        e.addr_v6.push(Ipv6Addr::LOCALHOST);
        let addrs = e.addresses();
        assert!(addrs[0].is_ipv4());
        assert!(addrs[1].is_ipv6());
    }

    #[test]
    fn txt_map_splits_on_first_equals() {
        let mut e = entry();
        e.txt.push("note=a=b".to_string());
        e.txt.push("flag".to_string());
        let map = e.txt_map();
        assert!(map.contains(&("note".to_string(), "a=b".to_string())));
        assert!(map.contains(&("flag".to_string(), String::new())));
    }

    #[test]
    fn service_data_yaml_round_trip() {
        let yaml = r#"
- name: Office Printer
  service: _ipp._tcp
  port: 631
  records:
    - rp=ipp/print
  ipp:
    printer-name: Office Printer
- name: Files
  service: _http._tcp
  domain: local
  port: 8080
  responder: 192.168.1.5
"#;
        let services: Vec<ServiceData> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].domain, "local");
        assert_eq!(services[0].full_name(), "Office Printer._ipp._tcp.local");
        assert_eq!(services[0].full_type(), "_ipp._tcp.local.");
        assert!(services[0].is_local());
        assert!(!services[1].is_local());

        let back = serde_yaml::to_string(&services).unwrap();
        let again: Vec<ServiceData> = serde_yaml::from_str(&back).unwrap();
        assert_eq!(again[1].responder.as_deref(), Some("192.168.1.5"));
    }

    #[test]
    fn service_file_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("services.yml");
        let services = vec![ServiceData::from(&entry())];

        save_services(&path, &services).unwrap();
        let loaded = load_services(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].full_name(), "Office Printer._ipp._tcp.local");
        assert_eq!(loaded[0].port, 631);
        assert_eq!(loaded[0].records, services[0].records);
    }

    #[test]
    fn decoy_from_entry_preserves_identity() {
        let e = entry();
        let decoy = ServiceData::from(&e);
        assert_eq!(decoy.full_name(), "Office Printer._ipp._tcp.local");
        assert_eq!(decoy.port, 631);
        assert_eq!(decoy.records, e.txt);
        assert!(decoy.is_local());
    }
}
