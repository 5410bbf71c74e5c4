use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub advertise: AdvertiseConfig,
    #[serde(default)]
    pub ipp: IppConfig,
    /// Seed hosts for the in-memory registry; discoveries that don't
    /// correlate with one of these are dropped.
    #[serde(default)]
    pub known_hosts: Vec<KnownHost>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    /// Restrict mDNS to one interface; all interfaces if unset.
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default = "default_domain")]
    pub domain: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdvertiseConfig {
    /// YAML service list to advertise at startup.
    #[serde(default)]
    pub services: Option<PathBuf>,
    /// Host to impersonate: after the warmup, its discovered services are
    /// replayed as decoys.
    #[serde(default)]
    pub impersonate: Option<IpAddr>,
    #[serde(default = "default_impersonate_warmup")]
    pub impersonate_warmup_secs: u64,
    /// Write the impersonated host's service list here, for later replay
    /// through `services`.
    #[serde(default)]
    pub save_discovered: Option<PathBuf>,
    #[serde(default = "default_certificate")]
    pub certificate: PathBuf,
    #[serde(default = "default_key")]
    pub key: PathBuf,
    #[serde(default)]
    pub tls: TlsProfile,
}

/// Issuer profile for auto-generated TLS material.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsProfile {
    #[serde(default = "default_common_name")]
    pub common_name: String,
    #[serde(default = "default_organization")]
    pub organization: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default = "default_validity_days")]
    pub validity_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IppConfig {
    /// Where captured print jobs are written, one JSON file per job.
    #[serde(default = "default_save_path")]
    pub save_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KnownHost {
    pub ip: IpAddr,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub hostname: String,
}

fn default_domain() -> String {
    "local".to_string()
}

fn default_impersonate_warmup() -> u64 {
    10
}

fn default_certificate() -> PathBuf {
    PathBuf::from("~/.doppel/cert.pem")
}

fn default_key() -> PathBuf {
    PathBuf::from("~/.doppel/key.pem")
}

fn default_common_name() -> String {
    "doppel".to_string()
}

fn default_organization() -> String {
    "doppel".to_string()
}

fn default_country() -> String {
    "US".to_string()
}

fn default_validity_days() -> u32 {
    365
}

fn default_save_path() -> PathBuf {
    PathBuf::from("~/.doppel/documents")
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interface: None,
            domain: default_domain(),
        }
    }
}

impl Default for AdvertiseConfig {
    fn default() -> Self {
        Self {
            services: None,
            impersonate: None,
            impersonate_warmup_secs: default_impersonate_warmup(),
            save_discovered: None,
            certificate: default_certificate(),
            key: default_key(),
            tls: TlsProfile::default(),
        }
    }
}

impl Default for TlsProfile {
    fn default() -> Self {
        Self {
            common_name: default_common_name(),
            organization: default_organization(),
            country: default_country(),
            validity_days: default_validity_days(),
        }
    }
}

impl Default for IppConfig {
    fn default() -> Self {
        Self {
            save_path: default_save_path(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}

/// Expand a leading `~/` with the current home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_gets_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.discovery.domain, "local");
        assert_eq!(config.advertise.certificate, PathBuf::from("~/.doppel/cert.pem"));
        assert_eq!(config.advertise.tls.validity_days, 365);
        assert!(config.known_hosts.is_empty());
    }

    #[test]
    fn parses_full_config() {
        let toml = r#"
[discovery]
interface = "eth0"

[advertise]
services = "/etc/doppel/services.yml"
impersonate = "192.168.1.40"
impersonate_warmup_secs = 5

[advertise.tls]
common_name = "print-server"
organization = "ACME"

[ipp]
save_path = "/var/lib/doppel/documents"

[[known_hosts]]
ip = "192.168.1.40"
hostname = "printer"

[[known_hosts]]
ip = "192.168.1.41"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.discovery.interface.as_deref(), Some("eth0"));
        assert_eq!(config.advertise.impersonate, "192.168.1.40".parse().ok());
        assert_eq!(config.advertise.tls.common_name, "print-server");
        assert_eq!(config.advertise.tls.country, "US");
        assert_eq!(config.known_hosts.len(), 2);
        assert_eq!(config.known_hosts[1].hostname, "");
    }

    #[test]
    fn expands_home_prefix_only() {
        std::env::set_var("HOME", "/home/op");
        assert_eq!(
            expand_home(Path::new("~/.doppel/cert.pem")),
            PathBuf::from("/home/op/.doppel/cert.pem")
        );
        assert_eq!(expand_home(Path::new("/etc/doppel")), PathBuf::from("/etc/doppel"));
    }
}
