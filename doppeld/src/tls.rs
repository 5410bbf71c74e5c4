//! TLS material for the acceptors.
//!
//! Certificate and key are loaded from the configured paths; if either
//! is missing a self-signed pair is generated and persisted so the same
//! identity survives restarts.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio_rustls::TlsAcceptor;

use crate::config::{expand_home, AdvertiseConfig, TlsProfile};

pub fn build_acceptor(config: &AdvertiseConfig) -> Result<TlsAcceptor> {
    let cert_path = expand_home(&config.certificate);
    let key_path = expand_home(&config.key);

    if !cert_path.exists() || !key_path.exists() {
        tracing::info!(
            "generating server TLS material at {} / {}",
            cert_path.display(),
            key_path.display()
        );
        generate(&config.tls, &cert_path, &key_path)?;
    } else {
        tracing::info!(
            "loading server TLS material from {} / {}",
            cert_path.display(),
            key_path.display()
        );
    }

    let certs = load_certs(&cert_path)?;
    let key = load_key(&key_path)?;

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("could not assemble TLS server config")?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn generate(profile: &TlsProfile, cert_path: &Path, key_path: &Path) -> Result<()> {
    let key_pair = rcgen::KeyPair::generate().context("could not generate TLS key pair")?;

    let mut params = rcgen::CertificateParams::new(vec![profile.common_name.clone()])
        .context("could not build certificate parameters")?;
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, profile.common_name.clone());
    params
        .distinguished_name
        .push(rcgen::DnType::OrganizationName, profile.organization.clone());
    params
        .distinguished_name
        .push(rcgen::DnType::CountryName, profile.country.clone());
    params.not_before = time::OffsetDateTime::now_utc();
    params.not_after = params.not_before + time::Duration::days(i64::from(profile.validity_days));

    let cert = params
        .self_signed(&key_pair)
        .context("could not self-sign certificate")?;

    for path in [cert_path, key_path] {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("could not create {}", parent.display()))?;
        }
    }
    std::fs::write(cert_path, cert.pem())
        .with_context(|| format!("could not write {}", cert_path.display()))?;
    std::fs::write(key_path, key_pair.serialize_pem())
        .with_context(|| format!("could not write {}", key_path.display()))?;
    Ok(())
}

fn load_certs(path: &Path) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let file =
        File::open(path).with_context(|| format!("could not open {}", path.display()))?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::io::Result<_>>()
        .with_context(|| format!("could not parse certificates in {}", path.display()))?;
    if certs.is_empty() {
        return Err(anyhow!("no certificates in {}", path.display()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let file =
        File::open(path).with_context(|| format!("could not open {}", path.display()))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .with_context(|| format!("could not parse key in {}", path.display()))?
        .ok_or_else(|| anyhow!("no private key in {}", path.display()))
}
