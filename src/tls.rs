//! TLS material loading for the listener

use crate::errors::{Result, RunnerError};
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls_pemfile::{certs, private_key};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Certificate chain and private key, both PEM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl TlsPaths {
    /// Build a rustls server config from the PEM files
    pub fn load(&self) -> Result<ServerConfig> {
        let cert_chain = load_cert_chain(&self.cert)?;
        let key = load_private_key(&self.key)?;

        ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| RunnerError::Tls(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(cert_chain, key)
            .map_err(|e| RunnerError::Tls(e.to_string()))
    }
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| RunnerError::Tls(format!("cannot open {}: {}", path.display(), e)))
}

fn load_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = open(path)?;
    let cert_chain = certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| RunnerError::Tls(format!("cannot read {}: {}", path.display(), e)))?;
    if cert_chain.is_empty() {
        return Err(RunnerError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(cert_chain)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = open(path)?;
    private_key(&mut reader)
        .map_err(|e| RunnerError::Tls(format!("cannot read {}: {}", path.display(), e)))?
        .ok_or_else(|| RunnerError::Tls(format!("no private key found in {}", path.display())))
}
