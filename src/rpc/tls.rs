//! Transport security material for the processor channel.
//!
//! Everything here runs once at startup. A configured file that is missing
//! or holds no usable PEM block is a fatal configuration error.

use std::fs;
use std::path::{Path, PathBuf};

use tonic::transport::{Certificate, ClientTlsConfig, Identity};

use crate::config::ProcessorTlsConfig;

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("{role} not found: {}", .path.display())]
    NotFound { role: &'static str, path: PathBuf },

    #[error("failed to read {role} {}: {source}", .path.display())]
    Read {
        role: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{role} {} contains no usable PEM data", .path.display())]
    NoPem { role: &'static str, path: PathBuf },

    #[error("client certificate and key must be configured together")]
    PartialIdentity,
}

#[derive(Debug, Clone, Copy)]
enum PemKind {
    Certificates,
    PrivateKey,
}

/// Read a PEM file and check it parses as the expected kind.
fn read_pem(role: &'static str, path: &Path, kind: PemKind) -> Result<Vec<u8>, TlsError> {
    if !path.exists() {
        return Err(TlsError::NotFound {
            role,
            path: path.to_path_buf(),
        });
    }
    let pem = fs::read(path).map_err(|source| TlsError::Read {
        role,
        path: path.to_path_buf(),
        source,
    })?;

    let usable = match kind {
        PemKind::Certificates => {
            let certs: Result<Vec<_>, _> = rustls_pemfile::certs(&mut pem.as_slice()).collect();
            matches!(certs, Ok(certs) if !certs.is_empty())
        }
        PemKind::PrivateKey => matches!(rustls_pemfile::private_key(&mut pem.as_slice()), Ok(Some(_))),
    };
    if !usable {
        return Err(TlsError::NoPem {
            role,
            path: path.to_path_buf(),
        });
    }
    Ok(pem)
}

/// Build the client TLS configuration: trust anchor plus optional identity.
pub fn client_tls_config(config: &ProcessorTlsConfig) -> Result<ClientTlsConfig, TlsError> {
    crate::security::install_crypto_provider();
    let mut tls = ClientTlsConfig::new();

    match &config.ca_cert_path {
        Some(ca_path) => {
            let ca = read_pem("CA certificate", Path::new(ca_path), PemKind::Certificates)?;
            tls = tls.ca_certificate(Certificate::from_pem(ca));
            tracing::info!(path = %ca_path, "Loaded CA certificate");
        }
        None => {
            tls = tls.with_native_roots();
            tracing::info!("No CA configured, trusting platform roots");
        }
    }

    match (&config.client_cert_path, &config.client_key_path) {
        (Some(cert_path), Some(key_path)) => {
            let cert = read_pem("client certificate", Path::new(cert_path), PemKind::Certificates)?;
            let key = read_pem("client key", Path::new(key_path), PemKind::PrivateKey)?;
            tls = tls.identity(Identity::from_pem(cert, key));
            tracing::info!("Loaded client certificate for mutual TLS");
        }
        (None, None) => {}
        _ => return Err(TlsError::PartialIdentity),
    }

    if let Some(domain) = &config.domain_name {
        tls = tls.domain_name(domain.clone());
    }

    Ok(tls)
}
