//! TLS material loading and listener selection.
//!
//! Loads PEM-encoded certificate chains and private keys into a rustls
//! `TlsAcceptor`. [`plan_listener`] turns the configured material into an
//! explicit startup decision: serve HTTPS, or fall back to plain HTTP when
//! the material is absent or unusable.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;

use crate::config::ListenerSettings;

/// Errors that can occur when loading TLS configuration.
#[derive(Debug)]
pub enum TlsError {
    /// Only one of certificate and key was configured.
    Incomplete,
    /// Failed to read the certificate file.
    CertRead(std::io::Error),
    /// Failed to read the private key file.
    KeyRead(std::io::Error),
    /// No certificates found in the PEM file.
    NoCerts,
    /// No private key found in the PEM file.
    NoKey,
    /// Failed to build the TLS server configuration.
    Config(tokio_rustls::rustls::Error),
}

impl std::fmt::Display for TlsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Incomplete => write!(f, "TLS needs both a certificate and a key"),
            Self::CertRead(e) => write!(f, "failed to read TLS certificate file: {}", e),
            Self::KeyRead(e) => write!(f, "failed to read TLS key file: {}", e),
            Self::NoCerts => write!(f, "no certificates found in PEM file"),
            Self::NoKey => write!(f, "no private key found in PEM file"),
            Self::Config(e) => write!(f, "failed to build TLS config: {}", e),
        }
    }
}

impl std::error::Error for TlsError {}

/// Build a `TlsAcceptor` from a PEM certificate chain and private key.
pub fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, TlsError> {
    let certs = read_cert_chain(cert_path)?;
    let key = read_private_key(key_path)?;

    // Idempotent if a provider is already installed.
    let _ = tokio_rustls::rustls::crypto::aws_lc_rs::default_provider().install_default();

    tokio_rustls::rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map(|config| TlsAcceptor::from(Arc::new(config)))
        .map_err(TlsError::Config)
}

fn read_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let pem = std::fs::read(path).map_err(TlsError::CertRead)?;
    let chain = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(TlsError::CertRead)?;
    if chain.is_empty() {
        return Err(TlsError::NoCerts);
    }
    Ok(chain)
}

/// First PKCS8, RSA or SEC1 key in the file.
fn read_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let pem = std::fs::read(path).map_err(TlsError::KeyRead)?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(TlsError::KeyRead)?
        .ok_or(TlsError::NoKey)
}

/// Which listener the process will run.
pub enum ListenerPlan {
    Secure {
        bind: SocketAddr,
        acceptor: TlsAcceptor,
    },
    Insecure {
        bind: SocketAddr,
        /// Why TLS was abandoned, if it was attempted at all.
        fallback: Option<TlsError>,
    },
}

impl ListenerPlan {
    pub fn bind(&self) -> SocketAddr {
        match self {
            ListenerPlan::Secure { bind, .. } | ListenerPlan::Insecure { bind, .. } => *bind,
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, ListenerPlan::Secure { .. })
    }
}

/// Attempt TLS when material is configured; use plain HTTP otherwise or on
/// any TLS setup failure.
pub fn plan_listener(settings: &ListenerSettings) -> ListenerPlan {
    let attempt = match (&settings.tls_cert, &settings.tls_key) {
        (None, None) => {
            return ListenerPlan::Insecure {
                bind: settings.bind,
                fallback: None,
            }
        }
        (Some(cert), Some(key)) => load_tls_config(cert, key),
        _ => Err(TlsError::Incomplete),
    };

    match attempt {
        Ok(acceptor) => ListenerPlan::Secure {
            bind: settings.tls_bind,
            acceptor,
        },
        Err(e) => {
            tracing::warn!(error = %e, "TLS setup failed, falling back to plain HTTP");
            ListenerPlan::Insecure {
                bind: settings.bind,
                fallback: Some(e),
            }
        }
    }
}
