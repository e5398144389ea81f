//! Gateway configuration.
//!
//! Values come from three layers, highest precedence first: command-line
//! flags (each with an environment variable fallback), an optional TOML
//! file, and built-in defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::upstream::{UpstreamSettings, DEFAULT_REQUEST_TIMEOUT};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_TLS_PORT: u16 = 3443;
pub const DEFAULT_NODE: &str = "pve";

/// Where the gateway listens and with which TLS material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerSettings {
    /// Plain HTTP address, also used when TLS setup fails.
    pub bind: SocketAddr,
    pub tls_bind: SocketAddr,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listener: ListenerSettings,
    pub upstream: UpstreamSettings,
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bind: Option<SocketAddr>,
    pub tls_bind: Option<SocketAddr>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub upstream_url: Option<String>,
    pub upstream_token: Option<String>,
    pub node: Option<String>,
    pub upstream_timeout_secs: Option<u64>,
    pub verify_upstream_tls: Option<bool>,
}

/// Contents of the optional TOML config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub listener: FileListener,
    #[serde(default)]
    pub upstream: FileUpstream,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileListener {
    pub bind: Option<SocketAddr>,
    pub tls_bind: Option<SocketAddr>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileUpstream {
    pub url: Option<String>,
    pub token: Option<String>,
    pub node: Option<String>,
    pub timeout_secs: Option<u64>,
    pub verify_tls: Option<bool>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn any_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], port))
}

impl GatewayConfig {
    /// Merge overrides over the file over defaults.
    pub fn resolve(overrides: Overrides, file: FileConfig) -> Result<Self, ConfigError> {
        let FileConfig { listener, upstream } = file;

        let listener = ListenerSettings {
            bind: overrides
                .bind
                .or(listener.bind)
                .unwrap_or_else(|| any_addr(DEFAULT_PORT)),
            tls_bind: overrides
                .tls_bind
                .or(listener.tls_bind)
                .unwrap_or_else(|| any_addr(DEFAULT_TLS_PORT)),
            tls_cert: overrides.tls_cert.or(listener.tls_cert),
            tls_key: overrides.tls_key.or(listener.tls_key),
        };

        let base_url = overrides
            .upstream_url
            .or(upstream.url)
            .filter(|u| !u.trim().is_empty())
            .ok_or(ConfigError::Missing("upstream URL"))?;
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(ConfigError::Invalid {
                name: "upstream URL",
                reason: format!("{base_url} is not an http(s) URL"),
            });
        }

        let token = overrides
            .upstream_token
            .or(upstream.token)
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::Missing("upstream token"))?;

        let timeout = match overrides.upstream_timeout_secs.or(upstream.timeout_secs) {
            Some(0) => {
                return Err(ConfigError::Invalid {
                    name: "upstream timeout",
                    reason: "must be at least one second".to_string(),
                })
            }
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_REQUEST_TIMEOUT,
        };

        let upstream = UpstreamSettings {
            base_url,
            token,
            node: overrides
                .node
                .or(upstream.node)
                .unwrap_or_else(|| DEFAULT_NODE.to_string()),
            timeout,
            verify_tls: overrides
                .verify_upstream_tls
                .or(upstream.verify_tls)
                .unwrap_or(false),
        };

        Ok(Self { listener, upstream })
    }
}
