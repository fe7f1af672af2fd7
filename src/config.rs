//! Startup configuration
//!
//! Defaults, then an optional YAML file named by `PIPELINE_CONFIG`, then the
//! `PORT` and `BACKENDS` environment variables. Empty variables count as
//! unset.
//!
//! ```yaml
//! port: 8080
//! backends:
//!   - 127.0.0.1:3000
//!   - http://localhost:3001
//! ```

use serde::Deserialize;
use url::Url;

use crate::error::ProxyError;

pub const DEFAULT_PORT: u16 = 8080;

pub const DEFAULT_BACKENDS: &[&str] = &["127.0.0.1:3000", "127.0.0.1:3001"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    /// Normalised `host:port` addresses, in round-robin order.
    pub backends: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    port: Option<u16>,
    backends: Option<Vec<String>>,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn load() -> Result<Self, ProxyError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup` instead of the real environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ProxyError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let file = match var("PIPELINE_CONFIG") {
            Some(path) => {
                let text = std::fs::read_to_string(&path).map_err(|e| {
                    ProxyError::Configuration(format!("cannot read {path}: {e}"))
                })?;
                parse_file(&text)?
            }
            None => FileConfig::default(),
        };

        let port = match var("PORT") {
            Some(port) => port.trim().parse::<u16>().map_err(|_| {
                ProxyError::Configuration(format!("invalid PORT value {port:?}"))
            })?,
            None => file.port.unwrap_or(DEFAULT_PORT),
        };

        let backends = match var("BACKENDS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            None => file
                .backends
                .unwrap_or_else(|| DEFAULT_BACKENDS.iter().map(|s| s.to_string()).collect()),
        };

        Self::new(port, backends)
    }

    /// Parses a YAML document; addresses missing from it fall back to the
    /// defaults.
    pub fn from_yaml_str(text: &str) -> Result<Self, ProxyError> {
        let file = parse_file(text)?;
        Self::new(
            file.port.unwrap_or(DEFAULT_PORT),
            file.backends
                .unwrap_or_else(|| DEFAULT_BACKENDS.iter().map(|s| s.to_string()).collect()),
        )
    }

    /// Validates and normalises the backend list.
    pub fn new(port: u16, backends: Vec<String>) -> Result<Self, ProxyError> {
        if backends.is_empty() {
            return Err(ProxyError::Configuration(
                "at least one backend address is required".to_string(),
            ));
        }

        let backends = backends
            .iter()
            .map(|b| normalize_backend(b))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { port, backends })
    }

    /// Address the listener binds to: every interface on the configured port.
    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

fn parse_file(text: &str) -> Result<FileConfig, ProxyError> {
    // An empty document deserializes to null; treat it as "nothing set"
    if text.trim().is_empty() {
        return Ok(FileConfig::default());
    }
    serde_yaml::from_str(text)
        .map_err(|e| ProxyError::Configuration(format!("invalid config file: {e}")))
}

/// Turns `host:port`, `[v6]:port` or `http://host[:port]` into `host:port`.
pub fn normalize_backend(raw: &str) -> Result<String, ProxyError> {
    let raw = raw.trim();
    let invalid = |why: &str| ProxyError::Configuration(format!("invalid backend {raw:?}: {why}"));

    let url = if raw.contains("://") {
        let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        match url.scheme() {
            "http" | "tcp" => {}
            "https" => return Err(invalid("TLS backends are not supported")),
            other => return Err(invalid(&format!("unsupported scheme {other}"))),
        }
        url
    } else {
        Url::parse(&format!("tcp://{raw}")).map_err(|e| invalid(&e.to_string()))?
    };

    if !matches!(url.path(), "" | "/") || url.query().is_some() {
        return Err(invalid("backend address cannot carry a path"));
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid("missing host"))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| invalid("missing port"))?;

    Ok(format!("{host}:{port}"))
}
