use drdash_core::{DEFAULT_STATUS_EVENT_TAIL, DashError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Overrides the host name reported as this node's backend identity.
    #[serde(default)]
    pub backend_name: Option<String>,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub uploads: UploadsConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub headers: HeadersConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

/// Shared upload directory and the URL prefix it is published under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadsConfig {
    #[serde(default = "default_uploads_dir")]
    pub base_dir: PathBuf,
    #[serde(default = "default_uploads_url")]
    pub base_url: String,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            base_dir: default_uploads_dir(),
            base_url: default_uploads_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Node role endpoints, e.g. `http://10.0.0.11:8008/patroni`.
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default = "default_cluster_timeout_ms")]
    pub timeout_ms: u64,
}

impl ClusterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            timeout_ms: default_cluster_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Shared token for the probe endpoints. Required; a blank value counts as
    /// unset.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_token_header")]
    pub header: String,
}

impl AuthConfig {
    pub fn token(&self) -> Option<&str> {
        self.token
            .as_deref()
            .filter(|value| !value.trim().is_empty())
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token: None,
            header: default_token_header(),
        }
    }
}

/// Names of the identity headers injected by the load balancer and backend
/// web server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadersConfig {
    #[serde(default = "default_frontend_header")]
    pub frontend: String,
    #[serde(default = "default_backend_header")]
    pub backend: String,
}

impl Default for HeadersConfig {
    fn default() -> Self {
        Self {
            frontend: default_frontend_header(),
            backend: default_backend_header(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_status_tail")]
    pub status_tail: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            status_tail: default_status_tail(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/drdash")
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("/var/lib/drdash/uploads")
}

fn default_uploads_url() -> String {
    "/uploads".to_string()
}

fn default_cluster_timeout_ms() -> u64 {
    1500
}

fn default_token_header() -> String {
    "X-DRD-Token".to_string()
}

fn default_frontend_header() -> String {
    "X-Frontend-Host".to_string()
}

fn default_backend_header() -> String {
    "X-Backend-Host".to_string()
}

fn default_status_tail() -> usize {
    DEFAULT_STATUS_EVENT_TAIL
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(
                ::config::Environment::with_prefix("DRDASH")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| DashError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| DashError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bind_addr.trim().is_empty() {
            return Err(DashError::Config("bind_addr cannot be empty".to_string()));
        }
        if self.cluster.timeout_ms == 0 {
            return Err(DashError::Config(
                "cluster.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.auth.header.trim().is_empty() {
            return Err(DashError::Config("auth.header cannot be empty".to_string()));
        }
        if self.auth.token().is_none() {
            return Err(DashError::Config(
                "auth.token must be set to a non-blank value".to_string(),
            ));
        }
        if let Some(endpoint) = self
            .cluster
            .endpoints
            .iter()
            .find(|endpoint| endpoint.trim().is_empty())
        {
            return Err(DashError::Config(format!(
                "cluster.endpoints contains a blank entry: {:?}",
                endpoint
            )));
        }
        Ok(())
    }
}
