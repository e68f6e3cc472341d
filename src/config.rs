use std::{env, fmt, net::SocketAddr, sync::Arc};

use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_VERSION: &str = "1.0.0";
pub const WILDCARD_ORIGIN: &str = "*";

/// Rewrites a tool's input schema before it is advertised by `tools/list`.
pub type SchemaAdapter = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Ordered list of origins allowed to receive CORS headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsOrigins(Vec<String>);

impl CorsOrigins {
    /// Matches byte-for-byte, so header values that are not visible ASCII
    /// still pass a wildcard.
    pub fn allows(&self, origin: impl AsRef<[u8]>) -> bool {
        let origin = origin.as_ref();
        self.0
            .iter()
            .any(|allowed| allowed == WILDCARD_ORIGIN || allowed.as_bytes() == origin)
    }
}

impl Default for CorsOrigins {
    fn default() -> Self {
        Self(vec![WILDCARD_ORIGIN.to_string()])
    }
}

impl From<&str> for CorsOrigins {
    fn from(origin: &str) -> Self {
        Self(vec![origin.to_string()])
    }
}

impl From<String> for CorsOrigins {
    fn from(origin: String) -> Self {
        Self(vec![origin])
    }
}

impl From<Vec<String>> for CorsOrigins {
    fn from(origins: Vec<String>) -> Self {
        Self(origins)
    }
}

impl From<Vec<&str>> for CorsOrigins {
    fn from(origins: Vec<&str>) -> Self {
        Self(origins.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for CorsOrigins {
    fn from(origins: [&str; N]) -> Self {
        Self(origins.into_iter().map(str::to_string).collect())
    }
}

/// Input to [`crate::create_edge_server`].
///
/// Only `name` is required; every other field falls back to a default when
/// left unset.
#[derive(Clone)]
pub struct EdgeConfig {
    pub name: String,
    pub version: Option<String>,
    pub cors_origins: Option<CorsOrigins>,
    pub enable_logging: Option<bool>,
    pub schema_adapter: Option<SchemaAdapter>,
    pub base_path: Option<String>,
}

impl EdgeConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            cors_origins: None,
            enable_logging: None,
            schema_adapter: None,
            base_path: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_cors_origins(mut self, origins: impl Into<CorsOrigins>) -> Self {
        self.cors_origins = Some(origins.into());
        self
    }

    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.enable_logging = Some(enabled);
        self
    }

    pub fn with_schema_adapter<F>(mut self, adapter: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.schema_adapter = Some(Arc::new(adapter));
        self
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = Some(base_path.into());
        self
    }

    pub fn resolved_version(&self) -> &str {
        self.version.as_deref().unwrap_or(DEFAULT_VERSION)
    }

    /// Logging stays on unless it was switched off explicitly.
    pub fn logging_enabled(&self) -> bool {
        self.enable_logging != Some(false)
    }

    pub fn allowed_origins(&self) -> CorsOrigins {
        self.cors_origins.clone().unwrap_or_default()
    }

    /// Normalized prefix to mount under, or `None` when routes stay at the root.
    pub fn mount_path(&self) -> Option<String> {
        self.base_path.as_deref().and_then(normalize_base_path)
    }
}

impl fmt::Debug for EdgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeConfig")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("cors_origins", &self.cors_origins)
            .field("enable_logging", &self.enable_logging)
            .field("schema_adapter", &self.schema_adapter.as_ref().map(|_| ".."))
            .field("base_path", &self.base_path)
            .finish()
    }
}

/// Trims the raw path, forces a single leading `/` and drops trailing ones.
///
/// Blank input and the bare root both yield `None`: nesting at `/` is the same
/// as not nesting at all.
pub fn normalize_base_path(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        return None;
    }

    Some(format!("/{trimmed}"))
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("MCP_ENABLE_LOGGING must be one of: true, false, 1, 0, yes, no, on, off")]
    InvalidLoggingFlag,
    #[error("invalid bind address or port")]
    InvalidSocket,
}

/// Process-level settings for the standalone binary.
#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub edge: EdgeConfig,
    pub bind_addr: String,
    pub bind_port: u16,
}

impl ServeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let name = non_blank("MCP_SERVER_NAME").unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
        let mut edge = EdgeConfig::new(name);

        if let Some(version) = non_blank("MCP_SERVER_VERSION") {
            edge = edge.with_version(version);
        }

        if let Some(origins) = non_blank("MCP_CORS_ORIGINS") {
            let origins = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .collect::<Vec<_>>();
            edge = edge.with_cors_origins(origins);
        }

        if let Some(flag) = non_blank("MCP_ENABLE_LOGGING") {
            edge = edge.with_logging(parse_flag(&flag)?);
        }

        if let Some(base_path) = lookup("MCP_BASE_PATH") {
            edge = edge.with_base_path(base_path);
        }

        let bind_addr = non_blank("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".to_string());
        let bind_port = non_blank("BIND_PORT")
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(8080);

        let config = Self {
            edge,
            bind_addr,
            bind_port,
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}

fn parse_flag(value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidLoggingFlag),
    }
}
