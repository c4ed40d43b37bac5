use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::buffer::DEFAULT_BUFFER_SIZE;
use crate::buffer::charset::DEFAULT_ENCODING;
use crate::uri::RequestPolicy;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub connector: ConnectorConfig,
    pub pool: PoolConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP/1.1 listener.
    pub listen_addr: String,
    /// Wire-protocol listener; disabled when unset.
    pub wire_addr: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Announced in the WELCOME packet.
    pub server_id: i32,
    pub default_encoding: String,
    pub buffer_size: usize,
    pub session_param: String,
    pub session_cookie: String,
    pub strict_normalization: bool,
    pub allow_encoded_slash: bool,
    /// How long a closing connection waits for its handlers.
    pub handler_stop_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    pub min_processors: usize,
    pub max_processors: usize,
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            wire_addr: None,
        }
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            server_id: 0,
            default_encoding: DEFAULT_ENCODING.to_string(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            session_param: "jsessionid".to_string(),
            session_cookie: "JSESSIONID".to_string(),
            strict_normalization: false,
            allow_encoded_slash: false,
            handler_stop_timeout_ms: 5000,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_processors: 5,
            max_processors: 20,
            shutdown_timeout_ms: 5000,
        }
    }
}

impl ConnectorConfig {
    pub fn request_policy(&self) -> RequestPolicy {
        RequestPolicy {
            session_param: self.session_param.clone(),
            session_cookie: self.session_cookie.clone(),
            strict: self.strict_normalization,
            allow_encoded_slash: self.allow_encoded_slash,
        }
    }

    pub fn handler_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_stop_timeout_ms)
    }
}

impl PoolConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Config {
    /// Loads the YAML file named by `COUPLER_CONFIG` when set, then applies
    /// the `LISTEN` and `WIRE_LISTEN` overrides.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var("COUPLER_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        if let Ok(addr) = std::env::var("LISTEN") {
            cfg.server.listen_addr = addr;
        }
        if let Ok(addr) = std::env::var("WIRE_LISTEN") {
            cfg.server.wire_addr = Some(addr);
        }
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        let cfg: Config = serde_yaml::from_str(text)?;
        if cfg.pool.max_processors == 0 {
            anyhow::bail!("pool.max_processors must be at least 1");
        }
        if cfg.pool.min_processors > cfg.pool.max_processors {
            anyhow::bail!("pool.min_processors exceeds pool.max_processors");
        }
        Ok(cfg)
    }
}
