use std::{
    env, fs, io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

pub const BUILTIN_GATEWAY_CONFIG: &str = include_str!("data/gateway_config.json");
pub const CONFIG_PATH_ENV: &str = "WEBGATE_CONFIG_PATH";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub http: HttpConfig,
    pub storage: StorageConfig,
    pub bridge: BridgeConfig,
    pub host: HostConfig,
    pub logs: LogsConfig,
}

impl GatewayConfig {
    pub fn builtin() -> Self {
        serde_json::from_str(BUILTIN_GATEWAY_CONFIG).expect("builtin gateway config should parse")
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let config = GatewayConfig::from_json_str(&contents)?;
        Ok(config)
    }

    pub fn auth_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.auth_file)
    }

    pub fn audit_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.audit_file)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse gateway config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read gateway config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: SocketAddr,
    pub workers: usize,
    /// Prefer the first `X-Forwarded-For` address over the socket peer.
    pub trust_forwarded_for: bool,
    pub max_body_bytes: usize,
    /// Serve this file at `/` instead of the builtin dashboard.
    pub dashboard_path: Option<PathBuf>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 9876),
            workers: 8,
            trust_forwarded_for: true,
            max_body_bytes: 16 * 1024,
            dashboard_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub auth_file: String,
    pub audit_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            auth_file: "auth_config.txt".to_string(),
            audit_file: "operation_logs.txt".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub timeout_ms: u64,
    pub queue_capacity: usize,
    pub jobs_per_tick: usize,
}

impl BridgeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            queue_capacity: 256,
            jobs_per_tick: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub version: String,
    pub tick_rate_hz: u32,
    pub max_players: u32,
    pub sweep_interval_ticks: u64,
    pub realms: Vec<RealmConfig>,
}

impl HostConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate_hz.max(1)))
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            version: "webgate-host 0.1.0".to_string(),
            tick_rate_hz: 20,
            max_players: 20,
            sweep_interval_ticks: 1_200,
            realms: vec![RealmConfig::default()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RealmConfig {
    pub name: String,
    pub environment: String,
    pub seed: i64,
    pub loaded_chunks: u32,
    pub ambient_entities: u32,
}

impl Default for RealmConfig {
    fn default() -> Self {
        Self {
            name: "world".to_string(),
            environment: "NORMAL".to_string(),
            seed: 0,
            loaded_chunks: 0,
            ambient_entities: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    pub event_buffer_capacity: usize,
    pub recent_limit: usize,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            event_buffer_capacity: 1_000,
            recent_limit: 100,
        }
    }
}

/// Load `explicit`, else the file named by `WEBGATE_CONFIG_PATH`, else the builtin config.
///
/// Returns the path the config came from, `None` for the builtin. Runs before
/// logging is set up, so reporting the source is left to the caller.
pub fn load_gateway_config(
    explicit: Option<&Path>,
) -> Result<(GatewayConfig, Option<PathBuf>), ConfigError> {
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(|| env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));
    match path {
        Some(path) => Ok((GatewayConfig::from_file(&path)?, Some(path))),
        None => Ok((GatewayConfig::builtin(), None)),
    }
}
