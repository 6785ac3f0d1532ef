use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::engine::availability::ProbeConfig;
use crate::engine::collector::CollectorConfig;
use crate::engine::polling::PollingConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file at {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("Failed to load config from environment: {0}")]
    Env(#[from] envy::Error),
    #[error("{0} is required")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub database_url: String,
    pub listen_address: String,
    pub log_dir: String,
    pub collector_path: String,
    pub collector_args: Vec<String>,
    pub collector_timeout_secs: u64,
    pub max_concurrent_collectors: usize,
    pub ping_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub polling_interval_secs: u64,
    pub min_poll_interval_secs: Option<u64>,
    pub discovery_request_timeout_secs: u64,
    pub auto_create_schema: bool,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
pub struct PartialServerConfig {
    pub database_url: Option<String>,
    pub listen_address: Option<String>,
    pub log_dir: Option<String>,
    pub collector_path: Option<String>,
    pub collector_args: Option<Vec<String>>,
    pub collector_timeout_secs: Option<u64>,
    pub max_concurrent_collectors: Option<usize>,
    pub ping_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub polling_interval_secs: Option<u64>,
    pub min_poll_interval_secs: Option<u64>,
    pub discovery_request_timeout_secs: Option<u64>,
    pub auto_create_schema: Option<bool>,
}

fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_collector_path() -> String {
    "go/nms-plugin".to_string()
}

impl ServerConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        // 1. Load from file (optional)
        let file_config = match config_path {
            Some(path) if Path::new(path).exists() => Self::read_file(path)?,
            _ => PartialServerConfig::default(),
        };

        // 2. Load from environment variables
        let env_config = envy::from_env::<PartialServerConfig>()?;

        // 3. Merge: environment overrides file
        Self::merge(file_config, env_config)
    }

    pub fn read_file(path: &str) -> Result<PartialServerConfig, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    pub fn merge(
        file: PartialServerConfig,
        env: PartialServerConfig,
    ) -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            database_url: env
                .database_url
                .or(file.database_url)
                .ok_or(ConfigError::Missing("DATABASE_URL"))?,
            listen_address: env
                .listen_address
                .or(file.listen_address)
                .unwrap_or_else(default_listen_address),
            log_dir: env.log_dir.or(file.log_dir).unwrap_or_else(default_log_dir),
            collector_path: env
                .collector_path
                .or(file.collector_path)
                .unwrap_or_else(default_collector_path),
            collector_args: env
                .collector_args
                .or(file.collector_args)
                .unwrap_or_default(),
            collector_timeout_secs: env
                .collector_timeout_secs
                .or(file.collector_timeout_secs)
                .unwrap_or(30),
            max_concurrent_collectors: env
                .max_concurrent_collectors
                .or(file.max_concurrent_collectors)
                .unwrap_or(2),
            ping_timeout_ms: env.ping_timeout_ms.or(file.ping_timeout_ms).unwrap_or(2000),
            connect_timeout_ms: env
                .connect_timeout_ms
                .or(file.connect_timeout_ms)
                .unwrap_or(2000),
            polling_interval_secs: env
                .polling_interval_secs
                .or(file.polling_interval_secs)
                .unwrap_or(10),
            min_poll_interval_secs: env.min_poll_interval_secs.or(file.min_poll_interval_secs),
            discovery_request_timeout_secs: env
                .discovery_request_timeout_secs
                .or(file.discovery_request_timeout_secs)
                .unwrap_or(60),
            auto_create_schema: env
                .auto_create_schema
                .or(file.auto_create_schema)
                .unwrap_or(true),
        })
    }

    pub fn collector(&self) -> CollectorConfig {
        CollectorConfig {
            binary_path: self.collector_path.clone().into(),
            args: self.collector_args.clone(),
            timeout: Duration::from_secs(self.collector_timeout_secs),
            max_concurrent: self.max_concurrent_collectors.max(1),
        }
    }

    pub fn probe(&self) -> ProbeConfig {
        ProbeConfig {
            ping_timeout: Duration::from_millis(self.ping_timeout_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    pub fn polling(&self) -> PollingConfig {
        PollingConfig {
            // A zero period would make the timer panic.
            interval: Duration::from_secs(self.polling_interval_secs.max(1)),
            min_poll_interval: self.min_poll_interval_secs.map(Duration::from_secs),
        }
    }

    pub fn discovery_request_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_request_timeout_secs)
    }
}
