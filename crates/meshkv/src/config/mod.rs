use error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub mod error;

const CONFIG_FILE_NAME: &str = "config.toml";

/// Everything a node needs to start: its own identity and port, the three
/// periodic loop intervals, and the set of addresses to contact first.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NodeConfig {
    pub node_id: String,
    pub bind_port: u16,
    pub sync_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub peer_timeout_secs: u64,
    pub bootstrap_peers: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "node-1".to_string(),
            bind_port: 7878,
            sync_interval_secs: 10,
            heartbeat_interval_secs: 5,
            peer_timeout_secs: 15,
            bootstrap_peers: Vec::new(),
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.trim().is_empty() {
            return Err(ConfigError::Validation {
                reason: "node_id cannot be empty".to_string(),
            });
        }

        if self.sync_interval_secs == 0 || self.heartbeat_interval_secs == 0 || self.peer_timeout_secs == 0 {
            return Err(ConfigError::Validation {
                reason: "intervals must be greater than zero".to_string(),
            });
        }

        for peer in &self.bootstrap_peers {
            if SocketAddr::from_str(peer).is_err() {
                return Err(ConfigError::Validation {
                    reason: format!("invalid bootstrap peer address '{peer}', expected 'IP:PORT'"),
                });
            }
        }

        Ok(())
    }

    /// Parsed bootstrap addresses, skipping (and logging) any that fail to
    /// parse — `validate()` should already have caught these at load time,
    /// but a config edited after load-time is handled defensively here too.
    pub fn bootstrap_addrs(&self) -> Vec<SocketAddr> {
        self.bootstrap_peers
            .iter()
            .filter_map(|raw| match SocketAddr::from_str(raw) {
                Ok(addr) => Some(addr),
                Err(_) => {
                    log::warn!("skipping unparseable bootstrap peer '{raw}'");
                    None
                }
            })
            .collect()
    }
}

/// Loads `config.toml` from the current directory, or writes and returns a
/// default one if it doesn't exist yet.
pub fn handle() -> Result<NodeConfig, ConfigError> {
    let config_path = PathBuf::from(CONFIG_FILE_NAME);
    if config_path.exists() {
        let config_content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Io {
            path: config_path.display().to_string(),
            source,
        })?;
        let config: NodeConfig =
            toml::from_str(&config_content).map_err(|source| ConfigError::TomlDeserialization {
                path: config_path.display().to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    } else {
        let config = NodeConfig::default();
        save(&config, &config_path)?;
        Ok(config)
    }
}

fn save(config: &NodeConfig, path: &Path) -> Result<(), ConfigError> {
    let config_content = toml::to_string_pretty(config).map_err(|source| ConfigError::TomlSerialization {
        path: path.display().to_string(),
        source,
    })?;
    let mut file = fs::File::create(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    file.write_all(config_content.as_bytes())
        .map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
    Ok(())
}
