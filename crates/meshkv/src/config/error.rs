use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse TOML from '{path}': {source}")]
    TomlDeserialization {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize configuration for '{path}': {source}")]
    TomlSerialization {
        path: String,
        #[source]
        source: toml::ser::Error,
    },
    #[error("configuration validation failed: {reason}")]
    Validation { reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
