use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use xenon_net_backend::BackendKind;

/// Host networking settings for one bridge.
///
/// Missing JSON fields fall back to [`BridgeConfig::default`], which leaves bridging disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    pub enabled: bool,
    pub backend: BackendKind,
    /// Variant-specific configuration, e.g. `tap0:192.168.1.1/24` for a tap backend.
    pub backend_config: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read bridge config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid bridge config: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl BridgeConfig {
    /// An enabled configuration for `backend`.
    pub fn with_backend(backend: BackendKind, backend_config: impl Into<String>) -> Self {
        Self {
            enabled: true,
            backend,
            backend_config: backend_config.into(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }
}
