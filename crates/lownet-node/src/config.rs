use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node: NodeIdentity,
    pub radio: RadioConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub local_id: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioConfig {
    pub bind_addr: String,
    pub broadcast_addr: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node: NodeIdentity { local_id: 0x01 },
            radio: RadioConfig {
                bind_addr: String::from("0.0.0.0:7878"),
                broadcast_addr: String::from("255.255.255.255:7878"),
            },
        }
    }
}

impl NodeConfig {
    pub fn config_path() -> PathBuf {
        PathBuf::from("lownet-node.toml")
    }

    /// Loads config from `path`, or returns the default if it doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(Self::config_path(), contents)?;
        Ok(())
    }
}
