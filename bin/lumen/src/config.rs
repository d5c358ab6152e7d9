//! Node configuration file.

use std::fs;
use std::path::Path;

use eyre::Result;
use lumen_server::ServerArgs;
use serde::{Deserialize, Serialize};

/// Contents of the TOML configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct NodeConfig {
    pub(crate) light: ServerArgs,
}

impl NodeConfig {
    /// Load the configuration from `path`, or write the defaults there if it
    /// does not exist.
    pub(crate) fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub(crate) fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }

    /// Apply command line arguments on top of the file. Flags left at their
    /// defaults keep the file's value.
    pub(crate) fn apply_cli_args(&mut self, light: &ServerArgs) {
        self.light = self.light.clone().merge(light);
    }
}
