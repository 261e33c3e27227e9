use std::{collections::HashMap, path::Path};

use anyhow::anyhow;
use fabric_bindings::ftp::FtpTargetConfig;
use fabric_core::config::{from_slice, read_file, RuntimeConfig};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub targets: HashMap<String, FtpTargetConfig>,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let file_content = read_file(path).await?;
        Self::from_slice(&file_content)
    }

    pub fn from_slice(content: &[u8]) -> anyhow::Result<Self> {
        from_slice(content)
    }

    pub fn target(&self, name: &str) -> anyhow::Result<&FtpTargetConfig> {
        self.targets.get(name).ok_or_else(|| {
            let mut known: Vec<_> = self.targets.keys().map(String::as_str).collect();
            known.sort_unstable();
            anyhow!("unknown target {name}, configured: [{}]", known.join(", "))
        })
    }
}
