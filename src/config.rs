use crate::gateway;
use crate::net::Connection;
use crate::register::{Descriptor, WritePoint};

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Register map of the ectoControl adapter shipped with the binary.
pub const BUNDLED: &str = include_str!("../config/ectocontrol.toml");

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FileType {
    Toml,
    Json,
}

impl FileType {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_lowercase().as_str() {
            "toml" => Some(FileType::Toml),
            "json" => Some(FileType::Json),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AppConfig {
    /// Link to the adapter. The command line takes precedence.
    #[serde(default)]
    pub connection: Option<Connection>,
    #[serde(default)]
    pub gateway: gateway::Config,
    #[serde(default)]
    pub registers: Vec<Descriptor>,
    #[serde(default)]
    pub writes: Vec<WritePoint>,
}

impl AppConfig {
    pub fn bundled() -> anyhow::Result<Self> {
        toml::from_str(BUNDLED).context("Failed to deserialize bundled register map")
    }

    /// Read the configuration from file. The format follows the file extension.
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        match FileType::from_path(path) {
            Some(FileType::Toml) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read TOML file {}", path.display()))?;
                toml::from_str(&content).context("Failed to deserialize TOML")
            }
            Some(FileType::Json) => {
                let file = File::open(path)
                    .with_context(|| format!("Failed to open JSON file {}", path.display()))?;
                serde_json::from_reader(BufReader::new(file)).context("Failed to deserialize JSON")
            }
            None => Err(anyhow!(
                "Unknown configuration format of {}, expected .toml or .json",
                path.display()
            )),
        }
    }

    pub fn write_point(&self, name: &str) -> Option<&WritePoint> {
        self.writes.iter().find(|w| w.name == name)
    }

    pub fn descriptor(&self, name: &str) -> Option<&Descriptor> {
        self.registers.iter().find(|d| d.name == name)
    }
}
