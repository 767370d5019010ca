use crate::hardware::{HardwareProfile, RamParseError, Tagged};
use crate::loader::LoaderSettings;
use crate::node::NodeSpec;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

/// Port TCP d'écoute des cartes NetDIMM
pub const DEFAULT_DIMM_PORT: u16 = 10703;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct KernelConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default)]
    pub games: GamesConf,
    #[serde(default)]
    pub loader: LoaderSettings,
    #[serde(default)]
    pub nodes: Vec<NodeConf>,
    pub mqtt: Option<MqttConf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GamesConf {
    pub catalog: PathBuf,
    pub directory: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NodeConf {
    pub nickname: Option<String>,
    pub hostname: String,
    #[serde(default = "default_dimm_port")]
    pub port: u16,
    pub system: Tagged,
    pub monitor: Tagged,
    pub controls: Tagged,
    pub dimm_ram: String, // ex: "512MB"
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

fn default_dimm_port() -> u16 {
    DEFAULT_DIMM_PORT
}

impl Default for GamesConf {
    fn default() -> Self {
        Self {
            catalog: PathBuf::from("games.yaml"),
            directory: PathBuf::from("games"),
        }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            games: GamesConf::default(),
            loader: LoaderSettings::default(),
            nodes: Vec::new(),
            mqtt: None,
        }
    }
}

impl NodeConf {
    pub fn to_spec(&self) -> Result<NodeSpec, RamParseError> {
        Ok(NodeSpec {
            nickname: self.nickname.clone().unwrap_or_else(|| self.hostname.clone()),
            hostname: self.hostname.clone(),
            port: self.port,
            profile: HardwareProfile {
                system: self.system.clone(),
                monitor: self.monitor.clone(),
                controls: self.controls.clone(),
                dimm_ram: self.dimm_ram.parse()?,
            },
        })
    }
}

impl KernelConfig {
    /// Specs des nodes valides ; une RAM mal formée écarte le node avec un warning
    pub fn node_specs(&self) -> Vec<NodeSpec> {
        self.nodes
            .iter()
            .filter_map(|conf| match conf.to_spec() {
                Ok(spec) => Some(spec),
                Err(e) => {
                    warn!(hostname = %conf.hostname, "skipping node with invalid config: {e}");
                    None
                }
            })
            .collect()
    }
}

pub fn parse_config(txt: &str) -> Result<KernelConfig, serde_yaml::Error> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    serde_yaml::from_str(txt)
}

/// Charge la config depuis $DIMMHUB_CONFIG (défaut dimmhub.yaml).
/// Fichier absent ou invalide : config par défaut.
pub async fn load_config() -> KernelConfig {
    let path = std::env::var("DIMMHUB_CONFIG").unwrap_or_else(|_| "dimmhub.yaml".into());
    load_config_from(Path::new(&path)).await
}

pub async fn load_config_from(path: &Path) -> KernelConfig {
    if !path.exists() {
        warn!(path = %path.display(), "no config file, using defaults");
        return KernelConfig::default();
    }

    let txt = fs::read_to_string(path).await.unwrap_or_else(|e| {
        warn!(path = %path.display(), "failed to read config: {e}");
        String::new()
    });
    match parse_config(&txt) {
        Ok(cfg) => {
            info!(path = %path.display(), nodes = cfg.nodes.len(), "loaded config");
            cfg
        }
        Err(e) => {
            warn!(path = %path.display(), "invalid config: {e}");
            KernelConfig::default()
        }
    }
}
