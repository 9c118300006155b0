use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use entwine::{EntityNetworkSessionConfig, NetworkSessionConfig, PacketLossSimulation};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub tick_rate: u32,
    /// Half extent of the area around the avatar this node wants to see.
    pub view_half_size: i32,
    /// Radius of the circle the avatar walks.
    pub orbit_radius: f32,
    /// Seconds over which received positions are blended.
    pub interpolation_time: f32,
    pub packet_loss: Option<PacketLossSimulation>,
    pub session: NetworkSessionConfig,
    pub entities: EntityNetworkSessionConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            view_half_size: 512,
            orbit_radius: 200.0,
            interpolation_time: 0.1,
            packet_loss: None,
            session: NetworkSessionConfig::default(),
            entities: EntityNetworkSessionConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }
}
