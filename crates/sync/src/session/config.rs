use serde::{Deserialize, Serialize};

use crate::bytes::CURRENT_VERSION;
use crate::net::MessageQueueConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityNetworkSessionConfig {
    /// Seconds between two updates of the same entity to the same peer.
    pub min_send_interval: f32,
    /// Seconds without traffic before a keep-alive is sent.
    pub max_keep_alive_interval: f32,
    /// Seconds of silence after which a replicating peer is dropped.
    pub peer_timeout: f32,
    /// World units added around a peer's view rect for interest checks.
    pub view_margin: i32,
    pub serialization_version: u8,
}

impl Default for EntityNetworkSessionConfig {
    fn default() -> Self {
        Self {
            min_send_interval: 0.05,
            max_keep_alive_interval: 1.0,
            peer_timeout: 10.0,
            view_margin: 256,
            serialization_version: CURRENT_VERSION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSessionConfig {
    /// Peers with a different version are rejected during the handshake.
    pub network_version: u32,
    /// Including the host.
    pub max_peers: u8,
    /// Seconds between unprompted resends of a client's shared data.
    pub shared_data_interval: f32,
    pub queue: MessageQueueConfig,
}

impl Default for NetworkSessionConfig {
    fn default() -> Self {
        Self {
            network_version: 1,
            max_peers: 8,
            shared_data_interval: 1.0,
            queue: MessageQueueConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: EntityNetworkSessionConfig = toml::from_str("min_send_interval = 0.1").unwrap();
        assert_eq!(config.min_send_interval, 0.1);
        assert_eq!(config.view_margin, 256);

        let config: NetworkSessionConfig =
            toml::from_str("max_peers = 4\n[queue]\nmax_datagram_payload = 1200").unwrap();
        assert_eq!(config.max_peers, 4);
        assert_eq!(config.queue.max_datagram_payload, 1200);
        assert_eq!(config.queue.resend_latency_factor, 1.8);
    }
}
