//! Peer sessions and entity replication on top of [`crate::net`].
//!
//! The host is peer 0 and every client connects to it directly. Clients'
//! entities reach the other clients by being replicated again by the host.

mod config;
mod entity_session;
mod error;
mod id_pool;
mod listener;
mod messages;
mod network_session;
mod peer;
mod shared_data;

pub use config::{EntityNetworkSessionConfig, NetworkSessionConfig};
pub use entity_session::EntityNetworkSession;
pub use error::SessionError;
pub use id_pool::NetworkIdPool;
pub use listener::{DefaultEntityNetworkListener, EntityNetworkListener, is_entity_in_view_default};
pub use messages::{ControlMessage, EntityMessageType};
pub use network_session::{NetworkSession, SessionEvent, SessionMode};
pub use peer::EntityNetworkRemotePeer;
pub use shared_data::{ClientSharedData, ViewRect};

pub type PeerId = u8;

/// Peer id of the session host.
pub const HOST_PEER_ID: PeerId = 0;
