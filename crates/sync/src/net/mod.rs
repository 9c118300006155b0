mod ack;
mod connection;
mod error;
mod loopback;
mod message_queue;
mod packet;
mod sequence;
mod stats;
mod udp;

pub use ack::{AckUnreliableConnection, SubPacket, DATAGRAM_HEADER_SIZE, MAX_SUB_PACKET_SIZE};
pub use connection::{Connection, ConnectionStatus};
pub use error::NetError;
pub use loopback::LoopbackConnection;
pub use message_queue::{ChannelSettings, MessageQueue, MessageQueueConfig, MAX_CHANNELS};
pub use packet::{InboundPacket, OutboundPacket};
pub use sequence::{sequence_distance, sequence_greater_than};
pub use stats::{AckConnectionStats, NetworkStats, PacketLossSimulation, PacketState, PacketStats};
pub use udp::{UdpConnection, UdpEndpoint, MAX_DATAGRAM_SIZE};
