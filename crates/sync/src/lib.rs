pub mod bytes;
pub mod config;
pub mod entity;
pub mod executor;
pub mod interpolation;
pub mod net;
pub mod session;

pub use bytes::{
    DeserializeError, Deserializer, Serializable, SerializationDictionary, Serializer,
    SerializerOptions,
};
pub use config::{BreadCrumb, ConfigMap, ConfigNode, ConfigNodeType, DeltaHints, NoHints};
pub use entity::{
    ComponentRegistry, EntityData, EntityDataDelta, EntityDataDeltaOptions, EntityError,
    EntityFactory, EntityId, EntitySerializationOptions, NetworkComponent, PrefabLibrary,
    SerializationMask, UpdateMode, World,
};
pub use executor::{ExecutionQueue, ExecutorError, ThreadPool};
pub use interpolation::{
    DataInterpolator, DataInterpolatorSet, DataInterpolatorSetRetriever,
    DeadReckoningInterpolator, LerpDataInterpolator, QuantizingDataInterpolator,
};
pub use net::{
    AckConnectionStats, AckUnreliableConnection, ChannelSettings, Connection, ConnectionStatus,
    LoopbackConnection, MessageQueue, MessageQueueConfig, NetError, NetworkStats,
    PacketLossSimulation, UdpConnection, UdpEndpoint,
};
pub use session::{
    ClientSharedData, EntityNetworkListener, EntityNetworkSession, EntityNetworkSessionConfig,
    NetworkSession, NetworkSessionConfig, PeerId, SessionError, SessionEvent, ViewRect,
};
