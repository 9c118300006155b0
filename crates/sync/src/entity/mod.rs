mod data;
mod delta;
mod error;
mod factory;
mod network;
mod prefab;
mod registry;
mod world;

pub use data::EntityData;
pub use delta::{DeltaFields, EntityDataDelta, EntityDataDeltaOptions};
pub use error::EntityError;
pub use factory::{EntityFactory, EntitySerializationOptions, UpdateMode};
pub use network::NetworkComponent;
pub use prefab::PrefabLibrary;
pub use registry::{ComponentRegistry, SerializationMask};
pub use world::{Entity, EntityId, World};

/// Component holding a 2D transform; entities without it count as everywhere.
pub const TRANSFORM_COMPONENT: &str = "Transform";
pub const POSITION_FIELD: &str = "position";
