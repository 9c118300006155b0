use uuid::Uuid;

use super::EntityId;

#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    #[error("unknown prefab '{0}'")]
    UnknownPrefab(String),
    #[error("entity {0} does not exist")]
    MissingEntity(EntityId),
    #[error("uuid {0} does not resolve to an entity")]
    UnresolvedUuid(Uuid),
    #[error("an entity with uuid {0} already exists")]
    DuplicateUuid(Uuid),
    #[error("cannot parent {child} under {parent}")]
    InvalidParent { child: EntityId, parent: EntityId },
    #[error("invalid entity data: {0}")]
    InvalidData(String),
}
