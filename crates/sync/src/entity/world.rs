use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{ConfigMap, ConfigNode};

use super::{EntityError, NetworkComponent};

/// Generational handle into the [`World`]. Stale handles resolve to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    index: u32,
    generation: u32,
}

impl EntityId {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

#[derive(Debug)]
pub struct Entity {
    uuid: Uuid,
    parent: Option<EntityId>,
    children: Vec<EntityId>,
    pub name: String,
    pub icon: String,
    pub prefab: String,
    pub prefab_uuid: Uuid,
    pub components: ConfigMap,
    pub network: Option<NetworkComponent>,
}

impl Entity {
    fn new(uuid: Uuid, name: String) -> Self {
        Self {
            uuid,
            parent: None,
            children: Vec::new(),
            name,
            icon: String::new(),
            prefab: String::new(),
            prefab_uuid: Uuid::nil(),
            components: ConfigMap::new(),
            network: None,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn parent(&self) -> Option<EntityId> {
        self.parent
    }

    pub fn children(&self) -> &[EntityId] {
        &self.children
    }

    /// Key used to pair this entity with its serialized counterpart.
    pub fn match_uuid(&self) -> Uuid {
        if self.prefab_uuid.is_nil() {
            self.uuid
        } else {
            self.prefab_uuid
        }
    }

    pub fn component(&self, name: &str) -> Option<&ConfigNode> {
        self.components.get(name)
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    entity: Option<Entity>,
}

/// Entity store the synchronizer reads from and writes into.
#[derive(Debug, Default)]
pub struct World {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_uuid: HashMap<Uuid, EntityId>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self, name: impl Into<String>) -> EntityId {
        let mut uuid = Uuid::new_v4();
        while self.by_uuid.contains_key(&uuid) {
            uuid = Uuid::new_v4();
        }
        self.insert(Entity::new(uuid, name.into()))
    }

    pub fn spawn_with_uuid(
        &mut self,
        uuid: Uuid,
        name: impl Into<String>,
    ) -> Result<EntityId, EntityError> {
        if uuid.is_nil() {
            return Err(EntityError::InvalidData("nil entity uuid".into()));
        }
        if self.by_uuid.contains_key(&uuid) {
            return Err(EntityError::DuplicateUuid(uuid));
        }
        Ok(self.insert(Entity::new(uuid, name.into())))
    }

    /// Destroys the entity and all its descendants.
    pub fn destroy(&mut self, id: EntityId) -> bool {
        let Some(entity) = self.get(id) else {
            return false;
        };
        if let Some(parent) = entity.parent {
            if let Some(parent) = self.get_mut(parent) {
                parent.children.retain(|c| *c != id);
            }
        }

        for target in self.descendants(id) {
            let slot = &mut self.slots[target.index as usize];
            if let Some(entity) = slot.entity.take() {
                self.by_uuid.remove(&entity.uuid);
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(target.index);
            }
        }
        true
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entity.as_ref())
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entity.as_mut())
    }

    pub fn find_by_uuid(&self, uuid: &Uuid) -> Option<EntityId> {
        self.by_uuid.get(uuid).copied()
    }

    pub fn entity_count(&self) -> usize {
        self.by_uuid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_uuid.is_empty()
    }

    pub fn entities(&self) -> impl Iterator<Item = (EntityId, &Entity)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.entity.as_ref().map(|entity| {
                (
                    EntityId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    entity,
                )
            })
        })
    }

    pub fn parent(&self, id: EntityId) -> Option<EntityId> {
        self.get(id).and_then(|e| e.parent)
    }

    pub fn children(&self, id: EntityId) -> &[EntityId] {
        self.get(id).map(|e| e.children.as_slice()).unwrap_or(&[])
    }

    pub fn root_of(&self, mut id: EntityId) -> EntityId {
        while let Some(parent) = self.parent(id) {
            id = parent;
        }
        id
    }

    /// The entity followed by all its descendants, depth first.
    pub fn descendants(&self, id: EntityId) -> Vec<EntityId> {
        let mut result = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !self.contains(current) {
                continue;
            }
            result.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        result
    }

    pub fn set_parent(
        &mut self,
        child: EntityId,
        parent: Option<EntityId>,
    ) -> Result<(), EntityError> {
        if !self.contains(child) {
            return Err(EntityError::MissingEntity(child));
        }
        if let Some(parent) = parent {
            if !self.contains(parent) {
                return Err(EntityError::MissingEntity(parent));
            }
            if self.descendants(child).contains(&parent) {
                return Err(EntityError::InvalidParent { child, parent });
            }
        }

        if let Some(old) = self.parent(child) {
            if let Some(old) = self.get_mut(old) {
                old.children.retain(|c| *c != child);
            }
        }
        if let Some(parent) = parent {
            if let Some(parent) = self.get_mut(parent) {
                parent.children.push(child);
            }
        }
        if let Some(entity) = self.get_mut(child) {
            entity.parent = parent;
        }
        Ok(())
    }

    /// Moves `child` to position `index` among its siblings.
    pub fn reorder_child(&mut self, parent: EntityId, child: EntityId, index: usize) {
        if let Some(parent) = self.get_mut(parent) {
            if let Some(pos) = parent.children.iter().position(|c| *c == child) {
                parent.children.remove(pos);
                let index = index.min(parent.children.len());
                parent.children.insert(index, child);
            }
        }
    }

    pub fn component(&self, id: EntityId, name: &str) -> Option<&ConfigNode> {
        self.get(id).and_then(|e| e.components.get(name))
    }

    pub fn component_mut(&mut self, id: EntityId, name: &str) -> Option<&mut ConfigNode> {
        self.get_mut(id).and_then(|e| e.components.get_mut(name))
    }

    pub fn component_field_mut(
        &mut self,
        id: EntityId,
        component: &str,
        field: &str,
    ) -> Option<&mut ConfigNode> {
        self.component_mut(id, component)
            .and_then(|c| c.get_mut(field))
    }

    pub fn set_component(
        &mut self,
        id: EntityId,
        name: impl Into<String>,
        value: ConfigNode,
    ) -> Result<(), EntityError> {
        let entity = self.get_mut(id).ok_or(EntityError::MissingEntity(id))?;
        entity.components.insert(name.into(), value);
        Ok(())
    }

    pub fn remove_component(&mut self, id: EntityId, name: &str) -> Option<ConfigNode> {
        self.get_mut(id).and_then(|e| e.components.remove(name))
    }

    pub fn network(&self, id: EntityId) -> Option<&NetworkComponent> {
        self.get(id).and_then(|e| e.network.as_ref())
    }

    pub fn network_mut(&mut self, id: EntityId) -> Option<&mut NetworkComponent> {
        self.get_mut(id).and_then(|e| e.network.as_mut())
    }

    pub fn set_network(&mut self, id: EntityId, network: NetworkComponent) -> Result<(), EntityError> {
        let entity = self.get_mut(id).ok_or(EntityError::MissingEntity(id))?;
        entity.network = Some(network);
        Ok(())
    }

    fn insert(&mut self, entity: Entity) -> EntityId {
        let uuid = entity.uuid;
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entity = Some(entity);
                EntityId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entity: Some(entity),
                });
                EntityId {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        };
        self.by_uuid.insert(uuid, id);
        id
    }
}
