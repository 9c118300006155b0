use std::collections::HashMap;

use uuid::Uuid;

use crate::config::ConfigNode;

use super::{EntityData, EntityError};

/// Named prefab definitions. A definition's root has an empty `prefab` field;
/// instances point back at it by name and at its entities by `prefab_uuid`.
#[derive(Debug, Clone, Default)]
pub struct PrefabLibrary {
    prefabs: HashMap<String, EntityData>,
}

impl PrefabLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, data: EntityData) {
        self.prefabs.insert(name.into(), data);
    }

    /// Loads `{ name: entity-data }` pairs from a config map.
    pub fn load_config(&mut self, node: &ConfigNode) -> Result<(), EntityError> {
        let Some(map) = node.as_map() else {
            return Err(EntityError::InvalidData("prefab library must be a map".into()));
        };
        for (name, data) in map {
            self.add(name.clone(), EntityData::from_config_node(data)?);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&EntityData> {
        self.prefabs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.prefabs.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.prefabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefabs.is_empty()
    }

    /// Copies the prefab with fresh instance uuids, linking each entity back to
    /// the prefab entity it came from.
    pub fn instantiate(&self, name: &str) -> Result<EntityData, EntityError> {
        let prefab = self
            .get(name)
            .ok_or_else(|| EntityError::UnknownPrefab(name.to_owned()))?;
        let mut data = instance_of(prefab);
        data.prefab = name.to_owned();
        Ok(data)
    }
}

fn instance_of(prefab: &EntityData) -> EntityData {
    EntityData {
        instance_uuid: Uuid::new_v4(),
        prefab_uuid: prefab.instance_uuid,
        children: prefab.children.iter().map(instance_of).collect(),
        ..prefab.clone()
    }
}
