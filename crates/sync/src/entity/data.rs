use uuid::Uuid;

use crate::bytes::{DeserializeError, Deserializer, Serializable, Serializer};
use crate::config::{ConfigMap, ConfigNode};

use super::{EntityDataDelta, EntityError};

/// Value-tree snapshot of one entity and its children.
///
/// `prefab` is empty when the entity is not a prefab instance. Nil uuids mean
/// "not set".
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityData {
    pub name: String,
    pub icon: String,
    pub prefab: String,
    pub instance_uuid: Uuid,
    pub prefab_uuid: Uuid,
    pub parent_uuid: Uuid,
    pub components: ConfigMap,
    pub children: Vec<EntityData>,
}

impl EntityData {
    pub fn new(name: impl Into<String>, instance_uuid: Uuid) -> Self {
        Self {
            name: name.into(),
            instance_uuid,
            ..Default::default()
        }
    }

    /// Children are paired across snapshots by this key: the uuid of the
    /// prefab entity they came from, or their own uuid otherwise.
    pub fn match_uuid(&self) -> Uuid {
        if self.prefab_uuid.is_nil() {
            self.instance_uuid
        } else {
            self.prefab_uuid
        }
    }

    pub fn child(&self, match_uuid: &Uuid) -> Option<&EntityData> {
        self.children.iter().find(|c| c.match_uuid() == *match_uuid)
    }

    pub fn child_mut(&mut self, match_uuid: &Uuid) -> Option<&mut EntityData> {
        self.children
            .iter_mut()
            .find(|c| c.match_uuid() == *match_uuid)
    }

    /// Finds this entity or a descendant by instance uuid.
    pub fn find(&self, instance_uuid: &Uuid) -> Option<&EntityData> {
        if self.instance_uuid == *instance_uuid {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(instance_uuid))
    }

    pub fn component(&self, name: &str) -> Option<&ConfigNode> {
        self.components.get(name)
    }

    pub fn set_component(&mut self, name: impl Into<String>, value: ConfigNode) {
        self.components.insert(name.into(), value);
    }

    pub fn is_stub(&self) -> bool {
        self.components.is_empty() && self.children.is_empty()
    }

    pub fn apply_delta(&mut self, delta: &EntityDataDelta) {
        delta.apply_to(self);
    }

    pub fn to_config_node(&self) -> ConfigNode {
        let mut node = ConfigNode::empty_map();
        node.insert("name", self.name.as_str());
        if !self.icon.is_empty() {
            node.insert("icon", self.icon.as_str());
        }
        if !self.prefab.is_empty() {
            node.insert("prefab", self.prefab.as_str());
        }
        for (key, uuid) in [
            ("uuid", &self.instance_uuid),
            ("prefabUUID", &self.prefab_uuid),
            ("parent", &self.parent_uuid),
        ] {
            if !uuid.is_nil() {
                node.insert(key, uuid.to_string());
            }
        }
        if !self.components.is_empty() {
            node.insert("components", ConfigNode::Map(self.components.clone()));
        }
        if !self.children.is_empty() {
            node.insert(
                "children",
                ConfigNode::Sequence(self.children.iter().map(Self::to_config_node).collect()),
            );
        }
        node
    }

    pub fn from_config_node(node: &ConfigNode) -> Result<Self, EntityError> {
        if node.as_map().is_none() {
            return Err(EntityError::InvalidData("entity data must be a map".into()));
        }

        let string = |key: &str| node.get(key).as_str().unwrap_or_default().to_owned();
        let uuid = |key: &str| -> Result<Uuid, EntityError> {
            match node.get(key).as_str() {
                Some(text) => Uuid::parse_str(text)
                    .map_err(|e| EntityError::InvalidData(format!("{key}: {e}"))),
                None => Ok(Uuid::nil()),
            }
        };

        let components = match node.get("components") {
            ConfigNode::Map(map) => map.clone(),
            ConfigNode::Undefined => ConfigMap::new(),
            _ => return Err(EntityError::InvalidData("components must be a map".into())),
        };
        let children = match node.get("children") {
            ConfigNode::Sequence(seq) => seq
                .iter()
                .map(Self::from_config_node)
                .collect::<Result<Vec<_>, _>>()?,
            _ => Vec::new(),
        };

        Ok(Self {
            name: string("name"),
            icon: string("icon"),
            prefab: string("prefab"),
            instance_uuid: uuid("uuid")?,
            prefab_uuid: uuid("prefabUUID")?,
            parent_uuid: uuid("parent")?,
            components,
            children,
        })
    }
}

impl Serializable for EntityData {
    fn serialize(&self, s: &mut Serializer) {
        s.write_str(&self.name);
        s.write_str(&self.icon);
        s.write_str(&self.prefab);
        s.write(&self.instance_uuid);
        s.write(&self.prefab_uuid);
        s.write(&self.parent_uuid);
        s.write(&self.components);
        s.write(&self.children);
    }

    fn deserialize(d: &mut Deserializer<'_>) -> Result<Self, DeserializeError> {
        d.enter()?;
        let result = read_entity_data(d);
        d.leave();
        result
    }
}

fn read_entity_data(d: &mut Deserializer<'_>) -> Result<EntityData, DeserializeError> {
    Ok(EntityData {
        name: d.read_string()?,
        icon: d.read_string()?,
        prefab: d.read_string()?,
        instance_uuid: d.read()?,
        prefab_uuid: d.read()?,
        parent_uuid: d.read()?,
        components: d.read()?,
        children: d.read()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::SerializerOptions;

    fn sample() -> EntityData {
        let mut root = EntityData::new("ship", Uuid::new_v4());
        root.prefab = "ship".into();
        root.prefab_uuid = Uuid::new_v4();
        let transform: ConfigNode = [("position", glam::Vec2::new(1.0, 2.0))]
            .into_iter()
            .collect();
        root.set_component("Transform", transform);

        let mut turret = EntityData::new("turret", Uuid::new_v4());
        turret.set_component("Weapon", [("ammo", 10)].into_iter().collect());
        root.children.push(turret);
        root
    }

    #[test]
    fn test_binary_round_trip() {
        let data = sample();
        let options = SerializerOptions::new(1);
        let bytes = Serializer::to_bytes(&data, &options);
        let back: EntityData = Deserializer::from_bytes(&bytes, &options).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_config_node_round_trip() {
        let data = sample();
        let node = data.to_config_node();
        assert_eq!(node.get("name").as_str(), Some("ship"));
        assert_eq!(EntityData::from_config_node(&node).unwrap(), data);
    }

    #[test]
    fn test_bad_uuid_is_an_error() {
        let mut node = sample().to_config_node();
        node.insert("uuid", "not-a-uuid");
        assert!(matches!(
            EntityData::from_config_node(&node),
            Err(EntityError::InvalidData(_))
        ));
    }

    #[test]
    fn test_match_uuid_prefers_prefab() {
        let data = sample();
        assert_eq!(data.match_uuid(), data.prefab_uuid);
        assert_eq!(data.children[0].match_uuid(), data.children[0].instance_uuid);
        assert!(data.child(&data.children[0].instance_uuid).is_some());
        assert!(data.find(&data.children[0].instance_uuid).is_some());
    }
}
