use uuid::Uuid;

use crate::bytes::{DeserializeError, Deserializer, Serializable, Serializer};
use crate::config::{ConfigNode, DeltaHints, NoHints, apply_delta, create_delta_with};
use crate::interpolation::DataInterpolatorSetRetriever;

use super::EntityData;

bitflags::bitflags! {
    /// Fields present in a serialized [`EntityDataDelta`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeltaFields: u16 {
        const NAME = 1 << 0;
        const ICON = 1 << 1;
        const PREFAB = 1 << 2;
        const INSTANCE_UUID = 1 << 3;
        const PREFAB_UUID = 1 << 4;
        const PARENT_UUID = 1 << 5;
        const COMPONENTS_CHANGED = 1 << 6;
        const COMPONENTS_REMOVED = 1 << 7;
        const CHILDREN_ADDED = 1 << 8;
        const CHILDREN_REMOVED = 1 << 9;
        const CHILDREN_CHANGED = 1 << 10;
        const CHILDREN_ORDER = 1 << 11;
    }
}

#[derive(Clone, Copy, Default)]
pub struct EntityDataDeltaOptions<'a> {
    /// Record sibling order changes.
    pub preserve_order: bool,
    pub hints: Option<&'a dyn DeltaHints>,
    /// Lets per-field interpolators rewrite values before they are diffed.
    pub interpolators: Option<&'a DataInterpolatorSetRetriever<'a>>,
}

/// Difference between two [`EntityData`] snapshots. Children are matched by
/// [`EntityData::match_uuid`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityDataDelta {
    pub name: Option<String>,
    pub icon: Option<String>,
    pub prefab: Option<String>,
    pub instance_uuid: Option<Uuid>,
    pub prefab_uuid: Option<Uuid>,
    pub parent_uuid: Option<Uuid>,
    pub components_changed: Vec<(String, ConfigNode)>,
    pub components_removed: Vec<String>,
    pub children_added: Vec<EntityData>,
    pub children_removed: Vec<Uuid>,
    pub children_changed: Vec<(Uuid, EntityDataDelta)>,
    pub children_order: Option<Vec<Uuid>>,
}

fn changed<T: PartialEq + Clone>(from: &T, to: &T) -> Option<T> {
    (from != to).then(|| to.clone())
}

impl EntityDataDelta {
    pub fn new(from: &EntityData, to: &EntityData, options: &EntityDataDeltaOptions<'_>) -> Self {
        let hints = options.hints.unwrap_or(&NoHints);

        let mut delta = Self {
            name: changed(&from.name, &to.name),
            icon: changed(&from.icon, &to.icon),
            prefab: changed(&from.prefab, &to.prefab),
            instance_uuid: changed(&from.instance_uuid, &to.instance_uuid),
            prefab_uuid: changed(&from.prefab_uuid, &to.prefab_uuid),
            parent_uuid: changed(&from.parent_uuid, &to.parent_uuid),
            ..Default::default()
        };

        for (name, to_value) in &to.components {
            match from.components.get(name) {
                Some(from_value) => {
                    let component_delta = match options.interpolators {
                        Some(retriever) => retriever.create_component_delta(
                            &to.instance_uuid,
                            name,
                            from_value,
                            to_value,
                            hints,
                        ),
                        None => create_delta_with(from_value, to_value, hints),
                    };
                    if !component_delta.is_noop() {
                        delta.components_changed.push((name.clone(), component_delta));
                    }
                }
                None => delta
                    .components_changed
                    .push((name.clone(), to_value.clone())),
            }
        }
        delta.components_removed = from
            .components
            .keys()
            .filter(|name| !to.components.contains_key(*name))
            .cloned()
            .collect();

        for to_child in &to.children {
            let key = to_child.match_uuid();
            match from.child(&key) {
                Some(from_child) => {
                    let child_delta = Self::new(from_child, to_child, options);
                    if child_delta.has_change() {
                        delta.children_changed.push((key, child_delta));
                    }
                }
                None => delta.children_added.push(to_child.clone()),
            }
        }
        delta.children_removed = from
            .children
            .iter()
            .map(EntityData::match_uuid)
            .filter(|key| to.child(key).is_none())
            .collect();

        if options.preserve_order {
            let mut resulting: Vec<Uuid> = from
                .children
                .iter()
                .map(EntityData::match_uuid)
                .filter(|key| !delta.children_removed.contains(key))
                .collect();
            resulting.extend(delta.children_added.iter().map(EntityData::match_uuid));
            let target: Vec<Uuid> = to.children.iter().map(EntityData::match_uuid).collect();
            if resulting != target {
                delta.children_order = Some(target);
            }
        }

        delta
    }

    pub fn fields(&self) -> DeltaFields {
        let mut fields = DeltaFields::empty();
        fields.set(DeltaFields::NAME, self.name.is_some());
        fields.set(DeltaFields::ICON, self.icon.is_some());
        fields.set(DeltaFields::PREFAB, self.prefab.is_some());
        fields.set(DeltaFields::INSTANCE_UUID, self.instance_uuid.is_some());
        fields.set(DeltaFields::PREFAB_UUID, self.prefab_uuid.is_some());
        fields.set(DeltaFields::PARENT_UUID, self.parent_uuid.is_some());
        fields.set(
            DeltaFields::COMPONENTS_CHANGED,
            !self.components_changed.is_empty(),
        );
        fields.set(
            DeltaFields::COMPONENTS_REMOVED,
            !self.components_removed.is_empty(),
        );
        fields.set(DeltaFields::CHILDREN_ADDED, !self.children_added.is_empty());
        fields.set(DeltaFields::CHILDREN_REMOVED, !self.children_removed.is_empty());
        fields.set(DeltaFields::CHILDREN_CHANGED, !self.children_changed.is_empty());
        fields.set(DeltaFields::CHILDREN_ORDER, self.children_order.is_some());
        fields
    }

    pub fn has_change(&self) -> bool {
        !self.fields().is_empty()
    }

    pub fn component(&self, name: &str) -> Option<&ConfigNode> {
        self.components_changed
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d)
    }

    pub fn apply_to(&self, data: &mut EntityData) {
        if let Some(name) = &self.name {
            data.name = name.clone();
        }
        if let Some(icon) = &self.icon {
            data.icon = icon.clone();
        }
        if let Some(prefab) = &self.prefab {
            data.prefab = prefab.clone();
        }
        if let Some(uuid) = self.instance_uuid {
            data.instance_uuid = uuid;
        }
        if let Some(uuid) = self.prefab_uuid {
            data.prefab_uuid = uuid;
        }
        if let Some(uuid) = self.parent_uuid {
            data.parent_uuid = uuid;
        }

        for name in &self.components_removed {
            data.components.remove(name);
        }
        for (name, component_delta) in &self.components_changed {
            apply_delta(
                data.components.entry(name.clone()).or_default(),
                component_delta,
            );
        }

        data.children
            .retain(|c| !self.children_removed.contains(&c.match_uuid()));
        for (key, child_delta) in &self.children_changed {
            if let Some(child) = data.child_mut(key) {
                child_delta.apply_to(child);
            }
        }
        for added in &self.children_added {
            match data.child_mut(&added.match_uuid()) {
                Some(existing) => *existing = added.clone(),
                None => data.children.push(added.clone()),
            }
        }
        if let Some(order) = &self.children_order {
            data.children.sort_by_key(|c| {
                order
                    .iter()
                    .position(|k| *k == c.match_uuid())
                    .unwrap_or(usize::MAX)
            });
        }
    }
}

impl Serializable for EntityDataDelta {
    fn serialize(&self, s: &mut Serializer) {
        s.write_u16(self.fields().bits());
        if let Some(name) = &self.name {
            s.write_str(name);
        }
        if let Some(icon) = &self.icon {
            s.write_str(icon);
        }
        if let Some(prefab) = &self.prefab {
            s.write_str(prefab);
        }
        for uuid in [&self.instance_uuid, &self.prefab_uuid, &self.parent_uuid]
            .into_iter()
            .flatten()
        {
            s.write(uuid);
        }
        if !self.components_changed.is_empty() {
            s.write(&self.components_changed);
        }
        if !self.components_removed.is_empty() {
            s.write(&self.components_removed);
        }
        if !self.children_added.is_empty() {
            s.write(&self.children_added);
        }
        if !self.children_removed.is_empty() {
            s.write(&self.children_removed);
        }
        if !self.children_changed.is_empty() {
            s.write(&self.children_changed);
        }
        if let Some(order) = &self.children_order {
            s.write(order);
        }
    }

    fn deserialize(d: &mut Deserializer<'_>) -> Result<Self, DeserializeError> {
        d.enter()?;
        let result = read_delta(d);
        d.leave();
        result
    }
}

fn read_delta(d: &mut Deserializer<'_>) -> Result<EntityDataDelta, DeserializeError> {
    let bits = d.read_u16()?;
    let fields = DeltaFields::from_bits(bits).ok_or(DeserializeError::InvalidFlags {
        what: "entity delta",
        bits: bits as u32,
    })?;

    let mut delta = EntityDataDelta::default();
    if fields.contains(DeltaFields::NAME) {
        delta.name = Some(d.read_string()?);
    }
    if fields.contains(DeltaFields::ICON) {
        delta.icon = Some(d.read_string()?);
    }
    if fields.contains(DeltaFields::PREFAB) {
        delta.prefab = Some(d.read_string()?);
    }
    if fields.contains(DeltaFields::INSTANCE_UUID) {
        delta.instance_uuid = Some(d.read()?);
    }
    if fields.contains(DeltaFields::PREFAB_UUID) {
        delta.prefab_uuid = Some(d.read()?);
    }
    if fields.contains(DeltaFields::PARENT_UUID) {
        delta.parent_uuid = Some(d.read()?);
    }
    if fields.contains(DeltaFields::COMPONENTS_CHANGED) {
        delta.components_changed = d.read()?;
    }
    if fields.contains(DeltaFields::COMPONENTS_REMOVED) {
        delta.components_removed = d.read()?;
    }
    if fields.contains(DeltaFields::CHILDREN_ADDED) {
        delta.children_added = d.read()?;
    }
    if fields.contains(DeltaFields::CHILDREN_REMOVED) {
        delta.children_removed = d.read()?;
    }
    if fields.contains(DeltaFields::CHILDREN_CHANGED) {
        delta.children_changed = d.read()?;
    }
    if fields.contains(DeltaFields::CHILDREN_ORDER) {
        delta.children_order = Some(d.read()?);
    }
    Ok(delta)
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use super::*;
    use crate::bytes::SerializerOptions;
    use crate::config::{ConfigMap, create_delta};

    fn transform(x: f32, y: f32) -> ConfigNode {
        [("position", Vec2::new(x, y))].into_iter().collect()
    }

    fn position_xy(x: f32, y: f32) -> ConfigNode {
        [("x", x), ("y", y)].into_iter().collect()
    }

    fn entity(name: &str) -> EntityData {
        EntityData::new(name, Uuid::new_v4())
    }

    #[test]
    fn test_no_change() {
        let mut data = entity("a");
        data.set_component("Transform", transform(1.0, 1.0));
        let delta = EntityDataDelta::new(&data, &data.clone(), &Default::default());
        assert!(!delta.has_change());
        assert_eq!(delta.fields(), DeltaFields::empty());
    }

    #[test]
    fn test_only_changed_field_is_sent() {
        let mut from = entity("a");
        from.set_component("Position", position_xy(0.0, 0.0));
        let mut to = from.clone();
        to.set_component("Position", position_xy(5.0, 0.0));

        let delta = EntityDataDelta::new(&from, &to, &Default::default());
        assert_eq!(delta.fields(), DeltaFields::COMPONENTS_CHANGED);
        assert_eq!(
            delta.component("Position"),
            Some(&ConfigNode::DeltaMap(ConfigMap::from([(
                "x".to_string(),
                ConfigNode::Float(5.0)
            )])))
        );
    }

    #[test]
    fn test_children_by_uuid() {
        let mut from = entity("root");
        let keep = entity("keep");
        let gone = entity("gone");
        from.children = vec![keep.clone(), gone.clone()];

        let mut to = from.clone();
        to.children.retain(|c| c.name != "gone");
        to.children[0].set_component("Tag", ConfigNode::Int(1));
        to.children.push(entity("new"));

        let delta = EntityDataDelta::new(&from, &to, &Default::default());
        assert_eq!(delta.children_removed, vec![gone.instance_uuid]);
        assert_eq!(delta.children_changed.len(), 1);
        assert_eq!(delta.children_changed[0].0, keep.instance_uuid);
        assert_eq!(delta.children_added.len(), 1);

        let mut applied = from.clone();
        applied.apply_delta(&delta);
        assert_eq!(applied, to);
    }

    #[test]
    fn test_child_order() {
        let mut from = entity("root");
        from.children = vec![entity("a"), entity("b"), entity("c")];
        let mut to = from.clone();
        to.children.reverse();

        let plain = EntityDataDelta::new(&from, &to, &Default::default());
        assert!(!plain.has_change());

        let options = EntityDataDeltaOptions {
            preserve_order: true,
            ..Default::default()
        };
        let ordered = EntityDataDelta::new(&from, &to, &options);
        assert!(ordered.children_order.is_some());

        let mut applied = from.clone();
        applied.apply_delta(&ordered);
        assert_eq!(applied, to);
    }

    #[test]
    fn test_component_removal_and_metadata() {
        let mut from = entity("a");
        from.set_component("Old", ConfigNode::Int(1));
        let mut to = from.clone();
        to.components.clear();
        to.name = "renamed".into();
        to.parent_uuid = Uuid::new_v4();

        let delta = EntityDataDelta::new(&from, &to, &Default::default());
        assert_eq!(
            delta.fields(),
            DeltaFields::NAME | DeltaFields::PARENT_UUID | DeltaFields::COMPONENTS_REMOVED
        );
        let mut applied = from.clone();
        applied.apply_delta(&delta);
        assert_eq!(applied, to);
    }

    #[test]
    fn test_serialized_delta_applies_identically() {
        let mut from = entity("root");
        from.set_component("Transform", transform(0.0, 0.0));
        from.children.push(entity("child"));

        let mut to = from.clone();
        to.set_component("Transform", transform(3.0, 4.0));
        to.set_component("Health", ConfigNode::Int(10));
        to.children[0].icon = "skull".into();
        to.children.push(entity("extra"));

        let delta = EntityDataDelta::new(&from, &to, &Default::default());
        for version in [0, 1] {
            let options = SerializerOptions::new(version);
            let bytes = Serializer::to_bytes(&delta, &options);
            let back: EntityDataDelta = Deserializer::from_bytes(&bytes, &options).unwrap();
            assert_eq!(back, delta);

            let mut applied = from.clone();
            applied.apply_delta(&back);
            assert_eq!(applied, to);
        }
    }

    #[test]
    fn test_unknown_flags_rejected() {
        let options = SerializerOptions::new(0);
        let bytes = Serializer::to_bytes(&0x8000u16, &options);
        assert!(matches!(
            Deserializer::from_bytes::<EntityDataDelta>(&bytes, &options),
            Err(DeserializeError::InvalidFlags { .. })
        ));
    }

    #[test]
    fn test_component_delta_matches_value_tree_delta() {
        let mut from = entity("a");
        from.set_component("Transform", transform(0.0, 0.0));
        let mut to = from.clone();
        to.set_component("Transform", transform(1.0, 0.0));

        let delta = EntityDataDelta::new(&from, &to, &Default::default());
        assert_eq!(
            delta.component("Transform"),
            Some(&create_delta(&transform(0.0, 0.0), &transform(1.0, 0.0)))
        );
    }
}
