use uuid::Uuid;

use crate::interpolation::DataInterpolatorSet;

use super::{
    ComponentRegistry, EntityData, EntityDataDelta, EntityDataDeltaOptions, EntityError, EntityId,
    PrefabLibrary, SerializationMask, World,
};

#[derive(Clone, Copy)]
pub struct EntitySerializationOptions<'a> {
    pub mask: SerializationMask,
    /// Entities for which this returns true are written as stubs: identity
    /// only, no components or children.
    pub serialize_as_stub: Option<&'a dyn Fn(EntityId) -> bool>,
}

impl EntitySerializationOptions<'_> {
    pub fn new(mask: SerializationMask) -> Self {
        Self {
            mask,
            serialize_as_stub: None,
        }
    }
}

impl Default for EntitySerializationOptions<'_> {
    fn default() -> Self {
        Self::new(SerializationMask::all())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Overwrite what the data carries, keep everything else.
    UpdateAll,
    /// Also drop components and children the data does not carry.
    UpdateAllDeleteOld,
}

/// Converts between live [`World`] entities and [`EntityData`] trees.
#[derive(Clone, Copy)]
pub struct EntityFactory<'a> {
    prefabs: &'a PrefabLibrary,
    registry: &'a ComponentRegistry,
}

impl<'a> EntityFactory<'a> {
    pub fn new(prefabs: &'a PrefabLibrary, registry: &'a ComponentRegistry) -> Self {
        Self { prefabs, registry }
    }

    pub fn prefabs(&self) -> &'a PrefabLibrary {
        self.prefabs
    }

    pub fn serialize_entity(
        &self,
        world: &World,
        id: EntityId,
        options: &EntitySerializationOptions<'_>,
    ) -> Result<EntityData, EntityError> {
        let mut data = self.serialize_subtree(world, id, options)?;
        data.parent_uuid = world
            .parent(id)
            .and_then(|p| world.get(p))
            .map(|p| p.uuid())
            .unwrap_or_default();
        Ok(data)
    }

    fn serialize_subtree(
        &self,
        world: &World,
        id: EntityId,
        options: &EntitySerializationOptions<'_>,
    ) -> Result<EntityData, EntityError> {
        let entity = world.get(id).ok_or(EntityError::MissingEntity(id))?;
        let mut data = EntityData {
            name: entity.name.clone(),
            icon: entity.icon.clone(),
            prefab: entity.prefab.clone(),
            instance_uuid: entity.uuid(),
            prefab_uuid: entity.prefab_uuid,
            ..Default::default()
        };
        if options.serialize_as_stub.is_some_and(|stub| stub(id)) {
            return Ok(data);
        }

        for (name, value) in &entity.components {
            if let Some(filtered) = self.registry.filter(name, value, options.mask) {
                data.components.insert(name.clone(), filtered);
            }
        }
        for child in entity.children() {
            data.children
                .push(self.serialize_subtree(world, *child, options)?);
        }
        Ok(data)
    }

    /// Spawns `data` and its children. Nothing is left behind on failure.
    pub fn create_entity(
        &self,
        world: &mut World,
        data: &EntityData,
        parent: Option<EntityId>,
    ) -> Result<EntityId, EntityError> {
        let id = spawn(world, data)?;
        if let Err(e) = self.populate(world, id, data, parent) {
            world.destroy(id);
            return Err(e);
        }
        Ok(id)
    }

    fn populate(
        &self,
        world: &mut World,
        id: EntityId,
        data: &EntityData,
        parent: Option<EntityId>,
    ) -> Result<(), EntityError> {
        if let Some(entity) = world.get_mut(id) {
            entity.icon = data.icon.clone();
            entity.prefab = data.prefab.clone();
            entity.prefab_uuid = data.prefab_uuid;
            entity.components = data.components.clone();
        }
        world.set_parent(id, parent)?;
        for child in &data.children {
            let child_id = spawn(world, child)?;
            self.populate(world, child_id, child, Some(id))?;
        }
        Ok(())
    }

    pub fn create_from_prefab(
        &self,
        world: &mut World,
        prefab: &str,
        parent: Option<EntityId>,
    ) -> Result<EntityId, EntityError> {
        let data = self.prefabs.instantiate(prefab)?;
        self.create_entity(world, &data, parent)
    }

    /// Applies full data onto an existing entity. Fields with a registered
    /// interpolator go through it instead of being overwritten.
    pub fn update_entity(
        &self,
        world: &mut World,
        id: EntityId,
        data: &EntityData,
        mode: UpdateMode,
        mut interpolators: Option<&mut DataInterpolatorSet>,
    ) -> Result<(), EntityError> {
        let entity = world.get_mut(id).ok_or(EntityError::MissingEntity(id))?;
        entity.name = data.name.clone();
        entity.icon = data.icon.clone();
        entity.prefab = data.prefab.clone();
        entity.prefab_uuid = data.prefab_uuid;

        if mode == UpdateMode::UpdateAllDeleteOld {
            entity
                .components
                .retain(|name, _| data.components.contains_key(name));
        }
        for (name, value) in &data.components {
            let current = entity.components.entry(name.clone()).or_default();
            match interpolators.as_deref_mut() {
                Some(set) => set.apply_component(id, name, current, value),
                None => *current = value.clone(),
            }
        }

        let existing: Vec<(Uuid, EntityId)> = world
            .children(id)
            .iter()
            .filter_map(|c| world.get(*c).map(|e| (e.match_uuid(), *c)))
            .collect();
        for child in &data.children {
            let key = child.match_uuid();
            match existing.iter().find(|(k, _)| *k == key) {
                Some((_, child_id)) => self.update_entity(
                    world,
                    *child_id,
                    child,
                    mode,
                    interpolators.as_deref_mut(),
                )?,
                None => {
                    self.create_entity(world, child, Some(id))?;
                }
            }
        }
        if mode == UpdateMode::UpdateAllDeleteOld {
            for (key, child_id) in existing {
                if data.child(&key).is_none() {
                    world.destroy(child_id);
                }
            }
        }
        Ok(())
    }

    /// Applies a delta onto an existing entity. Component deltas are routed
    /// through `interpolators` when one is registered for the field.
    pub fn update_entity_delta(
        &self,
        world: &mut World,
        id: EntityId,
        delta: &EntityDataDelta,
        mut interpolators: Option<&mut DataInterpolatorSet>,
    ) -> Result<(), EntityError> {
        let entity = world.get_mut(id).ok_or(EntityError::MissingEntity(id))?;
        if let Some(name) = &delta.name {
            entity.name = name.clone();
        }
        if let Some(icon) = &delta.icon {
            entity.icon = icon.clone();
        }
        if let Some(prefab) = &delta.prefab {
            entity.prefab = prefab.clone();
        }
        if let Some(prefab_uuid) = delta.prefab_uuid {
            entity.prefab_uuid = prefab_uuid;
        }

        for name in &delta.components_removed {
            entity.components.remove(name);
        }
        for (name, component_delta) in &delta.components_changed {
            let current = entity.components.entry(name.clone()).or_default();
            match interpolators.as_deref_mut() {
                Some(set) => set.apply_component_delta(id, name, current, component_delta),
                None => crate::config::apply_delta(current, component_delta),
            }
        }

        if let Some(parent_uuid) = delta.parent_uuid {
            if parent_uuid.is_nil() {
                world.set_parent(id, None)?;
            } else {
                match world.find_by_uuid(&parent_uuid) {
                    Some(parent) => {
                        if let Err(e) = world.set_parent(id, Some(parent)) {
                            log::warn!("cannot attach {id} to {parent_uuid}: {e}");
                        }
                    }
                    None => log::warn!("parent {parent_uuid} of {id} not found, keeping its current parent"),
                }
            }
        }

        let find_child = |world: &World, key: &Uuid| {
            world
                .children(id)
                .iter()
                .copied()
                .find(|c| world.get(*c).is_some_and(|e| e.match_uuid() == *key))
        };
        for key in &delta.children_removed {
            if let Some(child) = find_child(world, key) {
                world.destroy(child);
            }
        }
        for (key, child_delta) in &delta.children_changed {
            match find_child(world, key) {
                Some(child) => self.update_entity_delta(
                    world,
                    child,
                    child_delta,
                    interpolators.as_deref_mut(),
                )?,
                None => log::warn!("delta for unknown child {key} of entity {id}"),
            }
        }
        for added in &delta.children_added {
            match find_child(world, &added.match_uuid()) {
                Some(child) => self.update_entity(
                    world,
                    child,
                    added,
                    UpdateMode::UpdateAllDeleteOld,
                    interpolators.as_deref_mut(),
                )?,
                None => {
                    self.create_entity(world, added, Some(id))?;
                }
            }
        }
        if let Some(order) = &delta.children_order {
            for (index, key) in order.iter().enumerate() {
                if let Some(child) = find_child(world, key) {
                    world.reorder_child(id, child, index);
                }
            }
        }
        Ok(())
    }

    /// Rebuilds the entity described by a prefab-relative delta, creating it or
    /// updating the live entity with the same uuid. Returns the entity and the
    /// parent uuid it should be attached to, if any.
    pub fn load_entity_delta(
        &self,
        world: &mut World,
        delta: &EntityDataDelta,
        parent_hint: Option<Uuid>,
    ) -> Result<(EntityId, Option<Uuid>), EntityError> {
        let data = self.prefab_delta_to_entity_data(delta)?;
        let parent = if data.parent_uuid.is_nil() {
            parent_hint
        } else {
            Some(data.parent_uuid)
        };

        let id = match world.find_by_uuid(&data.instance_uuid) {
            Some(existing) => {
                self.update_entity(world, existing, &data, UpdateMode::UpdateAllDeleteOld, None)?;
                existing
            }
            None => self.create_entity(world, &data, None)?,
        };
        Ok((id, parent))
    }

    /// Delta from the entity's prefab definition, or from empty data when the
    /// entity is not a prefab instance.
    pub fn entity_data_to_prefab_delta(
        &self,
        data: &EntityData,
        options: &EntityDataDeltaOptions<'_>,
    ) -> Result<EntityDataDelta, EntityError> {
        if data.prefab.is_empty() {
            return Ok(EntityDataDelta::new(&EntityData::default(), data, options));
        }
        let prefab = self
            .prefabs
            .get(&data.prefab)
            .ok_or_else(|| EntityError::UnknownPrefab(data.prefab.clone()))?;
        Ok(EntityDataDelta::new(prefab, data, options))
    }

    pub fn prefab_delta_to_entity_data(
        &self,
        delta: &EntityDataDelta,
    ) -> Result<EntityData, EntityError> {
        let mut data = match delta.prefab.as_deref() {
            Some(name) if !name.is_empty() => self
                .prefabs
                .get(name)
                .cloned()
                .ok_or_else(|| EntityError::UnknownPrefab(name.to_owned()))?,
            _ => EntityData::default(),
        };
        data.apply_delta(delta);
        Ok(data)
    }

    /// Finds an entity by uuid inside `scope` (by instance or prefab uuid),
    /// falling back to the whole world when `world_lookup` is set.
    pub fn resolve_uuid(
        &self,
        world: &World,
        uuid: &Uuid,
        scope: Option<EntityId>,
        world_lookup: bool,
    ) -> Result<EntityId, EntityError> {
        if let Some(scope) = scope {
            let found = world.descendants(scope).into_iter().find(|id| {
                world
                    .get(*id)
                    .is_some_and(|e| e.uuid() == *uuid || e.prefab_uuid == *uuid)
            });
            if let Some(id) = found {
                return Ok(id);
            }
        }
        if world_lookup {
            if let Some(id) = world.find_by_uuid(uuid) {
                return Ok(id);
            }
        }
        Err(EntityError::UnresolvedUuid(*uuid))
    }
}

fn spawn(world: &mut World, data: &EntityData) -> Result<EntityId, EntityError> {
    if data.instance_uuid.is_nil() {
        Ok(world.spawn(data.name.clone()))
    } else {
        world.spawn_with_uuid(data.instance_uuid, data.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use super::*;
    use crate::config::ConfigNode;

    fn library() -> PrefabLibrary {
        let mut ship = EntityData::new("ship", Uuid::new_v4());
        ship.set_component(
            "Transform",
            [("position", Vec2::ZERO)].into_iter().collect(),
        );
        ship.set_component("Health", [("hp", 100)].into_iter().collect());
        let mut turret = EntityData::new("turret", Uuid::new_v4());
        turret.set_component("Weapon", [("ammo", 10)].into_iter().collect());
        ship.children.push(turret);

        let mut library = PrefabLibrary::new();
        library.add("ship", ship);
        library
    }

    #[test]
    fn test_serialize_filters_by_mask() {
        let prefabs = PrefabLibrary::new();
        let mut registry = ComponentRegistry::new();
        registry.register_field("Player", "save_slot", SerializationMask::SAVE_DATA);
        registry.register_component("Editor", SerializationMask::PREFAB);
        let factory = EntityFactory::new(&prefabs, &registry);

        let mut world = World::new();
        let id = world.spawn("player");
        world
            .set_component(
                id,
                "Player",
                [("save_slot", 1), ("hp", 3)].into_iter().collect(),
            )
            .unwrap();
        world
            .set_component(id, "Editor", ConfigNode::empty_map())
            .unwrap();

        let data = factory
            .serialize_entity(
                &world,
                id,
                &EntitySerializationOptions::new(SerializationMask::NETWORK),
            )
            .unwrap();
        assert!(data.component("Editor").is_none());
        let player = data.component("Player").unwrap();
        assert!(player.has_key("hp"));
        assert!(!player.has_key("save_slot"));
    }

    #[test]
    fn test_stub_predicate() {
        let prefabs = PrefabLibrary::new();
        let registry = ComponentRegistry::new();
        let factory = EntityFactory::new(&prefabs, &registry);

        let mut world = World::new();
        let root = world.spawn("root");
        let child = world.spawn("child");
        world.set_parent(child, Some(root)).unwrap();
        world.set_component(child, "Tag", ConfigNode::Int(1)).unwrap();

        let is_child = |id: EntityId| id == child;
        let options = EntitySerializationOptions {
            mask: SerializationMask::all(),
            serialize_as_stub: Some(&is_child),
        };
        let data = factory.serialize_entity(&world, root, &options).unwrap();
        assert_eq!(data.children.len(), 1);
        assert!(data.children[0].is_stub());
        assert_eq!(data.children[0].name, "child");
    }

    #[test]
    fn test_prefab_delta_round_trip() {
        let prefabs = library();
        let registry = ComponentRegistry::new();
        let factory = EntityFactory::new(&prefabs, &registry);

        let mut world = World::new();
        let id = factory.create_from_prefab(&mut world, "ship", None).unwrap();
        world
            .set_component(id, "Health", [("hp", 40)].into_iter().collect())
            .unwrap();

        let data = factory
            .serialize_entity(&world, id, &Default::default())
            .unwrap();
        let delta = factory
            .entity_data_to_prefab_delta(&data, &Default::default())
            .unwrap();
        assert_eq!(delta.prefab.as_deref(), Some("ship"));
        assert_eq!(delta.components_changed.len(), 1);
        assert!(delta.children_added.is_empty());

        assert_eq!(factory.prefab_delta_to_entity_data(&delta).unwrap(), data);
    }

    #[test]
    fn test_load_entity_delta_creates_then_updates() {
        let prefabs = library();
        let registry = ComponentRegistry::new();
        let factory = EntityFactory::new(&prefabs, &registry);

        let mut source = World::new();
        let id = factory.create_from_prefab(&mut source, "ship", None).unwrap();
        let data = factory
            .serialize_entity(&source, id, &Default::default())
            .unwrap();
        let delta = factory
            .entity_data_to_prefab_delta(&data, &Default::default())
            .unwrap();

        let mut target = World::new();
        let (created, parent) = factory
            .load_entity_delta(&mut target, &delta, None)
            .unwrap();
        assert_eq!(parent, None);
        assert_eq!(target.entity_count(), 2);
        assert_eq!(
            factory
                .serialize_entity(&target, created, &Default::default())
                .unwrap(),
            data
        );

        let (again, _) = factory
            .load_entity_delta(&mut target, &delta, None)
            .unwrap();
        assert_eq!(again, created);
        assert_eq!(target.entity_count(), 2);
    }

    #[test]
    fn test_update_entity_delta_children() {
        let prefabs = library();
        let registry = ComponentRegistry::new();
        let factory = EntityFactory::new(&prefabs, &registry);

        let mut world = World::new();
        let id = factory.create_from_prefab(&mut world, "ship", None).unwrap();
        let before = factory
            .serialize_entity(&world, id, &Default::default())
            .unwrap();

        let mut after = before.clone();
        after.children[0].set_component("Weapon", [("ammo", 3)].into_iter().collect());
        after.children.push(EntityData::new("shield", Uuid::new_v4()));
        after.set_component("Transform", [("position", Vec2::new(5.0, 0.0))].into_iter().collect());

        let delta = EntityDataDelta::new(&before, &after, &Default::default());
        factory
            .update_entity_delta(&mut world, id, &delta, None)
            .unwrap();
        assert_eq!(
            factory
                .serialize_entity(&world, id, &Default::default())
                .unwrap(),
            after
        );

        let mut removed = after.clone();
        removed.children.remove(0);
        let delta = EntityDataDelta::new(&after, &removed, &Default::default());
        factory
            .update_entity_delta(&mut world, id, &delta, None)
            .unwrap();
        assert_eq!(world.children(id).len(), 1);
        assert_eq!(world.entity_count(), 2);
    }

    #[test]
    fn test_unknown_parent_still_applies_rest_of_delta() {
        let prefabs = PrefabLibrary::new();
        let registry = ComponentRegistry::new();
        let factory = EntityFactory::new(&prefabs, &registry);

        let mut world = World::new();
        let id = world.spawn("a");
        let before = factory
            .serialize_entity(&world, id, &Default::default())
            .unwrap();

        let mut after = before.clone();
        after.parent_uuid = Uuid::new_v4();
        after.set_component("Health", ConfigNode::Int(3));
        after.children.push(EntityData::new("child", Uuid::new_v4()));
        let delta = EntityDataDelta::new(&before, &after, &Default::default());
        assert!(delta.parent_uuid.is_some());

        factory
            .update_entity_delta(&mut world, id, &delta, None)
            .unwrap();
        assert_eq!(world.parent(id), None);
        assert_eq!(world.component(id, "Health"), Some(&ConfigNode::Int(3)));
        assert_eq!(world.children(id).len(), 1);
    }

    #[test]
    fn test_update_entity_delete_old() {
        let prefabs = PrefabLibrary::new();
        let registry = ComponentRegistry::new();
        let factory = EntityFactory::new(&prefabs, &registry);

        let mut world = World::new();
        let id = world.spawn("a");
        world.set_component(id, "Old", ConfigNode::Int(1)).unwrap();
        let child = world.spawn("child");
        world.set_parent(child, Some(id)).unwrap();

        let mut data = factory
            .serialize_entity(&world, id, &Default::default())
            .unwrap();
        data.components.clear();
        data.children.clear();
        data.set_component("New", ConfigNode::Int(2));

        factory
            .update_entity(&mut world, id, &data, UpdateMode::UpdateAll, None)
            .unwrap();
        assert!(world.component(id, "Old").is_some());
        assert!(world.contains(child));

        factory
            .update_entity(&mut world, id, &data, UpdateMode::UpdateAllDeleteOld, None)
            .unwrap();
        assert!(world.component(id, "Old").is_none());
        assert_eq!(world.component(id, "New"), Some(&ConfigNode::Int(2)));
        assert!(!world.contains(child));
    }

    #[test]
    fn test_create_entity_rolls_back_on_duplicate() {
        let prefabs = PrefabLibrary::new();
        let registry = ComponentRegistry::new();
        let factory = EntityFactory::new(&prefabs, &registry);

        let mut world = World::new();
        let taken = Uuid::new_v4();
        world.spawn_with_uuid(taken, "taken").unwrap();

        let mut data = EntityData::new("root", Uuid::new_v4());
        data.children.push(EntityData::new("dup", taken));
        assert!(matches!(
            factory.create_entity(&mut world, &data, None),
            Err(EntityError::DuplicateUuid(_))
        ));
        assert_eq!(world.entity_count(), 1);
    }

    #[test]
    fn test_resolve_uuid() {
        let prefabs = library();
        let registry = ComponentRegistry::new();
        let factory = EntityFactory::new(&prefabs, &registry);

        let mut world = World::new();
        let ship = factory.create_from_prefab(&mut world, "ship", None).unwrap();
        let other = world.spawn("other");
        let other_uuid = world.get(other).unwrap().uuid();
        let turret_prefab_uuid = prefabs.get("ship").unwrap().children[0].instance_uuid;

        let turret = factory
            .resolve_uuid(&world, &turret_prefab_uuid, Some(ship), false)
            .unwrap();
        assert_eq!(world.parent(turret), Some(ship));

        assert!(matches!(
            factory.resolve_uuid(&world, &other_uuid, Some(ship), false),
            Err(EntityError::UnresolvedUuid(_))
        ));
        assert_eq!(
            factory
                .resolve_uuid(&world, &other_uuid, Some(ship), true)
                .unwrap(),
            other
        );
    }
}
