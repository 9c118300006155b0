use std::collections::HashMap;
use std::fmt;

use uuid::Uuid;

use crate::config::{ConfigMap, ConfigNode, DeltaHints, apply_delta, create_delta_with, with_delta};
use crate::entity::{EntityId, World};

use super::DataInterpolator;

struct Entry {
    entity: EntityId,
    component: String,
    field: String,
    enabled: bool,
    interpolator: Box<dyn DataInterpolator>,
}

impl Entry {
    fn matches(&self, entity: EntityId, component: &str, field: &str) -> bool {
        self.entity == entity && self.component == component && self.field == field
    }
}

/// Interpolators of one replicated entity tree, keyed by
/// (entity, component, field). Sets hold a handful of entries, so lookups
/// are a linear scan.
#[derive(Default)]
pub struct DataInterpolatorSet {
    entries: Vec<Entry>,
    ready: bool,
}

impl fmt::Debug for DataInterpolatorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataInterpolatorSet")
            .field("entries", &self.entries.len())
            .field("ready", &self.ready)
            .finish()
    }
}

impl DataInterpolatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether interpolators have been set up for the owning entity.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn set_ready(&mut self) {
        self.ready = true;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set_interpolator(
        &mut self,
        entity: EntityId,
        component: impl Into<String>,
        field: impl Into<String>,
        interpolator: Box<dyn DataInterpolator>,
    ) {
        let component = component.into();
        let field = field.into();
        match self
            .entries
            .iter_mut()
            .find(|e| e.matches(entity, &component, &field))
        {
            Some(entry) => {
                entry.interpolator = interpolator;
                entry.enabled = true;
            }
            None => self.entries.push(Entry {
                entity,
                component,
                field,
                enabled: true,
                interpolator,
            }),
        }
    }

    /// Disabled interpolators are skipped both when sending and receiving.
    pub fn set_interpolator_enabled(
        &mut self,
        entity: EntityId,
        component: &str,
        field: &str,
        enabled: bool,
    ) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|e| e.matches(entity, component, field))
        {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, entity: EntityId, component: &str, field: &str) -> Option<&dyn DataInterpolator> {
        self.entries
            .iter()
            .find(|e| e.enabled && e.matches(entity, component, field))
            .map(|e| e.interpolator.as_ref())
    }

    pub fn get_mut(
        &mut self,
        entity: EntityId,
        component: &str,
        field: &str,
    ) -> Option<&mut (dyn DataInterpolator + 'static)> {
        self.entries
            .iter_mut()
            .find(|e| e.enabled && e.matches(entity, component, field))
            .map(|e| e.interpolator.as_mut())
    }

    pub fn has_component(&self, entity: EntityId, component: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.enabled && e.entity == entity && e.component == component)
    }

    pub fn remove_entity(&mut self, entity: EntityId) {
        self.entries.retain(|e| e.entity != entity);
    }

    /// Advances every enabled interpolator and lets it write its field.
    pub fn update(&mut self, dt: f32, world: &mut World) {
        for entry in self.entries.iter_mut().filter(|e| e.enabled) {
            if let Some(value) = world.component_field_mut(entry.entity, &entry.component, &entry.field) {
                entry.interpolator.update(dt, value);
            }
        }
    }

    /// Writes a received full component value, routing interpolated fields.
    pub fn apply_component(
        &mut self,
        entity: EntityId,
        component: &str,
        current: &mut ConfigNode,
        incoming: &ConfigNode,
    ) {
        let mut result = incoming.clone();
        if self.has_component(entity, component) {
            if let Some(fields) = result.as_map_mut() {
                for (field, value) in fields.iter_mut() {
                    if let Some(interpolator) = self.get_mut(entity, component, field) {
                        *value = interpolator.deserialize(current.get(field), value);
                    }
                }
            }
        }
        *current = result;
    }

    /// Applies a received component delta, routing interpolated fields.
    pub fn apply_component_delta(
        &mut self,
        entity: EntityId,
        component: &str,
        current: &mut ConfigNode,
        delta: &ConfigNode,
    ) {
        let ConfigNode::DeltaMap(fields) = delta else {
            apply_delta(current, delta);
            return;
        };
        if current.as_map().is_none() || !self.has_component(entity, component) {
            apply_delta(current, delta);
            return;
        }

        let mut rest = ConfigMap::new();
        for (field, field_delta) in fields {
            if matches!(field_delta, ConfigNode::Noop) {
                continue;
            }
            let interpolator = match field_delta {
                ConfigNode::Del => None,
                _ => self.get_mut(entity, component, field),
            };
            match interpolator {
                Some(interpolator) => {
                    let old = current.get(field).clone();
                    let incoming = with_delta(&old, field_delta);
                    let value = interpolator.deserialize(&old, &incoming);
                    current.insert(field.clone(), value);
                }
                None => {
                    rest.insert(field.clone(), field_delta.clone());
                }
            }
        }
        if !rest.is_empty() {
            apply_delta(current, &ConfigNode::DeltaMap(rest));
        }
    }
}

/// Sender-side view of one entity tree's interpolators, addressed by the
/// instance uuids that appear in its serialized data.
pub struct DataInterpolatorSetRetriever<'a> {
    set: &'a DataInterpolatorSet,
    uuids: HashMap<Uuid, EntityId>,
}

impl<'a> DataInterpolatorSetRetriever<'a> {
    pub fn new(set: &'a DataInterpolatorSet, world: &World, root: EntityId) -> Self {
        let uuids = world
            .descendants(root)
            .into_iter()
            .filter_map(|id| world.get(id).map(|e| (e.uuid(), id)))
            .collect();
        Self { set, uuids }
    }

    /// Diffs one component, letting interpolators rewrite the target value of
    /// the fields they own first.
    pub fn create_component_delta(
        &self,
        instance_uuid: &Uuid,
        component: &str,
        from: &ConfigNode,
        to: &ConfigNode,
        hints: &dyn DeltaHints,
    ) -> ConfigNode {
        let Some(entity) = self.uuids.get(instance_uuid).copied() else {
            return create_delta_with(from, to, hints);
        };
        let Some(fields) = to.as_map().filter(|_| self.set.has_component(entity, component)) else {
            return create_delta_with(from, to, hints);
        };

        let mut adjusted = to.clone();
        for (field, value) in fields {
            let Some(interpolator) = self.set.get(entity, component, field) else {
                continue;
            };
            if let Some(replacement) =
                interpolator.prepare_field_for_serialization(from.get(field), value)
            {
                adjusted.insert(field.clone(), replacement);
            }
        }
        create_delta_with(from, &adjusted, hints)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    /// Doubles incoming ints and counts updates.
    struct Doubler {
        updates: Rc<Cell<u32>>,
    }

    impl DataInterpolator for Doubler {
        fn prepare_field_for_serialization(
            &self,
            from: &ConfigNode,
            _to: &ConfigNode,
        ) -> Option<ConfigNode> {
            Some(from.clone())
        }

        fn deserialize(&mut self, _current: &ConfigNode, incoming: &ConfigNode) -> ConfigNode {
            ConfigNode::Int(incoming.as_int().unwrap_or_default() * 2)
        }

        fn update(&mut self, _dt: f32, _value: &mut ConfigNode) {
            self.updates.set(self.updates.get() + 1);
        }
    }

    fn stats(a: i32, b: i32) -> ConfigNode {
        [("a", a), ("b", b)].into_iter().collect()
    }

    #[test]
    fn test_lookup_and_enable() {
        let mut world = World::new();
        let id = world.spawn("e");
        let updates = Rc::new(Cell::new(0));
        let mut set = DataInterpolatorSet::new();
        set.set_interpolator(id, "Stats", "a", Box::new(Doubler { updates: updates.clone() }));

        assert!(set.get(id, "Stats", "a").is_some());
        assert!(set.get(id, "Stats", "b").is_none());
        assert!(set.has_component(id, "Stats"));

        assert!(set.set_interpolator_enabled(id, "Stats", "a", false));
        assert!(set.get(id, "Stats", "a").is_none());
        assert!(!set.set_interpolator_enabled(id, "Other", "a", false));
    }

    #[test]
    fn test_delta_routes_interpolated_fields() {
        let mut world = World::new();
        let id = world.spawn("e");
        let mut set = DataInterpolatorSet::new();
        set.set_interpolator(
            id,
            "Stats",
            "a",
            Box::new(Doubler {
                updates: Rc::new(Cell::new(0)),
            }),
        );

        let mut current = stats(1, 1);
        let delta = crate::config::create_delta(&stats(1, 1), &stats(5, 7));
        set.apply_component_delta(id, "Stats", &mut current, &delta);
        assert_eq!(current, stats(10, 7));

        set.set_interpolator_enabled(id, "Stats", "a", false);
        let mut current = stats(1, 1);
        set.apply_component_delta(id, "Stats", &mut current, &delta);
        assert_eq!(current, stats(5, 7));
    }

    #[test]
    fn test_full_value_routes_interpolated_fields() {
        let mut world = World::new();
        let id = world.spawn("e");
        let mut set = DataInterpolatorSet::new();
        set.set_interpolator(
            id,
            "Stats",
            "b",
            Box::new(Doubler {
                updates: Rc::new(Cell::new(0)),
            }),
        );

        let mut current = stats(0, 0);
        set.apply_component(id, "Stats", &mut current, &stats(3, 4));
        assert_eq!(current, stats(3, 8));
    }

    #[test]
    fn test_update_touches_only_present_fields() {
        let mut world = World::new();
        let id = world.spawn("e");
        world.set_component(id, "Stats", stats(1, 2)).unwrap();
        let updates = Rc::new(Cell::new(0));
        let mut set = DataInterpolatorSet::new();
        set.set_interpolator(id, "Stats", "a", Box::new(Doubler { updates: updates.clone() }));
        set.set_interpolator(id, "Missing", "a", Box::new(Doubler { updates: updates.clone() }));

        set.update(0.1, &mut world);
        assert_eq!(updates.get(), 1);
    }

    #[test]
    fn test_retriever_rewrites_outgoing_fields() {
        let mut world = World::new();
        let root = world.spawn("root");
        let child = world.spawn("child");
        world.set_parent(child, Some(root)).unwrap();
        let child_uuid = world.get(child).unwrap().uuid();

        let mut set = DataInterpolatorSet::new();
        set.set_interpolator(
            child,
            "Stats",
            "a",
            Box::new(Doubler {
                updates: Rc::new(Cell::new(0)),
            }),
        );
        let retriever = DataInterpolatorSetRetriever::new(&set, &world, root);

        let delta = retriever.create_component_delta(
            &child_uuid,
            "Stats",
            &stats(1, 1),
            &stats(9, 9),
            &crate::config::NoHints,
        );
        assert_eq!(delta.get("a"), &ConfigNode::Undefined);
        assert_eq!(delta.get("b"), &ConfigNode::Int(9));

        let unknown = retriever.create_component_delta(
            &Uuid::new_v4(),
            "Stats",
            &stats(1, 1),
            &stats(9, 9),
            &crate::config::NoHints,
        );
        assert_eq!(unknown.get("a"), &ConfigNode::Int(9));
    }
}
