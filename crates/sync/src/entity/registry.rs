use std::collections::HashMap;

use crate::config::{ConfigMap, ConfigNode};

bitflags::bitflags! {
    /// Which kinds of serialization a component field takes part in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SerializationMask: u8 {
        const PREFAB = 1 << 0;
        const SAVE_DATA = 1 << 1;
        const NETWORK = 1 << 2;
    }
}

#[derive(Debug, Clone)]
struct ComponentDescriptor {
    mask: SerializationMask,
    fields: HashMap<String, SerializationMask>,
}

/// Per-component and per-field serialization masks. Anything not declared
/// takes part in every mask.
#[derive(Debug, Clone, Default)]
pub struct ComponentRegistry {
    components: HashMap<String, ComponentDescriptor>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_component(&mut self, component: impl Into<String>, mask: SerializationMask) {
        self.components
            .entry(component.into())
            .or_insert_with(|| ComponentDescriptor {
                mask: SerializationMask::all(),
                fields: HashMap::new(),
            })
            .mask = mask;
    }

    pub fn register_field(
        &mut self,
        component: impl Into<String>,
        field: impl Into<String>,
        mask: SerializationMask,
    ) {
        self.components
            .entry(component.into())
            .or_insert_with(|| ComponentDescriptor {
                mask: SerializationMask::all(),
                fields: HashMap::new(),
            })
            .fields
            .insert(field.into(), mask);
    }

    pub fn component_mask(&self, component: &str) -> SerializationMask {
        self.components
            .get(component)
            .map(|c| c.mask)
            .unwrap_or(SerializationMask::all())
    }

    pub fn field_mask(&self, component: &str, field: &str) -> SerializationMask {
        self.components
            .get(component)
            .and_then(|c| c.fields.get(field).copied())
            .unwrap_or(SerializationMask::all())
    }

    /// Returns the component value restricted to fields in `mask`, or `None`
    /// if the component itself is excluded.
    pub fn filter(
        &self,
        component: &str,
        value: &ConfigNode,
        mask: SerializationMask,
    ) -> Option<ConfigNode> {
        if !self.component_mask(component).intersects(mask) {
            return None;
        }
        let Some(descriptor) = self.components.get(component) else {
            return Some(value.clone());
        };

        match value {
            ConfigNode::Map(fields) => {
                let filtered: ConfigMap = fields
                    .iter()
                    .filter(|(name, _)| {
                        descriptor
                            .fields
                            .get(name.as_str())
                            .is_none_or(|m| m.intersects(mask))
                    })
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                Some(ConfigNode::Map(filtered))
            }
            other => Some(other.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undeclared_fields_pass_every_mask() {
        let registry = ComponentRegistry::new();
        let value: ConfigNode = [("a", 1)].into_iter().collect();

        assert_eq!(
            registry.filter("Anything", &value, SerializationMask::NETWORK),
            Some(value)
        );
    }

    #[test]
    fn test_field_masks() {
        let mut registry = ComponentRegistry::new();
        registry.register_field("Player", "input", SerializationMask::NETWORK);
        registry.register_field(
            "Player",
            "save_slot",
            SerializationMask::SAVE_DATA | SerializationMask::PREFAB,
        );

        let value: ConfigNode = [("input", 1), ("save_slot", 2), ("hp", 3)]
            .into_iter()
            .collect();

        let network = registry
            .filter("Player", &value, SerializationMask::NETWORK)
            .unwrap();
        assert!(network.has_key("input"));
        assert!(network.has_key("hp"));
        assert!(!network.has_key("save_slot"));
    }

    #[test]
    fn test_component_excluded() {
        let mut registry = ComponentRegistry::new();
        registry.register_component("EditorOnly", SerializationMask::SAVE_DATA);

        assert!(
            registry
                .filter("EditorOnly", &ConfigNode::empty_map(), SerializationMask::NETWORK)
                .is_none()
        );
    }
}
