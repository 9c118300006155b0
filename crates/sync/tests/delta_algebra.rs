use std::collections::BTreeMap;

use entwine::config::{create_delta, with_delta};
use entwine::{ConfigMap, ConfigNode, EntityData, EntityDataDelta};
use glam::{IVec2, Vec2};
use proptest::prelude::*;
use uuid::Uuid;

fn leaf() -> impl Strategy<Value = ConfigNode> {
    prop_oneof![
        Just(ConfigNode::Undefined),
        "[a-z]{0,6}".prop_map(ConfigNode::String),
        any::<i32>().prop_map(ConfigNode::Int),
        (-1000.0f32..1000.0).prop_map(ConfigNode::Float),
        (any::<i32>(), any::<i32>()).prop_map(|(x, y)| ConfigNode::Int2(IVec2::new(x, y))),
        (-1000.0f32..1000.0, -1000.0f32..1000.0)
            .prop_map(|(x, y)| ConfigNode::Float2(Vec2::new(x, y))),
        prop::collection::vec(any::<u8>(), 0..4).prop_map(ConfigNode::Bytes),
    ]
}

fn node() -> impl Strategy<Value = ConfigNode> {
    leaf().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..5).prop_map(ConfigNode::Sequence),
            prop::collection::btree_map("[a-d]", inner, 0..4).prop_map(ConfigNode::Map),
        ]
    })
}

fn fields() -> impl Strategy<Value = ConfigMap> {
    prop::collection::btree_map("[a-f]", node(), 0..5)
}

fn entity(name: String, components: BTreeMap<String, ConfigNode>) -> EntityData {
    let mut data = EntityData::new(name, Uuid::from_u128(7));
    for (component, value) in components {
        data.set_component(component, value);
    }
    data
}

proptest! {
    #[test]
    fn prop_delta_rebuilds_target(from in node(), to in node()) {
        let delta = create_delta(&from, &to);
        prop_assert_eq!(with_delta(&from, &delta), to);
    }

    #[test]
    fn prop_delta_of_self_is_noop(value in node()) {
        prop_assert_eq!(create_delta(&value, &value), ConfigNode::Noop);
    }

    #[test]
    fn prop_delta_between_overlapping_maps(base in fields(), overrides in fields(), removed in "[a-f]") {
        let from = ConfigNode::Map(base.clone());
        let mut target = base;
        target.extend(overrides);
        target.remove(&removed);
        let to = ConfigNode::Map(target);

        let delta = create_delta(&from, &to);
        prop_assert_eq!(with_delta(&from, &delta), to.clone());
        if from == to {
            prop_assert!(delta.is_noop());
        }
    }

    #[test]
    fn prop_entity_delta_rebuilds_target(
        from in prop::collection::btree_map("[A-C]", node(), 0..3),
        to in prop::collection::btree_map("[A-C]", node(), 0..3),
        rename in any::<bool>(),
    ) {
        let from = entity("thing".to_string(), from);
        let to = entity(if rename { "renamed".to_string() } else { "thing".to_string() }, to);

        let delta = EntityDataDelta::new(&from, &to, &Default::default());
        let mut rebuilt = from.clone();
        delta.apply_to(&mut rebuilt);
        prop_assert_eq!(&rebuilt, &to);
        prop_assert_eq!(delta.has_change(), from != to);
    }
}
