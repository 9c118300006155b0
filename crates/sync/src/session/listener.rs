use crate::entity::{EntityId, POSITION_FIELD, TRANSFORM_COMPONENT, World};
use crate::interpolation::DataInterpolatorSet;

use super::{ClientSharedData, PeerId};

/// Application hooks called by the entity session.
pub trait EntityNetworkListener {
    /// A replicated entity from `peer` was just spawned locally.
    fn on_remote_entity_created(&mut self, _world: &mut World, _entity: EntityId, _peer: PeerId) {}

    /// Called once per replicated entity, before its first update is sent
    /// (`remote == false`) or right after it was received (`remote == true`).
    fn setup_interpolators(
        &mut self,
        _set: &mut DataInterpolatorSet,
        _world: &World,
        _entity: EntityId,
        _remote: bool,
    ) {
    }

    /// Interest check for one client. Never consulted for the host.
    fn is_entity_in_view(
        &self,
        world: &World,
        entity: EntityId,
        client: &ClientSharedData,
        margin: i32,
    ) -> bool {
        is_entity_in_view_default(world, entity, client, margin)
    }
}

/// Entities without a transform are everywhere. Otherwise the position has
/// to fall inside the client's view rect grown by `margin`.
pub fn is_entity_in_view_default(
    world: &World,
    entity: EntityId,
    client: &ClientSharedData,
    margin: i32,
) -> bool {
    let Some(transform) = world.component(entity, TRANSFORM_COMPONENT) else {
        return true;
    };
    let Some(view_rect) = client.view_rect else {
        return false;
    };
    match transform.get(POSITION_FIELD).as_ivec2() {
        Some(position) => view_rect.grow(margin).contains(position),
        None => true,
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEntityNetworkListener;

impl EntityNetworkListener for DefaultEntityNetworkListener {}

#[cfg(test)]
mod tests {
    use glam::{IVec2, Vec2};

    use super::*;
    use crate::config::ConfigNode;
    use crate::session::ViewRect;

    fn at(world: &mut World, x: f32) -> EntityId {
        let id = world.spawn("e");
        let transform: ConfigNode = [(POSITION_FIELD, Vec2::new(x, 0.0))].into_iter().collect();
        world.set_component(id, TRANSFORM_COMPONENT, transform).unwrap();
        id
    }

    #[test]
    fn test_default_interest() {
        let mut world = World::new();
        let near = at(&mut world, 300.0);
        let far = at(&mut world, 1000.0);
        let nowhere = world.spawn("global");

        let client = ClientSharedData {
            view_rect: Some(ViewRect::new(IVec2::ZERO, IVec2::splat(100))),
        };
        assert!(is_entity_in_view_default(&world, near, &client, 256));
        assert!(!is_entity_in_view_default(&world, far, &client, 256));
        assert!(is_entity_in_view_default(&world, nowhere, &client, 256));

        let blind = ClientSharedData::default();
        assert!(!is_entity_in_view_default(&world, near, &blind, 256));
        assert!(is_entity_in_view_default(&world, nowhere, &blind, 256));
    }
}
