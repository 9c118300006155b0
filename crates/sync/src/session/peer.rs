use std::collections::HashMap;
use std::mem;

use crate::bytes::{Deserializer, Serializer, SerializerOptions};
use crate::entity::{
    EntityData, EntityDataDelta, EntityDataDeltaOptions, EntityFactory, EntityId,
    EntitySerializationOptions, NetworkComponent, SerializationMask, World,
};
use crate::interpolation::DataInterpolatorSetRetriever;
use crate::net::{InboundPacket, OutboundPacket};

use super::{
    ClientSharedData, EntityMessageType, EntityNetworkListener, EntityNetworkSessionConfig,
    HOST_PEER_ID, NetworkIdPool, PeerId, SessionError,
};

/// What a peer needs from its session while sending or receiving.
pub(crate) struct PeerContext<'a> {
    pub factory: EntityFactory<'a>,
    pub config: &'a EntityNetworkSessionConfig,
    pub options: &'a SerializerOptions,
    pub listener: &'a mut dyn EntityNetworkListener,
    pub is_host: bool,
    /// What the remote client published, if anything.
    pub remote_data: Option<&'a ClientSharedData>,
}

#[derive(Debug)]
struct OutboundEntity {
    network_id: u16,
    /// Last state the remote is known to have been sent.
    data: EntityData,
    time_since_send: f32,
    alive: bool,
}

#[derive(Debug)]
struct InboundEntity {
    entity: EntityId,
    data: EntityData,
}

/// Replication state between this session and one remote peer: the
/// entities sent to it under our network ids and the entities received
/// from it under its ids.
#[derive(Debug)]
pub struct EntityNetworkRemotePeer {
    peer_id: PeerId,
    alive: bool,
    outbound: HashMap<EntityId, OutboundEntity>,
    inbound: HashMap<u16, InboundEntity>,
    ids: NetworkIdPool,
    time_since_send: f32,
    time_since_receive: f32,
    has_received: bool,
    sent_ready: bool,
}

impl EntityNetworkRemotePeer {
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            alive: true,
            outbound: HashMap::new(),
            inbound: HashMap::new(),
            ids: NetworkIdPool::new(),
            time_since_send: 0.0,
            time_since_receive: 0.0,
            has_received: false,
            sent_ready: false,
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn outbound_count(&self) -> usize {
        self.outbound.len()
    }

    pub fn inbound_count(&self) -> usize {
        self.inbound.len()
    }

    pub fn network_id_of(&self, entity: EntityId) -> Option<u16> {
        self.outbound.get(&entity).map(|e| e.network_id)
    }

    pub fn inbound_entity(&self, network_id: u16) -> Option<EntityId> {
        self.inbound.get(&network_id).map(|e| e.entity)
    }

    /// Seconds since the last message from this peer. Only counts once the
    /// peer has started replicating to us.
    pub fn silence(&self) -> Option<f32> {
        self.has_received.then_some(self.time_since_receive)
    }

    pub(crate) fn tick(&mut self, dt: f32) {
        self.time_since_receive += dt;
    }

    pub(crate) fn is_remote_ready(&self, ctx: &PeerContext<'_>) -> bool {
        self.peer_id == HOST_PEER_ID || ctx.remote_data.is_some_and(|d| d.view_rect.is_some())
    }

    fn is_in_view(&self, ctx: &PeerContext<'_>, world: &World, entity: EntityId) -> bool {
        if self.peer_id == HOST_PEER_ID {
            return true;
        }
        let blind = ClientSharedData::default();
        let data = ctx.remote_data.unwrap_or(&blind);
        ctx.listener
            .is_entity_in_view(world, entity, data, ctx.config.view_margin)
    }

    /// Diffs every candidate against what this peer was last sent and
    /// returns the resulting messages. `candidates` pairs each replicated
    /// root entity with its owner.
    pub(crate) fn send_entities(
        &mut self,
        ctx: &mut PeerContext<'_>,
        world: &World,
        dt: f32,
        candidates: &[(EntityId, PeerId)],
    ) -> Result<Vec<OutboundPacket>, SessionError> {
        self.time_since_send += dt;
        if !self.alive || !self.is_remote_ready(ctx) {
            return Ok(Vec::new());
        }

        for entity in self.outbound.values_mut() {
            entity.alive = false;
        }

        let mut packets = Vec::new();
        for &(entity, owner) in candidates {
            if owner == self.peer_id || !self.is_in_view(ctx, world, entity) {
                continue;
            }
            let result = if self.outbound.contains_key(&entity) {
                self.update_entity(ctx, world, dt, entity)
            } else {
                self.create_entity(ctx, world, entity).map(Some)
            };
            match result {
                Ok(Some(packet)) => packets.push(packet),
                Ok(None) => {}
                // A broken entity is skipped; the rest still replicate.
                Err(SessionError::Entity(e)) => {
                    log::warn!("cannot replicate {entity} to peer {}: {e}", self.peer_id);
                }
                Err(e) => return Err(e),
            }
        }

        let dead: Vec<EntityId> = self
            .outbound
            .iter()
            .filter(|(_, e)| !e.alive)
            .map(|(id, _)| *id)
            .collect();
        for entity in dead {
            if let Some(remote) = self.outbound.remove(&entity) {
                packets.push(self.destroy_entity(ctx, remote));
            }
        }

        if packets.is_empty() && self.time_since_send >= ctx.config.max_keep_alive_interval {
            packets.push(message(ctx, EntityMessageType::KeepAlive, 0, Vec::new()));
        }
        if !packets.is_empty() {
            if ctx.is_host && !self.sent_ready {
                log::debug!("peer {} is ready to start", self.peer_id);
                packets.push(message(ctx, EntityMessageType::ReadyToStart, 0, Vec::new()));
                self.sent_ready = true;
            }
            self.time_since_send = 0.0;
        }
        Ok(packets)
    }

    fn create_entity(
        &mut self,
        ctx: &PeerContext<'_>,
        world: &World,
        entity: EntityId,
    ) -> Result<OutboundPacket, SessionError> {
        let data = ctx
            .factory
            .serialize_entity(world, entity, &EntitySerializationOptions::new(SerializationMask::NETWORK))?;
        let delta_options = EntityDataDeltaOptions {
            preserve_order: true,
            ..Default::default()
        };
        let delta = ctx.factory.entity_data_to_prefab_delta(&data, &delta_options)?;
        let network_id = self.ids.allocate()?;
        log::debug!(
            "creating {entity} as {network_id} on peer {} ({})",
            self.peer_id,
            data.name
        );

        self.outbound.insert(
            entity,
            OutboundEntity {
                network_id,
                data,
                time_since_send: 0.0,
                alive: true,
            },
        );
        let body = Serializer::to_bytes(&delta, ctx.options);
        Ok(message(ctx, EntityMessageType::Create, network_id, body))
    }

    fn update_entity(
        &mut self,
        ctx: &PeerContext<'_>,
        world: &World,
        dt: f32,
        entity: EntityId,
    ) -> Result<Option<OutboundPacket>, SessionError> {
        let Some(remote) = self.outbound.get_mut(&entity) else {
            return Ok(None);
        };
        remote.alive = true;
        remote.time_since_send += dt;
        if remote.time_since_send < ctx.config.min_send_interval {
            return Ok(None);
        }

        let data = ctx
            .factory
            .serialize_entity(world, entity, &EntitySerializationOptions::new(SerializationMask::NETWORK))?;
        let delta = match world.network(entity) {
            Some(network) => {
                let retriever = DataInterpolatorSetRetriever::new(&network.interpolators, world, entity);
                let options = EntityDataDeltaOptions {
                    preserve_order: true,
                    interpolators: Some(&retriever),
                    ..Default::default()
                };
                EntityDataDelta::new(&remote.data, &data, &options)
            }
            None => EntityDataDelta::new(
                &remote.data,
                &data,
                &EntityDataDeltaOptions {
                    preserve_order: true,
                    ..Default::default()
                },
            ),
        };
        if !delta.has_change() {
            return Ok(None);
        }

        // Interpolators may have held fields back, so track what was sent
        // rather than the full new state.
        remote.data.apply_delta(&delta);
        remote.time_since_send = 0.0;
        let network_id = remote.network_id;
        log::trace!("updating {network_id} on peer {}", self.peer_id);
        let body = Serializer::to_bytes(&delta, ctx.options);
        Ok(Some(message(ctx, EntityMessageType::Update, network_id, body)))
    }

    fn destroy_entity(&mut self, ctx: &PeerContext<'_>, remote: OutboundEntity) -> OutboundPacket {
        log::debug!("destroying {} on peer {}", remote.network_id, self.peer_id);
        self.ids.release(remote.network_id);
        message(ctx, EntityMessageType::Destroy, remote.network_id, Vec::new())
    }

    /// Applies one entity message from this peer. Returns its type.
    pub(crate) fn receive_entity_packet(
        &mut self,
        ctx: &mut PeerContext<'_>,
        world: &mut World,
        mut packet: InboundPacket,
    ) -> Result<EntityMessageType, SessionError> {
        let kind = EntityMessageType::try_from(packet.extract_header::<u8>(ctx.options)?)?;
        let network_id = packet.extract_header::<u16>(ctx.options)?;
        self.time_since_receive = 0.0;
        self.has_received = true;

        match kind {
            EntityMessageType::Create => {
                let delta: EntityDataDelta = Deserializer::from_bytes(packet.bytes(), ctx.options)?;
                self.on_create(ctx, world, network_id, &delta)?;
            }
            EntityMessageType::Update => {
                let delta: EntityDataDelta = Deserializer::from_bytes(packet.bytes(), ctx.options)?;
                self.on_update(ctx, world, network_id, &delta);
            }
            EntityMessageType::Destroy => match self.inbound.remove(&network_id) {
                Some(remote) => {
                    log::debug!("peer {} destroyed {network_id}", self.peer_id);
                    world.destroy(remote.entity);
                }
                None => log::warn!(
                    "destroy for unknown entity {network_id} from peer {}",
                    self.peer_id
                ),
            },
            EntityMessageType::KeepAlive | EntityMessageType::ReadyToStart => {}
        }
        Ok(kind)
    }

    fn on_create(
        &mut self,
        ctx: &mut PeerContext<'_>,
        world: &mut World,
        network_id: u16,
        delta: &EntityDataDelta,
    ) -> Result<(), SessionError> {
        if let Some(previous) = self.inbound.remove(&network_id) {
            log::warn!(
                "peer {} reused network id {network_id}, replacing {}",
                self.peer_id,
                previous.entity
            );
            world.destroy(previous.entity);
        }

        let data = ctx.factory.prefab_delta_to_entity_data(delta)?;
        let (entity, parent) = ctx.factory.load_entity_delta(world, delta, None)?;
        if let Some(parent_uuid) = parent {
            match world.find_by_uuid(&parent_uuid) {
                Some(parent) => {
                    if let Err(e) = world.set_parent(entity, Some(parent)) {
                        log::warn!("cannot attach {entity} to {parent_uuid}: {e}");
                    }
                }
                None => log::warn!("parent {parent_uuid} of {entity} not found, leaving it unparented"),
            }
        }

        let mut network = NetworkComponent::remote(self.peer_id);
        ctx.listener
            .setup_interpolators(&mut network.interpolators, world, entity, true);
        network.interpolators.set_ready();
        world.set_network(entity, network)?;

        log::debug!(
            "peer {} created {network_id} as {entity} ({})",
            self.peer_id,
            data.name
        );
        self.inbound.insert(network_id, InboundEntity { entity, data });
        ctx.listener
            .on_remote_entity_created(world, entity, self.peer_id);
        Ok(())
    }

    fn on_update(
        &mut self,
        ctx: &PeerContext<'_>,
        world: &mut World,
        network_id: u16,
        delta: &EntityDataDelta,
    ) {
        let Some(remote) = self.inbound.get_mut(&network_id) else {
            log::warn!(
                "update for unknown entity {network_id} from peer {}",
                self.peer_id
            );
            return;
        };

        let mut interpolators = world
            .network_mut(remote.entity)
            .map(|n| mem::take(&mut n.interpolators));
        let result = ctx
            .factory
            .update_entity_delta(world, remote.entity, delta, interpolators.as_mut());
        if let (Some(set), Some(network)) = (interpolators, world.network_mut(remote.entity)) {
            network.interpolators = set;
        }
        if let Err(e) = result {
            log::warn!("failed to apply update to {}: {e}", remote.entity);
        }
        remote.data.apply_delta(delta);
    }

    /// Drops everything received from this peer. Entities of the host are
    /// left in place.
    pub fn destroy(&mut self, world: &mut World) {
        if !self.alive {
            return;
        }
        if self.peer_id != HOST_PEER_ID {
            for remote in self.inbound.values() {
                world.destroy(remote.entity);
            }
        }
        self.inbound.clear();
        self.outbound.clear();
        self.alive = false;
    }
}

fn message(ctx: &PeerContext<'_>, kind: EntityMessageType, network_id: u16, body: Vec<u8>) -> OutboundPacket {
    let mut packet = OutboundPacket::new(body);
    packet.add_header_value(&network_id, ctx.options);
    packet.add_header_value(&(kind as u8), ctx.options);
    packet
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigMap, ConfigNode};
    use crate::entity::{ComponentRegistry, PrefabLibrary};
    use crate::session::DefaultEntityNetworkListener;

    struct Fixture {
        prefabs: PrefabLibrary,
        registry: ComponentRegistry,
        config: EntityNetworkSessionConfig,
        options: SerializerOptions,
        listener: DefaultEntityNetworkListener,
    }

    impl Fixture {
        fn new() -> Self {
            let config = EntityNetworkSessionConfig::default();
            Self {
                prefabs: PrefabLibrary::new(),
                registry: ComponentRegistry::new(),
                options: SerializerOptions::new(config.serialization_version),
                config,
                listener: DefaultEntityNetworkListener,
            }
        }

        fn ctx(&mut self, is_host: bool) -> PeerContext<'_> {
            PeerContext {
                factory: EntityFactory::new(&self.prefabs, &self.registry),
                config: &self.config,
                options: &self.options,
                listener: &mut self.listener,
                is_host,
                remote_data: None,
            }
        }
    }

    fn decode(packet: &OutboundPacket, options: &SerializerOptions) -> (EntityMessageType, u16, InboundPacket) {
        let mut inbound = InboundPacket::new(packet.bytes().to_vec());
        let kind = EntityMessageType::try_from(inbound.extract_header::<u8>(options).unwrap()).unwrap();
        let network_id = inbound.extract_header::<u16>(options).unwrap();
        (kind, network_id, inbound)
    }

    fn position(x: f32, y: f32) -> ConfigNode {
        [("x", x), ("y", y)].into_iter().collect()
    }

    fn mover(world: &mut World) -> EntityId {
        let id = world.spawn("mover");
        world.set_component(id, "Position", position(0.0, 0.0)).unwrap();
        world.set_network(id, NetworkComponent::local()).unwrap();
        id
    }

    #[test]
    fn test_update_only_carries_changed_field() {
        let mut fx = Fixture::new();
        let mut world = World::new();
        let id = mover(&mut world);
        let candidates = [(id, 1)];
        let mut host = EntityNetworkRemotePeer::new(HOST_PEER_ID);

        let packets = host.send_entities(&mut fx.ctx(false), &world, 0.1, &candidates).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(decode(&packets[0], &fx.options).0, EntityMessageType::Create);
        let network_id = host.network_id_of(id).unwrap();

        let packets = host.send_entities(&mut fx.ctx(false), &world, 0.1, &candidates).unwrap();
        assert!(packets.is_empty());

        world.component_mut(id, "Position").unwrap().insert("x", 5.0f32);
        let packets = host.send_entities(&mut fx.ctx(false), &world, 0.1, &candidates).unwrap();
        assert_eq!(packets.len(), 1);
        let (kind, sent_id, body) = decode(&packets[0], &fx.options);
        assert_eq!(kind, EntityMessageType::Update);
        assert_eq!(sent_id, network_id);
        let delta: EntityDataDelta = Deserializer::from_bytes(body.bytes(), &fx.options).unwrap();
        assert_eq!(
            delta.component("Position"),
            Some(&ConfigNode::DeltaMap(ConfigMap::from([(
                "x".to_string(),
                ConfigNode::Float(5.0)
            )])))
        );
        assert!(delta.component("Transform").is_none());
    }

    #[test]
    fn test_broken_entity_does_not_block_others() {
        let mut fx = Fixture::new();
        let mut world = World::new();
        let broken = mover(&mut world);
        world.get_mut(broken).unwrap().prefab = "ghost".to_string();
        let good = mover(&mut world);
        let candidates = [(broken, 1), (good, 1)];
        let mut host = EntityNetworkRemotePeer::new(HOST_PEER_ID);

        for _ in 0..3 {
            let packets = host.send_entities(&mut fx.ctx(false), &world, 0.1, &candidates).unwrap();
            assert!(host.network_id_of(broken).is_none());
            assert!(host.network_id_of(good).is_some());
            assert!(packets.len() <= 1);
        }
        assert_eq!(host.network_id_of(good), Some(0));

        world.get_mut(broken).unwrap().prefab.clear();
        let packets = host.send_entities(&mut fx.ctx(false), &world, 0.1, &candidates).unwrap();
        assert_eq!(decode(&packets[0], &fx.options).0, EntityMessageType::Create);
        assert_eq!(host.network_id_of(broken), Some(1));
    }

    #[test]
    fn test_min_send_interval() {
        let mut fx = Fixture::new();
        let mut world = World::new();
        let id = mover(&mut world);
        let candidates = [(id, 1)];
        let mut host = EntityNetworkRemotePeer::new(HOST_PEER_ID);
        host.send_entities(&mut fx.ctx(false), &world, 0.0, &candidates).unwrap();

        world.component_mut(id, "Position").unwrap().insert("y", 3.0f32);
        let packets = host.send_entities(&mut fx.ctx(false), &world, 0.01, &candidates).unwrap();
        assert!(packets.is_empty());
        let packets = host.send_entities(&mut fx.ctx(false), &world, 0.05, &candidates).unwrap();
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn test_keep_alive_when_idle() {
        let mut fx = Fixture::new();
        let world = World::new();
        let mut host = EntityNetworkRemotePeer::new(HOST_PEER_ID);

        assert!(host.send_entities(&mut fx.ctx(false), &world, 0.5, &[]).unwrap().is_empty());
        let packets = host.send_entities(&mut fx.ctx(false), &world, 0.6, &[]).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(decode(&packets[0], &fx.options).0, EntityMessageType::KeepAlive);
        assert!(host.send_entities(&mut fx.ctx(false), &world, 0.1, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_client_waits_for_view_rect() {
        let mut fx = Fixture::new();
        let mut world = World::new();
        let id = mover(&mut world);
        let mut client = EntityNetworkRemotePeer::new(1);

        let packets = client.send_entities(&mut fx.ctx(true), &world, 0.1, &[(id, 0)]).unwrap();
        assert!(packets.is_empty());
        assert_eq!(client.outbound_count(), 0);
    }

    #[test]
    fn test_host_marks_first_batch_ready() {
        let mut fx = Fixture::new();
        let mut world = World::new();
        let id = mover(&mut world);
        let mut client = EntityNetworkRemotePeer::new(1);
        let shared = ClientSharedData {
            view_rect: Some(super::super::ViewRect::new(glam::IVec2::ZERO, glam::IVec2::splat(10))),
        };

        let mut ctx = fx.ctx(true);
        ctx.remote_data = Some(&shared);
        let packets = client.send_entities(&mut ctx, &world, 0.1, &[(id, 0)]).unwrap();
        let kinds: Vec<_> = packets.iter().map(|p| decode(p, &fx.options).0).collect();
        assert_eq!(kinds, [EntityMessageType::Create, EntityMessageType::ReadyToStart]);
    }

    #[test]
    fn test_replicates_create_update_destroy() {
        let mut fx = Fixture::new();
        let mut source = World::new();
        let id = mover(&mut source);
        let mut sender = EntityNetworkRemotePeer::new(HOST_PEER_ID);

        let mut replica = World::new();
        let mut receiver = EntityNetworkRemotePeer::new(1);
        let mut deliver = |fx: &mut Fixture, packets: Vec<OutboundPacket>, replica: &mut World| {
            for packet in packets {
                let inbound = InboundPacket::new(packet.into_bytes());
                receiver.receive_entity_packet(&mut fx.ctx(true), replica, inbound).unwrap();
            }
        };

        let packets = sender.send_entities(&mut fx.ctx(false), &source, 0.1, &[(id, 1)]).unwrap();
        deliver(&mut fx, packets, &mut replica);
        let (copy, entity) = replica.entities().next().unwrap();
        assert_eq!(entity.name, "mover");
        assert_eq!(replica.network(copy).and_then(|n| n.owner), Some(1));

        source.component_mut(id, "Position").unwrap().insert("x", 5.0f32);
        let packets = sender.send_entities(&mut fx.ctx(false), &source, 0.1, &[(id, 1)]).unwrap();
        deliver(&mut fx, packets, &mut replica);
        assert_eq!(replica.component(copy, "Position"), Some(&position(5.0, 0.0)));

        let packets = sender.send_entities(&mut fx.ctx(false), &source, 0.1, &[]).unwrap();
        deliver(&mut fx, packets, &mut replica);
        assert!(replica.is_empty());
        assert_eq!(sender.outbound_count(), 0);
    }

    #[test]
    fn test_destroy_keeps_host_entities() {
        let mut fx = Fixture::new();
        let mut source = World::new();
        let a = mover(&mut source);
        let b = mover(&mut source);
        let mut sender_a = EntityNetworkRemotePeer::new(HOST_PEER_ID);
        let mut sender_b = EntityNetworkRemotePeer::new(HOST_PEER_ID);
        let from_host_packets = sender_a.send_entities(&mut fx.ctx(false), &source, 0.1, &[(a, 1)]).unwrap();
        let from_client_packets = sender_b.send_entities(&mut fx.ctx(false), &source, 0.1, &[(b, 1)]).unwrap();

        let mut replica = World::new();
        let mut from_host = EntityNetworkRemotePeer::new(HOST_PEER_ID);
        let mut from_client = EntityNetworkRemotePeer::new(2);
        for packet in from_host_packets {
            from_host
                .receive_entity_packet(&mut fx.ctx(false), &mut replica, InboundPacket::new(packet.into_bytes()))
                .unwrap();
        }
        for packet in from_client_packets {
            from_client
                .receive_entity_packet(&mut fx.ctx(true), &mut replica, InboundPacket::new(packet.into_bytes()))
                .unwrap();
        }
        assert_eq!(replica.entity_count(), 2);

        from_host.destroy(&mut replica);
        assert_eq!(replica.entity_count(), 2);
        from_client.destroy(&mut replica);
        assert_eq!(replica.entity_count(), 1);
        assert!(!from_client.is_alive());
    }
}
