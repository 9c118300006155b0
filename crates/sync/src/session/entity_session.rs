use std::mem;
use std::sync::Arc;

use crate::bytes::{SerializationDictionary, SerializerOptions};
use crate::entity::{ComponentRegistry, EntityFactory, EntityId, PrefabLibrary, World};
use crate::net::{Connection, ConnectionStatus, NetError, OutboundPacket};

use super::peer::PeerContext;
use super::{
    DefaultEntityNetworkListener, EntityMessageType, EntityNetworkListener,
    EntityNetworkRemotePeer, EntityNetworkSessionConfig, NetworkSession, PeerId, SessionError,
    SessionEvent, ViewRect,
};

/// Replicates the networked entities of a [`World`] to every peer of a
/// [`NetworkSession`] and applies what the peers replicate back.
///
/// All methods run on the thread that owns the world.
pub struct EntityNetworkSession<C> {
    session: NetworkSession<C>,
    config: EntityNetworkSessionConfig,
    prefabs: PrefabLibrary,
    registry: ComponentRegistry,
    options: SerializerOptions,
    listener: Box<dyn EntityNetworkListener>,
    peers: Vec<EntityNetworkRemotePeer>,
    ready_to_start: bool,
    events: Vec<SessionEvent>,
}

impl<C: Connection> EntityNetworkSession<C> {
    pub fn new(
        session: NetworkSession<C>,
        prefabs: PrefabLibrary,
        registry: ComponentRegistry,
        config: EntityNetworkSessionConfig,
    ) -> Self {
        Self {
            session,
            options: SerializerOptions::new(config.serialization_version),
            config,
            prefabs,
            registry,
            listener: Box::new(DefaultEntityNetworkListener),
            peers: Vec::new(),
            ready_to_start: false,
            events: Vec::new(),
        }
    }

    pub fn with_listener(mut self, listener: Box<dyn EntityNetworkListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn set_listener(&mut self, listener: Box<dyn EntityNetworkListener>) {
        self.listener = listener;
    }

    /// Component and field names in the dictionary go on the wire as indices.
    /// Every peer needs the same dictionary.
    pub fn set_dictionary(&mut self, dictionary: SerializationDictionary) {
        self.options = SerializerOptions::new(self.config.serialization_version)
            .with_dictionary(Arc::new(dictionary));
    }

    pub fn session(&self) -> &NetworkSession<C> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut NetworkSession<C> {
        &mut self.session
    }

    pub fn config(&self) -> &EntityNetworkSessionConfig {
        &self.config
    }

    pub fn prefabs(&self) -> &PrefabLibrary {
        &self.prefabs
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub fn factory(&self) -> EntityFactory<'_> {
        EntityFactory::new(&self.prefabs, &self.registry)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.session.status()
    }

    pub fn is_host(&self) -> bool {
        self.session.is_host()
    }

    /// The host is always ready. A client is ready once the host has sent
    /// its first batch of entities.
    pub fn is_ready_to_start(&self) -> bool {
        self.is_host() || self.ready_to_start
    }

    pub fn peer(&self, peer: PeerId) -> Option<&EntityNetworkRemotePeer> {
        self.peers.iter().find(|p| p.peer_id() == peer)
    }

    pub fn peers(&self) -> impl Iterator<Item = &EntityNetworkRemotePeer> {
        self.peers.iter()
    }

    /// View rects of every client, as seen by the host.
    pub fn remote_view_ports(&self) -> Vec<ViewRect> {
        if !self.is_host() {
            return Vec::new();
        }
        self.session
            .all_shared_data()
            .filter_map(|(_, data)| data.view_rect)
            .collect()
    }

    pub fn poll_events(&mut self) -> Vec<SessionEvent> {
        mem::take(&mut self.events)
    }

    /// Receives, smooths and sends in one go. Returns the session status so
    /// the caller can tell when the session has ended.
    pub fn update(&mut self, dt: f32, world: &mut World) -> Result<ConnectionStatus, SessionError> {
        self.receive_updates(world);
        self.update_interpolators(dt, world);
        self.send_updates(dt, world)?;
        Ok(self.status())
    }

    pub fn receive_updates(&mut self, world: &mut World) {
        let packets = self.session.receive();

        for event in self.session.poll_events() {
            match &event {
                SessionEvent::PeerConnected { peer_id, .. } => {
                    if self.peer(*peer_id).is_none() {
                        self.peers.push(EntityNetworkRemotePeer::new(*peer_id));
                    }
                }
                SessionEvent::PeerDisconnected { peer_id } => {
                    if let Some(index) = self.peers.iter().position(|p| p.peer_id() == *peer_id) {
                        let mut peer = self.peers.remove(index);
                        peer.destroy(world);
                    }
                }
                _ => {}
            }
            self.events.push(event);
        }

        let is_host = self.is_host();
        let factory = EntityFactory::new(&self.prefabs, &self.registry);
        for (from, packet) in packets {
            let Some(peer) = self.peers.iter_mut().find(|p| p.peer_id() == from) else {
                log::warn!("entity message from unknown peer {from}");
                continue;
            };
            let mut ctx = PeerContext {
                factory,
                config: &self.config,
                options: &self.options,
                listener: &mut *self.listener,
                is_host,
                remote_data: self.session.shared_data(from),
            };

            match peer.receive_entity_packet(&mut ctx, world, packet) {
                Ok(EntityMessageType::ReadyToStart) => {
                    if !is_host && !self.ready_to_start {
                        log::info!("host is ready to start");
                        self.ready_to_start = true;
                        self.events.push(SessionEvent::ReadyToStart);
                    }
                }
                Ok(_) => {}
                Err(SessionError::Entity(e)) => {
                    log::warn!("entity message from peer {from} not applied: {e}");
                }
                Err(e) => {
                    log::error!("dropping peer {from}: {e}");
                    self.session.disconnect_peer(from);
                }
            }
        }
    }

    /// Advances the interpolators of every networked entity.
    pub fn update_interpolators(&mut self, dt: f32, world: &mut World) {
        let ids: Vec<EntityId> = world
            .entities()
            .filter(|(_, e)| e.network.as_ref().is_some_and(|n| !n.interpolators.is_empty()))
            .map(|(id, _)| id)
            .collect();
        for id in ids {
            let Some(mut set) = world.network_mut(id).map(|n| mem::take(&mut n.interpolators)) else {
                continue;
            };
            set.update(dt, world);
            if let Some(network) = world.network_mut(id) {
                network.interpolators = set;
            }
        }
    }

    /// Sends creates, updates and destroys to every peer, then flushes.
    pub fn send_updates(&mut self, dt: f32, world: &mut World) -> Result<(), SessionError> {
        let Some(my_peer_id) = self.session.my_peer_id() else {
            self.session.update();
            return Ok(());
        };
        self.setup_local_interpolators(world);
        let candidates = self.candidates(world, my_peer_id);

        let is_host = self.is_host();
        let factory = EntityFactory::new(&self.prefabs, &self.registry);
        let mut outgoing: Vec<(PeerId, Vec<OutboundPacket>)> = Vec::new();
        for peer in &mut self.peers {
            let mut ctx = PeerContext {
                factory,
                config: &self.config,
                options: &self.options,
                listener: &mut *self.listener,
                is_host,
                remote_data: self.session.shared_data(peer.peer_id()),
            };
            let packets = peer.send_entities(&mut ctx, world, dt, &candidates)?;
            outgoing.push((peer.peer_id(), packets));
        }

        for (peer, packets) in outgoing {
            for packet in packets {
                match self.session.send_to_peer(packet, peer) {
                    Ok(()) => {}
                    Err(e @ SessionError::Net(NetError::MessageTooLarge(_))) => {
                        log::warn!("dropping message to peer {peer}: {e}");
                    }
                    Err(e) => {
                        log::debug!("dropping messages to peer {peer}: {e}");
                        break;
                    }
                }
            }
        }

        for peer in &mut self.peers {
            peer.tick(dt);
            if peer.silence().is_some_and(|t| t > self.config.peer_timeout) {
                log::warn!("peer {} timed out", peer.peer_id());
                self.session.disconnect_peer(peer.peer_id());
            }
        }

        self.session.update();
        Ok(())
    }

    /// Networked root entities paired with their owner. The host relays
    /// everything, a client only what it owns.
    fn candidates(&self, world: &World, my_peer_id: PeerId) -> Vec<(EntityId, PeerId)> {
        let is_host = self.is_host();
        world
            .entities()
            .filter(|(_, e)| e.parent().is_none())
            .filter_map(|(id, e)| {
                let network = e.network.as_ref()?;
                match network.owner {
                    None => Some((id, my_peer_id)),
                    Some(owner) if is_host => Some((id, owner)),
                    Some(_) => None,
                }
            })
            .collect()
    }

    fn setup_local_interpolators(&mut self, world: &mut World) {
        let pending: Vec<EntityId> = world
            .entities()
            .filter(|(_, e)| {
                e.network
                    .as_ref()
                    .is_some_and(|n| !n.is_remote() && !n.interpolators.is_ready())
            })
            .map(|(id, _)| id)
            .collect();
        for id in pending {
            let Some(mut set) = world.network_mut(id).map(|n| mem::take(&mut n.interpolators)) else {
                continue;
            };
            self.listener.setup_interpolators(&mut set, world, id, false);
            set.set_ready();
            if let Some(network) = world.network_mut(id) {
                network.interpolators = set;
            }
        }
    }

    /// Leaves the session. Entities received from clients are destroyed,
    /// the host's are kept.
    pub fn close(&mut self, world: &mut World) {
        self.session.close();
        for peer in &mut self.peers {
            peer.destroy(world);
        }
        self.peers.clear();
    }
}
