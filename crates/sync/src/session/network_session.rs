use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use crate::bytes::{CURRENT_VERSION, Deserializer, Serializer, SerializerOptions};
use crate::net::{
    AckUnreliableConnection, ChannelSettings, Connection, ConnectionStatus, InboundPacket,
    MessageQueue, NetError, NetworkStats, OutboundPacket,
};

use super::messages::ENTITY_MESSAGE;
use super::{ClientSharedData, ControlMessage, HOST_PEER_ID, NetworkSessionConfig, PeerId, SessionError};

const CONTROL_CHANNEL: u8 = 0;
const SHARED_DATA_CHANNEL: u8 = 1;

/// Seconds a connection may stay silent before saying hello.
const HANDSHAKE_TIMEOUT: f32 = 10.0;
/// Seconds a closing connection waits for its last messages to be acked.
const CLOSE_TIMEOUT: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Host,
    Client,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The host accepted this client under `peer_id`.
    Joined { peer_id: PeerId },
    PeerConnected { peer_id: PeerId, name: String },
    PeerDisconnected { peer_id: PeerId },
    Rejected { reason: String },
    /// The host has sent its first batch of entities.
    ReadyToStart,
}

struct PeerConnection<C> {
    queue: MessageQueue<C>,
    /// `None` until the handshake completes.
    peer_id: Option<PeerId>,
    name: String,
    /// Set once the connection should close after its queue drains.
    closing: Option<Instant>,
}

/// Peer bookkeeping and the hello/welcome handshake over one
/// [`MessageQueue`] per connection. Entity messages pass through untouched.
pub struct NetworkSession<C> {
    mode: SessionMode,
    config: NetworkSessionConfig,
    name: String,
    my_peer_id: Option<PeerId>,
    connections: Vec<PeerConnection<C>>,
    shared_data: BTreeMap<PeerId, ClientSharedData>,
    my_shared_data: ClientSharedData,
    shared_data_modified: bool,
    last_shared_data_send: Option<Instant>,
    events: VecDeque<SessionEvent>,
    options: SerializerOptions,
    closed: bool,
}

impl<C: Connection> NetworkSession<C> {
    pub fn host(config: NetworkSessionConfig, name: impl Into<String>) -> Self {
        let name = name.into();
        log::info!("hosting session as '{name}' for up to {} peers", config.max_peers);
        let mut session = Self::new(SessionMode::Host, config, name);
        session.my_peer_id = Some(HOST_PEER_ID);
        session
    }

    pub fn join(
        config: NetworkSessionConfig,
        name: impl Into<String>,
        connection: C,
    ) -> Result<Self, SessionError> {
        let mut session = Self::new(SessionMode::Client, config, name.into());
        let mut host = session.new_connection(connection)?;
        host.peer_id = Some(HOST_PEER_ID);
        let hello = ControlMessage::Hello {
            version: session.config.network_version,
            name: session.name.clone(),
        };
        host.queue
            .enqueue(Serializer::to_bytes(&hello, &session.options), CONTROL_CHANNEL)?;
        session.connections.push(host);
        log::info!("joining session as '{}'", session.name);
        Ok(session)
    }

    fn new(mode: SessionMode, config: NetworkSessionConfig, name: String) -> Self {
        Self {
            mode,
            config,
            name,
            my_peer_id: None,
            connections: Vec::new(),
            shared_data: BTreeMap::new(),
            my_shared_data: ClientSharedData::default(),
            shared_data_modified: false,
            last_shared_data_send: None,
            events: VecDeque::new(),
            options: SerializerOptions::new(CURRENT_VERSION),
            closed: false,
        }
    }

    fn new_connection(&self, connection: C) -> Result<PeerConnection<C>, NetError> {
        let mut queue = MessageQueue::with_config(
            AckUnreliableConnection::new(connection),
            self.config.queue.clone(),
        );
        queue.set_channel(CONTROL_CHANNEL, ChannelSettings::new(true, true))?;
        queue.set_channel(SHARED_DATA_CHANNEL, ChannelSettings::new(false, true))?;
        Ok(PeerConnection {
            queue,
            peer_id: None,
            name: String::new(),
            closing: None,
        })
    }

    /// Takes a new incoming connection. It becomes a peer once it says hello.
    pub fn accept(&mut self, connection: C) -> Result<(), SessionError> {
        if self.mode != SessionMode::Host || self.closed {
            log::warn!("ignoring incoming connection: not hosting");
            return Ok(());
        }
        let connection = self.new_connection(connection)?;
        self.connections.push(connection);
        Ok(())
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn is_host(&self) -> bool {
        self.mode == SessionMode::Host
    }

    pub fn my_peer_id(&self) -> Option<PeerId> {
        self.my_peer_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &NetworkSessionConfig {
        &self.config
    }

    pub fn status(&self) -> ConnectionStatus {
        if self.closed {
            return ConnectionStatus::Closed;
        }
        match self.mode {
            SessionMode::Host => ConnectionStatus::Open,
            SessionMode::Client => match self.connections.first() {
                None => ConnectionStatus::Closed,
                Some(_) if self.my_peer_id.is_none() => ConnectionStatus::Connecting,
                Some(host) => host.queue.status(),
            },
        }
    }

    /// Remote peers that completed the handshake.
    pub fn peers(&self) -> Vec<PeerId> {
        self.connections
            .iter()
            .filter(|c| c.closing.is_none())
            .filter_map(|c| c.peer_id)
            .collect()
    }

    pub fn peer_name(&self, peer: PeerId) -> Option<&str> {
        self.find(peer).map(|c| c.name.as_str())
    }

    pub fn peer_stats(&self, peer: PeerId) -> Option<&NetworkStats> {
        self.find(peer).map(|c| c.queue.connection().network_stats())
    }

    pub fn peer_latency(&self, peer: PeerId) -> Option<f32> {
        self.find(peer).map(|c| c.queue.latency())
    }

    /// Data published by a client. Only the host receives it.
    pub fn shared_data(&self, peer: PeerId) -> Option<&ClientSharedData> {
        self.shared_data.get(&peer)
    }

    pub fn all_shared_data(&self) -> impl Iterator<Item = (PeerId, &ClientSharedData)> {
        self.shared_data.iter().map(|(peer, data)| (*peer, data))
    }

    pub fn my_shared_data(&self) -> &ClientSharedData {
        &self.my_shared_data
    }

    /// Changes are sent to the host on the next update.
    pub fn my_shared_data_mut(&mut self) -> &mut ClientSharedData {
        self.shared_data_modified = true;
        &mut self.my_shared_data
    }

    pub fn poll_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    pub fn send_to_peer(&mut self, mut packet: OutboundPacket, peer: PeerId) -> Result<(), SessionError> {
        let connection = self
            .connections
            .iter_mut()
            .find(|c| c.peer_id == Some(peer) && c.closing.is_none())
            .ok_or(SessionError::UnknownPeer(peer))?;
        packet.add_header(&[ENTITY_MESSAGE]);
        connection.queue.enqueue(packet, CONTROL_CHANNEL)?;
        Ok(())
    }

    /// Says goodbye to one peer and drops it once the goodbye is acked.
    pub fn disconnect_peer(&mut self, peer: PeerId) {
        let message = Serializer::to_bytes(&ControlMessage::Disconnect, &self.options);
        if let Some(connection) = self.connections.iter_mut().find(|c| c.peer_id == Some(peer)) {
            log::info!("disconnecting peer {peer}");
            if let Err(e) = connection.queue.enqueue(message, CONTROL_CHANNEL) {
                log::warn!("failed to send disconnect to peer {peer}: {e}");
            }
            connection.closing.get_or_insert_with(Instant::now);
        }
    }

    /// Notifies every peer and closes all connections.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        let message = Serializer::to_bytes(&ControlMessage::Disconnect, &self.options);
        for connection in &mut self.connections {
            if connection.queue.enqueue(message.clone(), CONTROL_CHANNEL).is_ok() {
                let _ = connection.queue.send_all();
            }
            connection.queue.close();
        }
        self.connections.clear();
        self.shared_data.clear();
        self.closed = true;
        log::info!("session closed");
    }

    pub fn receive(&mut self) -> Vec<(PeerId, InboundPacket)> {
        self.receive_at(Instant::now())
    }

    /// Processes session traffic and returns the entity messages received,
    /// tagged with the peer they came from.
    pub fn receive_at(&mut self, now: Instant) -> Vec<(PeerId, InboundPacket)> {
        let mut entity_packets = Vec::new();
        for index in 0..self.connections.len() {
            let packets = self.connections[index].queue.receive_packets_at(now);
            for mut packet in packets {
                if packet.bytes().first() == Some(&ENTITY_MESSAGE) {
                    let _ = packet.extract_header::<u8>(&self.options);
                    match self.connections[index].peer_id {
                        Some(peer) => entity_packets.push((peer, packet)),
                        None => log::warn!("entity message before handshake, dropping"),
                    }
                    continue;
                }
                match Deserializer::from_bytes::<ControlMessage>(packet.bytes(), &self.options) {
                    Ok(message) => self.handle_control(index, message, now),
                    Err(e) => {
                        log::error!("malformed session message, closing connection: {e}");
                        self.connections[index].queue.close();
                    }
                }
            }
        }
        self.remove_closed(now);
        entity_packets
    }

    pub fn update(&mut self) {
        self.update_at(Instant::now());
    }

    /// Sends queued messages on every connection.
    pub fn update_at(&mut self, now: Instant) {
        if self.closed {
            return;
        }
        self.send_shared_data(now);

        for connection in &mut self.connections {
            if let Err(e) = connection.queue.send_all_at(now) {
                log::warn!("send to peer {:?} failed, closing: {e}", connection.peer_id);
                connection.queue.close();
            }
            if let Some(since) = connection.closing {
                let expired = now.saturating_duration_since(since).as_secs_f32() > CLOSE_TIMEOUT;
                if expired || connection.queue.pending_count() == 0 {
                    connection.queue.close();
                }
            }
        }
        self.remove_closed(now);
    }

    fn send_shared_data(&mut self, now: Instant) {
        if self.mode != SessionMode::Client || self.my_peer_id.is_none() {
            return;
        }
        let due = match self.last_shared_data_send {
            None => true,
            Some(last) => {
                now.saturating_duration_since(last).as_secs_f32() >= self.config.shared_data_interval
            }
        };
        if !due && !self.shared_data_modified {
            return;
        }

        let message = ControlMessage::SharedData(self.my_shared_data.clone());
        let bytes = Serializer::to_bytes(&message, &self.options);
        if let Some(host) = self.connections.first_mut() {
            if let Err(e) = host.queue.enqueue(bytes, SHARED_DATA_CHANNEL) {
                log::warn!("failed to queue shared data: {e}");
                return;
            }
        }
        self.shared_data_modified = false;
        self.last_shared_data_send = Some(now);
    }

    fn handle_control(&mut self, index: usize, message: ControlMessage, now: Instant) {
        match (self.mode, message) {
            (SessionMode::Host, ControlMessage::Hello { version, name }) => {
                self.on_hello(index, version, name, now);
            }
            (SessionMode::Client, ControlMessage::Welcome { peer_id, name }) => {
                if self.my_peer_id.is_some() {
                    log::warn!("duplicate welcome ignored");
                    return;
                }
                log::info!("joined '{name}' as peer {peer_id}");
                self.my_peer_id = Some(peer_id);
                self.connections[index].name = name.clone();
                self.events.push_back(SessionEvent::Joined { peer_id });
                self.events.push_back(SessionEvent::PeerConnected {
                    peer_id: HOST_PEER_ID,
                    name,
                });
            }
            (SessionMode::Client, ControlMessage::Reject { reason }) => {
                log::warn!("rejected by host: {reason}");
                self.connections[index].queue.close();
                self.events.push_back(SessionEvent::Rejected { reason });
            }
            (SessionMode::Host, ControlMessage::SharedData(data)) => {
                match self.connections[index].peer_id {
                    Some(peer) => {
                        self.shared_data.insert(peer, data);
                    }
                    None => log::warn!("shared data before handshake, dropping"),
                }
            }
            (_, ControlMessage::Disconnect) => {
                log::info!("peer {:?} disconnected", self.connections[index].peer_id);
                self.connections[index].queue.close();
            }
            (mode, message) => {
                log::warn!("unexpected {message:?} while in {mode:?} mode");
            }
        }
    }

    fn on_hello(&mut self, index: usize, version: u32, name: String, now: Instant) {
        if self.connections[index].peer_id.is_some() {
            log::debug!("repeated hello ignored");
            return;
        }

        let reply = if version != self.config.network_version {
            Err(format!(
                "network version mismatch: host {}, client {version}",
                self.config.network_version
            ))
        } else {
            (1..self.config.max_peers)
                .find(|id| self.find(*id).is_none())
                .ok_or_else(|| "session is full".to_owned())
        };

        let connection = &mut self.connections[index];
        let message = match reply {
            Ok(peer_id) => {
                log::info!("'{name}' joined as peer {peer_id}");
                connection.peer_id = Some(peer_id);
                connection.name = name.clone();
                self.events
                    .push_back(SessionEvent::PeerConnected { peer_id, name });
                ControlMessage::Welcome {
                    peer_id,
                    name: self.name.clone(),
                }
            }
            Err(reason) => {
                log::warn!("rejecting '{name}': {reason}");
                connection.closing = Some(now);
                ControlMessage::Reject { reason }
            }
        };
        let bytes = Serializer::to_bytes(&message, &self.options);
        if let Err(e) = connection.queue.enqueue(bytes, CONTROL_CHANNEL) {
            log::warn!("failed to answer hello: {e}");
        }
    }

    fn find(&self, peer: PeerId) -> Option<&PeerConnection<C>> {
        self.connections.iter().find(|c| c.peer_id == Some(peer))
    }

    fn remove_closed(&mut self, now: Instant) {
        let mut index = 0;
        while index < self.connections.len() {
            let connection = &mut self.connections[index];
            if connection.peer_id.is_none()
                && connection.queue.connection().time_since_last_receive(now) > HANDSHAKE_TIMEOUT
            {
                log::debug!("dropping connection that never said hello");
                connection.queue.close();
            }
            if connection.queue.status() != ConnectionStatus::Closed {
                index += 1;
                continue;
            }

            let connection = self.connections.remove(index);
            if let Some(peer_id) = connection.peer_id {
                // a client only ever knows the host after its welcome
                if self.mode == SessionMode::Host || self.my_peer_id.is_some() {
                    self.events
                        .push_back(SessionEvent::PeerDisconnected { peer_id });
                }
                self.shared_data.remove(&peer_id);
            }
        }
    }
}
