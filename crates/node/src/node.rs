use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use glam::Vec2;

use entwine::entity::{POSITION_FIELD, TRANSFORM_COMPONENT};
use entwine::{
    ComponentRegistry, ConfigNode, ConnectionStatus, DataInterpolatorSet, EntityId,
    EntityNetworkListener, EntityNetworkSession, LerpDataInterpolator, NetworkComponent,
    NetworkSession, PeerId, PrefabLibrary, SessionEvent, UdpConnection, UdpEndpoint, ViewRect,
    World,
};

use crate::config::NodeConfig;

/// Blends remote transforms and reports new arrivals.
struct NodeListener {
    interpolation_time: f32,
}

impl EntityNetworkListener for NodeListener {
    fn on_remote_entity_created(&mut self, world: &mut World, entity: EntityId, peer: PeerId) {
        if let Some(e) = world.get(entity) {
            log::info!("peer {peer} brought '{}' ({entity})", e.name);
        }
    }

    fn setup_interpolators(
        &mut self,
        set: &mut DataInterpolatorSet,
        world: &World,
        entity: EntityId,
        remote: bool,
    ) {
        if remote && world.component(entity, TRANSFORM_COMPONENT).is_some() {
            set.set_interpolator(
                entity,
                TRANSFORM_COMPONENT,
                POSITION_FIELD,
                Box::new(LerpDataInterpolator::<Vec2>::new(self.interpolation_time)),
            );
        }
    }
}

pub struct Node {
    endpoint: UdpEndpoint,
    session: EntityNetworkSession<UdpConnection>,
    world: World,
    config: NodeConfig,
    avatar: EntityId,
    elapsed: f32,
    tick_duration: Duration,
    last_tick_time: Instant,
    accumulator: Duration,
    running: bool,
}

impl Node {
    pub fn host(bind_addr: &str, name: &str, config: NodeConfig) -> Result<Self> {
        let endpoint = UdpEndpoint::bind(bind_addr)
            .with_context(|| format!("failed to bind {bind_addr}"))?;
        endpoint.listen();
        let session = NetworkSession::host(config.session.clone(), name);
        Ok(Self::new(endpoint, session, name, config))
    }

    pub fn join(server_addr: SocketAddr, name: &str, config: NodeConfig) -> Result<Self> {
        let endpoint = UdpEndpoint::bind("0.0.0.0:0").context("failed to bind client socket")?;
        let mut connection = endpoint.connect(server_addr);
        if let Some(simulation) = &config.packet_loss {
            connection.set_simulation(simulation.clone());
        }
        let session = NetworkSession::join(config.session.clone(), name, connection)
            .context("failed to start handshake")?;
        log::info!("connecting to {server_addr}");
        Ok(Self::new(endpoint, session, name, config))
    }

    fn new(
        endpoint: UdpEndpoint,
        session: NetworkSession<UdpConnection>,
        name: &str,
        config: NodeConfig,
    ) -> Self {
        let listener = NodeListener {
            interpolation_time: config.interpolation_time,
        };
        let session = EntityNetworkSession::new(
            session,
            PrefabLibrary::new(),
            ComponentRegistry::new(),
            config.entities.clone(),
        )
        .with_listener(Box::new(listener));

        let mut world = World::new();
        let avatar = world.spawn(name);
        let transform: ConfigNode = [(POSITION_FIELD, Vec2::ZERO)].into_iter().collect();
        if let Err(e) = world.set_component(avatar, TRANSFORM_COMPONENT, transform) {
            log::error!("failed to set up avatar: {e}");
        }
        if let Err(e) = world.set_network(avatar, NetworkComponent::local()) {
            log::error!("failed to set up avatar: {e}");
        }

        Self {
            endpoint,
            session,
            world,
            tick_duration: Duration::from_secs_f64(1.0 / config.tick_rate.max(1) as f64),
            config,
            avatar,
            elapsed: 0.0,
            last_tick_time: Instant::now(),
            accumulator: Duration::ZERO,
            running: true,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn run(&mut self, duration: Option<Duration>) -> Result<()> {
        let start = Instant::now();
        while self.running {
            if duration.is_some_and(|d| start.elapsed() >= d) {
                break;
            }
            self.tick_once()?;
            std::thread::sleep(Duration::from_millis(1));
        }
        self.session.close(&mut self.world);
        log::info!("left session with {} entities in view", self.world.entity_count());
        Ok(())
    }

    pub fn tick_once(&mut self) -> Result<()> {
        let now = Instant::now();
        self.accumulator += now - self.last_tick_time;
        self.last_tick_time = now;

        self.accept_connections()?;

        while self.accumulator >= self.tick_duration {
            self.accumulator -= self.tick_duration;
            self.tick()?;
        }
        Ok(())
    }

    fn accept_connections(&mut self) -> Result<()> {
        if !self.session.is_host() {
            return Ok(());
        }
        for mut connection in self.endpoint.poll().context("socket error")? {
            log::info!("connection from {}", connection.remote_addr());
            if let Some(simulation) = &self.config.packet_loss {
                connection.set_simulation(simulation.clone());
            }
            self.session.session_mut().accept(connection)?;
        }
        Ok(())
    }

    fn tick(&mut self) -> Result<()> {
        let dt = self.tick_duration.as_secs_f32();
        self.elapsed += dt;
        let position = self.move_avatar();

        if !self.session.is_host() {
            let center = position.as_ivec2();
            let half_size = glam::IVec2::splat(self.config.view_half_size);
            let view_rect = Some(ViewRect::from_center(center, half_size));
            let shared = self.session.session_mut();
            // my_shared_data_mut queues a send
            if shared.my_shared_data().view_rect != view_rect {
                shared.my_shared_data_mut().view_rect = view_rect;
            }
        }

        let status = self.session.update(dt, &mut self.world)?;
        for event in self.session.poll_events() {
            self.on_event(event);
        }
        if status == ConnectionStatus::Closed {
            log::warn!("session closed");
            self.running = false;
        }
        Ok(())
    }

    fn move_avatar(&mut self) -> Vec2 {
        let angle = self.elapsed * 0.5;
        let position = Vec2::new(angle.cos(), angle.sin()) * self.config.orbit_radius;
        if let Some(transform) = self.world.component_mut(self.avatar, TRANSFORM_COMPONENT) {
            transform.insert(POSITION_FIELD, position);
        }
        position
    }

    fn on_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Joined { peer_id } => log::info!("joined as peer {peer_id}"),
            SessionEvent::PeerConnected { peer_id, name } => {
                log::info!("peer {peer_id} '{name}' connected");
            }
            SessionEvent::PeerDisconnected { peer_id } => {
                log::info!("peer {peer_id} disconnected");
            }
            SessionEvent::Rejected { reason } => {
                log::error!("rejected: {reason}");
                self.running = false;
            }
            SessionEvent::ReadyToStart => log::info!("received initial world state"),
        }
    }
}
