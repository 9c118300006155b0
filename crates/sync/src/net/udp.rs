use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;

use parking_lot::Mutex;

use super::stats::{NetworkStats, PacketLossSimulation};
use super::{Connection, ConnectionStatus, NetError};

/// Largest UDP payload over IPv4. Anything the ack layer emits fits.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

#[derive(Debug, Default)]
struct Demux {
    inboxes: HashMap<SocketAddr, VecDeque<Vec<u8>>>,
    incoming: Vec<SocketAddr>,
    listening: bool,
    buffer: Vec<u8>,
}

#[derive(Debug)]
struct Shared {
    socket: UdpSocket,
    demux: Mutex<Demux>,
}

impl Shared {
    /// Moves everything waiting on the socket into per-address inboxes.
    fn pump(&self) -> io::Result<()> {
        let mut demux = self.demux.lock();
        let mut buffer = std::mem::take(&mut demux.buffer);
        buffer.resize(MAX_DATAGRAM_SIZE, 0);
        let result = Self::drain(&self.socket, &mut demux, &mut buffer);
        demux.buffer = buffer;
        result
    }

    fn drain(socket: &UdpSocket, demux: &mut Demux, buffer: &mut [u8]) -> io::Result<()> {
        loop {
            match socket.recv_from(buffer) {
                Ok((size, addr)) => {
                    let datagram = buffer[..size].to_vec();
                    if let Some(inbox) = demux.inboxes.get_mut(&addr) {
                        inbox.push_back(datagram);
                    } else if demux.listening {
                        log::debug!("new remote {addr}");
                        demux.inboxes.insert(addr, VecDeque::from([datagram]));
                        demux.incoming.push(addr);
                    } else {
                        log::trace!("dropping datagram from unknown {addr}");
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Non-blocking UDP socket shared by any number of [`UdpConnection`]s, one
/// per remote address.
#[derive(Debug, Clone)]
pub struct UdpEndpoint {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
}

impl UdpEndpoint {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            shared: Arc::new(Shared {
                socket,
                demux: Mutex::new(Demux::default()),
            }),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Datagrams from unknown addresses open new connections, returned by
    /// [`UdpEndpoint::poll`].
    pub fn listen(&self) {
        self.shared.demux.lock().listening = true;
    }

    pub fn connect(&self, remote: SocketAddr) -> UdpConnection {
        self.shared
            .demux
            .lock()
            .inboxes
            .entry(remote)
            .or_default();
        UdpConnection::new(self.shared.clone(), remote)
    }

    /// Reads the socket and returns connections from new remotes.
    pub fn poll(&self) -> io::Result<Vec<UdpConnection>> {
        self.shared.pump()?;
        let incoming = std::mem::take(&mut self.shared.demux.lock().incoming);
        Ok(incoming
            .into_iter()
            .map(|addr| UdpConnection::new(self.shared.clone(), addr))
            .collect())
    }
}

#[derive(Debug)]
pub struct UdpConnection {
    shared: Arc<Shared>,
    remote: SocketAddr,
    status: ConnectionStatus,
    simulation: PacketLossSimulation,
    stats: NetworkStats,
}

impl UdpConnection {
    fn new(shared: Arc<Shared>, remote: SocketAddr) -> Self {
        Self {
            shared,
            remote,
            status: ConnectionStatus::Open,
            simulation: PacketLossSimulation::default(),
            stats: NetworkStats::default(),
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn set_simulation(&mut self, simulation: PacketLossSimulation) {
        self.simulation = simulation;
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }
}

impl Connection for UdpConnection {
    fn status(&self) -> ConnectionStatus {
        self.status
    }

    fn close(&mut self) {
        if self.status != ConnectionStatus::Closed {
            self.status = ConnectionStatus::Closed;
            self.shared.demux.lock().inboxes.remove(&self.remote);
        }
    }

    fn send(&mut self, datagram: &[u8]) -> Result<(), NetError> {
        if self.status == ConnectionStatus::Closed {
            return Err(NetError::Closed);
        }
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += datagram.len() as u64;
        if self.simulation.should_drop() {
            self.stats.packets_lost += 1;
            return Ok(());
        }

        match self.shared.socket.send_to(datagram, self.remote) {
            Ok(_) => Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                log::trace!("socket busy, dropping datagram to {}", self.remote);
                self.stats.packets_lost += 1;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn receive(&mut self) -> Result<Option<Vec<u8>>, NetError> {
        if self.status == ConnectionStatus::Closed {
            return Ok(None);
        }
        self.shared.pump()?;
        let datagram = self
            .shared
            .demux
            .lock()
            .inboxes
            .get_mut(&self.remote)
            .and_then(|inbox| inbox.pop_front());
        if let Some(datagram) = &datagram {
            self.stats.packets_received += 1;
            self.stats.bytes_received += datagram.len() as u64;
        }
        Ok(datagram)
    }
}

impl Drop for UdpConnection {
    fn drop(&mut self) {
        self.close();
    }
}
