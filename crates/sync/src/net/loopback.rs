use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::stats::{NetworkStats, PacketLossSimulation};
use super::{Connection, ConnectionStatus, NetError};

#[derive(Debug, Default)]
struct Pipe {
    queue: VecDeque<(Instant, Vec<u8>)>,
    closed: bool,
}

/// In-memory datagram link. Created in connected pairs.
#[derive(Debug)]
pub struct LoopbackConnection {
    inbox: Arc<Mutex<Pipe>>,
    outbox: Arc<Mutex<Pipe>>,
    simulation: PacketLossSimulation,
    blocked: bool,
    stats: NetworkStats,
}

impl LoopbackConnection {
    pub fn pair() -> (Self, Self) {
        let a_to_b = Arc::new(Mutex::new(Pipe::default()));
        let b_to_a = Arc::new(Mutex::new(Pipe::default()));
        (
            Self::new(b_to_a.clone(), a_to_b.clone()),
            Self::new(a_to_b, b_to_a),
        )
    }

    fn new(inbox: Arc<Mutex<Pipe>>, outbox: Arc<Mutex<Pipe>>) -> Self {
        Self {
            inbox,
            outbox,
            simulation: PacketLossSimulation::default(),
            blocked: false,
            stats: NetworkStats::default(),
        }
    }

    pub fn set_simulation(&mut self, simulation: PacketLossSimulation) {
        self.simulation = simulation;
    }

    /// While blocked, everything sent is dropped.
    pub fn set_blocked(&mut self, blocked: bool) {
        self.blocked = blocked;
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    /// Datagrams sent by this end that the peer has not read yet.
    pub fn in_flight(&self) -> usize {
        self.outbox.lock().queue.len()
    }

    /// Removes and returns the datagrams in flight to the peer.
    pub fn intercept(&self) -> Vec<Vec<u8>> {
        self.outbox
            .lock()
            .queue
            .drain(..)
            .map(|(_, datagram)| datagram)
            .collect()
    }

    /// Hands a datagram straight to the peer, bypassing simulation.
    pub fn deliver(&self, datagram: Vec<u8>) {
        self.outbox.lock().queue.push_back((Instant::now(), datagram));
    }
}

impl Connection for LoopbackConnection {
    fn status(&self) -> ConnectionStatus {
        let inbox_closed = self.inbox.lock().closed;
        if inbox_closed || self.outbox.lock().closed {
            ConnectionStatus::Closed
        } else {
            ConnectionStatus::Open
        }
    }

    fn close(&mut self) {
        self.inbox.lock().closed = true;
        self.outbox.lock().closed = true;
    }

    fn send(&mut self, datagram: &[u8]) -> Result<(), NetError> {
        let mut outbox = self.outbox.lock();
        if outbox.closed {
            return Err(NetError::Closed);
        }

        self.stats.packets_sent += 1;
        self.stats.bytes_sent += datagram.len() as u64;
        if self.blocked || self.simulation.should_drop() {
            self.stats.packets_lost += 1;
            return Ok(());
        }
        let delay = Duration::from_millis(self.simulation.delay_ms() as u64);
        outbox
            .queue
            .push_back((Instant::now() + delay, datagram.to_vec()));
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<Vec<u8>>, NetError> {
        let mut inbox = self.inbox.lock();
        if inbox.closed {
            return Ok(None);
        }
        let now = Instant::now();
        let Some(index) = inbox.queue.iter().position(|(due, _)| *due <= now) else {
            return Ok(None);
        };
        let datagram = inbox.queue.remove(index).map(|(_, datagram)| datagram);
        if let Some(datagram) = &datagram {
            self.stats.packets_received += 1;
            self.stats.bytes_received += datagram.len() as u64;
        }
        Ok(datagram)
    }
}

impl Drop for LoopbackConnection {
    fn drop(&mut self) {
        self.close();
    }
}
