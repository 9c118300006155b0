use rand::Rng;

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PacketLossSimulation {
    pub enabled: bool,
    pub loss_percent: f32,
    pub min_latency_ms: u32,
    pub max_latency_ms: u32,
    pub jitter_ms: u32,
}

impl PacketLossSimulation {
    pub fn should_drop(&self) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 {
            return false;
        }
        rand::thread_rng().gen_range(0.0..100.0) < self.loss_percent
    }

    pub fn delay_ms(&self) -> u32 {
        if !self.enabled || self.max_latency_ms == 0 {
            return 0;
        }
        let mut rng = rand::thread_rng();
        let base = self.min_latency_ms;
        let range = self.max_latency_ms.saturating_sub(self.min_latency_ms);
        let jitter = if self.jitter_ms > 0 {
            rng.gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        base + rng.gen_range(0..=range) + jitter
    }
}

#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    pub packets_resent: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub rtt_ms: f32,
    pub rtt_variance: f32,
}

impl NetworkStats {
    pub fn packet_loss_percent(&self) -> f32 {
        if self.packets_sent == 0 {
            0.0
        } else {
            self.packets_lost as f32 * 100.0 / self.packets_sent as f32
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacketState {
    #[default]
    Unused,
    Sent,
    Received,
    Resent,
    Acked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketStats {
    pub sequence: u16,
    pub state: PacketState,
    pub outbound: bool,
    pub size: usize,
}

/// Ring buffer of recent per-datagram history, laid out in lines of
/// `line_size` entries. The line after the write position is kept clear so a
/// viewer can tell where the history wraps.
#[derive(Debug, Clone)]
pub struct AckConnectionStats {
    packets: Vec<PacketStats>,
    line_size: usize,
    line_start: usize,
    pos: usize,
}

impl Default for AckConnectionStats {
    fn default() -> Self {
        Self::new(1024, 64)
    }
}

impl AckConnectionStats {
    pub fn new(capacity: usize, line_size: usize) -> Self {
        let line_size = line_size.clamp(1, capacity.max(1));
        Self {
            packets: vec![PacketStats::default(); capacity.max(1)],
            line_size,
            line_start: line_size,
            pos: 0,
        }
    }

    pub fn on_packet_sent(&mut self, sequence: u16, size: usize) {
        self.add(PacketStats {
            sequence,
            state: PacketState::Sent,
            outbound: true,
            size,
        });
    }

    pub fn on_packet_received(&mut self, sequence: u16, size: usize) {
        self.add(PacketStats {
            sequence,
            state: PacketState::Received,
            outbound: false,
            size,
        });
    }

    pub fn on_packet_resent(&mut self, sequence: u16) {
        self.set_outbound_state(sequence, PacketState::Resent);
    }

    pub fn on_packet_acked(&mut self, sequence: u16) {
        self.set_outbound_state(sequence, PacketState::Acked);
    }

    pub fn packets(&self) -> &[PacketStats] {
        &self.packets
    }

    pub fn line_start(&self) -> usize {
        self.line_start
    }

    pub fn line_size(&self) -> usize {
        self.line_size
    }

    fn set_outbound_state(&mut self, sequence: u16, state: PacketState) {
        if let Some(packet) = self
            .packets
            .iter_mut()
            .find(|p| p.outbound && p.sequence == sequence && p.state != PacketState::Unused)
        {
            packet.state = state;
        }
    }

    fn add(&mut self, stats: PacketStats) {
        let capacity = self.packets.len();
        self.packets[self.pos] = stats;
        self.pos = (self.pos + 1) % capacity;

        if self.pos % self.line_size == 0 {
            self.line_start = (self.pos + self.line_size) % capacity;
            for i in 0..self.line_size {
                self.packets[(self.pos + i) % capacity] = PacketStats::default();
            }
        }
    }
}
