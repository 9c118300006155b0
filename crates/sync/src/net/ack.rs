use std::collections::VecDeque;
use std::time::Instant;

use crate::bytes::{DeserializeError, Deserializer, Serializer, SerializerOptions};

use super::sequence::sequence_distance;
use super::stats::{AckConnectionStats, NetworkStats};
use super::{Connection, ConnectionStatus, NetError};

const WINDOW: usize = 1024;
const RESEND_FLAG: u16 = 0x8000;
/// Sub-packet lengths share a u16 with the resend flag.
pub const MAX_SUB_PACKET_SIZE: usize = 0x7FFF;

/// `[sequence u16][ack u16][ack bits u32]`
pub const DATAGRAM_HEADER_SIZE: usize = 8;

/// One payload inside a datagram. `tag` is reported back through
/// [`AckUnreliableConnection::drain_acked_tags`] once the datagram carrying
/// it is acknowledged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubPacket {
    pub data: Vec<u8>,
    pub tag: Option<u32>,
    /// Sequence of the datagram this payload was first sent in, when this is
    /// a resend. The receiver drops it if that datagram already arrived.
    pub resend_seq: Option<u16>,
}

impl SubPacket {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    pub fn tagged(data: Vec<u8>, tag: u32) -> Self {
        Self {
            data,
            tag: Some(tag),
            resend_seq: None,
        }
    }

    pub fn encoded_len(&self) -> usize {
        2 + if self.resend_seq.is_some() { 2 } else { 0 } + self.data.len()
    }
}

#[derive(Debug, Clone)]
struct SentPacket {
    sequence: u16,
    tags: Vec<u32>,
    timestamp: Instant,
    waiting: bool,
}

/// Adds sequence numbers, selective acks and latency estimation on top of an
/// unreliable datagram [`Connection`]. Delivery stays unordered and
/// unreliable; duplicates are dropped.
#[derive(Debug)]
pub struct AckUnreliableConnection<C> {
    parent: C,
    next_sequence: u16,
    highest_received: u16,
    received: Vec<Option<u16>>,
    sent: Vec<Option<SentPacket>>,
    pending: VecDeque<Vec<u8>>,
    acked_tags: Vec<u32>,
    latency: f32,
    latency_variance: f32,
    has_latency_sample: bool,
    ack_owed: bool,
    last_send: Instant,
    last_receive: Instant,
    stats: AckConnectionStats,
    network_stats: NetworkStats,
}

impl<C: Connection> AckUnreliableConnection<C> {
    pub fn new(parent: C) -> Self {
        let now = Instant::now();
        Self {
            parent,
            next_sequence: 0,
            highest_received: 0xFFFF,
            received: vec![None; WINDOW],
            sent: vec![None; WINDOW],
            pending: VecDeque::new(),
            acked_tags: Vec::new(),
            latency: 1.0,
            latency_variance: 0.5,
            has_latency_sample: false,
            ack_owed: false,
            last_send: now,
            last_receive: now,
            stats: AckConnectionStats::default(),
            network_stats: NetworkStats::default(),
        }
    }

    pub fn parent(&self) -> &C {
        &self.parent
    }

    pub fn parent_mut(&mut self) -> &mut C {
        &mut self.parent
    }

    pub fn status(&self) -> ConnectionStatus {
        self.parent.status()
    }

    pub fn close(&mut self) {
        self.parent.close();
    }

    /// Smoothed round trip time in seconds. Starts at one second.
    pub fn latency(&self) -> f32 {
        self.latency
    }

    pub fn time_since_last_send(&self, now: Instant) -> f32 {
        now.saturating_duration_since(self.last_send).as_secs_f32()
    }

    pub fn time_since_last_receive(&self, now: Instant) -> f32 {
        now.saturating_duration_since(self.last_receive)
            .as_secs_f32()
    }

    pub fn stats(&self) -> &AckConnectionStats {
        &self.stats
    }

    pub fn network_stats(&self) -> &NetworkStats {
        &self.network_stats
    }

    /// Tags of sub-packets whose datagram has been acknowledged since the
    /// last call.
    pub fn drain_acked_tags(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.acked_tags)
    }

    pub fn send_tagged(&mut self, sub_packets: &[SubPacket]) -> Result<u16, NetError> {
        self.send_tagged_at(sub_packets, Instant::now())
    }

    /// Sends all sub-packets in one datagram and returns its sequence.
    pub fn send_tagged_at(&mut self, sub_packets: &[SubPacket], now: Instant) -> Result<u16, NetError> {
        if let Some(sub) = sub_packets
            .iter()
            .find(|s| s.data.len() > MAX_SUB_PACKET_SIZE)
        {
            return Err(NetError::SubPacketTooLarge(sub.data.len()));
        }

        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        let (ack, ack_bits) = self.ack_header();

        let mut s = Serializer::new(SerializerOptions::new(0));
        s.write_u16(sequence);
        s.write_u16(ack);
        s.write_u32(ack_bits);
        for sub in sub_packets {
            let len = sub.data.len() as u16;
            match sub.resend_seq {
                Some(resend_seq) => {
                    s.write_u16(len | RESEND_FLAG);
                    s.write_u16(resend_seq);
                }
                None => s.write_u16(len),
            }
            s.write_raw(&sub.data);
        }
        let datagram = s.into_bytes();
        self.parent.send(&datagram)?;

        if !sub_packets.is_empty() {
            let slot = &mut self.sent[sequence as usize % WINDOW];
            if slot.as_ref().is_some_and(|old| old.waiting) {
                self.network_stats.packets_lost += 1;
            }
            *slot = Some(SentPacket {
                sequence,
                tags: sub_packets.iter().filter_map(|s| s.tag).collect(),
                timestamp: now,
                waiting: true,
            });
            for resend_seq in sub_packets.iter().filter_map(|s| s.resend_seq) {
                self.stats.on_packet_resent(resend_seq);
                self.network_stats.packets_resent += 1;
            }
        }

        self.stats.on_packet_sent(sequence, datagram.len());
        self.network_stats.packets_sent += 1;
        self.network_stats.bytes_sent += datagram.len() as u64;
        self.last_send = now;
        self.ack_owed = false;
        log::trace!("sent datagram {sequence} ({} bytes)", datagram.len());
        Ok(sequence)
    }

    pub fn send_ack_packets_if_needed(&mut self) -> Result<(), NetError> {
        self.send_ack_packets_if_needed_at(Instant::now())
    }

    /// Sends a header-only datagram if something was received since the last
    /// send, so acks flow even without outgoing traffic.
    pub fn send_ack_packets_if_needed_at(&mut self, now: Instant) -> Result<(), NetError> {
        if self.ack_owed {
            self.send_tagged_at(&[], now)?;
        }
        Ok(())
    }

    pub fn receive(&mut self) -> Result<Option<Vec<u8>>, NetError> {
        self.receive_at(Instant::now())
    }

    /// Next received sub-packet payload. A malformed datagram closes the
    /// connection.
    pub fn receive_at(&mut self, now: Instant) -> Result<Option<Vec<u8>>, NetError> {
        loop {
            if let Some(data) = self.pending.pop_front() {
                return Ok(Some(data));
            }
            let Some(datagram) = self.parent.receive()? else {
                return Ok(None);
            };
            if let Err(e) = self.process_datagram(&datagram, now) {
                log::error!("closing connection after malformed datagram: {e}");
                self.parent.close();
                return Err(e.into());
            }
        }
    }

    fn process_datagram(&mut self, datagram: &[u8], now: Instant) -> Result<(), DeserializeError> {
        let mut d = Deserializer::new(datagram, SerializerOptions::new(0));
        let sequence = d.read_u16()?;
        let ack = d.read_u16()?;
        let ack_bits = d.read_u32()?;

        let mut sub_packets = Vec::new();
        while !d.is_empty() {
            let header = d.read_u16()?;
            let resend_seq = if header & RESEND_FLAG != 0 {
                Some(d.read_u16()?)
            } else {
                None
            };
            let data = d.read_raw((header & !RESEND_FLAG) as usize)?;
            sub_packets.push((resend_seq, data));
        }

        self.last_receive = now;
        self.network_stats.packets_received += 1;
        self.network_stats.bytes_received += datagram.len() as u64;
        self.process_acks(ack, ack_bits, now);

        if sub_packets.is_empty() || !self.on_sequence_received(sequence) {
            return Ok(());
        }
        self.stats.on_packet_received(sequence, datagram.len());
        self.ack_owed = true;

        let mut resent = Vec::new();
        for (resend_seq, data) in sub_packets {
            if let Some(resend_seq) = resend_seq {
                if self.is_received(resend_seq) {
                    continue;
                }
                resent.push(resend_seq);
            }
            self.pending.push_back(data.to_vec());
        }
        for resend_seq in resent {
            self.on_sequence_received(resend_seq);
        }
        Ok(())
    }

    /// Records `sequence` in the receive window. False for duplicates and
    /// sequences too old to track.
    fn on_sequence_received(&mut self, sequence: u16) -> bool {
        let distance = sequence_distance(sequence, self.highest_received) as i32;
        if distance > 0 {
            let skipped = (distance as usize).min(WINDOW);
            for i in 1..skipped {
                let seq = self.highest_received.wrapping_add(i as u16);
                self.received[seq as usize % WINDOW] = None;
            }
            self.highest_received = sequence;
        } else if -distance >= WINDOW as i32 {
            return false;
        }

        let slot = &mut self.received[sequence as usize % WINDOW];
        if *slot == Some(sequence) {
            return false;
        }
        *slot = Some(sequence);
        true
    }

    fn is_received(&self, sequence: u16) -> bool {
        self.received[sequence as usize % WINDOW] == Some(sequence)
    }

    fn ack_header(&self) -> (u16, u32) {
        let ack = self.highest_received;
        let mut bits = 0u32;
        for i in 0..32u16 {
            if self.is_received(ack.wrapping_sub(i + 1)) {
                bits |= 1 << i;
            }
        }
        (ack, bits)
    }

    fn process_acks(&mut self, ack: u16, ack_bits: u32, now: Instant) {
        self.on_ack_received(ack, now);
        for i in 0..32u16 {
            if ack_bits & (1 << i) != 0 {
                self.on_ack_received(ack.wrapping_sub(i + 1), now);
            }
        }
    }

    fn on_ack_received(&mut self, sequence: u16, now: Instant) {
        let Some(sent) = self.sent[sequence as usize % WINDOW].as_mut() else {
            return;
        };
        if sent.sequence != sequence || !sent.waiting {
            return;
        }
        sent.waiting = false;
        let sample = now.saturating_duration_since(sent.timestamp).as_secs_f32();
        self.acked_tags.append(&mut sent.tags);
        self.stats.on_packet_acked(sequence);
        self.report_latency(sample);
    }

    fn report_latency(&mut self, sample: f32) {
        const ALPHA: f32 = 0.125;
        const BETA: f32 = 0.25;

        if self.has_latency_sample {
            let diff = (sample - self.latency).abs();
            self.latency_variance = (1.0 - BETA) * self.latency_variance + BETA * diff;
            self.latency = (1.0 - ALPHA) * self.latency + ALPHA * sample;
        } else {
            self.latency = sample;
            self.latency_variance = sample / 2.0;
            self.has_latency_sample = true;
        }
        self.network_stats.rtt_ms = self.latency * 1000.0;
        self.network_stats.rtt_variance = self.latency_variance * 1000.0;
    }
}
