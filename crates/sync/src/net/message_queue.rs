use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::bytes::{CURRENT_VERSION, Deserializer, Serializer, SerializerOptions};

use super::ack::{AckUnreliableConnection, DATAGRAM_HEADER_SIZE, MAX_SUB_PACKET_SIZE, SubPacket};
use super::sequence::sequence_distance;
use super::{Connection, ConnectionStatus, InboundPacket, NetError, OutboundPacket};

pub const MAX_CHANNELS: usize = 32;

/// Worst case channel, sequence and length overhead of one message record.
const MESSAGE_HEADER_ALLOWANCE: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    pub reliable: bool,
    pub ordered: bool,
    /// Remember the payload of the most recently acknowledged message.
    pub keep_last_sent: bool,
}

impl ChannelSettings {
    pub fn new(reliable: bool, ordered: bool) -> Self {
        Self {
            reliable,
            ordered,
            keep_last_sent: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageQueueConfig {
    pub max_datagram_payload: usize,
    pub resend_latency_factor: f32,
    /// Seconds.
    pub min_resend_delay: f32,
}

impl Default for MessageQueueConfig {
    fn default() -> Self {
        Self {
            max_datagram_payload: 1350,
            resend_latency_factor: 1.8,
            min_resend_delay: 0.01,
        }
    }
}

#[derive(Debug, Clone)]
struct Outbound {
    data: Vec<u8>,
    seq: u16,
    channel: u8,
}

#[derive(Debug)]
struct Inbound {
    data: Vec<u8>,
    seq: u16,
}

#[derive(Debug, Default)]
struct Channel {
    settings: ChannelSettings,
    initialized: bool,
    last_sent_seq: u16,
    last_received_seq: u16,
    last_ack_seq: u16,
    last_acked: Option<Vec<u8>>,
    receive_queue: Vec<Inbound>,
}

impl Channel {
    fn push_received(&mut self, seq: u16, data: Vec<u8>) {
        if self.settings.ordered && self.settings.reliable {
            if sequence_distance(seq, self.last_received_seq) <= 0
                || self.receive_queue.iter().any(|m| m.seq == seq)
            {
                log::trace!("dropping stale message {seq}");
                return;
            }
        }
        self.receive_queue.push(Inbound { data, seq });
    }

    fn ready_messages(&mut self, out: &mut Vec<InboundPacket>) {
        match (self.settings.ordered, self.settings.reliable) {
            (true, true) => loop {
                let expected = self.last_received_seq.wrapping_add(1);
                let Some(index) = self.receive_queue.iter().position(|m| m.seq == expected) else {
                    break;
                };
                let message = self.receive_queue.swap_remove(index);
                out.push(InboundPacket::new(message.data));
                self.last_received_seq = expected;
            },
            (true, false) => {
                let best = self
                    .receive_queue
                    .iter()
                    .enumerate()
                    .map(|(i, m)| (i, m.seq.wrapping_sub(self.last_received_seq)))
                    .filter(|(_, dist)| *dist > 0 && *dist < 0x7FFF)
                    .max_by_key(|(_, dist)| *dist)
                    .map(|(i, _)| i);
                if let Some(best) = best {
                    let message = self.receive_queue.swap_remove(best);
                    self.last_received_seq = message.seq;
                    out.push(InboundPacket::new(message.data));
                }
                self.receive_queue.clear();
            }
            (false, _) => {
                out.extend(
                    self.receive_queue
                        .drain(..)
                        .map(|m| InboundPacket::new(m.data)),
                );
            }
        }
    }
}

#[derive(Debug)]
struct PendingPacket {
    messages: Vec<Outbound>,
    data: Vec<u8>,
    reliable: bool,
    sent_at: Instant,
    /// Datagram the packet first went out in.
    sequence: Option<u16>,
}

/// Multiplexes up to [`MAX_CHANNELS`] channels with their own ordering and
/// reliability over one [`AckUnreliableConnection`].
#[derive(Debug)]
pub struct MessageQueue<C> {
    connection: AckUnreliableConnection<C>,
    channels: Vec<Channel>,
    outbox: VecDeque<Outbound>,
    pending: BTreeMap<u32, PendingPacket>,
    next_tag: u32,
    config: MessageQueueConfig,
}

impl<C: Connection> MessageQueue<C> {
    pub fn new(connection: AckUnreliableConnection<C>) -> Self {
        Self::with_config(connection, MessageQueueConfig::default())
    }

    pub fn with_config(connection: AckUnreliableConnection<C>, config: MessageQueueConfig) -> Self {
        Self {
            connection,
            channels: (0..MAX_CHANNELS).map(|_| Channel::default()).collect(),
            outbox: VecDeque::new(),
            pending: BTreeMap::new(),
            next_tag: 0,
            config,
        }
    }

    pub fn connection(&self) -> &AckUnreliableConnection<C> {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut AckUnreliableConnection<C> {
        &mut self.connection
    }

    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Open
    }

    pub fn close(&mut self) {
        self.connection.close();
    }

    pub fn latency(&self) -> f32 {
        self.connection.latency()
    }

    /// Packets sent and not yet acknowledged or given up on.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn set_channel(&mut self, channel: u8, settings: ChannelSettings) -> Result<(), NetError> {
        let slot = self
            .channels
            .get_mut(channel as usize)
            .ok_or(NetError::InvalidChannel(channel))?;
        if slot.initialized {
            return Err(NetError::ChannelAlreadySet(channel));
        }
        slot.settings = settings;
        slot.initialized = true;
        Ok(())
    }

    pub fn channel_settings(&self, channel: u8) -> Option<ChannelSettings> {
        self.channels
            .get(channel as usize)
            .filter(|c| c.initialized)
            .map(|c| c.settings)
    }

    pub fn last_acked_message(&self, channel: u8) -> Option<&[u8]> {
        self.channels
            .get(channel as usize)
            .and_then(|c| c.last_acked.as_deref())
    }

    pub fn enqueue(&mut self, packet: impl Into<OutboundPacket>, channel: u8) -> Result<(), NetError> {
        let slot = self
            .channels
            .get_mut(channel as usize)
            .ok_or(NetError::InvalidChannel(channel))?;
        if !slot.initialized {
            return Err(NetError::ChannelNotSet(channel));
        }
        // Each message must fit a sub-packet on its own.
        let data = packet.into().into_bytes();
        if data.len() + MESSAGE_HEADER_ALLOWANCE > MAX_SUB_PACKET_SIZE {
            return Err(NetError::MessageTooLarge(data.len()));
        }
        slot.last_sent_seq = slot.last_sent_seq.wrapping_add(1);
        self.outbox.push_back(Outbound {
            data,
            seq: slot.last_sent_seq,
            channel,
        });
        Ok(())
    }

    pub fn send_all(&mut self) -> Result<(), NetError> {
        self.send_all_at(Instant::now())
    }

    /// Resends overdue reliable packets, packs everything queued into
    /// datagrams and sends them, then sends a bare ack if one is owed.
    pub fn send_all_at(&mut self, now: Instant) -> Result<(), NetError> {
        self.process_acks();

        let mut to_send = self.check_resend(now);
        while !self.outbox.is_empty() {
            to_send.push(self.create_packet(now));
        }

        let mut batch = Vec::new();
        let mut size = DATAGRAM_HEADER_SIZE;
        for sub_packet in to_send {
            let len = sub_packet.encoded_len();
            if !batch.is_empty() && size + len > self.config.max_datagram_payload {
                self.send_batch(&mut batch, now)?;
                size = DATAGRAM_HEADER_SIZE;
            }
            size += len;
            batch.push(sub_packet);
        }
        if !batch.is_empty() {
            self.send_batch(&mut batch, now)?;
        }

        self.connection.send_ack_packets_if_needed_at(now)
    }

    pub fn receive_packets(&mut self) -> Vec<InboundPacket> {
        self.receive_packets_at(Instant::now())
    }

    /// Messages ready for delivery under each channel's policy. A malformed
    /// datagram closes the connection.
    pub fn receive_packets_at(&mut self, now: Instant) -> Vec<InboundPacket> {
        if self.is_connected() {
            if let Err(e) = self.receive_messages(now) {
                log::error!("error receiving messages: {e}");
                self.connection.close();
            }
        }
        self.process_acks();

        let mut result = Vec::new();
        for channel in &mut self.channels {
            channel.ready_messages(&mut result);
        }
        result
    }

    fn receive_messages(&mut self, now: Instant) -> Result<(), NetError> {
        while let Some(data) = self.connection.receive_at(now)? {
            let mut d = Deserializer::new(&data, SerializerOptions::new(CURRENT_VERSION));
            while !d.is_empty() {
                let channel_id = d.read_u8()?;
                let channel = self
                    .channels
                    .get_mut(channel_id as usize)
                    .filter(|c| c.initialized)
                    .ok_or(NetError::ChannelNotSet(channel_id))?;
                let seq = if channel.settings.ordered {
                    d.read_u16()?
                } else {
                    0
                };
                let message = d.read_bytes()?;
                channel.push_received(seq, message);
            }
        }
        Ok(())
    }

    fn process_acks(&mut self) {
        for tag in self.connection.drain_acked_tags() {
            self.on_packet_acked(tag);
        }
    }

    fn on_packet_acked(&mut self, tag: u32) {
        let Some(packet) = self.pending.remove(&tag) else {
            return;
        };
        for message in packet.messages {
            let channel = &mut self.channels[message.channel as usize];
            if sequence_distance(message.seq, channel.last_ack_seq) > 0 {
                channel.last_ack_seq = message.seq;
                if channel.settings.keep_last_sent {
                    channel.last_acked = Some(message.data);
                }
            }
        }
    }

    fn check_resend(&mut self, now: Instant) -> Vec<SubPacket> {
        let timeout = (self.connection.latency() * self.config.resend_latency_factor)
            .max(self.config.min_resend_delay);
        let overdue: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.sent_at).as_secs_f32() > timeout)
            .map(|(tag, _)| *tag)
            .collect();

        let mut resend = Vec::new();
        for tag in overdue {
            let Some(packet) = self.pending.get_mut(&tag) else {
                continue;
            };
            if packet.reliable {
                log::trace!("resending packet {tag} first sent as {:?}", packet.sequence);
                packet.sent_at = now;
                resend.push(SubPacket {
                    data: packet.data.clone(),
                    tag: Some(tag),
                    resend_seq: packet.sequence,
                });
            } else {
                self.pending.remove(&tag);
            }
        }
        resend
    }

    /// Takes the first queued message plus every later one with the same
    /// reliability that still fits the budget.
    fn create_packet(&mut self, now: Instant) -> SubPacket {
        let mut messages = Vec::new();
        let mut size = 0;
        let mut reliable = None;
        let mut rest = VecDeque::with_capacity(self.outbox.len());

        while let Some(message) = self.outbox.pop_front() {
            let is_reliable = self.channels[message.channel as usize].settings.reliable;
            let total = message.data.len() + MESSAGE_HEADER_ALLOWANCE;
            let fits = match reliable {
                None => true,
                Some(r) => r == is_reliable && size + total <= self.config.max_datagram_payload,
            };
            if fits {
                size += total;
                reliable = Some(is_reliable);
                messages.push(message);
            } else {
                rest.push_back(message);
            }
        }
        self.outbox = rest;

        let mut s = Serializer::new(SerializerOptions::new(CURRENT_VERSION));
        for message in &messages {
            s.write_u8(message.channel);
            if self.channels[message.channel as usize].settings.ordered {
                s.write_u16(message.seq);
            }
            s.write_bytes(&message.data);
        }
        let data = s.into_bytes();

        let tag = self.next_tag;
        self.next_tag = self.next_tag.wrapping_add(1);
        self.pending.insert(
            tag,
            PendingPacket {
                messages,
                data: data.clone(),
                reliable: reliable.unwrap_or(false),
                sent_at: now,
                sequence: None,
            },
        );
        SubPacket::tagged(data, tag)
    }

    fn send_batch(&mut self, batch: &mut Vec<SubPacket>, now: Instant) -> Result<(), NetError> {
        let sequence = self.connection.send_tagged_at(batch, now)?;
        for sub_packet in batch.drain(..) {
            if let Some(packet) = sub_packet.tag.and_then(|tag| self.pending.get_mut(&tag)) {
                packet.sequence.get_or_insert(sequence);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::net::LoopbackConnection;

    const RELIABLE_ORDERED: u8 = 0;
    const UNRELIABLE_ORDERED: u8 = 1;
    const UNORDERED: u8 = 2;

    fn queue(connection: LoopbackConnection) -> MessageQueue<LoopbackConnection> {
        let mut queue = MessageQueue::new(AckUnreliableConnection::new(connection));
        queue
            .set_channel(RELIABLE_ORDERED, ChannelSettings::new(true, true))
            .unwrap();
        queue
            .set_channel(UNRELIABLE_ORDERED, ChannelSettings::new(false, true))
            .unwrap();
        queue
            .set_channel(UNORDERED, ChannelSettings::new(false, false))
            .unwrap();
        queue
    }

    fn pair() -> (MessageQueue<LoopbackConnection>, MessageQueue<LoopbackConnection>) {
        let (a, b) = LoopbackConnection::pair();
        (queue(a), queue(b))
    }

    fn link(queue: &MessageQueue<LoopbackConnection>) -> &LoopbackConnection {
        queue.connection().parent()
    }

    fn payloads(packets: Vec<InboundPacket>) -> Vec<Vec<u8>> {
        packets.into_iter().map(|p| p.bytes().to_vec()).collect()
    }

    /// Sends each message in its own datagram and captures the datagrams.
    fn capture(queue: &mut MessageQueue<LoopbackConnection>, channel: u8, messages: &[u8]) -> Vec<Vec<u8>> {
        messages
            .iter()
            .map(|m| {
                queue.enqueue(vec![*m], channel).unwrap();
                queue.send_all().unwrap();
                link(queue).intercept().remove(0)
            })
            .collect()
    }

    #[test]
    fn test_channel_configuration_errors() {
        let (mut a, _b) = pair();
        assert!(matches!(
            a.set_channel(RELIABLE_ORDERED, ChannelSettings::default()),
            Err(NetError::ChannelAlreadySet(0))
        ));
        assert!(matches!(
            a.enqueue(vec![1], 5),
            Err(NetError::ChannelNotSet(5))
        ));
        assert!(matches!(
            a.set_channel(32, ChannelSettings::default()),
            Err(NetError::InvalidChannel(32))
        ));
        assert_eq!(
            a.channel_settings(UNORDERED),
            Some(ChannelSettings::new(false, false))
        );
    }

    #[test]
    fn test_reliable_ordered_waits_for_gap() {
        let (mut a, mut b) = pair();
        let datagrams = capture(&mut a, RELIABLE_ORDERED, &[1, 2, 3]);

        link(&a).deliver(datagrams[1].clone());
        link(&a).deliver(datagrams[2].clone());
        assert!(b.receive_packets().is_empty());

        link(&a).deliver(datagrams[0].clone());
        assert_eq!(payloads(b.receive_packets()), vec![vec![1], vec![2], vec![3]]);

        // a late duplicate is not delivered again
        link(&a).deliver(datagrams[1].clone());
        assert!(b.receive_packets().is_empty());
    }

    #[test]
    fn test_unreliable_ordered_keeps_newest() {
        let (mut a, mut b) = pair();
        let datagrams = capture(&mut a, UNRELIABLE_ORDERED, &[1, 2, 3]);

        for index in [0, 2, 1] {
            link(&a).deliver(datagrams[index].clone());
        }
        assert_eq!(payloads(b.receive_packets()), vec![vec![3]]);
        assert!(b.receive_packets().is_empty());
    }

    #[test]
    fn test_unreliable_ordered_discards_older_after_delivery() {
        let (mut a, mut b) = pair();
        let datagrams = capture(&mut a, UNRELIABLE_ORDERED, &[1, 2, 3]);

        link(&a).deliver(datagrams[0].clone());
        assert_eq!(payloads(b.receive_packets()), vec![vec![1]]);
        link(&a).deliver(datagrams[2].clone());
        link(&a).deliver(datagrams[1].clone());
        assert_eq!(payloads(b.receive_packets()), vec![vec![3]]);
    }

    #[test]
    fn test_unordered_delivers_everything() {
        let (mut a, mut b) = pair();
        let datagrams = capture(&mut a, UNORDERED, &[1, 2, 3]);
        for index in [2, 0, 1] {
            link(&a).deliver(datagrams[index].clone());
        }
        assert_eq!(payloads(b.receive_packets()), vec![vec![3], vec![1], vec![2]]);
    }

    #[test]
    fn test_messages_share_datagrams() {
        let (mut a, mut b) = pair();
        for i in 0..10 {
            a.enqueue(vec![i], RELIABLE_ORDERED).unwrap();
        }
        a.enqueue(vec![99], UNORDERED).unwrap();
        a.send_all().unwrap();

        // reliable and unreliable go in separate sub-packets of one datagram
        assert_eq!(link(&a).in_flight(), 1);
        assert_eq!(a.pending_count(), 2);
        assert_eq!(b.receive_packets().len(), 11);
    }

    #[test]
    fn test_large_messages_split_datagrams() {
        let (mut a, mut b) = pair();
        for i in 0..3 {
            a.enqueue(vec![i; 1000], RELIABLE_ORDERED).unwrap();
        }
        a.send_all().unwrap();
        assert_eq!(link(&a).in_flight(), 3);

        let received = payloads(b.receive_packets());
        assert_eq!(received.len(), 3);
        assert_eq!(received[2], vec![2; 1000]);
    }

    #[test]
    fn test_oversized_first_message_still_sent() {
        let (mut a, mut b) = pair();
        a.enqueue(vec![7; 5000], RELIABLE_ORDERED).unwrap();
        a.send_all().unwrap();
        assert_eq!(payloads(b.receive_packets()), vec![vec![7; 5000]]);
    }

    #[test]
    fn test_unsendable_message_rejected() {
        let (mut a, mut b) = pair();
        assert!(matches!(
            a.enqueue(vec![0; MAX_SUB_PACKET_SIZE], RELIABLE_ORDERED),
            Err(NetError::MessageTooLarge(_))
        ));
        assert_eq!(a.pending_count(), 0);

        let largest = vec![1; MAX_SUB_PACKET_SIZE - MESSAGE_HEADER_ALLOWANCE];
        a.enqueue(largest.clone(), RELIABLE_ORDERED).unwrap();
        a.send_all().unwrap();
        assert_eq!(payloads(b.receive_packets()), vec![largest]);
        assert!(a.is_connected());
    }

    #[test]
    fn test_reliable_resent_until_acked() {
        let (mut a, mut b) = pair();
        let start = Instant::now();

        a.connection_mut().parent_mut().set_blocked(true);
        a.enqueue(vec![42], RELIABLE_ORDERED).unwrap();
        a.send_all_at(start).unwrap();
        a.connection_mut().parent_mut().set_blocked(false);
        assert!(b.receive_packets_at(start).is_empty());

        // nothing is resent before 1.8 x the initial one second latency
        a.send_all_at(start + Duration::from_millis(1500)).unwrap();
        assert_eq!(link(&a).in_flight(), 0);

        let later = start + Duration::from_secs(2);
        a.send_all_at(later).unwrap();
        let resend = link(&a).intercept().remove(0);
        let size_field = u16::from_le_bytes([resend[8], resend[9]]);
        assert_ne!(size_field & 0x8000, 0);
        assert_eq!(u16::from_le_bytes([resend[10], resend[11]]), 0);
        link(&a).deliver(resend);

        assert_eq!(payloads(b.receive_packets_at(later)), vec![vec![42]]);
        b.send_all_at(later).unwrap();
        a.receive_packets_at(later);
        assert_eq!(a.pending_count(), 0);

        a.send_all_at(later + Duration::from_secs(10)).unwrap();
        assert_eq!(link(&a).in_flight(), 0);
    }

    #[test]
    fn test_acked_packet_not_resent() {
        let (mut a, mut b) = pair();
        let start = Instant::now();
        a.enqueue(vec![1], RELIABLE_ORDERED).unwrap();
        a.send_all_at(start).unwrap();
        b.receive_packets_at(start);
        b.send_all_at(start).unwrap();
        a.receive_packets_at(start);

        assert_eq!(a.pending_count(), 0);
        a.send_all_at(start + Duration::from_secs(5)).unwrap();
        assert_eq!(link(&a).in_flight(), 0);
    }

    #[test]
    fn test_unreliable_given_up() {
        let (mut a, _b) = pair();
        let start = Instant::now();
        a.connection_mut().parent_mut().set_blocked(true);
        a.enqueue(vec![1], UNRELIABLE_ORDERED).unwrap();
        a.send_all_at(start).unwrap();
        a.connection_mut().parent_mut().set_blocked(false);

        a.send_all_at(start + Duration::from_secs(5)).unwrap();
        assert_eq!(a.pending_count(), 0);
        assert_eq!(link(&a).in_flight(), 0);
    }

    #[test]
    fn test_keep_last_sent() {
        let (a, b) = LoopbackConnection::pair();
        let mut a = MessageQueue::new(AckUnreliableConnection::new(a));
        let mut b = MessageQueue::new(AckUnreliableConnection::new(b));
        let settings = ChannelSettings {
            keep_last_sent: true,
            ..ChannelSettings::new(true, true)
        };
        a.set_channel(0, settings).unwrap();
        b.set_channel(0, settings).unwrap();

        a.enqueue(b"state".to_vec(), 0).unwrap();
        a.send_all().unwrap();
        b.receive_packets();
        b.send_all().unwrap();
        a.receive_packets();
        assert_eq!(a.last_acked_message(0), Some(&b"state"[..]));
    }

    #[test]
    fn test_unknown_channel_closes_connection() {
        let (a, mut b) = pair();
        let mut s = Serializer::new(SerializerOptions::new(CURRENT_VERSION));
        s.write_u8(9);
        s.write_bytes(b"x");
        let mut datagram = vec![0u8; DATAGRAM_HEADER_SIZE];
        datagram.extend_from_slice(&(s.len() as u16).to_le_bytes());
        datagram.extend_from_slice(&s.into_bytes());
        link(&a).deliver(datagram);

        assert!(b.receive_packets().is_empty());
        assert_eq!(b.status(), ConnectionStatus::Closed);
    }
}
