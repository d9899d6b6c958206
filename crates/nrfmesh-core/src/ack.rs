//! Reliable delivery over the lossy radio link
//!
//! The radio gives no delivery guarantee (hardware auto-ack is disabled), so
//! this layer holds each outbound fragment in flight until the peer echoes it
//! back as a DataAck, retransmitting on a timer and giving up after a bounded
//! number of tries. The in-flight window defaults to one fragment, which is
//! what lets the fragmentation layer above assume in-order arrival.
//!
//! A received Data fragment is forwarded upstream immediately and answered
//! with a DataAck carrying the same flags and payload. Acknowledgment
//! matching compares those echoed bytes against the in-flight set; with the
//! default window of one the match is always unambiguous.

use crate::layer::{Layer, LayerError, LayerIo};
use crate::packet::{Fragment, PacketType, FRAME_SIZE};
use crate::stats::{AckStats, StatsSnapshot};
use rand::Rng;
use std::collections::VecDeque;
use tracing::{debug, error, trace, warn};

/// Tuning knobs for [`AckLayer`].
#[derive(Debug, Clone)]
pub struct AckConfig {
    /// Maximum unacknowledged fragments on the air. Values above 1 void the
    /// in-order delivery the fragmentation layer depends on.
    pub max_in_flight: usize,
    /// Microseconds to wait for an acknowledgment before retransmitting
    pub retry_us: u64,
    /// Transmission attempts before a fragment is dropped
    pub max_tries: u32,
    /// When false the layer is transparent in both directions
    pub enabled: bool,
}

impl Default for AckConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 1,
            retry_us: 20_000,
            max_tries: 10,
            enabled: true,
        }
    }
}

#[derive(Debug)]
struct InFlight {
    frame: [u8; FRAME_SIZE],
    /// Local transmit sequence number, for logs and bookkeeping
    seq: u8,
    last_sent_us: u64,
    tries: u32,
}

/// At-most-`max_in_flight` reliable delivery with retransmission.
#[derive(Debug)]
pub struct AckLayer {
    config: AckConfig,
    /// Fragments accepted from above, waiting for a window slot
    queue: VecDeque<[u8; FRAME_SIZE]>,
    in_flight: Vec<InFlight>,
    /// Next transmit sequence number; starts at a random value
    next_seq: u8,
    stats: AckStats,
}

impl AckLayer {
    pub fn new(config: AckConfig) -> Self {
        let next_seq = rand::thread_rng().gen();
        debug!(seq = next_seq, "ack layer starting");
        Self {
            config,
            queue: VecDeque::new(),
            in_flight: Vec::new(),
            next_seq,
            stats: AckStats::default(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(AckConfig::default())
    }

    /// Enable or disable the layer. Disabled, it passes traffic through
    /// untouched and neither retries nor acknowledges.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    /// Counters for this layer.
    pub fn ack_stats(&self) -> &AckStats {
        &self.stats
    }

    /// Fragments currently unacknowledged.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    fn take_seq(&mut self) -> u8 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }

    /// Data and DataAck frames differ only in the type and checksum nibbles
    /// of byte 0; everything from byte 1 on is the echoed fragment.
    fn matches(entry: &InFlight, ack: &[u8]) -> bool {
        entry.frame[1..] == ack[1..]
    }
}

impl Layer for AckLayer {
    fn name(&self) -> &'static str {
        "ack"
    }

    fn receive_from_upstream(&mut self, payload: Vec<u8>, io: &mut LayerIo) -> Result<(), LayerError> {
        if !self.config.enabled {
            io.send_downstream(payload);
            return Ok(());
        }
        if payload.len() != FRAME_SIZE {
            error!(bytes = payload.len(), "expected a 32-byte fragment, dropping");
            return Ok(());
        }
        let mut frame = [0u8; FRAME_SIZE];
        frame.copy_from_slice(&payload);
        self.queue.push_back(frame);
        Ok(())
    }

    fn receive_from_downstream(&mut self, payload: Vec<u8>, io: &mut LayerIo) -> Result<(), LayerError> {
        if !self.config.enabled {
            io.send_upstream(payload);
            return Ok(());
        }

        match PacketType::of_frame(&payload) {
            Some(PacketType::Data) => {
                let ack = match Fragment::decode(&payload) {
                    Ok(Fragment::Data(data)) => Fragment::DataAck(data).encode(),
                    Ok(_) | Err(_) => {
                        error!("data frame failed to decode, dropping");
                        return Ok(());
                    }
                };
                io.send_upstream(payload);
                self.stats.acks_sent += 1;
                io.send_downstream(ack.to_vec());
            }
            Some(PacketType::DataAck) => {
                match self
                    .in_flight
                    .iter()
                    .position(|entry| Self::matches(entry, &payload))
                {
                    Some(index) => {
                        let entry = self.in_flight.remove(index);
                        trace!(seq = entry.seq, tries = entry.tries, "fragment acknowledged");
                        self.stats.acks_matched += 1;
                    }
                    None => {
                        warn!("acknowledgment matched nothing in flight");
                        self.stats.acks_unmatched += 1;
                    }
                }
            }
            other => {
                error!(packet_type = ?other, "unexpected frame type, dropping");
            }
        }
        Ok(())
    }

    fn tick(&mut self, now_us: u64, io: &mut LayerIo) -> Result<(), LayerError> {
        if !self.config.enabled {
            return Ok(());
        }

        // Admit one queued fragment into the window per tick.
        if self.in_flight.len() < self.config.max_in_flight {
            if let Some(frame) = self.queue.pop_front() {
                let seq = self.take_seq();
                trace!(seq, "transmitting fragment");
                self.stats.fragments_sent += 1;
                io.send_downstream(frame.to_vec());
                self.in_flight.push(InFlight {
                    frame,
                    seq,
                    last_sent_us: now_us,
                    tries: 1,
                });
            }
        }

        // Retransmit or give up on whatever is still unacknowledged.
        let mut index = 0;
        while index < self.in_flight.len() {
            let entry = &mut self.in_flight[index];
            if entry.tries > self.config.max_tries {
                error!(
                    seq = entry.seq,
                    tries = entry.tries,
                    "fragment never acknowledged, dropping"
                );
                self.stats.delivery_failures += 1;
                self.in_flight.remove(index);
                continue;
            }
            if now_us.saturating_sub(entry.last_sent_us) > self.config.retry_us {
                entry.tries += 1;
                entry.last_sent_us = now_us;
                trace!(seq = entry.seq, tries = entry.tries, "retransmitting fragment");
                self.stats.retransmits += 1;
                io.send_downstream(entry.frame.to_vec());
            }
            index += 1;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.queue.clear();
        self.in_flight.clear();
    }

    fn stats(&self) -> StatsSnapshot {
        StatsSnapshot::Ack(self.stats.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::DataFragment;

    fn data_frame(fill: u8, final_packet: bool) -> Vec<u8> {
        let payload = [fill; 30];
        Fragment::Data(DataFragment {
            valid_bytes: 30,
            final_packet,
            payload,
        })
        .encode()
        .to_vec()
    }

    fn ack_for(frame: &[u8]) -> Vec<u8> {
        match Fragment::decode(frame).unwrap() {
            Fragment::Data(data) => Fragment::DataAck(data).encode().to_vec(),
            other => panic!("not a data frame: {:?}", other),
        }
    }

    #[test]
    fn test_single_in_flight_window() {
        let mut layer = AckLayer::with_defaults();
        let mut io = LayerIo::new();

        layer.receive_from_upstream(data_frame(1, false), &mut io).unwrap();
        layer.receive_from_upstream(data_frame(2, false), &mut io).unwrap();
        assert!(io.is_empty());

        layer.tick(0, &mut io).unwrap();
        let sent = io.pop_downstream().unwrap();
        assert!(io.pop_downstream().is_none());
        assert_eq!(layer.in_flight_len(), 1);

        // Second fragment stays queued until the first is acknowledged.
        layer.tick(1_000, &mut io).unwrap();
        assert!(io.pop_downstream().is_none());

        layer.receive_from_downstream(ack_for(&sent), &mut io).unwrap();
        assert_eq!(layer.in_flight_len(), 0);

        layer.tick(2_000, &mut io).unwrap();
        let second = io.pop_downstream().unwrap();
        assert_eq!(second[2], 2);
    }

    #[test]
    fn test_retransmits_on_timeout() {
        let mut layer = AckLayer::with_defaults();
        let mut io = LayerIo::new();

        layer.receive_from_upstream(data_frame(5, true), &mut io).unwrap();
        layer.tick(0, &mut io).unwrap();
        let first = io.pop_downstream().unwrap();

        // Just inside the retry window: nothing.
        layer.tick(20_000, &mut io).unwrap();
        assert!(io.pop_downstream().is_none());

        // Past it: same frame again.
        layer.tick(20_001, &mut io).unwrap();
        let again = io.pop_downstream().unwrap();
        assert_eq!(again, first);
        assert_eq!(layer.ack_stats().retransmits, 1);
    }

    #[test]
    fn test_gives_up_after_max_tries() {
        let mut layer = AckLayer::new(AckConfig {
            max_tries: 3,
            ..AckConfig::default()
        });
        let mut io = LayerIo::new();

        layer.receive_from_upstream(data_frame(8, true), &mut io).unwrap();
        let mut now = 0;
        for _ in 0..16 {
            now += 25_000;
            layer.tick(now, &mut io).unwrap();
        }

        assert_eq!(layer.in_flight_len(), 0);
        assert_eq!(layer.ack_stats().delivery_failures, 1);
        // First transmission plus retries up to the cap.
        assert_eq!(layer.ack_stats().retransmits, 3);
    }

    #[test]
    fn test_acks_received_data() {
        let mut layer = AckLayer::with_defaults();
        let mut io = LayerIo::new();

        let frame = data_frame(9, true);
        layer.receive_from_downstream(frame.clone(), &mut io).unwrap();

        // Data goes upstream untouched, ack goes back down.
        assert_eq!(io.pop_upstream().unwrap(), frame);
        let ack = io.pop_downstream().unwrap();
        assert_eq!(PacketType::of_frame(&ack), Some(PacketType::DataAck));
        assert_eq!(ack[1..], frame[1..]);
    }

    #[test]
    fn test_unmatched_ack_is_counted() {
        let mut layer = AckLayer::with_defaults();
        let mut io = LayerIo::new();
        layer.receive_from_downstream(ack_for(&data_frame(3, false)), &mut io).unwrap();
        assert_eq!(layer.ack_stats().acks_unmatched, 1);
    }

    #[test]
    fn test_disabled_is_transparent() {
        let mut layer = AckLayer::new(AckConfig {
            enabled: false,
            ..AckConfig::default()
        });
        let mut io = LayerIo::new();

        let down = data_frame(1, true);
        layer.receive_from_upstream(down.clone(), &mut io).unwrap();
        assert_eq!(io.pop_downstream().unwrap(), down);

        let up = data_frame(2, true);
        layer.receive_from_downstream(up.clone(), &mut io).unwrap();
        assert_eq!(io.pop_upstream().unwrap(), up);
        // No ack generated.
        assert!(io.pop_downstream().is_none());

        layer.tick(1_000_000, &mut io).unwrap();
        assert!(io.is_empty());
    }
}
