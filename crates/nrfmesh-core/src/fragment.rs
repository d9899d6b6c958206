//! Message fragmentation and reassembly
//!
//! IP frames are far larger than the 32-byte air frame, so this layer splits
//! each payload into 30-byte Data fragments on the way down and rebuilds the
//! payload from consecutive fragments on the way up. Reassembly is strictly
//! sequential: fragments are concatenated in arrival order and the buffer is
//! flushed upstream when the fragment marked `final_packet` lands. In-order
//! arrival is the acknowledgment layer's job (single-fragment window).

use crate::layer::{Layer, LayerError, LayerIo};
use crate::packet::{DataFragment, Fragment, FRAGMENT_PAYLOAD_SIZE, FRAME_SIZE};
use crate::stats::{FragmentationStats, StatsSnapshot};
use tracing::{debug, error, trace};

/// Splits payloads into fixed-size Data fragments and reassembles them.
///
/// There is no reassembly timeout: a missing final fragment holds the buffer
/// until [`FragmentationLayer::reset`], matching the lossless guarantee the
/// layer below provides.
#[derive(Debug, Default)]
pub struct FragmentationLayer {
    /// Fragments received since the last `final_packet`
    reassembly: Vec<DataFragment>,
    stats: FragmentationStats,
}

impl FragmentationLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters for this layer.
    pub fn fragmentation_stats(&self) -> &FragmentationStats {
        &self.stats
    }
}

impl Layer for FragmentationLayer {
    fn name(&self) -> &'static str {
        "fragmentation"
    }

    /// Split a payload into `ceil(len / 30)` fragments. An empty payload
    /// produces no fragments at all.
    fn receive_from_upstream(&mut self, payload: Vec<u8>, io: &mut LayerIo) -> Result<(), LayerError> {
        if payload.is_empty() {
            return Ok(());
        }
        let count = payload.len().div_ceil(FRAGMENT_PAYLOAD_SIZE);
        trace!(bytes = payload.len(), fragments = count, "fragmenting payload");

        for (index, chunk) in payload.chunks(FRAGMENT_PAYLOAD_SIZE).enumerate() {
            let final_packet = index == count - 1;
            let frame = Fragment::Data(DataFragment::new(chunk, final_packet)).encode();
            self.stats.fragments_sent += 1;
            io.send_downstream(frame.to_vec());
        }
        Ok(())
    }

    /// Accumulate a received fragment; deliver the reassembled payload when
    /// the final fragment arrives.
    ///
    /// The layer below only ever hands over whole air frames, so anything
    /// that is not exactly 32 bytes is a wiring bug, not line noise: fatal.
    fn receive_from_downstream(&mut self, payload: Vec<u8>, io: &mut LayerIo) -> Result<(), LayerError> {
        if payload.len() != FRAME_SIZE {
            return Err(LayerError::new(
                "fragmentation",
                format!(
                    "fragment is {} bytes, must be exactly {}",
                    payload.len(),
                    FRAME_SIZE
                ),
            ));
        }

        let fragment = match Fragment::decode(&payload) {
            Ok(Fragment::Data(data)) => data,
            Ok(other) => {
                debug!(packet_type = ?other.packet_type(), "ignoring non-data frame");
                self.stats.frames_discarded += 1;
                return Ok(());
            }
            Err(err) => {
                error!(%err, "undecodable fragment, discarding");
                self.stats.frames_discarded += 1;
                return Ok(());
            }
        };

        self.stats.fragments_received += 1;
        let final_packet = fragment.final_packet;
        self.reassembly.push(fragment);

        if final_packet {
            let mut assembled = Vec::with_capacity(self.reassembly.len() * FRAGMENT_PAYLOAD_SIZE);
            for fragment in self.reassembly.drain(..) {
                assembled.extend_from_slice(fragment.data());
            }
            self.stats.payloads_reassembled += 1;
            trace!(bytes = assembled.len(), "payload reassembled");
            io.send_upstream(assembled);
        }
        Ok(())
    }

    fn tick(&mut self, _now_us: u64, _io: &mut LayerIo) -> Result<(), LayerError> {
        Ok(())
    }

    fn reset(&mut self) {
        self.reassembly.clear();
    }

    fn stats(&self) -> StatsSnapshot {
        StatsSnapshot::Fragmentation(self.stats.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragments_of(payload: &[u8]) -> Vec<Vec<u8>> {
        let mut layer = FragmentationLayer::new();
        let mut io = LayerIo::new();
        layer.receive_from_upstream(payload.to_vec(), &mut io).unwrap();
        let mut out = Vec::new();
        while let Some(frame) = io.pop_downstream() {
            out.push(frame);
        }
        out
    }

    fn reassemble(frames: &[Vec<u8>]) -> Option<Vec<u8>> {
        let mut layer = FragmentationLayer::new();
        let mut io = LayerIo::new();
        for frame in frames {
            layer.receive_from_downstream(frame.clone(), &mut io).unwrap();
        }
        io.pop_upstream()
    }

    #[test]
    fn test_empty_payload_emits_nothing() {
        assert!(fragments_of(&[]).is_empty());
    }

    #[test]
    fn test_exact_single_fragment() {
        let payload = [0xAAu8; 30];
        let frames = fragments_of(&payload);
        assert_eq!(frames.len(), 1);

        match Fragment::decode(&frames[0]).unwrap() {
            Fragment::Data(data) => {
                assert_eq!(data.valid_bytes, 30);
                assert!(data.final_packet);
            }
            other => panic!("unexpected fragment {:?}", other),
        }
    }

    #[test]
    fn test_one_byte_overflow_splits() {
        let payload = [7u8; 31];
        let frames = fragments_of(&payload);
        assert_eq!(frames.len(), 2);

        let first = match Fragment::decode(&frames[0]).unwrap() {
            Fragment::Data(data) => data,
            other => panic!("unexpected fragment {:?}", other),
        };
        let second = match Fragment::decode(&frames[1]).unwrap() {
            Fragment::Data(data) => data,
            other => panic!("unexpected fragment {:?}", other),
        };
        assert_eq!(first.valid_bytes, 30);
        assert!(!first.final_packet);
        assert_eq!(second.valid_bytes, 1);
        assert!(second.final_packet);
    }

    #[test]
    fn test_fragment_count_is_ceiling() {
        let payload = vec![1u8; 1500];
        assert_eq!(fragments_of(&payload).len(), 50);
    }

    #[test]
    fn test_roundtrip_restores_payload() {
        let payload: Vec<u8> = (0..1500u32).map(|i| (i % 256) as u8).collect();
        let frames = fragments_of(&payload);
        assert_eq!(reassemble(&frames).unwrap(), payload);
    }

    #[test]
    fn test_roundtrip_small_payload() {
        let payload = b"ping".to_vec();
        let frames = fragments_of(&payload);
        assert_eq!(frames.len(), 1);
        assert_eq!(reassemble(&frames).unwrap(), payload);
    }

    #[test]
    fn test_exactly_one_final_fragment() {
        let payload = vec![9u8; 95];
        let finals = fragments_of(&payload)
            .iter()
            .filter(|frame| match Fragment::decode(frame).unwrap() {
                Fragment::Data(data) => data.final_packet,
                _ => false,
            })
            .count();
        assert_eq!(finals, 1);
    }

    #[test]
    fn test_missing_final_stalls_until_reset() {
        let payload = vec![3u8; 90];
        let mut frames = fragments_of(&payload);
        frames.pop();

        let mut layer = FragmentationLayer::new();
        let mut io = LayerIo::new();
        for frame in &frames {
            layer.receive_from_downstream(frame.clone(), &mut io).unwrap();
        }
        assert!(io.pop_upstream().is_none());

        layer.reset();
        assert!(layer.reassembly.is_empty());
    }

    #[test]
    fn test_wrong_size_frame_is_fatal() {
        let mut layer = FragmentationLayer::new();
        let mut io = LayerIo::new();
        let err = layer
            .receive_from_downstream(vec![0u8; 31], &mut io)
            .unwrap_err();
        assert!(err.to_string().contains("31"));
        assert!(io.is_empty());
    }
}
