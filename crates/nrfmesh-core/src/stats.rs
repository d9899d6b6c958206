//! Per-layer statistics
//!
//! Every layer owns its own plain counter struct; nothing here is shared or
//! global. The supervisory loop collects a [`StatsSnapshot`] from each layer
//! through [`crate::layer::Layer::stats`] and aggregates them into a
//! [`StackSnapshot`] for periodic reporting.

use serde::Serialize;
use std::fmt;

/// Counters owned by the tunnel layer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TunnelStats {
    /// IP frames read from the TUN fd by the reader thread
    pub frames_read: u64,
    /// IP frames written back to the TUN fd
    pub frames_written: u64,
    /// Read attempts that failed
    pub read_errors: u64,
    /// Write attempts that failed
    pub write_errors: u64,
    /// Times the reader thread had to back off on a full buffer
    pub backpressure_waits: u64,
}

/// Counters owned by the fragmentation layer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FragmentationStats {
    /// Fragments emitted downstream
    pub fragments_sent: u64,
    /// Fragments accepted from downstream
    pub fragments_received: u64,
    /// Payloads reassembled and delivered upstream
    pub payloads_reassembled: u64,
    /// Frames discarded (undecodable or unexpected type)
    pub frames_discarded: u64,
}

/// Counters owned by the acknowledgment layer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AckStats {
    /// Fragments transmitted for the first time
    pub fragments_sent: u64,
    /// Retransmissions
    pub retransmits: u64,
    /// Fragments dropped after exhausting retries
    pub delivery_failures: u64,
    /// Acknowledgments generated for received data
    pub acks_sent: u64,
    /// Acknowledgments that matched an in-flight fragment
    pub acks_matched: u64,
    /// Acknowledgments with no matching in-flight fragment
    pub acks_unmatched: u64,
}

/// Counters and identity owned by the mesh radio layer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MeshStats {
    /// Current node id
    pub node_id: u8,
    /// Whether the node id is final (assigned, below the discovery range)
    pub node_id_assigned: bool,
    /// Known neighbor count
    pub neighbors: usize,
    /// Frames handed to the radio
    pub frames_sent: u64,
    /// Frames read from the radio
    pub frames_received: u64,
    /// Received frames rejected by the checksum
    pub checksum_failures: u64,
    /// Outbound fragments dropped (no neighbor, bad type)
    pub send_drops: u64,
    /// Transmit bursts abandoned on a standby timeout
    pub tx_timeouts: u64,
}

/// Snapshot of one layer's statistics.
#[derive(Debug, Clone, Serialize)]
pub enum StatsSnapshot {
    Tunnel(TunnelStats),
    Fragmentation(FragmentationStats),
    Ack(AckStats),
    Mesh(MeshStats),
    /// For layers with nothing to report
    None,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatsSnapshot::Tunnel(s) => write!(
                f,
                "tunnel: read={} written={} read_err={} write_err={} backpressure={}",
                s.frames_read, s.frames_written, s.read_errors, s.write_errors, s.backpressure_waits
            ),
            StatsSnapshot::Fragmentation(s) => write!(
                f,
                "fragmentation: sent={} received={} reassembled={} discarded={}",
                s.fragments_sent, s.fragments_received, s.payloads_reassembled, s.frames_discarded
            ),
            StatsSnapshot::Ack(s) => write!(
                f,
                "ack: sent={} retransmit={} failed={} acks_out={} matched={} unmatched={}",
                s.fragments_sent,
                s.retransmits,
                s.delivery_failures,
                s.acks_sent,
                s.acks_matched,
                s.acks_unmatched
            ),
            StatsSnapshot::Mesh(s) => write!(
                f,
                "mesh: node={}{} neighbors={} tx={} rx={} bad_checksum={} drops={} tx_timeouts={}",
                s.node_id,
                if s.node_id_assigned { "" } else { "?" },
                s.neighbors,
                s.frames_sent,
                s.frames_received,
                s.checksum_failures,
                s.send_drops,
                s.tx_timeouts
            ),
            StatsSnapshot::None => write!(f, "-"),
        }
    }
}

/// Statistics for the whole layer stack, top to bottom.
#[derive(Debug, Clone, Serialize)]
pub struct StackSnapshot(pub Vec<StatsSnapshot>);

impl fmt::Display for StackSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, snapshot) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", snapshot)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_display() {
        let snapshot = StatsSnapshot::Mesh(MeshStats {
            node_id: 150,
            node_id_assigned: false,
            neighbors: 0,
            ..Default::default()
        });
        let line = snapshot.to_string();
        assert!(line.contains("node=150?"));
        assert!(line.contains("neighbors=0"));
    }
}
