//! Wire frame codec and pipe addressing
//!
//! Everything exchanged over the air is exactly one 32-byte frame. The NRF24L01
//! does CRC-8 in hardware; on top of that each frame carries a 4-bit arithmetic
//! checksum and a 4-bit type discriminator in its first byte.
//!
//! ## Frame layout
//!
//! ```text
//! ┌──────────────────────┬──────────────────────────────────────────────┐
//! │ Byte 0               │ Bytes 1-31                                   │
//! │ [7:4] packet type    │ variant-specific                             │
//! │ [3:0] checksum       │                                              │
//! └──────────────────────┴──────────────────────────────────────────────┘
//!
//! Discovery / NodeIdAnnouncement:
//!   byte 1: source node id, bytes 2-31: zero padding
//! DiscoverResponse:
//!   byte 1: source node id, byte 2: neighbor count, bytes 3-31: neighbor ids
//! TimeSynch / TimeSynchAck:
//!   byte 1: source node id, bytes 2-9: microseconds left in slot (LE u64)
//! Data / DataAck:
//!   byte 1: [4:0] valid byte count, [5] final fragment, [7:6] reserved
//!   bytes 2-31: payload
//! ```
//!
//! The checksum is the mod-16 sum of every nibble in the frame with the
//! checksum nibble itself taken as zero. It is a deliberately weak check:
//! its job is to reject frames that slipped past the radio's CRC-8, not to
//! authenticate anything.

use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

/// Size of every on-air frame in bytes.
pub const FRAME_SIZE: usize = 32;

/// Bytes of application payload a single Data frame can carry.
pub const FRAGMENT_PAYLOAD_SIZE: usize = 30;

/// Maximum neighbor ids a single DiscoverResponse can report.
pub const MAX_NEIGHBORS_PER_RESPONSE: usize = 29;

/// Base of the pipe address space. Only the low three bytes reach the radio
/// (address width 3), so the effective base is `0xAB0000`.
pub const BASE_ADDRESS: u32 = 0xFFAB_0000;

/// Offset of the shared discovery pipe within the address space.
pub const DISCOVERY_ADDRESS_OFFSET: u32 = 0xBA;

/// 4-bit frame type codes. The values are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// Broadcast probe from a node looking for neighbors
    Discovery = 1,
    /// Reply to a Discovery, listing the sender's known neighbors
    DiscoverResponse = 2,
    /// Broadcast announcing a freshly assigned node id
    NodeIdAnnouncement = 3,
    /// Slot synchronization request
    TimeSynch = 4,
    /// Slot synchronization reply
    TimeSynchAck = 5,
    /// Application payload fragment
    Data = 6,
    /// Acknowledgment for a Data fragment
    DataAck = 7,
    /// Reserved / informational
    Status = 8,
}

impl PacketType {
    /// Decode a 4-bit type code.
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            1 => Some(PacketType::Discovery),
            2 => Some(PacketType::DiscoverResponse),
            3 => Some(PacketType::NodeIdAnnouncement),
            4 => Some(PacketType::TimeSynch),
            5 => Some(PacketType::TimeSynchAck),
            6 => Some(PacketType::Data),
            7 => Some(PacketType::DataAck),
            8 => Some(PacketType::Status),
            _ => None,
        }
    }

    /// The type nibble carried in byte 0 of `frame`, without validating
    /// anything else.
    pub fn of_frame(frame: &[u8]) -> Option<Self> {
        frame.first().and_then(|b| Self::from_nibble(b >> 4))
    }
}

/// Errors from decoding a received frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Frame was not exactly [`FRAME_SIZE`] bytes
    Length(usize),
    /// Checksum nibble did not match the frame contents
    Checksum { expected: u8, got: u8 },
    /// Type nibble is not a known packet type
    UnknownType(u8),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Length(len) => write!(f, "frame is {} bytes, expected {}", len, FRAME_SIZE),
            WireError::Checksum { expected, got } => {
                write!(f, "checksum mismatch: expected {:#X}, got {:#X}", expected, got)
            }
            WireError::UnknownType(t) => write!(f, "unknown packet type {:#X}", t),
        }
    }
}

impl std::error::Error for WireError {}

/// Payload-carrying half of a Data or DataAck frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFragment {
    /// How many leading bytes of `payload` are meaningful (0..=30)
    pub valid_bytes: u8,
    /// Set on the last fragment of a reassembly sequence
    pub final_packet: bool,
    /// Payload bytes; only `payload[..valid_bytes]` carry data
    pub payload: [u8; FRAGMENT_PAYLOAD_SIZE],
}

impl DataFragment {
    /// Build a fragment from a payload slice of at most 30 bytes.
    pub fn new(chunk: &[u8], final_packet: bool) -> Self {
        debug_assert!(chunk.len() <= FRAGMENT_PAYLOAD_SIZE);
        let mut payload = [0u8; FRAGMENT_PAYLOAD_SIZE];
        payload[..chunk.len()].copy_from_slice(chunk);
        Self {
            valid_bytes: chunk.len() as u8,
            final_packet,
            payload,
        }
    }

    /// The meaningful payload bytes.
    pub fn data(&self) -> &[u8] {
        let valid = (self.valid_bytes as usize).min(FRAGMENT_PAYLOAD_SIZE);
        &self.payload[..valid]
    }
}

/// A decoded on-air frame, one variant per packet type.
///
/// This is the in-memory shape; [`Fragment::encode`] and [`Fragment::decode`]
/// translate to and from the packed 32-byte wire layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Discovery { source: u8 },
    DiscoverResponse { source: u8, neighbors: Vec<u8> },
    NodeIdAnnouncement { source: u8 },
    TimeSynch { source: u8, time_left_us: u64 },
    TimeSynchAck { source: u8, time_left_us: u64 },
    Data(DataFragment),
    DataAck(DataFragment),
    Status,
}

impl Fragment {
    /// The packet type of this fragment.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Fragment::Discovery { .. } => PacketType::Discovery,
            Fragment::DiscoverResponse { .. } => PacketType::DiscoverResponse,
            Fragment::NodeIdAnnouncement { .. } => PacketType::NodeIdAnnouncement,
            Fragment::TimeSynch { .. } => PacketType::TimeSynch,
            Fragment::TimeSynchAck { .. } => PacketType::TimeSynchAck,
            Fragment::Data(_) => PacketType::Data,
            Fragment::DataAck(_) => PacketType::DataAck,
            Fragment::Status => PacketType::Status,
        }
    }

    /// Pack into the 32-byte wire layout, stamping the checksum.
    pub fn encode(&self) -> [u8; FRAME_SIZE] {
        let mut frame = [0u8; FRAME_SIZE];
        frame[0] = (self.packet_type() as u8) << 4;
        match self {
            Fragment::Discovery { source } | Fragment::NodeIdAnnouncement { source } => {
                frame[1] = *source;
            }
            Fragment::DiscoverResponse { source, neighbors } => {
                frame[1] = *source;
                let count = neighbors.len().min(MAX_NEIGHBORS_PER_RESPONSE);
                frame[2] = count as u8;
                frame[3..3 + count].copy_from_slice(&neighbors[..count]);
            }
            Fragment::TimeSynch {
                source,
                time_left_us,
            }
            | Fragment::TimeSynchAck {
                source,
                time_left_us,
            } => {
                frame[1] = *source;
                LittleEndian::write_u64(&mut frame[2..10], *time_left_us);
            }
            Fragment::Data(data) | Fragment::DataAck(data) => {
                frame[1] = (data.valid_bytes & 0x1F) | ((data.final_packet as u8) << 5);
                frame[2..].copy_from_slice(&data.payload);
            }
            Fragment::Status => {}
        }
        insert_checksum(&mut frame);
        frame
    }

    /// Decode a received 32-byte frame, validating its checksum.
    pub fn decode(frame: &[u8]) -> Result<Self, WireError> {
        if frame.len() != FRAME_SIZE {
            return Err(WireError::Length(frame.len()));
        }
        let mut buf = [0u8; FRAME_SIZE];
        buf.copy_from_slice(frame);

        let expected = checksum(&buf);
        let got = buf[0] & 0x0F;
        if expected != got {
            return Err(WireError::Checksum { expected, got });
        }

        let type_nibble = buf[0] >> 4;
        let packet_type =
            PacketType::from_nibble(type_nibble).ok_or(WireError::UnknownType(type_nibble))?;

        Ok(match packet_type {
            PacketType::Discovery => Fragment::Discovery { source: buf[1] },
            PacketType::NodeIdAnnouncement => Fragment::NodeIdAnnouncement { source: buf[1] },
            PacketType::DiscoverResponse => {
                let count = (buf[2] as usize).min(MAX_NEIGHBORS_PER_RESPONSE);
                Fragment::DiscoverResponse {
                    source: buf[1],
                    neighbors: buf[3..3 + count].to_vec(),
                }
            }
            PacketType::TimeSynch => Fragment::TimeSynch {
                source: buf[1],
                time_left_us: LittleEndian::read_u64(&buf[2..10]),
            },
            PacketType::TimeSynchAck => Fragment::TimeSynchAck {
                source: buf[1],
                time_left_us: LittleEndian::read_u64(&buf[2..10]),
            },
            PacketType::Data => Fragment::Data(decode_data(&buf)),
            PacketType::DataAck => Fragment::DataAck(decode_data(&buf)),
            PacketType::Status => Fragment::Status,
        })
    }
}

fn decode_data(frame: &[u8; FRAME_SIZE]) -> DataFragment {
    let mut payload = [0u8; FRAGMENT_PAYLOAD_SIZE];
    payload.copy_from_slice(&frame[2..]);
    DataFragment {
        valid_bytes: frame[1] & 0x1F,
        final_packet: frame[1] & 0x20 != 0,
        payload,
    }
}

/// Compute the 4-bit checksum of a frame, treating the checksum nibble as
/// zero. Sums every nibble of the frame mod 16.
pub fn checksum(frame: &[u8; FRAME_SIZE]) -> u8 {
    let mut sum: u32 = ((frame[0] >> 4) & 0x0F) as u32;
    for &byte in &frame[1..] {
        sum += (byte & 0x0F) as u32;
        sum += ((byte >> 4) & 0x0F) as u32;
    }
    (sum % 16) as u8
}

/// Stamp the checksum nibble into byte 0.
pub fn insert_checksum(frame: &mut [u8; FRAME_SIZE]) {
    frame[0] = (frame[0] & 0xF0) | checksum(frame);
}

/// Recompute the checksum and compare against the stored nibble.
pub fn validate_checksum(frame: &[u8; FRAME_SIZE]) -> bool {
    checksum(frame) == frame[0] & 0x0F
}

/// A 24-bit radio pipe address.
///
/// The radio runs with a 3-byte address width, so only the low three bytes of
/// the configured base matter. Each node reads on the shared discovery pipe
/// (index 0) and on up to five unicast pipes derived from its node id.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipeAddress(u32);

impl PipeAddress {
    /// Bits of the address that reach the radio.
    pub const MASK: u32 = 0x00FF_FFFF;

    /// Wrap a raw address, keeping the low 24 bits.
    pub fn new(raw: u32) -> Self {
        Self(raw & Self::MASK)
    }

    /// The shared discovery pipe for an address space rooted at `base`.
    pub fn discovery(base: u32) -> Self {
        Self::new(base | DISCOVERY_ADDRESS_OFFSET)
    }

    /// Unicast pipe `pipe` (1..=5) of node `node_id`.
    pub fn node_pipe(base: u32, node_id: u8, pipe: u8) -> Self {
        debug_assert!((1..=5).contains(&pipe));
        Self::new(base | ((node_id as u32) << 8) | pipe as u32)
    }

    /// The raw 24-bit value.
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for PipeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#08X}", self.0)
    }
}

impl fmt::Display for PipeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#08X}", self.0)
    }
}
