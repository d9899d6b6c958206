//! Radio device abstraction
//!
//! The mesh layer drives the radio exclusively through [`RadioDevice`], which
//! mirrors the NRF24L01 operations the protocol actually needs: bring-up and
//! tuning, six reading pipes plus one writing pipe, listen/transmit switching,
//! a three-deep TX FIFO, and FIFO flushes. Anything that speaks this trait can
//! sit under the stack: the register-level SPI driver on real hardware, the
//! in-memory medium in [`crate::sim`], or a development transport.

use crate::packet::{PipeAddress, FRAME_SIZE};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of reading pipes a device exposes (indices 0..=5).
pub const READING_PIPE_COUNT: usize = 6;

/// Depth of the transmit FIFO. Writes beyond this fail until the FIFO is
/// drained by [`RadioDevice::tx_standby`] or cleared by
/// [`RadioDevice::flush_tx`].
pub const TX_FIFO_DEPTH: usize = 3;

/// Transmit power setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerLevel {
    Min,
    Low,
    High,
    Max,
}

/// On-air data rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataRate {
    Kbps250,
    Mbps1,
    Mbps2,
}

/// Errors reported by a radio device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    /// Device failed to initialize
    InitFailed(String),
    /// Device is not responding on the bus
    NotConnected,
    /// TX FIFO is full; the frame was not queued
    TxQueueFull,
    /// TX FIFO did not drain within the standby timeout
    TxTimeout,
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioError::InitFailed(reason) => write!(f, "radio init failed: {}", reason),
            RadioError::NotConnected => write!(f, "radio is not connected"),
            RadioError::TxQueueFull => write!(f, "TX FIFO full"),
            RadioError::TxTimeout => write!(f, "TX FIFO did not drain before timeout"),
        }
    }
}

impl std::error::Error for RadioError {}

/// The capability set the protocol stack consumes from the radio.
///
/// Semantics follow the NRF24L01: half duplex, so the device is either
/// listening or transmitting; `write_fast` only queues into the TX FIFO and
/// `tx_standby` blocks (bounded) until the FIFO is on the air.
pub trait RadioDevice {
    /// Power up and initialize the device. Fatal if it fails.
    fn begin(&mut self) -> Result<(), RadioError>;

    /// Whether the device is present and responding.
    fn is_connected(&self) -> bool;

    /// Tune to an RF channel (0..=127).
    fn set_channel(&mut self, channel: u8);

    /// Set transmit power and the low-noise amplifier state.
    fn set_power(&mut self, level: PowerLevel, lna: bool);

    /// Set the on-air data rate.
    fn set_data_rate(&mut self, rate: DataRate);

    /// Set the address width in bytes (3..=5).
    fn set_address_width(&mut self, width: u8);

    /// Allow payloads shorter than the fixed frame size on the air.
    fn enable_dynamic_payloads(&mut self);

    /// Disable hardware auto-acknowledgment; the stack does its own.
    fn disable_auto_ack(&mut self);

    /// Configure hardware retransmission (delay, count). The stack runs with
    /// (0, 0) and handles retries itself.
    fn set_retries(&mut self, delay: u8, count: u8);

    /// Use 8-bit hardware CRC.
    fn set_crc_8(&mut self);

    /// Open reading pipe `pipe` (0..=5) at `address`.
    fn open_reading_pipe(&mut self, pipe: u8, address: PipeAddress);

    /// Point the single writing pipe at `address`.
    fn open_writing_pipe(&mut self, address: PipeAddress);

    /// Enter receive mode.
    fn start_listening(&mut self);

    /// Leave receive mode so the TX FIFO can be transmitted.
    fn stop_listening(&mut self);

    /// Queue one frame into the TX FIFO without blocking.
    fn write_fast(&mut self, frame: &[u8; FRAME_SIZE]) -> Result<(), RadioError>;

    /// Block until the TX FIFO has drained onto the air, or `timeout_us`
    /// elapses.
    fn tx_standby(&mut self, timeout_us: u64) -> Result<(), RadioError>;

    /// If a received frame is waiting, the index of the reading pipe it
    /// arrived on.
    fn available(&mut self) -> Option<u8>;

    /// Pop the oldest received frame into `frame`.
    fn read(&mut self, frame: &mut [u8; FRAME_SIZE]);

    /// Drop everything in the RX FIFO.
    fn flush_rx(&mut self);

    /// Drop everything in the TX FIFO.
    fn flush_tx(&mut self);
}
