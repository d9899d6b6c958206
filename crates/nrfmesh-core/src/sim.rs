//! In-memory radio medium
//!
//! [`SimMedium`] models the shared air for any number of [`SimRadio`]
//! devices in one process: a frame transmitted on a pipe address is delivered
//! to every other radio that is currently listening on a matching reading
//! pipe. Frame loss and single-bit corruption can be injected, which is what
//! the integration tests use to exercise retransmission and checksum
//! rejection without hardware.
//!
//! Randomness comes from a seeded linear congruential generator so every
//! simulation run is reproducible.

use crate::packet::{PipeAddress, FRAME_SIZE};
use crate::radio::{DataRate, PowerLevel, RadioDevice, RadioError, READING_PIPE_COUNT, TX_FIFO_DEPTH};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::trace;

/// Delivery counters for the simulated air.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimStats {
    /// Frames put on the air
    pub frames_sent: u64,
    /// Frame deliveries into a receiver's RX queue
    pub frames_delivered: u64,
    /// Frames dropped by the loss model
    pub frames_lost: u64,
    /// Frames delivered with an injected bit flip
    pub frames_corrupted: u64,
}

#[derive(Debug, Default)]
struct RadioSlot {
    listening: bool,
    reading_pipes: [Option<u32>; READING_PIPE_COUNT],
    rx: VecDeque<(u8, [u8; FRAME_SIZE])>,
}

#[derive(Debug)]
struct MediumState {
    radios: Vec<RadioSlot>,
    /// Probability that a transmitted frame is lost, 0.0..=1.0
    loss: f64,
    /// LCG state
    rng: u64,
    /// Flip one bit in the next delivered frame
    corrupt_next: bool,
    stats: SimStats,
}

impl MediumState {
    fn next_unit(&mut self) -> f64 {
        self.rng = self
            .rng
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.rng >> 33) as f64) / ((1u64 << 31) as f64)
    }
}

/// A shared simulated air. Cheap to clone; all clones refer to the same
/// medium.
#[derive(Clone)]
pub struct SimMedium {
    state: Arc<Mutex<MediumState>>,
}

impl SimMedium {
    /// Create a lossless medium seeded for reproducible randomness.
    pub fn new(seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(MediumState {
                radios: Vec::new(),
                loss: 0.0,
                rng: seed,
                corrupt_next: false,
                stats: SimStats::default(),
            })),
        }
    }

    /// Register a new radio on this medium.
    pub fn attach(&self) -> SimRadio {
        let mut state = self.lock();
        state.radios.push(RadioSlot::default());
        SimRadio {
            medium: Arc::clone(&self.state),
            index: state.radios.len() - 1,
            writing_pipe: None,
            tx_fifo: VecDeque::new(),
            channel: 0,
        }
    }

    /// Set the uniform frame loss probability.
    pub fn set_loss(&self, loss: f64) {
        self.lock().loss = loss.clamp(0.0, 1.0);
    }

    /// Flip one bit in the next frame that would be delivered.
    pub fn corrupt_next_frame(&self) {
        self.lock().corrupt_next = true;
    }

    /// Delivery counters so far.
    pub fn stats(&self) -> SimStats {
        self.lock().stats.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MediumState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A [`RadioDevice`] attached to a [`SimMedium`].
pub struct SimRadio {
    medium: Arc<Mutex<MediumState>>,
    index: usize,
    writing_pipe: Option<PipeAddress>,
    tx_fifo: VecDeque<[u8; FRAME_SIZE]>,
    channel: u8,
}

impl SimRadio {
    fn lock(&self) -> std::sync::MutexGuard<'_, MediumState> {
        self.medium.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The RF channel this radio was tuned to.
    pub fn channel(&self) -> u8 {
        self.channel
    }
}

impl RadioDevice for SimRadio {
    fn begin(&mut self) -> Result<(), RadioError> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn set_channel(&mut self, channel: u8) {
        self.channel = channel;
    }

    fn set_power(&mut self, _level: PowerLevel, _lna: bool) {}

    fn set_data_rate(&mut self, _rate: DataRate) {}

    fn set_address_width(&mut self, _width: u8) {}

    fn enable_dynamic_payloads(&mut self) {}

    fn disable_auto_ack(&mut self) {}

    fn set_retries(&mut self, _delay: u8, _count: u8) {}

    fn set_crc_8(&mut self) {}

    fn open_reading_pipe(&mut self, pipe: u8, address: PipeAddress) {
        let mut state = self.lock();
        if let Some(slot) = state.radios.get_mut(self.index) {
            if (pipe as usize) < READING_PIPE_COUNT {
                slot.reading_pipes[pipe as usize] = Some(address.raw());
            }
        }
    }

    fn open_writing_pipe(&mut self, address: PipeAddress) {
        self.writing_pipe = Some(address);
    }

    fn start_listening(&mut self) {
        let mut state = self.lock();
        if let Some(slot) = state.radios.get_mut(self.index) {
            slot.listening = true;
        }
    }

    fn stop_listening(&mut self) {
        let mut state = self.lock();
        if let Some(slot) = state.radios.get_mut(self.index) {
            slot.listening = false;
        }
    }

    fn write_fast(&mut self, frame: &[u8; FRAME_SIZE]) -> Result<(), RadioError> {
        if self.tx_fifo.len() >= TX_FIFO_DEPTH {
            return Err(RadioError::TxQueueFull);
        }
        self.tx_fifo.push_back(*frame);
        Ok(())
    }

    fn tx_standby(&mut self, _timeout_us: u64) -> Result<(), RadioError> {
        let Some(address) = self.writing_pipe else {
            self.tx_fifo.clear();
            return Err(RadioError::TxTimeout);
        };

        let frames: Vec<[u8; FRAME_SIZE]> = self.tx_fifo.drain(..).collect();
        let mut state = self.lock();
        for mut frame in frames {
            state.stats.frames_sent += 1;

            let roll = state.next_unit();
            if roll < state.loss {
                state.stats.frames_lost += 1;
                trace!(%address, "frame lost on the air");
                continue;
            }
            if state.corrupt_next {
                state.corrupt_next = false;
                frame[16] ^= 0x01;
                state.stats.frames_corrupted += 1;
            }

            let sender = self.index;
            let raw = address.raw();
            let mut delivered = 0u64;
            for (index, slot) in state.radios.iter_mut().enumerate() {
                if index == sender || !slot.listening {
                    continue;
                }
                if let Some(pipe) = slot
                    .reading_pipes
                    .iter()
                    .position(|reading| *reading == Some(raw))
                {
                    slot.rx.push_back((pipe as u8, frame));
                    delivered += 1;
                }
            }
            state.stats.frames_delivered += delivered;
        }
        Ok(())
    }

    fn available(&mut self) -> Option<u8> {
        let state = self.lock();
        state
            .radios
            .get(self.index)
            .and_then(|slot| slot.rx.front().map(|(pipe, _)| *pipe))
    }

    fn read(&mut self, frame: &mut [u8; FRAME_SIZE]) {
        let mut state = self.lock();
        if let Some(slot) = state.radios.get_mut(self.index) {
            if let Some((_, received)) = slot.rx.pop_front() {
                frame.copy_from_slice(&received);
            }
        }
    }

    fn flush_rx(&mut self) {
        let mut state = self.lock();
        if let Some(slot) = state.radios.get_mut(self.index) {
            slot.rx.clear();
        }
    }

    fn flush_tx(&mut self) {
        self.tx_fifo.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::BASE_ADDRESS;

    fn frame_of(fill: u8) -> [u8; FRAME_SIZE] {
        [fill; FRAME_SIZE]
    }

    fn transmit(radio: &mut SimRadio, address: PipeAddress, frame: &[u8; FRAME_SIZE]) {
        radio.stop_listening();
        radio.open_writing_pipe(address);
        radio.write_fast(frame).unwrap();
        radio.tx_standby(100_000).unwrap();
        radio.start_listening();
    }

    #[test]
    fn test_delivery_requires_matching_pipe() {
        let medium = SimMedium::new(1);
        let mut tx = medium.attach();
        let mut rx = medium.attach();

        let address = PipeAddress::node_pipe(BASE_ADDRESS, 7, 1);
        rx.open_reading_pipe(1, address);
        rx.start_listening();

        transmit(&mut tx, address, &frame_of(0xAA));
        assert_eq!(rx.available(), Some(1));

        let mut received = frame_of(0);
        rx.read(&mut received);
        assert_eq!(received, frame_of(0xAA));

        // A different destination is never delivered.
        transmit(&mut tx, PipeAddress::node_pipe(BASE_ADDRESS, 8, 1), &frame_of(0xBB));
        assert_eq!(rx.available(), None);
    }

    #[test]
    fn test_not_listening_misses_frames() {
        let medium = SimMedium::new(1);
        let mut tx = medium.attach();
        let mut rx = medium.attach();

        let address = PipeAddress::node_pipe(BASE_ADDRESS, 7, 1);
        rx.open_reading_pipe(1, address);
        // rx never starts listening.
        transmit(&mut tx, address, &frame_of(1));
        assert_eq!(rx.available(), None);
    }

    #[test]
    fn test_tx_fifo_depth() {
        let medium = SimMedium::new(1);
        let mut radio = medium.attach();
        for fill in 0..3 {
            radio.write_fast(&frame_of(fill)).unwrap();
        }
        assert_eq!(radio.write_fast(&frame_of(9)), Err(RadioError::TxQueueFull));

        radio.flush_tx();
        radio.write_fast(&frame_of(9)).unwrap();
    }

    #[test]
    fn test_loss_model() {
        let medium = SimMedium::new(42);
        medium.set_loss(0.5);
        let mut tx = medium.attach();
        let mut rx = medium.attach();

        let address = PipeAddress::node_pipe(BASE_ADDRESS, 1, 1);
        rx.open_reading_pipe(1, address);
        rx.start_listening();

        for _ in 0..200 {
            transmit(&mut tx, address, &frame_of(3));
        }

        let stats = medium.stats();
        assert_eq!(stats.frames_sent, 200);
        assert!(stats.frames_lost > 50, "lost {}", stats.frames_lost);
        assert!(stats.frames_lost < 150, "lost {}", stats.frames_lost);
        assert_eq!(stats.frames_delivered, 200 - stats.frames_lost);
    }

    #[test]
    fn test_corruption_injection() {
        let medium = SimMedium::new(1);
        let mut tx = medium.attach();
        let mut rx = medium.attach();

        let address = PipeAddress::node_pipe(BASE_ADDRESS, 2, 1);
        rx.open_reading_pipe(1, address);
        rx.start_listening();

        medium.corrupt_next_frame();
        transmit(&mut tx, address, &frame_of(0));

        let mut received = frame_of(0xFF);
        rx.read(&mut received);
        assert_eq!(received[16], 0x01);
        assert_eq!(medium.stats().frames_corrupted, 1);
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let observe = |seed| {
            let medium = SimMedium::new(seed);
            medium.set_loss(0.3);
            let mut tx = medium.attach();
            let mut rx = medium.attach();
            let address = PipeAddress::node_pipe(BASE_ADDRESS, 1, 1);
            rx.open_reading_pipe(1, address);
            rx.start_listening();
            for _ in 0..50 {
                transmit(&mut tx, address, &frame_of(1));
            }
            medium.stats().frames_lost
        };
        assert_eq!(observe(9), observe(9));
    }
}
