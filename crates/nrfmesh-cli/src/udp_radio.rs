//! UDP-emulated radio backend
//!
//! Carries the 32-byte air frames over UDP so two `nrfmesh run` processes on
//! one host (or a LAN) can tunnel real IP traffic with no radio hardware.
//! Every datagram is the destination pipe address (4 bytes, little endian)
//! followed by the frame; reception filters against the local open reading
//! pipes exactly the way the radio's address matching would.
//!
//! This models the medium, not the impairments: there is no loss, collision,
//! or turnaround cost. It exists for development and interop testing.

use byteorder::{ByteOrder, LittleEndian};
use nrfmesh_core::packet::{PipeAddress, FRAME_SIZE};
use nrfmesh_core::radio::{
    DataRate, PowerLevel, RadioDevice, RadioError, READING_PIPE_COUNT, TX_FIFO_DEPTH,
};
use std::collections::VecDeque;
use std::net::{SocketAddr, UdpSocket};
use tracing::{debug, trace, warn};

/// Bytes prepended to each frame on the wire.
const ADDRESS_PREFIX: usize = 4;

/// A [`RadioDevice`] that broadcasts frames to a fixed set of peers over
/// UDP.
pub struct UdpRadio {
    socket: UdpSocket,
    peers: Vec<SocketAddr>,
    reading_pipes: [Option<u32>; READING_PIPE_COUNT],
    writing_pipe: Option<PipeAddress>,
    listening: bool,
    tx_fifo: VecDeque<[u8; FRAME_SIZE]>,
    rx: VecDeque<(u8, [u8; FRAME_SIZE])>,
}

impl UdpRadio {
    /// Bind the local socket and remember the peer set.
    pub fn new(bind: SocketAddr, peers: Vec<SocketAddr>) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(bind)?;
        socket.set_nonblocking(true)?;
        debug!(local = %socket.local_addr()?, peers = peers.len(), "udp radio bound");
        Ok(Self {
            socket,
            peers,
            reading_pipes: [None; READING_PIPE_COUNT],
            writing_pipe: None,
            listening: false,
            tx_fifo: VecDeque::new(),
            rx: VecDeque::new(),
        })
    }

    /// Drain pending datagrams into the RX queue, applying pipe filtering.
    fn poll_socket(&mut self) {
        let mut datagram = [0u8; ADDRESS_PREFIX + FRAME_SIZE];
        loop {
            match self.socket.recv_from(&mut datagram) {
                Ok((len, from)) => {
                    if len != datagram.len() {
                        warn!(len, %from, "runt datagram ignored");
                        continue;
                    }
                    if !self.listening {
                        continue;
                    }
                    let address = LittleEndian::read_u32(&datagram[..ADDRESS_PREFIX]);
                    let Some(pipe) = self
                        .reading_pipes
                        .iter()
                        .position(|reading| *reading == Some(address))
                    else {
                        continue;
                    };
                    let mut frame = [0u8; FRAME_SIZE];
                    frame.copy_from_slice(&datagram[ADDRESS_PREFIX..]);
                    trace!(pipe, "frame received over udp");
                    self.rx.push_back((pipe as u8, frame));
                }
                Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!(%err, "udp receive failed");
                    break;
                }
            }
        }
    }
}

impl RadioDevice for UdpRadio {
    fn begin(&mut self) -> Result<(), RadioError> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn set_channel(&mut self, _channel: u8) {}

    fn set_power(&mut self, _level: PowerLevel, _lna: bool) {}

    fn set_data_rate(&mut self, _rate: DataRate) {}

    fn set_address_width(&mut self, _width: u8) {}

    fn enable_dynamic_payloads(&mut self) {}

    fn disable_auto_ack(&mut self) {}

    fn set_retries(&mut self, _delay: u8, _count: u8) {}

    fn set_crc_8(&mut self) {}

    fn open_reading_pipe(&mut self, pipe: u8, address: PipeAddress) {
        if (pipe as usize) < READING_PIPE_COUNT {
            self.reading_pipes[pipe as usize] = Some(address.raw());
        }
    }

    fn open_writing_pipe(&mut self, address: PipeAddress) {
        self.writing_pipe = Some(address);
    }

    fn start_listening(&mut self) {
        self.listening = true;
    }

    fn stop_listening(&mut self) {
        self.listening = false;
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
        let mut datagram = [0u8; ADDRESS_PREFIX + FRAME_SIZE];
        LittleEndian::write_u32(&mut datagram[..ADDRESS_PREFIX], address.raw());

        while let Some(frame) = self.tx_fifo.pop_front() {
            datagram[ADDRESS_PREFIX..].copy_from_slice(&frame);
            for peer in &self.peers {
                if let Err(err) = self.socket.send_to(&datagram, peer) {
                    warn!(%err, %peer, "udp send failed");
                }
            }
        }
        Ok(())
    }

    fn available(&mut self) -> Option<u8> {
        self.poll_socket();
        self.rx.front().map(|(pipe, _)| *pipe)
    }

    fn read(&mut self, frame: &mut [u8; FRAME_SIZE]) {
        if let Some((_, received)) = self.rx.pop_front() {
            frame.copy_from_slice(&received);
        }
    }

    fn flush_rx(&mut self) {
        self.rx.clear();
    }

    fn flush_tx(&mut self) {
        self.tx_fifo.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nrfmesh_core::packet::BASE_ADDRESS;

    fn pair() -> (UdpRadio, UdpRadio) {
        let a = UdpRadio::new("127.0.0.1:0".parse().unwrap(), Vec::new()).unwrap();
        let b = UdpRadio::new("127.0.0.1:0".parse().unwrap(), Vec::new()).unwrap();
        let a_addr = a.socket.local_addr().unwrap();
        let b_addr = b.socket.local_addr().unwrap();
        let mut a = a;
        let mut b = b;
        a.peers = vec![b_addr];
        b.peers = vec![a_addr];
        (a, b)
    }

    fn wait_available(radio: &mut UdpRadio) -> Option<u8> {
        for _ in 0..200 {
            if let Some(pipe) = radio.available() {
                return Some(pipe);
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        None
    }

    #[test]
    fn test_frame_crosses_sockets() {
        let (mut a, mut b) = pair();
        let address = PipeAddress::node_pipe(BASE_ADDRESS, 3, 1);
        b.open_reading_pipe(1, address);
        b.start_listening();

        a.open_writing_pipe(address);
        a.write_fast(&[0x5A; FRAME_SIZE]).unwrap();
        a.tx_standby(100_000).unwrap();

        assert_eq!(wait_available(&mut b), Some(1));
        let mut frame = [0u8; FRAME_SIZE];
        b.read(&mut frame);
        assert_eq!(frame, [0x5A; FRAME_SIZE]);
    }

    #[test]
    fn test_wrong_pipe_filtered() {
        let (mut a, mut b) = pair();
        b.open_reading_pipe(1, PipeAddress::node_pipe(BASE_ADDRESS, 3, 1));
        b.start_listening();

        a.open_writing_pipe(PipeAddress::node_pipe(BASE_ADDRESS, 9, 1));
        a.write_fast(&[1; FRAME_SIZE]).unwrap();
        a.tx_standby(100_000).unwrap();

        assert_eq!(wait_available(&mut b), None);
    }

    #[test]
    fn test_not_listening_drops() {
        let (mut a, mut b) = pair();
        let address = PipeAddress::node_pipe(BASE_ADDRESS, 3, 1);
        b.open_reading_pipe(1, address);

        a.open_writing_pipe(address);
        a.write_fast(&[1; FRAME_SIZE]).unwrap();
        a.tx_standby(100_000).unwrap();

        assert_eq!(wait_available(&mut b), None);
    }
}
