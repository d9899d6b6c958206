//! Mesh radio layer
//!
//! Owns the radio and the shared half-duplex medium. Responsibilities:
//!
//! - **Discovery**: a fresh node boots with a random provisional id in the
//!   discovery range, probes the shared discovery pipe, collects
//!   [`DiscoverResponse`](crate::packet::Fragment) replies, then claims the
//!   smallest free final id and announces it.
//! - **Addressing**: every node reads on the shared discovery pipe (index 0)
//!   and on unicast pipes 1..=5 derived from its node id; the single writing
//!   pipe is retargeted only when the destination actually changes.
//! - **Scheduling**: outside of slotted operation the node listens for a
//!   minimum window between transmit bursts; in slotted (timing) operation it
//!   alternates fixed send/receive slots aligned to a peer via the
//!   TimeSynch/TimeSynchAck exchange.
//! - **Framing**: stamps and validates the 4-bit checksum on every frame and
//!   dispatches received frames by type.
//!
//! Data and DataAck frames pass through verbatim: the layer above builds
//! them, this layer only addresses, checksums, and schedules them.

use crate::layer::{Layer, LayerError, LayerIo};
use crate::packet::{
    validate_checksum, Fragment, PacketType, PipeAddress, BASE_ADDRESS, DISCOVERY_ADDRESS_OFFSET,
    FRAME_SIZE, MAX_NEIGHBORS_PER_RESPONSE,
};
use crate::radio::{DataRate, PowerLevel, RadioDevice, RadioError};
use crate::stats::{MeshStats, StatsSnapshot};
use rand::Rng;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use tracing::{debug, error, info, trace, warn};

/// Node ids at or above this value are provisional (picked at random while
/// discovering); final assigned ids count up from zero below it.
pub const MIN_DISCOVERY_ID: u8 = 101;

/// Frames transmitted back-to-back in one burst. Matches the radio's TX FIFO
/// depth so a burst amortizes one listen/transmit turnaround.
const TX_BURST: usize = 3;

/// Communication phase of the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommsState {
    /// Not yet started
    None,
    /// Slot-synchronized operation with a peer
    Timing,
    /// Probing for neighbors / acquiring a node id
    Discovery,
    /// Normal operation with a final node id
    Running,
}

/// What the radio is doing with the medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    /// Not yet started
    None,
    /// Receive slot of slotted operation
    Listening,
    /// Transmit slot of slotted operation
    Sending,
    /// Unslotted listen-mostly operation with a minimum listen window
    Continuous,
}

/// Fatal radio bring-up errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshSetupError {
    /// RF channel outside 0..=127
    InvalidChannel(u8),
    /// Address width outside 3..=5
    InvalidAddressWidth(u8),
    /// The radio driver failed
    Radio(RadioError),
}

impl fmt::Display for MeshSetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshSetupError::InvalidChannel(c) => {
                write!(f, "channel {} out of range (0..=127)", c)
            }
            MeshSetupError::InvalidAddressWidth(w) => {
                write!(f, "address width {} out of range (3..=5)", w)
            }
            MeshSetupError::Radio(err) => write!(f, "radio setup failed: {}", err),
        }
    }
}

impl std::error::Error for MeshSetupError {}

impl From<RadioError> for MeshSetupError {
    fn from(err: RadioError) -> Self {
        MeshSetupError::Radio(err)
    }
}

/// Configuration for [`MeshRadioLayer`].
#[derive(Debug, Clone)]
pub struct MeshRadioConfig {
    /// RF channel (0..=127)
    pub channel: u8,
    /// Transmit power
    pub power_level: PowerLevel,
    /// Low-noise amplifier enable
    pub low_noise_amplifier: bool,
    /// On-air data rate
    pub data_rate: DataRate,
    /// Radio address width in bytes
    pub address_width: u8,
    /// Base of the pipe address space
    pub base_address: u32,
    /// Address of the shared discovery pipe
    pub discovery_address: u32,
    /// Fixed node id; a random provisional id is drawn when `None`
    pub node_id: Option<u8>,
    /// Start slot synchronization as soon as a neighbor is known
    pub slotted: bool,
    /// Interval between discovery probes
    pub discovery_rate_us: u64,
    /// How long to keep collecting responses after the first one
    pub discovery_response_window_us: u64,
    /// Probes sent with no response before assuming isolation
    pub max_discovery_messages: u8,
    /// Length of one send or receive slot in slotted operation
    pub send_receive_period_us: u64,
    /// Minimum listen window between bursts in continuous operation
    pub continuous_listen_us: u64,
    /// Bound on waiting for the TX FIFO to drain
    pub tx_standby_timeout_us: u64,
    /// Slotted operation reverts to discovery after this long without any
    /// timing traffic
    pub timing_fallback_us: u64,
}

impl Default for MeshRadioConfig {
    fn default() -> Self {
        Self {
            channel: 1,
            power_level: PowerLevel::Max,
            low_noise_amplifier: true,
            data_rate: DataRate::Mbps2,
            address_width: 3,
            base_address: BASE_ADDRESS,
            discovery_address: BASE_ADDRESS | DISCOVERY_ADDRESS_OFFSET,
            node_id: None,
            slotted: false,
            discovery_rate_us: 1_000_000,
            discovery_response_window_us: 1_000_000,
            max_discovery_messages: 3,
            send_receive_period_us: 5_000,
            continuous_listen_us: 10_000,
            tx_standby_timeout_us: 100_000,
            timing_fallback_us: 5_000_000,
        }
    }
}

/// A frame queued for transmission together with its destination pipe.
#[derive(Debug, Clone)]
struct PacketFrame {
    address: PipeAddress,
    frame: [u8; FRAME_SIZE],
}

/// The bottom layer: drives the radio state machine and moves 32-byte frames
/// between the air and the acknowledgment layer above.
pub struct MeshRadioLayer<R: RadioDevice> {
    radio: R,
    config: MeshRadioConfig,
    node_id: u8,
    comms_state: CommsState,
    radio_state: RadioState,
    /// Final ids of every node heard from; never shrinks during a session
    neighbor_node_ids: BTreeSet<u8>,
    packets_to_send: VecDeque<PacketFrame>,
    /// Destination of the currently configured writing pipe
    writing_pipe: Option<PipeAddress>,
    discovery_messages_sent: u8,
    discovery_timer_us: u64,
    /// When the first DiscoverResponse of this discovery round arrived
    first_response_time_us: Option<u64>,
    /// When the radio last returned to listening (continuous gate)
    last_listen_time_us: u64,
    /// Start of the current slot in slotted operation
    slot_anchor_us: u64,
    last_timing_packet_us: u64,
    stats: MeshStats,
}

impl<R: RadioDevice> fmt::Debug for MeshRadioLayer<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeshRadioLayer")
            .field("node_id", &self.node_id)
            .field("comms_state", &self.comms_state)
            .field("radio_state", &self.radio_state)
            .field("neighbors", &self.neighbor_node_ids)
            .field("queued", &self.packets_to_send.len())
            .finish()
    }
}

impl<R: RadioDevice> MeshRadioLayer<R> {
    /// Bring up the radio and enter discovery. Fails fatally on an absent or
    /// misconfigured radio.
    pub fn new(mut radio: R, config: MeshRadioConfig) -> Result<Self, MeshSetupError> {
        if config.channel > 127 {
            return Err(MeshSetupError::InvalidChannel(config.channel));
        }
        if !(3..=5).contains(&config.address_width) {
            return Err(MeshSetupError::InvalidAddressWidth(config.address_width));
        }

        radio.begin()?;
        radio.set_channel(config.channel);
        radio.set_power(config.power_level, config.low_noise_amplifier);
        radio.set_data_rate(config.data_rate);
        radio.set_address_width(config.address_width);
        radio.enable_dynamic_payloads();
        radio.disable_auto_ack();
        radio.set_retries(0, 0);
        radio.set_crc_8();
        if !radio.is_connected() {
            return Err(MeshSetupError::Radio(RadioError::NotConnected));
        }

        let node_id = config
            .node_id
            .unwrap_or_else(|| rand::thread_rng().gen_range(MIN_DISCOVERY_ID..=u8::MAX));
        info!(node_id, "starting mesh radio");

        let mut layer = Self {
            radio,
            config,
            node_id,
            comms_state: CommsState::None,
            radio_state: RadioState::None,
            neighbor_node_ids: BTreeSet::new(),
            packets_to_send: VecDeque::new(),
            writing_pipe: None,
            discovery_messages_sent: 0,
            discovery_timer_us: 0,
            first_response_time_us: None,
            last_listen_time_us: 0,
            slot_anchor_us: 0,
            last_timing_packet_us: 0,
            stats: MeshStats::default(),
        };

        let discovery = PipeAddress::new(layer.config.discovery_address);
        let own = PipeAddress::node_pipe(layer.config.base_address, layer.node_id, 1);
        debug!(%discovery, %own, "opening boot reading pipes");
        layer.radio.open_reading_pipe(0, discovery);
        layer.radio.open_reading_pipe(1, own);
        layer.radio.flush_rx();
        layer.radio.flush_tx();
        layer.radio.start_listening();

        layer.set_comms_state(CommsState::Discovery);
        layer.set_radio_state(RadioState::Continuous);
        Ok(layer)
    }

    /// The current node id. Provisional until below [`MIN_DISCOVERY_ID`].
    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    /// Whether this node holds a final node id.
    pub fn is_assigned(&self) -> bool {
        self.node_id < MIN_DISCOVERY_ID
    }

    pub fn comms_state(&self) -> CommsState {
        self.comms_state
    }

    pub fn radio_state(&self) -> RadioState {
        self.radio_state
    }

    /// Known neighbor ids, ascending.
    pub fn neighbor_ids(&self) -> Vec<u8> {
        self.neighbor_node_ids.iter().copied().collect()
    }

    /// Start of the current slot in slotted operation.
    pub fn slot_anchor_us(&self) -> u64 {
        self.slot_anchor_us
    }

    /// Counters for this layer.
    pub fn mesh_stats(&self) -> MeshStats {
        self.snapshot()
    }

    /// Initiate slot synchronization with the first neighbor: enter the
    /// timing phase in a send slot and ask the peer for its listen phase.
    pub fn start_time_synch(&mut self, now_us: u64) {
        let Some(&peer) = self.neighbor_node_ids.iter().next() else {
            warn!("cannot start slot synchronization without neighbors");
            return;
        };
        self.set_comms_state(CommsState::Timing);
        self.set_radio_state(RadioState::Sending);
        self.slot_anchor_us = now_us;
        self.last_timing_packet_us = now_us;
        let request = Fragment::TimeSynch {
            source: self.node_id,
            time_left_us: self.config.send_receive_period_us,
        };
        let address = PipeAddress::node_pipe(self.config.base_address, peer, 1);
        self.enqueue(request, address);
    }

    fn set_comms_state(&mut self, state: CommsState) {
        if self.comms_state != state {
            debug!(from = ?self.comms_state, to = ?state, "comms state change");
            self.comms_state = state;
        }
    }

    fn set_radio_state(&mut self, state: RadioState) {
        if self.radio_state != state {
            trace!(from = ?self.radio_state, to = ?state, "radio state change");
            self.radio_state = state;
        }
    }

    fn enqueue(&mut self, fragment: Fragment, address: PipeAddress) {
        self.packets_to_send.push_back(PacketFrame {
            address,
            frame: fragment.encode(),
        });
    }

    /// Send discovery probes while unassigned and finish id acquisition once
    /// the response window closes.
    fn discovery_task(&mut self, now_us: u64) -> Result<(), LayerError> {
        if self.comms_state != CommsState::Discovery {
            return Ok(());
        }

        if now_us.saturating_sub(self.discovery_timer_us) >= self.config.discovery_rate_us {
            self.discovery_timer_us = now_us;

            if self.discovery_messages_sent >= self.config.max_discovery_messages
                && self.first_response_time_us.is_none()
            {
                info!("no neighbors responded, assuming isolated node");
                self.assign_node_id(0);
                return Ok(());
            }

            let probe = Fragment::Discovery {
                source: self.node_id,
            };
            let address = PipeAddress::new(self.config.discovery_address);
            self.enqueue(probe, address);
            self.discovery_messages_sent += 1;
            trace!(count = self.discovery_messages_sent, "discovery probe queued");
        }

        if let Some(first) = self.first_response_time_us {
            if now_us.saturating_sub(first) > self.config.discovery_response_window_us {
                debug!("discovery response window closed");
                let free = (0..MIN_DISCOVERY_ID).find(|id| !self.neighbor_node_ids.contains(id));
                match free {
                    Some(id) => {
                        self.first_response_time_us = None;
                        self.assign_node_id(id);
                    }
                    None => {
                        return Err(LayerError::new("mesh", "no node ids available to assign"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Claim a final node id: open the unicast pipes, announce, run.
    fn assign_node_id(&mut self, id: u8) {
        self.radio.stop_listening();
        self.node_id = id;
        info!(node_id = id, "node id assigned");

        let announcement = Fragment::NodeIdAnnouncement { source: id };
        self.enqueue(
            announcement,
            PipeAddress::new(self.config.discovery_address),
        );

        self.writing_pipe = None;
        for pipe in 1..=5u8 {
            let address = PipeAddress::node_pipe(self.config.base_address, id, pipe);
            self.radio.open_reading_pipe(pipe, address);
            debug!(pipe, %address, "opened reading pipe");
        }
        self.radio.start_listening();
        self.set_comms_state(CommsState::Running);
    }

    /// Alternate send/receive slots while synchronized; fall back to
    /// discovery when timing traffic dries up.
    fn timing_task(&mut self, now_us: u64) {
        if self.comms_state != CommsState::Timing {
            return;
        }

        if now_us.saturating_sub(self.last_timing_packet_us) > self.config.timing_fallback_us {
            warn!("no timing traffic, falling back to discovery");
            self.set_comms_state(CommsState::Discovery);
            self.set_radio_state(RadioState::Listening);
            self.discovery_messages_sent = 0;
            self.discovery_timer_us = now_us;
            self.first_response_time_us = None;
            return;
        }

        if matches!(self.radio_state, RadioState::Listening | RadioState::Sending) {
            let period = self.config.send_receive_period_us;
            while now_us.saturating_sub(self.slot_anchor_us) >= period {
                self.slot_anchor_us += period;
                let next = match self.radio_state {
                    RadioState::Listening => RadioState::Sending,
                    _ => RadioState::Listening,
                };
                self.set_radio_state(next);
            }
        }
    }

    /// Transmit a burst of up to [`TX_BURST`] frames for one destination.
    fn sender(&mut self, now_us: u64) {
        if self.packets_to_send.is_empty() {
            return;
        }
        let listen_gate =
            now_us.saturating_sub(self.last_listen_time_us) >= self.config.continuous_listen_us;
        let clear_to_send = match self.radio_state {
            RadioState::Sending => true,
            RadioState::Continuous => listen_gate,
            // Outside slotted operation, Listening is listen-mostly, not
            // listen-only; discovery recovery still has to reach the air.
            RadioState::Listening => self.comms_state != CommsState::Timing && listen_gate,
            RadioState::None => false,
        };
        if !clear_to_send {
            return;
        }

        // Only frames sharing the first frame's destination ride the burst;
        // mixed destinations would retarget the writing pipe mid-FIFO.
        let Some(first) = self.packets_to_send.pop_front() else {
            return;
        };
        let destination = first.address;
        let mut burst = Vec::with_capacity(TX_BURST);
        burst.push(first);
        while burst.len() < TX_BURST {
            match self.packets_to_send.front() {
                Some(next) if next.address == destination => {
                    if let Some(next) = self.packets_to_send.pop_front() {
                        burst.push(next);
                    }
                }
                _ => break,
            }
        }

        self.radio.stop_listening();
        if self.writing_pipe != Some(destination) {
            self.writing_pipe = Some(destination);
            self.radio.open_writing_pipe(destination);
            debug!(address = %destination, "writing pipe retargeted");
        }

        self.radio.flush_tx();
        for packet in &mut burst {
            self.stamp_slot_time(&mut packet.frame, now_us);
            match self.radio.write_fast(&packet.frame) {
                Ok(()) => self.stats.frames_sent += 1,
                Err(err) => warn!(%err, "frame not queued"),
            }
        }
        if let Err(err) = self.radio.tx_standby(self.config.tx_standby_timeout_us) {
            warn!(%err, "transmit burst abandoned");
            self.stats.tx_timeouts += 1;
        }

        self.radio.start_listening();
        self.last_listen_time_us = now_us;
    }

    /// Timing frames queued earlier carry a stale slot measurement by the
    /// time their burst goes out; rewrite the field against the transmit
    /// instant so the peer anchors on fresh data.
    fn stamp_slot_time(&self, frame: &mut [u8; FRAME_SIZE], now_us: u64) {
        use byteorder::{ByteOrder, LittleEndian};
        match PacketType::of_frame(&frame[..]) {
            Some(PacketType::TimeSynch) | Some(PacketType::TimeSynchAck) => {
                let remaining = if self.radio_state == RadioState::Listening {
                    self.config
                        .send_receive_period_us
                        .saturating_sub(now_us.saturating_sub(self.slot_anchor_us))
                } else {
                    0
                };
                LittleEndian::write_u64(&mut frame[2..10], remaining);
                crate::packet::insert_checksum(frame);
            }
            _ => {}
        }
    }

    /// Poll the radio for one frame and dispatch it.
    fn receiver(&mut self, now_us: u64, io: &mut LayerIo) {
        if self.radio.available().is_none() {
            return;
        }
        let mut frame = [0u8; FRAME_SIZE];
        self.radio.read(&mut frame);
        self.stats.frames_received += 1;

        if !validate_checksum(&frame) {
            error!("received frame with invalid checksum");
            self.stats.checksum_failures += 1;
            self.radio.flush_rx();
            return;
        }

        match Fragment::decode(&frame) {
            Ok(Fragment::Data(_)) | Ok(Fragment::DataAck(_)) => {
                io.send_upstream(frame.to_vec());
            }
            Ok(Fragment::Discovery { source }) => self.handle_discovery(source, now_us),
            Ok(Fragment::DiscoverResponse { source, neighbors }) => {
                self.handle_discover_response(source, &neighbors, now_us)
            }
            Ok(Fragment::NodeIdAnnouncement { source }) => self.handle_announcement(source),
            Ok(Fragment::TimeSynch { source, .. }) => self.handle_time_synch(source, now_us),
            Ok(Fragment::TimeSynchAck { time_left_us, .. }) => {
                self.handle_time_synch_ack(time_left_us, now_us)
            }
            Ok(Fragment::Status) => trace!("status frame ignored"),
            Err(err) => {
                error!(%err, "undecodable frame");
                self.radio.flush_rx();
            }
        }
    }

    fn handle_discovery(&mut self, source: u8, now_us: u64) {
        debug!(source, "discovery probe received");

        if self.comms_state == CommsState::Discovery {
            if source == self.node_id {
                trace!("own discovery echoed back, ignoring");
                return;
            }
            if source < self.node_id {
                // The lower provisional id wins the boot race; restart our
                // own count and yield the medium for a round.
                info!(source, "yielding discovery to lower node id");
                self.discovery_messages_sent = 0;
                self.discovery_timer_us = now_us;
            }
            return;
        }

        // Assigned nodes answer with everything they know.
        if self.neighbor_node_ids.len() > MAX_NEIGHBORS_PER_RESPONSE {
            warn!(
                count = self.neighbor_node_ids.len(),
                "neighbor set exceeds one response frame, truncating"
            );
        }
        let neighbors: Vec<u8> = self
            .neighbor_node_ids
            .iter()
            .copied()
            .take(MAX_NEIGHBORS_PER_RESPONSE)
            .collect();
        let response = Fragment::DiscoverResponse {
            source: self.node_id,
            neighbors,
        };
        let address = PipeAddress::node_pipe(self.config.base_address, source, 1);
        debug!(source, %address, "answering discovery");
        self.enqueue(response, address);
    }

    fn handle_discover_response(&mut self, source: u8, reported: &[u8], now_us: u64) {
        info!(source, count = reported.len(), "discover response received");
        if self.comms_state == CommsState::Discovery && self.first_response_time_us.is_none() {
            self.first_response_time_us = Some(now_us);
        }
        self.neighbor_node_ids.insert(source);
        self.neighbor_node_ids.extend(reported.iter().copied());
    }

    fn handle_announcement(&mut self, source: u8) {
        if source == self.node_id {
            trace!("own announcement echoed back, ignoring");
            return;
        }
        info!(source, "neighbor announced itself");
        self.neighbor_node_ids.insert(source);
    }

    /// A peer is aligning slots against us: adopt the timing phase if we are
    /// not in it yet and report how much listen time our current slot has
    /// left.
    fn handle_time_synch(&mut self, source: u8, now_us: u64) {
        self.last_timing_packet_us = now_us;
        if self.comms_state != CommsState::Timing {
            self.set_comms_state(CommsState::Timing);
            self.set_radio_state(RadioState::Listening);
            self.slot_anchor_us = now_us;
        }
        let period = self.config.send_receive_period_us;
        let remaining = period.saturating_sub(now_us.saturating_sub(self.slot_anchor_us));

        let reply = Fragment::TimeSynchAck {
            source: self.node_id,
            time_left_us: remaining,
        };
        let address = PipeAddress::node_pipe(self.config.base_address, source, 1);
        debug!(source, remaining, "answering time synch");
        self.enqueue(reply, address);
    }

    /// The peer reported its remaining listen time: anchor our send slot so
    /// it ends when the peer stops listening.
    fn handle_time_synch_ack(&mut self, time_left_us: u64, now_us: u64) {
        self.last_timing_packet_us = now_us;
        self.set_comms_state(CommsState::Timing);
        self.set_radio_state(RadioState::Sending);
        let period = self.config.send_receive_period_us;
        let remaining = time_left_us.min(period);
        self.slot_anchor_us = (now_us + remaining).saturating_sub(period);
        debug!(remaining, "slots aligned to peer");
    }

    fn snapshot(&self) -> MeshStats {
        let mut stats = self.stats.clone();
        stats.node_id = self.node_id;
        stats.node_id_assigned = self.is_assigned();
        stats.neighbors = self.neighbor_node_ids.len();
        stats
    }
}

impl<R: RadioDevice> Layer for MeshRadioLayer<R> {
    fn name(&self) -> &'static str {
        "mesh"
    }

    /// Address a ready-made Data/DataAck frame to the first neighbor and
    /// queue it for the next transmit opportunity.
    fn receive_from_upstream(&mut self, payload: Vec<u8>, _io: &mut LayerIo) -> Result<(), LayerError> {
        if payload.len() != FRAME_SIZE {
            error!(bytes = payload.len(), "expected a 32-byte frame, dropping");
            self.stats.send_drops += 1;
            return Ok(());
        }
        match PacketType::of_frame(&payload) {
            Some(PacketType::Data) | Some(PacketType::DataAck) => {}
            other => {
                error!(packet_type = ?other, "only data frames cross this boundary, dropping");
                self.stats.send_drops += 1;
                return Ok(());
            }
        }

        let Some(&peer) = self.neighbor_node_ids.iter().next() else {
            error!("no neighbors known, dropping outbound fragment");
            self.stats.send_drops += 1;
            return Ok(());
        };

        let mut frame = [0u8; FRAME_SIZE];
        frame.copy_from_slice(&payload);
        crate::packet::insert_checksum(&mut frame);

        let address = PipeAddress::node_pipe(self.config.base_address, peer, 1);
        self.packets_to_send.push_back(PacketFrame { address, frame });
        Ok(())
    }

    /// Bottom of the stack: nothing is ever below.
    fn receive_from_downstream(&mut self, _payload: Vec<u8>, _io: &mut LayerIo) -> Result<(), LayerError> {
        error!("mesh radio is the bottom layer");
        Ok(())
    }

    fn tick(&mut self, now_us: u64, io: &mut LayerIo) -> Result<(), LayerError> {
        self.discovery_task(now_us)?;
        if self.config.slotted
            && self.comms_state == CommsState::Running
            && !self.neighbor_node_ids.is_empty()
        {
            self.start_time_synch(now_us);
        }
        self.timing_task(now_us);
        self.sender(now_us);
        self.receiver(now_us, io);
        Ok(())
    }

    /// Drop all session state and restart discovery with a fresh provisional
    /// id.
    fn reset(&mut self) {
        info!("mesh radio reset");
        self.packets_to_send.clear();
        self.neighbor_node_ids.clear();
        self.discovery_messages_sent = 0;
        self.discovery_timer_us = 0;
        self.first_response_time_us = None;
        self.writing_pipe = None;
        self.radio.flush_rx();
        self.radio.flush_tx();

        self.node_id = self
            .config
            .node_id
            .unwrap_or_else(|| rand::thread_rng().gen_range(MIN_DISCOVERY_ID..=u8::MAX));
        let own = PipeAddress::node_pipe(self.config.base_address, self.node_id, 1);
        self.radio.open_reading_pipe(1, own);
        self.radio.start_listening();

        self.set_comms_state(CommsState::Discovery);
        self.set_radio_state(RadioState::Continuous);
    }

    fn stats(&self) -> StatsSnapshot {
        StatsSnapshot::Mesh(self.snapshot())
    }
}
