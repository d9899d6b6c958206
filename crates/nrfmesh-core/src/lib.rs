//! # nrfmesh Core Protocol Stack
//!
//! This crate implements an IP tunnel over NRF24L01-class radios: cheap
//! half-duplex transceivers that exchange fixed 32-byte frames and have no
//! IP awareness of their own. A virtual network interface (TUN) on each host
//! feeds a pipeline that fragments IP frames, delivers the fragments
//! reliably, and schedules the shared medium, so ordinary traffic (ping,
//! SSH, TCP streams) flows between hosts through the radios.
//!
//! ## Layer stack
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ TunnelLayer        whole IP frames ↔ TUN file descriptor      │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FragmentationLayer payloads ↔ 32-byte fragments               │
//! ├───────────────────────────────────────────────────────────────┤
//! │ AckLayer           reliable, windowed fragment delivery       │
//! ├───────────────────────────────────────────────────────────────┤
//! │ MeshRadioLayer     discovery, addressing, slot scheduling     │
//! ├───────────────────────────────────────────────────────────────┤
//! │ RadioDevice        NRF24L01 capability set (trait)            │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! A single supervisory loop ticks the layers with timestamps from one
//! monotonic clock; the only other thread is the TUN reader inside
//! [`tunnel::TunnelLayer`]. The radio is owned exclusively by
//! [`mesh::MeshRadioLayer`] behind the [`radio::RadioDevice`] trait, so the
//! whole stack runs headless against the in-memory medium in [`sim`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use nrfmesh_core::{
//!     AckLayer, FragmentationLayer, MeshRadioConfig, MeshRadioLayer, MonotonicClock, Pipeline,
//!     SimMedium, TunnelLayer,
//! };
//! use std::os::unix::net::UnixStream;
//!
//! let medium = SimMedium::new(1);
//! let (device, _host) = UnixStream::pair().unwrap();
//!
//! let mut tunnel = TunnelLayer::new(device);
//! tunnel.start().unwrap();
//! let mesh = MeshRadioLayer::new(medium.attach(), MeshRadioConfig::default()).unwrap();
//!
//! let mut pipeline = Pipeline::new(vec![
//!     Box::new(tunnel),
//!     Box::new(FragmentationLayer::new()),
//!     Box::new(AckLayer::with_defaults()),
//!     Box::new(mesh),
//! ]);
//!
//! let clock = MonotonicClock::new();
//! loop {
//!     pipeline.tick(clock.now_us()).unwrap();
//! }
//! ```

pub mod ack;
pub mod clock;
pub mod config;
pub mod fragment;
pub mod layer;
pub mod mesh;
pub mod packet;
pub mod radio;
pub mod sim;
pub mod stats;
pub mod tunnel;

pub use ack::{AckConfig, AckLayer};
pub use clock::MonotonicClock;
pub use config::{Config, ConfigError, RadioBackend, RadioMode};
pub use fragment::FragmentationLayer;
pub use layer::{Layer, LayerError, LayerIo, Pipeline};
pub use mesh::{
    CommsState, MeshRadioConfig, MeshRadioLayer, MeshSetupError, RadioState, MIN_DISCOVERY_ID,
};
pub use packet::{
    DataFragment, Fragment, PacketType, PipeAddress, WireError, BASE_ADDRESS,
    DISCOVERY_ADDRESS_OFFSET, FRAGMENT_PAYLOAD_SIZE, FRAME_SIZE,
};
pub use radio::{DataRate, PowerLevel, RadioDevice, RadioError};
pub use sim::{SimMedium, SimRadio, SimStats};
pub use stats::{AckStats, FragmentationStats, MeshStats, StackSnapshot, StatsSnapshot, TunnelStats};
pub use tunnel::{TunDevice, TunnelLayer};
