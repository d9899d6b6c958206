//! nrfmesh command-line interface
//!
//! Two entry points:
//!
//! - `nrfmesh run` starts a tunnel endpoint: it creates and configures the
//!   TUN interface, brings up the layer stack on the configured radio
//!   backend, and drives the supervisory loop until SIGINT/SIGTERM.
//! - `nrfmesh sim` runs an in-process multi-node simulation over the
//!   in-memory medium, exercising the full stack (discovery, fragmentation,
//!   reliable delivery) without hardware or root.

mod tun;
mod udp_radio;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use nrfmesh_core::{
    AckLayer, Config, FragmentationLayer, Layer, MeshRadioConfig, MeshRadioLayer, MonotonicClock,
    Pipeline, RadioBackend, RadioMode, SimMedium, StackSnapshot, StatsSnapshot, TunnelLayer,
};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "nrfmesh")]
#[command(author, version, about = "IP tunneling over NRF24L01 mesh radios", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a tunnel endpoint
    Run {
        /// Configuration file
        #[arg(short, long, default_value = "/etc/nrfmesh/nrfmesh.conf")]
        config: PathBuf,
    },

    /// Run an in-process multi-node simulation
    Sim {
        /// Number of nodes on the simulated medium
        #[arg(long, default_value_t = 2)]
        nodes: usize,

        /// Uniform frame loss probability (0.0 - 1.0)
        #[arg(long, default_value_t = 0.0)]
        loss: f64,

        /// IP frames to push through the tunnel
        #[arg(long, default_value_t = 20)]
        payloads: usize,

        /// Size of each frame in bytes
        #[arg(long, default_value_t = 400)]
        payload_size: usize,

        /// Simulated-time budget in seconds
        #[arg(long, default_value_t = 120)]
        budget_s: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.command {
        Commands::Run { config } => run(&config),
        Commands::Sim {
            nodes,
            loss,
            payloads,
            payload_size,
            budget_s,
        } => simulate(nodes, loss, payloads, payload_size, budget_s),
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();
}

fn run(config_path: &Path) -> Result<()> {
    let config = Config::from_file(config_path).context("loading configuration")?;
    config.log_summary();

    if config.mode != RadioMode::Mesh {
        bail!(
            "mode {:?} is not implemented in this build; only mesh mode is supported",
            config.mode
        );
    }
    if config.max_in_flight > 1 {
        warn!(
            window = config.max_in_flight,
            "max_in_flight above 1 voids in-order reassembly"
        );
    }

    let device = tun::open_tun(&config.interface_name)?;
    tun::configure_interface(
        &config.interface_name,
        config.tunnel_ip_address,
        config.tunnel_netmask,
    )?;
    info!(
        interface = %config.interface_name,
        ip = %config.tunnel_ip_address,
        "tunnel interface configured"
    );

    let mut tunnel = TunnelLayer::new(device);
    tunnel.set_frame_logs(config.enable_tunnel_logs);
    tunnel.start().context("starting tunnel reader")?;

    let mesh: Box<dyn Layer> = match config.radio_backend {
        RadioBackend::Sim => {
            warn!("sim backend carries no traffic off-process; use it for bring-up only");
            let medium = SimMedium::new(1);
            Box::new(MeshRadioLayer::new(medium.attach(), config.mesh_config())?)
        }
        RadioBackend::Udp => {
            let bind = config
                .udp_bind
                .context("the udp backend requires the udp_bind key")?;
            if config.udp_peers.is_empty() {
                bail!("the udp backend requires at least one entry in udp_peers");
            }
            let radio = udp_radio::UdpRadio::new(bind, config.udp_peers.clone())
                .context("binding udp radio")?;
            Box::new(MeshRadioLayer::new(radio, config.mesh_config())?)
        }
        RadioBackend::Hardware => {
            bail!(
                "no SPI driver is built into this binary; implement \
                 nrfmesh_core::radio::RadioDevice for your board and wire it in here"
            );
        }
    };

    let mut pipeline = Pipeline::new(vec![
        Box::new(tunnel),
        Box::new(FragmentationLayer::new()),
        Box::new(AckLayer::new(config.ack_config())),
        mesh,
    ]);

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            running.store(false, Ordering::Relaxed);
        })
        .context("installing signal handler")?;
    }

    let clock = MonotonicClock::new();
    let stats_interval_us = config.stats_interval_s.saturating_mul(1_000_000);
    let mut next_stats_us = stats_interval_us;

    info!("tunnel endpoint running");
    while running.load(Ordering::Relaxed) {
        let now = clock.now_us();
        pipeline.tick(now)?;

        if stats_interval_us > 0 && now >= next_stats_us {
            next_stats_us = now + stats_interval_us;
            info!("statistics:\n{}", StackSnapshot(pipeline.stats()));
        }
        if config.poll_interval_us > 0 {
            std::thread::sleep(Duration::from_micros(config.poll_interval_us));
        }
    }

    info!("shutting down");
    Ok(())
}

/// One simulated tunnel endpoint: its pipeline and the application side of
/// its TUN stand-in.
struct SimNode {
    pipeline: Pipeline,
    host: UnixStream,
}

impl SimNode {
    fn new(medium: &SimMedium) -> Result<Self> {
        let (device, host) = UnixStream::pair().context("socket pair")?;
        host.set_nonblocking(true)?;

        let mut tunnel = TunnelLayer::new(device);
        tunnel.start().context("starting tunnel reader")?;
        let mesh = MeshRadioLayer::new(medium.attach(), MeshRadioConfig::default())?;

        Ok(Self {
            pipeline: Pipeline::new(vec![
                Box::new(tunnel),
                Box::new(FragmentationLayer::new()),
                Box::new(AckLayer::with_defaults()),
                Box::new(mesh),
            ]),
            host,
        })
    }

    fn assigned(&self) -> bool {
        matches!(
            self.pipeline.stats().last(),
            Some(StatsSnapshot::Mesh(stats)) if stats.node_id_assigned
        )
    }

    /// Write a frame into the TUN side, waiting out socket backpressure.
    fn inject(&mut self, frame: &[u8]) -> Result<()> {
        let mut offset = 0;
        while offset < frame.len() {
            match self.host.write(&frame[offset..]) {
                Ok(written) => offset += written,
                Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(err) => return Err(err).context("injecting frame"),
            }
        }
        Ok(())
    }

    fn drain_delivered(&mut self, sink: &mut Vec<u8>) {
        let mut buf = [0u8; 4096];
        loop {
            match self.host.read(&mut buf) {
                Ok(0) => break,
                Ok(len) => sink.extend_from_slice(&buf[..len]),
                Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
    }
}

fn simulate(
    nodes: usize,
    loss: f64,
    payloads: usize,
    payload_size: usize,
    budget_s: u64,
) -> Result<()> {
    if nodes < 2 {
        bail!("the simulation needs at least two nodes");
    }

    let medium = SimMedium::new(0x6E72_666D);
    medium.set_loss(loss);
    let mut fleet = Vec::with_capacity(nodes);
    for _ in 0..nodes {
        fleet.push(SimNode::new(&medium)?);
    }

    let budget_us = budget_s.saturating_mul(1_000_000);
    let mut now = 0u64;

    while fleet.iter().any(|node| !node.assigned()) {
        for node in &mut fleet {
            node.pipeline.tick(now)?;
        }
        now += 1_000;
        if now > budget_us {
            bail!("discovery did not converge within {}s of simulated time", budget_s);
        }
    }
    println!(
        "discovery settled after {:.1}s of simulated time",
        now as f64 / 1e6
    );

    let expected_total = payloads * payload_size;
    for index in 0..payloads {
        let frame: Vec<u8> = (0..payload_size)
            .map(|byte| ((byte + index) % 256) as u8)
            .collect();
        fleet[0].inject(&frame)?;
    }

    let mut delivered = Vec::new();
    while delivered.len() < expected_total && now < budget_us {
        for node in &mut fleet {
            node.pipeline.tick(now)?;
        }
        for node in fleet.iter_mut().skip(1) {
            node.drain_delivered(&mut delivered);
        }
        now += 1_000;
    }

    println!(
        "delivered {}/{} bytes in {:.1}s of simulated time",
        delivered.len(),
        expected_total,
        now as f64 / 1e6
    );
    let air = medium.stats();
    println!(
        "air: sent={} delivered={} lost={} corrupted={}",
        air.frames_sent, air.frames_delivered, air.frames_lost, air.frames_corrupted
    );
    for (index, node) in fleet.iter().enumerate() {
        println!("node {}:", index);
        println!("{}", StackSnapshot(node.pipeline.stats()));
    }

    if delivered.len() < expected_total {
        bail!("simulation ran out of time before full delivery");
    }
    Ok(())
}
