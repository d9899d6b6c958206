//! End-to-end tests: two full pipelines exchanging IP frames over the
//! simulated air, exercising discovery, fragmentation, reliable delivery,
//! loss recovery, and checksum rejection together.

use nrfmesh_core::{
    AckConfig, AckLayer, FragmentationLayer, MeshRadioConfig, MeshRadioLayer, Pipeline, SimMedium,
    StatsSnapshot, TunnelLayer,
};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;

/// One tunnel endpoint: the pipeline plus the "kernel" side of its TUN
/// stand-in.
struct Node {
    // `host` must drop before `pipeline`: TunnelLayer::drop() joins its
    // reader thread, which only unblocks once the peer (`host`) is closed
    // or sends data. Field drop order is declaration order, so `host` is
    // listed first.
    host: UnixStream,
    pipeline: Pipeline,
}

impl Node {
    fn new(medium: &SimMedium, provisional_id: u8) -> Self {
        let (device, host) = UnixStream::pair().expect("socket pair");
        host.set_nonblocking(true).expect("nonblocking host");

        let mut tunnel = TunnelLayer::new(device);
        tunnel.start().expect("reader thread");

        let mesh_config = MeshRadioConfig {
            node_id: Some(provisional_id),
            ..MeshRadioConfig::default()
        };
        let mesh = MeshRadioLayer::new(medium.attach(), mesh_config).expect("mesh layer");

        let pipeline = Pipeline::new(vec![
            Box::new(tunnel),
            Box::new(FragmentationLayer::new()),
            Box::new(AckLayer::new(AckConfig::default())),
            Box::new(mesh),
        ]);
        Self { host, pipeline }
    }

    fn tick(&mut self, now_us: u64) {
        self.pipeline.tick(now_us).expect("pipeline tick");
    }

    /// Inject an IP frame as if the kernel routed it into the TUN device.
    fn inject(&mut self, frame: &[u8]) {
        self.host.write_all(frame).expect("inject frame");
    }

    /// Bytes the pipeline has delivered back out of its TUN device.
    fn drain_delivered(&mut self, sink: &mut Vec<u8>) {
        let mut buf = [0u8; 4096];
        loop {
            match self.host.read(&mut buf) {
                Ok(0) => break,
                Ok(len) => sink.extend_from_slice(&buf[..len]),
                Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => panic!("host read failed: {}", err),
            }
        }
    }

    fn node_id_assigned(&self) -> bool {
        match self.pipeline.stats().last() {
            Some(StatsSnapshot::Mesh(stats)) => stats.node_id_assigned,
            _ => false,
        }
    }

    fn mesh_checksum_failures(&self) -> u64 {
        match self.pipeline.stats().last() {
            Some(StatsSnapshot::Mesh(stats)) => stats.checksum_failures,
            _ => 0,
        }
    }

    fn ack_retransmits(&self) -> u64 {
        match self.pipeline.stats().get(2) {
            Some(StatsSnapshot::Ack(stats)) => stats.retransmits,
            _ => 0,
        }
    }
}

/// Tick both nodes until discovery settles on final node ids.
fn converge(a: &mut Node, b: &mut Node) -> u64 {
    let mut now = 0u64;
    while !(a.node_id_assigned() && b.node_id_assigned()) {
        a.tick(now);
        b.tick(now);
        now += 1_000;
        assert!(now < 10_000_000, "discovery did not converge");
    }
    // A settling margin so announcements and late responses drain.
    for _ in 0..50 {
        a.tick(now);
        b.tick(now);
        now += 1_000;
    }
    now
}

/// Drive both nodes until `expected` bytes arrived at B, or the time budget
/// runs out.
fn pump_until_delivered(
    a: &mut Node,
    b: &mut Node,
    mut now: u64,
    expected: usize,
    budget_us: u64,
) -> (Vec<u8>, u64) {
    let mut received = Vec::new();
    let deadline = now + budget_us;
    while received.len() < expected && now < deadline {
        a.tick(now);
        b.tick(now);
        b.drain_delivered(&mut received);
        now += 1_000;
    }
    (received, now)
}

fn patterned_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

#[test]
fn test_discovery_assigns_both_ids() {
    let medium = SimMedium::new(101);
    let mut a = Node::new(&medium, 150);
    let mut b = Node::new(&medium, 200);
    converge(&mut a, &mut b);
    assert!(a.node_id_assigned());
    assert!(b.node_id_assigned());
}

#[test]
fn test_payload_crosses_the_air_intact() {
    let medium = SimMedium::new(7);
    let mut a = Node::new(&medium, 150);
    let mut b = Node::new(&medium, 200);
    let now = converge(&mut a, &mut b);

    let payload = patterned_payload(1500);
    a.inject(&payload);

    let (received, _) = pump_until_delivered(&mut a, &mut b, now, payload.len(), 60_000_000);
    assert_eq!(received, payload, "payload corrupted in transit");
}

#[test]
fn test_lossy_link_still_delivers() {
    let medium = SimMedium::new(404);
    let mut a = Node::new(&medium, 150);
    let mut b = Node::new(&medium, 200);
    let now = converge(&mut a, &mut b);

    medium.set_loss(0.3);
    let payload = patterned_payload(1500);
    a.inject(&payload);

    let (received, _) = pump_until_delivered(&mut a, &mut b, now, payload.len(), 120_000_000);
    medium.set_loss(0.0);

    assert_eq!(received, payload, "payload corrupted on the lossy link");
    let air = medium.stats();
    assert!(air.frames_lost > 0, "loss model never fired");
    assert!(
        a.ack_retransmits() > 0,
        "losses were recovered without retransmission?"
    );
}

#[test]
fn test_corrupted_frame_is_discarded_and_resent() {
    let medium = SimMedium::new(55);
    let mut a = Node::new(&medium, 150);
    let mut b = Node::new(&medium, 200);
    let now = converge(&mut a, &mut b);

    // The next frame on the air is the single data fragment; flip a bit in
    // it before the receiver sees it.
    medium.corrupt_next_frame();
    let payload = b"short payload".to_vec();
    a.inject(&payload);

    let (received, _) = pump_until_delivered(&mut a, &mut b, now, payload.len(), 10_000_000);

    assert_eq!(received, payload);
    assert!(
        b.mesh_checksum_failures() >= 1,
        "corrupted frame was not rejected"
    );
    assert!(a.ack_retransmits() >= 1, "sender never retransmitted");
}

#[test]
fn test_bidirectional_traffic() {
    let medium = SimMedium::new(77);
    let mut a = Node::new(&medium, 150);
    let mut b = Node::new(&medium, 200);
    let mut now = converge(&mut a, &mut b);

    let from_a = patterned_payload(600);
    let mut from_b = patterned_payload(900);
    from_b.reverse();
    a.inject(&from_a);
    b.inject(&from_b);

    let mut at_a = Vec::new();
    let mut at_b = Vec::new();
    let deadline = now + 60_000_000;
    while (at_a.len() < from_b.len() || at_b.len() < from_a.len()) && now < deadline {
        a.tick(now);
        b.tick(now);
        a.drain_delivered(&mut at_a);
        b.drain_delivered(&mut at_b);
        now += 1_000;
    }

    assert_eq!(at_b, from_a);
    assert_eq!(at_a, from_b);
}

#[test]
fn test_many_small_frames_in_order() {
    let medium = SimMedium::new(31);
    let mut a = Node::new(&medium, 150);
    let mut b = Node::new(&medium, 200);
    let mut now = converge(&mut a, &mut b);

    // Ten distinguishable frames injected back to back; the single-fragment
    // window must keep them ordered end to end.
    let mut expected = Vec::new();
    for index in 0..10u8 {
        let frame = vec![index; 40];
        a.inject(&frame);
        expected.extend_from_slice(&frame);
    }

    let mut received = Vec::new();
    let deadline = now + 120_000_000;
    while received.len() < expected.len() && now < deadline {
        a.tick(now);
        b.tick(now);
        b.drain_delivered(&mut received);
        now += 1_000;
    }
    assert_eq!(received, expected);
}
