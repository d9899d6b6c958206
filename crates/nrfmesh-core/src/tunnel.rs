//! TUN device bridge
//!
//! Top of the stack. A background reader thread blocks on the TUN file
//! descriptor and pushes whole IP frames into a bounded, mutex-guarded queue;
//! the supervisory loop drains that queue one frame per tick into the
//! pipeline and writes one reassembled frame per tick back to the device.
//! When the queue is full the reader backs off briefly instead of dropping;
//! frames are never silently lost at the TUN boundary.
//!
//! The layer is generic over [`TunDevice`] so tests can stand in a socket
//! pair for the kernel device.

use crate::layer::{Layer, LayerError, LayerIo};
use crate::stats::{StatsSnapshot, TunnelStats};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, trace};

/// Largest read issued against the device; a full IP frame always fits.
pub const MAX_FRAME_SIZE: usize = 3200;

/// Frames buffered between the reader thread and the supervisory loop.
pub const MAX_BUFFERED_FRAMES: usize = 1024;

/// Reader back-off while the buffer is full.
pub const READER_BACKOFF_US: u64 = 1_000;

/// A readable/writable file-like endpoint that delivers whole frames.
///
/// Implemented for [`std::fs::File`] (the real TUN fd) and [`UnixStream`]
/// (tests and in-process simulation).
pub trait TunDevice: Send + 'static {
    fn read_frame(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
    fn write_frame(&mut self, buf: &[u8]) -> std::io::Result<()>;
    fn try_clone_device(&self) -> std::io::Result<Self>
    where
        Self: Sized;
}

impl TunDevice for std::fs::File {
    fn read_frame(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.read(buf)
    }

    fn write_frame(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.write_all(buf)
    }

    fn try_clone_device(&self) -> std::io::Result<Self> {
        self.try_clone()
    }
}

impl TunDevice for UnixStream {
    fn read_frame(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.read(buf)
    }

    fn write_frame(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.write_all(buf)
    }

    fn try_clone_device(&self) -> std::io::Result<Self> {
        self.try_clone()
    }
}

/// State shared with the reader thread.
struct TunnelShared {
    running: AtomicBool,
    /// Frames read from the device, waiting for the pipeline
    downstream_buffer: Mutex<VecDeque<Vec<u8>>>,
    frames_read: AtomicU64,
    read_errors: AtomicU64,
    backpressure_waits: AtomicU64,
}

/// Bridges the TUN fd and the pipeline.
pub struct TunnelLayer<T: TunDevice> {
    device: T,
    shared: Arc<TunnelShared>,
    reader: Option<JoinHandle<()>>,
    /// Reassembled frames waiting to be written to the device
    upstream_buffer: VecDeque<Vec<u8>>,
    /// Log every frame crossing the device at info level
    log_frames: bool,
    frames_written: u64,
    write_errors: u64,
}

impl<T: TunDevice> TunnelLayer<T> {
    pub fn new(device: T) -> Self {
        Self {
            device,
            shared: Arc::new(TunnelShared {
                running: AtomicBool::new(true),
                downstream_buffer: Mutex::new(VecDeque::new()),
                frames_read: AtomicU64::new(0),
                read_errors: AtomicU64::new(0),
                backpressure_waits: AtomicU64::new(0),
            }),
            reader: None,
            upstream_buffer: VecDeque::new(),
            log_frames: false,
            frames_written: 0,
            write_errors: 0,
        }
    }

    /// Log every frame crossing the TUN boundary at info level instead of
    /// trace.
    pub fn set_frame_logs(&mut self, enabled: bool) {
        self.log_frames = enabled;
    }

    /// Spawn the reader thread. Idempotent.
    pub fn start(&mut self) -> std::io::Result<()> {
        if self.reader.is_some() {
            return Ok(());
        }
        let device = self.device.try_clone_device()?;
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("tun-reader".into())
            .spawn(move || reader_main(device, shared))?;
        self.reader = Some(handle);
        debug!("tunnel reader started");
        Ok(())
    }

    /// Signal the reader thread to stop and wait for it.
    ///
    /// The reader notices the flag after its current blocking read returns,
    /// so on a silent interface the join waits for the next inbound frame or
    /// for the device to be closed.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                error!("tunnel reader panicked");
            }
        }
    }

    fn snapshot(&self) -> TunnelStats {
        TunnelStats {
            frames_read: self.shared.frames_read.load(Ordering::Relaxed),
            frames_written: self.frames_written,
            read_errors: self.shared.read_errors.load(Ordering::Relaxed),
            write_errors: self.write_errors,
            backpressure_waits: self.shared.backpressure_waits.load(Ordering::Relaxed),
        }
    }

    fn lock_downstream(&self) -> std::sync::MutexGuard<'_, VecDeque<Vec<u8>>> {
        self.shared
            .downstream_buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn reader_main<T: TunDevice>(mut device: T, shared: Arc<TunnelShared>) {
    let mut buf = [0u8; MAX_FRAME_SIZE];
    while shared.running.load(Ordering::Relaxed) {
        match device.read_frame(&mut buf) {
            Err(err) => {
                error!(%err, "tunnel read failed");
                shared.read_errors.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            Ok(0) => {
                debug!("tunnel device closed");
                break;
            }
            Ok(len) => {
                shared.frames_read.fetch_add(1, Ordering::Relaxed);
                trace!(bytes = len, "frame read from tunnel");
                let frame = buf[..len].to_vec();
                loop {
                    {
                        let mut queue = shared
                            .downstream_buffer
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                        if queue.len() < MAX_BUFFERED_FRAMES {
                            queue.push_back(frame);
                            break;
                        }
                    }
                    if !shared.running.load(Ordering::Relaxed) {
                        return;
                    }
                    shared.backpressure_waits.fetch_add(1, Ordering::Relaxed);
                    std::thread::sleep(Duration::from_micros(READER_BACKOFF_US));
                }
            }
        }
    }
}

impl<T: TunDevice> Layer for TunnelLayer<T> {
    fn name(&self) -> &'static str {
        "tunnel"
    }

    /// Top of the stack: nothing is ever above.
    fn receive_from_upstream(&mut self, _payload: Vec<u8>, _io: &mut LayerIo) -> Result<(), LayerError> {
        error!("tunnel is the top layer");
        Ok(())
    }

    /// A reassembled IP frame from the radio side; queue it for the device.
    fn receive_from_downstream(&mut self, payload: Vec<u8>, _io: &mut LayerIo) -> Result<(), LayerError> {
        self.upstream_buffer.push_back(payload);
        Ok(())
    }

    /// Pump one frame in each direction.
    fn tick(&mut self, _now_us: u64, io: &mut LayerIo) -> Result<(), LayerError> {
        let inbound = self.lock_downstream().pop_front();
        if let Some(frame) = inbound {
            if self.log_frames {
                info!(bytes = frame.len(), "frame entering pipeline");
            } else {
                trace!(bytes = frame.len(), "frame entering pipeline");
            }
            io.send_downstream(frame);
        }

        if let Some(frame) = self.upstream_buffer.pop_front() {
            match self.device.write_frame(&frame) {
                Ok(()) => {
                    self.frames_written += 1;
                    if self.log_frames {
                        info!(bytes = frame.len(), "frame written to tunnel");
                    } else {
                        trace!(bytes = frame.len(), "frame written to tunnel");
                    }
                }
                Err(err) => {
                    error!(%err, "tunnel write failed");
                    self.write_errors += 1;
                }
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.lock_downstream().clear();
        self.upstream_buffer.clear();
    }

    fn stats(&self) -> StatsSnapshot {
        StatsSnapshot::Tunnel(self.snapshot())
    }
}

impl<T: TunDevice> Drop for TunnelLayer<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn wait_for<F: FnMut() -> bool>(mut condition: F) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for condition");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_reader_feeds_pipeline() {
        let (device, mut host) = UnixStream::pair().unwrap();
        let mut layer = TunnelLayer::new(device);
        layer.start().unwrap();

        host.write_all(b"ip frame bytes").unwrap();
        wait_for(|| !layer.lock_downstream().is_empty());

        let mut io = LayerIo::new();
        layer.tick(0, &mut io).unwrap();
        assert_eq!(io.pop_downstream().unwrap(), b"ip frame bytes");

        drop(host);
    }

    #[test]
    fn test_one_frame_per_tick() {
        let (device, mut host) = UnixStream::pair().unwrap();
        let mut layer = TunnelLayer::new(device);
        layer.start().unwrap();

        host.write_all(b"first").unwrap();
        wait_for(|| layer.shared.frames_read.load(Ordering::Relaxed) >= 1);
        host.write_all(b"second").unwrap();
        wait_for(|| layer.shared.frames_read.load(Ordering::Relaxed) >= 2);

        let mut io = LayerIo::new();
        layer.tick(0, &mut io).unwrap();
        assert!(io.pop_downstream().is_some());
        assert!(io.pop_downstream().is_none());

        let mut io = LayerIo::new();
        layer.tick(1, &mut io).unwrap();
        assert!(io.pop_downstream().is_some());

        drop(host);
    }

    #[test]
    fn test_upstream_frames_reach_device() {
        let (device, mut host) = UnixStream::pair().unwrap();
        let mut layer = TunnelLayer::new(device);

        let mut io = LayerIo::new();
        layer
            .receive_from_downstream(b"reply frame".to_vec(), &mut io)
            .unwrap();
        layer.tick(0, &mut io).unwrap();

        let mut buf = [0u8; 64];
        let len = host.read(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"reply frame");
        assert_eq!(layer.snapshot().frames_written, 1);
    }

    #[test]
    fn test_clean_shutdown() {
        let (device, host) = UnixStream::pair().unwrap();
        let mut layer = TunnelLayer::new(device);
        layer.start().unwrap();

        // Closing the host side unblocks the reader; stop() must then join
        // promptly.
        drop(host);
        layer.stop();
        assert!(layer.reader.is_none());
    }

    #[test]
    fn test_start_is_idempotent() {
        let (device, host) = UnixStream::pair().unwrap();
        let mut layer = TunnelLayer::new(device);
        layer.start().unwrap();
        layer.start().unwrap();
        drop(host);
    }
}
