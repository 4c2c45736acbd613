//! Worker owning the UDP socket and the outbound aggregation state.

use std::io;
use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config::DebugOptions;
use crate::errors::TunnelError;
use crate::frame::TunnelFrame;
use crate::pool::{FramePool, FRAME_POOL_SIZE};
use crate::timer::FlushTimer;
use crate::wire::{
    decode_datagram, frame_wire_len, DatagramBuilder, DecodeError, UDP_DATA_PACKET_BASE_SIZE,
    UDP_PAYLOAD_SIZE,
};
use crate::worker::{wait_readable, FrameSink};

/// Receive buffer for inbound datagrams; must hold at least
/// [`UDP_PAYLOAD_SIZE`] bytes.
pub const RECEIVE_BUFFER_SIZE: usize = 2048;

/// Outbound aggregation state: the staged frames plus the bytes they would
/// occupy on the wire right now (frame records only, header excluded).
#[derive(Debug, Default)]
struct TxBuffer {
    frames: Vec<TunnelFrame>,
    wire_size: usize,
}

struct UdpShared {
    socket: UdpSocket,
    timer: FlushTimer,
    remote: SocketAddrV4,
    pool: Mutex<FramePool>,
    buffer: Mutex<TxBuffer>,
    running: AtomicBool,
    rx_count: AtomicU64,
    tx_count: AtomicU64,
    debug: DebugOptions,
}

/// Worker that owns the UDP socket: aggregates outbound frames into
/// datagrams and decodes inbound datagrams from the configured remote.
///
/// Construction opens and binds the socket, creates the flush timer and
/// pre-allocates the frame pool, so setup failures surface before any
/// thread exists. Install the peer sink with [`UdpWorker::set_peer`], then
/// [`UdpWorker::start`]. Dropping the worker stops it.
pub struct UdpWorker {
    shared: Arc<UdpShared>,
    peer: Option<Arc<dyn FrameSink>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl UdpWorker {
    /// Bind `local`, create the periodic flush timer and pre-allocate the
    /// frame pool. `remote` is both the transmit destination and the only
    /// accepted source of inbound datagrams.
    pub fn new(
        remote: SocketAddrV4,
        local: SocketAddrV4,
        flush_timeout: Duration,
        debug: DebugOptions,
    ) -> Result<Self, TunnelError> {
        let socket = UdpSocket::bind(local).map_err(TunnelError::SocketSetup)?;
        socket
            .set_nonblocking(true)
            .map_err(TunnelError::SocketSetup)?;
        let timer = FlushTimer::periodic(flush_timeout).map_err(TunnelError::TimerSetup)?;
        let shared = Arc::new(UdpShared {
            socket,
            timer,
            remote,
            pool: Mutex::new(FramePool::with_initial(FRAME_POOL_SIZE)),
            buffer: Mutex::new(TxBuffer::default()),
            running: AtomicBool::new(false),
            rx_count: AtomicU64::new(0),
            tx_count: AtomicU64::new(0),
            debug,
        });
        Ok(Self {
            shared,
            peer: None,
            thread: None,
        })
    }

    /// Install the CAN-side sink that receives decoded inbound frames.
    pub fn set_peer(&mut self, peer: Arc<dyn FrameSink>) {
        self.peer = Some(peer);
    }

    /// Admission handle for the CAN-side producer.
    pub fn handle(&self) -> UdpHandle {
        UdpHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Address the socket actually bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.shared.socket.local_addr()
    }

    /// Spawn the main loop. Fails if no peer sink is installed.
    pub fn start(&mut self) -> Result<(), TunnelError> {
        if self.thread.is_some() {
            return Err(TunnelError::AlreadyStarted);
        }
        let peer = self.peer.clone().ok_or(TunnelError::PeerMissing)?;
        let shared = Arc::clone(&self.shared);
        shared.running.store(true, Ordering::SeqCst);
        self.thread = Some(thread::spawn(move || run_loop(shared, peer)));
        Ok(())
    }

    /// Stop the worker: flip the running flag, shut the socket down to
    /// unblock the readiness wait, join the loop and clear the pool.
    pub fn stop(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        self.shared.running.store(false, Ordering::SeqCst);
        info!(
            "shutting down; UDP transmission summary: TX: {}  RX: {}",
            self.shared.tx_count.load(Ordering::Relaxed),
            self.shared.rx_count.load(Ordering::Relaxed)
        );
        unsafe {
            libc::shutdown(self.shared.socket.as_raw_fd(), libc::SHUT_RDWR);
        }
        let _ = handle.join();
        if self.shared.debug.buffer {
            let pool = self.shared.pool.lock().unwrap();
            let buffer = self.shared.buffer.lock().unwrap();
            debug!(
                "pool: {} idle of {} allocated, live buffer: {} frames ({} wire bytes)",
                pool.len(),
                pool.total_allocated(),
                buffer.frames.len(),
                buffer.wire_size
            );
        }
        self.shared.pool.lock().unwrap().clear();
    }
}

impl Drop for UdpWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Cloneable admission handle: the CAN worker pushes bus frames through it
/// into the outbound aggregation buffer.
#[derive(Clone)]
pub struct UdpHandle {
    shared: Arc<UdpShared>,
}

impl UdpHandle {
    /// Admit one frame into the outbound aggregation buffer.
    ///
    /// Locks the pool before the buffer, growing the pool on underflow; the
    /// pool lock drops as soon as the slot has moved. When the staged bytes
    /// plus the datagram header reach the payload ceiling, the flush timer
    /// is pulled forward so the datagram leaves before the periodic tick.
    pub fn send_can_frame(&self, frame: &TunnelFrame) {
        let shared = &*self.shared;

        let mut pool = shared.pool.lock().unwrap();
        if pool.is_empty() {
            let total = pool.grow_double();
            if shared.debug.buffer {
                debug!("frame pool exhausted, grew to {total} slots");
            }
        }
        let mut slot = pool.take().unwrap_or_default();
        slot.copy_from(frame);

        let mut buffer = shared.buffer.lock().unwrap();
        drop(pool);
        buffer.frames.push(slot);
        buffer.wire_size += frame_wire_len(frame);
        if buffer.wire_size + UDP_DATA_PACKET_BASE_SIZE >= UDP_PAYLOAD_SIZE {
            if let Err(err) = shared.timer.fire_soon() {
                error!("failed to re-arm the flush timer: {err}");
            }
        }
    }
}

impl FrameSink for UdpHandle {
    fn forward_frames(&self, frames: &[TunnelFrame]) {
        for frame in frames {
            self.send_can_frame(frame);
        }
    }
}

fn run_loop(shared: Arc<UdpShared>, peer: Arc<dyn FrameSink>) {
    let mut seq: u8 = 0;
    let mut inflight = TxBuffer::default();
    let mut builder = DatagramBuilder::new();
    let mut recv_buf = [0u8; RECEIVE_BUFFER_SIZE];

    info!("UDP worker up and running");
    while shared.running.load(Ordering::SeqCst) {
        let ready = match wait_readable(shared.socket.as_raw_fd(), shared.timer.as_raw_fd()) {
            Ok(ready) => ready,
            Err(err) => {
                error!("UDP readiness wait failed: {err}");
                break;
            }
        };

        if ready.timer {
            match shared.timer.read_expirations() {
                Ok(0) => {}
                Ok(expirations) => {
                    if shared.debug.timer {
                        debug!("flush timer expired {expirations} time(s)");
                    }
                    if shared.buffer.lock().unwrap().wire_size > 0 {
                        seq = transmit_buffer(&shared, &mut inflight, &mut builder, seq);
                    }
                }
                Err(err) => {
                    error!("flush timer read failed: {err}");
                    break;
                }
            }
        }

        if ready.socket {
            match shared.socket.recv_from(&mut recv_buf) {
                Ok((0, _)) => {}
                Ok((len, src)) => handle_datagram(&shared, &peer, &recv_buf[..len], src),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => {
                    if shared.running.load(Ordering::SeqCst) {
                        error!("UDP receive failed: {err}");
                    }
                    break;
                }
            }
        }
    }
}

fn handle_datagram(shared: &UdpShared, peer: &Arc<dyn FrameSink>, buf: &[u8], src: SocketAddr) {
    // Source check is address-only; the peer may send from an ephemeral port.
    if src.ip() != std::net::IpAddr::V4(*shared.remote.ip()) {
        warn!("dropping datagram from {src}, which is not the configured remote");
        return;
    }
    match decode_datagram(buf) {
        Ok(datagram) => {
            if shared.debug.udp {
                debug!(
                    "received {} bytes from {src} (seq {}, {} frames)",
                    buf.len(),
                    datagram.seq,
                    datagram.frames.len()
                );
            }
            shared.rx_count.fetch_add(1, Ordering::Relaxed);
            if shared.debug.can {
                for frame in &datagram.frames {
                    debug!("{frame}");
                }
            }
            peer.forward_frames(&datagram.frames);
        }
        Err(DecodeError::Empty) => info!("dropping empty datagram from {src}"),
        Err(err @ (DecodeError::Truncated | DecodeError::FrameLength(_))) => {
            error!("dropping malformed datagram from {src}: {err}");
        }
        Err(err) => warn!("dropping datagram from {src}: {err}"),
    }
}

/// Swap the live buffer out, sort it and transmit it as one or more
/// datagrams. Returns the sequence number to use next.
fn transmit_buffer(
    shared: &UdpShared,
    inflight: &mut TxBuffer,
    builder: &mut DatagramBuilder,
    mut seq: u8,
) -> u8 {
    {
        let mut live = shared.buffer.lock().unwrap();
        std::mem::swap(&mut *live, inflight);
    }

    inflight.frames.sort_unstable();

    builder.reset();
    for frame in &inflight.frames {
        if !builder.push(frame) {
            seq = send_datagram(shared, builder, seq);
            builder.reset();
            builder.push(frame);
        }
    }
    if !builder.is_empty() {
        seq = send_datagram(shared, builder, seq);
    }
    builder.reset();

    shared
        .pool
        .lock()
        .unwrap()
        .put_back(inflight.frames.drain(..));
    inflight.wire_size = 0;
    seq
}

fn send_datagram(shared: &UdpShared, builder: &mut DatagramBuilder, seq: u8) -> u8 {
    let count = builder.frame_count();
    let packet = builder.seal(seq);
    match shared.socket.send_to(packet, SocketAddr::V4(shared.remote)) {
        Ok(sent) if sent == packet.len() => {
            shared.tx_count.fetch_add(1, Ordering::Relaxed);
            if shared.debug.udp {
                debug!(
                    "sent {} bytes to {} (seq {seq}, {count} frames)",
                    packet.len(),
                    shared.remote
                );
            }
        }
        Ok(sent) => error!("short UDP send: {sent} of {} bytes", packet.len()),
        Err(err) => error!("UDP send failed: {err}"),
    }
    seq.wrapping_add(1)
}
