//! Worker owning the raw CAN socket.

use std::io;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use socketcan::{CanFrame, CanSocket, Socket};

use crate::config::DebugOptions;
use crate::errors::TunnelError;
use crate::frame::TunnelFrame;
use crate::timer::FlushTimer;
use crate::worker::{wait_readable, FrameSink};

/// Flush period for frames staged toward the bus. CAN bandwidth is limited
/// and no datagram ceiling applies in this direction, so a short fixed
/// latency bound is all the policy needed; the tick doubles as the loop's
/// liveness safeguard.
pub const CAN_TIMEOUT: Duration = Duration::from_millis(10);

struct CanShared {
    socket: CanSocket,
    timer: FlushTimer,
    buffer: Mutex<Vec<TunnelFrame>>,
    running: AtomicBool,
    rx_count: AtomicU64,
    tx_count: AtomicU64,
    debug: DebugOptions,
}

/// Worker that owns the raw CAN socket: forwards bus frames to the UDP side
/// and writes frames received from the remote peer onto the bus.
///
/// Construction opens and binds the socket and creates the flush timer, so
/// setup failures surface before any thread exists. Install the peer sink
/// with [`CanWorker::set_peer`], then [`CanWorker::start`]. Dropping the
/// worker stops it.
pub struct CanWorker {
    shared: Arc<CanShared>,
    peer: Option<Arc<dyn FrameSink>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CanWorker {
    /// Open the named CAN interface (e.g. `"can0"`) and create the periodic
    /// flush timer.
    pub fn new(interface: &str, debug: DebugOptions) -> Result<Self, TunnelError> {
        let socket = CanSocket::open(interface).map_err(|err| TunnelError::CanSetup(err.into()))?;
        socket
            .set_nonblocking(true)
            .map_err(|err| TunnelError::CanSetup(err.into()))?;
        let timer = FlushTimer::periodic(CAN_TIMEOUT).map_err(TunnelError::TimerSetup)?;
        let shared = Arc::new(CanShared {
            socket,
            timer,
            buffer: Mutex::new(Vec::new()),
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

    /// Install the UDP-side sink that receives frames read from the bus.
    pub fn set_peer(&mut self, peer: Arc<dyn FrameSink>) {
        self.peer = Some(peer);
    }

    /// Handle for the UDP-side producer delivering frames toward the bus.
    pub fn handle(&self) -> CanHandle {
        CanHandle {
            shared: Arc::clone(&self.shared),
        }
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

    /// Stop the worker: flip the running flag, shut the socket down and
    /// fire the timer to wake the loop, then join.
    pub fn stop(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        self.shared.running.store(false, Ordering::SeqCst);
        info!(
            "shutting down; CAN transmission summary: TX: {}  RX: {}",
            self.shared.tx_count.load(Ordering::Relaxed),
            self.shared.rx_count.load(Ordering::Relaxed)
        );
        unsafe {
            libc::shutdown(self.shared.socket.as_raw_fd(), libc::SHUT_RDWR);
        }
        // A raw CAN socket shutdown does not reliably wake the readiness
        // wait; the timer does.
        let _ = self.shared.timer.fire_soon();
        let _ = handle.join();
        if self.shared.debug.buffer {
            let buffer = self.shared.buffer.lock().unwrap();
            debug!("inbound buffer: {} frames pending", buffer.len());
        }
    }
}

impl Drop for CanWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Cloneable handle: the UDP worker stages decoded frames through it for
/// the next bus flush.
#[derive(Clone)]
pub struct CanHandle {
    shared: Arc<CanShared>,
}

impl FrameSink for CanHandle {
    fn forward_frames(&self, frames: &[TunnelFrame]) {
        if frames.is_empty() {
            return;
        }
        {
            let mut buffer = self.shared.buffer.lock().unwrap();
            buffer.extend_from_slice(frames);
        }
        if let Err(err) = self.shared.timer.fire_soon() {
            error!("failed to re-arm the bus flush timer: {err}");
        }
    }
}

fn run_loop(shared: Arc<CanShared>, peer: Arc<dyn FrameSink>) {
    let mut inflight: Vec<TunnelFrame> = Vec::new();

    info!("CAN worker up and running");
    while shared.running.load(Ordering::SeqCst) {
        let ready = match wait_readable(shared.socket.as_raw_fd(), shared.timer.as_raw_fd()) {
            Ok(ready) => ready,
            Err(err) => {
                error!("CAN readiness wait failed: {err}");
                break;
            }
        };

        if ready.timer {
            match shared.timer.read_expirations() {
                Ok(0) => {}
                Ok(expirations) => {
                    if shared.debug.timer {
                        debug!("bus flush timer expired {expirations} time(s)");
                    }
                    transmit_buffer(&shared, &mut inflight);
                }
                Err(err) => {
                    error!("bus flush timer read failed: {err}");
                    break;
                }
            }
        }

        if ready.socket {
            match shared.socket.read_frame() {
                Ok(CanFrame::Error(frame)) => {
                    warn!("error frame on the bus: {:?}", frame.into_error());
                }
                Ok(frame) => {
                    let tunnel = TunnelFrame::from_can(&frame);
                    shared.rx_count.fetch_add(1, Ordering::Relaxed);
                    if shared.debug.can {
                        debug!("{tunnel}");
                    }
                    peer.forward_frames(std::slice::from_ref(&tunnel));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => {
                    if shared.running.load(Ordering::SeqCst) {
                        error!("CAN read failed: {err}");
                    }
                    break;
                }
            }
        }
    }
}

/// Swap the staged frames out and write them to the bus in admission order.
/// Write failures are logged and the frame dropped; the tunnel does not
/// requeue toward a congested bus.
fn transmit_buffer(shared: &CanShared, inflight: &mut Vec<TunnelFrame>) {
    {
        let mut live = shared.buffer.lock().unwrap();
        std::mem::swap(&mut *live, inflight);
    }

    for frame in inflight.drain(..) {
        let Some(can) = frame.to_can() else {
            warn!("skipping frame not expressible on the bus: {frame}");
            continue;
        };
        match shared.socket.write_frame(&can) {
            Ok(()) => {
                shared.tx_count.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => error!("CAN write failed, dropping frame: {err}"),
        }
    }
}
