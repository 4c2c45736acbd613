#![warn(missing_docs)]

//! SocketCAN-over-UDP tunnel with latency-bounded frame aggregation.
//!
//! `canlink` transports CAN frames between a local SocketCAN interface and a
//! remote peer over UDP/IPv4. Deployed in pairs (one endpoint on each side of
//! an IP network), it makes devices on physically separated CAN buses appear
//! to share one logical bus.
//!
//! CAN frames are tiny (at most 13 bytes on the tunnel wire) and arrive at
//! high rates, so the engine batches many frames into each datagram while
//! bounding latency: a periodic flush timer caps how long a frame may sit in
//! the aggregation buffer, and a producer that fills the buffer up to the
//! datagram payload ceiling re-arms that timer to fire immediately.
//!
//! # Architecture
//! Two worker threads run in parallel and hand frames to each other through
//! the [`FrameSink`] seam:
//! - [`UdpWorker`] owns the UDP socket. It aggregates frames coming from the
//!   CAN side into datagrams ([`wire`]), drawing slots from a [`FramePool`]
//!   so the hot path does not allocate, and decodes inbound datagrams from
//!   the configured remote.
//! - [`CanWorker`] owns the raw CAN socket. It forwards bus frames to the
//!   UDP side one at a time and writes frames received from the peer onto
//!   the bus on a short fixed cadence.
//!
//! Each worker blocks only in a readiness wait over its socket and a timerfd;
//! buffers swap under a mutex held just long enough for the swap, so
//! transmission overlaps with new admissions.
//!
//! The tunnel is best-effort end to end: there is no retransmission,
//! reordering correction or flow control, and delivery failures in either
//! direction are logged and dropped.
//!
//! # Quick start
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use canlink::{CanWorker, DebugOptions, UdpWorker};
//!
//! # fn main() -> Result<(), canlink::TunnelError> {
//! let debug = DebugOptions::default();
//! let mut udp = UdpWorker::new(
//!     "192.168.0.2:20000".parse().unwrap(),
//!     "0.0.0.0:20000".parse().unwrap(),
//!     Duration::from_millis(100),
//!     debug,
//! )?;
//! let mut can = CanWorker::new("can0", debug)?;
//!
//! udp.set_peer(Arc::new(can.handle()));
//! can.set_peer(Arc::new(udp.handle()));
//! udp.start()?;
//! can.start()?;
//! // ... run until shutdown ...
//! can.stop();
//! udp.stop();
//! # Ok(())
//! # }
//! ```
//!
//! Linux only: the implementation relies on SocketCAN and timerfd.

mod can;
mod config;
mod errors;
mod frame;
mod pool;
mod timer;
mod udp;
pub mod wire;
mod worker;

pub use crate::can::{CanHandle, CanWorker, CAN_TIMEOUT};
pub use crate::config::{
    validate_flush_timeout, DebugOptions, DEFAULT_FLUSH_TIMEOUT_MS, FLUSH_TIMEOUT_MAX_MS,
    FLUSH_TIMEOUT_MIN_MS,
};
pub use crate::errors::TunnelError;
pub use crate::frame::TunnelFrame;
pub use crate::pool::{FramePool, FRAME_POOL_SIZE};
pub use crate::timer::FlushTimer;
pub use crate::udp::{UdpHandle, UdpWorker, RECEIVE_BUFFER_SIZE};
pub use crate::worker::FrameSink;
