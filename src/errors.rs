//! Error types surfaced by worker setup.

use std::fmt;
use std::io;

/// Errors that keep a worker from starting.
///
/// Everything past setup is best-effort: runtime failures are logged by the
/// worker loops and never propagate across workers.
#[derive(Debug)]
pub enum TunnelError {
    /// Opening or binding the UDP socket failed.
    SocketSetup(io::Error),
    /// Creating or arming the flush timer failed.
    TimerSetup(io::Error),
    /// Opening or configuring the CAN interface failed.
    CanSetup(socketcan::Error),
    /// A worker was started before its peer sink was installed.
    PeerMissing,
    /// A worker was started twice.
    AlreadyStarted,
    /// Flush timeout outside the accepted range (milliseconds).
    InvalidFlushTimeout(u64),
}

impl fmt::Display for TunnelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelError::SocketSetup(err) => write!(f, "socket setup failed: {err}"),
            TunnelError::TimerSetup(err) => write!(f, "timer setup failed: {err}"),
            TunnelError::CanSetup(err) => write!(f, "CAN interface setup failed: {err}"),
            TunnelError::PeerMissing => write!(f, "no peer sink installed before start"),
            TunnelError::AlreadyStarted => write!(f, "worker already started"),
            TunnelError::InvalidFlushTimeout(ms) => {
                write!(f, "flush timeout {ms} ms outside the accepted range")
            }
        }
    }
}

impl std::error::Error for TunnelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TunnelError::SocketSetup(err) | TunnelError::TimerSetup(err) => Some(err),
            TunnelError::CanSetup(err) => Some(err),
            _ => None,
        }
    }
}
