//! Cross-worker delivery seam and the shared readiness wait.

use std::io;
use std::os::unix::io::RawFd;

use crate::frame::TunnelFrame;

/// Delivery seam between the two workers.
///
/// Each worker hands the frames received on its own socket to its peer
/// through this trait; the peer stages them for its next flush. Handles are
/// installed as `Arc<dyn FrameSink>` after both workers are constructed and
/// before either starts.
pub trait FrameSink: Send + Sync {
    /// Stage a batch of frames, in order, for transmission on the
    /// implementor's socket.
    fn forward_frames(&self, frames: &[TunnelFrame]);
}

/// Which of the two watched descriptors became readable.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Readiness {
    pub socket: bool,
    pub timer: bool,
}

/// Block until the socket or the timer is readable.
///
/// Retries on EINTR. Error and hang-up conditions are reported as readiness
/// so the caller's subsequent read observes them.
pub(crate) fn wait_readable(socket: RawFd, timer: RawFd) -> io::Result<Readiness> {
    let mut fds = [
        libc::pollfd {
            fd: socket,
            events: libc::POLLIN,
            revents: 0,
        },
        libc::pollfd {
            fd: timer,
            events: libc::POLLIN,
            revents: 0,
        },
    ];

    loop {
        let res = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
        if res >= 0 {
            return Ok(Readiness {
                socket: fds[0].revents != 0,
                timer: fds[1].revents != 0,
            });
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}
