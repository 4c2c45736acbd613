//! Periodic flush timer backed by a Linux timerfd.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

/// Expiration offset used by [`FlushTimer::fire_soon`]: close enough to
/// "now" to wake the consumer immediately, far enough that the kernel still
/// arms the timer.
const FIRE_SOON: Duration = Duration::from_micros(20);

/// A repeating timer whose next expiration can be pulled forward.
///
/// The descriptor participates in the worker's readiness wait next to the
/// socket. [`FlushTimer::fire_soon`] rewrites only the *next* expiration;
/// the repeating interval survives, so the periodic cadence resumes after
/// the one-off wake.
#[derive(Debug)]
pub struct FlushTimer {
    fd: RawFd,
    period: Duration,
}

impl FlushTimer {
    /// Create a periodic timer whose first expiration is one full period
    /// away.
    pub fn periodic(period: Duration) -> io::Result<Self> {
        let fd = unsafe {
            libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_CLOEXEC | libc::TFD_NONBLOCK)
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let timer = Self { fd, period };
        timer.arm(period)?;
        Ok(timer)
    }

    /// Pull the next expiration forward to fire almost immediately while
    /// keeping the repeating interval.
    pub fn fire_soon(&self) -> io::Result<()> {
        self.arm(FIRE_SOON)
    }

    /// Drain the descriptor, returning how many expirations have occurred
    /// since the last read (zero when a re-arm raced the read away).
    pub fn read_expirations(&self) -> io::Result<u64> {
        let mut count: u64 = 0;
        let n = unsafe {
            libc::read(
                self.fd,
                &mut count as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(0);
            }
            return Err(err);
        }
        if n as usize != std::mem::size_of::<u64>() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "timerfd read returned a partial expiration counter",
            ));
        }
        Ok(count)
    }

    fn arm(&self, next: Duration) -> io::Result<()> {
        let spec = libc::itimerspec {
            it_interval: timespec_from(self.period),
            it_value: timespec_from(next),
        };
        let ret = unsafe { libc::timerfd_settime(self.fd, 0, &spec, std::ptr::null_mut()) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl AsRawFd for FlushTimer {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for FlushTimer {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

fn timespec_from(duration: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_nsec: duration.subsec_nanos() as libc::c_long,
    }
}
