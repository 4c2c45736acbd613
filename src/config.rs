//! Operator-facing knobs shared by both workers.

use std::time::Duration;

use crate::errors::TunnelError;

/// Lowest accepted flush timeout in milliseconds.
pub const FLUSH_TIMEOUT_MIN_MS: u64 = 1;

/// Highest accepted flush timeout in milliseconds.
pub const FLUSH_TIMEOUT_MAX_MS: u64 = 60_000;

/// Flush timeout applied when the operator does not pick one.
pub const DEFAULT_FLUSH_TIMEOUT_MS: u64 = 100;

/// Validate an operator-supplied flush timeout.
pub fn validate_flush_timeout(ms: u64) -> Result<Duration, TunnelError> {
    if !(FLUSH_TIMEOUT_MIN_MS..=FLUSH_TIMEOUT_MAX_MS).contains(&ms) {
        return Err(TunnelError::InvalidFlushTimeout(ms));
    }
    Ok(Duration::from_millis(ms))
}

/// Per-area debug logging toggles.
///
/// Each toggle gates `debug!` lines for one traffic area so a busy tunnel
/// can be inspected without drowning the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugOptions {
    /// Log every CAN frame crossing the tunnel.
    pub can: bool,
    /// Log every datagram sent or received.
    pub udp: bool,
    /// Log flush timer expirations.
    pub timer: bool,
    /// Log pool growth and buffer sizes on shutdown.
    pub buffer: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_the_documented_range() {
        assert!(validate_flush_timeout(FLUSH_TIMEOUT_MIN_MS).is_ok());
        assert!(validate_flush_timeout(DEFAULT_FLUSH_TIMEOUT_MS).is_ok());
        assert!(validate_flush_timeout(FLUSH_TIMEOUT_MAX_MS).is_ok());
    }

    #[test]
    fn rejects_out_of_range_timeouts() {
        assert!(matches!(
            validate_flush_timeout(0),
            Err(TunnelError::InvalidFlushTimeout(0))
        ));
        assert!(validate_flush_timeout(FLUSH_TIMEOUT_MAX_MS + 1).is_err());
    }
}
