//! Network time.
//!
//! Message timestamps count whole seconds since the network epoch,
//! 2021-01-01T00:00:00Z, and fit in a `u32`. Components that need "now" take a
//! [`Clock`] so tests can pin time.

use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Network epoch in milliseconds since the UNIX epoch.
pub const NETWORK_EPOCH_MS: i64 = 1_609_459_200_000;

/// Errors converting between UNIX and network time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeError {
    /// The instant precedes the network epoch
    #[error("time {unix_ms}ms precedes the network epoch")]
    BeforeEpoch {
        /// Offending UNIX time in milliseconds
        unix_ms: i64,
    },
    /// The instant does not fit in 32 bits of seconds
    #[error("time {unix_ms}ms overflows network time")]
    Overflow {
        /// Offending UNIX time in milliseconds
        unix_ms: i64,
    },
}

/// Convert UNIX milliseconds to network seconds.
///
/// # Errors
///
/// Returns error if the time precedes the epoch or overflows `u32`.
pub fn to_network_time(unix_ms: i64) -> Result<u32, TimeError> {
    let since_epoch = unix_ms - NETWORK_EPOCH_MS;
    if since_epoch < 0 {
        return Err(TimeError::BeforeEpoch { unix_ms });
    }
    u32::try_from(since_epoch / 1000).map_err(|_| TimeError::Overflow { unix_ms })
}

/// Convert network seconds to UNIX milliseconds.
#[must_use]
pub fn from_network_time(network_secs: u32) -> i64 {
    i64::from(network_secs) * 1000 + NETWORK_EPOCH_MS
}

/// Current network time.
///
/// # Errors
///
/// Returns error if the wall clock is outside the network time range.
pub fn network_time_now() -> Result<u32, TimeError> {
    to_network_time(Utc::now().timestamp_millis())
}

/// Source of the current network time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current network time in seconds.
    fn now(&self) -> u32;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u32 {
        match network_time_now() {
            Ok(now) => now,
            Err(TimeError::Overflow { .. }) => u32::MAX,
            Err(TimeError::BeforeEpoch { .. }) => 0,
        }
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU32,
}

impl ManualClock {
    /// Create a clock pinned at `now`.
    #[must_use]
    pub fn new(now: u32) -> Self {
        Self {
            now: AtomicU32::new(now),
        }
    }

    /// Pin the clock at `now`.
    pub fn set(&self, now: u32) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Move the clock forward.
    pub fn advance(&self, secs: u32) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_is_zero() {
        assert_eq!(to_network_time(NETWORK_EPOCH_MS).unwrap(), 0);
        assert_eq!(to_network_time(NETWORK_EPOCH_MS + 1_999).unwrap(), 1);
        assert_eq!(from_network_time(0), NETWORK_EPOCH_MS);
    }

    #[test]
    fn network_time_roundtrip() {
        let unix_ms = 1_704_067_200_000; // 2024-01-01
        let secs = to_network_time(unix_ms).unwrap();
        assert_eq!(secs, 94_608_000);
        assert_eq!(from_network_time(secs), unix_ms);
    }

    #[test]
    fn before_epoch_rejected() {
        assert_eq!(
            to_network_time(0),
            Err(TimeError::BeforeEpoch { unix_ms: 0 })
        );
    }

    #[test]
    fn system_clock_is_after_2024() {
        assert!(SystemClock.now() > 94_608_000);
    }

    #[test]
    fn manual_clock_moves_on_request() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now(), 100);
        clock.advance(5);
        assert_eq!(clock.now(), 105);
        clock.set(7);
        assert_eq!(clock.now(), 7);
    }
}
