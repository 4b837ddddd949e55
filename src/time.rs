//! Timing and clock utilities
//!
//! The receiver never reads the system clock directly; it goes through the
//! [`RtcpClock`] trait so that tests can drive time deterministically.

use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::packet::NtpTimestamp;

/// Offset between the NTP epoch (1900) and the UNIX epoch (1970), in seconds
pub const NTP_TO_UNIX_OFFSET: u64 = 2_208_988_800;

/// Clock abstraction used by the receiver
pub trait RtcpClock: Send + Sync {
    /// Current wall-clock time in milliseconds
    fn now_ms(&self) -> i64;

    /// Current wall-clock time as a 64-bit NTP timestamp
    fn now_ntp(&self) -> NtpTimestamp;
}

/// System-time backed clock
#[derive(Debug, Default)]
pub struct SystemClock;

impl RtcpClock for SystemClock {
    fn now_ms(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0));
        now.as_millis() as i64
    }

    fn now_ntp(&self) -> NtpTimestamp {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0));

        // NTP epoch starts 70 years before the UNIX epoch.
        let ntp_seconds = now.as_secs() + NTP_TO_UNIX_OFFSET;

        // Convert nanoseconds to NTP fraction (2^32 / 10^9).
        let nanos = now.subsec_nanos();
        let ntp_fraction = (nanos as u64 * 0x1_0000_0000u64 / 1_000_000_000) as u32;

        NtpTimestamp {
            seconds: ntp_seconds as u32,
            fraction: ntp_fraction,
        }
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug)]
pub struct SimulatedClock {
    now_ms: Mutex<i64>,
}

impl SimulatedClock {
    /// Create a simulated clock starting at the given wall-clock millisecond
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: Mutex::new(start_ms),
        }
    }

    /// Advance the clock by `delta_ms` milliseconds
    pub fn advance(&self, delta_ms: i64) {
        *self.now_ms.lock().unwrap_or_else(|e| e.into_inner()) += delta_ms;
    }

    /// Set the clock to an absolute millisecond value
    pub fn set(&self, now_ms: i64) {
        *self.now_ms.lock().unwrap_or_else(|e| e.into_inner()) = now_ms;
    }
}

impl RtcpClock for SimulatedClock {
    fn now_ms(&self) -> i64 {
        *self.now_ms.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn now_ntp(&self) -> NtpTimestamp {
        let ms = self.now_ms();
        let seconds = (ms / 1000) as u64 + NTP_TO_UNIX_OFFSET;
        let fraction = (((ms % 1000) as u64) * 0x1_0000_0000u64 / 1000) as u32;
        NtpTimestamp {
            seconds: seconds as u32,
            fraction,
        }
    }
}
