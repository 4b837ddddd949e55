/// NTP timestamp representation (64 bits)
/// As defined in RFC 3550
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NtpTimestamp {
    /// Seconds since January 1, 1900
    pub seconds: u32,

    /// Fraction of a second
    pub fraction: u32,
}

impl NtpTimestamp {
    /// Create a timestamp from explicit seconds and fraction
    pub fn new(seconds: u32, fraction: u32) -> Self {
        Self { seconds, fraction }
    }

    /// Convert to a 64-bit representation
    pub fn to_u64(&self) -> u64 {
        (self.seconds as u64) << 32 | (self.fraction as u64)
    }

    /// Convert from a 64-bit representation
    pub fn from_u64(value: u64) -> Self {
        Self {
            seconds: (value >> 32) as u32,
            fraction: value as u32,
        }
    }

    /// Compact form: the middle 32 bits of the timestamp
    ///
    /// This is the representation used by the `last_sr` / `last_rr` fields of
    /// report blocks and XR sub-blocks (RFC 3550 Section 6.4.1, RFC 3611).
    /// The unit is 1/65536 second.
    pub fn to_compact(&self) -> u32 {
        (self.seconds << 16) | (self.fraction >> 16)
    }
}

/// Convert a compact-NTP interval (1/65536 s units) to milliseconds.
///
/// Rounds to nearest. Intervals are expected to be small and positive; a
/// non-zero interval never maps below 1 ms so that a genuine sample cannot
/// collapse to the "no estimate" sentinel.
pub fn compact_to_ms(interval: u32) -> i64 {
    if interval == 0 {
        return 0;
    }
    let ms = ((interval as u64 * 1000 + 0x8000) >> 16) as i64;
    ms.max(1)
}

/// Convert milliseconds to a compact-NTP interval (1/65536 s units).
pub fn ms_to_compact(ms: i64) -> u32 {
    ((ms as u64 * 65536) / 1000) as u32
}
