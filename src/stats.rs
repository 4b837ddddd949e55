//! Reception statistics and counters

use crate::{RtpSequenceNumber, RtpSsrc};

/// Wrap-aware "is `a` newer than `b`" test over the 16-bit sequence space
pub fn is_newer_sequence_number(a: RtpSequenceNumber, b: RtpSequenceNumber) -> bool {
    a != b && a.wrapping_sub(b) < 0x8000
}

/// Aggregated NACK request statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct NackStats {
    max_sequence_number: RtpSequenceNumber,
    requests: u32,
    unique_requests: u32,
}

impl NackStats {
    /// Create empty statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Account one NACKed sequence number
    ///
    /// A request counts as unique when it is newer than every sequence number
    /// seen so far; retransmission requests for older packets only bump the
    /// total.
    pub fn report_request(&mut self, sequence_number: RtpSequenceNumber) {
        if self.requests == 0 || is_newer_sequence_number(sequence_number, self.max_sequence_number)
        {
            self.max_sequence_number = sequence_number;
            self.unique_requests += 1;
        }
        self.requests += 1;
    }

    /// Total number of requested packets
    pub fn requests(&self) -> u32 {
        self.requests
    }

    /// Number of distinct requested packets
    pub fn unique_requests(&self) -> u32 {
        self.unique_requests
    }
}

/// Counters over received RTCP packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcpPacketTypeCounter {
    /// Wall clock of the first counted packet, `None` until one arrives
    pub first_packet_time_ms: Option<i64>,

    /// Number of NACK packets
    pub nack_packets: u32,

    /// Number of FIR requests addressed to us
    pub fir_packets: u32,

    /// Number of PLI packets addressed to us
    pub pli_packets: u32,

    /// Total NACKed sequence numbers
    pub nack_requests: u32,

    /// Distinct NACKed sequence numbers
    pub unique_nack_requests: u32,
}

impl Default for RtcpPacketTypeCounter {
    fn default() -> Self {
        Self {
            first_packet_time_ms: None,
            nack_packets: 0,
            fir_packets: 0,
            pli_packets: 0,
            nack_requests: 0,
            unique_nack_requests: 0,
        }
    }
}

/// Reception statistics delivered to the statistics callback
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtcpStatistics {
    /// Fraction of packets lost since the previous report (Q8)
    pub fraction_lost: u8,

    /// Cumulative number of packets lost
    pub cumulative_lost: i32,

    /// Extended highest sequence number received
    pub extended_max_sequence_number: u32,

    /// Interarrival jitter
    pub jitter: u32,
}

/// One stored report block, reporter identity included
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportBlockData {
    /// SSRC of the reporting peer
    pub remote_ssrc: RtpSsrc,

    /// SSRC of the local source being reported on
    pub source_ssrc: RtpSsrc,

    /// Fraction of packets lost since the previous report (Q8)
    pub fraction_lost: u8,

    /// Cumulative number of packets lost
    pub cumulative_lost: i32,

    /// Extended highest sequence number received
    pub extended_high_seq_num: u32,

    /// Interarrival jitter
    pub jitter: u32,

    /// Compact NTP timestamp of the last SR the reporter saw
    pub last_sr: u32,

    /// Delay since that SR, in 1/65536 seconds
    pub delay_since_last_sr: u32,
}
