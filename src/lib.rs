//! RTCP reception core for a real-time media stack
//!
//! This crate ingests compound RTCP datagrams (RFC 3550, RFC 3611, RFC 4585,
//! RFC 5104, transport-wide feedback), validates and parses their constituent
//! blocks, maintains per-remote-source session state, computes round-trip-time
//! estimates from SR/DLRR exchanges, detects reporting timeouts, and fans out
//! typed notifications to the surrounding subsystems.
//!
//! The library is organized into several modules:
//!
//! - `packet`: RTCP packet definitions, parsing and serialization
//! - `receiver`: the stateful reception core (`RtcpReceiver`)
//! - `tmmbr`: TMMBR bounding-set computation (RFC 5104)
//! - `stats`: reception statistics and counters
//! - `time`: timing and clock utilities
//! - `traits`: public traits for integration with other crates

mod error;

// Main modules
pub mod packet;
pub mod receiver;
pub mod stats;
pub mod time;
pub mod tmmbr;
pub mod traits;

// Re-export core types
pub use error::RtcpError;

// Re-export common types from packet module
pub use packet::{
    NtpTimestamp, RtcpGoodbye, RtcpHeader, RtcpPacket, RtcpReceiverReport, RtcpReportBlock,
    RtcpSenderReport, RtcpSourceDescription, TmmbItem, TransportFeedback,
};

// Re-export the receiver surface
pub use receiver::{
    RtcpReceiver, RtcpReceiverConfig, RtcpSenderInfo, RtcpXrReceiveTimeInfo, RttSummary,
    SenderReportTiming,
};
pub use stats::{ReportBlockData, RtcpPacketTypeCounter, RtcpStatistics};

/// Typedef for RTP timestamp values
pub type RtpTimestamp = u32;

/// Typedef for RTP sequence numbers
pub type RtpSequenceNumber = u16;

/// Typedef for RTP synchronization source identifier
pub type RtpSsrc = u32;

/// Number of RTCP report intervals without an RR before a timeout fires
pub const RR_TIMEOUT_INTERVALS: i64 = 3;

/// Minimum spacing between warnings about skipped RTCP blocks
pub const SKIP_WARN_INTERVAL_MS: i64 = 10_000;

/// Default RTCP report interval for audio (RFC 3550)
pub const RTCP_INTERVAL_AUDIO_MS: i64 = 5_000;

/// Shortest accepted spacing between honored FIR requests (~one 60 fps frame)
pub const RTCP_MIN_FRAME_LENGTH_MS: i64 = 17;

/// Fixed width of a stored CNAME, terminating NUL included
pub const RTCP_CNAME_SIZE: usize = 256;

/// Maximum report blocks per SR/RR (5-bit count field)
pub const MAX_REPORT_BLOCKS: usize = 31;

/// Result type for RTCP operations
pub type Result<T> = std::result::Result<T, RtcpError>;

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::{
        NtpTimestamp, Result, RtcpError, RtcpPacket, RtcpReceiver, RtcpReceiverConfig,
        RtcpReceiverReport, RtcpReportBlock, RtcpSenderReport, RtpSequenceNumber, RtpSsrc,
        RtpTimestamp,
    };

    pub use crate::traits::{
        RtcpBandwidthObserver, RtcpIntraFrameObserver, RtcpModuleHooks,
        RtcpPacketTypeCounterObserver, RtcpStatisticsCallback, TransportFeedbackObserver,
    };
}
