//! Public traits for integration with other crates
//!
//! The receiver holds these as capabilities handed over at construction and
//! invokes them outside its session lock, so implementations may call back
//! into the receiver without deadlocking.

use crate::packet::{TmmbItem, TransportFeedback};
use crate::stats::{ReportBlockData, RtcpPacketTypeCounter, RtcpStatistics};
use crate::RtpSsrc;

/// Hooks into the owning RTP module
pub trait RtcpModuleHooks: Send + Sync {
    /// A new TMMBN bounding set should be advertised to the senders
    fn set_tmmbn(&self, bounding_set: Vec<TmmbItem>);

    /// The remote asked for an immediate Sender Report
    fn on_request_send_report(&self);

    /// The remote NACKed the given sequence numbers
    fn on_received_nack(&self, nack_sequence_numbers: &[u16]);

    /// Report blocks about our sources arrived
    fn on_received_rtcp_report_blocks(&self, report_blocks: &[ReportBlockData]);
}

/// Consumer of inbound bandwidth signals (REMB, TMMBR, report blocks)
pub trait RtcpBandwidthObserver: Send + Sync {
    /// A bitrate estimate arrived, from REMB or a TMMBR bounding set
    fn on_received_estimated_bitrate(&self, bitrate_bps: u32);

    /// A receiver report arrived; `rtt_ms` is the most recent sample
    fn on_received_rtcp_receiver_report(
        &self,
        report_blocks: &[ReportBlockData],
        rtt_ms: i64,
        now_ms: i64,
    );
}

/// Consumer of keyframe-related feedback
pub trait RtcpIntraFrameObserver: Send + Sync {
    /// PLI or FIR: produce a keyframe for `ssrc`
    fn on_received_intra_frame_request(&self, ssrc: RtpSsrc);

    /// SLI: refresh the slices of `picture_id`
    fn on_received_sli(&self, ssrc: RtpSsrc, picture_id: u8);

    /// RPSI: `picture_id` is confirmed as a reference
    fn on_received_rpsi(&self, ssrc: RtpSsrc, picture_id: u64);

    /// The local SSRC was reconfigured
    fn on_local_ssrc_changed(&self, old_ssrc: RtpSsrc, new_ssrc: RtpSsrc);
}

/// Consumer of transport-wide congestion control feedback
pub trait TransportFeedbackObserver: Send + Sync {
    /// A transport feedback packet addressed to one of our sources arrived
    fn on_transport_feedback(&self, feedback: &TransportFeedback);
}

/// Observer of the running packet-type counters
pub trait RtcpPacketTypeCounterObserver: Send + Sync {
    /// Counters changed after parsing a datagram
    fn rtcp_packet_types_counter_updated(&self, ssrc: RtpSsrc, counter: &RtcpPacketTypeCounter);
}

/// Sink for per-source reception statistics
pub trait RtcpStatisticsCallback: Send + Sync {
    /// A report block about `ssrc` was stored
    fn statistics_updated(&self, statistics: &RtcpStatistics, ssrc: RtpSsrc);

    /// The CNAME of `ssrc` changed
    fn cname_changed(&self, cname: &str, ssrc: RtpSsrc);
}
