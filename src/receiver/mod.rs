//! The stateful RTCP reception core
//!
//! [`RtcpReceiver::incoming_packet`] parses a compound datagram under the
//! session lock, updates the per-source session store while accumulating a
//! `PacketInformation`, then releases the lock and fans the accumulated
//! events out to the registered observers. Queries and timers take the same
//! lock, so the receiver can be shared across a network thread, sender
//! threads and a timer thread.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::packet::{
    compact_to_ms, compound_blocks, NtpTimestamp, RtcpFir, RtcpGoodbye, RtcpNack, RtcpPacket,
    RtcpPli, RtcpReceiverReport, RtcpReportBlock, RtcpRemb, RtcpRpsi, RtcpSenderReport, RtcpSli,
    RtcpSourceDescription, RtcpTmmb, RtcpExtendedReports, TmmbItem, TransportFeedback,
};
use crate::stats::{NackStats, ReportBlockData, RtcpPacketTypeCounter, RtcpStatistics};
use crate::time::RtcpClock;
use crate::tmmbr;
use crate::traits::{
    RtcpBandwidthObserver, RtcpIntraFrameObserver, RtcpModuleHooks, RtcpPacketTypeCounterObserver,
    RtcpStatisticsCallback, TransportFeedbackObserver,
};
use crate::{
    RtpSsrc, RR_TIMEOUT_INTERVALS, RTCP_CNAME_SIZE, RTCP_INTERVAL_AUDIO_MS,
    RTCP_MIN_FRAME_LENGTH_MS, SKIP_WARN_INTERVAL_MS,
};

/// Bit flags multiplexing the report kinds seen in one datagram
mod packet_type {
    pub const SR: u32 = 1 << 0;
    pub const RR: u32 = 1 << 1;
    pub const SDES: u32 = 1 << 2;
    pub const NACK: u32 = 1 << 3;
    pub const SR_REQ: u32 = 1 << 4;
    pub const TMMBR: u32 = 1 << 5;
    pub const TMMBN: u32 = 1 << 6;
    pub const PLI: u32 = 1 << 7;
    pub const SLI: u32 = 1 << 8;
    pub const RPSI: u32 = 1 << 9;
    pub const FIR: u32 = 1 << 10;
    pub const REMB: u32 = 1 << 11;
    pub const TRANSPORT_FEEDBACK: u32 = 1 << 12;
    pub const XR_RECEIVER_REFERENCE_TIME: u32 = 1 << 13;
    pub const XR_DLRR_REPORT_BLOCK: u32 = 1 << 14;
}

/// Everything one compound datagram told us, accumulated during parsing and
/// consumed by the dispatcher after the session lock is released
#[derive(Default)]
struct PacketInformation {
    packet_type_flags: u32,
    remote_ssrc: RtpSsrc,
    nack_sequence_numbers: Vec<u16>,
    report_blocks: Vec<ReportBlockData>,
    rtt_ms: i64,
    receiver_estimated_max_bitrate_bps: u64,
    sli_picture_id: u8,
    rpsi_picture_id: u64,
    transport_feedback: Option<TransportFeedback>,
}

impl PacketInformation {
    fn has(&self, flag: u32) -> bool {
        self.packet_type_flags & flag != 0
    }

    fn set(&mut self, flag: u32) {
        self.packet_type_flags |= flag;
    }
}

/// Sender information from the authoritative remote's last SR
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtcpSenderInfo {
    /// NTP seconds from the SR
    pub ntp_seconds: u32,

    /// NTP fraction from the SR
    pub ntp_fraction: u32,

    /// RTP timestamp corresponding to the NTP time
    pub rtp_timestamp: u32,

    /// Sender's packet count
    pub send_packet_count: u32,

    /// Sender's octet count
    pub send_octet_count: u32,
}

/// Receive-time info from the last XR RRTR, as reported back in DLRR
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtcpXrReceiveTimeInfo {
    /// SSRC of the RRTR originator
    pub source_ssrc: RtpSsrc,

    /// Compact NTP timestamp from the RRTR
    pub last_rr: u32,

    /// Delay since that RRTR in 1/65536 seconds
    pub delay_since_last_rr: u32,
}

/// Timing of the last accepted Sender Report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderReportTiming {
    /// Remote NTP timestamp carried by the SR
    pub sr_ntp: NtpTimestamp,

    /// Local NTP time when the SR arrived
    pub arrival_ntp: NtpTimestamp,

    /// RTP timestamp carried by the SR
    pub rtp_timestamp: u32,
}

/// RTT statistics for one reporting peer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RttSummary {
    /// Most recent sample in milliseconds
    pub last_ms: i64,

    /// Running average in milliseconds
    pub avg_ms: i64,

    /// Smallest sample seen
    pub min_ms: i64,

    /// Largest sample seen
    pub max_ms: i64,
}

/// One TMMBR request, timestamped for staleness aging
#[derive(Debug, Clone, Copy)]
struct TmmbrRequest {
    item: TmmbItem,
    received_ms: i64,
}

/// Per-remote-SSRC receive bookkeeping
#[derive(Debug, Default)]
struct ReceiveInfo {
    /// Wall clock of the last RTCP from this peer; zero marks pending delete
    last_time_received_ms: i64,

    /// TMMBR requests keyed by the effective requester SSRC
    tmmbr: HashMap<RtpSsrc, TmmbrRequest>,

    /// Bounding set from the last TMMBN
    tmmbn: Vec<TmmbItem>,

    last_fir_sequence_number: Option<u8>,
    last_fir_request_ms: i64,

    /// Set by BYE; the entry is collected on the next timer sweep
    ready_for_delete: bool,
}

impl ReceiveInfo {
    fn insert_tmmbr_item(&mut self, requester: RtpSsrc, item: TmmbItem, now_ms: i64) {
        self.tmmbr.insert(
            requester,
            TmmbrRequest {
                item,
                received_ms: now_ms,
            },
        );
    }

    /// Append the live TMMBR items to `out`, dropping stale entries
    fn get_tmmbr_set(&mut self, now_ms: i64, out: &mut Vec<TmmbItem>) {
        let stale_before_ms = now_ms - 5 * RTCP_INTERVAL_AUDIO_MS;
        self.tmmbr.retain(|_, request| {
            if request.received_ms < stale_before_ms {
                return false;
            }
            out.push(request.item);
            true
        });
    }
}

/// RTT bookkeeping for one `(source, reporter)` pair
#[derive(Debug, Default)]
struct ReportBlockStats {
    report_block: ReportBlockData,
    rtt_ms: i64,
    avg_rtt_ms: i64,
    min_rtt_ms: i64,
    max_rtt_ms: i64,
    num_average_calcs: u32,
    remote_max_jitter: u32,
}

/// Everything behind the session lock
struct ReceiverState {
    main_ssrc: RtpSsrc,
    remote_ssrc: RtpSsrc,
    registered_ssrcs: HashSet<RtpSsrc>,

    remote_sender_info: RtcpSenderInfo,
    last_received_sr_ntp: NtpTimestamp,

    remote_xr_receive_time_info: RtcpXrReceiveTimeInfo,
    last_received_xr_ntp: NtpTimestamp,
    xr_rrtr_status: bool,
    xr_rr_rtt_ms: i64,

    // source SSRC -> reporter SSRC -> stats
    received_report_blocks: HashMap<RtpSsrc, HashMap<RtpSsrc, ReportBlockStats>>,
    received_infos: HashMap<RtpSsrc, ReceiveInfo>,
    received_cnames: HashMap<RtpSsrc, [u8; RTCP_CNAME_SIZE]>,

    last_received_rr_ms: i64,
    last_increased_sequence_number_ms: i64,

    packet_type_counter: RtcpPacketTypeCounter,
    nack_stats: NackStats,

    num_skipped_packets: usize,
    last_skipped_packets_warning_ms: i64,
}

/// Construction-time configuration for [`RtcpReceiver`]
#[derive(Default)]
pub struct RtcpReceiverConfig {
    /// Receiver-only endpoints never compute RTT from inbound report blocks
    /// and suppress sender-side callbacks
    pub receiver_only: bool,

    /// Sink for bandwidth signals (REMB, TMMBR bounding sets, reports)
    pub bandwidth_observer: Option<Arc<dyn RtcpBandwidthObserver>>,

    /// Sink for keyframe-related feedback
    pub intra_frame_observer: Option<Arc<dyn RtcpIntraFrameObserver>>,

    /// Sink for transport-wide congestion control feedback
    pub transport_feedback_observer: Option<Arc<dyn TransportFeedbackObserver>>,

    /// Observer of the running packet-type counters
    pub packet_type_counter_observer: Option<Arc<dyn RtcpPacketTypeCounterObserver>>,
}

/// The RTCP reception core
pub struct RtcpReceiver {
    clock: Arc<dyn RtcpClock>,
    receiver_only: bool,
    owner: Arc<dyn RtcpModuleHooks>,

    bandwidth_observer: Option<Arc<dyn RtcpBandwidthObserver>>,
    intra_frame_observer: Option<Arc<dyn RtcpIntraFrameObserver>>,
    transport_feedback_observer: Option<Arc<dyn TransportFeedbackObserver>>,
    packet_type_counter_observer: Option<Arc<dyn RtcpPacketTypeCounterObserver>>,

    state: Mutex<ReceiverState>,
    stats_callback: Mutex<Option<Arc<dyn RtcpStatisticsCallback>>>,
}

impl RtcpReceiver {
    /// Create a receiver bound to its owning module
    pub fn new(
        clock: Arc<dyn RtcpClock>,
        config: RtcpReceiverConfig,
        owner: Arc<dyn RtcpModuleHooks>,
    ) -> Self {
        let start_ms = clock.now_ms();
        Self {
            clock,
            receiver_only: config.receiver_only,
            owner,
            bandwidth_observer: config.bandwidth_observer,
            intra_frame_observer: config.intra_frame_observer,
            transport_feedback_observer: config.transport_feedback_observer,
            packet_type_counter_observer: config.packet_type_counter_observer,
            state: Mutex::new(ReceiverState {
                main_ssrc: 0,
                remote_ssrc: 0,
                registered_ssrcs: HashSet::new(),
                remote_sender_info: RtcpSenderInfo::default(),
                last_received_sr_ntp: NtpTimestamp::default(),
                remote_xr_receive_time_info: RtcpXrReceiveTimeInfo::default(),
                last_received_xr_ntp: NtpTimestamp::default(),
                xr_rrtr_status: false,
                xr_rr_rtt_ms: 0,
                received_report_blocks: HashMap::new(),
                received_infos: HashMap::new(),
                received_cnames: HashMap::new(),
                last_received_rr_ms: 0,
                last_increased_sequence_number_ms: 0,
                packet_type_counter: RtcpPacketTypeCounter::default(),
                nack_stats: NackStats::new(),
                num_skipped_packets: 0,
                last_skipped_packets_warning_ms: start_ms,
            }),
            stats_callback: Mutex::new(None),
        }
    }

    fn state(&self) -> MutexGuard<'_, ReceiverState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn feedback(&self) -> MutexGuard<'_, Option<Arc<dyn RtcpStatisticsCallback>>> {
        self.stats_callback.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Parse one compound datagram and dispatch its events
    ///
    /// Returns `false` for an empty datagram or one whose first block does
    /// not carry a valid RTCP header; nothing is mutated in that case.
    pub fn incoming_packet(&self, packet: &[u8]) -> bool {
        if packet.is_empty() {
            warn!("incoming empty RTCP packet");
            return false;
        }

        let mut information = PacketInformation::default();
        if !self.parse_compound_packet(packet, &mut information) {
            return false;
        }
        self.trigger_callbacks(information);
        true
    }

    fn parse_compound_packet(&self, packet: &[u8], information: &mut PacketInformation) -> bool {
        let mut state = self.state();

        let mut first_block = true;
        for block in compound_blocks(packet) {
            let block = match block {
                Ok(block) => block,
                Err(_) if first_block => {
                    // Nothing was extracted from this datagram.
                    warn!("incoming invalid RTCP packet");
                    return false;
                }
                Err(_) => {
                    state.num_skipped_packets += 1;
                    break;
                }
            };
            first_block = false;

            if state.packet_type_counter.first_packet_time_ms.is_none() {
                state.packet_type_counter.first_packet_time_ms = Some(self.clock.now_ms());
            }

            match block.parse() {
                Ok(RtcpPacket::SenderReport(sr)) => {
                    self.handle_sender_report(&mut state, sr, information)
                }
                Ok(RtcpPacket::ReceiverReport(rr)) => {
                    self.handle_receiver_report(&mut state, rr, information)
                }
                Ok(RtcpPacket::SourceDescription(sdes)) => {
                    self.handle_sdes(&mut state, sdes, information)
                }
                Ok(RtcpPacket::Goodbye(bye)) => self.handle_bye(&mut state, bye),
                Ok(RtcpPacket::ExtendedReports(xr)) => self.handle_xr(&mut state, xr, information),
                Ok(RtcpPacket::Nack(nack)) => self.handle_nack(&mut state, nack, information),
                Ok(RtcpPacket::Tmmbr(tmmbr)) => self.handle_tmmbr(&mut state, tmmbr, information),
                Ok(RtcpPacket::Tmmbn(tmmbn)) => self.handle_tmmbn(&mut state, tmmbn, information),
                Ok(RtcpPacket::RapidResyncRequest(_)) => information.set(packet_type::SR_REQ),
                Ok(RtcpPacket::TransportFeedback(feedback)) => {
                    self.handle_transport_feedback(feedback, information)
                }
                Ok(RtcpPacket::Pli(pli)) => self.handle_pli(&mut state, pli, information),
                Ok(RtcpPacket::Sli(sli)) => self.handle_sli(sli, information),
                Ok(RtcpPacket::Rpsi(rpsi)) => self.handle_rpsi(rpsi, information),
                Ok(RtcpPacket::Fir(fir)) => self.handle_fir(&mut state, fir, information),
                Ok(RtcpPacket::Remb(remb)) => self.handle_remb(remb, information),
                Err(_) => state.num_skipped_packets += 1,
            }
        }

        if let Some(observer) = &self.packet_type_counter_observer {
            observer.rtcp_packet_types_counter_updated(state.main_ssrc, &state.packet_type_counter);
        }

        let now_ms = self.clock.now_ms();
        if now_ms - state.last_skipped_packets_warning_ms >= SKIP_WARN_INTERVAL_MS
            && state.num_skipped_packets > 0
        {
            warn!(
                "{} RTCP blocks were skipped due to being malformed or of \
                 unrecognized/unsupported type, during the past {} second period",
                state.num_skipped_packets,
                SKIP_WARN_INTERVAL_MS / 1000
            );
            state.last_skipped_packets_warning_ms = now_ms;
            state.num_skipped_packets = 0;
        }

        true
    }

    fn handle_sender_report(
        &self,
        state: &mut ReceiverState,
        sender_report: RtcpSenderReport,
        information: &mut PacketInformation,
    ) {
        let remote_ssrc = sender_report.sender_ssrc;
        information.remote_ssrc = remote_ssrc;

        if state.remote_ssrc == remote_ssrc {
            // Only signal an SR when it comes from the authoritative sender.
            information.set(packet_type::SR);

            state.remote_sender_info = RtcpSenderInfo {
                ntp_seconds: sender_report.ntp_timestamp.seconds,
                ntp_fraction: sender_report.ntp_timestamp.fraction,
                rtp_timestamp: sender_report.rtp_timestamp,
                send_packet_count: sender_report.sender_packet_count,
                send_octet_count: sender_report.sender_octet_count,
            };
            state.last_received_sr_ntp = self.clock.now_ntp();
        } else {
            // The send report of other sources is ignored, but their receive
            // blocks still count.
            information.set(packet_type::RR);
        }

        let now_ms = self.clock.now_ms();
        let receive_info = state.received_infos.entry(remote_ssrc).or_default();
        receive_info.last_time_received_ms = now_ms;

        for report_block in sender_report.report_blocks {
            self.handle_report_block(state, report_block, information, remote_ssrc);
        }
    }

    fn handle_receiver_report(
        &self,
        state: &mut ReceiverState,
        receiver_report: RtcpReceiverReport,
        information: &mut PacketInformation,
    ) {
        let remote_ssrc = receiver_report.sender_ssrc;
        information.remote_ssrc = remote_ssrc;
        information.set(packet_type::RR);

        let now_ms = self.clock.now_ms();
        let receive_info = state.received_infos.entry(remote_ssrc).or_default();
        receive_info.last_time_received_ms = now_ms;

        for report_block in receiver_report.report_blocks {
            self.handle_report_block(state, report_block, information, remote_ssrc);
        }
    }

    fn handle_report_block(
        &self,
        state: &mut ReceiverState,
        report_block: RtcpReportBlock,
        information: &mut PacketInformation,
        remote_ssrc: RtpSsrc,
    ) {
        // A report block pertains to one of our sources; everything else is
        // someone else's conversation.
        if !state.registered_ssrcs.contains(&report_block.source_ssrc) {
            return;
        }

        let now_ms = self.clock.now_ms();
        state.last_received_rr_ms = now_ms;

        let mut sequence_number_advanced = false;
        {
            let stats = state
                .received_report_blocks
                .entry(report_block.source_ssrc)
                .or_default()
                .entry(remote_ssrc)
                .or_default();

            if report_block.extended_high_seq_num > stats.report_block.extended_high_seq_num {
                // New RTP packets reached the remote side since its last RR.
                sequence_number_advanced = true;
            }

            stats.report_block = ReportBlockData {
                remote_ssrc,
                source_ssrc: report_block.source_ssrc,
                fraction_lost: report_block.fraction_lost,
                cumulative_lost: report_block.cumulative_lost,
                extended_high_seq_num: report_block.extended_high_seq_num,
                jitter: report_block.jitter,
                last_sr: report_block.last_sr,
                delay_since_last_sr: report_block.delay_since_last_sr,
            };

            if report_block.jitter > stats.remote_max_jitter {
                stats.remote_max_jitter = report_block.jitter;
            }

            // RFC 3550 section 6.4.1: a zero LSR means the reporter has not
            // seen an SR yet, so there is nothing to subtract from. A
            // receiver-only endpoint never sent the SR in the first place.
            let send_time = report_block.last_sr;
            if !self.receiver_only && send_time != 0 {
                let receive_time = self.clock.now_ntp().to_compact();
                let rtt_ntp = receive_time
                    .wrapping_sub(report_block.delay_since_last_sr)
                    .wrapping_sub(send_time);
                let rtt = compact_to_ms(rtt_ntp);

                if rtt > stats.max_rtt_ms {
                    stats.max_rtt_ms = rtt;
                }
                if stats.min_rtt_ms == 0 || rtt < stats.min_rtt_ms {
                    stats.min_rtt_ms = rtt;
                }
                stats.rtt_ms = rtt;

                if stats.num_average_calcs != 0 {
                    let count = stats.num_average_calcs as f64;
                    let new_average = (count / (count + 1.0)) * stats.avg_rtt_ms as f64
                        + (1.0 / (count + 1.0)) * rtt as f64;
                    stats.avg_rtt_ms = (new_average + 0.5) as i64;
                } else {
                    stats.avg_rtt_ms = rtt;
                }
                stats.num_average_calcs += 1;
            }

            information.rtt_ms = stats.rtt_ms;
            information.report_blocks.push(stats.report_block);
        }

        if sequence_number_advanced {
            state.last_increased_sequence_number_ms = now_ms;
        }
    }

    fn handle_sdes(
        &self,
        state: &mut ReceiverState,
        sdes: RtcpSourceDescription,
        information: &mut PacketInformation,
    ) {
        for chunk in &sdes.chunks {
            let Some(cname) = chunk.cname() else {
                continue;
            };

            let slot = state
                .received_cnames
                .entry(chunk.ssrc)
                .or_insert([0u8; RTCP_CNAME_SIZE]);
            let copy_len = cname.len().min(RTCP_CNAME_SIZE - 1);
            slot.fill(0);
            slot[..copy_len].copy_from_slice(&cname.as_bytes()[..copy_len]);

            let callback = self.feedback();
            if let Some(callback) = &*callback {
                callback.cname_changed(cname, chunk.ssrc);
            }
        }
        information.set(packet_type::SDES);
    }

    fn handle_bye(&self, state: &mut ReceiverState, bye: RtcpGoodbye) {
        let Some(sender_ssrc) = bye.sender_ssrc() else {
            return;
        };

        // Forget everything this reporter told us about our sources.
        for info_map in state.received_report_blocks.values_mut() {
            info_map.remove(&sender_ssrc);
        }

        // The receive info itself lingers until the next timer sweep so a
        // TMMBN refresh can still see it.
        if let Some(receive_info) = state.received_infos.get_mut(&sender_ssrc) {
            receive_info.ready_for_delete = true;
            receive_info.last_time_received_ms = 0;
        }

        state.received_cnames.remove(&sender_ssrc);
        state.xr_rr_rtt_ms = 0;
    }

    fn handle_xr(
        &self,
        state: &mut ReceiverState,
        xr: RtcpExtendedReports,
        information: &mut PacketInformation,
    ) {
        for rrtr in &xr.rrtrs {
            state.remote_xr_receive_time_info = RtcpXrReceiveTimeInfo {
                source_ssrc: xr.sender_ssrc,
                last_rr: rrtr.ntp.to_compact(),
                delay_since_last_rr: 0,
            };
            state.last_received_xr_ntp = self.clock.now_ntp();
            information.set(packet_type::XR_RECEIVER_REFERENCE_TIME);
        }

        for dlrr in &xr.dlrrs {
            for time_info in &dlrr.sub_blocks {
                if !state.registered_ssrcs.contains(&time_info.ssrc) {
                    continue;
                }
                information.set(packet_type::XR_DLRR_REPORT_BLOCK);

                // RTT over extended reports is opt-in.
                if !state.xr_rrtr_status {
                    continue;
                }
                // RFC 3611 section 4.5: zero LRR means no RRTR received yet.
                if time_info.last_rr == 0 {
                    continue;
                }

                let now = self.clock.now_ntp().to_compact();
                let rtt_ntp = now
                    .wrapping_sub(time_info.delay_since_last_rr)
                    .wrapping_sub(time_info.last_rr);
                state.xr_rr_rtt_ms = compact_to_ms(rtt_ntp);
            }
        }
    }

    fn handle_nack(
        &self,
        state: &mut ReceiverState,
        nack: RtcpNack,
        information: &mut PacketInformation,
    ) {
        if self.receiver_only || state.main_ssrc != nack.media_ssrc {
            // Not to us.
            return;
        }

        let packet_ids = nack.packet_ids();
        for &packet_id in &packet_ids {
            state.nack_stats.report_request(packet_id);
        }

        if !packet_ids.is_empty() {
            information.set(packet_type::NACK);
            state.packet_type_counter.nack_packets += 1;
            state.packet_type_counter.nack_requests = state.nack_stats.requests();
            state.packet_type_counter.unique_nack_requests = state.nack_stats.unique_requests();
        }
        information.nack_sequence_numbers = packet_ids;
    }

    fn handle_tmmbr(
        &self,
        state: &mut ReceiverState,
        tmmbr: RtcpTmmb,
        information: &mut PacketInformation,
    ) {
        // The requester must have announced itself through SR/RR before.
        if !state.received_infos.contains_key(&tmmbr.sender_ssrc) {
            return;
        }

        // media_ssrc SHOULD be zero unless a relay speaks for the requester.
        let requester = if tmmbr.media_ssrc != 0 {
            tmmbr.media_ssrc
        } else {
            tmmbr.sender_ssrc
        };

        let main_ssrc = state.main_ssrc;
        let now_ms = self.clock.now_ms();
        for request in &tmmbr.items {
            if request.ssrc == main_ssrc && request.bitrate_bps != 0 {
                if let Some(receive_info) = state.received_infos.get_mut(&tmmbr.sender_ssrc) {
                    receive_info.insert_tmmbr_item(requester, *request, now_ms);
                }
                information.set(packet_type::TMMBR);
            }
        }
    }

    fn handle_tmmbn(
        &self,
        state: &mut ReceiverState,
        tmmbn: RtcpTmmb,
        information: &mut PacketInformation,
    ) {
        let Some(receive_info) = state.received_infos.get_mut(&tmmbn.sender_ssrc) else {
            return;
        };
        information.set(packet_type::TMMBN);
        receive_info.tmmbn = tmmbn.items;
    }

    fn handle_transport_feedback(
        &self,
        feedback: TransportFeedback,
        information: &mut PacketInformation,
    ) {
        information.set(packet_type::TRANSPORT_FEEDBACK);
        information.transport_feedback = Some(feedback);
    }

    fn handle_pli(
        &self,
        state: &mut ReceiverState,
        pli: RtcpPli,
        information: &mut PacketInformation,
    ) {
        if state.main_ssrc == pli.media_ssrc {
            state.packet_type_counter.pli_packets += 1;
            // The remote needs a keyframe from us.
            information.set(packet_type::PLI);
        }
    }

    fn handle_sli(&self, sli: RtcpSli, information: &mut PacketInformation) {
        for entry in &sli.entries {
            // In theory several slices can be lost; the last picture id wins.
            information.set(packet_type::SLI);
            information.sli_picture_id = entry.picture_id;
        }
    }

    fn handle_rpsi(&self, rpsi: RtcpRpsi, information: &mut PacketInformation) {
        information.set(packet_type::RPSI);
        information.rpsi_picture_id = rpsi.picture_id;
    }

    fn handle_fir(
        &self,
        state: &mut ReceiverState,
        fir: RtcpFir,
        information: &mut PacketInformation,
    ) {
        for request in &fir.requests {
            // Is our sender asked to produce a keyframe?
            if request.ssrc != state.main_ssrc {
                continue;
            }

            state.packet_type_counter.fir_packets += 1;

            match state.received_infos.get_mut(&fir.sender_ssrc) {
                Some(receive_info) => {
                    // De-duplicate retransmitted requests by sequence number,
                    // and rate-limit distinct ones.
                    if receive_info.last_fir_sequence_number != Some(request.seq_nr) {
                        let now_ms = self.clock.now_ms();
                        if now_ms - receive_info.last_fir_request_ms > RTCP_MIN_FRAME_LENGTH_MS {
                            receive_info.last_fir_request_ms = now_ms;
                            receive_info.last_fir_sequence_number = Some(request.seq_nr);
                            information.set(packet_type::FIR);
                        }
                    }
                }
                None => {
                    // Unknown originator, honor the request as-is.
                    information.set(packet_type::FIR);
                }
            }
        }
    }

    fn handle_remb(&self, remb: RtcpRemb, information: &mut PacketInformation) {
        information.set(packet_type::REMB);
        information.receiver_estimated_max_bitrate_bps = remb.bitrate_bps;
    }

    /// Fan the accumulated events out to the observers, session lock released
    fn trigger_callbacks(&self, mut information: PacketInformation) {
        // Process TMMBR first so bandwidth consumers see a single coherent
        // estimate update for this datagram.
        if information.has(packet_type::TMMBR) {
            self.update_tmmbr();
        }

        let (local_ssrc, registered_ssrcs) = {
            let state = self.state();
            (state.main_ssrc, state.registered_ssrcs.clone())
        };

        if !self.receiver_only && information.has(packet_type::SR_REQ) {
            self.owner.on_request_send_report();
        }
        if !self.receiver_only
            && information.has(packet_type::NACK)
            && !information.nack_sequence_numbers.is_empty()
        {
            debug!(
                "incoming NACK length {}",
                information.nack_sequence_numbers.len()
            );
            self.owner
                .on_received_nack(&information.nack_sequence_numbers);
        }

        if let Some(observer) = &self.intra_frame_observer {
            if information.has(packet_type::PLI) || information.has(packet_type::FIR) {
                if information.has(packet_type::PLI) {
                    debug!("incoming PLI from SSRC {:#x}", information.remote_ssrc);
                } else {
                    debug!("incoming FIR from SSRC {:#x}", information.remote_ssrc);
                }
                observer.on_received_intra_frame_request(local_ssrc);
            }
            if information.has(packet_type::SLI) {
                observer.on_received_sli(local_ssrc, information.sli_picture_id);
            }
            if information.has(packet_type::RPSI) {
                observer.on_received_rpsi(local_ssrc, information.rpsi_picture_id);
            }
        }

        if let Some(observer) = &self.bandwidth_observer {
            if information.has(packet_type::REMB) {
                debug!(
                    "incoming REMB {} bps",
                    information.receiver_estimated_max_bitrate_bps
                );
                observer.on_received_estimated_bitrate(
                    information
                        .receiver_estimated_max_bitrate_bps
                        .min(u32::MAX as u64) as u32,
                );
            }
            if information.has(packet_type::SR) || information.has(packet_type::RR) {
                observer.on_received_rtcp_receiver_report(
                    &information.report_blocks,
                    information.rtt_ms,
                    self.clock.now_ms(),
                );
            }
        }

        if information.has(packet_type::SR) || information.has(packet_type::RR) {
            self.owner
                .on_received_rtcp_report_blocks(&information.report_blocks);
        }

        if let Some(observer) = &self.transport_feedback_observer {
            if let Some(feedback) = information.transport_feedback.take() {
                let media_ssrc = feedback.media_source_ssrc();
                if media_ssrc == local_ssrc || registered_ssrcs.contains(&media_ssrc) {
                    observer.on_transport_feedback(&feedback);
                }
            }
        }

        if !self.receiver_only {
            let callback = self.feedback();
            if let Some(callback) = &*callback {
                for block in &information.report_blocks {
                    let statistics = RtcpStatistics {
                        fraction_lost: block.fraction_lost,
                        cumulative_lost: block.cumulative_lost,
                        extended_max_sequence_number: block.extended_high_seq_num,
                        jitter: block.jitter,
                    };
                    callback.statistics_updated(&statistics, block.source_ssrc);
                }
            }
        }
    }

    /// Recompute the TMMBR bounding set and push it out
    pub fn update_tmmbr(&self) {
        let bounding = tmmbr::find_bounding_set(self.tmmbr_received());

        if !bounding.is_empty() {
            if let Some(observer) = &self.bandwidth_observer {
                if let Some(bitrate_bps) = tmmbr::calc_min_bitrate_bps(&bounding) {
                    if bitrate_bps <= u32::MAX as u64 {
                        observer.on_received_estimated_bitrate(bitrate_bps as u32);
                    }
                }
            }
        }

        // Inform the senders about the new bounding set.
        self.owner.set_tmmbn(bounding);
    }

    /// Live TMMBR requests across all peers, stale entries aged out
    pub fn tmmbr_received(&self) -> Vec<TmmbItem> {
        let mut state = self.state();
        let now_ms = self.clock.now_ms();
        let mut candidates = Vec::new();
        for receive_info in state.received_infos.values_mut() {
            receive_info.get_tmmbr_set(now_ms, &mut candidates);
        }
        candidates
    }

    /// Last TMMBN bounding set received from the authoritative remote, and
    /// whether our `main_ssrc` owns one of its entries
    pub fn bounding_set(&self) -> (Vec<TmmbItem>, bool) {
        let state = self.state();
        let Some(receive_info) = state.received_infos.get(&state.remote_ssrc) else {
            return (Vec::new(), false);
        };
        let owner = tmmbr::is_owner(&receive_info.tmmbn, state.main_ssrc);
        (receive_info.tmmbn.clone(), owner)
    }

    /// Reconfigure the local sender SSRC and the set of SSRCs considered ours
    ///
    /// The intra-frame observer learns about a changed `main_ssrc` outside
    /// the session lock.
    pub fn set_ssrcs(&self, main_ssrc: RtpSsrc, registered_ssrcs: &HashSet<RtpSsrc>) {
        let old_ssrc = {
            let mut state = self.state();
            let old_ssrc = state.main_ssrc;
            state.main_ssrc = main_ssrc;
            state.registered_ssrcs = registered_ssrcs.clone();
            old_ssrc
        };

        if old_ssrc != main_ssrc {
            if let Some(observer) = &self.intra_frame_observer {
                observer.on_local_ssrc_changed(old_ssrc, main_ssrc);
            }
        }
    }

    /// Designate the remote whose Sender Report is authoritative
    ///
    /// Stale sender info from the previous remote is discarded.
    pub fn set_remote_ssrc(&self, ssrc: RtpSsrc) {
        let mut state = self.state();
        state.remote_sender_info = RtcpSenderInfo::default();
        state.last_received_sr_ntp = NtpTimestamp::default();
        state.remote_ssrc = ssrc;
    }

    /// The currently authoritative remote SSRC
    pub fn remote_ssrc(&self) -> RtpSsrc {
        self.state().remote_ssrc
    }

    /// Copy the CNAME of `remote_ssrc` into `out`
    ///
    /// The output is always NUL-terminated. Fails when the source is unknown.
    pub fn cname(&self, remote_ssrc: RtpSsrc, out: &mut [u8; RTCP_CNAME_SIZE]) -> bool {
        let state = self.state();
        let Some(stored) = state.received_cnames.get(&remote_ssrc) else {
            return false;
        };
        out.copy_from_slice(stored);
        out[RTCP_CNAME_SIZE - 1] = 0;
        true
    }

    /// Timing of the last accepted SR, `None` until one arrives
    pub fn ntp(&self) -> Option<SenderReportTiming> {
        let state = self.state();
        if state.last_received_sr_ntp.seconds == 0 {
            return None;
        }
        Some(SenderReportTiming {
            sr_ntp: NtpTimestamp {
                seconds: state.remote_sender_info.ntp_seconds,
                fraction: state.remote_sender_info.ntp_fraction,
            },
            arrival_ntp: state.last_received_sr_ntp,
            rtp_timestamp: state.remote_sender_info.rtp_timestamp,
        })
    }

    /// Receive-time info to echo back in our own DLRR (RFC 3611)
    pub fn last_received_xr_reference_time_info(&self) -> Option<RtcpXrReceiveTimeInfo> {
        let state = self.state();
        if state.last_received_xr_ntp.seconds == 0 && state.last_received_xr_ntp.fraction == 0 {
            return None;
        }

        let receive_time = state.last_received_xr_ntp.to_compact();
        let now = self.clock.now_ntp().to_compact();

        Some(RtcpXrReceiveTimeInfo {
            source_ssrc: state.remote_xr_receive_time_info.source_ssrc,
            last_rr: state.remote_xr_receive_time_info.last_rr,
            delay_since_last_rr: now.wrapping_sub(receive_time),
        })
    }

    /// RTT statistics derived from `remote_ssrc`'s reports about `main_ssrc`
    pub fn rtt(&self, remote_ssrc: RtpSsrc) -> Option<RttSummary> {
        let state = self.state();
        let stats = state
            .received_report_blocks
            .get(&state.main_ssrc)?
            .get(&remote_ssrc)?;
        Some(RttSummary {
            last_ms: stats.rtt_ms,
            avg_ms: stats.avg_rtt_ms,
            min_ms: stats.min_rtt_ms,
            max_ms: stats.max_rtt_ms,
        })
    }

    /// Sender info from the last accepted SR, `None` until one arrives
    pub fn sender_info_received(&self) -> Option<RtcpSenderInfo> {
        let state = self.state();
        if state.last_received_sr_ntp.seconds == 0 {
            return None;
        }
        Some(state.remote_sender_info)
    }

    /// All stored report blocks, across every source and reporter
    pub fn statistics_received(&self) -> Vec<ReportBlockData> {
        let state = self.state();
        let mut blocks = Vec::new();
        for info_map in state.received_report_blocks.values() {
            for stats in info_map.values() {
                blocks.push(stats.report_block);
            }
        }
        blocks
    }

    /// Enable RTT computation from XR DLRR blocks
    pub fn set_rtcp_xr_rrtr_status(&self, enable: bool) {
        self.state().xr_rrtr_status = enable;
    }

    /// Destructive read of the last DLRR-derived RTT estimate
    pub fn get_and_reset_xr_rr_rtt(&self) -> Option<i64> {
        let mut state = self.state();
        if state.xr_rr_rtt_ms == 0 {
            return None;
        }
        let rtt_ms = state.xr_rr_rtt_ms;
        state.xr_rr_rtt_ms = 0;
        Some(rtt_ms)
    }

    /// Wall clock of the most recent RTCP from any peer
    pub fn last_received_receiver_report_ms(&self) -> Option<i64> {
        let state = self.state();
        state
            .received_infos
            .values()
            .map(|info| info.last_time_received_ms)
            .max()
    }

    /// True once when no RR arrived for `RR_TIMEOUT_INTERVALS` intervals
    ///
    /// Consumes the signal; it re-arms when the next RR arrives.
    pub fn rtcp_rr_timeout(&self, rtcp_interval_ms: i64) -> bool {
        let mut state = self.state();
        if state.last_received_rr_ms == 0 {
            return false;
        }

        let timeout_ms = RR_TIMEOUT_INTERVALS * rtcp_interval_ms;
        if self.clock.now_ms() > state.last_received_rr_ms + timeout_ms {
            // Fire exactly once per timeout.
            state.last_received_rr_ms = 0;
            return true;
        }
        false
    }

    /// True once when the remote's extended highest sequence number has not
    /// advanced for `RR_TIMEOUT_INTERVALS` intervals
    pub fn rtcp_rr_sequence_number_timeout(&self, rtcp_interval_ms: i64) -> bool {
        let mut state = self.state();
        if state.last_increased_sequence_number_ms == 0 {
            return false;
        }

        let timeout_ms = RR_TIMEOUT_INTERVALS * rtcp_interval_ms;
        if self.clock.now_ms() > state.last_increased_sequence_number_ms + timeout_ms {
            state.last_increased_sequence_number_ms = 0;
            return true;
        }
        false
    }

    /// Age the receive-info table: clear TMMBR state of silent peers and
    /// collect entries whose BYE has been processed
    ///
    /// Returns whether the TMMBN bounding set should be refreshed.
    pub fn update_rtcp_receive_information_timers(&self) -> bool {
        let mut state = self.state();
        let now_ms = self.clock.now_ms();
        let mut update_bounding_set = false;

        state.received_infos.retain(|_, receive_info| {
            if receive_info.last_time_received_ms > 0 {
                // The audio interval bounds the staleness window since the
                // remote's actual reporting interval is unknown.
                if now_ms - receive_info.last_time_received_ms > 5 * RTCP_INTERVAL_AUDIO_MS {
                    receive_info.tmmbr.clear();
                    receive_info.last_time_received_ms = 0;
                    update_bounding_set = true;
                }
                true
            } else {
                !receive_info.ready_for_delete
            }
        });

        update_bounding_set
    }

    /// Register (or clear) the statistics callback
    pub fn register_rtcp_statistics_callback(
        &self,
        callback: Option<Arc<dyn RtcpStatisticsCallback>>,
    ) {
        *self.feedback() = callback;
    }

    /// The registered statistics callback, if any
    pub fn rtcp_statistics_callback(&self) -> Option<Arc<dyn RtcpStatisticsCallback>> {
        self.feedback().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{
        ms_to_compact, Dlrr, FirRequest, NackPair, ReceiveTimeInfo, Rrtr, RtcpSdesChunk,
        RtcpSdesItem, SliEntry,
    };
    use crate::time::SimulatedClock;

    const MAIN_SSRC: RtpSsrc = 0xCAFE;
    const REMOTE_SSRC: RtpSsrc = 0xBEEF;

    #[derive(Default)]
    struct RecordingOwner {
        tmmbn_sets: Mutex<Vec<Vec<TmmbItem>>>,
        send_report_requests: Mutex<u32>,
        nacks: Mutex<Vec<Vec<u16>>>,
        report_block_batches: Mutex<Vec<Vec<ReportBlockData>>>,
    }

    impl RtcpModuleHooks for RecordingOwner {
        fn set_tmmbn(&self, bounding_set: Vec<TmmbItem>) {
            self.tmmbn_sets.lock().unwrap().push(bounding_set);
        }
        fn on_request_send_report(&self) {
            *self.send_report_requests.lock().unwrap() += 1;
        }
        fn on_received_nack(&self, nack_sequence_numbers: &[u16]) {
            self.nacks.lock().unwrap().push(nack_sequence_numbers.to_vec());
        }
        fn on_received_rtcp_report_blocks(&self, report_blocks: &[ReportBlockData]) {
            self.report_block_batches
                .lock()
                .unwrap()
                .push(report_blocks.to_vec());
        }
    }

    #[derive(Default)]
    struct RecordingBandwidthObserver {
        estimates: Mutex<Vec<u32>>,
        reports: Mutex<Vec<(Vec<ReportBlockData>, i64, i64)>>,
    }

    impl RtcpBandwidthObserver for RecordingBandwidthObserver {
        fn on_received_estimated_bitrate(&self, bitrate_bps: u32) {
            self.estimates.lock().unwrap().push(bitrate_bps);
        }
        fn on_received_rtcp_receiver_report(
            &self,
            report_blocks: &[ReportBlockData],
            rtt_ms: i64,
            now_ms: i64,
        ) {
            self.reports
                .lock()
                .unwrap()
                .push((report_blocks.to_vec(), rtt_ms, now_ms));
        }
    }

    #[derive(Default)]
    struct RecordingIntraFrameObserver {
        intra_frame_requests: Mutex<Vec<RtpSsrc>>,
        slis: Mutex<Vec<(RtpSsrc, u8)>>,
        rpsis: Mutex<Vec<(RtpSsrc, u64)>>,
        ssrc_changes: Mutex<Vec<(RtpSsrc, RtpSsrc)>>,
    }

    impl RtcpIntraFrameObserver for RecordingIntraFrameObserver {
        fn on_received_intra_frame_request(&self, ssrc: RtpSsrc) {
            self.intra_frame_requests.lock().unwrap().push(ssrc);
        }
        fn on_received_sli(&self, ssrc: RtpSsrc, picture_id: u8) {
            self.slis.lock().unwrap().push((ssrc, picture_id));
        }
        fn on_received_rpsi(&self, ssrc: RtpSsrc, picture_id: u64) {
            self.rpsis.lock().unwrap().push((ssrc, picture_id));
        }
        fn on_local_ssrc_changed(&self, old_ssrc: RtpSsrc, new_ssrc: RtpSsrc) {
            self.ssrc_changes.lock().unwrap().push((old_ssrc, new_ssrc));
        }
    }

    #[derive(Default)]
    struct RecordingTransportFeedbackObserver {
        feedbacks: Mutex<Vec<TransportFeedback>>,
    }

    impl TransportFeedbackObserver for RecordingTransportFeedbackObserver {
        fn on_transport_feedback(&self, feedback: &TransportFeedback) {
            self.feedbacks.lock().unwrap().push(feedback.clone());
        }
    }

    #[derive(Default)]
    struct RecordingStatsCallback {
        updates: Mutex<Vec<(RtcpStatistics, RtpSsrc)>>,
        cnames: Mutex<Vec<(String, RtpSsrc)>>,
    }

    impl RtcpStatisticsCallback for RecordingStatsCallback {
        fn statistics_updated(&self, statistics: &RtcpStatistics, ssrc: RtpSsrc) {
            self.updates.lock().unwrap().push((*statistics, ssrc));
        }
        fn cname_changed(&self, cname: &str, ssrc: RtpSsrc) {
            self.cnames.lock().unwrap().push((cname.to_string(), ssrc));
        }
    }

    struct Harness {
        clock: Arc<SimulatedClock>,
        receiver: RtcpReceiver,
        owner: Arc<RecordingOwner>,
        bandwidth: Arc<RecordingBandwidthObserver>,
        intra_frame: Arc<RecordingIntraFrameObserver>,
        transport: Arc<RecordingTransportFeedbackObserver>,
    }

    fn harness(receiver_only: bool) -> Harness {
        let clock = Arc::new(SimulatedClock::new(1_000));
        let owner = Arc::new(RecordingOwner::default());
        let bandwidth = Arc::new(RecordingBandwidthObserver::default());
        let intra_frame = Arc::new(RecordingIntraFrameObserver::default());
        let transport = Arc::new(RecordingTransportFeedbackObserver::default());

        let receiver = RtcpReceiver::new(
            clock.clone(),
            RtcpReceiverConfig {
                receiver_only,
                bandwidth_observer: Some(bandwidth.clone()),
                intra_frame_observer: Some(intra_frame.clone()),
                transport_feedback_observer: Some(transport.clone()),
                packet_type_counter_observer: None,
            },
            owner.clone(),
        );
        receiver.set_ssrcs(MAIN_SSRC, &HashSet::from([MAIN_SSRC]));
        receiver.set_remote_ssrc(REMOTE_SSRC);

        Harness {
            clock,
            receiver,
            owner,
            bandwidth,
            intra_frame,
            transport,
        }
    }

    fn wire(packet: RtcpPacket) -> Vec<u8> {
        packet.serialize().unwrap().to_vec()
    }

    fn inject(h: &Harness, packet: RtcpPacket) {
        assert!(h.receiver.incoming_packet(&wire(packet)));
    }

    fn sr_from(h: &Harness, ssrc: RtpSsrc) -> RtcpSenderReport {
        let mut sr = RtcpSenderReport::new(ssrc);
        sr.ntp_timestamp = h.clock.now_ntp();
        sr
    }

    fn rr_with_block(last_sr: u32, delay_ms: i64, seq: u32) -> RtcpReceiverReport {
        let mut rr = RtcpReceiverReport::new(REMOTE_SSRC);
        rr.report_blocks.push(RtcpReportBlock {
            source_ssrc: MAIN_SSRC,
            fraction_lost: 0,
            cumulative_lost: 0,
            extended_high_seq_num: seq,
            jitter: 0,
            last_sr,
            delay_since_last_sr: ms_to_compact(delay_ms),
        });
        rr
    }

    #[test]
    fn test_empty_and_garbage_datagrams_rejected() {
        let h = harness(false);
        assert!(!h.receiver.incoming_packet(&[]));
        assert!(!h.receiver.incoming_packet(&[0x55; 40]));
        assert!(h.receiver.statistics_received().is_empty());
    }

    // S1: SR then RR yields an RTT of ~100 ms.
    #[test]
    fn test_sr_then_rr_round_trip_rtt() {
        let h = harness(false);

        let sr = sr_from(&h, REMOTE_SSRC);
        let sent_ntp = sr.ntp_timestamp;
        inject(&h, RtcpPacket::SenderReport(sr));

        h.clock.advance(200);
        inject(
            &h,
            RtcpPacket::ReceiverReport(rr_with_block(sent_ntp.to_compact(), 100, 1)),
        );

        let rtt = h.receiver.rtt(REMOTE_SSRC).unwrap();
        assert!((rtt.last_ms - 100).abs() <= 1, "last={}", rtt.last_ms);
        assert_eq!(rtt.last_ms, rtt.min_ms);
        assert_eq!(rtt.last_ms, rtt.max_ms);
        assert_eq!(rtt.last_ms, rtt.avg_ms);
    }

    #[test]
    fn test_rtt_min_avg_max_ordering() {
        let h = harness(false);

        let sr = sr_from(&h, REMOTE_SSRC);
        let sent_ntp = sr.ntp_timestamp;
        inject(&h, RtcpPacket::SenderReport(sr));

        // Three samples at 100, 300 and 200 ms.
        for (elapsed, delay) in [(200, 100), (500, 200), (800, 600)] {
            h.clock.set(1_000 + elapsed);
            inject(
                &h,
                RtcpPacket::ReceiverReport(rr_with_block(
                    sent_ntp.to_compact(),
                    delay,
                    elapsed as u32,
                )),
            );
        }

        let rtt = h.receiver.rtt(REMOTE_SSRC).unwrap();
        assert!(rtt.min_ms > 0);
        assert!(rtt.min_ms <= rtt.avg_ms && rtt.avg_ms <= rtt.max_ms);
        // mean(100, 300, 200) = 200 within rounding drift
        assert!((rtt.avg_ms - 200).abs() <= 1, "avg={}", rtt.avg_ms);
        assert!((rtt.min_ms - 100).abs() <= 1);
        assert!((rtt.max_ms - 300).abs() <= 1);
    }

    #[test]
    fn test_receiver_only_never_computes_rtt() {
        let h = harness(true);

        let sr = sr_from(&h, REMOTE_SSRC);
        let sent_ntp = sr.ntp_timestamp;
        inject(&h, RtcpPacket::SenderReport(sr));
        h.clock.advance(200);
        inject(
            &h,
            RtcpPacket::ReceiverReport(rr_with_block(sent_ntp.to_compact(), 100, 1)),
        );

        let rtt = h.receiver.rtt(REMOTE_SSRC).unwrap();
        assert_eq!(rtt.last_ms, 0);
        assert_eq!(rtt.max_ms, 0);
    }

    #[test]
    fn test_report_block_for_unregistered_source_dropped() {
        let h = harness(false);

        let mut rr = RtcpReceiverReport::new(REMOTE_SSRC);
        rr.report_blocks.push(RtcpReportBlock {
            source_ssrc: 0x1234, // not ours
            ..Default::default()
        });
        inject(&h, RtcpPacket::ReceiverReport(rr));

        assert!(h.receiver.statistics_received().is_empty());
        // The RR callback still fires, with an empty batch.
        assert_eq!(h.owner.report_block_batches.lock().unwrap().len(), 1);
        assert!(h.owner.report_block_batches.lock().unwrap()[0].is_empty());
    }

    // S2: sequence-number progress timeout fires once.
    #[test]
    fn test_sequence_number_timeout_one_shot() {
        let h = harness(false);

        inject(&h, RtcpPacket::ReceiverReport(rr_with_block(0, 0, 1)));
        let t0 = h.clock.now_ms();

        // Within the window: no timeout.
        h.clock.set(t0 + 150);
        assert!(!h.receiver.rtcp_rr_sequence_number_timeout(50));

        // Past the window: fires exactly once.
        h.clock.set(t0 + 151);
        assert!(h.receiver.rtcp_rr_sequence_number_timeout(50));
        assert!(!h.receiver.rtcp_rr_sequence_number_timeout(50));

        // A report with the same extended sequence number does not re-arm.
        inject(&h, RtcpPacket::ReceiverReport(rr_with_block(0, 0, 1)));
        h.clock.advance(1_000);
        assert!(!h.receiver.rtcp_rr_sequence_number_timeout(50));

        // A higher sequence number re-arms the timer.
        inject(&h, RtcpPacket::ReceiverReport(rr_with_block(0, 0, 2)));
        h.clock.advance(1_000);
        assert!(h.receiver.rtcp_rr_sequence_number_timeout(50));
    }

    #[test]
    fn test_rr_timeout_one_shot() {
        let h = harness(false);
        assert!(!h.receiver.rtcp_rr_timeout(50));

        inject(&h, RtcpPacket::ReceiverReport(rr_with_block(0, 0, 1)));
        h.clock.advance(149);
        assert!(!h.receiver.rtcp_rr_timeout(50));
        h.clock.advance(2);
        assert!(h.receiver.rtcp_rr_timeout(50));
        assert!(!h.receiver.rtcp_rr_timeout(50));

        // The next RR re-arms it.
        inject(&h, RtcpPacket::ReceiverReport(rr_with_block(0, 0, 2)));
        h.clock.advance(151);
        assert!(h.receiver.rtcp_rr_timeout(50));
    }

    // S3: a malformed middle block stops the walk but keeps earlier effects.
    #[test]
    fn test_malformed_tail_stops_at_corrupt_block() {
        let h = harness(false);

        let mut compound = wire(RtcpPacket::ReceiverReport(rr_with_block(0, 0, 7)));

        // An XR whose length field lies far past the end.
        let mut xr = RtcpExtendedReports::new(REMOTE_SSRC);
        xr.rrtrs.push(Rrtr {
            ntp: NtpTimestamp::new(1, 2),
        });
        let mut xr_wire = wire(RtcpPacket::ExtendedReports(xr));
        xr_wire[3] = 0xFF;
        compound.extend_from_slice(&xr_wire);
        compound.extend_from_slice(&wire(RtcpPacket::Goodbye(RtcpGoodbye::new(REMOTE_SSRC))));

        assert!(h.receiver.incoming_packet(&compound));

        // The RR took effect...
        assert_eq!(h.receiver.statistics_received().len(), 1);
        // ...and the BYE did not: the report-block entry survived.
        assert_eq!(h.receiver.statistics_received()[0].remote_ssrc, REMOTE_SSRC);
        assert_eq!(h.receiver.state().num_skipped_packets, 1);
    }

    // S4: BYE flags the entry; the next sweep collects it.
    #[test]
    fn test_bye_then_timer_sweep_collects_entry() {
        let h = harness(false);

        inject(&h, RtcpPacket::SenderReport(sr_from(&h, REMOTE_SSRC)));
        assert_eq!(h.receiver.statistics_received().len(), 0);
        assert!(h.receiver.state().received_infos.contains_key(&REMOTE_SSRC));

        inject(&h, RtcpPacket::Goodbye(RtcpGoodbye::new(REMOTE_SSRC)));
        {
            let state = h.receiver.state();
            let info = state.received_infos.get(&REMOTE_SSRC).unwrap();
            assert!(info.ready_for_delete);
            assert_eq!(info.last_time_received_ms, 0);
        }

        assert!(!h.receiver.update_rtcp_receive_information_timers());
        assert!(!h.receiver.state().received_infos.contains_key(&REMOTE_SSRC));
    }

    #[test]
    fn test_bye_purges_report_blocks_and_cname() {
        let h = harness(false);

        inject(&h, RtcpPacket::ReceiverReport(rr_with_block(0, 0, 1)));
        let mut chunk = RtcpSdesChunk::new(REMOTE_SSRC);
        chunk
            .items
            .push(RtcpSdesItem::cname("peer@example.com".to_string()));
        inject(
            &h,
            RtcpPacket::SourceDescription(RtcpSourceDescription {
                chunks: vec![chunk],
            }),
        );

        assert_eq!(h.receiver.statistics_received().len(), 1);
        let mut buf = [0u8; RTCP_CNAME_SIZE];
        assert!(h.receiver.cname(REMOTE_SSRC, &mut buf));

        inject(&h, RtcpPacket::Goodbye(RtcpGoodbye::new(REMOTE_SSRC)));

        assert!(h.receiver.statistics_received().is_empty());
        assert!(!h.receiver.cname(REMOTE_SSRC, &mut buf));
    }

    // S5: TMMBR aggregation and fan-out.
    #[test]
    fn test_tmmbr_fan_out() {
        let h = harness(false);

        let requesters = [(0x1001u32, 500_000u64), (0x1002, 800_000), (0x1003, 1_200_000)];
        for (ssrc, bitrate) in requesters {
            // A requester must have announced itself first.
            inject(&h, RtcpPacket::ReceiverReport(RtcpReceiverReport::new(ssrc)));
            inject(
                &h,
                RtcpPacket::Tmmbr(RtcpTmmb {
                    sender_ssrc: ssrc,
                    media_ssrc: 0,
                    items: vec![TmmbItem {
                        ssrc: MAIN_SSRC,
                        bitrate_bps: bitrate,
                        packet_overhead: 40,
                    }],
                }),
            );
        }

        let mut received = h.receiver.tmmbr_received();
        received.sort_by_key(|item| item.bitrate_bps);
        assert_eq!(received.len(), 3);
        assert_eq!(received[0].bitrate_bps, 500_000);
        assert_eq!(received[2].bitrate_bps, 1_200_000);

        // Each accepted TMMBR triggered an update; the final estimate is the
        // bounding-set minimum, and the owner saw the bounding set.
        let estimates = h.bandwidth.estimates.lock().unwrap();
        assert_eq!(*estimates.last().unwrap(), 500_000);
        let tmmbn_sets = h.owner.tmmbn_sets.lock().unwrap();
        let last_set = tmmbn_sets.last().unwrap();
        assert_eq!(last_set.len(), 1);
        assert_eq!(last_set[0].bitrate_bps, 500_000);
    }

    #[test]
    fn test_tmmbr_requires_prior_receive_info() {
        let h = harness(false);

        inject(
            &h,
            RtcpPacket::Tmmbr(RtcpTmmb {
                sender_ssrc: 0x9999, // never announced
                media_ssrc: 0,
                items: vec![TmmbItem {
                    ssrc: MAIN_SSRC,
                    bitrate_bps: 1_000_000,
                    packet_overhead: 40,
                }],
            }),
        );

        assert!(h.receiver.tmmbr_received().is_empty());
        assert!(h.owner.tmmbn_sets.lock().unwrap().is_empty());
    }

    #[test]
    fn test_stale_tmmbr_entries_age_out() {
        let h = harness(false);

        inject(
            &h,
            RtcpPacket::ReceiverReport(RtcpReceiverReport::new(0x1001)),
        );
        inject(
            &h,
            RtcpPacket::Tmmbr(RtcpTmmb {
                sender_ssrc: 0x1001,
                media_ssrc: 0,
                items: vec![TmmbItem {
                    ssrc: MAIN_SSRC,
                    bitrate_bps: 1_000_000,
                    packet_overhead: 40,
                }],
            }),
        );
        assert_eq!(h.receiver.tmmbr_received().len(), 1);

        h.clock.advance(5 * RTCP_INTERVAL_AUDIO_MS + 1);
        assert!(h.receiver.tmmbr_received().is_empty());
    }

    #[test]
    fn test_tmmbn_stored_and_bounding_set_query() {
        let h = harness(false);

        inject(&h, RtcpPacket::SenderReport(sr_from(&h, REMOTE_SSRC)));
        inject(
            &h,
            RtcpPacket::Tmmbn(RtcpTmmb {
                sender_ssrc: REMOTE_SSRC,
                media_ssrc: 0,
                items: vec![TmmbItem {
                    ssrc: MAIN_SSRC,
                    bitrate_bps: 640_000,
                    packet_overhead: 40,
                }],
            }),
        );

        let (set, owner) = h.receiver.bounding_set();
        assert_eq!(set.len(), 1);
        assert!(owner);

        // A TMMBN from a non-authoritative peer is stored on that peer's
        // entry and does not show up here.
        inject(
            &h,
            RtcpPacket::ReceiverReport(RtcpReceiverReport::new(0x7777)),
        );
        inject(
            &h,
            RtcpPacket::Tmmbn(RtcpTmmb {
                sender_ssrc: 0x7777,
                media_ssrc: 0,
                items: vec![TmmbItem {
                    ssrc: 0x8888,
                    bitrate_bps: 1,
                    packet_overhead: 1,
                }],
            }),
        );
        let (set, owner) = h.receiver.bounding_set();
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].bitrate_bps, 640_000);
        assert!(owner);
    }

    // S6: XR RRTR/DLRR round trip with a destructive RTT read.
    #[test]
    fn test_xr_dlrr_rtt() {
        let h = harness(false);
        h.receiver.set_rtcp_xr_rrtr_status(true);

        let t0 = h.clock.now_ntp();
        let mut xr = RtcpExtendedReports::new(REMOTE_SSRC);
        xr.rrtrs.push(Rrtr { ntp: t0 });
        inject(&h, RtcpPacket::ExtendedReports(xr));

        h.clock.advance(150);
        let mut xr = RtcpExtendedReports::new(REMOTE_SSRC);
        xr.dlrrs.push(Dlrr {
            sub_blocks: vec![ReceiveTimeInfo {
                ssrc: MAIN_SSRC,
                last_rr: t0.to_compact(),
                delay_since_last_rr: ms_to_compact(50),
            }],
        });
        inject(&h, RtcpPacket::ExtendedReports(xr));

        let rtt = h.receiver.get_and_reset_xr_rr_rtt().unwrap();
        assert!((rtt - 100).abs() <= 1, "rtt={rtt}");
        // Destructive read.
        assert!(h.receiver.get_and_reset_xr_rr_rtt().is_none());
    }

    #[test]
    fn test_xr_dlrr_needs_opt_in() {
        let h = harness(false);

        let t0 = h.clock.now_ntp();
        h.clock.advance(150);
        let mut xr = RtcpExtendedReports::new(REMOTE_SSRC);
        xr.dlrrs.push(Dlrr {
            sub_blocks: vec![ReceiveTimeInfo {
                ssrc: MAIN_SSRC,
                last_rr: t0.to_compact(),
                delay_since_last_rr: ms_to_compact(50),
            }],
        });
        inject(&h, RtcpPacket::ExtendedReports(xr));

        assert!(h.receiver.get_and_reset_xr_rr_rtt().is_none());
    }

    #[test]
    fn test_xr_rrtr_reference_time_info() {
        let h = harness(false);
        assert!(h.receiver.last_received_xr_reference_time_info().is_none());

        let t0 = h.clock.now_ntp();
        let mut xr = RtcpExtendedReports::new(REMOTE_SSRC);
        xr.rrtrs.push(Rrtr { ntp: t0 });
        inject(&h, RtcpPacket::ExtendedReports(xr));

        h.clock.advance(500);
        let info = h.receiver.last_received_xr_reference_time_info().unwrap();
        assert_eq!(info.source_ssrc, REMOTE_SSRC);
        assert_eq!(info.last_rr, t0.to_compact());
        assert_eq!(compact_to_ms(info.delay_since_last_rr), 500);
    }

    #[test]
    fn test_ntp_requires_sender_report() {
        let h = harness(false);
        assert!(h.receiver.ntp().is_none());
        assert!(h.receiver.sender_info_received().is_none());

        let mut sr = sr_from(&h, REMOTE_SSRC);
        sr.rtp_timestamp = 0x1234;
        sr.sender_packet_count = 50;
        let sent_ntp = sr.ntp_timestamp;
        inject(&h, RtcpPacket::SenderReport(sr));

        let timing = h.receiver.ntp().unwrap();
        assert_eq!(timing.sr_ntp, sent_ntp);
        assert_eq!(timing.rtp_timestamp, 0x1234);

        let info = h.receiver.sender_info_received().unwrap();
        assert_eq!(info.send_packet_count, 50);
    }

    // Invariant 6: changing the remote resets sender info.
    #[test]
    fn test_set_remote_ssrc_resets_sender_info() {
        let h = harness(false);

        inject(&h, RtcpPacket::SenderReport(sr_from(&h, REMOTE_SSRC)));
        assert!(h.receiver.sender_info_received().is_some());

        h.receiver.set_remote_ssrc(0x4444);
        assert_eq!(h.receiver.remote_ssrc(), 0x4444);
        assert!(h.receiver.sender_info_received().is_none());
        assert!(h.receiver.ntp().is_none());

        // An SR from the old remote no longer counts as authoritative.
        inject(&h, RtcpPacket::SenderReport(sr_from(&h, REMOTE_SSRC)));
        assert!(h.receiver.sender_info_received().is_none());

        // One from the new remote does.
        inject(&h, RtcpPacket::SenderReport(sr_from(&h, 0x4444)));
        assert!(h.receiver.sender_info_received().is_some());
    }

    #[test]
    fn test_cname_null_terminated_and_truncated() {
        let h = harness(false);

        // The longest CNAME an SDES item can carry, exactly filling the slot.
        let long_name = "x".repeat(RTCP_CNAME_SIZE - 1);
        let mut chunk = RtcpSdesChunk::new(REMOTE_SSRC);
        chunk.items.push(RtcpSdesItem::cname(long_name));
        inject(
            &h,
            RtcpPacket::SourceDescription(RtcpSourceDescription {
                chunks: vec![chunk],
            }),
        );

        let mut buf = [0xAAu8; RTCP_CNAME_SIZE];
        assert!(h.receiver.cname(REMOTE_SSRC, &mut buf));
        assert_eq!(buf[RTCP_CNAME_SIZE - 1], 0);
        assert!(buf[..RTCP_CNAME_SIZE - 1].iter().all(|&b| b == b'x'));

        assert!(!h.receiver.cname(0x5555, &mut buf));
    }

    #[test]
    fn test_sdes_notifies_statistics_callback() {
        let h = harness(false);
        let stats = Arc::new(RecordingStatsCallback::default());
        h.receiver
            .register_rtcp_statistics_callback(Some(stats.clone()));
        assert!(h.receiver.rtcp_statistics_callback().is_some());

        let mut chunk = RtcpSdesChunk::new(REMOTE_SSRC);
        chunk
            .items
            .push(RtcpSdesItem::cname("peer@example.com".to_string()));
        inject(
            &h,
            RtcpPacket::SourceDescription(RtcpSourceDescription {
                chunks: vec![chunk],
            }),
        );

        let cnames = stats.cnames.lock().unwrap();
        assert_eq!(cnames.len(), 1);
        assert_eq!(cnames[0], ("peer@example.com".to_string(), REMOTE_SSRC));
    }

    #[test]
    fn test_statistics_callback_per_report_block() {
        let h = harness(false);
        let stats = Arc::new(RecordingStatsCallback::default());
        h.receiver
            .register_rtcp_statistics_callback(Some(stats.clone()));

        let mut rr = rr_with_block(0, 0, 9);
        rr.report_blocks[0].fraction_lost = 12;
        rr.report_blocks[0].jitter = 34;
        inject(&h, RtcpPacket::ReceiverReport(rr));

        let updates = stats.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].1, MAIN_SSRC);
        assert_eq!(updates[0].0.fraction_lost, 12);
        assert_eq!(updates[0].0.jitter, 34);
        assert_eq!(updates[0].0.extended_max_sequence_number, 9);
    }

    // Invariant 7: same datagram twice doubles only the NACK counters.
    #[test]
    fn test_parse_idempotence_and_nack_doubling() {
        let h = harness(false);

        let nack = RtcpPacket::Nack(RtcpNack {
            sender_ssrc: REMOTE_SSRC,
            media_ssrc: MAIN_SSRC,
            items: vec![NackPair {
                packet_id: 100,
                bitmask: 0b11,
            }],
        });
        let datagram = wire(nack);

        assert!(h.receiver.incoming_packet(&datagram));
        assert!(h.receiver.incoming_packet(&datagram));

        {
            let state = h.receiver.state();
            assert_eq!(state.packet_type_counter.nack_packets, 2);
            assert_eq!(state.nack_stats.requests(), 6);
            assert_eq!(state.nack_stats.unique_requests(), 3);
        }

        let nacks = h.owner.nacks.lock().unwrap();
        assert_eq!(nacks.len(), 2);
        assert_eq!(nacks[0], vec![100, 101, 102]);
        assert_eq!(nacks[0], nacks[1]);
    }

    #[test]
    fn test_nack_filtered_by_media_ssrc_and_mode() {
        let h = harness(false);
        inject(
            &h,
            RtcpPacket::Nack(RtcpNack {
                sender_ssrc: REMOTE_SSRC,
                media_ssrc: 0x9999, // someone else's stream
                items: vec![NackPair {
                    packet_id: 1,
                    bitmask: 0,
                }],
            }),
        );
        assert!(h.owner.nacks.lock().unwrap().is_empty());

        let h = harness(true);
        inject(
            &h,
            RtcpPacket::Nack(RtcpNack {
                sender_ssrc: REMOTE_SSRC,
                media_ssrc: MAIN_SSRC,
                items: vec![NackPair {
                    packet_id: 1,
                    bitmask: 0,
                }],
            }),
        );
        assert!(h.owner.nacks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_pli_and_fir_trigger_intra_frame_request() {
        let h = harness(false);

        inject(
            &h,
            RtcpPacket::Pli(RtcpPli {
                sender_ssrc: REMOTE_SSRC,
                media_ssrc: MAIN_SSRC,
            }),
        );
        assert_eq!(
            *h.intra_frame.intra_frame_requests.lock().unwrap(),
            vec![MAIN_SSRC]
        );

        // PLI for another stream is ignored.
        inject(
            &h,
            RtcpPacket::Pli(RtcpPli {
                sender_ssrc: REMOTE_SSRC,
                media_ssrc: 0x9999,
            }),
        );
        assert_eq!(h.intra_frame.intra_frame_requests.lock().unwrap().len(), 1);

        inject(
            &h,
            RtcpPacket::Fir(RtcpFir {
                sender_ssrc: 0x3333, // unknown originator: always honored
                media_ssrc: 0,
                requests: vec![FirRequest {
                    ssrc: MAIN_SSRC,
                    seq_nr: 1,
                }],
            }),
        );
        assert_eq!(h.intra_frame.intra_frame_requests.lock().unwrap().len(), 2);
        assert_eq!(h.receiver.state().packet_type_counter.fir_packets, 1);
        assert_eq!(h.receiver.state().packet_type_counter.pli_packets, 1);
    }

    #[test]
    fn test_fir_deduplicated_by_sequence_number() {
        let h = harness(false);
        inject(&h, RtcpPacket::SenderReport(sr_from(&h, REMOTE_SSRC)));

        let fir = |seq_nr| {
            RtcpPacket::Fir(RtcpFir {
                sender_ssrc: REMOTE_SSRC,
                media_ssrc: 0,
                requests: vec![FirRequest {
                    ssrc: MAIN_SSRC,
                    seq_nr,
                }],
            })
        };

        h.clock.advance(RTCP_MIN_FRAME_LENGTH_MS + 1);
        inject(&h, fir(7));
        assert_eq!(h.intra_frame.intra_frame_requests.lock().unwrap().len(), 1);

        // New sequence number but inside the rate limit window.
        h.clock.advance(RTCP_MIN_FRAME_LENGTH_MS - 1);
        inject(&h, fir(8));
        assert_eq!(h.intra_frame.intra_frame_requests.lock().unwrap().len(), 1);

        // Retransmission of the accepted sequence number much later.
        h.clock.advance(1_000);
        inject(&h, fir(7));
        assert_eq!(h.intra_frame.intra_frame_requests.lock().unwrap().len(), 1);

        // New sequence number, window long elapsed.
        inject(&h, fir(9));
        assert_eq!(h.intra_frame.intra_frame_requests.lock().unwrap().len(), 2);

        // FIR requests counted regardless of de-duplication.
        assert_eq!(h.receiver.state().packet_type_counter.fir_packets, 4);
    }

    #[test]
    fn test_sli_and_rpsi_forwarded() {
        let h = harness(false);

        inject(
            &h,
            RtcpPacket::Sli(RtcpSli {
                sender_ssrc: REMOTE_SSRC,
                media_ssrc: MAIN_SSRC,
                entries: vec![SliEntry {
                    first: 10,
                    number: 2,
                    picture_id: 5,
                }],
            }),
        );
        assert_eq!(*h.intra_frame.slis.lock().unwrap(), vec![(MAIN_SSRC, 5)]);

        inject(
            &h,
            RtcpPacket::Rpsi(RtcpRpsi {
                sender_ssrc: REMOTE_SSRC,
                media_ssrc: MAIN_SSRC,
                payload_type: 96,
                picture_id: 0x1234,
            }),
        );
        assert_eq!(
            *h.intra_frame.rpsis.lock().unwrap(),
            vec![(MAIN_SSRC, 0x1234)]
        );
    }

    #[test]
    fn test_rapid_resync_requests_send_report() {
        let h = harness(false);
        inject(
            &h,
            RtcpPacket::RapidResyncRequest(crate::packet::RtcpRapidResyncRequest {
                sender_ssrc: REMOTE_SSRC,
                media_ssrc: MAIN_SSRC,
            }),
        );
        assert_eq!(*h.owner.send_report_requests.lock().unwrap(), 1);

        // Suppressed in receiver-only mode.
        let h = harness(true);
        inject(
            &h,
            RtcpPacket::RapidResyncRequest(crate::packet::RtcpRapidResyncRequest {
                sender_ssrc: REMOTE_SSRC,
                media_ssrc: MAIN_SSRC,
            }),
        );
        assert_eq!(*h.owner.send_report_requests.lock().unwrap(), 0);
    }

    #[test]
    fn test_remb_reaches_bandwidth_observer() {
        let h = harness(false);
        inject(
            &h,
            RtcpPacket::Remb(RtcpRemb {
                sender_ssrc: REMOTE_SSRC,
                bitrate_bps: 1_048_576,
                ssrcs: vec![MAIN_SSRC],
            }),
        );
        assert_eq!(*h.bandwidth.estimates.lock().unwrap(), vec![1_048_576]);
    }

    #[test]
    fn test_transport_feedback_ssrc_filter() {
        let h = harness(false);
        let feedback = |media_ssrc| {
            RtcpPacket::TransportFeedback(TransportFeedback {
                sender_ssrc: REMOTE_SSRC,
                media_ssrc,
                base_sequence_number: 1,
                packet_status_count: 0,
                reference_time: 0,
                feedback_sequence_number: 0,
                payload: bytes::Bytes::new(),
            })
        };

        inject(&h, feedback(MAIN_SSRC));
        assert_eq!(h.transport.feedbacks.lock().unwrap().len(), 1);

        inject(&h, feedback(0x9999));
        assert_eq!(h.transport.feedbacks.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_bandwidth_observer_sees_reports_and_rtt() {
        let h = harness(false);

        let sr = sr_from(&h, REMOTE_SSRC);
        let sent_ntp = sr.ntp_timestamp;
        inject(&h, RtcpPacket::SenderReport(sr));
        h.clock.advance(200);
        inject(
            &h,
            RtcpPacket::ReceiverReport(rr_with_block(sent_ntp.to_compact(), 100, 1)),
        );

        let reports = h.bandwidth.reports.lock().unwrap();
        // One callback per SR/RR datagram.
        assert_eq!(reports.len(), 2);
        let (blocks, rtt_ms, now_ms) = &reports[1];
        assert_eq!(blocks.len(), 1);
        assert!((*rtt_ms - 100).abs() <= 1);
        assert_eq!(*now_ms, h.clock.now_ms());
    }

    #[test]
    fn test_set_ssrcs_notifies_local_ssrc_change() {
        let h = harness(false);
        // The harness already changed 0 -> MAIN_SSRC once.
        assert_eq!(
            *h.intra_frame.ssrc_changes.lock().unwrap(),
            vec![(0, MAIN_SSRC)]
        );

        h.receiver.set_ssrcs(0xAAAA, &HashSet::from([0xAAAA]));
        assert_eq!(
            h.intra_frame.ssrc_changes.lock().unwrap().last(),
            Some(&(MAIN_SSRC, 0xAAAA))
        );

        // Re-registering the same SSRC is not a change.
        h.receiver.set_ssrcs(0xAAAA, &HashSet::from([0xAAAA]));
        assert_eq!(h.intra_frame.ssrc_changes.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_last_received_receiver_report_tracks_liveness() {
        let h = harness(false);
        assert!(h.receiver.last_received_receiver_report_ms().is_none());

        inject(&h, RtcpPacket::ReceiverReport(rr_with_block(0, 0, 1)));
        let t0 = h.clock.now_ms();
        assert_eq!(h.receiver.last_received_receiver_report_ms(), Some(t0));

        h.clock.advance(700);
        inject(
            &h,
            RtcpPacket::ReceiverReport(RtcpReceiverReport::new(0x1234)),
        );
        assert_eq!(
            h.receiver.last_received_receiver_report_ms(),
            Some(t0 + 700)
        );
    }

    #[test]
    fn test_receive_info_garbage_collects_silent_peers() {
        let h = harness(false);

        inject(
            &h,
            RtcpPacket::ReceiverReport(RtcpReceiverReport::new(0x1001)),
        );
        inject(
            &h,
            RtcpPacket::Tmmbr(RtcpTmmb {
                sender_ssrc: 0x1001,
                media_ssrc: 0,
                items: vec![TmmbItem {
                    ssrc: MAIN_SSRC,
                    bitrate_bps: 1_000_000,
                    packet_overhead: 40,
                }],
            }),
        );

        // Silence past the staleness window: TMMBR cleared, refresh signaled.
        h.clock.advance(5 * RTCP_INTERVAL_AUDIO_MS + 1);
        assert!(h.receiver.update_rtcp_receive_information_timers());
        assert!(h.receiver.tmmbr_received().is_empty());

        // The zeroed entry is not collected without a BYE.
        assert!(!h.receiver.update_rtcp_receive_information_timers());
        assert!(h.receiver.state().received_infos.contains_key(&0x1001));
    }

    #[test]
    fn test_compound_datagram_single_dispatch() {
        let h = harness(false);

        let sr = sr_from(&h, REMOTE_SSRC);
        let mut compound = wire(RtcpPacket::SenderReport(sr));
        let mut chunk = RtcpSdesChunk::new(REMOTE_SSRC);
        chunk
            .items
            .push(RtcpSdesItem::cname("peer@example.com".to_string()));
        compound.extend_from_slice(&wire(RtcpPacket::SourceDescription(
            RtcpSourceDescription {
                chunks: vec![chunk],
            },
        )));
        compound.extend_from_slice(&wire(RtcpPacket::Pli(RtcpPli {
            sender_ssrc: REMOTE_SSRC,
            media_ssrc: MAIN_SSRC,
        })));

        assert!(h.receiver.incoming_packet(&compound));

        // One batch of report blocks, one intra-frame request, CNAME stored.
        assert_eq!(h.owner.report_block_batches.lock().unwrap().len(), 1);
        assert_eq!(h.intra_frame.intra_frame_requests.lock().unwrap().len(), 1);
        let mut buf = [0u8; RTCP_CNAME_SIZE];
        assert!(h.receiver.cname(REMOTE_SSRC, &mut buf));
    }

    #[test]
    fn test_skipped_packet_warning_resets_counter() {
        let h = harness(false);

        // An unknown payload type inside an otherwise valid compound.
        let mut compound = wire(RtcpPacket::ReceiverReport(RtcpReceiverReport::new(
            REMOTE_SSRC,
        )));
        let mut unknown = wire(RtcpPacket::Goodbye(RtcpGoodbye::new(REMOTE_SSRC)));
        unknown[1] = 195;
        compound.extend_from_slice(&unknown);

        assert!(h.receiver.incoming_packet(&compound));
        assert_eq!(h.receiver.state().num_skipped_packets, 1);

        // Past the warning interval the counter logs once and resets.
        h.clock.advance(SKIP_WARN_INTERVAL_MS + 1);
        assert!(h.receiver.incoming_packet(&compound));
        assert_eq!(h.receiver.state().num_skipped_packets, 0);
    }
}
