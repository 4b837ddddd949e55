//! RTCP packet definitions, parsing and serialization
//!
//! A compound RTCP datagram is a contiguous concatenation of packets, each
//! introduced by the 4-byte common header of RFC 3550 Section 6.4.1. The
//! [`compound_blocks`] iterator walks that framing; [`RtcpBlock::parse`]
//! turns one block into a typed [`RtcpPacket`].

use bytes::BytesMut;

use crate::error::RtcpError;
use crate::Result;

mod bye;
mod feedback;
mod ntp;
mod receiver_report;
mod report_block;
mod sdes;
mod sender_report;
mod xr;

pub use bye::{parse_bye, RtcpGoodbye};
pub use feedback::{
    parse_fir, parse_nack, parse_pli, parse_rapid_resync, parse_remb, parse_rpsi, parse_sli,
    parse_tmmb, parse_transport_feedback, FirRequest, NackPair, RtcpFir, RtcpNack, RtcpPli,
    RtcpRapidResyncRequest, RtcpRemb, RtcpRpsi, RtcpSli, RtcpTmmb, SliEntry, TmmbItem,
    TransportFeedback, FMT_APP, FMT_FIR, FMT_NACK, FMT_PLI, FMT_RAPID_RESYNC, FMT_RPSI, FMT_SLI,
    FMT_TMMBN, FMT_TMMBR, FMT_TRANSPORT_FEEDBACK, PT_PSFB, PT_RTPFB,
};
pub use ntp::{compact_to_ms, ms_to_compact, NtpTimestamp};
pub use receiver_report::{parse_receiver_report, RtcpReceiverReport};
pub use report_block::RtcpReportBlock;
pub use sdes::{parse_sdes, RtcpSdesChunk, RtcpSdesItem, RtcpSourceDescription, SDES_ITEM_CNAME};
pub use sender_report::{parse_sender_report, RtcpSenderReport};
pub use xr::{parse_xr, Dlrr, ReceiveTimeInfo, Rrtr, RtcpExtendedReports};

/// RTCP version carried by every packet
pub const RTCP_VERSION: u8 = 2;

/// Payload type for Sender Reports
pub const PT_SR: u8 = 200;
/// Payload type for Receiver Reports
pub const PT_RR: u8 = 201;
/// Payload type for Source Descriptions
pub const PT_SDES: u8 = 202;
/// Payload type for Goodbye packets
pub const PT_BYE: u8 = 203;
/// Payload type for Extended Reports
pub const PT_XR: u8 = 207;

/// Common RTCP packet header (RFC 3550 Section 6.4.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcpHeader {
    /// Padding flag
    pub padding: bool,

    /// Five-bit count-or-format field; report count for SR/RR, chunk count
    /// for SDES, source count for BYE, feedback format for RTPFB/PSFB
    pub count: u8,

    /// Payload type
    pub packet_type: u8,

    /// Payload length in 32-bit words, minus one
    pub length: u16,
}

impl RtcpHeader {
    /// Wire size of the common header in bytes
    pub const SIZE: usize = 4;

    /// Total packet length in bytes, header included
    pub fn packet_len(&self) -> usize {
        (self.length as usize + 1) * 4
    }

    /// Parse a common header from the start of `data`
    ///
    /// Validates the version and that the declared length fits in `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(RtcpError::BufferTooSmall {
                required: Self::SIZE,
                available: data.len(),
            });
        }

        let version = data[0] >> 6;
        if version != RTCP_VERSION {
            return Err(RtcpError::InvalidVersion(version));
        }

        let header = Self {
            padding: data[0] & 0x20 != 0,
            count: data[0] & 0x1F,
            packet_type: data[1],
            length: u16::from_be_bytes([data[2], data[3]]),
        };

        if header.packet_len() > data.len() {
            return Err(RtcpError::InvalidLength {
                declared: header.packet_len(),
                available: data.len(),
            });
        }

        Ok(header)
    }

    fn serialize_into(&self, buf: &mut BytesMut) {
        let first = (RTCP_VERSION << 6) | ((self.padding as u8) << 5) | (self.count & 0x1F);
        buf.extend_from_slice(&[first, self.packet_type]);
        buf.extend_from_slice(&self.length.to_be_bytes());
    }
}

/// One framed block of a compound datagram: header plus raw payload
#[derive(Debug, Clone, Copy)]
pub struct RtcpBlock<'a> {
    /// Parsed common header
    pub header: RtcpHeader,
    payload: &'a [u8],
}

impl<'a> RtcpBlock<'a> {
    /// Raw payload with any padding still attached
    pub fn raw_payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Payload with padding validated and stripped
    pub fn payload(&self) -> Result<&'a [u8]> {
        if !self.header.padding {
            return Ok(self.payload);
        }
        let Some(&pad) = self.payload.last() else {
            return Err(RtcpError::InvalidPadding(0, 0));
        };
        let pad = pad as usize;
        if pad == 0 || pad > self.payload.len() {
            return Err(RtcpError::InvalidPadding(pad, self.payload.len()));
        }
        Ok(&self.payload[..self.payload.len() - pad])
    }

    /// Parse this block into a typed packet
    ///
    /// Unknown payload types and feedback formats come back as
    /// [`RtcpError::UnsupportedPacketType`] /
    /// [`RtcpError::UnsupportedFeedbackFormat`]; the caller decides whether
    /// that skips the block or aborts the datagram.
    pub fn parse(&self) -> Result<RtcpPacket> {
        let payload = self.payload()?;
        let count = self.header.count;

        match self.header.packet_type {
            PT_SR => Ok(RtcpPacket::SenderReport(parse_sender_report(
                &mut &payload[..],
                count,
            )?)),
            PT_RR => Ok(RtcpPacket::ReceiverReport(parse_receiver_report(
                &mut &payload[..],
                count,
            )?)),
            PT_SDES => Ok(RtcpPacket::SourceDescription(parse_sdes(payload, count)?)),
            PT_BYE => Ok(RtcpPacket::Goodbye(parse_bye(payload, count)?)),
            PT_XR => Ok(RtcpPacket::ExtendedReports(parse_xr(payload)?)),
            PT_RTPFB => match count {
                FMT_NACK => Ok(RtcpPacket::Nack(parse_nack(payload)?)),
                FMT_TMMBR => Ok(RtcpPacket::Tmmbr(parse_tmmb(payload)?)),
                FMT_TMMBN => Ok(RtcpPacket::Tmmbn(parse_tmmb(payload)?)),
                FMT_RAPID_RESYNC => Ok(RtcpPacket::RapidResyncRequest(parse_rapid_resync(
                    payload,
                )?)),
                FMT_TRANSPORT_FEEDBACK => Ok(RtcpPacket::TransportFeedback(
                    parse_transport_feedback(payload)?,
                )),
                format => Err(RtcpError::UnsupportedFeedbackFormat {
                    packet_type: PT_RTPFB,
                    format,
                }),
            },
            PT_PSFB => match count {
                FMT_PLI => Ok(RtcpPacket::Pli(parse_pli(payload)?)),
                FMT_SLI => Ok(RtcpPacket::Sli(parse_sli(payload)?)),
                FMT_RPSI => Ok(RtcpPacket::Rpsi(parse_rpsi(payload)?)),
                FMT_FIR => Ok(RtcpPacket::Fir(parse_fir(payload)?)),
                FMT_APP => Ok(RtcpPacket::Remb(parse_remb(payload)?)),
                format => Err(RtcpError::UnsupportedFeedbackFormat {
                    packet_type: PT_PSFB,
                    format,
                }),
            },
            other => Err(RtcpError::UnsupportedPacketType(other)),
        }
    }
}

/// Iterator over the framed blocks of a compound datagram
///
/// Yields `Err` exactly once, for the first header that fails to parse, and
/// then stops; everything before that is surfaced.
pub struct CompoundIter<'a> {
    data: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> Iterator for CompoundIter<'a> {
    type Item = Result<RtcpBlock<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.data.len() {
            return None;
        }
        let remaining = &self.data[self.offset..];
        match RtcpHeader::parse(remaining) {
            Ok(header) => {
                let payload = &remaining[RtcpHeader::SIZE..header.packet_len()];
                self.offset += header.packet_len();
                Some(Ok(RtcpBlock { header, payload }))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Walk the framed blocks of a compound datagram
pub fn compound_blocks(data: &[u8]) -> CompoundIter<'_> {
    CompoundIter {
        data,
        offset: 0,
        failed: false,
    }
}

/// A parsed RTCP packet of any supported type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    /// Sender Report (SR)
    SenderReport(RtcpSenderReport),

    /// Receiver Report (RR)
    ReceiverReport(RtcpReceiverReport),

    /// Source Description (SDES)
    SourceDescription(RtcpSourceDescription),

    /// Goodbye (BYE)
    Goodbye(RtcpGoodbye),

    /// Extended Reports (XR)
    ExtendedReports(RtcpExtendedReports),

    /// Generic NACK
    Nack(RtcpNack),

    /// Temporary maximum media bitrate request
    Tmmbr(RtcpTmmb),

    /// Temporary maximum media bitrate notification
    Tmmbn(RtcpTmmb),

    /// Rapid resynchronisation request
    RapidResyncRequest(RtcpRapidResyncRequest),

    /// Transport-wide congestion control feedback
    TransportFeedback(TransportFeedback),

    /// Picture loss indication
    Pli(RtcpPli),

    /// Slice loss indication
    Sli(RtcpSli),

    /// Reference picture selection indication
    Rpsi(RtcpRpsi),

    /// Full intra request
    Fir(RtcpFir),

    /// Receiver estimated max bitrate
    Remb(RtcpRemb),
}

impl RtcpPacket {
    /// Serialize the packet, common header included
    pub fn serialize(&self) -> Result<BytesMut> {
        let (packet_type, count, payload) = match self {
            RtcpPacket::SenderReport(sr) => {
                (PT_SR, sr.report_blocks.len() as u8, sr.serialize()?)
            }
            RtcpPacket::ReceiverReport(rr) => {
                (PT_RR, rr.report_blocks.len() as u8, rr.serialize()?)
            }
            RtcpPacket::SourceDescription(sdes) => {
                (PT_SDES, sdes.chunks.len() as u8, sdes.serialize()?)
            }
            RtcpPacket::Goodbye(bye) => (PT_BYE, bye.sources.len() as u8, bye.serialize()?),
            RtcpPacket::ExtendedReports(xr) => (PT_XR, 0, xr.serialize()?),
            RtcpPacket::Nack(nack) => (PT_RTPFB, FMT_NACK, nack.serialize()?),
            RtcpPacket::Tmmbr(tmmb) => (PT_RTPFB, FMT_TMMBR, tmmb.serialize()?),
            RtcpPacket::Tmmbn(tmmb) => (PT_RTPFB, FMT_TMMBN, tmmb.serialize()?),
            RtcpPacket::RapidResyncRequest(req) => {
                (PT_RTPFB, FMT_RAPID_RESYNC, req.serialize()?)
            }
            RtcpPacket::TransportFeedback(feedback) => {
                (PT_RTPFB, FMT_TRANSPORT_FEEDBACK, feedback.serialize()?)
            }
            RtcpPacket::Pli(pli) => (PT_PSFB, FMT_PLI, pli.serialize()?),
            RtcpPacket::Sli(sli) => (PT_PSFB, FMT_SLI, sli.serialize()?),
            RtcpPacket::Rpsi(rpsi) => (PT_PSFB, FMT_RPSI, rpsi.serialize()?),
            RtcpPacket::Fir(fir) => (PT_PSFB, FMT_FIR, fir.serialize()?),
            RtcpPacket::Remb(remb) => (PT_PSFB, FMT_APP, remb.serialize()?),
        };

        debug_assert_eq!(payload.len() % 4, 0);
        let header = RtcpHeader {
            padding: false,
            count,
            packet_type,
            length: (payload.len() / 4) as u16,
        };

        let mut buf = BytesMut::with_capacity(RtcpHeader::SIZE + payload.len());
        header.serialize_into(&mut buf);
        buf.extend_from_slice(&payload);
        Ok(buf)
    }
}
