use bytes::{Buf, BufMut, BytesMut};

use super::ntp::NtpTimestamp;
use super::report_block::RtcpReportBlock;
use crate::error::RtcpError;
use crate::{Result, RtpSsrc};

/// RTCP Sender Report (SR) packet
/// Defined in RFC 3550 Section 6.4.1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpSenderReport {
    /// SSRC of the sender
    pub sender_ssrc: RtpSsrc,

    /// NTP timestamp of this report
    pub ntp_timestamp: NtpTimestamp,

    /// RTP timestamp corresponding to the NTP timestamp
    pub rtp_timestamp: u32,

    /// Sender's packet count
    pub sender_packet_count: u32,

    /// Sender's octet count
    pub sender_octet_count: u32,

    /// Report blocks
    pub report_blocks: Vec<RtcpReportBlock>,
}

impl RtcpSenderReport {
    /// Size of the SSRC plus sender info section in bytes
    pub const SENDER_INFO_SIZE: usize = 24;

    /// Create a new sender report
    pub fn new(sender_ssrc: RtpSsrc) -> Self {
        Self {
            sender_ssrc,
            ntp_timestamp: NtpTimestamp::default(),
            rtp_timestamp: 0,
            sender_packet_count: 0,
            sender_octet_count: 0,
            report_blocks: Vec::new(),
        }
    }

    /// Calculate total payload size in bytes
    pub fn size(&self) -> usize {
        Self::SENDER_INFO_SIZE + self.report_blocks.len() * RtcpReportBlock::SIZE
    }

    /// Serialize the sender report payload (header excluded)
    pub fn serialize(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(self.size());

        buf.put_u32(self.sender_ssrc);
        buf.put_u32(self.ntp_timestamp.seconds);
        buf.put_u32(self.ntp_timestamp.fraction);
        buf.put_u32(self.rtp_timestamp);
        buf.put_u32(self.sender_packet_count);
        buf.put_u32(self.sender_octet_count);

        for block in &self.report_blocks {
            block.serialize(&mut buf)?;
        }

        Ok(buf)
    }
}

/// Parse a sender report payload
pub fn parse_sender_report(buf: &mut impl Buf, report_count: u8) -> Result<RtcpSenderReport> {
    if buf.remaining() < RtcpSenderReport::SENDER_INFO_SIZE {
        return Err(RtcpError::BufferTooSmall {
            required: RtcpSenderReport::SENDER_INFO_SIZE,
            available: buf.remaining(),
        });
    }

    let sender_ssrc = buf.get_u32();
    let ntp_timestamp = NtpTimestamp {
        seconds: buf.get_u32(),
        fraction: buf.get_u32(),
    };
    let rtp_timestamp = buf.get_u32();
    let sender_packet_count = buf.get_u32();
    let sender_octet_count = buf.get_u32();

    let mut report_blocks = Vec::with_capacity(report_count as usize);
    for _ in 0..report_count {
        report_blocks.push(RtcpReportBlock::parse(buf)?);
    }

    Ok(RtcpSenderReport {
        sender_ssrc,
        ntp_timestamp,
        rtp_timestamp,
        sender_packet_count,
        sender_octet_count,
        report_blocks,
    })
}
