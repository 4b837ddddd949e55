use bytes::{Buf, BufMut, BytesMut};

use super::report_block::RtcpReportBlock;
use crate::error::RtcpError;
use crate::{Result, RtpSsrc};

/// RTCP Receiver Report (RR) packet
/// Defined in RFC 3550 Section 6.4.2
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpReceiverReport {
    /// SSRC of the reporting receiver
    pub sender_ssrc: RtpSsrc,

    /// Report blocks
    pub report_blocks: Vec<RtcpReportBlock>,
}

impl RtcpReceiverReport {
    /// Create a new receiver report
    pub fn new(sender_ssrc: RtpSsrc) -> Self {
        Self {
            sender_ssrc,
            report_blocks: Vec::new(),
        }
    }

    /// Calculate total payload size in bytes
    pub fn size(&self) -> usize {
        4 + self.report_blocks.len() * RtcpReportBlock::SIZE
    }

    /// Serialize the receiver report payload (header excluded)
    pub fn serialize(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(self.size());
        buf.put_u32(self.sender_ssrc);
        for block in &self.report_blocks {
            block.serialize(&mut buf)?;
        }
        Ok(buf)
    }
}

/// Parse a receiver report payload
pub fn parse_receiver_report(buf: &mut impl Buf, report_count: u8) -> Result<RtcpReceiverReport> {
    if buf.remaining() < 4 {
        return Err(RtcpError::BufferTooSmall {
            required: 4,
            available: buf.remaining(),
        });
    }

    let sender_ssrc = buf.get_u32();

    let mut report_blocks = Vec::with_capacity(report_count as usize);
    for _ in 0..report_count {
        report_blocks.push(RtcpReportBlock::parse(buf)?);
    }

    Ok(RtcpReceiverReport {
        sender_ssrc,
        report_blocks,
    })
}
