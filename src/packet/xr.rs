use bytes::{BufMut, BytesMut};

use super::ntp::NtpTimestamp;
use crate::error::RtcpError;
use crate::{Result, RtpSsrc};

/// XR block type for Receiver Reference Time (RFC 3611 Section 4.4)
pub const XR_BLOCK_RRTR: u8 = 4;
/// XR block type for DLRR (RFC 3611 Section 4.5)
pub const XR_BLOCK_DLRR: u8 = 5;

/// Receiver Reference Time report block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rrtr {
    /// Full 64-bit NTP timestamp of the reporting receiver
    pub ntp: NtpTimestamp,
}

/// One sub-block of a DLRR report: receive times for one receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveTimeInfo {
    /// SSRC of the receiver the delay information is about
    pub ssrc: RtpSsrc,

    /// Compact NTP timestamp of the last RRTR received from that receiver
    pub last_rr: u32,

    /// Delay since that RRTR, in 1/65536 seconds
    pub delay_since_last_rr: u32,
}

/// DLRR report block: a list of receive-time sub-blocks
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Dlrr {
    /// Sub-blocks, one per receiver
    pub sub_blocks: Vec<ReceiveTimeInfo>,
}

/// RTCP Extended Reports (XR) packet
/// Defined in RFC 3611; only the RTT-relevant block types are decoded,
/// other block types are skipped by their declared length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpExtendedReports {
    /// SSRC of the packet originator
    pub sender_ssrc: RtpSsrc,

    /// Receiver reference time blocks
    pub rrtrs: Vec<Rrtr>,

    /// DLRR blocks
    pub dlrrs: Vec<Dlrr>,
}

impl RtcpExtendedReports {
    /// Create an empty XR packet
    pub fn new(sender_ssrc: RtpSsrc) -> Self {
        Self {
            sender_ssrc,
            rrtrs: Vec::new(),
            dlrrs: Vec::new(),
        }
    }

    /// Serialize the XR payload (header excluded)
    pub fn serialize(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::new();
        buf.put_u32(self.sender_ssrc);

        for rrtr in &self.rrtrs {
            buf.put_u8(XR_BLOCK_RRTR);
            buf.put_u8(0); // reserved
            buf.put_u16(2); // block length in words
            buf.put_u32(rrtr.ntp.seconds);
            buf.put_u32(rrtr.ntp.fraction);
        }

        for dlrr in &self.dlrrs {
            buf.put_u8(XR_BLOCK_DLRR);
            buf.put_u8(0); // reserved
            buf.put_u16((dlrr.sub_blocks.len() * 3) as u16);
            for info in &dlrr.sub_blocks {
                buf.put_u32(info.ssrc);
                buf.put_u32(info.last_rr);
                buf.put_u32(info.delay_since_last_rr);
            }
        }

        Ok(buf)
    }
}

/// Parse an XR payload
pub fn parse_xr(data: &[u8]) -> Result<RtcpExtendedReports> {
    if data.len() < 4 {
        return Err(RtcpError::BufferTooSmall {
            required: 4,
            available: data.len(),
        });
    }

    let sender_ssrc = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let mut xr = RtcpExtendedReports::new(sender_ssrc);

    let mut offset = 4usize;
    while offset < data.len() {
        if data.len() < offset + 4 {
            return Err(RtcpError::BufferTooSmall {
                required: offset + 4,
                available: data.len(),
            });
        }
        let block_type = data[offset];
        let block_len = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize * 4;
        offset += 4;

        if data.len() < offset + block_len {
            return Err(RtcpError::BufferTooSmall {
                required: offset + block_len,
                available: data.len(),
            });
        }
        let block = &data[offset..offset + block_len];
        offset += block_len;

        match block_type {
            XR_BLOCK_RRTR => {
                if block.len() < 8 {
                    return Err(RtcpError::InvalidPacket(
                        "RRTR block shorter than an NTP timestamp".to_string(),
                    ));
                }
                xr.rrtrs.push(Rrtr {
                    ntp: NtpTimestamp {
                        seconds: u32::from_be_bytes([block[0], block[1], block[2], block[3]]),
                        fraction: u32::from_be_bytes([block[4], block[5], block[6], block[7]]),
                    },
                });
            }
            XR_BLOCK_DLRR => {
                if block.len() % 12 != 0 {
                    return Err(RtcpError::InvalidPacket(
                        "DLRR block length not a multiple of sub-block size".to_string(),
                    ));
                }
                let mut dlrr = Dlrr::default();
                for sub in block.chunks_exact(12) {
                    dlrr.sub_blocks.push(ReceiveTimeInfo {
                        ssrc: u32::from_be_bytes([sub[0], sub[1], sub[2], sub[3]]),
                        last_rr: u32::from_be_bytes([sub[4], sub[5], sub[6], sub[7]]),
                        delay_since_last_rr: u32::from_be_bytes([sub[8], sub[9], sub[10], sub[11]]),
                    });
                }
                xr.dlrrs.push(dlrr);
            }
            // Loss RLE, VoIP metrics and friends are not our concern here.
            _ => {}
        }
    }

    Ok(xr)
}
