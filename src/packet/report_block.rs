use bytes::{Buf, BufMut};

use crate::error::RtcpError;
use crate::{Result, RtpSsrc};

/// Reception report block embedded in SR/RR packets
/// Defined in RFC 3550 Section 6.4.1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RtcpReportBlock {
    /// SSRC of the source this report is about
    pub source_ssrc: RtpSsrc,

    /// Fraction of packets lost since the previous report (Q8)
    pub fraction_lost: u8,

    /// Cumulative number of packets lost (signed 24-bit range)
    pub cumulative_lost: i32,

    /// Extended highest sequence number received
    pub extended_high_seq_num: u32,

    /// Interarrival jitter in timestamp units
    pub jitter: u32,

    /// Compact NTP timestamp of the last SR from this source
    pub last_sr: u32,

    /// Delay since that SR, in 1/65536 seconds
    pub delay_since_last_sr: u32,
}

impl RtcpReportBlock {
    /// Wire size of one report block in bytes
    pub const SIZE: usize = 24;

    /// Parse a report block from packet data
    pub fn parse(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < Self::SIZE {
            return Err(RtcpError::BufferTooSmall {
                required: Self::SIZE,
                available: buf.remaining(),
            });
        }

        let source_ssrc = buf.get_u32();

        // Fraction lost (8 bits) followed by cumulative lost (signed 24 bits).
        let word = buf.get_u32();
        let fraction_lost = (word >> 24) as u8;
        let mut cumulative_lost = (word & 0x00FF_FFFF) as i32;
        if cumulative_lost & 0x0080_0000 != 0 {
            cumulative_lost |= -0x0100_0000; // sign extend
        }

        let extended_high_seq_num = buf.get_u32();
        let jitter = buf.get_u32();
        let last_sr = buf.get_u32();
        let delay_since_last_sr = buf.get_u32();

        Ok(Self {
            source_ssrc,
            fraction_lost,
            cumulative_lost,
            extended_high_seq_num,
            jitter,
            last_sr,
            delay_since_last_sr,
        })
    }

    /// Serialize the report block into `buf`
    pub fn serialize(&self, buf: &mut impl BufMut) -> Result<()> {
        buf.put_u32(self.source_ssrc);
        buf.put_u32(((self.fraction_lost as u32) << 24) | (self.cumulative_lost as u32 & 0x00FF_FFFF));
        buf.put_u32(self.extended_high_seq_num);
        buf.put_u32(self.jitter);
        buf.put_u32(self.last_sr);
        buf.put_u32(self.delay_since_last_sr);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_serialize_parse() {
        let original = RtcpReportBlock {
            source_ssrc: 0xabcd_ef01,
            fraction_lost: 42,
            cumulative_lost: 1000,
            extended_high_seq_num: 5000,
            jitter: 100,
            last_sr: 0x8765_4321,
            delay_since_last_sr: 1500,
        };

        let mut buf = BytesMut::with_capacity(RtcpReportBlock::SIZE);
        original.serialize(&mut buf).unwrap();
        assert_eq!(buf.len(), RtcpReportBlock::SIZE);

        let parsed = RtcpReportBlock::parse(&mut buf.freeze()).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_negative_cumulative_lost() {
        // Duplicates can push the cumulative count below zero (RFC 3550).
        let original = RtcpReportBlock {
            source_ssrc: 1,
            cumulative_lost: -5,
            ..Default::default()
        };

        let mut buf = BytesMut::new();
        original.serialize(&mut buf).unwrap();
        let parsed = RtcpReportBlock::parse(&mut buf.freeze()).unwrap();
        assert_eq!(parsed.cumulative_lost, -5);
    }

    #[test]
    fn test_truncated_block_rejected() {
        let mut short = &[0u8; 10][..];
        assert!(matches!(
            RtcpReportBlock::parse(&mut short),
            Err(RtcpError::BufferTooSmall { .. })
        ));
    }
}
