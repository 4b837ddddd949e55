use bytes::{BufMut, BytesMut};

use crate::error::RtcpError;
use crate::{Result, RtpSsrc};

/// RTCP Goodbye (BYE) packet
/// Defined in RFC 3550 Section 6.6
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RtcpGoodbye {
    /// Departing sources
    pub sources: Vec<RtpSsrc>,

    /// Optional reason for leaving
    pub reason: Option<String>,
}

impl RtcpGoodbye {
    /// Create a BYE for a single source
    pub fn new(ssrc: RtpSsrc) -> Self {
        Self {
            sources: vec![ssrc],
            reason: None,
        }
    }

    /// SSRC of the departing sender (first listed source)
    pub fn sender_ssrc(&self) -> Option<RtpSsrc> {
        self.sources.first().copied()
    }

    /// Serialize the BYE payload (header excluded)
    pub fn serialize(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::new();
        for ssrc in &self.sources {
            buf.put_u32(*ssrc);
        }
        if let Some(reason) = &self.reason {
            if reason.len() > u8::MAX as usize {
                return Err(RtcpError::InvalidPacket(format!(
                    "BYE reason too long: {} bytes",
                    reason.len()
                )));
            }
            buf.put_u8(reason.len() as u8);
            buf.put_slice(reason.as_bytes());
            // Pad to the next word boundary.
            while buf.len() % 4 != 0 {
                buf.put_u8(0);
            }
        }
        Ok(buf)
    }
}

/// Parse a BYE payload with `source_count` SSRC entries
pub fn parse_bye(data: &[u8], source_count: u8) -> Result<RtcpGoodbye> {
    let ssrc_bytes = source_count as usize * 4;
    if data.len() < ssrc_bytes {
        return Err(RtcpError::BufferTooSmall {
            required: ssrc_bytes,
            available: data.len(),
        });
    }

    let mut sources = Vec::with_capacity(source_count as usize);
    for i in 0..source_count as usize {
        let off = i * 4;
        sources.push(u32::from_be_bytes([
            data[off],
            data[off + 1],
            data[off + 2],
            data[off + 3],
        ]));
    }

    let mut reason = None;
    if data.len() > ssrc_bytes {
        let len = data[ssrc_bytes] as usize;
        if data.len() < ssrc_bytes + 1 + len {
            return Err(RtcpError::BufferTooSmall {
                required: ssrc_bytes + 1 + len,
                available: data.len(),
            });
        }
        reason = Some(
            String::from_utf8_lossy(&data[ssrc_bytes + 1..ssrc_bytes + 1 + len]).into_owned(),
        );
    }

    Ok(RtcpGoodbye { sources, reason })
}
