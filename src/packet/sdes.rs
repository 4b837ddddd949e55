use bytes::{BufMut, BytesMut};

use crate::error::RtcpError;
use crate::{Result, RtpSsrc};

/// SDES item types (RFC 3550 Section 6.5)
pub const SDES_ITEM_END: u8 = 0;
/// Canonical end-point identifier
pub const SDES_ITEM_CNAME: u8 = 1;

/// One item inside an SDES chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpSdesItem {
    /// Item type (CNAME, NAME, ...)
    pub item_type: u8,

    /// UTF-8 item text
    pub value: String,
}

impl RtcpSdesItem {
    /// Create a CNAME item
    pub fn cname(value: String) -> Self {
        Self {
            item_type: SDES_ITEM_CNAME,
            value,
        }
    }
}

/// One chunk of an SDES packet: an SSRC and its items
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpSdesChunk {
    /// SSRC the items describe
    pub ssrc: RtpSsrc,

    /// Items for this source
    pub items: Vec<RtcpSdesItem>,
}

impl RtcpSdesChunk {
    /// Create an empty chunk
    pub fn new(ssrc: RtpSsrc) -> Self {
        Self {
            ssrc,
            items: Vec::new(),
        }
    }

    /// First CNAME item, if any
    pub fn cname(&self) -> Option<&str> {
        self.items
            .iter()
            .find(|item| item.item_type == SDES_ITEM_CNAME)
            .map(|item| item.value.as_str())
    }
}

/// RTCP Source Description (SDES) packet
/// Defined in RFC 3550 Section 6.5
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RtcpSourceDescription {
    /// Chunks, one per described source
    pub chunks: Vec<RtcpSdesChunk>,
}

impl RtcpSourceDescription {
    /// Create an empty SDES packet
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize the SDES payload (header excluded)
    ///
    /// Each chunk's item list is closed with an END octet and padded with
    /// zeros to the next 32-bit boundary.
    pub fn serialize(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::new();
        for chunk in &self.chunks {
            buf.put_u32(chunk.ssrc);
            let mut chunk_len = 0usize;
            for item in &chunk.items {
                if item.value.len() > u8::MAX as usize {
                    return Err(RtcpError::InvalidPacket(format!(
                        "SDES item too long: {} bytes",
                        item.value.len()
                    )));
                }
                buf.put_u8(item.item_type);
                buf.put_u8(item.value.len() as u8);
                buf.put_slice(item.value.as_bytes());
                chunk_len += 2 + item.value.len();
            }
            // END octet plus padding to the next word boundary.
            let padding = 4 - (chunk_len % 4);
            for _ in 0..padding {
                buf.put_u8(SDES_ITEM_END);
            }
        }
        Ok(buf)
    }
}

/// Parse an SDES payload with `chunk_count` chunks
pub fn parse_sdes(data: &[u8], chunk_count: u8) -> Result<RtcpSourceDescription> {
    let mut chunks = Vec::with_capacity(chunk_count as usize);
    let mut offset = 0usize;

    for _ in 0..chunk_count {
        if data.len() < offset + 4 {
            return Err(RtcpError::BufferTooSmall {
                required: offset + 4,
                available: data.len(),
            });
        }
        let ssrc = u32::from_be_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]);
        offset += 4;

        let mut chunk = RtcpSdesChunk::new(ssrc);
        loop {
            if offset >= data.len() {
                return Err(RtcpError::InvalidPacket(
                    "SDES chunk missing END item".to_string(),
                ));
            }
            let item_type = data[offset];
            offset += 1;
            if item_type == SDES_ITEM_END {
                // Skip padding up to the next 32-bit boundary.
                while offset % 4 != 0 {
                    offset += 1;
                }
                break;
            }

            if offset >= data.len() {
                return Err(RtcpError::InvalidPacket(
                    "SDES item missing length".to_string(),
                ));
            }
            let len = data[offset] as usize;
            offset += 1;
            if data.len() < offset + len {
                return Err(RtcpError::BufferTooSmall {
                    required: offset + len,
                    available: data.len(),
                });
            }
            let value = String::from_utf8_lossy(&data[offset..offset + len]).into_owned();
            offset += len;

            chunk.items.push(RtcpSdesItem { item_type, value });
        }
        chunks.push(chunk);
    }

    Ok(RtcpSourceDescription { chunks })
}
