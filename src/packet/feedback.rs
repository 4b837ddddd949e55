//! RTP and payload-specific feedback packets
//!
//! Covers the RTPFB family (generic NACK, TMMBR/TMMBN, rapid resync,
//! transport-wide feedback) from RFC 4585/5104 and the PSFB family
//! (PLI, SLI, RPSI, FIR, REMB).

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::RtcpError;
use crate::{Result, RtpSsrc};

/// RTPFB payload type (RFC 4585)
pub const PT_RTPFB: u8 = 205;
/// PSFB payload type (RFC 4585)
pub const PT_PSFB: u8 = 206;

/// RTPFB format: generic NACK
pub const FMT_NACK: u8 = 1;
/// RTPFB format: temporary maximum media bitrate request
pub const FMT_TMMBR: u8 = 3;
/// RTPFB format: temporary maximum media bitrate notification
pub const FMT_TMMBN: u8 = 4;
/// RTPFB format: rapid resynchronisation request
pub const FMT_RAPID_RESYNC: u8 = 5;
/// RTPFB format: transport-wide congestion control feedback
pub const FMT_TRANSPORT_FEEDBACK: u8 = 15;

/// PSFB format: picture loss indication
pub const FMT_PLI: u8 = 1;
/// PSFB format: slice loss indication
pub const FMT_SLI: u8 = 2;
/// PSFB format: reference picture selection indication
pub const FMT_RPSI: u8 = 3;
/// PSFB format: full intra request
pub const FMT_FIR: u8 = 4;
/// PSFB format: application layer feedback (REMB)
pub const FMT_APP: u8 = 15;

const COMMON_FEEDBACK_SIZE: usize = 8;

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn parse_common_feedback(data: &[u8]) -> Result<(RtpSsrc, RtpSsrc)> {
    if data.len() < COMMON_FEEDBACK_SIZE {
        return Err(RtcpError::BufferTooSmall {
            required: COMMON_FEEDBACK_SIZE,
            available: data.len(),
        });
    }
    Ok((read_u32(data, 0), read_u32(data, 4)))
}

/// One NACK FCI entry: a packet id and a bitmask of the following 16
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackPair {
    /// First lost packet id
    pub packet_id: u16,

    /// Bitmask of losses among the 16 following packets
    pub bitmask: u16,
}

impl NackPair {
    /// Expand the pair into the sequence numbers it covers
    pub fn packet_ids(&self) -> Vec<u16> {
        let mut ids = vec![self.packet_id];
        for bit in 0..16u16 {
            if self.bitmask & (1 << bit) != 0 {
                ids.push(self.packet_id.wrapping_add(bit + 1));
            }
        }
        ids
    }
}

/// Generic NACK (RFC 4585 Section 6.2.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpNack {
    /// SSRC of the feedback sender
    pub sender_ssrc: RtpSsrc,

    /// SSRC of the media source being NACKed
    pub media_ssrc: RtpSsrc,

    /// PID/BLP pairs
    pub items: Vec<NackPair>,
}

impl RtcpNack {
    /// All sequence numbers requested across the FCI entries
    pub fn packet_ids(&self) -> Vec<u16> {
        self.items.iter().flat_map(NackPair::packet_ids).collect()
    }

    /// Serialize the NACK payload (header excluded)
    pub fn serialize(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(COMMON_FEEDBACK_SIZE + self.items.len() * 4);
        buf.put_u32(self.sender_ssrc);
        buf.put_u32(self.media_ssrc);
        for item in &self.items {
            buf.put_u16(item.packet_id);
            buf.put_u16(item.bitmask);
        }
        Ok(buf)
    }
}

/// Parse a generic NACK payload
pub fn parse_nack(data: &[u8]) -> Result<RtcpNack> {
    let (sender_ssrc, media_ssrc) = parse_common_feedback(data)?;
    let fci = &data[COMMON_FEEDBACK_SIZE..];
    if fci.is_empty() || fci.len() % 4 != 0 {
        return Err(RtcpError::InvalidPacket(
            "NACK FCI length not a multiple of 4".to_string(),
        ));
    }

    let items = fci
        .chunks_exact(4)
        .map(|c| NackPair {
            packet_id: u16::from_be_bytes([c[0], c[1]]),
            bitmask: u16::from_be_bytes([c[2], c[3]]),
        })
        .collect();

    Ok(RtcpNack {
        sender_ssrc,
        media_ssrc,
        items,
    })
}

/// One TMMBR/TMMBN tuple (RFC 5104 Section 4.2.1.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TmmbItem {
    /// SSRC the tuple applies to (media sender for TMMBR, owner for TMMBN)
    pub ssrc: RtpSsrc,

    /// Maximum total media bitrate in bits per second
    pub bitrate_bps: u64,

    /// Measured per-packet overhead in bytes
    pub packet_overhead: u32,
}

impl TmmbItem {
    /// Wire size of one tuple in bytes
    pub const SIZE: usize = 8;

    fn parse(data: &[u8]) -> Self {
        let ssrc = read_u32(data, 0);
        let word = read_u32(data, 4);
        let exponent = word >> 26;
        let mantissa = (word >> 9) & 0x0001_FFFF;
        let packet_overhead = word & 0x01FF;
        Self {
            ssrc,
            bitrate_bps: (mantissa as u64) << exponent,
            packet_overhead,
        }
    }

    fn serialize(&self, buf: &mut impl BufMut) -> Result<()> {
        // Smallest exponent that fits the mantissa into 17 bits.
        let mut exponent = 0u32;
        let mut mantissa = self.bitrate_bps;
        while mantissa > 0x0001_FFFF {
            mantissa >>= 1;
            exponent += 1;
            if exponent > 63 {
                return Err(RtcpError::InvalidPacket(format!(
                    "TMMB bitrate not encodable: {} bps",
                    self.bitrate_bps
                )));
            }
        }
        buf.put_u32(self.ssrc);
        buf.put_u32((exponent << 26) | ((mantissa as u32) << 9) | (self.packet_overhead & 0x01FF));
        Ok(())
    }
}

/// Temporary Maximum Media Bitrate Request/Notification (RFC 5104)
///
/// TMMBR and TMMBN share a wire layout and differ only in the format field,
/// so one struct serves both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpTmmb {
    /// SSRC of the feedback sender
    pub sender_ssrc: RtpSsrc,

    /// Media SSRC; SHOULD be zero unless relayed
    pub media_ssrc: RtpSsrc,

    /// Requested or bounding tuples
    pub items: Vec<TmmbItem>,
}

impl RtcpTmmb {
    /// Serialize the TMMB payload (header excluded)
    pub fn serialize(&self) -> Result<BytesMut> {
        let mut buf =
            BytesMut::with_capacity(COMMON_FEEDBACK_SIZE + self.items.len() * TmmbItem::SIZE);
        buf.put_u32(self.sender_ssrc);
        buf.put_u32(self.media_ssrc);
        for item in &self.items {
            item.serialize(&mut buf)?;
        }
        Ok(buf)
    }
}

/// Parse a TMMBR or TMMBN payload
pub fn parse_tmmb(data: &[u8]) -> Result<RtcpTmmb> {
    let (sender_ssrc, media_ssrc) = parse_common_feedback(data)?;
    let fci = &data[COMMON_FEEDBACK_SIZE..];
    if fci.len() % TmmbItem::SIZE != 0 {
        return Err(RtcpError::InvalidPacket(
            "TMMB FCI length not a multiple of 8".to_string(),
        ));
    }

    let items = fci.chunks_exact(TmmbItem::SIZE).map(TmmbItem::parse).collect();

    Ok(RtcpTmmb {
        sender_ssrc,
        media_ssrc,
        items,
    })
}

/// Rapid resynchronisation request (RFC 6051)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcpRapidResyncRequest {
    /// SSRC of the feedback sender
    pub sender_ssrc: RtpSsrc,

    /// SSRC of the media source asked to resynchronise
    pub media_ssrc: RtpSsrc,
}

impl RtcpRapidResyncRequest {
    /// Serialize the payload (header excluded)
    pub fn serialize(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(COMMON_FEEDBACK_SIZE);
        buf.put_u32(self.sender_ssrc);
        buf.put_u32(self.media_ssrc);
        Ok(buf)
    }
}

/// Parse a rapid resync request payload
pub fn parse_rapid_resync(data: &[u8]) -> Result<RtcpRapidResyncRequest> {
    if data.len() != COMMON_FEEDBACK_SIZE {
        return Err(RtcpError::InvalidPacket(
            "rapid resync request carries no FCI".to_string(),
        ));
    }
    let (sender_ssrc, media_ssrc) = parse_common_feedback(data)?;
    Ok(RtcpRapidResyncRequest {
        sender_ssrc,
        media_ssrc,
    })
}

/// Transport-wide congestion control feedback
/// (draft-holmer-rmcat-transport-wide-cc-extensions)
///
/// Only the stable header is decoded; the packet status chunks and receive
/// deltas ride along opaquely for the congestion controller to interpret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFeedback {
    /// SSRC of the feedback sender
    pub sender_ssrc: RtpSsrc,

    /// SSRC of the media source the feedback describes
    pub media_ssrc: RtpSsrc,

    /// Transport-wide sequence number of the first packet covered
    pub base_sequence_number: u16,

    /// Number of packets covered by this feedback
    pub packet_status_count: u16,

    /// Reference time in 64 ms units (signed 24 bits)
    pub reference_time: i32,

    /// Feedback packet counter from the sender
    pub feedback_sequence_number: u8,

    /// Undecoded packet status chunks and receive deltas
    pub payload: Bytes,
}

impl TransportFeedback {
    const HEADER_SIZE: usize = 16;

    /// SSRC of the media source the feedback describes
    pub fn media_source_ssrc(&self) -> RtpSsrc {
        self.media_ssrc
    }

    /// Serialize the feedback payload (header excluded)
    pub fn serialize(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(Self::HEADER_SIZE + self.payload.len());
        buf.put_u32(self.sender_ssrc);
        buf.put_u32(self.media_ssrc);
        buf.put_u16(self.base_sequence_number);
        buf.put_u16(self.packet_status_count);
        let word =
            (((self.reference_time as u32) & 0x00FF_FFFF) << 8) | self.feedback_sequence_number as u32;
        buf.put_u32(word);
        buf.put_slice(&self.payload);
        // Status chunks are 16-bit; keep the packet word aligned.
        while buf.len() % 4 != 0 {
            buf.put_u8(0);
        }
        Ok(buf)
    }
}

/// Parse a transport-wide feedback payload
pub fn parse_transport_feedback(data: &[u8]) -> Result<TransportFeedback> {
    if data.len() < TransportFeedback::HEADER_SIZE {
        return Err(RtcpError::BufferTooSmall {
            required: TransportFeedback::HEADER_SIZE,
            available: data.len(),
        });
    }

    let sender_ssrc = read_u32(data, 0);
    let media_ssrc = read_u32(data, 4);
    let base_sequence_number = u16::from_be_bytes([data[8], data[9]]);
    let packet_status_count = u16::from_be_bytes([data[10], data[11]]);
    let word = read_u32(data, 12);
    let mut reference_time = (word >> 8) as i32;
    if reference_time & 0x0080_0000 != 0 {
        reference_time |= -0x0100_0000; // sign extend
    }
    let feedback_sequence_number = word as u8;

    Ok(TransportFeedback {
        sender_ssrc,
        media_ssrc,
        base_sequence_number,
        packet_status_count,
        reference_time,
        feedback_sequence_number,
        payload: Bytes::copy_from_slice(&data[TransportFeedback::HEADER_SIZE..]),
    })
}

/// Picture Loss Indication (RFC 4585 Section 6.3.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcpPli {
    /// SSRC of the feedback sender
    pub sender_ssrc: RtpSsrc,

    /// SSRC of the media source that lost a picture
    pub media_ssrc: RtpSsrc,
}

impl RtcpPli {
    /// Serialize the PLI payload (header excluded)
    pub fn serialize(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(COMMON_FEEDBACK_SIZE);
        buf.put_u32(self.sender_ssrc);
        buf.put_u32(self.media_ssrc);
        Ok(buf)
    }
}

/// Parse a PLI payload
pub fn parse_pli(data: &[u8]) -> Result<RtcpPli> {
    let (sender_ssrc, media_ssrc) = parse_common_feedback(data)?;
    Ok(RtcpPli {
        sender_ssrc,
        media_ssrc,
    })
}

/// One SLI entry: a run of lost macroblocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliEntry {
    /// First lost macroblock (13 bits)
    pub first: u16,

    /// Number of lost macroblocks (13 bits)
    pub number: u16,

    /// Picture id the loss applies to (6 bits)
    pub picture_id: u8,
}

/// Slice Loss Indication (RFC 4585 Section 6.3.2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpSli {
    /// SSRC of the feedback sender
    pub sender_ssrc: RtpSsrc,

    /// SSRC of the media source the loss applies to
    pub media_ssrc: RtpSsrc,

    /// Lost macroblock runs
    pub entries: Vec<SliEntry>,
}

impl RtcpSli {
    /// Serialize the SLI payload (header excluded)
    pub fn serialize(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(COMMON_FEEDBACK_SIZE + self.entries.len() * 4);
        buf.put_u32(self.sender_ssrc);
        buf.put_u32(self.media_ssrc);
        for entry in &self.entries {
            let word = ((entry.first as u32 & 0x1FFF) << 19)
                | ((entry.number as u32 & 0x1FFF) << 6)
                | (entry.picture_id as u32 & 0x3F);
            buf.put_u32(word);
        }
        Ok(buf)
    }
}

/// Parse an SLI payload
pub fn parse_sli(data: &[u8]) -> Result<RtcpSli> {
    let (sender_ssrc, media_ssrc) = parse_common_feedback(data)?;
    let fci = &data[COMMON_FEEDBACK_SIZE..];
    if fci.is_empty() || fci.len() % 4 != 0 {
        return Err(RtcpError::InvalidPacket(
            "SLI FCI length not a multiple of 4".to_string(),
        ));
    }

    let entries = fci
        .chunks_exact(4)
        .map(|c| {
            let word = u32::from_be_bytes([c[0], c[1], c[2], c[3]]);
            SliEntry {
                first: (word >> 19) as u16 & 0x1FFF,
                number: (word >> 6) as u16 & 0x1FFF,
                picture_id: (word & 0x3F) as u8,
            }
        })
        .collect();

    Ok(RtcpSli {
        sender_ssrc,
        media_ssrc,
        entries,
    })
}

/// Reference Picture Selection Indication (RFC 4585 Section 6.3.3)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpRpsi {
    /// SSRC of the feedback sender
    pub sender_ssrc: RtpSsrc,

    /// SSRC of the media source the indication applies to
    pub media_ssrc: RtpSsrc,

    /// RTP payload type the bit string belongs to (7 bits)
    pub payload_type: u8,

    /// Confirmed reference picture id, decoded 7 bits per bit-string byte
    pub picture_id: u64,
}

impl RtcpRpsi {
    /// Serialize the RPSI payload (header excluded)
    pub fn serialize(&self) -> Result<BytesMut> {
        // Encode the picture id 7 bits per byte, continuation bit on all but
        // the last byte.
        let significant = (64 - self.picture_id.leading_zeros()).max(1);
        let id_bytes = ((significant + 6) / 7) as usize;
        let mut bit_string = Vec::with_capacity(id_bytes);
        for i in (0..id_bytes).rev() {
            let mut byte = ((self.picture_id >> (7 * i)) & 0x7F) as u8;
            if i != 0 {
                byte |= 0x80;
            }
            bit_string.push(byte);
        }

        let unpadded = COMMON_FEEDBACK_SIZE + 2 + bit_string.len();
        let padding_bytes = (4 - unpadded % 4) % 4;

        let mut buf = BytesMut::with_capacity(unpadded + padding_bytes);
        buf.put_u32(self.sender_ssrc);
        buf.put_u32(self.media_ssrc);
        buf.put_u8((padding_bytes * 8) as u8);
        buf.put_u8(self.payload_type & 0x7F);
        buf.put_slice(&bit_string);
        for _ in 0..padding_bytes {
            buf.put_u8(0);
        }
        Ok(buf)
    }
}

/// Parse an RPSI payload
pub fn parse_rpsi(data: &[u8]) -> Result<RtcpRpsi> {
    let (sender_ssrc, media_ssrc) = parse_common_feedback(data)?;
    let fci = &data[COMMON_FEEDBACK_SIZE..];
    if fci.len() < 2 {
        return Err(RtcpError::BufferTooSmall {
            required: COMMON_FEEDBACK_SIZE + 2,
            available: data.len(),
        });
    }

    let padding_bits = fci[0] as usize;
    let payload_type = fci[1] & 0x7F;

    if padding_bits % 8 != 0 {
        return Err(RtcpError::InvalidPacket(
            "RPSI padding not byte aligned".to_string(),
        ));
    }
    let padding_bytes = padding_bits / 8;
    let bit_string = &fci[2..];
    if padding_bytes >= bit_string.len() {
        return Err(RtcpError::InvalidPacket(
            "RPSI padding longer than bit string".to_string(),
        ));
    }

    let mut picture_id: u64 = 0;
    for byte in &bit_string[..bit_string.len() - padding_bytes] {
        picture_id = (picture_id << 7) | (byte & 0x7F) as u64;
    }

    Ok(RtcpRpsi {
        sender_ssrc,
        media_ssrc,
        payload_type,
        picture_id,
    })
}

/// One FIR request entry (RFC 5104 Section 4.3.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirRequest {
    /// SSRC asked to produce a keyframe
    pub ssrc: RtpSsrc,

    /// Request sequence number, incremented per distinct request
    pub seq_nr: u8,
}

/// Full Intra Request (RFC 5104)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpFir {
    /// SSRC of the feedback sender
    pub sender_ssrc: RtpSsrc,

    /// Media SSRC; SHOULD be zero and is ignored
    pub media_ssrc: RtpSsrc,

    /// Keyframe requests
    pub requests: Vec<FirRequest>,
}

impl RtcpFir {
    /// Serialize the FIR payload (header excluded)
    pub fn serialize(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(COMMON_FEEDBACK_SIZE + self.requests.len() * 8);
        buf.put_u32(self.sender_ssrc);
        buf.put_u32(self.media_ssrc);
        for request in &self.requests {
            buf.put_u32(request.ssrc);
            buf.put_u8(request.seq_nr);
            buf.put_u8(0);
            buf.put_u16(0);
        }
        Ok(buf)
    }
}

/// Parse a FIR payload
pub fn parse_fir(data: &[u8]) -> Result<RtcpFir> {
    let (sender_ssrc, media_ssrc) = parse_common_feedback(data)?;
    let fci = &data[COMMON_FEEDBACK_SIZE..];
    if fci.is_empty() || fci.len() % 8 != 0 {
        return Err(RtcpError::InvalidPacket(
            "FIR FCI length not a multiple of 8".to_string(),
        ));
    }

    let requests = fci
        .chunks_exact(8)
        .map(|c| FirRequest {
            ssrc: u32::from_be_bytes([c[0], c[1], c[2], c[3]]),
            seq_nr: c[4],
        })
        .collect();

    Ok(RtcpFir {
        sender_ssrc,
        media_ssrc,
        requests,
    })
}

/// Receiver Estimated Max Bitrate, application-layer PSFB
/// (draft-alvestrand-rmcat-remb)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpRemb {
    /// SSRC of the feedback sender
    pub sender_ssrc: RtpSsrc,

    /// Estimated maximum bitrate in bits per second
    pub bitrate_bps: u64,

    /// SSRCs the estimate applies to
    pub ssrcs: Vec<RtpSsrc>,
}

const REMB_IDENTIFIER: [u8; 4] = *b"REMB";

impl RtcpRemb {
    /// Serialize the REMB payload (header excluded)
    pub fn serialize(&self) -> Result<BytesMut> {
        let mut exponent = 0u32;
        let mut mantissa = self.bitrate_bps;
        while mantissa > 0x0003_FFFF {
            mantissa >>= 1;
            exponent += 1;
            if exponent > 63 {
                return Err(RtcpError::InvalidPacket(format!(
                    "REMB bitrate not encodable: {} bps",
                    self.bitrate_bps
                )));
            }
        }

        let mut buf = BytesMut::with_capacity(16 + 4 * self.ssrcs.len());
        buf.put_u32(self.sender_ssrc);
        buf.put_u32(0); // media SSRC is always zero for REMB
        buf.put_slice(&REMB_IDENTIFIER);
        buf.put_u32(((self.ssrcs.len() as u32) << 24) | (exponent << 18) | mantissa as u32);
        for ssrc in &self.ssrcs {
            buf.put_u32(*ssrc);
        }
        Ok(buf)
    }
}

/// Parse a REMB payload; fails if the application identifier is not "REMB"
pub fn parse_remb(data: &[u8]) -> Result<RtcpRemb> {
    if data.len() < 16 {
        return Err(RtcpError::BufferTooSmall {
            required: 16,
            available: data.len(),
        });
    }
    let (sender_ssrc, _media_ssrc) = parse_common_feedback(data)?;

    if data[8..12] != REMB_IDENTIFIER {
        return Err(RtcpError::InvalidPacket(
            "PSFB APP without REMB identifier".to_string(),
        ));
    }

    let word = read_u32(data, 12);
    let num_ssrcs = (word >> 24) as usize;
    let exponent = (word >> 18) & 0x3F;
    let mantissa = (word & 0x0003_FFFF) as u64;

    if data.len() < 16 + num_ssrcs * 4 {
        return Err(RtcpError::BufferTooSmall {
            required: 16 + num_ssrcs * 4,
            available: data.len(),
        });
    }
    let ssrcs = (0..num_ssrcs).map(|i| read_u32(data, 16 + i * 4)).collect();

    Ok(RtcpRemb {
        sender_ssrc,
        bitrate_bps: mantissa << exponent,
        ssrcs,
    })
}
