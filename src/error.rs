use thiserror::Error;

/// Error type for RTCP parsing and receiver operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RtcpError {
    /// Buffer too small for the structure being parsed
    #[error("Buffer too small for RTCP packet: need {required} but have {available}")]
    BufferTooSmall { required: usize, available: usize },

    /// Common header carried a version other than 2
    #[error("Invalid RTCP version: {0}")]
    InvalidVersion(u8),

    /// Declared block length exceeds the remaining datagram
    #[error("Invalid RTCP length field: {declared} bytes declared but {available} available")]
    InvalidLength { declared: usize, available: usize },

    /// Padding flag set but the padding count is inconsistent
    #[error("Invalid RTCP padding: {0} padding bytes in a {1} byte payload")]
    InvalidPadding(usize, usize),

    /// Payload type this crate does not handle
    #[error("Unsupported RTCP packet type: {0}")]
    UnsupportedPacketType(u8),

    /// Known feedback payload type with an unknown format field
    #[error("Unsupported RTCP feedback format: type {packet_type} fmt {format}")]
    UnsupportedFeedbackFormat { packet_type: u8, format: u8 },

    /// Structurally invalid packet contents
    #[error("Invalid RTCP packet: {0}")]
    InvalidPacket(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let buffer_err = RtcpError::BufferTooSmall {
            required: 24,
            available: 8,
        };
        assert_eq!(
            buffer_err.to_string(),
            "Buffer too small for RTCP packet: need 24 but have 8"
        );

        let version_err = RtcpError::InvalidVersion(1);
        assert_eq!(version_err.to_string(), "Invalid RTCP version: 1");

        let fmt_err = RtcpError::UnsupportedFeedbackFormat {
            packet_type: 205,
            format: 9,
        };
        assert_eq!(
            fmt_err.to_string(),
            "Unsupported RTCP feedback format: type 205 fmt 9"
        );
    }
}
