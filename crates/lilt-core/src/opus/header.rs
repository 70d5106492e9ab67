//! `OpusHead` identification header
//!
//! ```text
//!  0  "OpusHead"
//!  8  version (u8, major version in the high nibble must be 0)
//!  9  output channel count (u8)
//! 10  pre-skip (u16 LE, 48kHz samples)
//! 12  input sample rate (u32 LE, informational only)
//! 16  output gain (i16 LE, Q7.8 dB)
//! 18  channel mapping family (u8)
//! ```

use crate::error::{EngineError, EngineResult, ErrorKind};

pub const OPUS_HEAD_MAGIC: &[u8; 8] = b"OpusHead";
pub const OPUS_TAGS_MAGIC: &[u8; 8] = b"OpusTags";

/// Minimum size of an `OpusHead` packet
pub const OPUS_HEAD_MIN_LEN: usize = 19;

/// Parsed identification header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpusHeader {
    pub version: u8,
    pub channels: u8,
    /// Samples to discard from the start of decoded output
    pub pre_skip: u16,
    /// Sample rate of the original input (decoding always happens at 48kHz)
    pub input_sample_rate: u32,
    /// Output gain in Q7.8 dB
    pub output_gain: i16,
    pub mapping_family: u8,
}

impl OpusHeader {
    /// Parse the first packet of the stream
    ///
    /// A packet that does not start with `OpusHead` is not an Opus stream
    /// at all ([`ErrorKind::InvalidFormat`]); a truncated or malformed one
    /// is [`ErrorKind::OpusInvalidHeader`].
    pub fn parse(packet: &[u8]) -> EngineResult<Self> {
        if !is_opus_head(packet) {
            return Err(EngineError::new(
                ErrorKind::InvalidFormat,
                "first packet is not an OpusHead header",
            ));
        }
        if packet.len() < OPUS_HEAD_MIN_LEN {
            return Err(EngineError::new(
                ErrorKind::OpusInvalidHeader,
                format!("OpusHead too short ({} bytes)", packet.len()),
            ));
        }

        let version = packet[8];
        if version >> 4 != 0 {
            return Err(EngineError::new(
                ErrorKind::OpusInvalidHeader,
                format!("unsupported OpusHead version {}", version),
            ));
        }
        let channels = packet[9];
        if channels == 0 {
            return Err(EngineError::new(
                ErrorKind::OpusInvalidHeader,
                "OpusHead declares zero channels",
            ));
        }

        Ok(Self {
            version,
            channels,
            pre_skip: u16::from_le_bytes([packet[10], packet[11]]),
            input_sample_rate: u32::from_le_bytes([packet[12], packet[13], packet[14], packet[15]]),
            output_gain: i16::from_le_bytes([packet[16], packet[17]]),
            mapping_family: packet[18],
        })
    }

    /// Output gain in dB
    pub fn gain_db(&self) -> f32 {
        self.output_gain as f32 / 256.0
    }

    /// Serialize back to packet form (19 bytes, no mapping table)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(OPUS_HEAD_MIN_LEN);
        out.extend_from_slice(OPUS_HEAD_MAGIC);
        out.push(self.version);
        out.push(self.channels);
        out.extend_from_slice(&self.pre_skip.to_le_bytes());
        out.extend_from_slice(&self.input_sample_rate.to_le_bytes());
        out.extend_from_slice(&self.output_gain.to_le_bytes());
        out.push(self.mapping_family);
        out
    }
}

pub fn is_opus_head(packet: &[u8]) -> bool {
    packet.starts_with(OPUS_HEAD_MAGIC)
}

pub fn is_opus_tags(packet: &[u8]) -> bool {
    packet.starts_with(OPUS_TAGS_MAGIC)
}
