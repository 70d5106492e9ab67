//! Ogg container primitives
//!
//! Page capture with absolute file offsets ([`PageSync`]) and packet
//! reassembly for one logical stream ([`PacketAssembler`]). Offsets matter:
//! the seek index records where every page starts so decoding can restart
//! from any page boundary.

pub mod crc;
mod packet;
mod page;

pub use packet::{OggPacket, PacketAssembler};
pub use page::{
    OggPage, PageSync, CAPTURE_PATTERN, FLAG_BOS, FLAG_CONTINUED, FLAG_EOS, HEADER_SIZE,
    NO_GRANULE,
};
