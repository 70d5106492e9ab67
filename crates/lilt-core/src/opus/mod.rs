//! Opus-in-Ogg mapping: identification header and packet decoding

mod decoder;
mod header;

pub use decoder::{DecoderFactory, OpusDecoderFactory, OpusPacketDecoder, PacketDecoder};
pub use header::{is_opus_head, is_opus_tags, OpusHeader, OPUS_HEAD_MAGIC, OPUS_TAGS_MAGIC};
