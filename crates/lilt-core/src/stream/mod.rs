//! Opus-in-Ogg stream reading and page indexing
//!
//! ```text
//! file bytes ─► PageSync ─► PacketAssembler ─► PacketDecoder ─► mono PCM
//!                  │
//!                  └─► PageIndex (offset, size, granule) ─► seek lookup
//! ```

mod page_index;
#[allow(clippy::module_inception)]
mod stream;

pub use page_index::{PageEntry, PageIndex, PageStartPos};
pub use stream::{OggOpusStream, DEFAULT_READ_CHUNK};
