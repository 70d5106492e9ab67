//! Lilt Core - Opus-in-Ogg session playback engine

pub mod analyze;
pub mod audio;
pub mod buffer;
pub mod config;
pub mod context;
pub mod error;
pub mod notify;
pub mod ogg;
pub mod opus;
pub mod player;
pub mod pool;
pub mod session;
pub mod stream;
pub mod timestretch;
pub mod types;

#[cfg(test)]
mod test_support;

pub use context::EngineContext;
pub use error::{EngineError, EngineResult, ErrorKind};
pub use player::AudioPlayer;
pub use session::{AudioSession, PlayState, SessionId};
pub use types::*;
