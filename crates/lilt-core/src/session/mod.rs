//! Playback sessions
//!
//! A session owns one opened file, its decode/stretch state, a ring buffer
//! and an output bus. Control operations (load, play, seek, ...) run on the
//! caller's thread and are serialised per session; the output backend's
//! thread pulls samples through [`AudioSession::audio_callback`].
//!
//! # Lock order
//!
//! `control` → `decode` → `timing` → `stretcher` → `bus`. The state lock is
//! a leaf and is never held while posting notifications. The audio thread
//! only ever `try_lock`s `control`; if a control operation holds it the
//! refill (or loop restart) is retried on the next callback.

mod playback;
mod seek;
#[allow(clippy::module_inception)]
mod session;
mod state;
mod timing;

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

pub use session::AudioSession;
pub use state::PlayState;
pub use timing::{LoopAnchor, PlaybackTiming};

/// Opaque per-process session handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lock ignoring poison; a panicked holder leaves plain data behind
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Non-blocking lock for the audio thread
pub(crate) fn try_lock<T>(mutex: &Mutex<T>) -> Option<MutexGuard<'_, T>> {
    match mutex.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}
