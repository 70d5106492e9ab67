//! Session lifecycle states and the transition table
//!
//! ```text
//!            ┌──────────────────────────────────────────┐
//!            ▼                                          │
//!   IDLE ─► LOADING ─► READY ─► PLAYING ◄─► PAUSED      │
//!    ▲         │         │        │  ▲         │        │
//!    │         ▼         │        ▼  │         ▼        │
//!    └──────── IDLE ◄────┴──── STOPPED ◄───────┘        │
//!                                                       │
//!   any state except ERROR ─► ERROR ─► IDLE / LOADING ──┘
//! ```

use std::fmt;

/// Playback state of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PlayState {
    Idle = 0,
    Loading = 1,
    Ready = 2,
    Playing = 3,
    Paused = 4,
    Stopped = 5,
    Error = 6,
}

impl PlayState {
    pub const ALL: [PlayState; 7] = [
        PlayState::Idle,
        PlayState::Loading,
        PlayState::Ready,
        PlayState::Playing,
        PlayState::Paused,
        PlayState::Stopped,
        PlayState::Error,
    ];

    /// States reachable from `self` in one step
    pub fn allowed_targets(self) -> &'static [PlayState] {
        use PlayState::*;
        match self {
            Idle => &[Loading, Error],
            Loading => &[Ready, Idle, Error],
            Ready => &[Playing, Idle, Error],
            Playing => &[Paused, Stopped, Error],
            Paused => &[Playing, Stopped, Error],
            Stopped => &[Playing, Idle, Error],
            Error => &[Idle, Loading],
        }
    }

    pub fn can_transition_to(self, to: PlayState) -> bool {
        self.allowed_targets().contains(&to)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlayState::Idle => "IDLE",
            PlayState::Loading => "LOADING",
            PlayState::Ready => "READY",
            PlayState::Playing => "PLAYING",
            PlayState::Paused => "PAUSED",
            PlayState::Stopped => "STOPPED",
            PlayState::Error => "ERROR",
        }
    }

    pub(crate) fn from_u8(value: u8) -> PlayState {
        match value {
            1 => PlayState::Loading,
            2 => PlayState::Ready,
            3 => PlayState::Playing,
            4 => PlayState::Paused,
            5 => PlayState::Stopped,
            6 => PlayState::Error,
            _ => PlayState::Idle,
        }
    }
}

impl fmt::Display for PlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
