//! Output backend errors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    /// No usable output device (none at all, or no default)
    #[error("no output device: {0}")]
    NoDevice(String),

    #[error("output device {0:?} not found")]
    DeviceNotFound(String),

    /// The device can't run mono-sourced f32 at 48 kHz
    #[error("device configuration rejected: {0}")]
    Config(String),

    #[error("could not open output stream: {0}")]
    StreamOpen(String),

    #[error("could not start output stream: {0}")]
    StreamStart(String),

    /// Every input bus is taken
    #[error("all {0} output buses are in use")]
    NoFreeBus(usize),

    /// The thread owning the device stream died before reporting back
    #[error("output thread failed: {0}")]
    OutputThread(String),
}

pub type AudioResult<T> = Result<T, AudioError>;
