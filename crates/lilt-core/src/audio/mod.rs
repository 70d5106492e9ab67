//! Output backends
//!
//! Sessions never talk to a device directly. They acquire a bus on an
//! [`AudioOutput`], install a pull callback and adjust volume/mute; the
//! backend's delivering thread drains every bus through a [`BusMixer`].
//!
//! - [`CpalOutput`]: real device through CPAL (feature `cpal-output`)
//! - [`OfflineOutput`]: no device, the caller drives `render()`
//!
//! # Example Usage
//!
//! ```ignore
//! use lilt_core::audio::{AudioOutput, OfflineOutput};
//!
//! let output = OfflineOutput::new(2);
//! output.start()?;
//! let bus = output.acquire_bus()?;
//! output.set_bus_callback(bus, Some(pull));
//! let block = output.render(480);
//! ```

mod bus;
mod config;
mod error;
mod offline;

#[cfg(feature = "cpal-output")]
mod cpal_backend;

pub use bus::{BusId, BusMixer, BusTable, PullFn, CLIP_LEVEL, MAX_BUSES};
pub use config::{BufferSize, OutputConfig, DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE};
pub use error::{AudioError, AudioResult};
pub use offline::OfflineOutput;

#[cfg(feature = "cpal-output")]
pub use cpal_backend::CpalOutput;

/// Platform output consumed by sessions
///
/// Implementors provide the bus table and device start/stop; bus control is
/// shared.
pub trait AudioOutput: Send + Sync {
    fn buses(&self) -> &BusTable;

    /// Open/start the output; idempotent
    fn start(&self) -> AudioResult<()>;

    /// Stop the output; idempotent
    fn stop(&self);

    fn acquire_bus(&self) -> AudioResult<BusId> {
        self.buses().acquire()
    }

    fn release_bus(&self, bus: BusId) {
        self.buses().release(bus)
    }

    fn set_bus_volume(&self, bus: BusId, volume: f32) {
        self.buses().set_volume(bus, volume)
    }

    fn mute_bus(&self, bus: BusId, muted: bool) {
        self.buses().set_muted(bus, muted)
    }

    fn set_bus_callback(&self, bus: BusId, callback: Option<PullFn>) {
        self.buses().set_callback(bus, callback)
    }
}
