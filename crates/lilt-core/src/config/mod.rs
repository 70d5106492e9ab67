//! Engine configuration
//!
//! # Usage
//!
//! ```ignore
//! use lilt_core::config::{default_config_path, load_config, save_config, EngineConfig};
//!
//! let path = default_config_path("engine.yaml");
//! let config: EngineConfig = load_config(&path);
//! save_config(&config, &path)?;
//! ```

mod engine;
mod io;
mod paths;

pub use engine::EngineConfig;
pub use io::{load_config, save_config};
pub use paths::{config_dir, default_config_path};
