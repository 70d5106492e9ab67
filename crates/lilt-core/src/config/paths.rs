//! Standard locations for lilt configuration files

use std::path::PathBuf;

/// Directory holding lilt configuration
///
/// Returns: `{user config dir}/lilt` (e.g. `~/.config/lilt` on Linux),
/// or `./lilt` when the platform reports no config directory.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lilt")
}

/// Path of a config file inside [`config_dir`]
pub fn default_config_path(filename: &str) -> PathBuf {
    config_dir().join(filename)
}
