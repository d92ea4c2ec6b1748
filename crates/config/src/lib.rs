//! Persisted settings for keyfocus.
//!
//! Settings live in a small TOML file, by default `~/.keyfocus/config.toml`:
//!
//! ```toml
//! mode = "per-application"
//! default_source = "com.apple.keylayout.US"
//! suppression_ms = 200
//! prime_first_switch = true
//! ignored_bundles = ["com.apple.dock"]
//! ```
//!
//! Every key is optional. A missing file yields [`Settings::default`].
use std::{
    env,
    path::{Path, PathBuf},
};

mod error;
mod settings;

pub use error::{Error, excerpt_at};
pub use settings::{
    DEFAULT_IGNORED_BUNDLES, MAX_SUPPRESSION_MS, MIN_SUPPRESSION_MS, Settings, load, load_from_str,
    save,
};

/// Directory under `$HOME` holding keyfocus state.
const CONFIG_DIR: &str = ".keyfocus";
/// File name of the settings file.
const CONFIG_FILE: &str = "config.toml";

/// Default settings location: `~/.keyfocus/config.toml`.
pub fn default_config_path() -> PathBuf {
    let home = env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(CONFIG_DIR).join(CONFIG_FILE)
}

/// Resolve the settings path, preferring an explicit override.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    explicit.map_or_else(default_config_path, Path::to_path_buf)
}
