use std::{fs, io, path::Path, time::Duration};

use keyfocus_ids::TrackingMode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, excerpt_at, line_col};

/// Smallest accepted suppression window.
pub const MIN_SUPPRESSION_MS: u64 = 20;
/// Largest accepted suppression window.
pub const MAX_SUPPRESSION_MS: u64 = 5_000;

/// System surfaces that never own a useful input source.
pub const DEFAULT_IGNORED_BUNDLES: &[&str] = &[
    "com.apple.dock",
    "com.apple.WindowManager",
    "com.apple.Spotlight",
    "com.apple.controlcenter",
    "com.apple.notificationcenterui",
];

/// User settings persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// How focus targets are keyed.
    pub mode: TrackingMode,
    /// Input source id assigned to targets seen for the first time.
    pub default_source: Option<String>,
    /// Echo suppression window in milliseconds.
    pub suppression_ms: u64,
    /// Hop through another source on the first switch of a session.
    pub prime_first_switch: bool,
    /// Bundle ids that are never observed.
    pub ignored_bundles: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: TrackingMode::default(),
            default_source: None,
            suppression_ms: 200,
            prime_first_switch: true,
            ignored_bundles: DEFAULT_IGNORED_BUNDLES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

impl Settings {
    /// Suppression window as a duration.
    pub fn suppression_window(&self) -> Duration {
        Duration::from_millis(self.suppression_ms)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), Error> {
        if !(MIN_SUPPRESSION_MS..=MAX_SUPPRESSION_MS).contains(&self.suppression_ms) {
            return Err(Error::Validation {
                path: None,
                message: format!(
                    "suppression_ms must be between {MIN_SUPPRESSION_MS} and {MAX_SUPPRESSION_MS}, got {}",
                    self.suppression_ms
                ),
            });
        }
        if let Some(id) = &self.default_source
            && id.trim().is_empty()
        {
            return Err(Error::Validation {
                path: None,
                message: "default_source must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Record `id` as the default source in the file at `path`.
    ///
    /// Other keys in the file are preserved; a missing file is created.
    pub fn set_default_source(path: &Path, id: &str) -> Result<Self, Error> {
        let mut settings = load(path)?;
        if settings.default_source.as_deref() == Some(id) {
            return Ok(settings);
        }
        settings.default_source = Some(id.to_string());
        save(path, &settings)?;
        info!(source = id, path = %path.display(), "saved default input source");
        Ok(settings)
    }

    /// Re-read the file at `path` and return its default source id.
    ///
    /// Used to pick up an edit made while the engine is running.
    pub fn load_default_source(path: &Path) -> Result<Option<String>, Error> {
        let settings = load(path)?;
        debug!(
            source = ?settings.default_source,
            path = %path.display(),
            "reloaded default input source"
        );
        Ok(settings.default_source)
    }
}

/// Parse and validate settings from TOML text.
pub fn load_from_str(source: &str) -> Result<Settings, Error> {
    let settings: Settings = toml::from_str(source).map_err(|e| {
        let (line, col) = e
            .span()
            .map_or((1, 1), |span| line_col(source, span.start));
        Error::Parse {
            path: None,
            line,
            col,
            message: e.message().to_string(),
            excerpt: excerpt_at(source, line, col),
        }
    })?;
    settings.validate()?;
    Ok(settings)
}

/// Load settings from `path`. A missing file yields defaults.
pub fn load(path: &Path) -> Result<Settings, Error> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file; using defaults");
            return Ok(Settings::default());
        }
        Err(e) => {
            return Err(Error::Read {
                path: Some(path.to_path_buf()),
                message: e.to_string(),
            });
        }
    };
    load_from_str(&text).map_err(|e| e.with_path(path))
}

/// Write `settings` to `path`, replacing it atomically.
pub fn save(path: &Path, settings: &Settings) -> Result<(), Error> {
    let write_err = |message: String| Error::Write {
        path: path.to_path_buf(),
        message,
    };
    let text = toml::to_string_pretty(settings).map_err(|e| write_err(e.to_string()))?;
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir).map_err(|e| write_err(e.to_string()))?;
    }
    let tmp = path.with_extension("toml.tmp");
    fs::write(&tmp, text).map_err(|e| write_err(e.to_string()))?;
    fs::rename(&tmp, path).map_err(|e| {
        fs::remove_file(&tmp).ok();
        write_err(e.to_string())
    })
}
