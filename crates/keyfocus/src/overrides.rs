use config::Settings;
use keyfocus_engine::EngineCfg;
use keyfocus_ids::TrackingMode;

/// Command-line values that take precedence over the settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    /// Force per-window tracking.
    pub per_window: bool,
    /// Replace the suppression window.
    pub suppression_ms: Option<u64>,
    /// Disable first-switch priming.
    pub no_prime: bool,
}

/// Merge persisted settings and command-line overrides into engine settings.
pub fn engine_cfg(settings: &Settings, overrides: &Overrides) -> EngineCfg {
    let mut s = settings.clone();
    if overrides.per_window {
        s.mode = TrackingMode::PerWindow;
    }
    if let Some(ms) = overrides.suppression_ms {
        s.suppression_ms = ms;
    }
    if overrides.no_prime {
        s.prime_first_switch = false;
    }
    EngineCfg {
        mode: s.mode,
        suppression_window: s.suppression_window(),
        prime_first_switch: s.prime_first_switch,
        ignored_bundles: s.ignored_bundles,
        default_source: s.default_source,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn settings_pass_through_without_overrides() {
        let settings = Settings {
            default_source: Some("fr".into()),
            ..Settings::default()
        };
        let cfg = engine_cfg(&settings, &Overrides::default());
        assert_eq!(cfg.mode, TrackingMode::PerApplication);
        assert_eq!(cfg.suppression_window, Duration::from_millis(200));
        assert!(cfg.prime_first_switch);
        assert_eq!(cfg.default_source.as_deref(), Some("fr"));
        assert_eq!(cfg.ignored_bundles, settings.ignored_bundles);
    }

    #[test]
    fn flags_override_file_values() {
        let settings = Settings {
            suppression_ms: 300,
            ..Settings::default()
        };
        let cfg = engine_cfg(
            &settings,
            &Overrides {
                per_window: true,
                suppression_ms: Some(50),
                no_prime: true,
            },
        );
        assert_eq!(cfg.mode, TrackingMode::PerWindow);
        assert_eq!(cfg.suppression_window, Duration::from_millis(50));
        assert!(!cfg.prime_first_switch);
    }
}
