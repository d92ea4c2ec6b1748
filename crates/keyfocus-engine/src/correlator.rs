//! Collapse raw focus signals into one deduplicated stream of target changes.

use keyfocus_ids::{FocusTargetId, ProcessInfo, TrackingMode, resolve};

/// Tracks the last delivered focus target.
///
/// Every focus signal (per-process AX notification or workspace activation)
/// is resolved through [`resolve`]; a change is reported only when the id
/// differs from the previous one.
#[derive(Debug, Default)]
pub struct FocusCorrelator {
    mode: TrackingMode,
    current: Option<FocusTargetId>,
}

impl FocusCorrelator {
    /// Create a correlator with no current target.
    pub fn new(mode: TrackingMode) -> Self {
        Self {
            mode,
            current: None,
        }
    }

    /// Active tracking mode.
    pub fn mode(&self) -> TrackingMode {
        self.mode
    }

    /// Last delivered target.
    pub fn current(&self) -> Option<&FocusTargetId> {
        self.current.as_ref()
    }

    /// Switch mode. Ids from the old mode are meaningless, so the current
    /// target is forgotten.
    pub fn set_mode(&mut self, mode: TrackingMode) {
        self.mode = mode;
        self.current = None;
    }

    /// Feed a focus signal for `process`. Returns the new target when it
    /// differs from the current one.
    pub fn observe(&mut self, process: &ProcessInfo) -> Option<FocusTargetId> {
        let id = resolve(process, self.mode);
        if self.current.as_ref() == Some(&id) {
            return None;
        }
        self.current = Some(id.clone());
        Some(id)
    }

    /// Feed a termination for `process`. Always returns the closed target.
    pub fn close(&mut self, process: &ProcessInfo) -> FocusTargetId {
        let id = resolve(process, self.mode);
        if self.current.as_ref() == Some(&id) {
            self.current = None;
        }
        id
    }
}
