//! Programmatic input source switching with echo suppression.
//!
//! Input-source-changed notifications arrive asynchronously, carry no payload
//! and look the same whether we or the user caused them. Each switch arms a
//! short window that expects one echo per apply. A notification whose live
//! source is one of the ids we requested inside the window is an echo and is
//! dropped. Anything else (a different id, or the same id after the window)
//! is a genuine user change.
//!
//! Several applies in a row may all read back as the final source, since the
//! live source is sampled when each notification is handled. Echoes are
//! therefore counted, not matched one id per apply.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{Clock, InputSources, Preference, Result};

/// Default suppression window.
pub const DEFAULT_SUPPRESSION_MS: u64 = 200;

/// Switch coordinator state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SwitchState {
    /// No switch in flight.
    #[default]
    Idle,
    /// Waiting for the echo of one or more applies.
    Switching {
        /// Source ids an echo may read back as.
        expected: Vec<String>,
        /// Echoes still outstanding.
        pending: usize,
        /// End of the suppression window.
        armed_until: Instant,
    },
}

/// Performs switches and classifies echoes. Clones share state.
#[derive(Clone)]
pub struct SwitchCoordinator {
    sources: Arc<dyn InputSources>,
    clock: Arc<dyn Clock>,
    window: Duration,
    state: Arc<Mutex<SwitchState>>,
    /// Bumped on every arm so an older disarm timer never clears a newer switch.
    generation: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl SwitchCoordinator {
    /// Create an idle coordinator.
    pub fn new(sources: Arc<dyn InputSources>, clock: Arc<dyn Clock>, window: Duration) -> Self {
        Self {
            sources,
            clock,
            window,
            state: Arc::new(Mutex::new(SwitchState::Idle)),
            generation: Arc::new(AtomicU64::new(0)),
            cancel: CancellationToken::new(),
        }
    }

    /// Suppression window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> SwitchState {
        self.state.lock().clone()
    }

    /// True while an echo is still expected.
    pub fn is_armed(&self) -> bool {
        matches!(*self.state.lock(), SwitchState::Switching { .. })
    }

    /// Switch to `pref`. Returns immediately; disarm happens on the matching
    /// echo or when the window elapses. The window is armed even when the
    /// apply fails.
    pub fn perform_switch(&self, pref: &Preference) -> Result<()> {
        self.perform_sequence(std::slice::from_ref(pref))
    }

    /// Apply each of `prefs` in order, suppressing one echo per apply.
    ///
    /// A failed intermediate hop is logged and skipped. Returns the result of
    /// the final apply, which decides the source left selected.
    pub fn perform_sequence(&self, prefs: &[Preference]) -> Result<()> {
        let Some((last, hops)) = prefs.split_last() else {
            return Ok(());
        };
        let mut expected: Vec<String> = Vec::with_capacity(prefs.len());
        for p in prefs {
            if !expected.iter().any(|id| id == p.id()) {
                expected.push(p.id().to_string());
            }
        }
        let generation = self.arm(expected, prefs.len());
        for pref in hops {
            match self.sources.apply(pref) {
                Ok(()) => debug!(source = pref.id(), "input source applied"),
                Err(e) => warn!("{}", e),
            }
        }
        // Left armed on failure; the window disarms it. No retry: focus may have moved on.
        let res = self.sources.apply(last);
        if res.is_ok() {
            debug!(source = last.id(), "input source applied");
        }
        self.schedule_disarm(generation);
        res
    }

    fn arm(&self, expected: Vec<String>, pending: usize) -> u64 {
        let armed_until = self.clock.now() + self.window;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(?expected, pending, "suppression armed");
        *self.state.lock() = SwitchState::Switching {
            expected,
            pending,
            armed_until,
        };
        generation
    }

    fn schedule_disarm(&self, generation: u64) {
        // Without a runtime, expiry is detected lazily by `is_echo`.
        let Ok(rt) = Handle::try_current() else {
            return;
        };
        let state = self.state.clone();
        let current = self.generation.clone();
        let cancel = self.cancel.clone();
        let window = self.window;
        rt.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(window) => {
                    if current.load(Ordering::Acquire) == generation {
                        let mut st = state.lock();
                        if matches!(*st, SwitchState::Switching { .. }) {
                            trace!("suppression window elapsed");
                            *st = SwitchState::Idle;
                        }
                    }
                }
            }
        });
    }

    /// Classify an observed input source change.
    ///
    /// Returns true when `observed_id` is an echo of our own switch. Each echo
    /// consumes one pending apply; the coordinator returns to idle once none
    /// remain.
    pub fn is_echo(&self, observed_id: &str) -> bool {
        let now = self.clock.now();
        let mut st = self.state.lock();
        let SwitchState::Switching {
            expected,
            pending,
            armed_until,
        } = &mut *st
        else {
            return false;
        };
        if now > *armed_until {
            *st = SwitchState::Idle;
            return false;
        }
        if !expected.iter().any(|id| id == observed_id) {
            return false;
        }
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            *st = SwitchState::Idle;
        }
        true
    }

    /// Cancel pending disarm timers and return to idle.
    pub fn cancel(&self) {
        self.cancel.cancel();
        *self.state.lock() = SwitchState::Idle;
    }
}
