//! Capability boundary: everything the engine consumes from the platform.
//!
//! The engine never talks to the OS directly. A backend (the `mac-input`
//! crate in production, [`crate::test_support`] mocks in tests) implements
//! these traits and pushes lifecycle and notification events into the
//! engine's [`crate::SystemEvent`] channel.

use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
    time::Instant,
};

use keyfocus_ids::ProcessInfo;

use crate::Result;

/// Handle to a keyboard input source.
///
/// Compared and hashed by its stable id only; the name is display text.
#[derive(Clone)]
pub struct Preference {
    id: Arc<str>,
    name: Arc<str>,
}

impl Preference {
    /// Wrap an input source obtained from a capability.
    pub fn new(id: impl Into<Arc<str>>, name: impl Into<Arc<str>>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Stable identifier (e.g. `com.apple.keylayout.US`).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for Preference {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Preference {}

impl Hash for Preference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Preference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Preference({})", self.id)
    }
}

impl fmt::Display for Preference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Keyboard input source API.
pub trait InputSources: Send + Sync {
    /// The currently selected input source.
    fn current(&self) -> Option<Preference>;
    /// All selectable input sources.
    fn all(&self) -> Vec<Preference>;
    /// Apply `pref` as the current input source.
    fn apply(&self, pref: &Preference) -> Result<()>;

    /// Look up an installed source by id.
    fn by_id(&self, id: &str) -> Option<Preference> {
        self.all().into_iter().find(|p| p.id() == id)
    }
    /// Display name for `pref`.
    fn name(&self, pref: &Preference) -> Option<String> {
        Some(pref.name().to_string())
    }
    /// Stable id for `pref`.
    fn id(&self, pref: &Preference) -> Option<String> {
        Some(pref.id().to_string())
    }
}

/// Directory of running processes.
pub trait ProcessDirectory: Send + Sync {
    /// Every running process that may receive focus.
    fn running(&self) -> Vec<ProcessInfo>;
    /// The process that currently owns focus, if any.
    fn frontmost(&self) -> Option<ProcessInfo>;
    /// Describe a single process.
    fn lookup(&self, pid: i32) -> Option<ProcessInfo>;
}

/// A live subscription to one process's focus-changed notifications.
///
/// Dropping the handle disposes of it and must roll back any run loop
/// registration made while creating it.
pub trait ObservationHandle: Send {
    /// Start delivering focus-changed notifications.
    fn register_focus(&mut self) -> Result<()>;
    /// Stop delivering notifications. Best-effort: the process may be gone.
    fn unregister_focus(&mut self);
}

/// Factory for per-process observation handles.
pub trait FocusObserver: Send + Sync {
    /// Create an unregistered handle for `pid`.
    fn create(&self, pid: i32) -> Result<Box<dyn ObservationHandle>>;
}

/// Monotonic time source for the switch coordinator.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Bundle of platform capabilities handed to [`crate::Engine::new`].
#[derive(Clone)]
pub struct Deps {
    /// Input source API.
    pub sources: Arc<dyn InputSources>,
    /// Running process directory.
    pub processes: Arc<dyn ProcessDirectory>,
    /// Per-process focus observation.
    pub observer: Arc<dyn FocusObserver>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}
