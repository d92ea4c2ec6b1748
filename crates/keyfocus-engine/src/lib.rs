//! keyfocus engine
//!
//! Keeps the keyboard input source in sync with the focused application:
//! - restores the remembered source when focus moves to a target
//! - assigns the default source to targets seen for the first time
//! - records sources the user picks manually while a target is focused
//! - ignores the echo notifications caused by its own switches
//!
//! The engine is platform-neutral. It consumes the capabilities in [`deps`]
//! and receives [`SystemEvent`]s and [`Command`]s over channels; all state
//! mutation happens on the single [`Engine::run`] loop. Every engine instance
//! owns its own registry, store, and switch state, so several engines can
//! coexist in one process (as the tests do).
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

mod correlator;
pub mod deps;
mod error;
mod notification;
mod registry;
mod store;
mod switch;
pub mod test_support;

use keyfocus_ids::{FocusTargetId, ProcessInfo, TrackingMode};
use parking_lot::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub use correlator::FocusCorrelator;
pub use deps::{
    Clock, Deps, FocusObserver, InputSources, ObservationHandle, Preference, ProcessDirectory,
    SystemClock,
};
pub use error::{Error, Result};
pub use notification::{Notice, NotificationDispatcher};
pub use registry::{Attach, ObserverRegistry, SkipReason};
pub use store::PreferenceStore;
pub use switch::{DEFAULT_SUPPRESSION_MS, SwitchCoordinator, SwitchState};

/// Events delivered by the platform backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemEvent {
    /// A watched process reported a focused-window change.
    Focused {
        /// Reporting process.
        pid: i32,
    },
    /// The workspace activated an application.
    Activated(ProcessInfo),
    /// An application launched.
    Launched(ProcessInfo),
    /// An application terminated.
    Terminated(ProcessInfo),
    /// The selected input source changed (system-wide, no payload).
    PreferenceChanged,
}

/// Requests from UI collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Use the given tracking mode. Clears all mappings when it changes.
    SetMode(TrackingMode),
    /// Flip between per-application and per-window tracking.
    ToggleMode,
    /// Drop every mapping.
    ClearMappings,
    /// Use the source with this id as the default.
    SetDefault(String),
    /// Detach everything and stop the run loop.
    Shutdown,
}

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineCfg {
    /// Initial tracking mode.
    pub mode: TrackingMode,
    /// How long after a switch its echo is suppressed.
    pub suppression_window: Duration,
    /// Prime the notification pipeline on the first focus change.
    pub prime_first_switch: bool,
    /// Bundle ids never observed.
    pub ignored_bundles: Vec<String>,
    /// Persisted default source id.
    pub default_source: Option<String>,
}

impl Default for EngineCfg {
    fn default() -> Self {
        Self {
            mode: TrackingMode::PerApplication,
            suppression_window: Duration::from_millis(DEFAULT_SUPPRESSION_MS),
            prime_first_switch: true,
            ignored_bundles: Vec::new(),
            default_source: None,
        }
    }
}

/// Engine coordinates focus correlation, the preference store and switching.
///
/// Construct via [`Engine::new`], call [`Engine::start`] once, then drive it
/// with [`Engine::run`] (or feed [`Engine::handle_event`] directly in tests).
#[derive(Clone)]
pub struct Engine {
    sources: Arc<dyn InputSources>,
    processes: Arc<dyn ProcessDirectory>,
    store: PreferenceStore,
    registry: Arc<ObserverRegistry>,
    switcher: SwitchCoordinator,
    /// Current target and mode. Only the run loop mutates it.
    correlator: Arc<Mutex<FocusCorrelator>>,
    notifier: NotificationDispatcher,
    /// Set once the first-switch priming has run (or was skipped).
    primed: Arc<AtomicBool>,
    configured_default: Option<String>,
    shutdown: CancellationToken,
}

impl Engine {
    /// Create an engine.
    ///
    /// - `deps`: platform capabilities
    /// - `cfg`: engine settings
    /// - `notice_tx`: channel for [`Notice`]s to the UI layer
    pub fn new(deps: Deps, cfg: EngineCfg, notice_tx: UnboundedSender<Notice>) -> Self {
        let switcher =
            SwitchCoordinator::new(deps.sources.clone(), deps.clock, cfg.suppression_window);
        Self {
            sources: deps.sources,
            processes: deps.processes,
            store: PreferenceStore::new(),
            registry: Arc::new(ObserverRegistry::new(deps.observer, cfg.ignored_bundles)),
            switcher,
            correlator: Arc::new(Mutex::new(FocusCorrelator::new(cfg.mode))),
            notifier: NotificationDispatcher::new(notice_tx),
            primed: Arc::new(AtomicBool::new(!cfg.prime_first_switch)),
            configured_default: cfg.default_source,
            shutdown: CancellationToken::new(),
        }
    }

    /// Shared preference store; safe to query from any thread.
    pub fn store(&self) -> &PreferenceStore {
        &self.store
    }

    /// Observer registry.
    pub fn registry(&self) -> &ObserverRegistry {
        &self.registry
    }

    /// Switch coordinator.
    pub fn switcher(&self) -> &SwitchCoordinator {
        &self.switcher
    }

    /// Active tracking mode.
    pub fn mode(&self) -> TrackingMode {
        self.correlator.lock().mode()
    }

    /// Last delivered focus target.
    pub fn current_target(&self) -> Option<FocusTargetId> {
        self.correlator.lock().current().cloned()
    }

    /// Seed the default source, attach to running processes and bind the
    /// frontmost one. Returns the number of observers attached.
    pub fn start(&self) -> usize {
        let configured = self
            .configured_default
            .as_deref()
            .and_then(|id| match self.sources.by_id(id) {
                Some(p) => Some(p),
                None => {
                    warn!("configured default input source '{}' is not installed", id);
                    None
                }
            });
        if let Some(default) = configured.or_else(|| self.sources.current()) {
            info!(source = default.id(), "default input source");
            self.store.set_default(default);
        } else {
            warn!("no input source available for default");
        }
        let attached = self.registry.bootstrap(self.processes.running());
        info!(
            attached,
            suppression = ?self.switcher.window(),
            "focus observers bootstrapped"
        );
        if let Some(front) = self.processes.frontmost() {
            self.focus(&front);
        }
        attached
    }

    /// Serialize events and commands until shutdown.
    pub async fn run(
        &self,
        mut events: UnboundedReceiver<SystemEvent>,
        mut commands: UnboundedReceiver<Command>,
    ) -> Result<()> {
        let mut commands_open = true;
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                cmd = commands.recv(), if commands_open => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        debug!("command channel closed");
                        commands_open = false;
                    }
                },
                ev = events.recv() => match ev {
                    Some(ev) => self.handle_event(ev),
                    None => {
                        info!("event source closed; stopping");
                        self.shutdown();
                        break;
                    }
                },
            }
        }
        Ok(())
    }

    /// Process one backend event.
    pub fn handle_event(&self, ev: SystemEvent) {
        trace!(?ev, "event");
        match ev {
            SystemEvent::Focused { pid } => {
                let process = self
                    .registry
                    .process(pid)
                    .or_else(|| self.processes.lookup(pid))
                    .unwrap_or(ProcessInfo {
                        pid,
                        ..ProcessInfo::default()
                    });
                self.focus(&process);
            }
            SystemEvent::Activated(process) => {
                // Opportunistic retry for processes whose attach failed earlier.
                self.registry.attach(&process);
                self.focus(&process);
            }
            SystemEvent::Launched(process) => {
                self.registry.attach(&process);
            }
            SystemEvent::Terminated(process) => {
                self.registry.detach(process.pid);
                let id = self.correlator.lock().close(&process);
                self.on_focus_closed(&id);
            }
            SystemEvent::PreferenceChanged => {
                let Some(observed) = self.sources.current() else {
                    return;
                };
                if self.switcher.is_echo(observed.id()) {
                    debug!(source = observed.id(), "echo suppressed");
                    return;
                }
                self.on_preference_manually_changed(observed);
            }
        }
    }

    /// Process one UI command.
    pub fn handle_command(&self, cmd: Command) {
        debug!(?cmd, "command");
        match cmd {
            Command::SetMode(mode) => self.set_mode(mode),
            Command::ToggleMode => self.set_mode(self.mode().toggled()),
            Command::ClearMappings => self.clear_mappings(),
            Command::SetDefault(id) => {
                if let Err(e) = self.set_default(&id) {
                    warn!("{}", e);
                }
            }
            Command::Shutdown => self.shutdown(),
        }
    }

    fn focus(&self, process: &ProcessInfo) {
        let changed = self.correlator.lock().observe(process);
        if let Some(id) = changed {
            self.on_focus_changed(&id);
        }
    }

    /// A new focus target became current: restore or assign its source.
    ///
    /// Nothing is applied when the live source already equals the target's.
    /// [`Notice::Switched`] is sent only after a successful apply.
    pub fn on_focus_changed(&self, id: &FocusTargetId) {
        debug!(target = %id, "focus changed");
        self.notifier.send(Notice::FocusChanged(id.clone()));
        let target = match self.store.get(id) {
            Some(p) => p,
            None => {
                let Some(default) = self.store.get_default() else {
                    debug!(target = %id, "no mapping and no default");
                    return;
                };
                self.store.set(id.clone(), default.clone());
                default
            }
        };
        let live = self.sources.current();
        let applied = if !self.primed.swap(true, Ordering::AcqRel) {
            self.prime(live.as_ref(), &target)
        } else if live.as_ref() == Some(&target) {
            trace!(target = %id, source = target.id(), "already selected");
            return;
        } else {
            self.switcher.perform_switch(&target).map(|()| true)
        };
        match applied {
            Ok(true) => self.notifier.send(Notice::Switched {
                target: id.clone(),
                preference: target,
            }),
            Ok(false) => {}
            Err(e) => warn!(target = %id, "{}", e),
        }
    }

    /// The first input-source-changed notification is unreliable until a
    /// switch has gone through, so hop through another source on the way to
    /// `target`. Each hop is suppressed as an echo. Returns false when
    /// nothing was applied.
    fn prime(&self, live: Option<&Preference>, target: &Preference) -> Result<bool> {
        let away = self
            .sources
            .all()
            .into_iter()
            .find(|p| p != target && Some(p) != live);
        match away {
            Some(away) => {
                debug!(via = away.id(), to = target.id(), "priming input source notifications");
                self.switcher.perform_sequence(&[away, target.clone()])?;
                Ok(true)
            }
            None if live != Some(target) => {
                self.switcher.perform_switch(target)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// A focus target's process terminated: drop its mapping.
    pub fn on_focus_closed(&self, id: &FocusTargetId) {
        debug!(target = %id, "focus closed");
        self.store.remove(id);
        self.notifier.send(Notice::FocusClosed(id.clone()));
    }

    /// The user picked `pref` while the current target was focused.
    pub fn on_preference_manually_changed(&self, pref: Preference) {
        let Some(target) = self.current_target() else {
            debug!(source = pref.id(), "manual change with no focus target");
            return;
        };
        debug!(target = %target, source = pref.id(), "recording manual change");
        self.store.set(target.clone(), pref.clone());
        self.notifier.send(Notice::Recorded {
            target,
            preference: pref,
        });
    }

    /// Change tracking mode. Mappings keyed under the old mode are dropped and
    /// the current target is forgotten; the store stays empty until the next
    /// focus event binds a target under the new mode.
    pub fn set_mode(&self, mode: TrackingMode) {
        {
            let mut c = self.correlator.lock();
            if c.mode() == mode {
                return;
            }
            c.set_mode(mode);
        }
        let n = self.store.clear();
        debug!(removed = n, "mappings dropped for mode change");
        self.notifier.send(Notice::ModeChanged(mode));
    }

    /// Drop every mapping.
    pub fn clear_mappings(&self) {
        let n = self.store.clear();
        info!(removed = n, "mappings cleared");
        self.notifier.send(Notice::Cleared);
    }

    /// Use the installed source `id` as the default.
    pub fn set_default(&self, id: &str) -> Result<Preference> {
        let pref = self
            .sources
            .by_id(id)
            .ok_or_else(|| Error::UnknownPreference(id.to_string()))?;
        self.store.set_default(pref.clone());
        self.notifier.send(Notice::DefaultChanged(pref.clone()));
        Ok(pref)
    }

    /// Detach every observer, cancel suppression timers and stop [`Engine::run`].
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let detached = self.registry.detach_all();
        self.switcher.cancel();
        self.shutdown.cancel();
        info!(detached, "engine shut down");
    }

    /// True once [`Engine::shutdown`] has run.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
