//! Test support utilities for keyfocus-engine unit and integration tests.
//! These helpers are public to avoid dead_code warnings and are lightweight.
//! They are intended for use by the test suite only.

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use keyfocus_ids::ProcessInfo;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::{
    Clock, Deps, Engine, EngineCfg, Error, FocusObserver, InputSources, Notice, ObservationHandle,
    Preference, ProcessDirectory, Result,
};

/// Clock that only moves when told to.
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Start at the current instant.
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move time forward by `d`.
    pub fn advance(&self, d: Duration) {
        *self.offset.lock() += d;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}

#[derive(Default)]
struct SourcesState {
    all: Vec<Preference>,
    current: Option<Preference>,
    applied: Vec<String>,
    failing: HashSet<String>,
}

/// In-memory input sources. The first source is selected initially.
#[derive(Default)]
pub struct MockInputSources {
    state: Mutex<SourcesState>,
}

impl MockInputSources {
    /// Create sources with the given ids (names equal ids).
    pub fn new(ids: &[&str]) -> Self {
        let all: Vec<Preference> = ids.iter().map(|id| Preference::new(*id, *id)).collect();
        let current = all.first().cloned();
        Self {
            state: Mutex::new(SourcesState {
                all,
                current,
                ..SourcesState::default()
            }),
        }
    }

    /// Installed source with `id`.
    ///
    /// # Panics
    /// Panics when no source has that id.
    pub fn pref(&self, id: &str) -> Preference {
        self.by_id(id)
            .unwrap_or_else(|| panic!("mock has no source {id}"))
    }

    /// Simulate the user selecting `id` (no engine involvement).
    pub fn select(&self, id: &str) {
        let p = self.pref(id);
        self.state.lock().current = Some(p);
    }

    /// Id of the currently selected source.
    pub fn current_id(&self) -> Option<String> {
        self.state.lock().current.as_ref().map(|p| p.id().to_string())
    }

    /// Ids passed to `apply`, in order (including failed attempts).
    pub fn applied(&self) -> Vec<String> {
        self.state.lock().applied.clone()
    }

    /// Forget recorded applies.
    pub fn clear_applied(&self) {
        self.state.lock().applied.clear();
    }

    /// Make `apply` fail for `id`.
    pub fn fail_apply(&self, id: &str) {
        self.state.lock().failing.insert(id.to_string());
    }
}

impl InputSources for MockInputSources {
    fn current(&self) -> Option<Preference> {
        self.state.lock().current.clone()
    }

    fn all(&self) -> Vec<Preference> {
        self.state.lock().all.clone()
    }

    fn apply(&self, pref: &Preference) -> Result<()> {
        let mut st = self.state.lock();
        st.applied.push(pref.id().to_string());
        if st.failing.contains(pref.id()) {
            return Err(Error::ApplyPreference {
                id: pref.id().to_string(),
                reason: "mock failure".into(),
            });
        }
        st.current = Some(pref.clone());
        Ok(())
    }
}

/// In-memory process directory.
#[derive(Default)]
pub struct MockProcesses {
    running: Mutex<Vec<ProcessInfo>>,
    frontmost: Mutex<Option<i32>>,
}

impl MockProcesses {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a running process.
    pub fn launch(&self, p: ProcessInfo) {
        let mut running = self.running.lock();
        running.retain(|x| x.pid != p.pid);
        running.push(p);
    }

    /// Remove a process.
    pub fn terminate(&self, pid: i32) {
        self.running.lock().retain(|x| x.pid != pid);
    }

    /// Mark `pid` as frontmost.
    pub fn set_frontmost(&self, pid: Option<i32>) {
        *self.frontmost.lock() = pid;
    }
}

impl ProcessDirectory for MockProcesses {
    fn running(&self) -> Vec<ProcessInfo> {
        self.running.lock().clone()
    }

    fn frontmost(&self) -> Option<ProcessInfo> {
        let pid = (*self.frontmost.lock())?;
        self.lookup(pid)
    }

    fn lookup(&self, pid: i32) -> Option<ProcessInfo> {
        self.running.lock().iter().find(|p| p.pid == pid).cloned()
    }
}

#[derive(Default)]
struct ObserverCounters {
    created: AtomicUsize,
    live: AtomicUsize,
    registered: AtomicUsize,
    unregistered: AtomicUsize,
}

/// Observation factory that counts handle lifecycles.
#[derive(Default)]
pub struct MockFocusObserver {
    counters: Arc<ObserverCounters>,
    fail_create: Mutex<HashSet<i32>>,
    fail_register: Mutex<HashSet<i32>>,
}

impl MockFocusObserver {
    /// Create a factory where every operation succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create` fail for `pid`.
    pub fn fail_create(&self, pid: i32) {
        self.fail_create.lock().insert(pid);
    }

    /// Make `register_focus` fail for `pid`.
    pub fn fail_register(&self, pid: i32) {
        self.fail_register.lock().insert(pid);
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.fail_create.lock().clear();
        self.fail_register.lock().clear();
    }

    /// Handles ever created.
    pub fn created(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
    }

    /// Handles not yet dropped.
    pub fn live(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    /// Successful registrations.
    pub fn registered(&self) -> usize {
        self.counters.registered.load(Ordering::SeqCst)
    }

    /// Unregistrations.
    pub fn unregistered(&self) -> usize {
        self.counters.unregistered.load(Ordering::SeqCst)
    }
}

struct MockHandle {
    pid: i32,
    fail_register: bool,
    counters: Arc<ObserverCounters>,
}

impl ObservationHandle for MockHandle {
    fn register_focus(&mut self) -> Result<()> {
        if self.fail_register {
            return Err(Error::ObservationRegister {
                pid: self.pid,
                code: -25204,
            });
        }
        self.counters.registered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unregister_focus(&mut self) {
        self.counters.unregistered.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FocusObserver for MockFocusObserver {
    fn create(&self, pid: i32) -> Result<Box<dyn ObservationHandle>> {
        if self.fail_create.lock().contains(&pid) {
            return Err(Error::ObservationCreate { pid, code: -25211 });
        }
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        self.counters.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockHandle {
            pid,
            fail_register: self.fail_register.lock().contains(&pid),
            counters: self.counters.clone(),
        }))
    }
}

/// An engine wired to mocks, plus handles to every mock.
pub struct Harness {
    /// Engine under test.
    pub engine: Engine,
    /// Mock input sources (`en`, `fr`, `de`; `en` selected).
    pub sources: Arc<MockInputSources>,
    /// Mock process directory.
    pub processes: Arc<MockProcesses>,
    /// Mock observation factory.
    pub observer: Arc<MockFocusObserver>,
    /// Manual clock driving suppression.
    pub clock: Arc<ManualClock>,
    /// Notices emitted by the engine.
    pub notices: UnboundedReceiver<Notice>,
}

impl Harness {
    /// Build a harness with `cfg`.
    pub fn new(cfg: EngineCfg) -> Self {
        let sources = Arc::new(MockInputSources::new(&["en", "fr", "de"]));
        let processes = Arc::new(MockProcesses::new());
        let observer = Arc::new(MockFocusObserver::new());
        let clock = Arc::new(ManualClock::new());
        let (tx, notices) = mpsc::unbounded_channel();
        let deps = Deps {
            sources: sources.clone(),
            processes: processes.clone(),
            observer: observer.clone(),
            clock: clock.clone(),
        };
        Self {
            engine: Engine::new(deps, cfg, tx),
            sources,
            processes,
            observer,
            clock,
            notices,
        }
    }

    /// Build a harness with priming disabled and default timings.
    pub fn quiet() -> Self {
        Self::new(EngineCfg {
            prime_first_switch: false,
            ..EngineCfg::default()
        })
    }

    /// Drain notices received so far.
    pub fn drain_notices(&mut self) -> Vec<Notice> {
        let mut out = Vec::new();
        while let Ok(n) = self.notices.try_recv() {
            out.push(n);
        }
        out
    }
}
