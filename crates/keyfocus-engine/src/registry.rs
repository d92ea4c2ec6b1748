//! Per-PID observation handle registry.
//!
//! Maintains exactly one live [`ObservationHandle`] per relevant process:
//! - Handles are created on launch/activation (or at bootstrap) and dropped
//!   on termination.
//! - Background-only processes, our own pid, and ignored bundles are skipped.
//! - A failed create or register leaves nothing behind; the partially built
//!   handle is dropped, which rolls back its run loop registration.
//!
//! Errors never escalate past this module. They are logged (warn once per
//! bundle, debug afterwards) and the process is retried on its next
//! activation.

use std::{
    collections::{HashMap, HashSet},
    process,
    sync::Arc,
};

use keyfocus_ids::ProcessInfo;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::{FocusObserver, ObservationHandle, Result};

/// Why [`ObserverRegistry::attach`] declined to observe a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Background-only process.
    NonInteractive,
    /// The engine's own process.
    OwnProcess,
    /// Bundle listed in the ignore set.
    Ignored,
    /// Invalid pid.
    InvalidPid,
}

/// Outcome of an attach attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attach {
    /// A new handle was created and registered.
    Created,
    /// A handle already existed for this process.
    Existing,
    /// The process is not observed.
    Skipped(SkipReason),
    /// Creation or registration failed; nothing was recorded.
    Failed,
}

/// One registered handle and the process it belongs to.
struct Watched {
    process: ProcessInfo,
    handle: Box<dyn ObservationHandle>,
}

impl Watched {
    fn release(mut self) {
        self.handle.unregister_focus();
    }
}

/// Thread-safe registry for per-PID observers.
///
/// The map lock is held across create/register for a pid, so at most one
/// attach or detach is in flight per registry at a time.
pub struct ObserverRegistry {
    observer: Arc<dyn FocusObserver>,
    inner: Mutex<HashMap<i32, Watched>>,
    ignored: HashSet<String>,
    warned: Mutex<HashSet<String>>,
    self_pid: i32,
}

impl ObserverRegistry {
    /// Create an empty registry backed by `observer`.
    pub fn new(observer: Arc<dyn FocusObserver>, ignored: impl IntoIterator<Item = String>) -> Self {
        Self {
            observer,
            inner: Mutex::new(HashMap::new()),
            ignored: ignored.into_iter().collect(),
            warned: Mutex::new(HashSet::new()),
            // -1 is rejected as an invalid pid before it is compared.
            self_pid: i32::try_from(process::id()).unwrap_or(-1),
        }
    }

    fn skip_reason(&self, process: &ProcessInfo) -> Option<SkipReason> {
        if process.pid <= 0 {
            Some(SkipReason::InvalidPid)
        } else if process.pid == self.self_pid {
            Some(SkipReason::OwnProcess)
        } else if !process.policy.is_interactive() {
            Some(SkipReason::NonInteractive)
        } else if self.ignored.contains(process.bundle()) {
            Some(SkipReason::Ignored)
        } else {
            None
        }
    }

    /// Ensure a handle exists for `process`, propagating the failure.
    pub fn try_attach(&self, process: &ProcessInfo) -> Result<Attach> {
        if let Some(reason) = self.skip_reason(process) {
            trace!(pid = process.pid, ?reason, "attach skipped");
            return Ok(Attach::Skipped(reason));
        }
        let mut map = self.inner.lock();
        if let Some(existing) = map.get(&process.pid) {
            if existing.process.bundle() == process.bundle() {
                return Ok(Attach::Existing);
            }
            // Pid reused by a different bundle; the old handle is stale.
            debug!(
                pid = process.pid,
                old = existing.process.bundle(),
                new = process.bundle(),
                "replacing stale observer"
            );
            if let Some(stale) = map.remove(&process.pid) {
                stale.release();
            }
        }
        let mut handle = self.observer.create(process.pid)?;
        // On failure `handle` drops here and disposes of itself.
        handle.register_focus()?;
        map.insert(
            process.pid,
            Watched {
                process: process.clone(),
                handle,
            },
        );
        debug!(pid = process.pid, app = process.label(), "observer attached");
        Ok(Attach::Created)
    }

    /// Ensure a handle exists for `process`, logging any failure.
    pub fn attach(&self, process: &ProcessInfo) -> Attach {
        match self.try_attach(process) {
            Ok(a) => a,
            Err(e) => {
                let first = self.warned.lock().insert(process.bundle().to_string());
                if first {
                    warn!("observer attach failed for '{}': {}", process.label(), e);
                } else {
                    debug!("observer attach failed for '{}': {}", process.label(), e);
                }
                Attach::Failed
            }
        }
    }

    /// Remove and release the handle for `pid` if present.
    pub fn detach(&self, pid: i32) -> bool {
        let removed = self.inner.lock().remove(&pid);
        match removed {
            Some(w) => {
                debug!(pid, app = w.process.label(), "observer detached");
                w.release();
                true
            }
            None => false,
        }
    }

    /// Attach to every process in `processes`; returns how many were created.
    pub fn bootstrap(&self, processes: impl IntoIterator<Item = ProcessInfo>) -> usize {
        processes
            .into_iter()
            .filter(|p| self.attach(p) == Attach::Created)
            .count()
    }

    /// Release every handle; returns how many were removed.
    pub fn detach_all(&self) -> usize {
        let drained: Vec<Watched> = self.inner.lock().drain().map(|(_, w)| w).collect();
        let n = drained.len();
        for w in drained {
            w.release();
        }
        n
    }

    /// Process descriptor recorded for a watched pid.
    pub fn process(&self, pid: i32) -> Option<ProcessInfo> {
        self.inner.lock().get(&pid).map(|w| w.process.clone())
    }

    /// True when `pid` has a live handle.
    pub fn contains(&self, pid: i32) -> bool {
        self.inner.lock().contains_key(&pid)
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True when no handle is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for ObserverRegistry {
    fn drop(&mut self) {
        self.detach_all();
    }
}

#[cfg(test)]
mod tests {
    use keyfocus_ids::ActivationPolicy;

    use super::*;
    use crate::test_support::MockFocusObserver;

    fn registry(obs: &Arc<MockFocusObserver>) -> ObserverRegistry {
        ObserverRegistry::new(obs.clone(), ["com.apple.dock".to_string()])
    }

    #[test]
    fn attach_is_idempotent_and_detach_releases() {
        let obs = Arc::new(MockFocusObserver::new());
        let reg = registry(&obs);
        let p = ProcessInfo::new(100, "com.example.editor").with_name("Editor");
        assert_eq!(reg.attach(&p), Attach::Created);
        assert_eq!(reg.attach(&p), Attach::Existing);
        assert_eq!(reg.len(), 1);
        assert_eq!(obs.live(), 1);
        assert_eq!(obs.registered(), 1, "existing handle is not re-registered");
        assert_eq!(reg.process(100).map(|p| p.label().to_string()), Some("Editor".into()));
        assert!(reg.detach(100));
        assert!(!reg.detach(100), "second detach is a no-op");
        assert!(reg.is_empty());
        assert_eq!(obs.live(), 0);
        assert_eq!(obs.unregistered(), 1);
    }

    #[test]
    fn skips_non_interactive_self_and_ignored() {
        let obs = Arc::new(MockFocusObserver::new());
        let reg = registry(&obs);
        let bg = ProcessInfo::new(5, "com.example.daemon").with_policy(ActivationPolicy::Prohibited);
        assert_eq!(
            reg.attach(&bg),
            Attach::Skipped(SkipReason::NonInteractive)
        );
        let own_pid = i32::try_from(process::id()).expect("pid fits in i32");
        let me = ProcessInfo::new(own_pid, "com.example.self");
        assert_eq!(reg.attach(&me), Attach::Skipped(SkipReason::OwnProcess));
        let dock = ProcessInfo::new(6, "com.apple.dock");
        assert_eq!(reg.attach(&dock), Attach::Skipped(SkipReason::Ignored));
        assert_eq!(obs.created(), 0);
    }

    #[test]
    fn failed_register_leaves_no_partial_state() {
        let obs = Arc::new(MockFocusObserver::new());
        obs.fail_register(200);
        let reg = registry(&obs);
        let p = ProcessInfo::new(200, "com.example.locked");
        assert_eq!(reg.attach(&p), Attach::Failed);
        assert!(!reg.contains(200));
        assert_eq!(obs.created(), 1);
        assert_eq!(obs.registered(), 0);
        assert_eq!(obs.live(), 0, "handle rolled back on drop");
    }

    #[test]
    fn failure_for_one_process_does_not_block_others() {
        let obs = Arc::new(MockFocusObserver::new());
        obs.fail_create(2);
        let reg = registry(&obs);
        let procs = vec![
            ProcessInfo::new(1, "a"),
            ProcessInfo::new(2, "b"),
            ProcessInfo::new(3, "c"),
        ];
        assert_eq!(reg.bootstrap(procs), 2);
        assert!(reg.contains(1) && reg.contains(3));
        assert!(!reg.contains(2));
        // Retry succeeds once the failure clears.
        obs.clear_failures();
        assert_eq!(reg.attach(&ProcessInfo::new(2, "b")), Attach::Created);
    }

    #[test]
    fn reused_pid_replaces_stale_handle() {
        let obs = Arc::new(MockFocusObserver::new());
        let reg = registry(&obs);
        assert_eq!(reg.attach(&ProcessInfo::new(9, "old")), Attach::Created);
        assert_eq!(reg.attach(&ProcessInfo::new(9, "new")), Attach::Created);
        assert_eq!(reg.len(), 1);
        assert_eq!(obs.live(), 1);
        assert_eq!(reg.process(9).map(|p| p.bundle().to_string()), Some("new".into()));
    }

    #[test]
    fn detach_all_and_drop_release_everything() {
        let obs = Arc::new(MockFocusObserver::new());
        {
            let reg = registry(&obs);
            reg.bootstrap((1..=4).map(|pid| ProcessInfo::new(pid, format!("app{pid}"))));
            assert_eq!(reg.detach_all(), 4);
            reg.attach(&ProcessInfo::new(7, "late"));
        }
        assert_eq!(obs.live(), 0);
    }
}
