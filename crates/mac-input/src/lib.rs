//! mac-input: the macOS backend for keyfocus.
//!
//! Implements the engine's capability traits on top of the system:
//! - [`TisInputSources`]: Text Input Source Services for listing and
//!   selecting keyboard input sources.
//! - [`Workspace`]: `NSWorkspace` running applications and frontmost app.
//! - [`AxFocusObserver`]: one Accessibility observer per process, reporting
//!   `AXFocusedWindowChanged` and `AXApplicationActivated`.
//! - [`WorkspaceObservers`]: launch/activate/terminate notifications plus
//!   the distributed input-source-changed notification.
//!
//! All callbacks are delivered on the main run loop and forwarded to the
//! engine through the sink set with [`set_sink`]. The binary must run the
//! main run loop ([`run_current`]) on its main thread.
//!
//! On other platforms the crate is empty.

#[cfg(target_os = "macos")]
mod observer;
#[cfg(target_os = "macos")]
mod permissions;
#[cfg(target_os = "macos")]
mod runloop;
#[cfg(target_os = "macos")]
mod sink;
#[cfg(target_os = "macos")]
mod sources;
#[cfg(target_os = "macos")]
mod workspace;

#[cfg(target_os = "macos")]
pub use macos::*;

#[cfg(target_os = "macos")]
mod macos {
    use std::sync::Arc;

    use keyfocus_engine::{Deps, SystemClock};

    pub use crate::{
        observer::AxFocusObserver,
        permissions::accessibility_ok,
        runloop::{run_current, stop_main},
        sink::{clear_sink, set_sink},
        sources::TisInputSources,
        workspace::{Workspace, WorkspaceObservers},
    };

    /// Engine capabilities backed by the live system.
    pub fn system_deps() -> Deps {
        Deps {
            sources: Arc::new(TisInputSources::new()),
            processes: Arc::new(Workspace::new()),
            observer: Arc::new(AxFocusObserver::new()),
            clock: Arc::new(SystemClock),
        }
    }
}
