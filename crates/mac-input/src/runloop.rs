//! Main run loop control.
//!
//! AX run loop sources and notification observers deliver on the main run
//! loop, so the binary parks its main thread here.

use core_foundation::runloop::CFRunLoop;
use tracing::debug;

/// Run the current thread's run loop until [`stop_main`] is called.
pub fn run_current() {
    debug!("entering main run loop");
    CFRunLoop::run_current();
    debug!("main run loop exited");
}

/// Stop the main run loop. Safe to call from any thread.
pub fn stop_main() {
    CFRunLoop::get_main().stop();
}
