//! Process-global channel that OS callbacks push engine events into.
//!
//! AX callbacks and notification blocks run on the main thread with no
//! way to capture Rust state safely, so they emit through this sink.

use keyfocus_engine::SystemEvent;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

static SINK: Lazy<Mutex<Option<UnboundedSender<SystemEvent>>>> = Lazy::new(|| Mutex::new(None));

/// Route subsequent events to `tx`, replacing any previous sink.
pub fn set_sink(tx: UnboundedSender<SystemEvent>) {
    *SINK.lock() = Some(tx);
}

/// Drop the sink; later events are discarded.
pub fn clear_sink() {
    SINK.lock().take();
}

/// Deliver `ev` to the engine if a sink is installed.
pub(crate) fn emit(ev: SystemEvent) {
    let guard = SINK.lock();
    match &*guard {
        Some(tx) => {
            if tx.send(ev).is_err() {
                trace!("engine event channel closed");
            }
        }
        None => trace!(?ev, "no sink installed; dropping event"),
    }
}
