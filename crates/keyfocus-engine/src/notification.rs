use keyfocus_ids::{FocusTargetId, TrackingMode};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, trace};

use crate::Preference;

/// Messages for UI collaborators (menu bar, status display).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A new focus target became current.
    FocusChanged(FocusTargetId),
    /// A focus target's process terminated.
    FocusClosed(FocusTargetId),
    /// The engine switched input source for a target.
    Switched {
        /// Target the switch was made for.
        target: FocusTargetId,
        /// Source applied.
        preference: Preference,
    },
    /// A manual change was recorded for a target.
    Recorded {
        /// Target the change applies to.
        target: FocusTargetId,
        /// Source chosen by the user.
        preference: Preference,
    },
    /// The default source changed and should be persisted.
    DefaultChanged(Preference),
    /// Tracking mode changed; all mappings were dropped.
    ModeChanged(TrackingMode),
    /// All mappings were dropped on request.
    Cleared,
}

/// Sends notices to the UI layer. Delivery is best-effort: the UI may be absent.
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: UnboundedSender<Notice>,
}

impl NotificationDispatcher {
    /// Create a dispatcher from a notice channel.
    pub fn new(tx: UnboundedSender<Notice>) -> Self {
        Self { tx }
    }

    /// Send `notice`, ignoring a closed channel.
    pub fn send(&self, notice: Notice) {
        match &notice {
            Notice::DefaultChanged(p) => info!(source = p.id(), "default input source changed"),
            Notice::ModeChanged(m) => info!(mode = %m, "tracking mode changed"),
            _ => {}
        }
        if self.tx.send(notice).is_err() {
            trace!("notice channel closed");
        }
    }
}
