use std::{io, result::Result as StdResult};

use thiserror::Error;

/// Convenient result type for the engine crate.
pub type Result<T> = StdResult<T, Error>;

/// Unified error type for the keyfocus engine.
///
/// None of these are fatal to focus tracking: per-process failures are
/// contained by the observer registry, and apply failures only affect the
/// switch that produced them.
#[derive(Debug, Error)]
pub enum Error {
    /// The observation handle for a process could not be created.
    #[error("failed to create focus observer for pid {pid} (code {code})")]
    ObservationCreate {
        /// Target process.
        pid: i32,
        /// Platform status code.
        code: i32,
    },

    /// The focus notification could not be registered on a created handle.
    #[error("failed to register focus notification for pid {pid} (code {code})")]
    ObservationRegister {
        /// Target process.
        pid: i32,
        /// Platform status code.
        code: i32,
    },

    /// The input source capability rejected a switch.
    #[error("failed to apply input source {id}: {reason}")]
    ApplyPreference {
        /// Stable id of the requested input source.
        id: String,
        /// Capability-provided reason.
        reason: String,
    },

    /// No installed input source has the given id.
    #[error("unknown input source: {0}")]
    UnknownPreference(String),

    /// Accessibility permission has not been granted.
    #[error("accessibility permission not granted")]
    PermissionDenied,

    /// I/O failure while setting up the runtime.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic error with context.
    #[error("Engine error: {0}")]
    Msg(String),
}
