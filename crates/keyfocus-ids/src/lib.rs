//! Focus target identifiers and the resolver that derives them.
#![warn(missing_docs)]
#![warn(unsafe_op_in_unsafe_fn)]

use std::fmt;

use serde::{Deserialize, Serialize};

/// Bundle token used when a process exposes no usable bundle identity.
pub const UNKNOWN_BUNDLE: &str = "unknown";

/// Separator between bundle identity and process instance in per-window mode.
const INSTANCE_SEP: char = '#';

/// How focus targets are grouped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrackingMode {
    /// All windows of one application share a single target.
    #[default]
    PerApplication,
    /// Each process instance is its own target (window approximation).
    PerWindow,
}

impl TrackingMode {
    /// The other mode.
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::PerApplication => Self::PerWindow,
            Self::PerWindow => Self::PerApplication,
        }
    }
}

impl fmt::Display for TrackingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PerApplication => "per-application",
            Self::PerWindow => "per-window",
        })
    }
}

/// Activation policy reported for a running process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ActivationPolicy {
    /// Ordinary app with a Dock icon and menu bar.
    #[default]
    Regular,
    /// UI element app (menu extras, panels) that can still take focus.
    Accessory,
    /// Background-only process; never receives focus.
    Prohibited,
}

impl ActivationPolicy {
    /// True when a process with this policy can hold user focus.
    #[must_use]
    pub const fn is_interactive(self) -> bool {
        !matches!(self, Self::Prohibited)
    }
}

/// Descriptor for a running process as reported by the process directory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Process identifier.
    pub pid: i32,
    /// Bundle identifier, when the process has one.
    pub bundle_id: Option<String>,
    /// Localized display name.
    pub name: Option<String>,
    /// Activation policy.
    pub policy: ActivationPolicy,
}

impl ProcessInfo {
    /// Construct a regular interactive process descriptor.
    pub fn new(pid: i32, bundle_id: impl Into<String>) -> Self {
        Self {
            pid,
            bundle_id: Some(bundle_id.into()),
            name: None,
            policy: ActivationPolicy::Regular,
        }
    }

    /// Builder-style activation policy override.
    #[must_use]
    pub fn with_policy(mut self, policy: ActivationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Builder-style display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Bundle identity, falling back to [`UNKNOWN_BUNDLE`] when absent or blank.
    #[must_use]
    pub fn bundle(&self) -> &str {
        match self.bundle_id.as_deref() {
            Some(b) if !b.trim().is_empty() => b,
            _ => UNKNOWN_BUNDLE,
        }
    }

    /// Short label for log lines.
    #[must_use]
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.bundle())
    }
}

/// Stable key for a focus target.
///
/// Only produced by [`resolve`], so the same process and mode always map to
/// the same key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FocusTargetId(String);

impl FocusTargetId {
    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FocusTargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FocusTargetId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Resolve the focus target identifier for `process` under `mode`.
///
/// Total: a process without a bundle identity resolves under
/// [`UNKNOWN_BUNDLE`].
#[must_use]
pub fn resolve(process: &ProcessInfo, mode: TrackingMode) -> FocusTargetId {
    let bundle = process.bundle();
    match mode {
        TrackingMode::PerApplication => FocusTargetId(bundle.to_string()),
        TrackingMode::PerWindow => FocusTargetId(format!("{bundle}{INSTANCE_SEP}{}", process.pid)),
    }
}
