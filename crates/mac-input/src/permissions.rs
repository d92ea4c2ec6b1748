//! Accessibility permission check.
//!
//! Observing another process's focus requires the Accessibility grant. There
//! is no prompting here; the caller decides how to guide the user.

#[link(name = "ApplicationServices", kind = "framework")]
unsafe extern "C" {
    fn AXIsProcessTrusted() -> bool;
}

/// Whether this process is trusted for Accessibility.
pub fn accessibility_ok() -> bool {
    unsafe { AXIsProcessTrusted() }
}
