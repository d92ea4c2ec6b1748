//! Keyboard input sources via Text Input Source Services.
//!
//! TIS is main-thread affine, so every call hops onto the main queue.

use std::ffi::c_void;

use core_foundation::{
    array::{CFArrayGetCount, CFArrayGetValueAtIndex, CFArrayRef},
    base::{CFRelease, CFTypeRef, TCFType},
    boolean::CFBoolean,
    dictionary::{CFDictionary, CFDictionaryRef},
    string::{CFString, CFStringRef},
};
use dispatch2::run_on_main;
use keyfocus_engine::{Error, InputSources, Preference, Result};
use tracing::debug;

type TisInputSourceRef = *mut c_void;

#[link(name = "Carbon", kind = "framework")]
unsafe extern "C" {
    static kTISPropertyInputSourceID: CFStringRef;
    static kTISPropertyLocalizedName: CFStringRef;
    static kTISPropertyInputSourceCategory: CFStringRef;
    static kTISPropertyInputSourceIsSelectCapable: CFStringRef;
    static kTISCategoryKeyboardInputSource: CFStringRef;

    fn TISCopyCurrentKeyboardInputSource() -> TisInputSourceRef;
    fn TISCreateInputSourceList(
        properties: CFDictionaryRef,
        include_all_installed: u8,
    ) -> CFArrayRef;
    fn TISSelectInputSource(source: TisInputSourceRef) -> i32;
    fn TISGetInputSourceProperty(source: TisInputSourceRef, key: CFStringRef) -> *const c_void;
}

/// Owned list of enabled, selectable keyboard input sources.
struct SourceList(CFArrayRef);

impl SourceList {
    fn enabled_keyboards() -> Option<Self> {
        unsafe {
            let category = CFString::wrap_under_get_rule(kTISPropertyInputSourceCategory);
            let keyboard = CFString::wrap_under_get_rule(kTISCategoryKeyboardInputSource);
            let selectable = CFString::wrap_under_get_rule(kTISPropertyInputSourceIsSelectCapable);
            let filter = CFDictionary::from_CFType_pairs(&[
                (category.as_CFType(), keyboard.as_CFType()),
                (selectable.as_CFType(), CFBoolean::true_value().as_CFType()),
            ]);
            let arr = TISCreateInputSourceList(filter.as_concrete_TypeRef(), 0);
            if arr.is_null() { None } else { Some(Self(arr)) }
        }
    }

    fn iter(&self) -> impl Iterator<Item = TisInputSourceRef> + '_ {
        let n = unsafe { CFArrayGetCount(self.0) };
        (0..n).map(move |i| unsafe { CFArrayGetValueAtIndex(self.0, i) as TisInputSourceRef })
    }
}

impl Drop for SourceList {
    fn drop(&mut self) {
        unsafe { CFRelease(self.0 as CFTypeRef) }
    }
}

unsafe fn string_property(src: TisInputSourceRef, key: CFStringRef) -> Option<String> {
    let v = unsafe { TISGetInputSourceProperty(src, key) };
    if v.is_null() {
        return None;
    }
    Some(unsafe { CFString::wrap_under_get_rule(v as CFStringRef) }.to_string())
}

unsafe fn preference_for(src: TisInputSourceRef) -> Option<Preference> {
    let id = unsafe { string_property(src, kTISPropertyInputSourceID) }?;
    let name = unsafe { string_property(src, kTISPropertyLocalizedName) }
        .unwrap_or_else(|| id.clone());
    Some(Preference::new(id, name))
}

/// [`InputSources`] backed by the system's enabled keyboard input sources.
#[derive(Debug, Default, Clone, Copy)]
pub struct TisInputSources;

impl TisInputSources {
    /// Create the capability.
    pub fn new() -> Self {
        Self
    }
}

impl InputSources for TisInputSources {
    fn current(&self) -> Option<Preference> {
        run_on_main(|_| unsafe {
            let src = TISCopyCurrentKeyboardInputSource();
            if src.is_null() {
                return None;
            }
            let pref = preference_for(src);
            CFRelease(src as CFTypeRef);
            pref
        })
    }

    fn all(&self) -> Vec<Preference> {
        run_on_main(|_| {
            SourceList::enabled_keyboards()
                .map(|list| {
                    list.iter()
                        .filter_map(|src| unsafe { preference_for(src) })
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    fn apply(&self, pref: &Preference) -> Result<()> {
        let id = pref.id().to_string();
        run_on_main(move |_| {
            let list = SourceList::enabled_keyboards()
                .ok_or_else(|| Error::UnknownPreference(id.clone()))?;
            let src = list
                .iter()
                .find(|src| {
                    unsafe { string_property(*src, kTISPropertyInputSourceID) }.as_deref()
                        == Some(id.as_str())
                })
                .ok_or_else(|| Error::UnknownPreference(id.clone()))?;
            let status = unsafe { TISSelectInputSource(src) };
            if status != 0 {
                return Err(Error::ApplyPreference {
                    id,
                    reason: format!("TISSelectInputSource returned {status}"),
                });
            }
            debug!(source = %id, "selected input source");
            Ok(())
        })
    }
}
