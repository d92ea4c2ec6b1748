//! Per-process Accessibility observers that report focus changes.
//!
//! Each handle owns one `AXObserver` whose run loop source lives on the main
//! run loop. The callback refcon carries only the pid, so nothing needs to
//! outlive the handle once its source is removed.

use std::{ffi::c_void, mem, ptr};

use core_foundation::{
    base::{CFRelease, CFTypeRef, TCFType},
    runloop::{CFRunLoopGetMain, CFRunLoopSourceRef, kCFRunLoopDefaultMode},
    string::{CFString, CFStringRef},
};
use keyfocus_engine::{Error, FocusObserver, ObservationHandle, Result, SystemEvent};
use tracing::{debug, trace};

use crate::sink;

const AX_FOCUSED_WINDOW_CHANGED: &str = "AXFocusedWindowChanged";
const AX_APPLICATION_ACTIVATED: &str = "AXApplicationActivated";
/// Notifications that mean "this process's focused window may have changed".
const FOCUS_NOTIFICATIONS: [&str; 2] = [AX_FOCUSED_WINDOW_CHANGED, AX_APPLICATION_ACTIVATED];

/// `kAXErrorNotificationAlreadyRegistered`
const AX_ALREADY_REGISTERED: i32 = -25209;
/// Generic failure when AX hands back a null object without an error code.
const AX_FAILURE: i32 = -25200;

#[link(name = "ApplicationServices", kind = "framework")]
unsafe extern "C" {
    fn AXObserverCreate(
        pid: i32,
        callback: extern "C" fn(*mut c_void, *mut c_void, CFStringRef, *mut c_void),
        out: *mut *mut c_void,
    ) -> i32;
    fn AXObserverAddNotification(
        observer: *mut c_void,
        element: *mut c_void,
        notification: CFStringRef,
        refcon: *mut c_void,
    ) -> i32;
    fn AXObserverRemoveNotification(
        observer: *mut c_void,
        element: *mut c_void,
        notification: CFStringRef,
    ) -> i32;
    fn AXObserverGetRunLoopSource(observer: *mut c_void) -> *mut c_void;
    fn AXUIElementCreateApplication(pid: i32) -> *mut c_void;
}

#[link(name = "CoreFoundation", kind = "framework")]
unsafe extern "C" {
    fn CFRunLoopAddSource(rl: *mut c_void, source: CFRunLoopSourceRef, mode: CFStringRef);
    fn CFRunLoopRemoveSource(rl: *mut c_void, source: CFRunLoopSourceRef, mode: CFStringRef);
}

extern "C" fn ax_callback(
    _observer: *mut c_void,
    _element: *mut c_void,
    notification: CFStringRef,
    refcon: *mut c_void,
) {
    let pid = refcon as isize as i32;
    if !notification.is_null() {
        let name = unsafe { CFString::wrap_under_get_rule(notification) };
        trace!(pid, notification = %name, "ax notification");
    }
    sink::emit(SystemEvent::Focused { pid });
}

/// CF-backed RAII for an owned CF object pointer.
struct CfOwned(*mut c_void);

impl CfOwned {
    fn from_create(ptr: *mut c_void) -> Option<Self> {
        if ptr.is_null() { None } else { Some(Self(ptr)) }
    }

    fn as_ptr(&self) -> *mut c_void {
        self.0
    }
}

impl Drop for CfOwned {
    fn drop(&mut self) {
        unsafe { CFRelease(self.0 as CFTypeRef) }
    }
}

/// Observation handle for one process.
struct AxHandle {
    pid: i32,
    observer: CfOwned,
    app: CfOwned,
    source: CFRunLoopSourceRef,
    /// Notifications currently added to the observer.
    registered: Vec<&'static str>,
}

// SAFETY: the AX observer, application element and run loop source are CF
// objects whose add/remove calls are thread-safe; the handle is only ever
// used by one thread at a time through `&mut self`.
unsafe impl Send for AxHandle {}

impl AxHandle {
    fn create(pid: i32) -> Result<Self> {
        unsafe {
            let mut obs_ptr: *mut c_void = ptr::null_mut();
            let err = AXObserverCreate(pid, ax_callback, &mut obs_ptr);
            if err != 0 {
                return Err(Error::ObservationCreate { pid, code: err });
            }
            let observer = CfOwned::from_create(obs_ptr)
                .ok_or(Error::ObservationCreate { pid, code: AX_FAILURE })?;
            let app = CfOwned::from_create(AXUIElementCreateApplication(pid))
                .ok_or(Error::ObservationCreate { pid, code: AX_FAILURE })?;
            let source = AXObserverGetRunLoopSource(observer.as_ptr()) as CFRunLoopSourceRef;
            if source.is_null() {
                return Err(Error::ObservationCreate { pid, code: AX_FAILURE });
            }
            CFRunLoopAddSource(CFRunLoopGetMain() as *mut c_void, source, kCFRunLoopDefaultMode);
            Ok(Self {
                pid,
                observer,
                app,
                source,
                registered: Vec::new(),
            })
        }
    }

    fn remove(&self, name: &'static str) -> i32 {
        let cf = CFString::from_static_string(name);
        unsafe {
            AXObserverRemoveNotification(
                self.observer.as_ptr(),
                self.app.as_ptr(),
                cf.as_concrete_TypeRef(),
            )
        }
    }
}

impl ObservationHandle for AxHandle {
    fn register_focus(&mut self) -> Result<()> {
        for name in FOCUS_NOTIFICATIONS {
            if self.registered.contains(&name) {
                continue;
            }
            let cf = CFString::from_static_string(name);
            let err = unsafe {
                AXObserverAddNotification(
                    self.observer.as_ptr(),
                    self.app.as_ptr(),
                    cf.as_concrete_TypeRef(),
                    self.pid as isize as *mut c_void,
                )
            };
            match err {
                0 | AX_ALREADY_REGISTERED => self.registered.push(name),
                code => {
                    self.unregister_focus();
                    return Err(Error::ObservationRegister {
                        pid: self.pid,
                        code,
                    });
                }
            }
        }
        Ok(())
    }

    fn unregister_focus(&mut self) {
        let names = mem::take(&mut self.registered);
        for name in names {
            let err = self.remove(name);
            if err != 0 {
                debug!(
                    pid = self.pid,
                    notification = name,
                    err,
                    "AXObserverRemoveNotification failed"
                );
            }
        }
    }
}

impl Drop for AxHandle {
    fn drop(&mut self) {
        self.unregister_focus();
        unsafe {
            CFRunLoopRemoveSource(
                CFRunLoopGetMain() as *mut c_void,
                self.source,
                kCFRunLoopDefaultMode,
            );
        }
    }
}

/// [`FocusObserver`] creating one `AXObserver` per process.
#[derive(Debug, Default, Clone, Copy)]
pub struct AxFocusObserver;

impl AxFocusObserver {
    /// Create the factory.
    pub fn new() -> Self {
        Self
    }
}

impl FocusObserver for AxFocusObserver {
    fn create(&self, pid: i32) -> Result<Box<dyn ObservationHandle>> {
        Ok(Box::new(AxHandle::create(pid)?))
    }
}
