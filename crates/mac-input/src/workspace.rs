//! Running applications and workspace notifications via NSWorkspace.

use std::ptr::NonNull;

use block2::StackBlock;
use dispatch2::run_on_main;
use keyfocus_engine::{ProcessDirectory, SystemEvent};
use keyfocus_ids::{ActivationPolicy, ProcessInfo};
use objc2::{
    MainThreadMarker,
    rc::Retained,
    runtime::{AnyObject, NSObjectProtocol, ProtocolObject},
};
use objc2_app_kit::{
    NSApplicationActivationPolicy, NSRunningApplication, NSWorkspace, NSWorkspaceApplicationKey,
    NSWorkspaceDidActivateApplicationNotification, NSWorkspaceDidLaunchApplicationNotification,
    NSWorkspaceDidTerminateApplicationNotification,
};
use objc2_foundation::{
    NSDistributedNotificationCenter, NSNotification, NSNotificationCenter, NSNotificationName,
    NSString,
};
use tracing::{debug, info};

use crate::sink;

/// Distributed notification posted when the selected keyboard input source changes.
const INPUT_SOURCE_CHANGED: &str = "com.apple.Carbon.TISNotifySelectedKeyboardInputSourceChanged";

fn process_info(app: &NSRunningApplication) -> ProcessInfo {
    let policy = match app.activationPolicy() {
        NSApplicationActivationPolicy::Regular => ActivationPolicy::Regular,
        NSApplicationActivationPolicy::Accessory => ActivationPolicy::Accessory,
        _ => ActivationPolicy::Prohibited,
    };
    ProcessInfo {
        pid: app.processIdentifier(),
        bundle_id: app.bundleIdentifier().map(|s| s.to_string()),
        name: app.localizedName().map(|s| s.to_string()),
        policy,
    }
}

/// [`ProcessDirectory`] backed by `NSWorkspace.runningApplications`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Workspace;

impl Workspace {
    /// Create the capability.
    pub fn new() -> Self {
        Self
    }
}

impl ProcessDirectory for Workspace {
    fn running(&self) -> Vec<ProcessInfo> {
        run_on_main(|_| {
            let ws = NSWorkspace::sharedWorkspace();
            ws.runningApplications()
                .iter()
                .map(|app| process_info(&app))
                .collect()
        })
    }

    fn frontmost(&self) -> Option<ProcessInfo> {
        run_on_main(|_| {
            NSWorkspace::sharedWorkspace()
                .frontmostApplication()
                .map(|app| process_info(&app))
        })
    }

    fn lookup(&self, pid: i32) -> Option<ProcessInfo> {
        run_on_main(move |_| {
            NSRunningApplication::runningApplicationWithProcessIdentifier(pid)
                .map(|app| process_info(&app))
        })
    }
}

/// Extract the application carried in a workspace notification's user info.
fn notification_app(notif: &NSNotification) -> Option<ProcessInfo> {
    let user_info = notif.userInfo()?;
    let obj = unsafe { user_info.objectForKey(NSWorkspaceApplicationKey) }?;
    let app = obj.downcast_ref::<NSRunningApplication>()?;
    Some(process_info(app))
}

type Token = Retained<ProtocolObject<dyn NSObjectProtocol>>;

/// Installed notification observers. Dropping removes them.
pub struct WorkspaceObservers {
    tokens: Vec<(Retained<NSNotificationCenter>, Token)>,
}

impl WorkspaceObservers {
    /// Install workspace lifecycle and input source observers.
    ///
    /// Must be called on the main thread; callbacks are delivered there while
    /// the main run loop runs.
    pub fn install(_mtm: MainThreadMarker) -> Self {
        let mut tokens = Vec::new();

        let ws_center = NSWorkspace::sharedWorkspace().notificationCenter();
        let lifecycle: [(&NSNotificationName, fn(ProcessInfo) -> SystemEvent); 3] = unsafe {
            [
                (NSWorkspaceDidLaunchApplicationNotification, SystemEvent::Launched),
                (NSWorkspaceDidActivateApplicationNotification, SystemEvent::Activated),
                (NSWorkspaceDidTerminateApplicationNotification, SystemEvent::Terminated),
            ]
        };
        for (name, make) in lifecycle {
            let block = StackBlock::new(move |notif: NonNull<NSNotification>| {
                let notif = unsafe { notif.as_ref() };
                match notification_app(notif) {
                    Some(p) => sink::emit(make(p)),
                    None => debug!(name = %notif.name(), "workspace notification without app"),
                }
            })
            .copy();
            let token = unsafe {
                ws_center.addObserverForName_object_queue_usingBlock(
                    Some(name),
                    None,
                    None,
                    &block,
                )
            };
            tokens.push((ws_center.clone(), token));
        }

        let dist = NSDistributedNotificationCenter::defaultCenter();
        let dist_center: Retained<NSNotificationCenter> = Retained::into_super(dist);
        let name = NSString::from_str(INPUT_SOURCE_CHANGED);
        let block = StackBlock::new(|_notif: NonNull<NSNotification>| {
            sink::emit(SystemEvent::PreferenceChanged);
        })
        .copy();
        let token = unsafe {
            dist_center.addObserverForName_object_queue_usingBlock(Some(&name), None, None, &block)
        };
        tokens.push((dist_center, token));

        info!(count = tokens.len(), "workspace observers installed");
        Self { tokens }
    }
}

impl Drop for WorkspaceObservers {
    fn drop(&mut self) {
        for (center, token) in self.tokens.drain(..) {
            let obj: &AnyObject = AsRef::<AnyObject>::as_ref(&*token);
            unsafe { center.removeObserver(obj) };
        }
        debug!("workspace observers removed");
    }
}
