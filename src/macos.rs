//! AppKit side of the engine: NSWorkspace notifications as an event source,
//! and NSRunningApplication as the app directory for icons.

#![allow(unsafe_code)]

use anyhow::Result;
use block2::RcBlock;
use objc2::rc::{autoreleasepool, Retained};
use objc2::runtime::{AnyObject, NSObjectProtocol, ProtocolObject};
use objc2_app_kit::{
    NSWorkspace, NSWorkspaceActiveSpaceDidChangeNotification,
    NSWorkspaceDidActivateApplicationNotification, NSWorkspaceDidLaunchApplicationNotification,
    NSWorkspaceDidTerminateApplicationNotification,
};
use objc2_foundation::{NSNotification, NSNotificationCenter, NSNotificationName};
use std::{path::PathBuf, ptr::NonNull};

use crate::icon::{AppDirectory, RunningApp};
use crate::monitor::{EventSink, EventSource, Subscription, WorkspaceEvent};

fn observed() -> [(&'static NSNotificationName, WorkspaceEvent); 4] {
    // SAFETY: AppKit initializes these constants before any Rust code runs.
    unsafe {
        [
            (
                NSWorkspaceActiveSpaceDidChangeNotification,
                WorkspaceEvent::SpaceChanged,
            ),
            (
                NSWorkspaceDidActivateApplicationNotification,
                WorkspaceEvent::AppActivated,
            ),
            (
                NSWorkspaceDidLaunchApplicationNotification,
                WorkspaceEvent::AppLaunched,
            ),
            (
                NSWorkspaceDidTerminateApplicationNotification,
                WorkspaceEvent::AppTerminated,
            ),
        ]
    }
}

/// Space changes and application activate/launch/terminate, as posted on
/// the shared workspace's notification center.
#[derive(Default)]
pub struct WorkspaceNotifications;

struct Observers {
    center: Retained<NSNotificationCenter>,
    tokens: Vec<Retained<ProtocolObject<dyn NSObjectProtocol>>>,
}

// SAFETY: NSNotificationCenter is documented as thread-safe, and the tokens
// are only handed back to it for removal.
unsafe impl Send for Observers {}

impl Observers {
    fn remove(self) {
        for token in &self.tokens {
            let token: &AnyObject = token.as_ref();
            // SAFETY: every token came from this center's addObserver call.
            unsafe { self.center.removeObserver(token) };
        }
    }
}

impl EventSource for WorkspaceNotifications {
    fn subscribe(&self, sink: EventSink) -> Result<Subscription> {
        let center = NSWorkspace::sharedWorkspace().notificationCenter();
        let mut tokens = Vec::new();
        for (name, event) in observed() {
            let sink = sink.clone();
            let block = RcBlock::new(move |_: NonNull<NSNotification>| sink.emit(event));
            // SAFETY: the block only touches the Send + Sync sink, and a nil
            // queue runs it synchronously on the posting thread.
            let token = unsafe {
                center.addObserverForName_object_queue_usingBlock(Some(name), None, None, &block)
            };
            tokens.push(token);
        }
        tracing::debug!("observing {} workspace notifications", tokens.len());

        let observers = Observers { center, tokens };
        Ok(Subscription::new("workspace notifications", move || {
            observers.remove()
        }))
    }
}

/// Running applications as reported by NSWorkspace.
#[derive(Default)]
pub struct WorkspaceApps;

impl AppDirectory for WorkspaceApps {
    fn running_apps(&self) -> Vec<RunningApp> {
        autoreleasepool(|_| {
            NSWorkspace::sharedWorkspace()
                .runningApplications()
                .iter()
                .filter_map(|app| {
                    let bundle_path = PathBuf::from(app.bundleURL()?.path()?.to_string());
                    let name = app
                        .localizedName()
                        .map(|name| name.to_string())
                        .or_else(|| Some(bundle_path.file_stem()?.to_string_lossy().into_owned()))?;
                    let executable = app
                        .executableURL()
                        .and_then(|url| url.lastPathComponent())
                        .map(|file| file.to_string())
                        .unwrap_or_else(|| name.clone());
                    Some(RunningApp {
                        name,
                        executable,
                        bundle_path,
                    })
                })
                .collect()
        })
    }
}
