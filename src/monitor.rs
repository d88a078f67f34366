//! Event monitoring and debounce.
//!
//! Sources deliver [`WorkspaceEvent`]s into an [`EventSink`]; the engine's
//! loop feeds them into a [`Debouncer`] so that a burst of notifications turns
//! into exactly one refresh on its trailing edge.

use std::{
    fmt,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use anyhow::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkspaceEvent {
    SpaceChanged,
    AppActivated,
    AppLaunched,
    AppTerminated,
    /// Emitted by the window manager's own change hook over IPC.
    ToolNotification,
}

impl WorkspaceEvent {
    /// Wire name used on the notification socket for forwarded OS events.
    pub fn from_wire(name: &str, tool_notification: &str) -> Option<Self> {
        match name {
            "space_changed" => Some(Self::SpaceChanged),
            "app_activated" => Some(Self::AppActivated),
            "app_launched" => Some(Self::AppLaunched),
            "app_terminated" => Some(Self::AppTerminated),
            other if other == tool_notification => Some(Self::ToolNotification),
            _ => None,
        }
    }
}

/// Where sources deliver events. Cheap to clone.
#[derive(Clone)]
pub struct EventSink {
    deliver: Arc<dyn Fn(WorkspaceEvent) + Send + Sync>,
}

impl EventSink {
    pub fn new(deliver: impl Fn(WorkspaceEvent) + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    pub fn emit(&self, event: WorkspaceEvent) {
        (self.deliver)(event);
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventSink")
    }
}

/// Live registration with an event source. Cancelling is idempotent and
/// happens automatically on drop.
pub struct Subscription {
    name: String,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(name: impl Into<String>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            name: name.into(),
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            tracing::debug!("unsubscribing {}", self.name);
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub trait EventSource: Send {
    fn subscribe(&self, sink: EventSink) -> Result<Subscription>;
}

/// Owns every subscription the engine made.
#[derive(Default)]
pub struct EventMonitor {
    subscriptions: Mutex<Vec<Subscription>>,
}

impl EventMonitor {
    /// Subscribes to every source. A source that fails is logged and skipped;
    /// the others keep working.
    pub fn start(sources: Vec<Box<dyn EventSource>>, sink: &EventSink) -> Self {
        let mut subscriptions = Vec::with_capacity(sources.len());
        for source in sources {
            match source.subscribe(sink.clone()) {
                Ok(subscription) => {
                    tracing::debug!("subscribed to {}", subscription.name());
                    subscriptions.push(subscription);
                }
                Err(err) => tracing::warn!("event source unavailable: {err:#}"),
            }
        }
        Self {
            subscriptions: Mutex::new(subscriptions),
        }
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions
            .lock()
            .map(|subs| subs.iter().filter(|s| s.is_active()).count())
            .unwrap_or(0)
    }

    pub fn teardown(&self) {
        let drained = match self.subscriptions.lock() {
            Ok(mut subs) => std::mem::take(&mut *subs),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for mut subscription in drained {
            subscription.cancel();
        }
    }
}

impl Drop for EventMonitor {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    PendingRefresh { deadline: Instant },
}

/// Trailing-edge debounce. Only ever touched from the engine loop thread.
#[derive(Debug)]
pub struct Debouncer {
    interval: Duration,
    state: DebounceState,
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: DebounceState::Idle,
        }
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            DebounceState::Idle => None,
            DebounceState::PendingRefresh { deadline } => Some(deadline),
        }
    }

    /// An event arrived: (re)arm the timer, replacing any pending one.
    pub fn event(&mut self, now: Instant) {
        self.state = DebounceState::PendingRefresh {
            deadline: now + self.interval,
        };
    }

    /// Returns true exactly once per burst, when the deadline has passed.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.state {
            DebounceState::PendingRefresh { deadline } if now >= deadline => {
                self.state = DebounceState::Idle;
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) {
        self.state = DebounceState::Idle;
    }
}
