//! The synchronization engine.
//!
//! One loop thread owns the debounce state and is the only writer of the
//! published [`Snapshot`]. Fetches run on short-lived worker threads and
//! report back over the loop's channel tagged with a sequence number; focus
//! commands go to a dedicated command thread.

use anyhow::{Context, Result};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc::{self, RecvTimeoutError},
        Arc, Mutex, RwLock,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::backend::Provider;
use crate::config::{SyncConfig, COMMAND_ATTEMPTS, MAX_FETCHES_IN_FLIGHT};
use crate::error::ProviderError;
use crate::monitor::{Debouncer, EventMonitor, EventSink, EventSource, WorkspaceEvent};
use crate::order::sort_spaces;
use crate::types::{BackendKind, Snapshot, Space, Window};

enum LoopMsg {
    Event(WorkspaceEvent),
    Fetched {
        seq: u64,
        result: Result<Vec<Space>, ProviderError>,
    },
    Stop,
}

enum CommandMsg {
    FocusSpace { space: Space, focus_top_window: bool },
    FocusWindow(Window),
}

struct Published {
    current: RwLock<Arc<Snapshot>>,
    subscribers: Mutex<Vec<mpsc::Sender<Arc<Snapshot>>>>,
    version: AtomicU64,
}

/// Read side of the engine: the live snapshot plus change notifications.
#[derive(Clone)]
pub struct SnapshotHandle {
    inner: Arc<Published>,
}

impl SnapshotHandle {
    fn new() -> Self {
        Self {
            inner: Arc::new(Published {
                current: RwLock::new(Arc::new(Snapshot::empty())),
                subscribers: Mutex::default(),
                version: AtomicU64::new(0),
            }),
        }
    }

    pub fn current(&self) -> Arc<Snapshot> {
        match self.inner.current.read() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of snapshots published so far.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::SeqCst)
    }

    /// Receives every snapshot published after this call.
    pub fn subscribe(&self) -> mpsc::Receiver<Arc<Snapshot>> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    fn publish(&self, snapshot: Snapshot) {
        let snapshot = Arc::new(snapshot);
        match self.inner.current.write() {
            Ok(mut current) => *current = snapshot.clone(),
            Err(poisoned) => *poisoned.into_inner() = snapshot.clone(),
        }
        self.inner.version.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.retain(|tx| tx.send(snapshot.clone()).is_ok());
        }
    }
}

struct EngineLoop {
    provider: Option<Arc<dyn Provider>>,
    debouncer: Debouncer,
    next_seq: u64,
    last_applied: u64,
    in_flight: usize,
    /// A refresh was requested while the fetch cap was reached.
    refresh_pending: bool,
    stopped: Arc<AtomicBool>,
    snapshot: SnapshotHandle,
    tx: mpsc::Sender<LoopMsg>,
}

impl EngineLoop {
    fn new(
        provider: Option<Arc<dyn Provider>>,
        debounce: Duration,
        stopped: Arc<AtomicBool>,
        snapshot: SnapshotHandle,
        tx: mpsc::Sender<LoopMsg>,
    ) -> Self {
        Self {
            provider,
            debouncer: Debouncer::new(debounce),
            next_seq: 0,
            last_applied: 0,
            in_flight: 0,
            refresh_pending: false,
            stopped,
            snapshot,
            tx,
        }
    }

    fn run(mut self, rx: mpsc::Receiver<LoopMsg>) {
        self.refresh();
        loop {
            let msg = match self.debouncer.deadline() {
                Some(deadline) => {
                    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                        Ok(msg) => Some(msg),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match rx.recv() {
                    Ok(msg) => Some(msg),
                    Err(_) => break,
                },
            };
            if !self.handle(msg, Instant::now()) {
                break;
            }
        }
        tracing::debug!("engine loop stopped");
    }

    /// One loop step; `None` means the debounce deadline woke us. The
    /// deadline is checked on every step so a steady stream of messages
    /// cannot hold back an expired refresh. Returns false on stop.
    fn handle(&mut self, msg: Option<LoopMsg>, now: Instant) -> bool {
        if let Some(LoopMsg::Stop) = msg {
            self.debouncer.cancel();
            return false;
        }
        if self.debouncer.poll(now) {
            self.refresh();
        }
        match msg {
            Some(LoopMsg::Event(event)) => {
                tracing::trace!("event {event:?}");
                self.debouncer.event(now);
            }
            Some(LoopMsg::Fetched { seq, result }) => {
                self.in_flight = self.in_flight.saturating_sub(1);
                self.apply(seq, result);
                if self.refresh_pending {
                    self.refresh_pending = false;
                    self.refresh();
                }
            }
            Some(LoopMsg::Stop) | None => {}
        }
        true
    }

    fn refresh(&mut self) {
        let Some(provider) = self.provider.clone() else {
            return;
        };
        if self.in_flight >= MAX_FETCHES_IN_FLIGHT {
            tracing::debug!("{} fetches in flight, deferring refresh", self.in_flight);
            self.refresh_pending = true;
            return;
        }
        self.next_seq += 1;
        let seq = self.next_seq;
        let tx = self.tx.clone();
        tracing::debug!("fetch #{seq} from {}", provider.kind());
        let spawned = thread::Builder::new()
            .name("spacesync-fetch".into())
            .spawn(move || {
                let result = provider.list_spaces();
                // The loop may be gone after teardown; nothing to apply then.
                let _ = tx.send(LoopMsg::Fetched { seq, result });
            });
        match spawned {
            Ok(_) => self.in_flight += 1,
            Err(err) => tracing::warn!("failed to spawn fetch #{seq}: {err}"),
        }
    }

    fn apply(&mut self, seq: u64, result: Result<Vec<Space>, ProviderError>) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        if seq <= self.last_applied {
            tracing::debug!("discarding stale fetch #{seq} (applied #{})", self.last_applied);
            return;
        }
        self.last_applied = seq;
        let spaces = match result {
            Ok(spaces) => sort_spaces(spaces),
            Err(err) => {
                tracing::warn!("window manager unavailable: {err}");
                Vec::new()
            }
        };
        self.snapshot.publish(Snapshot { spaces });
    }
}

fn run_commands(provider: Arc<dyn Provider>, rx: mpsc::Receiver<CommandMsg>, stopped: Arc<AtomicBool>) {
    for command in rx {
        if stopped.load(Ordering::SeqCst) {
            break;
        }
        let (label, outcome) = match &command {
            CommandMsg::FocusSpace {
                space,
                focus_top_window,
            } => (
                format!("focus space {}", space.id),
                attempt(|| provider.focus_space(space, *focus_top_window)),
            ),
            CommandMsg::FocusWindow(window) => (
                format!("focus window {}", window.id),
                attempt(|| provider.focus_window(window)),
            ),
        };
        if let Err(err) = outcome {
            tracing::warn!("{label} failed: {err}");
        }
    }
}

fn attempt(mut call: impl FnMut() -> Result<(), ProviderError>) -> Result<(), ProviderError> {
    let mut tries = 1;
    loop {
        match call() {
            Ok(()) => return Ok(()),
            Err(err) if tries < COMMAND_ATTEMPTS => {
                tracing::debug!("retrying after: {err}");
                tries += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

pub struct SyncEngine {
    kind: Option<BackendKind>,
    snapshot: SnapshotHandle,
    events: mpsc::Sender<LoopMsg>,
    commands: Mutex<Option<mpsc::Sender<CommandMsg>>>,
    monitor: EventMonitor,
    stopped: Arc<AtomicBool>,
    loop_thread: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Starts the loop, performs the initial refresh and subscribes to every
    /// source. With no provider the snapshot stays empty and no subprocess
    /// is ever run.
    pub fn start(
        provider: Option<Arc<dyn Provider>>,
        sources: Vec<Box<dyn EventSource>>,
        config: &SyncConfig,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let stopped = Arc::new(AtomicBool::new(false));
        let snapshot = SnapshotHandle::new();

        let engine_loop = EngineLoop::new(
            provider.clone(),
            config.debounce,
            stopped.clone(),
            snapshot.clone(),
            tx.clone(),
        );
        let loop_thread = thread::Builder::new()
            .name("spacesync-engine".into())
            .spawn(move || engine_loop.run(rx))
            .context("spawn engine loop")?;

        let commands = match &provider {
            Some(provider) => {
                let (command_tx, command_rx) = mpsc::channel();
                let provider = provider.clone();
                let stopped = stopped.clone();
                thread::Builder::new()
                    .name("spacesync-commands".into())
                    .spawn(move || run_commands(provider, command_rx, stopped))
                    .context("spawn command thread")?;
                Some(command_tx)
            }
            None => None,
        };

        let sink = sink_for(tx.clone());
        let monitor = EventMonitor::start(sources, &sink);

        Ok(Self {
            kind: provider.as_ref().map(|p| p.kind()),
            snapshot,
            events: tx,
            commands: Mutex::new(commands),
            monitor,
            stopped,
            loop_thread: Mutex::new(Some(loop_thread)),
        })
    }

    pub fn backend(&self) -> Option<BackendKind> {
        self.kind
    }

    pub fn snapshot(&self) -> SnapshotHandle {
        self.snapshot.clone()
    }

    /// For hosts forwarding OS workspace/app notifications in-process.
    pub fn event_sink(&self) -> EventSink {
        sink_for(self.events.clone())
    }

    pub fn active_subscriptions(&self) -> usize {
        self.monitor.active_subscriptions()
    }

    /// Fire-and-forget; the resulting change comes back as an event.
    pub fn switch_to_space(&self, space: &Space, focus_top_window: bool) {
        self.send_command(CommandMsg::FocusSpace {
            space: space.clone(),
            focus_top_window,
        });
    }

    /// Fire-and-forget; the resulting change comes back as an event.
    pub fn switch_to_window(&self, window: &Window) {
        self.send_command(CommandMsg::FocusWindow(window.clone()));
    }

    fn send_command(&self, command: CommandMsg) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        if let Ok(commands) = self.commands.lock() {
            if let Some(tx) = commands.as_ref() {
                let _ = tx.send(command);
            }
        }
    }

    /// Cancels the pending refresh and unsubscribes every source. Safe to
    /// call more than once; also runs on drop.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.monitor.teardown();
        let _ = self.events.send(LoopMsg::Stop);
        if let Ok(mut commands) = self.commands.lock() {
            commands.take();
        }
        let handle = self.loop_thread.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!("engine loop panicked");
            }
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sink_for(tx: mpsc::Sender<LoopMsg>) -> EventSink {
    EventSink::new(move |event| {
        let _ = tx.send(LoopMsg::Event(event));
    })
}
