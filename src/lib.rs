//! Workspace/window synchronization for a macOS menu-bar shell.
//!
//! Keeps an ordered, event-driven view of the spaces and windows reported by
//! yabai or AeroSpace, and forwards focus commands back to them.

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod icon;
pub mod logging;
#[cfg(target_os = "macos")]
pub mod macos;
pub mod monitor;
pub mod notify;
pub mod order;
pub mod process;
pub mod types;

pub use backend::{select_provider, Provider};
pub use config::SyncConfig;
pub use engine::{SnapshotHandle, SyncEngine};
pub use error::ProviderError;
pub use icon::{Icon, IconResolver};
pub use monitor::{EventSink, EventSource, Subscription, WorkspaceEvent};
pub use types::{BackendKind, Snapshot, Space, Window};
