//! Providers over the supported external window managers.
//!
//! Each provider shells out to its tool and normalizes the output into
//! [`Space`]/[`Window`] values. All calls block on the child process, so the
//! engine only invokes them from worker threads.

mod aerospace;
mod yabai;

use std::{path::PathBuf, sync::Arc};

pub use aerospace::AerospaceProvider;
pub use yabai::YabaiProvider;

use crate::config::SyncConfig;
use crate::error::Result;
use crate::process::{resolve_binary, CommandRunner, ProcessProbe};
use crate::types::{BackendKind, Space, Window};

pub trait Provider: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Every space with its windows, in the order the tool reports them.
    fn list_spaces(&self) -> Result<Vec<Space>>;

    fn focus_space(&self, space: &Space, focus_top_window: bool) -> Result<()>;

    fn focus_window(&self, window: &Window) -> Result<()>;
}

/// Which supported window manager is running, if any.
pub fn detect_backend(probe: &dyn ProcessProbe) -> Option<BackendKind> {
    let names: Vec<String> = probe
        .processes()
        .iter()
        .map(|process| process.name())
        .collect();
    BackendKind::ALL.into_iter().find(|kind| {
        names
            .iter()
            .any(|name| name.eq_ignore_ascii_case(kind.process_name()))
    })
}

/// Probes once and builds the matching provider. `None` means neither tool
/// is running and the engine stays empty for its whole lifetime.
pub fn select_provider(
    probe: &dyn ProcessProbe,
    runner: Arc<dyn CommandRunner>,
    config: &SyncConfig,
) -> Option<Arc<dyn Provider>> {
    let Some(kind) = detect_backend(probe) else {
        tracing::info!("no supported window manager running");
        return None;
    };
    let binary = binary_path(kind, config);
    tracing::info!("using {kind} at {}", binary.display());
    Some(build_provider(kind, binary, runner))
}

pub fn build_provider(
    kind: BackendKind,
    binary: PathBuf,
    runner: Arc<dyn CommandRunner>,
) -> Arc<dyn Provider> {
    match kind {
        BackendKind::Yabai => Arc::new(YabaiProvider::new(binary, runner)),
        BackendKind::Aerospace => Arc::new(AerospaceProvider::new(binary, runner)),
    }
}

pub fn binary_path(kind: BackendKind, config: &SyncConfig) -> PathBuf {
    config
        .binary_override(kind)
        .cloned()
        .unwrap_or_else(|| resolve_binary(kind.binary_name()))
}
