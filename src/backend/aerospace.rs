use std::{path::PathBuf, sync::Arc};

use super::Provider;
use crate::error::{ProviderError, Result};
use crate::process::CommandRunner;
use crate::types::{BackendKind, Space, Window};

const WINDOW_FORMAT: &str = "%{workspace}|%{window-id}|%{app-name}|%{window-title}";

pub struct AerospaceProvider {
    binary: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl AerospaceProvider {
    pub fn new(binary: PathBuf, runner: Arc<dyn CommandRunner>) -> Self {
        Self { binary, runner }
    }

    fn aerospace(&self, args: &[&str]) -> Result<String> {
        self.runner.run(&self.binary, args)
    }
}

impl Provider for AerospaceProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::Aerospace
    }

    fn list_spaces(&self) -> Result<Vec<Space>> {
        let workspaces = self.aerospace(&["list-workspaces", "--all"])?;
        let windows = self.aerospace(&["list-windows", "--all", "--format", WINDOW_FORMAT])?;
        parse_spaces(&workspaces, &windows)
    }

    fn focus_space(&self, space: &Space, focus_top_window: bool) -> Result<()> {
        self.aerospace(&["workspace", &space.id])?;
        if focus_top_window {
            if let Some(window) = space.top_window() {
                self.aerospace(&["focus", "--window-id", &window.id])?;
            }
        }
        Ok(())
    }

    fn focus_window(&self, window: &Window) -> Result<()> {
        self.aerospace(&["focus", "--window-id", &window.id])?;
        Ok(())
    }
}

fn parse_spaces(workspaces: &str, windows: &str) -> Result<Vec<Space>> {
    let mut spaces: Vec<Space> = workspaces
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|name| Space {
            id: name.to_string(),
            windows: Vec::new(),
        })
        .collect();

    for (lineno, line) in windows.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.splitn(4, '|');
        let (Some(workspace), Some(id), Some(app), Some(title)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(ProviderError::parse(
                "aerospace",
                format!("line {}: expected 4 fields", lineno + 1),
            ));
        };
        let id = id.trim();
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ProviderError::parse(
                "aerospace",
                format!("line {}: invalid window id {id:?}", lineno + 1),
            ));
        }
        let workspace = workspace.trim();
        let Some(space) = spaces.iter_mut().find(|space| space.id == workspace) else {
            return Err(ProviderError::parse(
                "aerospace",
                format!("line {}: unknown workspace {workspace:?}", lineno + 1),
            ));
        };
        space.windows.push(Window {
            id: id.to_string(),
            app: app.trim().to_string(),
            title: title.to_string(),
        });
    }

    Ok(spaces)
}
