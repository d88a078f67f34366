use serde::Deserialize;
use std::{collections::HashMap, path::PathBuf, sync::Arc};

use super::Provider;
use crate::error::Result;
use crate::process::CommandRunner;
use crate::types::{BackendKind, Space, Window};

#[derive(Deserialize)]
struct YabaiSpace {
    index: u32,
    label: Option<String>,
    #[serde(default)]
    windows: Vec<u64>,
}

#[derive(Deserialize)]
struct YabaiWindow {
    id: u64,
    app: Option<String>,
    title: Option<String>,
}

impl YabaiSpace {
    /// yabai accepts either selector; a label is the more stable one.
    fn selector(&self) -> String {
        match self.label.as_deref().map(str::trim) {
            Some(label) if !label.is_empty() => label.to_string(),
            _ => self.index.to_string(),
        }
    }
}

pub struct YabaiProvider {
    binary: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl YabaiProvider {
    pub fn new(binary: PathBuf, runner: Arc<dyn CommandRunner>) -> Self {
        Self { binary, runner }
    }

    fn yabai(&self, args: &[&str]) -> Result<String> {
        self.runner.run(&self.binary, args)
    }

    fn query<T: for<'de> Deserialize<'de>>(&self, target: &str) -> Result<T> {
        let text = self.yabai(&["-m", "query", target])?;
        Ok(serde_json::from_str(&text)?)
    }
}

impl Provider for YabaiProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::Yabai
    }

    fn list_spaces(&self) -> Result<Vec<Space>> {
        let spaces = self.query::<Vec<YabaiSpace>>("--spaces")?;
        let windows = self.query::<Vec<YabaiWindow>>("--windows")?;
        Ok(assemble(spaces, windows))
    }

    fn focus_space(&self, space: &Space, focus_top_window: bool) -> Result<()> {
        self.yabai(&["-m", "space", "--focus", &space.id])?;
        if focus_top_window {
            if let Some(window) = space.top_window() {
                self.yabai(&["-m", "window", "--focus", &window.id])?;
            }
        }
        Ok(())
    }

    fn focus_window(&self, window: &Window) -> Result<()> {
        self.yabai(&["-m", "window", "--focus", &window.id])?;
        Ok(())
    }
}

fn assemble(spaces: Vec<YabaiSpace>, windows: Vec<YabaiWindow>) -> Vec<Space> {
    let mut by_id: HashMap<u64, Window> = windows
        .into_iter()
        .map(|window| {
            let entry = Window {
                id: window.id.to_string(),
                app: window.app.unwrap_or_default(),
                title: window.title.unwrap_or_default(),
            };
            (window.id, entry)
        })
        .collect();

    spaces
        .into_iter()
        .map(|space| Space {
            id: space.selector(),
            windows: space
                .windows
                .iter()
                .filter_map(|id| by_id.remove(id))
                .collect(),
        })
        .collect()
}
