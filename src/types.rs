use serde::Serialize;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Yabai,
    Aerospace,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Yabai, BackendKind::Aerospace];

    /// Executable (and process) name of the tool.
    pub fn binary_name(self) -> &'static str {
        match self {
            BackendKind::Yabai => "yabai",
            BackendKind::Aerospace => "aerospace",
        }
    }

    /// Name the tool's server process shows up as in the process list.
    pub fn process_name(self) -> &'static str {
        match self {
            BackendKind::Yabai => "yabai",
            BackendKind::Aerospace => "AeroSpace",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary_name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Window {
    pub id: String,
    pub app: String,
    pub title: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Space {
    pub id: String,
    pub windows: Vec<Window>,
}

impl Space {
    pub fn top_window(&self) -> Option<&Window> {
        self.windows.first()
    }
}

/// Ordered view of every space at the time of the last applied fetch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub spaces: Vec<Space>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }

    pub fn space(&self, id: &str) -> Option<&Space> {
        self.spaces.iter().find(|space| space.id == id)
    }
}
