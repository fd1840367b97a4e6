#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::config::Palette;
use crate::error::Error;
use crate::fs_ops::{FileSystem, entry_count, is_executable, size_string};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    /// lstat mode, so links report `l`.
    pub mode: u32,
    pub target_mode: u32,
    pub size: u64,
    pub is_dir: bool,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub uid: u32,
    pub gid: u32,
    pub link_target: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Header,
    File,
    Dir { expanded: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Cut,
    Copy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Normal,
    Picked,
    UnderOp(OpKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Highlight {
    pub color: u8,
    pub reverse: bool,
}

impl Highlight {
    pub fn sgr(&self) -> String {
        if self.reverse {
            format!("[38;5;{};7", self.color)
        } else {
            format!("[38;5;{}", self.color)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub name: String,
    pub fullpath: PathBuf,
    pub level: usize,
    pub state: NodeState,
    pub color: u8,
    pub ori_color: u8,
    pub cursor_on: bool,
    pub stat: Option<Stat>,
    pub size_label: String,
}

impl Node {
    pub fn header(wd: &Path, title: String, palette: &Palette) -> Self {
        Self {
            kind: NodeKind::Header,
            name: title,
            fullpath: wd.to_path_buf(),
            level: 0,
            state: NodeState::Normal,
            color: palette.cwd,
            ori_color: palette.cwd,
            cursor_on: false,
            stat: None,
            size_label: String::new(),
        }
    }

    // A missing stat target is a broken link, never an error.
    pub fn build(
        fs: &dyn FileSystem,
        path: PathBuf,
        level: usize,
        palette: &Palette,
        size_width: usize,
    ) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let stat = match fs.stat(&path) {
            Ok(stat) => Some(stat),
            Err(Error::NotFound(_)) => None,
            Err(err) => {
                tracing::warn!("stat {}: {err}", path.display());
                None
            }
        };
        let (kind, color, size_label) = match &stat {
            None => (NodeKind::File, palette.brokenlink, String::new()),
            Some(stat) if stat.is_dir => {
                let color = if stat.link_target.is_some() { palette.link } else { palette.dir };
                (NodeKind::Dir { expanded: false }, color, entry_count(&path).to_string())
            }
            Some(stat) => {
                let color = if stat.link_target.is_some() {
                    palette.link
                } else if is_executable(stat.target_mode) {
                    palette.exe
                } else {
                    palette.file
                };
                (NodeKind::File, color, size_string(stat.size, size_width))
            }
        };
        Self {
            kind,
            name,
            fullpath: path,
            level,
            state: NodeState::Normal,
            color,
            ori_color: color,
            cursor_on: false,
            stat,
            size_label,
        }
    }

    // Re-stat keeping identity, expansion and selection.
    pub fn restat(&mut self, fs: &dyn FileSystem, palette: &Palette, size_width: usize) {
        if self.is_header() {
            return;
        }
        let fresh = Node::build(fs, self.fullpath.clone(), self.level, palette, size_width);
        self.stat = fresh.stat;
        self.size_label = fresh.size_label;
        self.ori_color = fresh.ori_color;
        if self.state == NodeState::Normal {
            self.color = fresh.ori_color;
        }
    }

    pub fn is_header(&self) -> bool {
        matches!(self.kind, NodeKind::Header)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Dir { .. })
    }

    pub fn is_expanded(&self) -> bool {
        matches!(self.kind, NodeKind::Dir { expanded: true })
    }

    pub fn set_expanded(&mut self, expanded: bool) {
        if let NodeKind::Dir { expanded: flag } = &mut self.kind {
            *flag = expanded;
        }
    }

    pub fn highlight(&self) -> Highlight {
        Highlight { color: self.color, reverse: self.cursor_on }
    }

    /// Returns false when the node is held by a pending cut/copy.
    pub fn toggle_pick(&mut self, palette: &Palette) -> bool {
        match self.state {
            NodeState::Normal => {
                self.state = NodeState::Picked;
                self.color = palette.pick;
                true
            }
            NodeState::Picked => {
                self.reset_state();
                true
            }
            NodeState::UnderOp(_) => false,
        }
    }

    pub fn mark_under_op(&mut self, op: OpKind, palette: &Palette) {
        self.state = NodeState::UnderOp(op);
        self.color = match op {
            OpKind::Cut => palette.cut,
            OpKind::Copy => palette.copy,
        };
    }

    pub fn reset_state(&mut self) {
        self.state = NodeState::Normal;
        self.color = self.ori_color;
    }

    pub fn rename(&mut self, new_name: &str) -> PathBuf {
        let parent = self.fullpath.parent().map(Path::to_path_buf).unwrap_or_default();
        self.fullpath = parent.join(new_name);
        self.name = new_name.to_string();
        self.fullpath.clone()
    }

    pub fn rebase(&mut self, old_prefix: &Path, new_prefix: &Path) {
        if let Ok(rest) = self.fullpath.strip_prefix(old_prefix) {
            self.fullpath = new_prefix.join(rest);
        }
    }
}
