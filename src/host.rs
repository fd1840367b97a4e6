#![forbid(unsafe_code)]

//! The editor side of the contract. Everything the core needs from its
//! embedding editor goes through [`Host`]; all line numbers are 0-based and
//! every buffer-level call addresses the host's current buffer.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::keymap::Binding;

pub type BufferId = u64;
pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenTarget {
    Current,
    Buffer,
    Tab,
    TabBackground,
    VSplit,
    HSplit,
    Panel { width: usize },
}

impl OpenTarget {
    /// Maps an editor open command (`tabedit`, `edit`, `vsplit`, ...) to a
    /// placement.
    pub fn from_command(command: &str) -> Self {
        match command.trim() {
            "edit" | "e" => OpenTarget::Buffer,
            "vsplit" | "vs" | "vnew" => OpenTarget::VSplit,
            "split" | "sp" | "new" => OpenTarget::HSplit,
            _ => OpenTarget::Tab,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelKind {
    BookmarkSet,
    BookmarkGo,
    Sort,
    Help,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

pub trait Host {
    fn window_width(&self) -> usize;
    fn current_buffer(&self) -> BufferId;
    fn cursor_line(&self) -> usize;
    fn set_cursor(&mut self, line: usize);
    fn buffer_lines(&self) -> Vec<String>;
    fn set_buffer_lines(&mut self, lines: Vec<String>);
    fn set_line(&mut self, line: usize, text: String);
    fn set_modifiable(&mut self, modifiable: bool);
    fn is_modifiable(&self) -> bool;
    fn set_buffer_name(&mut self, name: &str);

    fn cwd(&self) -> PathBuf;
    fn set_cwd(&mut self, path: &Path);

    fn error_msg(&mut self, msg: &str);
    fn echo(&mut self, msg: &str);
    fn user_input(&mut self, prompt: &str, default: &str) -> Option<String>;

    /// Detached; the core never waits on it.
    fn spawn(&mut self, command: &str);
    fn run_shell(&mut self, command: &str) -> Result<String>;
    /// Completion is reported back through `Controller::on_job_finished`.
    fn run_shell_async(&mut self, command: &str, job: JobId);

    /// Opening a directory must eventually fire `Controller::on_buf_enter`.
    fn open_path(&mut self, path: &Path, target: OpenTarget);
    /// Fires `Controller::on_buf_enter` like any other buffer entry.
    fn switch_buffer(&mut self, id: BufferId);
    fn wipe_buffer(&mut self, id: BufferId);

    fn map_keys(&mut self, bindings: &[Binding]);
    fn start_insert(&mut self);

    /// Secondary panel. Keys typed there are collected until the panel
    /// closes and the directory buffer is entered again.
    fn show_panel(&mut self, kind: PanelKind, lines: Vec<String>);
    fn take_panel_input(&mut self) -> Vec<String>;
}
