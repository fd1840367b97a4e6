#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use netranger::keymap::Binding;
use netranger::{
    Action, BufferId, Config, Controller, Host, JobId, JobOutput, OpenTarget, PanelKind, Result,
};

#[derive(Debug, Default, Clone)]
pub struct MockBuffer {
    pub path: PathBuf,
    pub display_name: String,
    pub lines: Vec<String>,
    pub cursor: usize,
    pub modifiable: bool,
}

/// Scripted editor: directory opens become new buffers whose entry events
/// are queued until `pump`.
#[derive(Debug, Default)]
pub struct MockHost {
    pub buffers: HashMap<BufferId, MockBuffer>,
    pub current: BufferId,
    pub next_id: BufferId,
    pub width: usize,
    pub cwd: PathBuf,
    pub errors: Vec<String>,
    pub echoes: Vec<String>,
    pub inputs: VecDeque<Option<String>>,
    pub spawned: Vec<String>,
    pub shell: Vec<String>,
    pub jobs: Vec<(String, JobId)>,
    pub opened: Vec<(PathBuf, OpenTarget)>,
    pub entered: VecDeque<PathBuf>,
    pub panel: Option<(PanelKind, Vec<String>)>,
    pub panel_input: Vec<String>,
    pub bindings: Vec<Binding>,
    pub inserting: bool,
}

impl MockHost {
    pub fn new() -> Self {
        Self { width: 80, next_id: 1, ..Self::default() }
    }

    pub fn pump(&mut self, controller: &mut Controller) {
        while let Some(path) = self.entered.pop_front() {
            controller.on_buf_enter(self, &path);
        }
    }

    pub fn open(&mut self, controller: &mut Controller, path: &Path) -> BufferId {
        self.open_path(path, OpenTarget::Current);
        self.pump(controller);
        self.current
    }

    pub fn press(&mut self, controller: &mut Controller, action: Action) {
        controller.invoke(self, action);
        self.pump(controller);
    }

    pub fn move_to(&mut self, controller: &mut Controller, line: usize) {
        self.set_cursor(line);
        controller.on_cursor_moved(self);
    }

    pub fn move_to_name(&mut self, controller: &mut Controller, name: &str) {
        let idx = controller
            .buffer(self.current)
            .and_then(|buffer| buffer.nodes.iter().skip(1).position(|node| node.name == name))
            .unwrap_or_else(|| panic!("{name} not listed"));
        self.move_to(controller, idx + 1);
    }

    /// Closes the open panel as if `key` had been typed into it.
    pub fn answer_panel(&mut self, controller: &mut Controller, key: Option<&str>) {
        assert!(self.panel.take().is_some(), "no panel open");
        if let Some(key) = key {
            self.panel_input.push(key.to_string());
        }
        self.reenter(controller);
    }

    pub fn switch_buffer_and_pump(&mut self, controller: &mut Controller, id: BufferId) {
        self.switch_buffer(id);
        self.pump(controller);
    }

    pub fn reenter(&mut self, controller: &mut Controller) {
        let path = self.buffers[&self.current].path.clone();
        self.entered.push_back(path);
        self.pump(controller);
    }

    pub fn cur_name(&self, controller: &Controller) -> String {
        let buffer = controller.buffer(self.current).expect("directory buffer");
        buffer.cur_node().map(|node| node.name.clone()).unwrap_or_default()
    }

    pub fn names(&self, controller: &Controller) -> Vec<String> {
        controller.buffer(self.current).expect("directory buffer").names()
    }

    pub fn lines(&self) -> &[String] {
        &self.buffers[&self.current].lines
    }

    pub fn lines_mut(&mut self) -> &mut Vec<String> {
        &mut self.buffers.get_mut(&self.current).expect("current buffer").lines
    }
}

impl Host for MockHost {
    fn window_width(&self) -> usize {
        self.width
    }

    fn current_buffer(&self) -> BufferId {
        self.current
    }

    fn cursor_line(&self) -> usize {
        self.buffers.get(&self.current).map_or(0, |buf| buf.cursor)
    }

    fn set_cursor(&mut self, line: usize) {
        if let Some(buf) = self.buffers.get_mut(&self.current) {
            buf.cursor = line.min(buf.lines.len().saturating_sub(1));
        }
    }

    fn buffer_lines(&self) -> Vec<String> {
        self.lines().to_vec()
    }

    fn set_buffer_lines(&mut self, lines: Vec<String>) {
        let buf = self.buffers.get_mut(&self.current).expect("current buffer");
        assert!(buf.modifiable, "write to non-modifiable buffer");
        buf.lines = lines;
    }

    fn set_line(&mut self, line: usize, text: String) {
        let buf = self.buffers.get_mut(&self.current).expect("current buffer");
        assert!(buf.modifiable, "write to non-modifiable buffer");
        buf.lines[line] = text;
    }

    fn set_modifiable(&mut self, modifiable: bool) {
        if let Some(buf) = self.buffers.get_mut(&self.current) {
            buf.modifiable = modifiable;
        }
    }

    fn is_modifiable(&self) -> bool {
        self.buffers.get(&self.current).is_some_and(|buf| buf.modifiable)
    }

    fn set_buffer_name(&mut self, name: &str) {
        if let Some(buf) = self.buffers.get_mut(&self.current) {
            buf.display_name = name.to_string();
        }
    }

    fn cwd(&self) -> PathBuf {
        self.cwd.clone()
    }

    fn set_cwd(&mut self, path: &Path) {
        self.cwd = path.to_path_buf();
    }

    fn error_msg(&mut self, msg: &str) {
        self.errors.push(msg.to_string());
    }

    fn echo(&mut self, msg: &str) {
        self.echoes.push(msg.to_string());
    }

    fn user_input(&mut self, _prompt: &str, _default: &str) -> Option<String> {
        self.inputs.pop_front().flatten()
    }

    fn spawn(&mut self, command: &str) {
        self.spawned.push(command.to_string());
    }

    fn run_shell(&mut self, command: &str) -> Result<String> {
        self.shell.push(command.to_string());
        Ok(String::new())
    }

    fn run_shell_async(&mut self, command: &str, job: JobId) {
        self.jobs.push((command.to_string(), job));
    }

    fn open_path(&mut self, path: &Path, target: OpenTarget) {
        if !path.is_dir() {
            self.opened.push((path.to_path_buf(), target));
            return;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.buffers.insert(id, MockBuffer { path: path.to_path_buf(), ..MockBuffer::default() });
        self.current = id;
        self.entered.push_back(path.to_path_buf());
    }

    fn switch_buffer(&mut self, id: BufferId) {
        self.current = id;
        let path = self.buffers[&id].path.clone();
        self.entered.push_back(path);
    }

    fn wipe_buffer(&mut self, id: BufferId) {
        self.buffers.remove(&id);
    }

    fn map_keys(&mut self, bindings: &[Binding]) {
        self.bindings = bindings.to_vec();
    }

    fn start_insert(&mut self) {
        self.inserting = true;
    }

    fn show_panel(&mut self, kind: PanelKind, lines: Vec<String>) {
        self.panel = Some((kind, lines));
    }

    fn take_panel_input(&mut self) -> Vec<String> {
        std::mem::take(&mut self.panel_input)
    }
}

pub struct Fixture {
    pub tree: tempfile::TempDir,
    pub home: tempfile::TempDir,
    pub root: PathBuf,
    pub host: MockHost,
    pub controller: Controller,
}

/// `root/{dir/{subdir/subsubdir/, subdir2/, a}, dir2/}` plus a controller
/// whose config lives in a separate directory.
pub fn fixture() -> Fixture {
    fixture_with(|_| {})
}

pub fn fixture_with(setup: impl FnOnce(&Path)) -> Fixture {
    let tree = tempfile::tempdir().unwrap();
    let home = tempfile::tempdir().unwrap();
    let root = tree.path().canonicalize().unwrap();
    fs::create_dir_all(root.join("dir/subdir/subsubdir")).unwrap();
    fs::create_dir(root.join("dir/subdir2")).unwrap();
    fs::write(root.join("dir/a"), b"a").unwrap();
    fs::create_dir(root.join("dir2")).unwrap();
    setup(home.path());
    let mut host = MockHost::new();
    let controller = Controller::new(&mut host, Config::with_root(home.path())).unwrap();
    Fixture { tree, home, root, host, controller }
}

pub fn listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

pub fn tick() {
    std::thread::sleep(std::time::Duration::from_millis(50));
}
