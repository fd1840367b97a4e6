#![forbid(unsafe_code)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::mem;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::bookmark::{Bookmarks, is_valid_mark};
use crate::buffer::{DirBuffer, IgnoreSet, Settings};
use crate::config::{Config, home_dir};
use crate::error::{Error, Result};
use crate::fs_ops::{FileSystem, canonical, executable_on_path};
use crate::host::{BufferId, Host, JobId, JobOutput, OpenTarget, PanelKind};
use crate::keymap::{Action, Keymap};
use crate::model::{NodeState, OpKind};
use crate::remote::{
    MirrorFs, ProcessRunner, RCLONE_ARCHIVE_URL, Rclone, SyncDirection, Tool, extract_executable,
    shell_quote,
};
use crate::rifle::Rifle;
use crate::sort::{SORT_MENU, SortOrder};

type PathSets = HashMap<BufferId, BTreeSet<PathBuf>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deferred {
    BookmarkSet,
    BookmarkGo,
    Sort,
}

/// Continuation waiting for a panel to hand back exactly `argc` keys.
#[derive(Debug, Clone, Copy)]
struct Pending {
    action: Deferred,
    argc: usize,
    buffer: BufferId,
}

pub struct Controller {
    pub config: Config,
    pub settings: Settings,
    pub fs: MirrorFs,
    buffers: HashMap<BufferId, DirBuffer>,
    wd_to_buffer: HashMap<PathBuf, BufferId>,
    picked: PathSets,
    cut: PathSets,
    copied: PathSets,
    rifle: Rifle,
    bookmarks: Option<Bookmarks>,
    keymap: Keymap,
    deferred: Option<Pending>,
    jobs: HashMap<JobId, PathBuf>,
    next_job: JobId,
    pinned: BTreeSet<PathBuf>,
    pending_focus: Option<PathBuf>,
}

impl Controller {
    pub fn new(host: &mut dyn Host, config: Config) -> Result<Self> {
        let settings = Settings {
            palette: config.palette(),
            ignore: IgnoreSet::new(config.ignore.clone())?,
            sort: SortOrder::default(),
            sort_stamp: 0,
            size_width: config.size_width,
        };
        let rifle = match Rifle::load(&config.rifle_path()) {
            Ok((rifle, errors)) => {
                for err in errors {
                    host.error_msg(&format!("rifle.conf: {err}"));
                }
                rifle
            }
            Err(err) => {
                host.error_msg(&format!("rifle.conf: {err}"));
                Rifle::default()
            }
        };
        let keymap = Keymap::new(&config.default_map_skip);
        Ok(Self {
            config,
            settings,
            fs: MirrorFs::new(),
            buffers: HashMap::new(),
            wd_to_buffer: HashMap::new(),
            picked: HashMap::new(),
            cut: HashMap::new(),
            copied: HashMap::new(),
            rifle,
            bookmarks: None,
            keymap,
            deferred: None,
            jobs: HashMap::new(),
            next_job: 0,
            pinned: BTreeSet::new(),
            pending_focus: None,
        })
    }

    pub fn buffer(&self, id: BufferId) -> Option<&DirBuffer> {
        self.buffers.get(&id)
    }

    pub fn keymap(&self) -> &Keymap {
        &self.keymap
    }

    pub fn picked(&self, id: BufferId) -> Vec<PathBuf> {
        self.picked.get(&id).map(|set| set.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn cut(&self, id: BufferId) -> Vec<PathBuf> {
        self.cut.get(&id).map(|set| set.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn copied(&self, id: BufferId) -> Vec<PathBuf> {
        self.copied.get(&id).map(|set| set.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn is_editing(&self, host: &dyn Host) -> bool {
        self.buffers.get(&host.current_buffer()).is_some_and(DirBuffer::is_editing)
    }

    /// Entry point for every buffer the host enters. `name` is the host's
    /// name for the buffer, a path for freshly opened directories.
    pub fn on_buf_enter(&mut self, host: &mut dyn Host, name: &Path) {
        let id = host.current_buffer();
        if self.buffers.contains_key(&id) {
            self.reenter(host, id);
            return;
        }
        let Ok(wd) = canonical(name) else { return };
        if !wd.is_dir() {
            return;
        }
        if let Some(&existing) = self.wd_to_buffer.get(&wd) {
            if existing != id && self.buffers.contains_key(&existing) {
                debug!(wd = %wd.display(), existing, "raising existing buffer");
                host.wipe_buffer(id);
                host.switch_buffer(existing);
                return;
            }
        }
        let buffer = DirBuffer::create(host, &mut self.fs, &self.settings, wd.clone());
        self.buffers.insert(id, buffer);
        self.wd_to_buffer.insert(wd, id);
        host.map_keys(&self.keymap.active(false));
        self.apply_pending_focus(host, id);
        self.run_deferred(host, id);
    }

    fn reenter(&mut self, host: &mut dyn Host, id: BufferId) {
        let Some(buffer) = self.buffers.get_mut(&id) else { return };
        if buffer.is_editing() {
            return;
        }
        host.set_cwd(&buffer.wd);
        host.map_keys(&self.keymap.active(false));
        let wd = buffer.wd.clone();
        if buffer.refresh_nodes(host, &mut self.fs, &self.settings) {
            self.prune_sets(host, id);
            self.refresh_remote(host, &wd);
        }
        let Some(buffer) = self.buffers.get_mut(&id) else { return };
        buffer.refresh_outdated_highlight(host, &self.settings);
        buffer.apply_pending_sort(host, &mut self.fs, &self.settings);
        if buffer.last_width != host.window_width() {
            buffer.render(host, &self.settings);
        }
        self.apply_pending_focus(host, id);
        self.run_deferred(host, id);
    }

    pub fn on_cursor_moved(&mut self, host: &mut dyn Host) {
        let line = host.cursor_line();
        if let Some(buffer) = self.buffers.get_mut(&host.current_buffer()) {
            buffer.on_cursor_moved(host, &self.settings, line);
        }
    }

    pub fn on_resize(&mut self, host: &mut dyn Host) {
        if let Some(buffer) = self.buffers.get_mut(&host.current_buffer()) {
            if !buffer.is_editing() && buffer.last_width != host.window_width() {
                buffer.render(host, &self.settings);
            }
        }
    }

    /// Returns whether the key is bound in the current mode.
    pub fn on_key(&mut self, host: &mut dyn Host, key: &str) -> bool {
        if !self.buffers.contains_key(&host.current_buffer()) {
            return false;
        }
        match self.keymap.lookup(key, self.is_editing(host)) {
            Some(action) => {
                self.invoke(host, action);
                true
            }
            None => false,
        }
    }

    pub fn on_job_finished(&mut self, host: &mut dyn Host, job: JobId, output: JobOutput) {
        let Some(path) = self.jobs.remove(&job) else { return };
        debug!(job, status = output.status, path = %path.display(), "job finished");
        if output.status != 0 || !output.stderr.trim().is_empty() {
            let msg = output.stderr.trim();
            host.error_msg(if msg.is_empty() { "background job failed" } else { msg });
        }
        for buffer in self.buffers.values_mut() {
            if path.starts_with(&buffer.wd) {
                buffer.content_outdated = true;
            }
        }
    }

    pub fn invoke(&mut self, host: &mut dyn Host, action: Action) {
        let id = host.current_buffer();
        if !self.buffers.contains_key(&id) {
            return;
        }
        debug!(?action, buffer = id, "invoke");
        match action {
            Action::Open => self.open(host, id, OpenTarget::Current),
            Action::ParentDir => self.parent_dir(host, id),
            Action::TabOpen => self.open_file_only(host, id, OpenTarget::Tab),
            Action::TabBgOpen => self.open_file_only(host, id, OpenTarget::TabBackground),
            Action::BufOpen => self.open(host, id, OpenTarget::Buffer),
            Action::VSplitOpen => self.open(host, id, OpenTarget::VSplit),
            Action::HSplitOpen => self.open(host, id, OpenTarget::HSplit),
            Action::PanelOpen => {
                let width = (host.window_width() as f32 / 2.0 * self.config.panel_size) as usize;
                self.open(host, id, OpenTarget::Panel { width })
            }
            Action::AskOpen => self.ask_open(host, id),
            Action::ToggleExpand => self.toggle_expand(host, id),
            Action::VimCd => self.vim_cd(host, id),
            Action::Edit => self.edit(host, id),
            Action::SaveEdit => self.save_edit(host, id),
            Action::TogglePick => self.toggle_pick(host, id),
            Action::Cut => self.mark_picked(host, id, OpKind::Cut),
            Action::Copy => self.mark_picked(host, id, OpKind::Copy),
            Action::CutSingle => self.mark_current(host, id, OpKind::Cut),
            Action::CopySingle => self.mark_current(host, id, OpKind::Copy),
            Action::Paste => self.paste(host, id),
            Action::Delete => self.delete(host, id, false, false),
            Action::DeleteSingle => self.delete(host, id, false, true),
            Action::ForceDelete => self.delete(host, id, true, false),
            Action::ForceDeleteSingle => self.delete(host, id, true, true),
            Action::TogglePinRoot => self.toggle_pin_root(host, id),
            Action::ToggleHidden => self.toggle_hidden(host, id),
            Action::BookmarkSet => self.open_bookmark_panel(host, id, Deferred::BookmarkSet),
            Action::BookmarkGo => self.open_bookmark_panel(host, id, Deferred::BookmarkGo),
            Action::BookmarkEdit => self.bookmark_edit(host),
            Action::Sort => {
                let lines = SORT_MENU.iter().map(|line| line.to_string()).collect();
                host.show_panel(PanelKind::Sort, lines);
                self.defer(Deferred::Sort, id);
            }
            Action::Help => host.show_panel(PanelKind::Help, self.keymap.help_lines()),
            Action::Refresh => self.refresh(host, id),
        }
    }

    fn current(&self, id: BufferId) -> Option<(PathBuf, bool)> {
        let node = self.buffers.get(&id)?.cur_node()?;
        Some((node.fullpath.clone(), node.is_dir()))
    }

    fn open(&mut self, host: &mut dyn Host, id: BufferId, target: OpenTarget) {
        let Some((path, is_dir)) = self.current(id) else { return };
        if is_dir {
            host.open_path(&path, target);
            return;
        }
        if let Err(err) = self.fs.ensure_content(&path) {
            host.error_msg(&format!("Download failed: {err}"));
            return;
        }
        if target != OpenTarget::Current {
            host.open_path(&path, target);
            return;
        }
        match self.rifle.decide_open(&path) {
            Some(command) => {
                info!(%command, "spawn");
                host.spawn(&command);
            }
            None => host.open_path(&path, OpenTarget::from_command(&self.config.default_open_cmd)),
        }
    }

    fn open_file_only(&mut self, host: &mut dyn Host, id: BufferId, target: OpenTarget) {
        match self.current(id) {
            Some((_, true)) => host.echo("Only files open in tabs"),
            Some(_) => self.open(host, id, target),
            None => {}
        }
    }

    fn ask_open(&mut self, host: &mut dyn Host, id: BufferId) {
        let Some((path, _)) = self.current(id) else { return };
        let Some(command) = host.user_input("Open with: ", "") else { return };
        let command = command.trim();
        if command.is_empty() {
            return;
        }
        if let Err(err) = self.fs.ensure_content(&path) {
            host.error_msg(&format!("Download failed: {err}"));
            return;
        }
        let quoted = shell_quote(&path.to_string_lossy());
        let command = if command.contains("{}") {
            command.replace("{}", &quoted)
        } else {
            format!("{command} {quoted}")
        };
        host.spawn(&command);
    }

    fn parent_dir(&mut self, host: &mut dyn Host, id: BufferId) {
        let Some(wd) = self.buffers.get(&id).map(|b| b.wd.clone()) else { return };
        if self.pinned.contains(&wd) {
            host.echo("Pinned root");
            return;
        }
        let parent = self.fs.parent_dir(&wd);
        if parent == wd {
            return;
        }
        self.pending_focus = Some(wd);
        host.open_path(&parent, OpenTarget::Current);
    }

    fn apply_pending_focus(&mut self, host: &mut dyn Host, id: BufferId) {
        let Some(path) = self.pending_focus.take() else { return };
        if let Some(buffer) = self.buffers.get_mut(&id) {
            buffer.focus(host, &self.settings, &path);
        }
    }

    fn toggle_expand(&mut self, host: &mut dyn Host, id: BufferId) {
        let Some(buffer) = self.buffers.get_mut(&id) else { return };
        buffer.toggle_expand(host, &mut self.fs, &self.settings);
        self.prune_sets(host, id);
    }

    fn vim_cd(&mut self, host: &mut dyn Host, id: BufferId) {
        let Some(buffer) = self.buffers.get(&id) else { return };
        let target = match buffer.cur_node() {
            Some(node) if node.is_dir() => node.fullpath.clone(),
            _ => buffer.wd.clone(),
        };
        host.set_cwd(&target);
        host.echo(&format!("cd {}", target.display()));
    }

    fn edit(&mut self, host: &mut dyn Host, id: BufferId) {
        let Some(buffer) = self.buffers.get_mut(&id) else { return };
        buffer.start_edit(host);
        host.map_keys(&self.keymap.active(true));
        host.start_insert();
    }

    fn save_edit(&mut self, host: &mut dyn Host, id: BufferId) {
        let Some(buffer) = self.buffers.get_mut(&id) else { return };
        if !buffer.is_editing() {
            return;
        }
        let wd = buffer.wd.clone();
        match buffer.save_edit(host, &mut self.fs, &self.settings) {
            Ok(renamed) => {
                info!(count = renamed.len(), "renamed from edit");
                if !renamed.is_empty() {
                    self.refresh_remote(host, &wd);
                }
            }
            Err(Error::EditMismatch) => host.error_msg("Edit mode cannot add/delete files"),
            Err(err) => host.error_msg(&err.to_string()),
        }
        self.prune_sets(host, id);
        host.map_keys(&self.keymap.active(false));
    }

    fn toggle_pick(&mut self, host: &mut dyn Host, id: BufferId) {
        let Some(buffer) = self.buffers.get_mut(&id) else { return };
        let idx = buffer.cline;
        let Some(path) = buffer.cur_path() else { return };
        let Some(node) = buffer.node_mut(&path) else { return };
        if !node.toggle_pick(&self.settings.palette) {
            host.echo("Already cut or copied");
            return;
        }
        let picked = self.picked.entry(id).or_default();
        if node.state == NodeState::Picked {
            picked.insert(path);
        } else {
            picked.remove(&path);
        }
        buffer.refresh_line(host, &self.settings, idx);
    }

    fn mark_picked(&mut self, host: &mut dyn Host, id: BufferId, op: OpKind) {
        let picked = mem::take(&mut self.picked);
        for (bid, paths) in picked {
            for path in paths {
                self.mark_under_op(bid, path, op);
            }
        }
        if let Some(buffer) = self.buffers.get_mut(&id) {
            buffer.refresh_outdated_highlight(host, &self.settings);
        }
    }

    fn mark_current(&mut self, host: &mut dyn Host, id: BufferId, op: OpKind) {
        let Some(path) = self.buffers.get(&id).and_then(DirBuffer::cur_path) else { return };
        for sets in [&mut self.picked, &mut self.cut, &mut self.copied] {
            if let Some(set) = sets.get_mut(&id) {
                set.remove(&path);
            }
        }
        self.mark_under_op(id, path, op);
        if let Some(buffer) = self.buffers.get_mut(&id) {
            buffer.refresh_outdated_highlight(host, &self.settings);
        }
    }

    fn mark_under_op(&mut self, id: BufferId, path: PathBuf, op: OpKind) {
        if let Some(buffer) = self.buffers.get_mut(&id) {
            if let Some(node) = buffer.node_mut(&path) {
                node.mark_under_op(op, &self.settings.palette);
            }
            buffer.mark_highlight_outdated(&path);
        }
        let sets = match op {
            OpKind::Cut => &mut self.cut,
            OpKind::Copy => &mut self.copied,
        };
        sets.entry(id).or_default().insert(path);
    }

    fn paste(&mut self, host: &mut dyn Host, id: BufferId) {
        let dest = host.cwd();
        let batches = [(OpKind::Cut, mem::take(&mut self.cut)), (OpKind::Copy, mem::take(&mut self.copied))];
        let mut done: HashSet<PathBuf> = HashSet::new();
        let mut sources: Vec<PathBuf> = Vec::new();
        for (op, sets) in batches {
            for (bid, paths) in sets {
                if let Some(buffer) = self.buffers.get_mut(&bid) {
                    for path in &paths {
                        if let Some(node) = buffer.node_mut(path) {
                            node.reset_state();
                        }
                        buffer.mark_highlight_outdated(path);
                    }
                }
                // Deepest paths first so a parent never leaves before its children.
                for path in paths.into_iter().rev() {
                    if !done.insert(path.clone()) {
                        continue;
                    }
                    let result = match op {
                        OpKind::Cut => self.fs.mv(&path, &dest),
                        OpKind::Copy => self.fs.cp(&path, &dest),
                    };
                    if let Err(err) = result {
                        warn!(path = %path.display(), "paste failed: {err}");
                        host.error_msg(&format!("Paste failed: {err}"));
                    }
                    sources.push(path);
                }
            }
        }
        if sources.is_empty() {
            return;
        }
        for source in &sources {
            self.mark_outdated_upwards(source);
        }
        self.mark_outdated_upwards(&dest);
        self.refresh_remote(host, &dest);
        self.refresh_current(host, id);
    }

    fn mark_outdated_upwards(&mut self, path: &Path) {
        for ancestor in path.ancestors() {
            if let Some(bid) = self.wd_to_buffer.get(ancestor) {
                if let Some(buffer) = self.buffers.get_mut(bid) {
                    buffer.content_outdated = true;
                }
            }
        }
    }

    fn delete(&mut self, host: &mut dyn Host, id: BufferId, force: bool, single: bool) {
        let Some(line) = self.buffers.get(&id).map(|b| b.cline) else { return };
        let targets: Vec<(BufferId, PathBuf)> = if single {
            match self.buffers.get(&id).and_then(DirBuffer::cur_path) {
                Some(path) => vec![(id, path)],
                None => return,
            }
        } else {
            mem::take(&mut self.picked)
                .into_iter()
                .flat_map(|(bid, paths)| paths.into_iter().rev().map(move |p| (bid, p)))
                .collect()
        };
        for (bid, path) in &targets {
            if let Some(buffer) = self.buffers.get_mut(bid) {
                if let Some(node) = buffer.node_mut(path) {
                    node.reset_state();
                }
                buffer.mark_highlight_outdated(path);
                buffer.content_outdated = true;
            }
            if let Err(err) = self.fs.rm(path, force) {
                warn!(path = %path.display(), "delete failed: {err}");
                host.error_msg(&format!("Delete failed: {err}"));
            }
            self.mark_outdated_upwards(path);
        }
        self.refresh_current(host, id);
        if let Some(buffer) = self.buffers.get_mut(&id) {
            buffer.restore_line(line);
            buffer.render(host, &self.settings);
        }
    }

    fn toggle_pin_root(&mut self, host: &mut dyn Host, id: BufferId) {
        let Some(wd) = self.buffers.get(&id).map(|b| b.wd.clone()) else { return };
        if self.pinned.remove(&wd) {
            host.echo(&format!("Unpinned {}", wd.display()));
        } else {
            host.echo(&format!("Pinned {}", wd.display()));
            self.pinned.insert(wd);
        }
    }

    fn toggle_hidden(&mut self, host: &mut dyn Host, id: BufferId) {
        if let Err(err) = self.settings.ignore.toggle_hidden() {
            host.error_msg(&err.to_string());
            return;
        }
        for buffer in self.buffers.values_mut() {
            buffer.content_outdated = true;
        }
        self.refresh_current(host, id);
    }

    fn refresh(&mut self, host: &mut dyn Host, id: BufferId) {
        if let Some(buffer) = self.buffers.get_mut(&id) {
            buffer.content_outdated = true;
        }
        self.refresh_current(host, id);
    }

    fn refresh_current(&mut self, host: &mut dyn Host, id: BufferId) {
        let Some(buffer) = self.buffers.get_mut(&id) else { return };
        let wd = buffer.wd.clone();
        if buffer.refresh_nodes(host, &mut self.fs, &self.settings) {
            self.refresh_remote(host, &wd);
        }
        self.prune_sets(host, id);
        if let Some(buffer) = self.buffers.get_mut(&id) {
            buffer.refresh_outdated_highlight(host, &self.settings);
        }
    }

    // Drops selections whose node left the buffer, then returns every node
    // that no set holds any more to Normal so states and sets agree.
    fn prune_sets(&mut self, host: &mut dyn Host, id: BufferId) {
        let Some(buffer) = self.buffers.get_mut(&id) else { return };
        for sets in [&mut self.picked, &mut self.cut, &mut self.copied] {
            if let Some(set) = sets.get_mut(&id) {
                set.retain(|path| buffer.node_index(path).is_some());
            }
        }
        let held = |sets: &PathSets, path: &Path| sets.get(&id).is_some_and(|set| set.contains(path));
        let mut released = Vec::new();
        for node in &mut buffer.nodes {
            let kept = match node.state {
                NodeState::Normal => continue,
                NodeState::Picked => held(&self.picked, &node.fullpath),
                NodeState::UnderOp(OpKind::Cut) => held(&self.cut, &node.fullpath),
                NodeState::UnderOp(OpKind::Copy) => held(&self.copied, &node.fullpath),
            };
            if !kept {
                node.reset_state();
                released.push(node.fullpath.clone());
            }
        }
        if !released.is_empty() {
            debug!(count = released.len(), "released stale selections");
        }
        for path in &released {
            buffer.mark_highlight_outdated(path);
        }
        buffer.refresh_outdated_highlight(host, &self.settings);
    }

    fn defer(&mut self, action: Deferred, buffer: BufferId) {
        let argc = 1;
        self.deferred = Some(Pending { action, argc, buffer });
    }

    fn run_deferred(&mut self, host: &mut dyn Host, id: BufferId) {
        let Some(pending) = self.deferred.take() else { return };
        let input = host.take_panel_input();
        if pending.buffer != id || input.len() != pending.argc {
            debug!(?pending, got = input.len(), "deferred call dropped");
            return;
        }
        let key = input[0].as_str();
        match pending.action {
            Deferred::BookmarkSet => self.bookmark_set(host, id, key),
            Deferred::BookmarkGo => self.bookmark_go(host, key),
            Deferred::Sort => self.set_sort(host, id, key),
        }
    }

    fn load_bookmarks(&mut self) -> Result<&mut Bookmarks> {
        // The file may have been edited by hand since the last use.
        let bookmarks = match self.bookmarks.take() {
            Some(mut bookmarks) => {
                bookmarks.reload()?;
                bookmarks
            }
            None => Bookmarks::load(&self.config.bookmark_path())?,
        };
        Ok(self.bookmarks.insert(bookmarks))
    }

    fn open_bookmark_panel(&mut self, host: &mut dyn Host, id: BufferId, action: Deferred) {
        let kind = match action {
            Deferred::BookmarkGo => PanelKind::BookmarkGo,
            _ => PanelKind::BookmarkSet,
        };
        match self.load_bookmarks() {
            Ok(bookmarks) => {
                let lines = bookmarks.menu_lines();
                host.show_panel(kind, lines);
                self.defer(action, id);
            }
            Err(err) => host.error_msg(&err.to_string()),
        }
    }

    fn bookmark_set(&mut self, host: &mut dyn Host, id: BufferId, key: &str) {
        if !is_valid_mark(key) {
            host.echo("Invalid mark");
            return;
        }
        let Some(wd) = self.buffers.get(&id).map(|b| b.wd.clone()) else { return };
        let Some(mark) = key.chars().next() else { return };
        let result = self.load_bookmarks().and_then(|bookmarks| bookmarks.set(mark, &wd));
        if let Err(err) = result {
            host.error_msg(&err.to_string());
        }
    }

    fn bookmark_go(&mut self, host: &mut dyn Host, key: &str) {
        let Some(mark) = key.chars().next().filter(|_| is_valid_mark(key)) else {
            host.echo("Invalid mark");
            return;
        };
        let target = match self.load_bookmarks() {
            Ok(bookmarks) => bookmarks.get(mark).map(Path::to_path_buf),
            Err(err) => {
                host.error_msg(&err.to_string());
                return;
            }
        };
        match target {
            Some(path) => host.open_path(&path, OpenTarget::Current),
            None => host.echo(&format!("Mark {mark} not set")),
        }
    }

    fn bookmark_edit(&mut self, host: &mut dyn Host) {
        let file = match self.load_bookmarks() {
            Ok(bookmarks) => bookmarks.file().to_path_buf(),
            Err(err) => {
                host.error_msg(&err.to_string());
                return;
            }
        };
        host.open_path(&file, OpenTarget::from_command(&self.config.default_open_cmd));
    }

    fn set_sort(&mut self, host: &mut dyn Host, id: BufferId, key: &str) {
        let Some(order) = key.chars().next().and_then(SortOrder::from_char) else {
            host.echo("Unknown sort key");
            return;
        };
        self.settings.set_sort(order);
        if let Some(buffer) = self.buffers.get_mut(&id) {
            buffer.apply_pending_sort(host, &mut self.fs, &self.settings);
        }
        host.echo(&format!("Sort by {}", order.label()));
    }

    fn refresh_remote(&mut self, host: &mut dyn Host, path: &Path) {
        let Some(command) = self.fs.refresh_remote(path) else { return };
        debug!(%command, "remote upload");
        self.start_job(host, &command, path);
    }

    fn start_job(&mut self, host: &mut dyn Host, command: &str, path: &Path) {
        self.next_job += 1;
        let job = self.next_job;
        self.jobs.insert(job, path.to_path_buf());
        host.run_shell_async(command, job);
    }

    /// Transfers the current remote directory as a whole, in the background.
    pub fn sync_remote(&mut self, host: &mut dyn Host, direction: SyncDirection) {
        let Some(wd) = self.buffers.get(&host.current_buffer()).map(|b| b.wd.clone()) else {
            return;
        };
        let command = self
            .fs
            .rclone
            .as_ref()
            .filter(|rclone| rclone.contains(&wd))
            .and_then(|rclone| rclone.sync_command(&wd, direction));
        match command {
            Some(command) => {
                info!(?direction, %command, "remote sync");
                self.start_job(host, &command, &wd);
            }
            None => host.echo("Not a remote directory"),
        }
    }

    /// Enables the mirror with an already-built tool and lists its remotes.
    pub fn attach_remote(&mut self, mut rclone: Rclone) -> Result<Vec<String>> {
        let remotes = rclone.list_remotes()?;
        self.fs.rclone = Some(rclone);
        Ok(remotes)
    }

    /// Opens the remote cache root, installing the mirror tool first when
    /// it cannot be found.
    pub fn open_remote(&mut self, host: &mut dyn Host) {
        if self.fs.rclone.is_none() {
            let program = match self.find_or_install_tool(host) {
                Ok(Some(program)) => program,
                Ok(None) => {
                    host.echo("Remote features disabled");
                    return;
                }
                Err(err) => {
                    host.error_msg(&format!("Install failed: {err}"));
                    return;
                }
            };
            let tool = Tool::new(program, Box::new(ProcessRunner));
            let rclone = Rclone::new(
                tool,
                self.config.remote_cache_path(),
                self.config.remote_roots.clone(),
            );
            if let Err(err) = self.attach_remote(rclone) {
                host.error_msg(&err.to_string());
                return;
            }
        }
        host.open_path(&self.config.remote_cache_path(), OpenTarget::Current);
    }

    fn find_or_install_tool(&mut self, host: &mut dyn Host) -> Result<Option<PathBuf>> {
        let configured = PathBuf::from(&self.config.rclone_program);
        if configured.is_absolute() && configured.is_file() {
            return Ok(Some(configured));
        }
        if let Some(found) = executable_on_path(&self.config.rclone_program) {
            return Ok(Some(found));
        }
        let default_dir = home_dir().join(".local/bin");
        let prompt = format!("{} not found. Install into (empty to skip): ", self.config.rclone_program);
        let Some(answer) = host.user_input(&prompt, &default_dir.to_string_lossy()) else {
            return Ok(None);
        };
        let answer = answer.trim();
        if answer.is_empty() {
            return Ok(None);
        }
        let dir = PathBuf::from(answer);
        std::fs::create_dir_all(&dir).map_err(|err| Error::io(&dir, err))?;
        let archive = dir.join("rclone-current.zip");
        host.run_shell(&format!(
            "curl -fsSL -o {} {}",
            shell_quote(&archive.to_string_lossy()),
            RCLONE_ARCHIVE_URL
        ))?;
        let program = extract_executable(&archive, "rclone", &dir)?;
        if let Err(err) = std::fs::remove_file(&archive) {
            warn!(path = %archive.display(), "leaving archive behind: {err}");
        }
        self.config.rclone_program = program.to_string_lossy().to_string();
        Ok(Some(program))
    }
}
