#![forbid(unsafe_code)]

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;

use crate::config::Palette;
use crate::error::{Error, Result};
use crate::fs_ops::FileSystem;
use crate::host::Host;
use crate::model::Node;
use crate::sort::{SortOrder, sort_nodes};
use crate::ui::{HEADER_HEIGHT, abbrev_wd, header_line, node_line, plain_line};

const HIDDEN_PATTERN: &str = ".*";

#[derive(Debug, Clone)]
pub struct IgnoreSet {
    patterns: Vec<String>,
    set: GlobSet,
}

impl IgnoreSet {
    pub fn new(patterns: Vec<String>) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &patterns {
            builder.add(Glob::new(pattern)?);
        }
        Ok(Self { set: builder.build()?, patterns })
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        self.set.is_match(name)
    }

    pub fn hides_dotfiles(&self) -> bool {
        self.patterns.iter().any(|p| p == HIDDEN_PATTERN)
    }

    pub fn toggle_hidden(&mut self) -> Result<()> {
        let mut patterns = self.patterns.clone();
        if self.hides_dotfiles() {
            patterns.retain(|p| p != HIDDEN_PATTERN);
        } else {
            patterns.push(HIDDEN_PATTERN.to_string());
        }
        *self = Self::new(patterns)?;
        Ok(())
    }
}

/// Process-wide view state shared by every buffer. `sort_stamp` bumps on
/// every sort change so buffers know a resort is pending.
#[derive(Debug, Clone)]
pub struct Settings {
    pub palette: Palette,
    pub ignore: IgnoreSet,
    pub sort: SortOrder,
    pub sort_stamp: u64,
    pub size_width: usize,
}

impl Settings {
    pub fn set_sort(&mut self, order: SortOrder) {
        self.sort = order;
        self.sort_stamp += 1;
    }
}

#[derive(Debug)]
pub struct DirBuffer {
    pub wd: PathBuf,
    pub nodes: Vec<Node>,
    pub cline: usize,
    pub content_outdated: bool,
    pub last_width: usize,
    editing: bool,
    rendering: bool,
    sort_stamp: u64,
    highlight_outdated: BTreeSet<PathBuf>,
    mtimes: HashMap<PathBuf, Option<SystemTime>>,
}

impl DirBuffer {
    pub fn create(
        host: &mut dyn Host,
        fs: &mut dyn FileSystem,
        settings: &Settings,
        wd: PathBuf,
    ) -> Self {
        let basename = wd
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| wd.display().to_string());
        host.set_buffer_name(&format!("N:{basename}"));
        host.set_cwd(&wd);

        let width = host.window_width();
        let header = Node::header(&wd, abbrev_wd(&wd, width), &settings.palette);
        let children = build_children(fs, settings, &wd, 0);
        let mut nodes = vec![header];
        nodes.extend(sort_nodes(children, settings.sort));

        let mut buffer = Self {
            wd: wd.clone(),
            nodes,
            cline: HEADER_HEIGHT - 1,
            content_outdated: false,
            last_width: width,
            editing: false,
            rendering: false,
            sort_stamp: settings.sort_stamp,
            highlight_outdated: BTreeSet::new(),
            mtimes: HashMap::new(),
        };
        buffer.restore_line(HEADER_HEIGHT);
        buffer.mtimes.insert(wd.clone(), fs.mtime(&wd));
        debug!(wd = %wd.display(), nodes = buffer.nodes.len(), "buffer created");
        buffer.render(host, settings);
        buffer
    }

    pub fn is_editing(&self) -> bool {
        self.editing
    }

    pub fn is_rendering(&self) -> bool {
        self.rendering
    }

    pub fn has_content(&self) -> bool {
        self.nodes.len() > HEADER_HEIGHT
    }

    pub fn cur_node(&self) -> Option<&Node> {
        if self.cline < HEADER_HEIGHT {
            return None;
        }
        self.nodes.get(self.cline)
    }

    pub fn cur_path(&self) -> Option<PathBuf> {
        self.cur_node().map(|node| node.fullpath.clone())
    }

    pub fn node_index(&self, path: &Path) -> Option<usize> {
        self.nodes
            .iter()
            .skip(HEADER_HEIGHT)
            .position(|node| node.fullpath == path)
            .map(|idx| idx + HEADER_HEIGHT)
    }

    pub fn node_mut(&mut self, path: &Path) -> Option<&mut Node> {
        let idx = self.node_index(path)?;
        self.nodes.get_mut(idx)
    }

    pub fn names(&self) -> Vec<String> {
        self.nodes.iter().skip(HEADER_HEIGHT).map(|node| node.name.clone()).collect()
    }

    pub fn tracked_dirs(&self) -> Vec<PathBuf> {
        self.mtimes.keys().cloned().collect()
    }

    pub fn mark_highlight_outdated(&mut self, path: &Path) {
        self.highlight_outdated.insert(path.to_path_buf());
    }

    pub fn render(&mut self, host: &mut dyn Host, settings: &Settings) {
        self.rendering = true;
        let width = host.window_width();
        let mut lines = Vec::with_capacity(self.nodes.len());
        lines.push(self.header_text(width, settings));
        lines.extend(
            self.nodes
                .iter()
                .skip(HEADER_HEIGHT)
                .map(|node| node_line(node, width, settings.size_width)),
        );
        host.set_modifiable(true);
        host.set_buffer_lines(lines);
        host.set_modifiable(false);
        host.set_cursor(self.cline);
        self.last_width = width;
        self.highlight_outdated.clear();
        self.rendering = false;
    }

    pub fn render_plain(&mut self, host: &mut dyn Host) {
        self.rendering = true;
        let lines = self.nodes.iter().map(plain_line).collect();
        host.set_modifiable(true);
        host.set_buffer_lines(lines);
        host.set_cursor(self.cline);
        self.rendering = false;
    }

    fn header_text(&self, width: usize, settings: &Settings) -> String {
        header_line(&self.wd, self.cur_node(), width, settings.palette.cwd)
    }

    pub fn refresh_header(&mut self, host: &mut dyn Host, settings: &Settings) {
        let width = host.window_width();
        let text = self.header_text(width, settings);
        self.write_line(host, 0, text);
    }

    pub fn refresh_line(&mut self, host: &mut dyn Host, settings: &Settings, idx: usize) {
        if idx < HEADER_HEIGHT || idx >= self.nodes.len() {
            return;
        }
        let text = node_line(&self.nodes[idx], host.window_width(), settings.size_width);
        self.write_line(host, idx, text);
    }

    fn write_line(&mut self, host: &mut dyn Host, idx: usize, text: String) {
        self.rendering = true;
        host.set_modifiable(true);
        host.set_line(idx, text);
        host.set_modifiable(false);
        self.rendering = false;
    }

    pub fn refresh_outdated_highlight(&mut self, host: &mut dyn Host, settings: &Settings) {
        let outdated = std::mem::take(&mut self.highlight_outdated);
        for path in outdated {
            if let Some(idx) = self.node_index(&path) {
                self.refresh_line(host, settings, idx);
            }
        }
    }

    pub fn on_cursor_moved(&mut self, host: &mut dyn Host, settings: &Settings, line: usize) {
        if self.editing || self.rendering {
            return;
        }
        let target = self.clamp_line(line);
        if target != line {
            host.set_cursor(target);
        }
        if target == self.cline {
            return;
        }
        let old = self.cline;
        self.nodes[old].cursor_on = false;
        self.cline = target;
        self.nodes[target].cursor_on = true;
        self.refresh_line(host, settings, old);
        self.refresh_line(host, settings, target);
        self.refresh_header(host, settings);
    }

    fn clamp_line(&self, line: usize) -> usize {
        if !self.has_content() {
            return HEADER_HEIGHT - 1;
        }
        line.clamp(HEADER_HEIGHT, self.nodes.len() - 1)
    }

    pub fn restore_line(&mut self, line: usize) {
        self.cline = self.clamp_line(line);
        for (idx, node) in self.nodes.iter_mut().enumerate() {
            node.cursor_on = idx == self.cline && idx >= HEADER_HEIGHT;
        }
    }

    pub fn restore_cursor(&mut self, path: Option<&Path>) {
        let line = path.and_then(|p| self.node_index(p)).unwrap_or(HEADER_HEIGHT);
        self.restore_line(line);
    }

    pub fn focus(&mut self, host: &mut dyn Host, settings: &Settings, path: &Path) {
        if let Some(idx) = self.node_index(path) {
            self.on_cursor_moved(host, settings, idx);
            host.set_cursor(idx);
        }
    }

    fn sort(&mut self, settings: &Settings) {
        let current = self.cur_path();
        let content = self.nodes.split_off(HEADER_HEIGHT);
        self.nodes.extend(sort_nodes(content, settings.sort));
        self.sort_stamp = settings.sort_stamp;
        self.restore_cursor(current.as_deref());
    }

    /// Resorts when the shared sort order changed since this buffer last
    /// sorted. Stats are refreshed first since time and size keys age.
    pub fn apply_pending_sort(
        &mut self,
        host: &mut dyn Host,
        fs: &mut dyn FileSystem,
        settings: &Settings,
    ) -> bool {
        if self.sort_stamp == settings.sort_stamp {
            return false;
        }
        for node in self.nodes.iter_mut().skip(HEADER_HEIGHT) {
            node.restat(&*fs, &settings.palette, settings.size_width);
        }
        self.sort(settings);
        self.render(host, settings);
        true
    }

    fn check_mtimes(&mut self, fs: &dyn FileSystem) {
        for (path, stamp) in self.mtimes.iter_mut() {
            let now = fs.mtime(path);
            if now != *stamp {
                debug!(dir = %path.display(), "mtime changed");
                *stamp = now;
                self.content_outdated = true;
            }
        }
    }

    fn retrack(&mut self, fs: &dyn FileSystem) {
        let mut tracked: Vec<PathBuf> = vec![self.wd.clone()];
        tracked.extend(
            self.nodes
                .iter()
                .filter(|node| node.is_expanded())
                .map(|node| node.fullpath.clone()),
        );
        let mut next = HashMap::with_capacity(tracked.len());
        for path in tracked {
            let stamp = match self.mtimes.remove(&path) {
                Some(stamp) => stamp,
                None => fs.mtime(&path),
            };
            next.insert(path, stamp);
        }
        self.mtimes = next;
    }

    /// Diffs the root and every expanded directory against the filesystem,
    /// keeping the state of nodes that still exist. Returns whether the
    /// node sequence was rebuilt.
    pub fn refresh_nodes(
        &mut self,
        host: &mut dyn Host,
        fs: &mut dyn FileSystem,
        settings: &Settings,
    ) -> bool {
        self.check_mtimes(&*fs);
        if !self.content_outdated {
            return false;
        }
        self.content_outdated = false;
        let current = self.cur_path();

        let content = self.nodes.split_off(HEADER_HEIGHT);
        let mut old: HashMap<PathBuf, Node> =
            content.into_iter().map(|node| (node.fullpath.clone(), node)).collect();
        let mut fresh = Vec::new();
        let wd = self.wd.clone();
        collect_level(fs, settings, &wd, 0, &mut old, &mut fresh);
        debug!(
            wd = %wd.display(),
            dropped = old.len(),
            nodes = fresh.len(),
            "refreshed nodes"
        );

        self.nodes.extend(sort_nodes(fresh, settings.sort));
        self.sort_stamp = settings.sort_stamp;
        self.retrack(&*fs);
        self.restore_cursor(current.as_deref());
        self.render(host, settings);
        true
    }

    pub fn toggle_expand(
        &mut self,
        host: &mut dyn Host,
        fs: &mut dyn FileSystem,
        settings: &Settings,
    ) {
        let idx = self.cline;
        let Some(node) = self.cur_node() else { return };
        if !node.is_dir() {
            return;
        }
        let path = node.fullpath.clone();
        let level = node.level;
        if node.is_expanded() {
            let end = self.subtree_end(idx);
            self.nodes.drain(idx + 1..end);
            self.nodes[idx].set_expanded(false);
        } else {
            let children = sort_nodes(build_children(fs, settings, &path, level + 1), settings.sort);
            let tail = self.nodes.split_off(idx + 1);
            self.nodes.extend(children);
            self.nodes.extend(tail);
            self.nodes[idx].set_expanded(true);
        }
        self.retrack(&*fs);
        self.render(host, settings);
    }

    /// One past the last descendant of `idx`.
    pub fn subtree_end(&self, idx: usize) -> usize {
        let level = self.nodes[idx].level;
        let mut end = idx + 1;
        while end < self.nodes.len() && self.nodes[end].level > level {
            end += 1;
        }
        end
    }

    pub fn start_edit(&mut self, host: &mut dyn Host) {
        self.editing = true;
        self.render_plain(host);
    }

    /// Renames from edited lines, bottom-up so a parent rename never
    /// invalidates a pending child rename.
    pub fn save_edit(
        &mut self,
        host: &mut dyn Host,
        fs: &mut dyn FileSystem,
        settings: &Settings,
    ) -> Result<Vec<PathBuf>> {
        self.editing = false;
        let lines = host.buffer_lines();
        if lines.len() != self.nodes.len() {
            self.render(host, settings);
            return Err(Error::EditMismatch);
        }
        let mut renamed = Vec::new();
        for idx in (HEADER_HEIGHT..self.nodes.len()).rev() {
            let new_name = lines[idx].trim();
            if new_name.is_empty() || new_name == self.nodes[idx].name {
                continue;
            }
            let old_path = self.nodes[idx].fullpath.clone();
            let new_path = fs.parent_dir(&old_path).join(new_name);
            // A dangling link still occupies the name.
            if std::fs::symlink_metadata(&new_path).is_ok() {
                let err = Error::io(&new_path, io::Error::from(io::ErrorKind::AlreadyExists));
                host.error_msg(&err.to_string());
                continue;
            }
            if let Err(err) = fs.mv(&old_path, &new_path) {
                host.error_msg(&err.to_string());
                continue;
            }
            self.nodes[idx].rename(new_name);
            let end = self.subtree_end(idx);
            for node in &mut self.nodes[idx + 1..end] {
                node.rebase(&old_path, &new_path);
            }
            renamed.push(new_path);
        }
        self.sort(settings);
        self.retrack(&*fs);
        self.render(host, settings);
        Ok(renamed)
    }
}

pub fn build_children(
    fs: &mut dyn FileSystem,
    settings: &Settings,
    dir: &Path,
    level: usize,
) -> Vec<Node> {
    let names = fs.ls(dir);
    names
        .into_iter()
        .filter(|name| !settings.ignore.is_ignored(name))
        .map(|name| Node::build(&*fs, dir.join(name), level, &settings.palette, settings.size_width))
        .collect()
}

fn collect_level(
    fs: &mut dyn FileSystem,
    settings: &Settings,
    dir: &Path,
    level: usize,
    old: &mut HashMap<PathBuf, Node>,
    out: &mut Vec<Node>,
) {
    for name in fs.ls(dir) {
        if settings.ignore.is_ignored(&name) {
            continue;
        }
        let path = dir.join(&name);
        // A node is reused only while the entry keeps its kind.
        let is_dir = fs.stat(&path).is_ok_and(|stat| stat.is_dir);
        let node = match old.remove(&path) {
            Some(node) if node.level == level && node.is_dir() == is_dir => node,
            _ => Node::build(&*fs, path.clone(), level, &settings.palette, settings.size_width),
        };
        let expanded = node.is_expanded();
        out.push(node);
        if expanded {
            collect_level(fs, settings, &path, level + 1, old, out);
        }
    }
}
