#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::time::SystemTime;

use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::error::{Error, IoContext, Result};
use crate::fs_ops::{FileSystem, LocalFs, list_names, resolve_target};
use crate::model::Stat;

pub const RCLONE_ARCHIVE_URL: &str = "https://downloads.rclone.org/rclone-current-linux-amd64.zip";

pub trait CommandRunner {
    fn run(&self, program: &Path, args: &[String]) -> Result<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, program: &Path, args: &[String]) -> Result<String> {
        debug!(program = %program.display(), ?args, "mirror tool");
        let output = Command::new(program).args(args).output().at(program)?;
        if !output.status.success() {
            return Err(Error::Shell {
                command: command_line(program, args),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

pub fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg.chars().all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', "'\\''"))
}

pub fn command_line(program: &Path, args: &[String]) -> String {
    let mut parts = vec![shell_quote(&program.to_string_lossy())];
    parts.extend(args.iter().map(|arg| shell_quote(arg)));
    parts.join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowFile {
    pub local_path: PathBuf,
    pub remote_path: String,
    pub inited: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowDir {
    pub local_path: PathBuf,
    pub remote_path: String,
    pub inited: bool,
    pub children: BTreeMap<String, Shadow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shadow {
    File(ShadowFile),
    Dir(ShadowDir),
}

pub struct Tool {
    pub program: PathBuf,
    runner: Box<dyn CommandRunner>,
}

impl Tool {
    pub fn new(program: PathBuf, runner: Box<dyn CommandRunner>) -> Self {
        Self { program, runner }
    }

    pub fn run(&self, args: &[&str]) -> Result<String> {
        let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        self.runner.run(&self.program, &args)
    }

    pub fn command(&self, args: &[&str]) -> String {
        let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        command_line(&self.program, &args)
    }
}

// `lsd` rows carry four columns before the name, `lsl` rows three.
fn name_after_fields(line: &str, skip: usize) -> Option<&str> {
    let mut rest = line.trim_start();
    for _ in 0..skip {
        let end = rest.find(char::is_whitespace)?;
        rest = rest[end..].trim_start();
    }
    (!rest.is_empty()).then_some(rest)
}

impl ShadowDir {
    fn new(local_path: PathBuf, remote_path: String, inited: bool) -> Self {
        Self { local_path, remote_path, inited, children: BTreeMap::new() }
    }

    pub fn lazy_init(&mut self, tool: &Tool) -> Result<()> {
        if self.inited {
            return Ok(());
        }
        let remote = self.remote_path.as_str();
        let dirs = tool.run(&["lsd", remote, "--max-depth", "1"])?;
        let files = tool.run(&["lsl", remote, "--max-depth", "1"])?;
        fs::create_dir_all(&self.local_path).at(&self.local_path)?;
        for name in dirs.lines().filter_map(|line| name_after_fields(line, 4)) {
            let local = self.local_path.join(name);
            fs::create_dir_all(&local).at(&local)?;
            let remote = join_remote(&self.remote_path, name);
            self.children
                .entry(name.to_string())
                .or_insert_with(|| Shadow::Dir(ShadowDir::new(local, remote, false)));
        }
        for name in files.lines().filter_map(|line| name_after_fields(line, 3)) {
            let local = self.local_path.join(name);
            touch(&local)?;
            let remote = join_remote(&self.remote_path, name);
            self.children.entry(name.to_string()).or_insert_with(|| {
                Shadow::File(ShadowFile { local_path: local, remote_path: remote, inited: false })
            });
        }
        debug!(remote = %self.remote_path, children = self.children.len(), "shadow listed");
        self.inited = true;
        Ok(())
    }

    /// Reconciles the children map with what is on local disk.
    pub fn refresh_children(&mut self) {
        let names = list_names(&self.local_path);
        self.children.retain(|name, _| names.contains(name));
        for name in names {
            let local = self.local_path.join(&name);
            let remote = join_remote(&self.remote_path, &name);
            let child = self.children.entry(name).or_insert_with(|| {
                if local.is_dir() {
                    Shadow::Dir(ShadowDir::new(local.clone(), remote.clone(), true))
                } else {
                    Shadow::File(ShadowFile { local_path: local.clone(), remote_path: remote, inited: true })
                }
            });
            if let Shadow::Dir(dir) = child {
                if dir.inited {
                    dir.refresh_children();
                }
            }
        }
    }
}

impl ShadowFile {
    pub fn lazy_init(&mut self, tool: &Tool) -> Result<()> {
        if self.inited {
            return Ok(());
        }
        let local = self.local_path.to_string_lossy().to_string();
        tool.run(&["copyto", &self.remote_path, &local])?;
        self.inited = true;
        Ok(())
    }
}

fn touch(path: &Path) -> Result<()> {
    match fs::OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(Error::io(path, err)),
    }
}

fn join_remote(base: &str, name: &str) -> String {
    if base.ends_with(':') || base.ends_with('/') {
        format!("{base}{name}")
    } else {
        format!("{base}/{name}")
    }
}

/// Local shadow of every configured remote, rooted at the cache directory.
/// Top-level children are named after the remotes (`name:`).
pub struct Rclone {
    pub tool: Tool,
    pub cache_dir: PathBuf,
    remote_roots: HashMap<String, String>,
    root: ShadowDir,
}

impl Rclone {
    pub fn new(tool: Tool, cache_dir: PathBuf, remote_roots: HashMap<String, String>) -> Self {
        let root = ShadowDir::new(cache_dir.clone(), String::new(), false);
        Self { tool, cache_dir, remote_roots, root }
    }

    pub fn list_remotes(&mut self) -> Result<Vec<String>> {
        fs::create_dir_all(&self.cache_dir).at(&self.cache_dir)?;
        let output = self.tool.run(&["listremotes"])?;
        let mut remotes = Vec::new();
        for remote in output.lines().map(str::trim).filter(|line| line.ends_with(':')) {
            let name = remote.trim_end_matches(':');
            let root = self.remote_roots.get(name).cloned().unwrap_or_default();
            let local = self.cache_dir.join(remote);
            fs::create_dir_all(&local).at(&local)?;
            self.root.children.entry(remote.to_string()).or_insert_with(|| {
                Shadow::Dir(ShadowDir::new(local, format!("{remote}{root}"), false))
            });
            remotes.push(remote.to_string());
        }
        self.root.inited = true;
        info!(count = remotes.len(), "remotes listed");
        Ok(remotes)
    }

    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.cache_dir)
    }

    fn components(&self, path: &Path) -> Option<Vec<String>> {
        let rel = path.strip_prefix(&self.cache_dir).ok()?;
        Some(
            rel.components()
                .filter_map(|c| match c {
                    Component::Normal(name) => Some(name.to_string_lossy().to_string()),
                    _ => None,
                })
                .collect(),
        )
    }

    pub fn remote_path(&self, local: &Path) -> Option<String> {
        let parts = self.components(local)?;
        let (remote, rest) = parts.split_first()?;
        let name = remote.trim_end_matches(':');
        let mut path = format!("{}:{}", name, self.remote_roots.get(name).map_or("", String::as_str));
        for part in rest {
            path = join_remote(&path, part);
        }
        Some(path)
    }

    /// Lists every shadow directory from the root down to `local`.
    pub fn ensure_listed(&mut self, local: &Path) -> Result<()> {
        let Some(parts) = self.components(local) else { return Ok(()) };
        let tool = &self.tool;
        let mut dir = &mut self.root;
        // The cache root itself is filled by `listremotes`.
        for name in parts {
            if !dir.remote_path.is_empty() {
                dir.lazy_init(tool)?;
            }
            dir = match dir.children.get_mut(&name) {
                Some(Shadow::Dir(child)) => child,
                _ => return Ok(()),
            };
        }
        if !dir.remote_path.is_empty() {
            dir.lazy_init(tool)?;
        }
        Ok(())
    }

    fn lookup_mut(&mut self, local: &Path) -> Option<&mut Shadow> {
        let parts = self.components(local)?;
        lookup_in(&mut self.root, &parts)
    }

    fn dir_mut(&mut self, local: &Path) -> Option<&mut ShadowDir> {
        if local == self.cache_dir {
            return Some(&mut self.root);
        }
        match self.lookup_mut(local)? {
            Shadow::Dir(dir) => Some(dir),
            Shadow::File(_) => None,
        }
    }

    /// Makes the local copy real: downloads a placeholder file, or a whole
    /// directory subtree.
    pub fn ensure_content(&mut self, local: &Path) -> Result<()> {
        if !self.contains(local) {
            return Ok(());
        }
        self.ensure_listed(local.parent().unwrap_or(local))?;
        let Some(remote) = self.remote_path(local) else { return Ok(()) };
        let Some(parts) = self.components(local) else { return Ok(()) };
        let tool = &self.tool;
        let local_str = local.to_string_lossy().to_string();
        match lookup_in(&mut self.root, &parts) {
            Some(Shadow::File(file)) => file.lazy_init(tool),
            Some(Shadow::Dir(dir)) => {
                tool.run(&["copy", &remote, &local_str])?;
                dir.inited = false;
                dir.lazy_init(tool)?;
                mark_tree_inited(dir);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Explicit transfer of a subtree in one direction. Uploads leave
    /// placeholders out, and excluded files are never deleted remotely.
    pub fn sync_command(&self, local: &Path, direction: SyncDirection) -> Option<String> {
        let remote = self.remote_path(local)?;
        let local = local.to_string_lossy().to_string();
        Some(match direction {
            SyncDirection::Up => self.tool.command(&["sync", &local, &remote, "--min-size", "1B"]),
            SyncDirection::Down => self.tool.command(&["sync", &remote, &local]),
        })
    }

    /// Upload command for local changes under `local`, then the shadow map
    /// is rebuilt from disk. Placeholders (empty, never downloaded) are
    /// filtered out so they can never overwrite remote content.
    pub fn refresh_remote(&mut self, local: &Path) -> Option<String> {
        let remote = self.remote_path(local)?;
        let local_str = local.to_string_lossy().to_string();
        let command = if local.is_dir() {
            self.tool.command(&["copy", &local_str, &remote, "--min-size", "1B"])
        } else {
            self.tool.command(&["copyto", &local_str, &remote])
        };
        if let Some(dir) = self.dir_mut(local) {
            dir.refresh_children();
        } else if let Some(parent) = local.parent() {
            if let Some(dir) = self.dir_mut(parent) {
                dir.refresh_children();
            }
        }
        Some(command)
    }

    pub fn remove_remote(&mut self, local: &Path, is_dir: bool) -> Result<()> {
        let Some(remote) = self.remote_path(local) else { return Ok(()) };
        let verb = if is_dir { "purge" } else { "delete" };
        self.tool.run(&[verb, &remote])?;
        if let Some(parent) = local.parent() {
            if let (Some(dir), Some(name)) = (self.dir_mut(parent), local.file_name()) {
                dir.children.remove(&*name.to_string_lossy());
            }
        }
        Ok(())
    }

    fn remote_transfer(&self, verb: &str, src: &Path, dst: &Path) -> Result<bool> {
        match (self.remote_path(src), self.remote_path(dst)) {
            (Some(src), Some(dst)) => {
                self.tool.run(&[verb, &src, &dst])?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn is_inited(&mut self, local: &Path) -> Option<bool> {
        match self.lookup_mut(local)? {
            Shadow::File(file) => Some(file.inited),
            Shadow::Dir(dir) => Some(dir.inited),
        }
    }
}

fn lookup_in<'a>(root: &'a mut ShadowDir, parts: &[String]) -> Option<&'a mut Shadow> {
    let (last, parents) = parts.split_last()?;
    let mut dir = root;
    for name in parents {
        dir = match dir.children.get_mut(name) {
            Some(Shadow::Dir(child)) => child,
            _ => return None,
        };
    }
    dir.children.get_mut(last)
}

fn mark_tree_inited(dir: &mut ShadowDir) {
    dir.refresh_children();
    for child in dir.children.values_mut() {
        match child {
            Shadow::File(file) => file.inited = true,
            Shadow::Dir(sub) => {
                sub.inited = true;
                mark_tree_inited(sub);
            }
        }
    }
}

/// Routes every call to the local filesystem, mirroring the operation on
/// the remote side when a path lives under the mirror cache.
pub struct MirrorFs {
    pub local: LocalFs,
    pub rclone: Option<Rclone>,
}

impl MirrorFs {
    pub fn new() -> Self {
        Self { local: LocalFs, rclone: None }
    }

    pub fn refresh_remote(&mut self, path: &Path) -> Option<String> {
        let rclone = self.rclone.as_mut()?;
        if !rclone.contains(path) {
            return None;
        }
        rclone.refresh_remote(path)
    }

    pub fn ensure_content(&mut self, path: &Path) -> Result<()> {
        match self.rclone.as_mut() {
            Some(rclone) => rclone.ensure_content(path),
            None => Ok(()),
        }
    }

    fn transfer(&mut self, verb: &str, src: &Path, dst: &Path) -> Result<PathBuf> {
        let target = resolve_target(src, dst);
        let Some(rclone) = self.rclone.as_mut() else {
            return match verb {
                "moveto" => self.local.mv(src, dst),
                _ => self.local.cp(src, dst),
            };
        };
        let src_remote = rclone.contains(src);
        if src_remote {
            if !rclone.remote_transfer(verb, src, &target)? {
                rclone.ensure_content(src)?;
            }
        }
        let is_dir = src.is_dir();
        let moved = match verb {
            "moveto" => self.local.mv(src, &target)?,
            _ => self.local.cp(src, &target)?,
        };
        if src_remote && verb == "moveto" && !rclone.contains(&target) {
            rclone.remove_remote(src, is_dir)?;
        }
        if src_remote {
            if let Some(parent) = src.parent() {
                if let Some(dir) = rclone.dir_mut(parent) {
                    dir.refresh_children();
                }
            }
        }
        Ok(moved)
    }
}

impl Default for MirrorFs {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for MirrorFs {
    fn ls(&mut self, dir: &Path) -> Vec<String> {
        if let Some(rclone) = self.rclone.as_mut() {
            if rclone.contains(dir) {
                if let Err(err) = rclone.ensure_listed(dir) {
                    warn!(dir = %dir.display(), "remote listing failed: {err}");
                }
            }
        }
        self.local.ls(dir)
    }

    fn stat(&self, path: &Path) -> Result<Stat> {
        self.local.stat(path)
    }

    fn mtime(&self, path: &Path) -> Option<SystemTime> {
        self.local.mtime(path)
    }

    fn mv(&mut self, src: &Path, dst: &Path) -> Result<PathBuf> {
        self.transfer("moveto", src, dst)
    }

    fn cp(&mut self, src: &Path, dst: &Path) -> Result<PathBuf> {
        self.transfer("copyto", src, dst)
    }

    fn rm(&mut self, target: &Path, force: bool) -> Result<()> {
        let is_dir = target.is_dir();
        self.local.rm(target, force)?;
        if let Some(rclone) = self.rclone.as_mut() {
            if rclone.contains(target) {
                rclone.remove_remote(target, is_dir)?;
            }
        }
        Ok(())
    }

    fn parent_dir(&self, path: &Path) -> PathBuf {
        let parent = self.local.parent_dir(path);
        match self.rclone.as_ref() {
            Some(rclone) if rclone.contains(path) && !rclone.contains(&parent) => {
                rclone.cache_dir.clone()
            }
            _ => parent,
        }
    }
}

/// Pulls `name` out of a downloaded release archive into `dest_dir` and
/// marks it executable.
pub fn extract_executable(archive_path: &Path, name: &str, dest_dir: &Path) -> Result<PathBuf> {
    let file = fs::File::open(archive_path).at(archive_path)?;
    let mut archive = ZipArchive::new(file)?;
    fs::create_dir_all(dest_dir).at(dest_dir)?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let matches = Path::new(entry.name()).file_name().is_some_and(|f| f == name);
        if !matches {
            continue;
        }
        let target = dest_dir.join(name);
        let mut out = fs::File::create(&target).at(&target)?;
        io::copy(&mut entry, &mut out).at(&target)?;
        fs::set_permissions(&target, fs::Permissions::from_mode(0o755)).at(&target)?;
        info!(path = %target.display(), "installed");
        return Ok(target);
    }
    Err(Error::ToolMissing(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::Write;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct FakeRunner {
        calls: Rc<RefCell<Vec<Vec<String>>>>,
        listings: Rc<HashMap<String, (String, String)>>,
    }

    impl CommandRunner for FakeRunner {
        fn run(&self, _program: &Path, args: &[String]) -> Result<String> {
            self.calls.borrow_mut().push(args.to_vec());
            let out = match args[0].as_str() {
                "listremotes" => "gdrive:\n".to_string(),
                "lsd" => self.listings.get(&args[1]).map(|l| l.0.clone()).unwrap_or_default(),
                "lsl" => self.listings.get(&args[1]).map(|l| l.1.clone()).unwrap_or_default(),
                _ => String::new(),
            };
            Ok(out)
        }
    }

    fn fake() -> FakeRunner {
        let mut listings = HashMap::new();
        listings.insert(
            "gdrive:".to_string(),
            (
                "          -1 2021-06-01 10:00:00        -1 docs\n".to_string(),
                "     1234 2021-06-01 10:00:00.000000000 read me.txt\n".to_string(),
            ),
        );
        listings.insert(
            "gdrive:docs".to_string(),
            (String::new(), "       10 2021-06-01 10:00:00.000000000 a.md\n".to_string()),
        );
        FakeRunner { calls: Rc::default(), listings: Rc::new(listings) }
    }

    fn mirror(cache: &Path, runner: FakeRunner) -> Rclone {
        let tool = Tool::new(PathBuf::from("rclone"), Box::new(runner));
        Rclone::new(tool, cache.to_path_buf(), HashMap::new())
    }

    #[test]
    fn parses_listing_columns() {
        assert_eq!(name_after_fields("    -1 2021-06-01 10:00:00   -1 my dir", 4), Some("my dir"));
        assert_eq!(name_after_fields("  12 2021-06-01 10:00:00.0 f.txt", 3), Some("f.txt"));
        assert_eq!(name_after_fields("   ", 3), None);
    }

    #[test]
    fn listing_materialises_placeholders() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = fake();
        let mut rclone = mirror(tmp.path(), runner.clone());
        assert_eq!(rclone.list_remotes().unwrap(), vec!["gdrive:".to_string()]);

        let docs = tmp.path().join("gdrive:/docs");
        rclone.ensure_listed(&docs).unwrap();
        assert!(tmp.path().join("gdrive:/read me.txt").is_file());
        assert!(docs.join("a.md").is_file());
        assert_eq!(rclone.is_inited(&docs.join("a.md")), Some(false));
        assert_eq!(rclone.remote_path(&docs.join("a.md")).as_deref(), Some("gdrive:docs/a.md"));

        rclone.ensure_content(&docs.join("a.md")).unwrap();
        assert_eq!(rclone.is_inited(&docs.join("a.md")), Some(true));
        let calls = runner.calls.borrow();
        assert!(calls.iter().any(|c| c[0] == "copyto" && c[1] == "gdrive:docs/a.md"));
    }

    #[test]
    fn parent_dir_clamps_at_cache_root() {
        let tmp = tempfile::tempdir().unwrap();
        let mut fs = MirrorFs::new();
        fs.rclone = Some(mirror(tmp.path(), fake()));
        assert_eq!(fs.parent_dir(tmp.path()), tmp.path().to_path_buf());
        assert_eq!(fs.parent_dir(&tmp.path().join("gdrive:")), tmp.path().to_path_buf());
    }

    #[test]
    fn refresh_remote_skips_placeholders_and_reconciles() {
        let tmp = tempfile::tempdir().unwrap();
        let mut rclone = mirror(tmp.path(), fake());
        rclone.list_remotes().unwrap();
        let root = tmp.path().join("gdrive:");
        rclone.ensure_listed(&root).unwrap();
        fs::write(root.join("new.txt"), b"data").unwrap();
        fs::remove_file(root.join("read me.txt")).unwrap();

        let command = rclone.refresh_remote(&root).unwrap();
        assert!(command.starts_with("rclone copy "));
        assert!(command.ends_with("gdrive: --min-size 1B"));
        assert_eq!(rclone.is_inited(&root.join("new.txt")), Some(true));
        assert_eq!(rclone.is_inited(&root.join("read me.txt")), None);
    }

    #[test]
    fn extracts_binary_from_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("rclone.zip");
        {
            let file = fs::File::create(&archive).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("rclone-v1-linux-amd64/README.txt", options).unwrap();
            writer.write_all(b"readme").unwrap();
            writer.start_file("rclone-v1-linux-amd64/rclone", options).unwrap();
            writer.write_all(b"#!/bin/sh\n").unwrap();
            writer.finish().unwrap();
        }
        let bin = extract_executable(&archive, "rclone", &tmp.path().join("bin")).unwrap();
        assert_eq!(fs::read(&bin).unwrap(), b"#!/bin/sh\n");
        assert!(crate::fs_ops::is_executable(fs::metadata(&bin).unwrap().permissions().mode()));
    }

    #[test]
    fn quoting_survives_spaces() {
        assert_eq!(shell_quote("gdrive:docs/a.md"), "gdrive:docs/a.md");
        assert_eq!(shell_quote("read me.txt"), "'read me.txt'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }
}
