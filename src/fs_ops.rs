#![forbid(unsafe_code)]

use std::env;
use std::fs;
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt, symlink};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::error::{Error, IoContext, Result};
use crate::model::Stat;

pub trait FileSystem {
    fn ls(&mut self, dir: &Path) -> Vec<String>;
    fn stat(&self, path: &Path) -> Result<Stat>;
    fn mtime(&self, path: &Path) -> Option<SystemTime>;
    /// Shell `mv` semantics: an existing directory `dst` receives `src`.
    fn mv(&mut self, src: &Path, dst: &Path) -> Result<PathBuf>;
    fn cp(&mut self, src: &Path, dst: &Path) -> Result<PathBuf>;
    fn rm(&mut self, target: &Path, force: bool) -> Result<()>;
    fn parent_dir(&self, path: &Path) -> PathBuf;
}

#[derive(Debug, Default, Clone)]
pub struct LocalFs;

impl FileSystem for LocalFs {
    fn ls(&mut self, dir: &Path) -> Vec<String> {
        list_names(dir)
    }

    fn stat(&self, path: &Path) -> Result<Stat> {
        stat_path(path)
    }

    fn mtime(&self, path: &Path) -> Option<SystemTime> {
        fs::metadata(path).and_then(|m| m.modified()).ok()
    }

    fn mv(&mut self, src: &Path, dst: &Path) -> Result<PathBuf> {
        let target = resolve_target(src, dst);
        info!(src = %src.display(), dst = %target.display(), "mv");
        move_entry(src, &target)?;
        Ok(target)
    }

    fn cp(&mut self, src: &Path, dst: &Path) -> Result<PathBuf> {
        let target = resolve_target(src, dst);
        info!(src = %src.display(), dst = %target.display(), "cp");
        copy_entry(src, &target)?;
        Ok(target)
    }

    fn rm(&mut self, target: &Path, force: bool) -> Result<()> {
        info!(target = %target.display(), force, "rm");
        if force {
            force_remove(target).at(target)
        } else {
            remove_path(target).at(target)
        }
    }

    fn parent_dir(&self, path: &Path) -> PathBuf {
        path.parent().unwrap_or(path).to_path_buf()
    }
}

pub fn list_names(dir: &Path) -> Vec<String> {
    let read = match fs::read_dir(dir) {
        Ok(read) => read,
        Err(err) => {
            warn!(dir = %dir.display(), "ls failed: {err}");
            return Vec::new();
        }
    };
    read.flatten()
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect()
}

pub fn stat_path(path: &Path) -> Result<Stat> {
    let lmeta = fs::symlink_metadata(path).at(path)?;
    let link_target = if lmeta.file_type().is_symlink() {
        Some(fs::read_link(path).at(path)?)
    } else {
        None
    };
    let meta = if link_target.is_some() {
        fs::metadata(path).at(path)?
    } else {
        lmeta.clone()
    };
    Ok(Stat {
        mode: lmeta.mode(),
        target_mode: meta.mode(),
        size: meta.len(),
        is_dir: meta.is_dir(),
        atime: meta.accessed().unwrap_or(UNIX_EPOCH),
        mtime: meta.modified().unwrap_or(UNIX_EPOCH),
        ctime: unix_time(meta.ctime(), meta.ctime_nsec()),
        uid: meta.uid(),
        gid: meta.gid(),
        link_target,
    })
}

fn unix_time(secs: i64, nsec: i64) -> SystemTime {
    if secs < 0 {
        return UNIX_EPOCH;
    }
    UNIX_EPOCH + Duration::new(secs as u64, nsec.clamp(0, 999_999_999) as u32)
}

pub fn resolve_target(src: &Path, dst: &Path) -> PathBuf {
    if dst.is_dir() {
        match src.file_name() {
            Some(name) => dst.join(name),
            None => dst.to_path_buf(),
        }
    } else {
        dst.to_path_buf()
    }
}

/// Links are never followed: a link is recreated with the same target, so
/// dangling links and `self -> .` loops copy like any other entry.
pub fn copy_entry(src: &Path, dest: &Path) -> Result<()> {
    let kind = fs::symlink_metadata(src).at(src)?.file_type();
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }
    copy_kind(kind, src, dest)
}

fn copy_kind(kind: fs::FileType, src: &Path, dest: &Path) -> Result<()> {
    if kind.is_symlink() {
        let target = fs::read_link(src).at(src)?;
        symlink(&target, dest).at(dest)
    } else if kind.is_dir() {
        copy_dir_recursive(src, dest)
    } else {
        fs::copy(src, dest).at(src)?;
        Ok(())
    }
}

pub fn move_entry(src: &Path, dest: &Path) -> Result<()> {
    if fs::rename(src, dest).is_ok() {
        return Ok(());
    }
    copy_entry(src, dest)?;
    remove_path(src).at(src)
}

pub fn remove_path(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

pub fn force_remove(path: &Path) -> io::Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    if meta.is_dir() {
        make_dirs_writable(path)?;
    }
    remove_path(path)
}

fn make_dirs_writable(dir: &Path) -> io::Result<()> {
    let mut perms = fs::metadata(dir)?.permissions();
    perms.set_mode(perms.mode() | 0o700);
    fs::set_permissions(dir, perms)?;
    for entry in fs::read_dir(dir)?.flatten() {
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            make_dirs_writable(&entry.path())?;
        }
    }
    Ok(())
}

pub fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).at(dest)?;
    for entry in fs::read_dir(src).at(src)? {
        let entry = entry.at(src)?;
        let path = entry.path();
        let kind = entry.file_type().at(&path)?;
        copy_kind(kind, &path, &dest.join(entry.file_name()))?;
    }
    Ok(())
}

pub fn entry_count(dir: &Path) -> usize {
    fs::read_dir(dir).map(|read| read.count()).unwrap_or(0)
}

pub fn is_executable(mode: u32) -> bool {
    mode & 0o111 != 0
}

pub fn executable_on_path(name: &str) -> Option<PathBuf> {
    if name.contains('/') {
        let path = PathBuf::from(name);
        return is_executable_file(&path).then_some(path);
    }
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable_file(candidate))
}

fn is_executable_file(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && is_executable(meta.mode()))
        .unwrap_or(false)
}

// Type character from the file-type nibble, then rwx triads with the
// setuid/setgid/sticky substitutions.
pub fn mode_string(mode: u32) -> String {
    let kind = match (mode >> 12) & 0xF {
        0xC => 's',
        0xA => 'l',
        0x8 => '-',
        0x6 => 'b',
        0x4 => 'd',
        0x2 => 'c',
        0x1 => 'p',
        _ => '?',
    };
    let mut out = String::with_capacity(10);
    out.push(kind);
    let specials = [(0o4000, 's'), (0o2000, 's'), (0o1000, 't')];
    for (triad, (special_bit, special)) in specials.into_iter().enumerate() {
        let shift = 6 - triad * 3;
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        let exec = bits & 0o1 != 0;
        out.push(match (mode & special_bit != 0, exec) {
            (true, true) => special,
            (true, false) => special.to_ascii_uppercase(),
            (false, true) => 'x',
            (false, false) => '-',
        });
    }
    out
}

pub fn size_string(bytes: u64, width: usize) -> String {
    const UNITS: [&str; 6] = ["B", "K", "M", "G", "T", "P"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let formatted = format!("{value:.1}");
    let mut number = formatted.strip_suffix(".0").unwrap_or(&formatted).to_string();
    let budget = width.saturating_sub(UNITS[unit].len() + 1).max(1);
    number.truncate(budget);
    let number = number.trim_end_matches('.');
    format!("{} {}", number, UNITS[unit])
}

pub fn format_time(time: SystemTime) -> String {
    let Ok(format) = time::format_description::parse("[year]-[month]-[day] [hour]:[minute]") else {
        return String::new();
    };
    let offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
    let dt = time::OffsetDateTime::from(time).to_offset(offset);
    dt.format(&format).unwrap_or_default()
}

pub fn user_name(uid: u32) -> String {
    lookup_id("/etc/passwd", uid).unwrap_or_else(|| uid.to_string())
}

pub fn group_name(gid: u32) -> String {
    lookup_id("/etc/group", gid).unwrap_or_else(|| gid.to_string())
}

// passwd and group share the `name:x:id:...` prefix.
fn lookup_id(table: &str, id: u32) -> Option<String> {
    let content = fs::read_to_string(table).ok()?;
    content.lines().find_map(|line| {
        let mut fields = line.split(':');
        let name = fields.next()?;
        let entry_id: u32 = fields.nth(1)?.parse().ok()?;
        (entry_id == id).then(|| name.to_string())
    })
}

pub fn canonical(path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path).map_err(|err| Error::io(path, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_string_decodes_types_and_specials() {
        assert_eq!(mode_string(0o100644), "-rw-r--r--");
        assert_eq!(mode_string(0o040755), "drwxr-xr-x");
        assert_eq!(mode_string(0o120777), "lrwxrwxrwx");
        assert_eq!(mode_string(0o104755), "-rwsr-xr-x");
        assert_eq!(mode_string(0o102644), "-rw-r-Sr--");
        assert_eq!(mode_string(0o041777), "drwxrwxrwt");
        assert_eq!(mode_string(0o041776), "drwxrwxrwT");
        assert_eq!(mode_string(0o010600), "prw-------");
        assert_eq!(mode_string(0o140700), "srwx------");
    }

    #[test]
    fn size_string_uses_binary_units() {
        assert_eq!(size_string(0, 6), "0 B");
        assert_eq!(size_string(1023, 6), "1023 B");
        assert_eq!(size_string(1024, 6), "1 K");
        assert_eq!(size_string(1536, 6), "1.5 K");
        assert_eq!(size_string(1024 * 1024 * 5, 6), "5 M");
        assert_eq!(size_string(1024 * 1000 + 600, 6), "1000 K");
    }

    #[test]
    fn mv_into_directory_and_rename() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::write(root.join("a"), b"x").unwrap();
        fs::create_dir(root.join("d")).unwrap();
        let mut local = LocalFs;
        let moved = local.mv(&root.join("a"), &root.join("d")).unwrap();
        assert_eq!(moved, root.join("d/a"));
        let renamed = local.mv(&root.join("d/a"), &root.join("d/b")).unwrap();
        assert_eq!(renamed, root.join("d/b"));
        assert!(root.join("d/b").exists());
    }

    #[test]
    fn rm_reports_missing_target() {
        let tmp = tempfile::tempdir().unwrap();
        let mut local = LocalFs;
        let err = local.rm(&tmp.path().join("missing"), false).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(local.rm(&tmp.path().join("missing"), true).is_ok());
    }

    #[test]
    fn force_rm_clears_read_only_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("ro");
        fs::create_dir_all(dir.join("inner")).unwrap();
        fs::write(dir.join("inner/f"), b"x").unwrap();
        fs::set_permissions(dir.join("inner"), fs::Permissions::from_mode(0o500)).unwrap();
        let mut local = LocalFs;
        local.rm(&dir, true).unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn cp_recreates_links_instead_of_following_them() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let src = root.join("src");
        fs::create_dir_all(root.join("elsewhere")).unwrap();
        fs::write(root.join("elsewhere/big"), b"not copied").unwrap();
        fs::create_dir(&src).unwrap();
        fs::write(src.join("f"), b"data").unwrap();
        symlink("missing", src.join("gone")).unwrap();
        symlink(".", src.join("self")).unwrap();
        symlink(root.join("elsewhere"), src.join("dirlink")).unwrap();
        fs::create_dir(root.join("dst")).unwrap();

        let mut local = LocalFs;
        let copied = local.cp(&src, &root.join("dst")).unwrap();
        assert_eq!(copied, root.join("dst/src"));
        assert_eq!(fs::read(copied.join("f")).unwrap(), b"data");
        assert_eq!(fs::read_link(copied.join("gone")).unwrap(), PathBuf::from("missing"));
        assert_eq!(fs::read_link(copied.join("self")).unwrap(), PathBuf::from("."));
        assert!(fs::symlink_metadata(copied.join("dirlink")).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(copied.join("dirlink")).unwrap(), root.join("elsewhere"));

        // a link at the top level stays a link too
        let top = local.cp(&src.join("gone"), &root.join("dst")).unwrap();
        assert_eq!(fs::read_link(top).unwrap(), PathBuf::from("missing"));
    }

    #[test]
    fn copy_errors_name_the_failing_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("f"), b"x").unwrap();
        let dst = tmp.path().join("dst");
        fs::create_dir_all(&dst).unwrap();
        // the destination already holds an entry where the link should go
        fs::create_dir_all(dst.join("src")).unwrap();
        symlink("f", src.join("link")).unwrap();
        fs::write(dst.join("src/link"), b"taken").unwrap();
        let mut local = LocalFs;
        let err = local.cp(&src, &dst).unwrap_err();
        assert!(err.to_string().starts_with(&dst.join("src/link").display().to_string()), "{err}");
    }

    #[test]
    fn broken_link_stat_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let link = tmp.path().join("dangling");
        std::os::unix::fs::symlink(tmp.path().join("gone"), &link).unwrap();
        assert!(matches!(stat_path(&link), Err(Error::NotFound(_))));
    }
}
