#![forbid(unsafe_code)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{Error, IoContext, Result};

pub fn is_valid_mark(mark: &str) -> bool {
    let mut chars = mark.chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if c.is_ascii_alphabetic())
}

/// Marks in file order; one line `mark:path` each.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bookmarks {
    path: PathBuf,
    entries: Vec<(char, PathBuf)>,
}

impl Bookmarks {
    pub fn load(path: &Path) -> Result<Self> {
        let mut bookmarks = Self { path: path.to_path_buf(), entries: Vec::new() };
        bookmarks.reload()?;
        Ok(bookmarks)
    }

    pub fn file(&self) -> &Path {
        &self.path
    }

    pub fn reload(&mut self) -> Result<()> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(Error::io(&self.path, err)),
        };
        self.entries = parse(&contents);
        Ok(())
    }

    pub fn entries(&self) -> &[(char, PathBuf)] {
        &self.entries
    }

    pub fn get(&self, mark: char) -> Option<&Path> {
        self.entries.iter().find(|(m, _)| *m == mark).map(|(_, p)| p.as_path())
    }

    /// A mark names one path and a path carries one mark.
    pub fn set(&mut self, mark: char, path: &Path) -> Result<()> {
        if !mark.is_ascii_alphabetic() {
            return Ok(());
        }
        if let Some(entry) = self.entries.iter_mut().find(|(m, _)| *m == mark) {
            entry.1 = path.to_path_buf();
            self.entries.retain(|(m, p)| *m == mark || p != path);
        } else if let Some(entry) = self.entries.iter_mut().find(|(_, p)| p == path) {
            entry.0 = mark;
        } else {
            self.entries.push((mark, path.to_path_buf()));
        }
        info!(%mark, path = %path.display(), "bookmark set");
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }
        let contents: String = self
            .entries
            .iter()
            .map(|(mark, path)| format!("{}:{}\n", mark, path.display()))
            .collect();
        fs::write(&self.path, contents).at(&self.path)
    }

    pub fn menu_lines(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(mark, path)| format!("{mark}  {}", path.display()))
            .collect()
    }
}

fn parse(contents: &str) -> Vec<(char, PathBuf)> {
    let mut entries: Vec<(char, PathBuf)> = Vec::new();
    for line in contents.lines() {
        let Some((mark, path)) = line.split_once(':') else {
            if !line.trim().is_empty() {
                warn!(line, "malformed bookmark");
            }
            continue;
        };
        let path = path.trim();
        if !is_valid_mark(mark) || path.is_empty() {
            warn!(line, "malformed bookmark");
            continue;
        }
        let Some(mark) = mark.chars().next() else { continue };
        entries.retain(|(m, _)| *m != mark);
        entries.push((mark, PathBuf::from(path)));
    }
    entries
}
