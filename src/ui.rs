#![forbid(unsafe_code)]

use std::path::{Component, Path};

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::config::home_dir;
use crate::fs_ops::{format_time, group_name, mode_string, user_name};
use crate::model::{Highlight, Node};

pub const HEADER_HEIGHT: usize = 1;
pub const INDENT: &str = "  ";
const RESET: &str = "\x1b[0m";

pub fn size_column(size_width: usize) -> usize {
    size_width + 2
}

pub fn colored(highlight: Highlight, text: &str) -> String {
    format!("\x1b{}m{}{}", highlight.sgr(), text, RESET)
}

pub fn node_line(node: &Node, win_width: usize, size_width: usize) -> String {
    let indent = INDENT.repeat(node.level);
    let size_col = size_column(size_width);
    let name_width = win_width.saturating_sub(indent.len() + size_col);
    let text = format!(
        "{}{}{:>size_col$}",
        indent,
        abbrev_name(&node.name, name_width),
        node.size_label,
    );
    colored(node.highlight(), &text)
}

pub fn plain_line(node: &Node) -> String {
    if node.is_header() {
        return node.name.clone();
    }
    format!("{}{}", INDENT.repeat(node.level), node.name)
}

/// Pads to `width` columns or cuts the middle out, keeping the extension:
/// `{head}~{ext}`, or `{head}~` when there is no dot.
pub fn abbrev_name(name: &str, width: usize) -> String {
    let name_width = name.width();
    if name_width <= width {
        return pad(name.to_string(), width);
    }
    if width == 0 {
        return String::new();
    }
    if let Some(dot) = name.rfind('.').filter(|&dot| dot > 0) {
        let ext = &name[dot..];
        let ext_width = ext.width();
        if ext_width + 2 <= width {
            let head = take_width(&name[..dot], width - ext_width - 1);
            return pad(format!("{head}~{ext}"), width);
        }
    }
    let head = take_width(name, width - 1);
    pad(format!("{head}~"), width)
}

fn take_width(text: &str, limit: usize) -> String {
    let mut used = 0;
    let mut out = String::new();
    for c in text.chars() {
        let w = c.width().unwrap_or(0);
        if used + w > limit {
            break;
        }
        used += w;
        out.push(c);
    }
    out
}

fn pad(mut text: String, width: usize) -> String {
    let current = text.width();
    if current < width {
        text.push_str(&" ".repeat(width - current));
    }
    text
}

/// `~` for home; components shrink to their first character when the path
/// does not fit.
pub fn abbrev_wd(wd: &Path, width: usize) -> String {
    let home = home_dir();
    let display = match wd.strip_prefix(&home) {
        Ok(rest) if home != Path::new("/") => {
            if rest.as_os_str().is_empty() {
                "~".to_string()
            } else {
                format!("~/{}", rest.display())
            }
        }
        _ => wd.display().to_string(),
    };
    if display.width() <= width {
        return display;
    }
    let parts: Vec<String> = Path::new(&display)
        .components()
        .map(|c| match c {
            Component::RootDir => String::new(),
            other => other.as_os_str().to_string_lossy().to_string(),
        })
        .collect();
    let last = parts.len().saturating_sub(1);
    parts
        .iter()
        .enumerate()
        .map(|(i, part)| {
            if i == last || part.is_empty() {
                part.clone()
            } else {
                part.chars().next().map(String::from).unwrap_or_default()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub fn header_line(wd: &Path, current: Option<&Node>, win_width: usize, color: u8) -> String {
    let mut text = abbrev_wd(wd, win_width);
    if let Some(stat) = current.and_then(|node| node.stat.as_ref()) {
        text.push_str(&format!(
            "  {} {} {} {}",
            mode_string(stat.mode),
            user_name(stat.uid),
            group_name(stat.gid),
            format_time(stat.mtime),
        ));
    }
    colored(Highlight { color, reverse: false }, &text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_are_padded() {
        assert_eq!(abbrev_name("abc", 6), "abc   ");
    }

    #[test]
    fn long_names_keep_extension() {
        assert_eq!(abbrev_name("verylongname.txt", 10), "veryl~.txt");
        assert_eq!(abbrev_name("verylongname", 6), "veryl~");
        assert_eq!(abbrev_name(".bashrc_long", 6), ".bash~");
    }

    #[test]
    fn wide_characters_count_double() {
        let out = abbrev_name("日本語のファイル", 7);
        assert_eq!(out.width(), 7);
        assert!(out.ends_with('~') || out.ends_with(' '));
    }

    #[test]
    fn node_line_layout() {
        let node = Node {
            kind: crate::model::NodeKind::File,
            name: "a".to_string(),
            fullpath: "/t/a".into(),
            level: 1,
            state: crate::model::NodeState::Normal,
            color: 15,
            ori_color: 15,
            cursor_on: true,
            stat: None,
            size_label: "3 B".to_string(),
        };
        let line = node_line(&node, 20, 6);
        assert_eq!(line, format!("\x1b[38;5;15;7m  a{}     3 B\x1b[0m", " ".repeat(9)));
    }

    #[test]
    fn wd_shrinks_when_narrow() {
        let wd = Path::new("/usr/local/share/applications");
        assert_eq!(abbrev_wd(wd, 80), "/usr/local/share/applications");
        assert_eq!(abbrev_wd(wd, 10), "/u/l/s/applications");
    }
}
