#![forbid(unsafe_code)]

use std::iter;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::model::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Default,
    Name,
    Extension,
    Size,
    Atime,
    Ctime,
    Mtime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOrder {
    pub key: SortKey,
    pub reverse: bool,
}

impl Default for SortOrder {
    fn default() -> Self {
        Self { key: SortKey::Default, reverse: false }
    }
}

impl SortOrder {
    /// Lowercase selects the key, uppercase the same key reversed.
    pub fn from_char(c: char) -> Option<Self> {
        let key = match c.to_ascii_lowercase() {
            'd' => SortKey::Default,
            'n' => SortKey::Name,
            'e' => SortKey::Extension,
            's' => SortKey::Size,
            'a' => SortKey::Atime,
            'c' => SortKey::Ctime,
            'm' => SortKey::Mtime,
            _ => return None,
        };
        Some(Self { key, reverse: c.is_ascii_uppercase() })
    }

    pub fn label(&self) -> String {
        let name = match self.key {
            SortKey::Default => "default",
            SortKey::Name => "name",
            SortKey::Extension => "extension",
            SortKey::Size => "size",
            SortKey::Atime => "atime",
            SortKey::Ctime => "ctime",
            SortKey::Mtime => "mtime",
        };
        if self.reverse { format!("{name} (reversed)") } else { name.to_string() }
    }
}

pub const SORT_MENU: [&str; 7] = [
    "d/D  default",
    "n/N  name",
    "e/E  extension",
    "s/S  size",
    "a/A  access time",
    "c/C  change time",
    "m/M  modification time",
];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum SortValue {
    None,
    Number(u128),
    Text(String),
}

// Directories order before files at every level.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Segment {
    is_file: bool,
    value: SortValue,
    name: String,
}

fn nanos(time: SystemTime) -> u128 {
    time.duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0)
}

fn segment(node: &Node, key: SortKey) -> Segment {
    let stat = node.stat.as_ref();
    let value = match key {
        SortKey::Default => SortValue::None,
        SortKey::Name => SortValue::Text(node.name.to_lowercase()),
        SortKey::Extension => {
            let ext = match node.name.rsplit_once('.') {
                Some((head, ext)) if !head.is_empty() && !node.is_dir() => ext.to_lowercase(),
                _ => String::new(),
            };
            SortValue::Text(ext)
        }
        SortKey::Size => stat.map_or(SortValue::None, |s| SortValue::Number(s.size as u128)),
        SortKey::Atime => stat.map_or(SortValue::None, |s| SortValue::Number(nanos(s.atime))),
        SortKey::Ctime => stat.map_or(SortValue::None, |s| SortValue::Number(nanos(s.ctime))),
        SortKey::Mtime => stat.map_or(SortValue::None, |s| SortValue::Number(nanos(s.mtime))),
    };
    Segment { is_file: !node.is_dir(), value, name: node.name.clone() }
}

/// Orders a flattened tree (header excluded). Each node is keyed by the
/// segments of its whole ancestor chain, so a parent always precedes its
/// subtree and siblings are ordered among themselves.
pub fn sort_nodes(nodes: Vec<Node>, order: SortOrder) -> Vec<Node> {
    let mut chain: Vec<Segment> = Vec::new();
    let mut keyed: Vec<(Vec<Segment>, Node)> = Vec::with_capacity(nodes.len());
    for node in nodes {
        chain.truncate(node.level);
        chain.push(segment(&node, order.key));
        keyed.push((chain.clone(), node));
    }
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    let sorted: Vec<Node> = keyed.into_iter().map(|(_, node)| node).collect();
    if order.reverse { reverse_siblings(sorted) } else { sorted }
}

// Reverses every sibling group while each subtree stays behind its parent.
fn reverse_siblings(nodes: Vec<Node>) -> Vec<Node> {
    let Some(base) = nodes.iter().map(|n| n.level).min() else {
        return nodes;
    };
    let mut blocks: Vec<Vec<Node>> = Vec::new();
    for node in nodes {
        match blocks.last_mut() {
            Some(block) if node.level > base => block.push(node),
            _ => blocks.push(vec![node]),
        }
    }
    blocks
        .into_iter()
        .rev()
        .flat_map(|mut block| {
            let head = block.remove(0);
            iter::once(head).chain(reverse_siblings(block))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeKind, NodeState};
    use std::path::PathBuf;

    fn node(path: &str, level: usize, dir: bool) -> Node {
        let fullpath = PathBuf::from(path);
        Node {
            kind: if dir { NodeKind::Dir { expanded: true } } else { NodeKind::File },
            name: fullpath.file_name().unwrap().to_string_lossy().to_string(),
            fullpath,
            level,
            state: NodeState::Normal,
            color: 15,
            ori_color: 15,
            cursor_on: false,
            stat: None,
            size_label: String::new(),
        }
    }

    fn names(nodes: &[Node]) -> Vec<String> {
        nodes.iter().map(|n| n.fullpath.display().to_string()).collect()
    }

    #[test]
    fn subtree_sorts_between_parent_and_next_sibling() {
        let nodes = vec![
            node("/t/dir2", 0, true),
            node("/t/b", 0, false),
            node("/t/dir", 0, true),
            node("/t/dir/z", 1, false),
            node("/t/dir/sub", 1, true),
        ];
        let sorted = sort_nodes(nodes, SortOrder::default());
        assert_eq!(names(&sorted), ["/t/dir", "/t/dir/sub", "/t/dir/z", "/t/dir2", "/t/b"]);
    }

    #[test]
    fn reverse_keeps_children_under_parents() {
        let nodes = vec![
            node("/t/a", 0, true),
            node("/t/a/a1", 1, false),
            node("/t/a/a2", 1, false),
            node("/t/c", 0, true),
            node("/t/c/c1", 1, true),
            node("/t/c/c1/deep", 2, false),
            node("/t/c/c2", 1, false),
        ];
        let order = SortOrder { key: SortKey::Default, reverse: true };
        let sorted = sort_nodes(nodes, order);
        assert_eq!(
            names(&sorted),
            ["/t/c", "/t/c/c2", "/t/c/c1", "/t/c/c1/deep", "/t/a", "/t/a/a2", "/t/a/a1"]
        );
        for pair in sorted.windows(2) {
            if pair[1].level > pair[0].level {
                assert!(pair[0].is_expanded());
                assert!(pair[1].fullpath.starts_with(&pair[0].fullpath));
            }
        }
    }

    #[test]
    fn extension_key_groups_by_suffix() {
        let nodes = vec![
            node("/t/b.rs", 0, false),
            node("/t/a.txt", 0, false),
            node("/t/c.md", 0, false),
            node("/t/plain", 0, false),
        ];
        let order = SortOrder { key: SortKey::Extension, reverse: false };
        let sorted = sort_nodes(nodes, order);
        assert_eq!(names(&sorted), ["/t/plain", "/t/c.md", "/t/b.rs", "/t/a.txt"]);
    }

    #[test]
    fn sort_menu_chars() {
        assert_eq!(SortOrder::from_char('m'), Some(SortOrder { key: SortKey::Mtime, reverse: false }));
        assert_eq!(SortOrder::from_char('S'), Some(SortOrder { key: SortKey::Size, reverse: true }));
        assert_eq!(SortOrder::from_char('x'), None);
    }
}
