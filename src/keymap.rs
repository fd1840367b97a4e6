#![forbid(unsafe_code)]

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Open,
    ParentDir,
    TabOpen,
    TabBgOpen,
    BufOpen,
    VSplitOpen,
    HSplitOpen,
    PanelOpen,
    AskOpen,
    ToggleExpand,
    VimCd,
    Edit,
    SaveEdit,
    TogglePick,
    Cut,
    Copy,
    CutSingle,
    CopySingle,
    Paste,
    Delete,
    DeleteSingle,
    ForceDelete,
    ForceDeleteSingle,
    TogglePinRoot,
    ToggleHidden,
    BookmarkSet,
    BookmarkGo,
    BookmarkEdit,
    Sort,
    Help,
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub key: String,
    pub action: Action,
}

pub const DEFAULT_BINDINGS: &[(&str, Action, &str)] = &[
    ("l", Action::Open, "open file or directory"),
    ("<Right>", Action::Open, "open file or directory"),
    ("h", Action::ParentDir, "go to parent directory"),
    ("<Left>", Action::ParentDir, "go to parent directory"),
    ("t", Action::TabOpen, "open file in a new tab"),
    ("T", Action::TabBgOpen, "open file in a background tab"),
    ("e", Action::BufOpen, "open in the current window"),
    ("iv", Action::VSplitOpen, "open in a vertical split"),
    ("is", Action::HSplitOpen, "open in a horizontal split"),
    ("ip", Action::PanelOpen, "open in a side panel"),
    ("a", Action::AskOpen, "open with a typed command"),
    ("za", Action::ToggleExpand, "expand or collapse directory"),
    ("cd", Action::VimCd, "change editor directory"),
    ("i", Action::Edit, "rename entries by editing lines"),
    ("<Esc>", Action::SaveEdit, "save edited names"),
    ("<Space>", Action::TogglePick, "pick or unpick entry"),
    ("x", Action::Cut, "cut picked entries"),
    ("y", Action::Copy, "copy picked entries"),
    ("dd", Action::CutSingle, "cut current entry"),
    ("yy", Action::CopySingle, "copy current entry"),
    ("p", Action::Paste, "paste into current directory"),
    ("D", Action::Delete, "delete picked entries"),
    ("dD", Action::DeleteSingle, "delete current entry"),
    ("X", Action::ForceDelete, "force delete picked entries"),
    ("dX", Action::ForceDeleteSingle, "force delete current entry"),
    ("zp", Action::TogglePinRoot, "pin or unpin root"),
    ("zh", Action::ToggleHidden, "show or hide hidden files"),
    ("m", Action::BookmarkSet, "set bookmark"),
    ("'", Action::BookmarkGo, "go to bookmark"),
    ("em", Action::BookmarkEdit, "edit bookmark file"),
    ("S", Action::Sort, "choose sort order"),
    ("?", Action::Help, "show key bindings"),
    ("R", Action::Refresh, "refresh buffer"),
];

#[derive(Debug, Clone)]
pub struct Keymap {
    bindings: Vec<Binding>,
}

impl Keymap {
    pub fn new(skip: &[String]) -> Self {
        let bindings = DEFAULT_BINDINGS
            .iter()
            .filter(|(key, _, _)| !skip.iter().any(|s| s == key))
            .map(|(key, action, _)| Binding { key: key.to_string(), action: *action })
            .collect();
        Self { bindings }
    }

    /// Everything except saving is unbound while lines are being edited.
    pub fn active(&self, editing: bool) -> Vec<Binding> {
        self.bindings
            .iter()
            .filter(|binding| (binding.action == Action::SaveEdit) == editing)
            .cloned()
            .collect()
    }

    pub fn lookup(&self, key: &str, editing: bool) -> Option<Action> {
        self.bindings
            .iter()
            .find(|b| b.key == key && (b.action == Action::SaveEdit) == editing)
            .map(|b| b.action)
    }

    /// Keys that are a strict prefix of a longer binding, used by hosts that
    /// resolve multi-key sequences.
    pub fn is_prefix(&self, pending: &str, editing: bool) -> bool {
        self.active(editing)
            .iter()
            .any(|b| b.key.len() > pending.len() && b.key.starts_with(pending))
    }

    pub fn help_lines(&self) -> Vec<String> {
        self.bindings
            .iter()
            .map(|binding| format!("{:<8}{}", binding.key, describe(binding.action)))
            .collect()
    }
}

pub fn describe(action: Action) -> &'static str {
    DEFAULT_BINDINGS
        .iter()
        .find(|(_, a, _)| *a == action)
        .map_or("", |(_, _, text)| *text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_list_drops_defaults() {
        let keymap = Keymap::new(&["dD".to_string(), "?".to_string()]);
        assert_eq!(keymap.lookup("dD", false), None);
        assert_eq!(keymap.lookup("?", false), None);
        assert_eq!(keymap.lookup("dd", false), Some(Action::CutSingle));
    }

    #[test]
    fn edit_mode_binds_only_save() {
        let keymap = Keymap::new(&[]);
        let active = keymap.active(true);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].action, Action::SaveEdit);
        assert_eq!(keymap.lookup("l", true), None);
        assert_eq!(keymap.lookup("<Esc>", false), None);
    }

    #[test]
    fn prefixes_of_sequences() {
        let keymap = Keymap::new(&[]);
        assert!(keymap.is_prefix("d", false));
        assert!(keymap.is_prefix("z", false));
        assert!(!keymap.is_prefix("dd", false));
        assert!(!keymap.is_prefix("l", false));
    }

    #[test]
    fn help_lists_every_binding() {
        let keymap = Keymap::new(&[]);
        let help = keymap.help_lines();
        assert_eq!(help.len(), DEFAULT_BINDINGS.len());
        assert!(help.iter().any(|line| line.starts_with("za") && line.ends_with("expand or collapse directory")));
    }
}
