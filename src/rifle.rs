#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, warn};

use crate::error::{Error, IoContext, Result};
use crate::fs_ops::executable_on_path;
use crate::remote::shell_quote;

const PLACEHOLDER: &str = "{}";

pub const DEFAULT_RIFLE: &str = "\
# tests = command
# tests: comma separated `ext REGEX` / `has EXECUTABLE`, all must pass.
# `{}` is replaced by the file path (appended when missing).
ext \\.(pdf|PDF)$, has zathura = zathura
ext \\.(pdf|PDF)$, has evince = evince
ext \\.(png|jpe?g|gif|bmp|webp)$, has feh = feh
ext \\.(png|jpe?g|gif|bmp|webp)$, has eog = eog
ext \\.(mp4|mkv|avi|webm|mp3|flac|ogg)$, has mpv = mpv
ext \\.html?$, has firefox = firefox
";

#[derive(Debug, Clone)]
pub enum Test {
    Ext(Regex),
    Has(String),
}

impl Test {
    fn passes(&self, file_name: &str) -> bool {
        match self {
            Test::Ext(re) => re.is_match(file_name),
            Test::Has(program) => executable_on_path(program).is_some(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub tests: Vec<Test>,
    pub command: String,
}

#[derive(Debug, Clone, Default)]
pub struct Rifle {
    pub rules: Vec<Rule>,
}

impl Rifle {
    /// Per-line problems come back alongside the rules that did parse.
    pub fn parse(contents: &str) -> (Self, Vec<Error>) {
        let mut rules = Vec::new();
        let mut errors = Vec::new();
        for (idx, raw) in contents.lines().enumerate() {
            let line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }
            match parse_rule(line) {
                Ok(rule) => rules.push(rule),
                Err(message) => errors.push(Error::RuleSyntax { line: idx + 1, message }),
            }
        }
        debug!(rules = rules.len(), errors = errors.len(), "rifle parsed");
        (Self { rules }, errors)
    }

    pub fn load(path: &Path) -> Result<(Self, Vec<Error>)> {
        ensure_rifle_file(path)?;
        let contents = fs::read_to_string(path).at(path)?;
        Ok(Self::parse(&contents))
    }

    pub fn decide_open(&self, path: &Path) -> Option<String> {
        let file_name = path.file_name()?.to_string_lossy();
        let rule = self
            .rules
            .iter()
            .find(|rule| rule.tests.iter().all(|test| test.passes(&file_name)))?;
        Some(rule.command.replace(PLACEHOLDER, &shell_quote(&path.to_string_lossy())))
    }
}

// `#` opens a comment only at the start of the line or after whitespace,
// so patterns like `^c#` survive.
fn strip_comment(line: &str) -> &str {
    let mut prev = None;
    for (pos, c) in line.char_indices() {
        if c == '#' && prev.is_none_or(char::is_whitespace) {
            return &line[..pos];
        }
        prev = Some(c);
    }
    line
}

// Clauses are separated by a comma followed by the next test keyword;
// other commas belong to the pattern.
fn split_clauses(tests: &str) -> Vec<&str> {
    let mut clauses = Vec::new();
    let mut start = 0;
    for (pos, _) in tests.match_indices(',') {
        let rest = tests[pos + 1..].trim_start();
        if rest.starts_with("ext ") || rest.starts_with("has ") {
            clauses.push(&tests[start..pos]);
            start = pos + 1;
        }
    }
    clauses.push(&tests[start..]);
    clauses
}

fn parse_rule(line: &str) -> std::result::Result<Rule, String> {
    let (tests, command) = line
        .split_once('=')
        .ok_or_else(|| "expected `tests = command`".to_string())?;
    let command = command.trim();
    if command.is_empty() {
        return Err("empty command".to_string());
    }
    let mut parsed = Vec::new();
    for clause in split_clauses(tests) {
        let clause = clause.trim();
        let (kind, arg) = clause
            .split_once(char::is_whitespace)
            .ok_or_else(|| format!("incomplete test `{clause}`"))?;
        let arg = arg.trim();
        match kind {
            "ext" => parsed.push(Test::Ext(Regex::new(arg).map_err(|err| err.to_string())?)),
            "has" => parsed.push(Test::Has(arg.to_string())),
            other => return Err(format!("unknown test `{other}`")),
        }
    }
    let command = if command.contains(PLACEHOLDER) {
        command.to_string()
    } else {
        format!("{command} {PLACEHOLDER}")
    };
    Ok(Rule { tests: parsed, command })
}

pub fn ensure_rifle_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }
    if !path.exists() {
        warn!(path = %path.display(), "writing default rifle rules");
        fs::write(path, DEFAULT_RIFLE).at(path)?;
    }
    Ok(())
}

pub fn default_rifle_path(root: &Path) -> PathBuf {
    root.join("rifle.conf")
}
