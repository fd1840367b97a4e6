#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ColorSpec {
    Index(u8),
    Name(String),
}

impl ColorSpec {
    fn named(name: &str) -> Self {
        ColorSpec::Name(name.to_string())
    }

    pub fn index(&self) -> u8 {
        match self {
            ColorSpec::Index(idx) => *idx,
            ColorSpec::Name(name) => color_index(name).unwrap_or(15),
        }
    }
}

// Subset of the xterm-256 names.
pub fn color_index(name: &str) -> Option<u8> {
    let idx = match name.to_ascii_lowercase().as_str() {
        "black" => 0,
        "maroon" => 1,
        "green" => 2,
        "olive" => 3,
        "navy" => 4,
        "purple" => 5,
        "teal" => 6,
        "silver" => 7,
        "grey" | "gray" => 8,
        "red" => 9,
        "lime" => 10,
        "yellow" => 11,
        "blue" => 12,
        "fuchsia" => 13,
        "aqua" | "cyan" => 14,
        "white" => 15,
        "dodgerblue3" => 26,
        "dodgerblue2" => 27,
        "deepskyblue1" => 39,
        "springgreen2" => 47,
        "orange1" => 214,
        "gold1" => 220,
        _ => return name.parse().ok(),
    };
    Some(idx)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    pub cwd: ColorSpec,
    pub pick: ColorSpec,
    pub copy: ColorSpec,
    pub cut: ColorSpec,
    pub exe: ColorSpec,
    pub dir: ColorSpec,
    pub link: ColorSpec,
    pub brokenlink: ColorSpec,
    pub file: ColorSpec,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            cwd: ColorSpec::named("yellow"),
            pick: ColorSpec::named("yellow"),
            copy: ColorSpec::named("fuchsia"),
            cut: ColorSpec::named("grey"),
            exe: ColorSpec::named("green"),
            dir: ColorSpec::named("dodgerblue3"),
            link: ColorSpec::named("cyan"),
            brokenlink: ColorSpec::named("red"),
            file: ColorSpec::named("white"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub cwd: u8,
    pub pick: u8,
    pub copy: u8,
    pub cut: u8,
    pub exe: u8,
    pub dir: u8,
    pub link: u8,
    pub brokenlink: u8,
    pub file: u8,
}

impl Default for Palette {
    fn default() -> Self {
        ColorConfig::default().palette()
    }
}

impl ColorConfig {
    pub fn palette(&self) -> Palette {
        Palette {
            cwd: self.cwd.index(),
            pick: self.pick.index(),
            copy: self.copy.index(),
            cut: self.cut.index(),
            exe: self.exe.index(),
            dir: self.dir.index(),
            link: self.link.index(),
            brokenlink: self.brokenlink.index(),
            file: self.file.index(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ignore: Vec<String>,
    pub default_open_cmd: String,
    pub default_map_skip: Vec<String>,
    pub root_dir: PathBuf,
    pub bookmark_file: Option<PathBuf>,
    pub rifle_file: Option<PathBuf>,
    pub remote_cache_dir: Option<PathBuf>,
    pub remote_roots: HashMap<String, String>,
    pub split_orientation: String,
    pub panel_size: f32,
    pub colors: ColorConfig,
    pub max_eager_display_count: usize,
    pub min_parallel_load_count: usize,
    pub size_width: usize,
    pub rclone_program: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ignore: vec![".*".to_string()],
            default_open_cmd: "tabedit".to_string(),
            default_map_skip: Vec::new(),
            root_dir: default_root_dir(),
            bookmark_file: None,
            rifle_file: None,
            remote_cache_dir: None,
            remote_roots: HashMap::new(),
            split_orientation: "belowright".to_string(),
            panel_size: 1.0,
            colors: ColorConfig::default(),
            max_eager_display_count: 500,
            min_parallel_load_count: 500,
            size_width: 6,
            rclone_program: "rclone".to_string(),
        }
    }
}

impl Config {
    pub fn with_root(root: &Path) -> Self {
        Self { root_dir: root.to_path_buf(), ..Self::default() }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(err) => return Err(Error::io(path, err)),
        };
        let mut config: Config = toml::from_str(&contents)?;
        config.root_dir = expand_tilde(&config.root_dir);
        Ok(config)
    }

    pub fn default_path() -> PathBuf {
        default_root_dir().join(CONFIG_FILE_NAME)
    }

    pub fn root(&self) -> PathBuf {
        expand_tilde(&self.root_dir)
    }

    pub fn bookmark_path(&self) -> PathBuf {
        self.bookmark_file
            .as_deref()
            .map(expand_tilde)
            .unwrap_or_else(|| self.root().join("bookmark"))
    }

    pub fn rifle_path(&self) -> PathBuf {
        self.rifle_file
            .as_deref()
            .map(expand_tilde)
            .unwrap_or_else(|| self.root().join("rifle.conf"))
    }

    pub fn remote_cache_path(&self) -> PathBuf {
        self.remote_cache_dir
            .as_deref()
            .map(expand_tilde)
            .unwrap_or_else(|| self.root().join("remote"))
    }

    pub fn palette(&self) -> Palette {
        self.colors.palette()
    }
}

pub fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))
}

fn default_root_dir() -> PathBuf {
    home_dir().join(".netranger")
}

pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home_dir().join(rest),
        Err(_) => path.to_path_buf(),
    }
}
