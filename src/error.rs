#![forbid(unsafe_code)]

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No such file or directory: {}", .0.display())]
    NotFound(PathBuf),

    #[error("`{command}` failed: {stderr}")]
    Shell { command: String, stderr: String },

    #[error("line {line}: {message}")]
    RuleSyntax { line: usize, message: String },

    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("invalid glob: {0}")]
    Glob(#[from] globset::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("edit mode cannot add/delete files")]
    EditMismatch,

    #[error("{0} is not installed")]
    ToolMissing(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            return Error::NotFound(path.to_path_buf());
        }
        Error::Io { path: path.to_path_buf(), source }
    }
}

pub trait IoContext<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|err| Error::io(path, err))
    }
}
