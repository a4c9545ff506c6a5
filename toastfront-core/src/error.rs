//! Error types for the build pipeline.

use std::path::PathBuf;

use thiserror::Error;

use crate::template::TemplateError;

/// Result type alias using `BuildError`.
pub type Result<T> = std::result::Result<T, BuildError>;

/// Errors that abort a build.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("source folder not found: {}", .0.display())]
    MissingSourceDir(PathBuf),

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("can't decode vars file {}: {source}", path.display())]
    VarsDecode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("template error in {}: {source}", path.display())]
    Template {
        path: PathBuf,
        #[source]
        source: TemplateError,
    },

    #[error("{} is not a regular file", .0.display())]
    NotRegularFile(PathBuf),

    #[error("can't serialize vars: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BuildError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Recoverable failures while expanding a single import directive.
///
/// These are logged and the directive expands to a single newline; the outer
/// file keeps building.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("imported file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("import types mismatched: {}", .0.display())]
    TypeMismatch(PathBuf),

    #[error("reached max recursion depth of {max} at {}, import loop ?", path.display())]
    TooDeep { path: PathBuf, max: usize },

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
