use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{BuildError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    /// Anything else the walk reports (sockets, pipes, ...).
    Other,
}

/// One entry of the source tree, relative to the source directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
}

impl SourceEntry {
    pub fn file<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::File,
        }
    }

    pub fn directory<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Directory,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    /// Stat `root/path` and describe it as an entry.
    pub fn stat(root: &Path, path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(root.join(path))?;
        let kind = if meta.is_dir() {
            EntryKind::Directory
        } else if meta.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        };

        Ok(Self {
            path: path.to_path_buf(),
            kind,
        })
    }
}

pub struct SourceScanner {
    source_dir: PathBuf,
}

impl SourceScanner {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            source_dir: path.as_ref().to_path_buf(),
        }
    }

    /// Walk the whole source tree once.
    ///
    /// Parents come before their children. The source directory itself is
    /// not part of the result. Symbolic links are followed, so a linked
    /// folder is listed with its contents; a link loop is a walk error.
    pub fn scan(&self) -> Result<Vec<SourceEntry>> {
        let mut entries = Vec::new();

        for entry in WalkDir::new(&self.source_dir)
            .min_depth(1)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = entry?;
            let path = entry
                .path()
                .strip_prefix(&self.source_dir)
                .map_err(|_| BuildError::io(entry.path(), std::io::ErrorKind::InvalidInput.into()))?;

            let file_type = entry.file_type();
            let kind = if file_type.is_dir() {
                EntryKind::Directory
            } else if file_type.is_file() {
                EntryKind::File
            } else {
                EntryKind::Other
            };

            entries.push(SourceEntry {
                path: path.to_path_buf(),
                kind,
            });
        }

        Ok(entries)
    }
}

/// Whether a source path takes part in the build at all.
///
/// Any segment starting with `.` or `_`, or named `includes`, excludes the
/// path. Included fragments are still reachable through import directives.
pub fn should_handle(path: &Path) -> bool {
    path.components().all(|component| match component {
        Component::Normal(segment) => {
            let segment = segment.to_string_lossy();
            segment != "includes" && !segment.starts_with('.') && !segment.starts_with('_')
        }
        Component::CurDir | Component::ParentDir => false,
        Component::RootDir | Component::Prefix(_) => true,
    })
}

/// Split a relative path into its normal segments.
pub(crate) fn segments(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(segment) => Some(segment.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

/// Whether `path` is `prefix` itself or lies below it.
pub(crate) fn is_under(path: &Path, prefix: &Path) -> bool {
    !prefix.as_os_str().is_empty() && path.starts_with(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_handle_rejects_hidden_private_and_includes() {
        assert!(!should_handle(Path::new(".git")));
        assert!(!should_handle(Path::new("css/.cache/a.css")));
        assert!(!should_handle(Path::new("_drafts")));
        assert!(!should_handle(Path::new("html/blog/_partial.html")));
        assert!(!should_handle(Path::new("includes")));
        assert!(!should_handle(Path::new("js/includes/slider.js")));
        assert!(!should_handle(Path::new("a/b/c/includes/d/e.txt")));
    }

    #[test]
    fn test_should_handle_accepts_everything_else() {
        assert!(should_handle(Path::new("html/index.html")));
        assert!(should_handle(Path::new("css")));
        assert!(should_handle(Path::new("assets/my_image.png")));
        assert!(should_handle(Path::new("js/included.js")));
        assert!(should_handle(Path::new("fonts/font.v2.woff")));
    }

    #[test]
    fn test_scan_lists_parents_before_children() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("css/parts")).unwrap();
        std::fs::write(dir.path().join("css/parts/b.css"), "b").unwrap();
        std::fs::write(dir.path().join("css/a.css"), "a").unwrap();

        let entries = SourceScanner::new(dir.path()).scan().unwrap();
        let position = |p: &str| entries.iter().position(|e| e.path == Path::new(p)).unwrap();

        assert_eq!(entries.len(), 4);
        assert!(entries[position("css")].is_dir());
        assert!(entries[position("css/a.css")].is_file());
        assert!(position("css") < position("css/parts"));
        assert!(position("css/parts") < position("css/parts/b.css"));
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_walks_linked_folders() {
        let dir = tempfile::tempdir().unwrap();
        let shared = dir.path().join("shared");
        std::fs::create_dir_all(&shared).unwrap();
        std::fs::write(shared.join("logo.svg"), "<svg/>").unwrap();

        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::os::unix::fs::symlink(&shared, src.join("img")).unwrap();

        let entries = SourceScanner::new(&src).scan().unwrap();

        assert_eq!(
            entries,
            vec![SourceEntry::directory("img"), SourceEntry::file("img/logo.svg")]
        );
    }

    #[test]
    fn test_is_under() {
        assert!(is_under(Path::new("html/vars/a.json"), Path::new("html/vars")));
        assert!(is_under(Path::new("html/vars"), Path::new("html/vars")));
        assert!(!is_under(Path::new("html/variables"), Path::new("html/vars")));
        assert!(!is_under(Path::new("anything"), Path::new("")));
    }
}
