//! Inline import expansion shared by the CSS, HTML and JS builders.
//!
//! Each directive is replaced by the fully expanded content of the file it
//! names. Expansion runs on an explicit frame stack rather than recursion and
//! is cut off past [`MAX_IMPORT_DEPTH`] nested levels. A directive that can't
//! be expanded becomes a single newline and the outer file keeps building.

use std::{
    ops::Range,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::Regex;
use tracing::{debug, error};

use crate::{
    deps::DependencyGraph,
    error::{BuildError, ImportError, Result},
    scanner::{SourceEntry, segments},
};

/// Deepest nesting level an import may be expanded at. The importing page is
/// level 0.
pub const MAX_IMPORT_DEPTH: usize = 5;

static CSS_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^\s*@import "local://(?P<path>.*)";\s*$"#).unwrap());
static HTML_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!--\s*#import\s+(?P<path>.*?)\s*-->").unwrap());
static JS_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^import "local://(?P<path>.*)";$"#).unwrap());

/// Which files a builder owns and how its import directives look.
#[derive(Debug, Clone)]
pub struct ImportSyntax {
    builder: &'static str,
    pattern: &'static Regex,
    folder: Option<String>,
    extension: String,
}

impl ImportSyntax {
    /// `@import "local://X";` on its own line, resolved inside `folder`.
    pub fn css(folder: impl Into<String>, extension: impl Into<String>) -> Self {
        Self::new("css", &CSS_IMPORT, Some(folder.into()), extension.into())
    }

    /// `<!--#import X-->`, resolved inside the HTML root when there is one.
    pub fn html(folder: Option<String>, extension: impl Into<String>) -> Self {
        Self::new("html", &HTML_IMPORT, folder, extension.into())
    }

    /// `import "local://X";` on its own line, resolved inside `folder`.
    pub fn js(folder: impl Into<String>, extension: impl Into<String>) -> Self {
        Self::new("js", &JS_IMPORT, Some(folder.into()), extension.into())
    }

    fn new(
        builder: &'static str,
        pattern: &'static Regex,
        folder: Option<String>,
        extension: String,
    ) -> Self {
        let folder = folder.filter(|f| !f.is_empty());
        Self {
            builder,
            pattern,
            folder,
            extension,
        }
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// True iff `path` lies under the type's folder (if any) and carries the
    /// type's extension.
    pub fn matches_path(&self, path: &Path) -> bool {
        if let Some(folder) = &self.folder {
            match segments(path).first() {
                Some(first) if first == folder => {}
                _ => return false,
            }
        }

        let Some(file_name) = path.file_name() else {
            return false;
        };
        !self.extension.is_empty() && file_name.to_string_lossy().ends_with(&self.extension)
    }

    pub fn claims(&self, entry: &SourceEntry) -> bool {
        entry.is_file() && self.matches_path(&entry.path)
    }

    /// Source-relative path named by a directive argument.
    fn target(&self, raw: &str) -> Option<PathBuf> {
        let raw = raw.trim().trim_start_matches('/');
        if raw.is_empty() {
            return None;
        }
        Some(match &self.folder {
            Some(folder) => Path::new(folder).join(raw),
            None => PathBuf::from(raw),
        })
    }

    fn directives(&self, text: &str) -> Vec<(Range<usize>, String)> {
        self.pattern
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let path = caps.name("path")?;
                Some((whole.range(), path.as_str().to_string()))
            })
            .collect()
    }
}

/// A directive that expanded to a newline instead of file content.
#[derive(Debug)]
pub struct SkippedImport {
    pub importer: PathBuf,
    pub directive: String,
    pub error: ImportError,
}

/// The fully expanded text of one file.
#[derive(Debug)]
pub struct Expansion {
    pub content: String,
    pub skipped: Vec<SkippedImport>,
}

struct Frame {
    path: PathBuf,
    depth: usize,
    text: String,
    directives: Vec<(Range<usize>, String)>,
    next: usize,
    cursor: usize,
    out: String,
}

impl Frame {
    fn new(path: PathBuf, depth: usize, text: String, syntax: &ImportSyntax) -> Self {
        let directives = syntax.directives(&text);
        let capacity = text.len();
        Self {
            path,
            depth,
            text,
            directives,
            next: 0,
            cursor: 0,
            out: String::with_capacity(capacity),
        }
    }
}

pub struct ImportResolver<'a> {
    source_dir: &'a Path,
    syntax: &'a ImportSyntax,
    deps: &'a mut DependencyGraph,
}

impl<'a> ImportResolver<'a> {
    pub fn new(
        source_dir: &'a Path,
        syntax: &'a ImportSyntax,
        deps: &'a mut DependencyGraph,
    ) -> Self {
        Self {
            source_dir,
            syntax,
            deps,
        }
    }

    /// Expand every import of `path` (relative to the source directory).
    ///
    /// Only failing to read `path` itself is an error; nested failures are
    /// logged and reported in [`Expansion::skipped`].
    pub fn resolve(&mut self, path: &Path) -> Result<Expansion> {
        let text = read_normalized(&self.source_dir.join(path))
            .map_err(|e| BuildError::io(self.source_dir.join(path), e))?;

        let mut skipped = Vec::new();
        let mut content = String::new();
        let mut stack = vec![Frame::new(path.to_path_buf(), 0, text, self.syntax)];

        while let Some(mut frame) = stack.pop() {
            if frame.next == frame.directives.len() {
                let mut expanded = frame.out;
                expanded.push_str(&frame.text[frame.cursor..]);

                match stack.last_mut() {
                    Some(parent) => {
                        if !expanded.ends_with('\n') {
                            expanded.push('\n');
                        }
                        parent.out.push_str(&expanded);
                    }
                    None => content = expanded,
                }
                continue;
            }

            let (range, directive) = frame.directives[frame.next].clone();
            frame.next += 1;
            frame.out.push_str(&frame.text[frame.cursor..range.start]);
            frame.cursor = range.end;

            let importer = frame.path.clone();
            let depth = frame.depth + 1;

            match self.open(&importer, &directive, depth) {
                Ok((target, text)) => {
                    debug!(builder = self.syntax.builder, sourcefile = %importer.display(), file = %target.display(), depth, "import");
                    stack.push(frame);
                    stack.push(Frame::new(target, depth, text, self.syntax));
                }
                Err(error) => {
                    error!(
                        builder = self.syntax.builder,
                        sourcefile = %importer.display(),
                        expectedfile = %directive,
                        err = %error,
                        "file error import"
                    );
                    frame.out.push('\n');
                    stack.push(frame);
                    skipped.push(SkippedImport {
                        importer,
                        directive,
                        error,
                    });
                }
            }
        }

        Ok(Expansion { content, skipped })
    }

    /// Check a directive target and read it for expansion at `depth`.
    fn open(
        &mut self,
        importer: &Path,
        directive: &str,
        depth: usize,
    ) -> std::result::Result<(PathBuf, String), ImportError> {
        let target = self
            .syntax
            .target(directive)
            .ok_or_else(|| ImportError::NotFound(PathBuf::from(directive)))?;

        let entry = match SourceEntry::stat(self.source_dir, &target) {
            Ok(entry) => entry,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ImportError::NotFound(target));
            }
            Err(source) => return Err(ImportError::Io { path: target, source }),
        };

        if !self.syntax.claims(&entry) {
            return Err(ImportError::TypeMismatch(target));
        }

        self.deps.record(&target, importer);

        if depth > MAX_IMPORT_DEPTH {
            return Err(ImportError::TooDeep {
                path: target,
                max: MAX_IMPORT_DEPTH,
            });
        }

        match read_normalized(&self.source_dir.join(&target)) {
            Ok(text) => Ok((target, text)),
            Err(source) => Err(ImportError::Io { path: target, source }),
        }
    }
}

/// Read a text file with CRLF line endings turned into LF.
pub fn read_normalized(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    };

    Ok(normalize_line_endings(text))
}

pub fn normalize_line_endings(text: String) -> String {
    if text.contains("\r\n") {
        text.replace("\r\n", "\n")
    } else {
        text
    }
}
