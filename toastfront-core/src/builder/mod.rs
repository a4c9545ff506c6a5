//! Build orchestration.
//!
//! A [`Builder`] walks the source tree once per build and hands every entry
//! to the first [`TypeBuilder`] that claims it, in a fixed order: folder,
//! CSS, HTML, JS, copy. Every additional language gets its own [`Pipeline`]
//! writing to `<build>/<language>`, fed from the same walk.

mod copy;
mod css;
mod folder;
mod html;
mod js;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

pub use copy::CopyBuilder;
pub use css::CssBuilder;
pub use folder::FolderBuilder;
pub use html::HtmlBuilder;
pub use js::JsBuilder;

use crate::{
    config::{Config, HtmlDirectory},
    deps::DependencyGraph,
    error::{BuildError, Result},
    scanner::{SourceEntry, SourceScanner, is_under, should_handle},
    template::TemplateError,
    vars::Environment,
};

const REMOVE_ATTEMPTS: u32 = 3;
const REMOVE_BACKOFF: Duration = Duration::from_millis(100);

/// One file category: detection, transformation and output path rewriting.
pub trait TypeBuilder: Send {
    fn name(&self) -> &'static str;

    /// Called at the start of every build, before any entry is processed.
    fn init(&mut self, _environment: &Environment) -> Result<()> {
        Ok(())
    }

    fn can_handle(&self, entry: &SourceEntry) -> bool;

    fn process(&mut self, entry: &SourceEntry, deps: &mut DependencyGraph) -> Result<()>;
}

/// Resolved directories of one output language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub source_dir: PathBuf,
    pub build_dir: PathBuf,
    /// HTML root inside the source tree, stripped from output paths.
    pub html_dir: Option<PathBuf>,
    /// Page variables tree inside the source tree. Empty means the source
    /// root itself.
    pub vars_dir: PathBuf,
    /// Name of the variables folder below the HTML root.
    pub html_vars_folder: PathBuf,
}

impl Layout {
    pub fn resolve(config: &Config) -> Result<Self> {
        let source_dir = PathBuf::from(&config.source_directory);
        if !source_dir.is_dir() {
            return Err(BuildError::MissingSourceDir(source_dir));
        }

        let html_dir = match &config.html_directory {
            HtmlDirectory::Auto => Some(PathBuf::from("html")).filter(|dir| source_dir.join(dir).is_dir()),
            HtmlDirectory::Disabled => None,
            HtmlDirectory::Named(name) => Some(PathBuf::from(name)),
        };

        let html_vars_folder = PathBuf::from(config.builder_config.html.vars_folder_or("vars"));

        let vars_dir = match config.vars_directory.as_deref().map(|dir| dir.trim_matches('/')) {
            Some(".") | Some("") => PathBuf::new(),
            Some(dir) => PathBuf::from(dir),
            None => match &html_dir {
                Some(html) => html.join(&html_vars_folder),
                None => PathBuf::from("vars"),
            },
        };

        Ok(Self {
            source_dir,
            build_dir: PathBuf::from(&config.build_directory),
            html_dir,
            vars_dir,
            html_vars_folder,
        })
    }

    /// Same source layout, writing into `build_dir`.
    pub fn with_build_dir(&self, build_dir: PathBuf) -> Self {
        Self {
            build_dir,
            ..self.clone()
        }
    }

    /// Output path of a source entry, `None` when it never reaches the
    /// output tree (the HTML root itself, anything under a variables folder).
    pub fn output_path(&self, path: &Path) -> Option<PathBuf> {
        if is_under(path, &self.vars_dir) {
            return None;
        }

        let mut out = path;
        if let Some(html) = &self.html_dir {
            if path == html {
                return None;
            }
            if let Ok(stripped) = path.strip_prefix(html) {
                out = stripped;
            }
        }

        if is_under(out, &self.html_vars_folder) {
            return None;
        }

        Some(out.to_path_buf())
    }

    /// `path` inside the build directory.
    pub fn output(&self, path: &Path) -> PathBuf {
        self.build_dir.join(path)
    }
}

/// Type builders of one output language, in dispatch order.
pub struct Pipeline {
    language: String,
    layout: Arc<Layout>,
    builders: Vec<Box<dyn TypeBuilder>>,
}

impl Pipeline {
    pub fn new(config: &Arc<Config>, layout: Layout, language: &str) -> Self {
        let layout = Arc::new(layout);
        let builders: Vec<Box<dyn TypeBuilder>> = vec![
            Box::new(FolderBuilder::new(layout.clone())),
            Box::new(CssBuilder::new(config.clone(), layout.clone(), language)),
            Box::new(HtmlBuilder::new(config.clone(), layout.clone(), language)),
            Box::new(JsBuilder::new(config.clone(), layout.clone(), language)),
            Box::new(CopyBuilder::new(config, layout.clone())),
        ];

        Self {
            language: language.to_string(),
            layout,
            builders,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    fn init(&mut self, environment: &Environment) -> Result<()> {
        std::fs::create_dir_all(&self.layout.build_dir).map_err(|e| BuildError::io(&self.layout.build_dir, e))?;
        for builder in &mut self.builders {
            builder.init(environment)?;
        }
        Ok(())
    }

    /// Run the first builder that claims `entry`. Returns its name.
    fn dispatch(&mut self, entry: &SourceEntry, deps: &mut DependencyGraph) -> Result<Option<&'static str>> {
        let Some(builder) = self.builders.iter_mut().find(|b| b.can_handle(entry)) else {
            return Ok(None);
        };

        let name = builder.name();
        debug!(builder = name, language = %self.language, file = %entry.path.display(), "processing");
        builder.process(entry, deps)?;
        Ok(Some(name))
    }
}

pub struct Builder {
    config: Arc<Config>,
    environment: Option<Environment>,
    root: Option<Pipeline>,
    languages: Vec<Pipeline>,
    deps: DependencyGraph,
}

impl Builder {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            environment: None,
            root: None,
            languages: Vec::new(),
            deps: DependencyGraph::new(),
        }
    }

    /// Use a fixed environment snapshot instead of capturing the process
    /// environment at the start of each build.
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Resolve directories and set up one pipeline per language.
    /// Calling it again is a no-op.
    pub fn init(&mut self) -> Result<()> {
        if self.root.is_some() {
            return Ok(());
        }

        let layout = Layout::resolve(&self.config)?;
        debug!(
            src = %layout.source_dir.display(),
            build = %layout.build_dir.display(),
            html = ?layout.html_dir,
            vars = %layout.vars_dir.display(),
            "builder init"
        );

        self.languages = self
            .config
            .additional_languages()
            .map(|language| {
                let sub = layout.with_build_dir(layout.build_dir.join(language));
                Pipeline::new(&self.config, sub, language)
            })
            .collect();
        self.root = Some(Pipeline::new(&self.config, layout, &self.config.root_language));

        Ok(())
    }

    pub fn layout(&self) -> Option<&Layout> {
        self.root.as_ref().map(Pipeline::layout)
    }

    /// Import edges recorded by the last build.
    pub fn dependencies(&self) -> &DependencyGraph {
        &self.deps
    }

    /// Rebuild the whole output tree.
    pub fn build(&mut self) -> Result<()> {
        self.init()?;
        let started = Instant::now();

        let environment = self.environment.clone().unwrap_or_else(Environment::capture);
        let Self {
            root, languages, deps, ..
        } = self;
        let Some(root) = root.as_mut() else {
            return Ok(());
        };

        remove_output_dir(&root.layout.build_dir);
        deps.clear();

        root.init(&environment)?;
        for pipeline in languages.iter_mut() {
            pipeline.init(&environment)?;
        }

        let entries = SourceScanner::new(&root.layout.source_dir).scan()?;
        let mut processed = 0;

        for entry in entries.iter().filter(|entry| should_handle(&entry.path)) {
            if root.dispatch(entry, deps)?.is_some() {
                processed += 1;
            }
            for pipeline in languages.iter_mut() {
                pipeline.dispatch(entry, deps)?;
            }
        }

        info!(
            entries = processed,
            languages = languages.len() + 1,
            elapsed = ?started.elapsed(),
            "build complete"
        );
        Ok(())
    }

    /// Process a single source path without touching the rest of the
    /// output tree.
    pub fn build_single(&mut self, path: &Path) -> Result<Option<&'static str>> {
        self.init()?;
        let environment = self.environment.clone().unwrap_or_else(Environment::capture);
        let Self {
            root, languages, deps, ..
        } = self;
        let Some(root) = root.as_mut() else {
            return Ok(None);
        };

        if !should_handle(path) {
            return Ok(None);
        }

        let entry = SourceEntry::stat(&root.layout.source_dir, path)
            .map_err(|e| BuildError::io(root.layout.source_dir.join(path), e))?;

        root.init(&environment)?;
        let handled = root.dispatch(&entry, deps)?;
        for pipeline in languages.iter_mut() {
            pipeline.init(&environment)?;
            pipeline.dispatch(&entry, deps)?;
        }

        Ok(handled)
    }
}

/// Remove the previous output tree, retrying briefly on failure.
/// Never fatal: the following `create_dir_all` may still succeed.
fn remove_output_dir(dir: &Path) {
    for attempt in 1..=REMOVE_ATTEMPTS {
        match std::fs::remove_dir_all(dir) {
            Ok(()) => return,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) if attempt < REMOVE_ATTEMPTS => {
                warn!(dir = %dir.display(), attempt, err = %e, "can't remove build folder, retrying");
                thread::sleep(REMOVE_BACKOFF * attempt);
            }
            Err(e) => {
                warn!(dir = %dir.display(), err = %e, "can't remove build folder, building over it");
            }
        }
    }
}

/// Create the parent directory of `path` and write `contents` to it.
pub(crate) fn write_output(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
    }
    std::fs::write(path, contents).map_err(|e| BuildError::io(path, e))
}

pub(crate) fn template_error(path: &Path, source: TemplateError) -> BuildError {
    BuildError::Template {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(html: Option<&str>, vars: &str) -> Layout {
        Layout {
            source_dir: "src".into(),
            build_dir: "build".into(),
            html_dir: html.map(PathBuf::from),
            vars_dir: vars.into(),
            html_vars_folder: "vars".into(),
        }
    }

    #[test]
    fn test_output_path_strips_html_root() {
        let layout = layout(Some("html"), "html/vars");

        assert_eq!(layout.output_path(Path::new("html")), None);
        assert_eq!(
            layout.output_path(Path::new("html/about/index.html")),
            Some(PathBuf::from("about/index.html"))
        );
        assert_eq!(layout.output_path(Path::new("css/a.css")), Some(PathBuf::from("css/a.css")));
    }

    #[test]
    fn test_output_path_elides_vars_folders() {
        let nested = layout(Some("html"), "html/vars");

        assert_eq!(nested.output_path(Path::new("html/vars")), None);
        assert_eq!(nested.output_path(Path::new("html/vars/about/common.json")), None);
        assert_eq!(
            nested.output_path(Path::new("html/variables.txt")),
            Some(PathBuf::from("variables.txt"))
        );

        let flat = layout(None, "pagevars");
        assert_eq!(flat.output_path(Path::new("pagevars/lang-fr.json")), None);
        assert_eq!(flat.output_path(Path::new("vars/x.json")), None);
        assert_eq!(flat.output_path(Path::new("index.html")), Some(PathBuf::from("index.html")));
    }

    #[test]
    fn test_resolve_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("html")).unwrap();

        let config = Config {
            source_directory: src.to_string_lossy().into_owned(),
            ..Config::default()
        };
        let resolved = Layout::resolve(&config).unwrap();
        assert_eq!(resolved.html_dir, Some(PathBuf::from("html")));
        assert_eq!(resolved.vars_dir, PathBuf::from("html/vars"));

        let disabled = Config {
            html_directory: HtmlDirectory::Disabled,
            vars_directory: Some(".".into()),
            ..config
        };
        let resolved = Layout::resolve(&disabled).unwrap();
        assert_eq!(resolved.html_dir, None);
        assert_eq!(resolved.vars_dir, PathBuf::new());
    }

    #[test]
    fn test_missing_source_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            source_directory: dir.path().join("nope").to_string_lossy().into_owned(),
            ..Config::default()
        };

        let mut builder = Builder::new(Arc::new(config));
        assert!(matches!(builder.init(), Err(BuildError::MissingSourceDir(_))));
    }

    #[test]
    fn test_remove_output_dir_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        remove_output_dir(&dir.path().join("never-created"));

        let existing = dir.path().join("build/sub");
        std::fs::create_dir_all(&existing).unwrap();
        std::fs::write(existing.join("a.txt"), "a").unwrap();
        remove_output_dir(&dir.path().join("build"));
        assert!(!dir.path().join("build").exists());
    }
}
