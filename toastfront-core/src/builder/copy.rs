use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::debug;

use super::{Layout, TypeBuilder};
use crate::{
    config::Config,
    deps::DependencyGraph,
    error::{BuildError, Result},
    scanner::SourceEntry,
};

/// Fallback builder: copies anything no other builder claimed.
pub struct CopyBuilder {
    layout: Arc<Layout>,
    /// Type variable files, consumed by their builders and never copied.
    vars_files: Vec<PathBuf>,
}

impl CopyBuilder {
    pub fn new(config: &Config, layout: Arc<Layout>) -> Self {
        let types = &config.builder_config;
        let vars_files = vec![
            Path::new(&types.css.folder_or("css")).join(types.css.vars_file_or("config.json")),
            Path::new(&types.javascript.folder_or("js")).join(types.javascript.vars_file_or("vars.json")),
        ];

        Self { layout, vars_files }
    }
}

impl TypeBuilder for CopyBuilder {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn can_handle(&self, entry: &SourceEntry) -> bool {
        !entry.is_dir()
            && !self.vars_files.iter().any(|file| file == &entry.path)
            && self.layout.output_path(&entry.path).is_some()
    }

    fn process(&mut self, entry: &SourceEntry, _deps: &mut DependencyGraph) -> Result<()> {
        let source = self.layout.source_dir.join(&entry.path);
        let Some(path) = self.layout.output_path(&entry.path) else {
            return Ok(());
        };
        let target = self.layout.output(&path);

        let meta = std::fs::metadata(&source).map_err(|e| BuildError::io(&source, e))?;
        if !meta.is_file() {
            return Err(BuildError::NotRegularFile(source));
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
        }
        std::fs::copy(&source, &target).map_err(|e| BuildError::io(&target, e))?;

        debug!(builder = "copy", file = %target.display(), "copied");
        Ok(())
    }
}
