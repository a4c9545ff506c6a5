use std::sync::Arc;

use tracing::debug;

use super::{Layout, TypeBuilder};
use crate::{
    deps::DependencyGraph,
    error::{BuildError, Result},
    scanner::SourceEntry,
};

/// Mirrors source directories into the output tree.
pub struct FolderBuilder {
    layout: Arc<Layout>,
}

impl FolderBuilder {
    pub fn new(layout: Arc<Layout>) -> Self {
        Self { layout }
    }
}

impl TypeBuilder for FolderBuilder {
    fn name(&self) -> &'static str {
        "folder"
    }

    fn can_handle(&self, entry: &SourceEntry) -> bool {
        entry.is_dir()
    }

    fn process(&mut self, entry: &SourceEntry, _deps: &mut DependencyGraph) -> Result<()> {
        let Some(path) = self.layout.output_path(&entry.path) else {
            return Ok(());
        };

        let folder = self.layout.output(&path);
        std::fs::create_dir_all(&folder).map_err(|e| BuildError::io(&folder, e))?;

        debug!(builder = "folder", file = %folder.display(), "folder created");
        Ok(())
    }
}
