use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

/// Reverse import edges: imported file -> files that import it.
///
/// Recorded during every build; answers "who must rebuild if X changes".
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    importers: BTreeMap<PathBuf, BTreeSet<PathBuf>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, imported: &Path, importer: &Path) {
        self.importers
            .entry(imported.to_path_buf())
            .or_default()
            .insert(importer.to_path_buf());
    }

    /// Files that import `path` directly.
    pub fn dependents(&self, path: &Path) -> impl Iterator<Item = &Path> {
        self.importers
            .get(path)
            .into_iter()
            .flat_map(|set| set.iter().map(PathBuf::as_path))
    }

    /// Every file whose output depends on `path`, directly or through a chain
    /// of imports.
    pub fn affected(&self, path: &Path) -> BTreeSet<PathBuf> {
        let mut seen = BTreeSet::new();
        let mut pending = vec![path.to_path_buf()];

        while let Some(current) = pending.pop() {
            for importer in self.dependents(&current) {
                if seen.insert(importer.to_path_buf()) {
                    pending.push(importer.to_path_buf());
                }
            }
        }

        seen
    }

    pub fn len(&self) -> usize {
        self.importers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.importers.is_empty()
    }

    pub fn clear(&mut self) {
        self.importers.clear();
    }
}
