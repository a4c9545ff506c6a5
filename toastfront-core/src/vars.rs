//! Layered page variables.
//!
//! A page's variables are merged from, lowest precedence first:
//!
//! 1. the language-wide base: an optional seed file, then `common.json` and
//!    `lang-<code>.json` at the root of the variables tree,
//! 2. `common.json` in the page's own variables directory,
//! 3. `lang-<code>.json` in that same directory,
//! 4. the process environment, for stores that enable it.
//!
//! Merging is shallow: a key set by a higher layer replaces the whole value.
//! Missing files are skipped, malformed ones abort the build.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde_json::Value;
use tracing::{debug, error};

use crate::error::{BuildError, Result};

/// Variable name -> JSON value, as seen by templates.
pub type VariableTree = serde_json::Map<String, Value>;

pub const COMMON_VARS_FILE: &str = "common.json";

pub fn language_vars_file(language: &str) -> String {
    format!("lang-{language}.json")
}

/// Snapshot of environment variables used as the top variable layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment(BTreeMap<String, String>);

impl Environment {
    /// Capture the current process environment. Entries that are not valid
    /// UTF-8 are dropped.
    pub fn capture() -> Self {
        std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .collect()
    }

    /// Overlay every entry onto `tree` as a string value.
    pub fn merge_into(&self, tree: &mut VariableTree) {
        for (key, value) in &self.0 {
            tree.insert(key.clone(), Value::String(value.clone()));
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct VariableStore {
    source_dir: PathBuf,
    /// Root of the variables tree, relative to `source_dir`.
    vars_root: PathBuf,
    seed_file: Option<PathBuf>,
    language: String,
    environment: Option<Environment>,
    base: VariableTree,
}

impl VariableStore {
    pub fn new(
        source_dir: impl Into<PathBuf>,
        vars_root: impl Into<PathBuf>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            source_dir: source_dir.into(),
            vars_root: vars_root.into(),
            seed_file: None,
            language: language.into(),
            environment: None,
            base: VariableTree::new(),
        }
    }

    /// A file, relative to the source directory, merged below the base layer.
    pub fn with_seed_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.seed_file = Some(path.into());
        self
    }

    /// Use `environment` as the highest layer of [`Self::path_data`].
    pub fn set_environment(&mut self, environment: Environment) {
        self.environment = Some(environment);
    }

    /// (Re)load the language-wide base. Called once per build.
    pub fn load_base(&mut self) -> Result<()> {
        let mut base = VariableTree::new();

        if let Some(seed) = &self.seed_file {
            merge_file(&mut base, &self.source_dir.join(seed))?;
        }

        let root = self.source_dir.join(&self.vars_root);
        merge_file(&mut base, &root.join(COMMON_VARS_FILE))?;
        merge_file(&mut base, &root.join(language_vars_file(&self.language)))?;

        debug!(
            vars = %root.display(),
            language = %self.language,
            keys = base.len(),
            "loaded base vars"
        );
        self.base = base;
        Ok(())
    }

    pub fn base(&self) -> &VariableTree {
        &self.base
    }

    /// Variables for the directory `key` of the variables tree, without the
    /// environment layer.
    pub fn path_dir_data(&self, key: &Path) -> Result<VariableTree> {
        let mut out = self.base.clone();
        let dir = self.source_dir.join(&self.vars_root).join(key);

        merge_file(&mut out, &dir.join(COMMON_VARS_FILE))?;
        merge_file(&mut out, &dir.join(language_vars_file(&self.language)))?;

        Ok(out)
    }

    /// Variables for the page written at `output_path`.
    pub fn path_data(&self, output_path: &Path, extension: &str) -> Result<VariableTree> {
        let key = strip_extension(output_path, extension);
        let mut out = self.path_dir_data(&key)?;

        if let Some(environment) = &self.environment {
            environment.merge_into(&mut out);
        }

        Ok(out)
    }
}

/// Read a variables file. `Ok(None)` when it doesn't exist.
pub fn read_vars_file(path: &Path) -> Result<Option<VariableTree>> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(BuildError::io(path, e)),
    };

    serde_json::from_str(&data).map(Some).map_err(|source| {
        error!(file = %path.display(), err = %source, "can't decode vars file");
        BuildError::VarsDecode {
            path: path.to_path_buf(),
            source,
        }
    })
}

fn merge_file(into: &mut VariableTree, path: &Path) -> Result<()> {
    if let Some(layer) = read_vars_file(path)? {
        into.extend(layer);
    }
    Ok(())
}

fn strip_extension(path: &Path, extension: &str) -> PathBuf {
    let raw = path.to_string_lossy();
    match raw.strip_suffix(extension) {
        Some(stripped) if !extension.is_empty() => PathBuf::from(stripped),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(root: &Path, path: &str, body: &str) {
        let path = root.join(path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[test]
    fn test_layer_precedence_with_environment() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "vars/common.json", r#"{"x": 1, "base_only": true}"#);
        write(dir.path(), "vars/about/common.json", r#"{"x": 2}"#);
        write(dir.path(), "vars/about/lang-en.json", r#"{"x": 3}"#);

        let mut store = VariableStore::new(dir.path(), "vars", "en");
        store.load_base().unwrap();

        let without_env = store.path_data(Path::new("about.html"), ".html").unwrap();
        assert_eq!(without_env["x"], json!(3));
        assert_eq!(without_env["base_only"], json!(true));

        store.set_environment([("x", "4")].into_iter().collect());
        let with_env = store.path_data(Path::new("about.html"), ".html").unwrap();
        assert_eq!(with_env["x"], json!("4"));
    }

    #[test]
    fn test_missing_layers_are_skipped() {
        let dir = tempfile::tempdir().unwrap();

        let mut store = VariableStore::new(dir.path(), "vars", "fr").with_seed_file("css/config.json");
        store.load_base().unwrap();

        assert!(store.base().is_empty());
        assert!(store.path_dir_data(Path::new("nowhere/deep")).unwrap().is_empty());
    }

    #[test]
    fn test_seed_sits_below_common() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "css/config.json", r#"{"color": "red", "size": 1}"#);
        write(dir.path(), "vars/common.json", r#"{"color": "blue"}"#);

        let mut store = VariableStore::new(dir.path(), "vars", "en").with_seed_file("css/config.json");
        store.load_base().unwrap();

        assert_eq!(store.base()["color"], json!("blue"));
        assert_eq!(store.base()["size"], json!(1));
    }

    #[test]
    fn test_language_selects_layer() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "vars/lang-en.json", r#"{"hello": "Hello"}"#);
        write(dir.path(), "vars/lang-fr.json", r#"{"hello": "Bonjour"}"#);

        let mut fr = VariableStore::new(dir.path(), "vars", "fr");
        fr.load_base().unwrap();
        assert_eq!(fr.base()["hello"], json!("Bonjour"));
    }

    #[test]
    fn test_path_data_does_not_leak_between_pages() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "vars/a/common.json", r#"{"only_a": 1}"#);

        let mut store = VariableStore::new(dir.path(), "vars", "en");
        store.load_base().unwrap();

        assert!(store.path_data(Path::new("a.html"), ".html").unwrap().contains_key("only_a"));
        assert!(!store.path_data(Path::new("b.html"), ".html").unwrap().contains_key("only_a"));
        assert!(store.base().is_empty());
    }

    #[test]
    fn test_malformed_json_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "vars/common.json", "{ nope");

        let mut store = VariableStore::new(dir.path(), "vars", "en");
        assert!(matches!(store.load_base(), Err(BuildError::VarsDecode { .. })));
    }
}
