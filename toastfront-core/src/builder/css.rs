use std::{path::Path, sync::Arc};

use tracing::{debug, error};

use super::{Layout, TypeBuilder, template_error, write_output};
use crate::{
    config::Config,
    deps::DependencyGraph,
    error::Result,
    import::{ImportResolver, ImportSyntax},
    scanner::SourceEntry,
    template::{CSS_DELIMITERS, DirectiveTemplate, EscapeMode},
    vars::{Environment, VariableStore},
};

/// Stylesheets under the CSS folder: `@import "local://X";` expansion, then
/// `"{{ … }}"` template actions.
pub struct CssBuilder {
    layout: Arc<Layout>,
    syntax: ImportSyntax,
    store: VariableStore,
    mode: EscapeMode,
}

impl CssBuilder {
    pub fn new(config: Arc<Config>, layout: Arc<Layout>, language: &str) -> Self {
        let settings = &config.builder_config.css;
        let folder = settings.folder_or("css");
        let seed = Path::new(&folder).join(settings.vars_file_or("config.json"));

        let syntax = ImportSyntax::css(folder, settings.extension_or(".css"));
        let store = VariableStore::new(&layout.source_dir, &layout.vars_dir, language).with_seed_file(seed);

        Self {
            layout,
            syntax,
            store,
            mode: EscapeMode::from_unsafe_vars(config.unsafe_vars),
        }
    }
}

impl TypeBuilder for CssBuilder {
    fn name(&self) -> &'static str {
        "css"
    }

    fn init(&mut self, _environment: &Environment) -> Result<()> {
        self.store.load_base()
    }

    fn can_handle(&self, entry: &SourceEntry) -> bool {
        self.syntax.claims(entry)
    }

    fn process(&mut self, entry: &SourceEntry, deps: &mut DependencyGraph) -> Result<()> {
        let expansion = ImportResolver::new(&self.layout.source_dir, &self.syntax, deps).resolve(&entry.path)?;

        let vars = self.store.path_data(&entry.path, self.syntax.extension())?;
        let rendered = DirectiveTemplate::parse(&expansion.content, CSS_DELIMITERS, self.mode)
            .and_then(|template| template.render(&vars))
            .map_err(|e| {
                error!(builder = "css", file = %entry.path.display(), err = %e, "templater");
                template_error(&entry.path, e)
            })?;

        let target = self.layout.output(&entry.path);
        write_output(&target, rendered)?;

        debug!(builder = "css", file = %target.display(), skipped = expansion.skipped.len(), "written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write(root: &Path, path: &str, body: &str) {
        let path = root.join(path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    fn builder(dir: &Path, config: Config) -> CssBuilder {
        let layout = Arc::new(Layout {
            source_dir: dir.join("src"),
            build_dir: dir.join("build"),
            html_dir: None,
            vars_dir: PathBuf::from("vars"),
            html_vars_folder: PathBuf::from("vars"),
        });
        CssBuilder::new(Arc::new(config), layout, "en")
    }

    #[test]
    fn test_claims_css_files_in_folder() {
        let dir = tempfile::tempdir().unwrap();
        let builder = builder(dir.path(), Config::default());

        assert!(builder.can_handle(&SourceEntry::file("css/site.css")));
        assert!(builder.can_handle(&SourceEntry::file("css/parts/grid.css")));
        assert!(!builder.can_handle(&SourceEntry::file("vendor/site.css")));
        assert!(!builder.can_handle(&SourceEntry::file("css/config.json")));
        assert!(!builder.can_handle(&SourceEntry::directory("css")));
    }

    #[test]
    fn test_imports_and_config_vars() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        write(&src, "css/config.json", r##"{"primary": "#123456", "gap": "4px"}"##);
        write(&src, "vars/css/site/common.json", r#"{"gap": "8px"}"#);
        write(&src, "css/base.css", "body{margin:0}");
        write(
            &src,
            "css/site.css",
            "@import \"local://base.css\";\na{color:\"{{.primary}}\";padding:\"{{.gap}}\"}\n",
        );

        let mut builder = builder(dir.path(), Config::default());
        let mut deps = DependencyGraph::new();
        builder.init(&Environment::default()).unwrap();
        builder.process(&SourceEntry::file("css/site.css"), &mut deps).unwrap();

        let out = std::fs::read_to_string(dir.path().join("build/css/site.css")).unwrap();
        assert_eq!(out, "body{margin:0}\n\na{color:#123456;padding:8px}\n");

        let importers: Vec<_> = deps.dependents(Path::new("css/base.css")).collect();
        assert_eq!(importers, vec![Path::new("css/site.css")]);
    }

    #[test]
    fn test_template_error_aborts() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("src"), "css/a.css", "a{color:\"{{.missing}}\"}");

        let mut builder = builder(dir.path(), Config::default());
        builder.init(&Environment::default()).unwrap();
        let err = builder
            .process(&SourceEntry::file("css/a.css"), &mut DependencyGraph::new())
            .unwrap_err();

        assert!(matches!(err, crate::error::BuildError::Template { .. }));
    }
}
