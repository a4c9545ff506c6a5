use std::sync::Arc;

use tracing::{debug, error};

use super::{Layout, TypeBuilder, template_error, write_output};
use crate::{
    config::Config,
    deps::DependencyGraph,
    error::Result,
    import::{ImportResolver, ImportSyntax},
    scanner::SourceEntry,
    template::{DirectiveTemplate, EscapeMode, HTML_DELIMITERS},
    vars::{Environment, VariableStore},
};

/// Pages: `<!--#import X-->` expansion, then `<!--# … -->` template actions
/// fed with the page's variables (environment included).
pub struct HtmlBuilder {
    layout: Arc<Layout>,
    syntax: ImportSyntax,
    store: VariableStore,
    mode: EscapeMode,
}

impl HtmlBuilder {
    pub fn new(config: Arc<Config>, layout: Arc<Layout>, language: &str) -> Self {
        let folder = layout
            .html_dir
            .as_ref()
            .map(|dir| dir.to_string_lossy().into_owned());
        let syntax = ImportSyntax::html(folder, config.builder_config.html.extension_or(".html"));
        let store = VariableStore::new(&layout.source_dir, &layout.vars_dir, language);

        Self {
            layout,
            syntax,
            store,
            mode: EscapeMode::from_unsafe_vars(config.unsafe_vars),
        }
    }
}

impl TypeBuilder for HtmlBuilder {
    fn name(&self) -> &'static str {
        "html"
    }

    fn init(&mut self, environment: &Environment) -> Result<()> {
        self.store.set_environment(environment.clone());
        self.store.load_base()
    }

    fn can_handle(&self, entry: &SourceEntry) -> bool {
        self.syntax.claims(entry) && self.layout.output_path(&entry.path).is_some()
    }

    fn process(&mut self, entry: &SourceEntry, deps: &mut DependencyGraph) -> Result<()> {
        let Some(path) = self.layout.output_path(&entry.path) else {
            return Ok(());
        };

        let expansion = ImportResolver::new(&self.layout.source_dir, &self.syntax, deps).resolve(&entry.path)?;

        let vars = self.store.path_data(&path, self.syntax.extension())?;
        let rendered = DirectiveTemplate::parse(&expansion.content, HTML_DELIMITERS, self.mode)
            .and_then(|template| template.render(&vars))
            .map_err(|e| {
                error!(builder = "html", file = %entry.path.display(), err = %e, "templater");
                template_error(&entry.path, e)
            })?;

        let target = self.layout.output(&path);
        write_output(&target, rendered)?;

        debug!(builder = "html", file = %target.display(), skipped = expansion.skipped.len(), "written");
        Ok(())
    }
}
