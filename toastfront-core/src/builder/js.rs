use std::{
    path::{Path, PathBuf},
    sync::{Arc, LazyLock},
};

use regex::{Captures, Regex};
use tracing::debug;

use super::{Layout, TypeBuilder, write_output};
use crate::{
    config::Config,
    deps::DependencyGraph,
    error::Result,
    import::{ImportResolver, ImportSyntax},
    scanner::SourceEntry,
    vars::{Environment, VariableStore, VariableTree, read_vars_file},
};

static PAGE_VARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"toastfront\.pagevars\(\s*(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)')\s*\)"#).unwrap()
});
static JS_VARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"toastfront\.jsvars\(\)").unwrap());

/// Scripts under the JS folder: `import "local://X";` expansion, then the
/// `toastfront.pagevars("page")` and `toastfront.jsvars()` data directives.
pub struct JsBuilder {
    layout: Arc<Layout>,
    syntax: ImportSyntax,
    vars_file: PathBuf,
    /// Page variables, as the HTML builder sees them minus the environment.
    pages: VariableStore,
    /// `toastfront.jsvars()` value for the current build, as JSON.
    js_vars: String,
}

impl JsBuilder {
    pub fn new(config: Arc<Config>, layout: Arc<Layout>, language: &str) -> Self {
        let settings = &config.builder_config.javascript;
        let folder = settings.folder_or("js");
        let vars_file = Path::new(&folder).join(settings.vars_file_or("vars.json"));

        let syntax = ImportSyntax::js(folder, settings.extension_or(".js"));
        let pages = VariableStore::new(&layout.source_dir, &layout.vars_dir, language);

        Self {
            layout,
            syntax,
            vars_file,
            pages,
            js_vars: "{}".into(),
        }
    }

    fn page_vars(&self, caps: &Captures<'_>) -> Result<String> {
        let page = caps
            .name("dq")
            .or_else(|| caps.name("sq"))
            .map_or("", |m| m.as_str())
            .trim_start_matches('/');

        let data = self.pages.path_dir_data(Path::new(page))?;
        Ok(serde_json::to_string(&data)?)
    }

    fn substitute(&self, text: &str) -> Result<String> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in PAGE_VARS.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&text[last..whole.start()]);
            out.push_str(&self.page_vars(&caps)?);
            last = whole.end();
        }
        out.push_str(&text[last..]);

        Ok(JS_VARS.replace_all(&out, regex::NoExpand(&self.js_vars)).into_owned())
    }
}

impl TypeBuilder for JsBuilder {
    fn name(&self) -> &'static str {
        "js"
    }

    fn init(&mut self, environment: &Environment) -> Result<()> {
        self.pages.load_base()?;

        let mut data: VariableTree =
            read_vars_file(&self.layout.source_dir.join(&self.vars_file))?.unwrap_or_default();
        environment.merge_into(&mut data);
        self.js_vars = serde_json::to_string(&data)?;

        Ok(())
    }

    fn can_handle(&self, entry: &SourceEntry) -> bool {
        self.syntax.claims(entry)
    }

    fn process(&mut self, entry: &SourceEntry, deps: &mut DependencyGraph) -> Result<()> {
        let expansion = ImportResolver::new(&self.layout.source_dir, &self.syntax, deps).resolve(&entry.path)?;
        let script = self.substitute(&expansion.content)?;

        let target = self.layout.output(&entry.path);
        write_output(&target, script)?;

        debug!(builder = "js", file = %target.display(), skipped = expansion.skipped.len(), "written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn write(root: &Path, path: &str, body: &str) {
        let path = root.join(path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    fn builder(dir: &Path) -> JsBuilder {
        let layout = Arc::new(Layout {
            source_dir: dir.join("src"),
            build_dir: dir.join("build"),
            html_dir: Some(PathBuf::from("html")),
            vars_dir: PathBuf::from("html/vars"),
            html_vars_folder: PathBuf::from("vars"),
        });
        JsBuilder::new(Arc::new(Config::default()), layout, "fr")
    }

    #[test]
    fn test_claims_scripts_in_folder() {
        let dir = tempfile::tempdir().unwrap();
        let builder = builder(dir.path());

        assert!(builder.can_handle(&SourceEntry::file("js/app.js")));
        assert!(!builder.can_handle(&SourceEntry::file("js/vars.json")));
        assert!(!builder.can_handle(&SourceEntry::file("lib/app.js")));
    }

    #[test]
    fn test_pagevars_and_jsvars() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        write(&src, "html/vars/common.json", r#"{"title": "Accueil"}"#);
        write(&src, "html/vars/about/lang-fr.json", r#"{"title": "A propos"}"#);
        write(&src, "js/vars.json", r#"{"api": "https://api.example.com"}"#);
        write(
            &src,
            "js/app.js",
            "const about = toastfront.pagevars(\"/about\");\nconst cfg = toastfront.jsvars();\n",
        );

        let mut js = builder(dir.path());
        let environment: Environment = [("STAGE", "dev")].into_iter().collect();
        js.init(&environment).unwrap();
        js.process(&SourceEntry::file("js/app.js"), &mut DependencyGraph::new())
            .unwrap();

        let out = std::fs::read_to_string(dir.path().join("build/js/app.js")).unwrap();
        let mut lines = out.lines();

        let about = lines.next().unwrap();
        let about: Value = serde_json::from_str(
            about
                .strip_prefix("const about = ")
                .and_then(|s| s.strip_suffix(';'))
                .unwrap(),
        )
        .unwrap();
        assert_eq!(about, json!({"title": "A propos"}));

        let cfg = lines.next().unwrap();
        let cfg: Value =
            serde_json::from_str(cfg.strip_prefix("const cfg = ").and_then(|s| s.strip_suffix(';')).unwrap()).unwrap();
        assert_eq!(cfg, json!({"api": "https://api.example.com", "STAGE": "dev"}));
    }

    #[test]
    fn test_imports_are_inlined() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        write(&src, "js/includes/slider.js", "function slide() {}");
        write(&src, "js/app.js", "import \"local://includes/slider.js\";\nslide();\n");

        let mut js = builder(dir.path());
        let mut deps = DependencyGraph::new();
        js.init(&Environment::default()).unwrap();
        js.process(&SourceEntry::file("js/app.js"), &mut deps).unwrap();

        let out = std::fs::read_to_string(dir.path().join("build/js/app.js")).unwrap();
        assert_eq!(out, "function slide() {}\n\nslide();\n");
        assert_eq!(deps.affected(Path::new("js/includes/slider.js")).len(), 1);
    }
}
