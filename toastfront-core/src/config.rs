use std::{fmt, path::Path};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Parsing(#[from] serde_json::Error),
}

/// Build configuration, immutable once a build starts.
///
/// Every field has a default so a partial `toastfront.json` (or none at all)
/// is a valid configuration.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Substitute template values without escaping them.
    pub unsafe_vars: bool,
    pub build_directory: String,
    pub source_directory: String,
    pub html_directory: HtmlDirectory,
    /// Page variables tree. Defaults to `<html_directory>/vars`.
    pub vars_directory: Option<String>,
    pub root_language: String,
    pub languages: Vec<String>,
    pub builder_config: BuilderConfig,
    pub serve_config: ServeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            unsafe_vars: false,
            build_directory: "build".into(),
            source_directory: "src".into(),
            html_directory: HtmlDirectory::Auto,
            vars_directory: None,
            root_language: "en".into(),
            languages: vec!["en".into()],
            builder_config: BuilderConfig::default(),
            serve_config: ServeConfig::default(),
        }
    }
}

impl Config {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&data)?;

        Ok(config)
    }

    /// Languages that get their own sub-builder, in configuration order.
    pub fn additional_languages(&self) -> impl Iterator<Item = &str> {
        self.languages
            .iter()
            .map(String::as_str)
            .filter(move |lang| *lang != self.root_language)
    }
}

/// Where HTML pages live inside the source tree.
///
/// In `toastfront.json` this is a string: absent or `"auto"` detects an
/// `html/` folder, `""` disables the HTML root, anything else names it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HtmlDirectory {
    #[default]
    Auto,
    Disabled,
    Named(String),
}

impl fmt::Display for HtmlDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HtmlDirectory::Auto => write!(f, "auto"),
            HtmlDirectory::Disabled => Ok(()),
            HtmlDirectory::Named(name) => write!(f, "{name}"),
        }
    }
}

impl From<&str> for HtmlDirectory {
    fn from(value: &str) -> Self {
        match value.trim_matches('/') {
            "auto" => HtmlDirectory::Auto,
            "" | "." => HtmlDirectory::Disabled,
            name => HtmlDirectory::Named(name.to_string()),
        }
    }
}

impl Serialize for HtmlDirectory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HtmlDirectory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map(HtmlDirectory::from).unwrap_or_default())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct BuilderConfig {
    pub css: TypeSettings,
    pub html: TypeSettings,
    pub javascript: TypeSettings,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            css: TypeSettings {
                folder: Some("css".into()),
                ext: ".css".into(),
                vars_file: Some("config.json".into()),
                vars_folder: None,
            },
            html: TypeSettings {
                folder: None,
                ext: ".html".into(),
                vars_file: None,
                vars_folder: Some("vars".into()),
            },
            javascript: TypeSettings {
                folder: Some("js".into()),
                ext: ".js".into(),
                vars_file: Some("vars.json".into()),
                vars_folder: None,
            },
        }
    }
}

/// Per-type overrides. Unset fields fall back to the type's defaults.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct TypeSettings {
    pub folder: Option<String>,
    pub ext: String,
    pub vars_file: Option<String>,
    pub vars_folder: Option<String>,
}

impl TypeSettings {
    /// The configured extension with a leading dot, or `default` when unset.
    pub fn extension_or(&self, default: &str) -> String {
        match self.ext.as_str() {
            "" => default.to_string(),
            ext if ext.starts_with('.') => ext.to_string(),
            ext => format!(".{ext}"),
        }
    }

    pub fn folder_or(&self, default: &str) -> String {
        self.folder.clone().unwrap_or_else(|| default.to_string())
    }

    pub fn vars_file_or(&self, default: &str) -> String {
        self.vars_file.clone().unwrap_or_else(|| default.to_string())
    }

    pub fn vars_folder_or(&self, default: &str) -> String {
        self.vars_folder.clone().unwrap_or_else(|| default.to_string())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ServeConfig {
    pub redirect_404: Option<String>,
    pub port: u16,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            redirect_404: None,
            port: 8100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"languages": ["en", "fr"], "builder_config": {"css": {"folder": "styles", "ext": "css"}}}"#,
        )
        .unwrap();

        assert_eq!(config.build_directory, "build");
        assert_eq!(config.root_language, "en");
        assert_eq!(config.builder_config.css.folder.as_deref(), Some("styles"));
        assert_eq!(config.builder_config.css.extension_or(".x"), ".css");
        assert_eq!(config.builder_config.css.vars_file_or("config.json"), "config.json");
        assert_eq!(config.builder_config.javascript.ext, ".js");
        assert_eq!(config.serve_config.port, 8100);
    }

    #[test]
    fn test_html_directory_three_way() {
        let parse = |doc: &str| serde_json::from_str::<Config>(doc).unwrap().html_directory;

        assert_eq!(parse("{}"), HtmlDirectory::Auto);
        assert_eq!(parse(r#"{"html_directory": "auto"}"#), HtmlDirectory::Auto);
        assert_eq!(parse(r#"{"html_directory": ""}"#), HtmlDirectory::Disabled);
        assert_eq!(
            parse(r#"{"html_directory": "pages"}"#),
            HtmlDirectory::Named("pages".into())
        );
    }

    #[test]
    fn test_additional_languages_skip_root() {
        let config = Config {
            root_language: "fr".into(),
            languages: vec!["en".into(), "fr".into(), "de".into()],
            ..Config::default()
        };

        let extra: Vec<_> = config.additional_languages().collect();
        assert_eq!(extra, vec!["en", "de"]);
    }

    #[test]
    fn test_read_reports_decode_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toastfront.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(Config::read(&path), Err(ConfigError::Parsing(_))));
    }
}
