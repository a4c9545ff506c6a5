pub mod builder;
pub mod config;
pub mod deps;
pub mod error;
pub mod import;
pub mod scanner;
pub mod template;
pub mod vars;

// Re-export main types
pub use builder::{Builder, Layout, TypeBuilder};
pub use config::{Config, ConfigError, HtmlDirectory};
pub use deps::DependencyGraph;
pub use error::{BuildError, ImportError, Result};
pub use scanner::{SourceEntry, SourceScanner, should_handle};
pub use template::TemplateError;
pub use vars::{Environment, VariableStore, VariableTree};
