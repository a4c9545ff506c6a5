use anyhow::{Context, Result};
use clap::ArgMatches;
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use toastfront_core::Config;

pub const DEFAULT_CONFIG_FILE: &str = "toastfront.json";
pub const ENV_PREFIX: &str = "TOASTFRONT";

/// Load the build configuration with cascading precedence:
/// 1. CLI arguments (highest priority)
/// 2. Environment variables (TOASTFRONT_*)
/// 3. Configuration file
/// 4. Defaults (lowest priority)
pub fn load_config(args: &ArgMatches) -> Result<Config> {
    let config_file = args
        .try_get_one::<String>("config")
        .ok()
        .flatten()
        .map_or(DEFAULT_CONFIG_FILE, String::as_str);

    let mut builder = ConfigBuilder::builder()
        .add_source(ConfigBuilder::try_from(&Config::default())?)
        .add_source(File::new(config_file, FileFormat::Json).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("languages"),
        );

    for (arg, key) in [
        ("src-dir", "source_directory"),
        ("build-dir", "build_directory"),
    ] {
        if let Some(value) = args.try_get_one::<String>(arg).ok().flatten() {
            builder = builder.set_override(key, value.as_str())?;
        }
    }
    // Only serve defines a port
    if let Some(port) = args.try_get_one::<u16>("port").ok().flatten() {
        builder = builder.set_override("serve_config.port", i64::from(*port))?;
    }

    let config: Config = builder
        .build()
        .and_then(|merged| merged.try_deserialize())
        .with_context(|| format!("can't load configuration from {config_file}"))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{Arg, Command};
    use toastfront_core::HtmlDirectory;

    fn command() -> Command {
        Command::new("test")
            .arg(Arg::new("src-dir").long("src-dir"))
            .arg(Arg::new("build-dir").long("build-dir"))
            .arg(Arg::new("config").short('c').long("config"))
            .arg(
                Arg::new("port")
                    .long("port")
                    .value_parser(clap::value_parser!(u16)),
            )
    }

    #[test]
    fn test_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("toastfront.json");
        let matches = command()
            .try_get_matches_from(["test", "-c", missing.to_str().unwrap()])
            .unwrap();

        let config = load_config(&matches).unwrap();
        assert_eq!(config.source_directory, "src");
        assert_eq!(config.build_directory, "build");
        assert_eq!(config.html_directory, HtmlDirectory::Auto);
        assert_eq!(config.serve_config.port, 8100);
    }

    #[test]
    fn test_file_then_cli_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("toastfront.json");
        std::fs::write(
            &file,
            r#"{
                "source_directory": "site",
                "build_directory": "public",
                "html_directory": "",
                "languages": ["en", "fr"],
                "unsafe_vars": true,
                "serve_config": {"port": 9000, "redirect_404": "404.html"}
            }"#,
        )
        .unwrap();

        let matches = command()
            .try_get_matches_from([
                "test",
                "-c",
                file.to_str().unwrap(),
                "--build-dir",
                "out",
                "--port",
                "9100",
            ])
            .unwrap();

        let config = load_config(&matches).unwrap();
        assert_eq!(config.source_directory, "site");
        assert_eq!(config.build_directory, "out");
        assert_eq!(config.html_directory, HtmlDirectory::Disabled);
        assert_eq!(config.languages, vec!["en", "fr"]);
        assert!(config.unsafe_vars);
        assert_eq!(config.serve_config.port, 9100);
        assert_eq!(config.serve_config.redirect_404.as_deref(), Some("404.html"));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("toastfront.json");
        std::fs::write(&file, "{ not json").unwrap();

        let matches = command()
            .try_get_matches_from(["test", "-c", file.to_str().unwrap()])
            .unwrap();

        assert!(load_config(&matches).is_err());
    }
}
