use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use toastfront_core::Builder;
use tracing::info;

use crate::config::{DEFAULT_CONFIG_FILE, load_config};

pub fn add_build_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("src-dir")
                .long("src-dir")
                .value_name("DIR")
                .help("Source directory [default: src]"),
        )
        .arg(
            Arg::new("build-dir")
                .long("build-dir")
                .value_name("DIR")
                .help("Output directory, wiped on every build [default: build]"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file, skipped when missing")
                .default_value(DEFAULT_CONFIG_FILE),
        )
}

pub fn make_subcommand() -> Command {
    add_build_args(Command::new("build"))
        .visible_alias("b")
        .about("Build the site into the output directory")
}

pub fn execute(args: &ArgMatches) -> Result<()> {
    let config = Arc::new(load_config(args)?);
    let build_dir = config.build_directory.clone();

    let mut builder = Builder::new(config);
    builder.init().context("can't prepare the build")?;
    builder.build().context("build failed")?;

    info!(output = %build_dir, "site built");
    Ok(())
}
