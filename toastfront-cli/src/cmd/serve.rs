use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use toastfront_core::Builder;
use toastfront_dev_server::{LiveServer, LiveServerConfig, watch_and_rebuild};
use tracing::error;

use super::build::add_build_args;
use crate::config::load_config;

pub fn make_subcommand() -> Command {
    add_build_args(Command::new("serve"))
        .visible_alias("s")
        .about("Build, then serve the output with live reload")
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Port to serve on [default: 8100]")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .help("Host to bind to")
                .default_value("127.0.0.1"),
        )
        .arg(
            Arg::new("no-build")
                .long("no-build")
                .help("Serve the output directory as-is, without building or watching")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("open")
                .long("open")
                .help("Open browser automatically")
                .action(ArgAction::SetTrue),
        )
}

pub async fn execute(args: &ArgMatches) -> Result<()> {
    let config = Arc::new(load_config(args)?);
    let build_dir = PathBuf::from(&config.build_directory);

    let server = LiveServer::new(LiveServerConfig {
        host: args
            .get_one::<String>("host")
            .cloned()
            .unwrap_or_else(|| LiveServerConfig::default().host),
        port: config.serve_config.port,
        root: build_dir.clone(),
        redirect_404: config.serve_config.redirect_404.clone(),
        open: args.get_flag("open"),
    });

    if !args.get_flag("no-build") {
        let mut builder = Builder::new(config.clone());
        builder.init().context("can't prepare the build")?;
        builder.build().context("initial build failed")?;

        let source = PathBuf::from(&config.source_directory);
        let broker = server.broker();
        tokio::spawn(async move {
            if let Err(e) = watch_and_rebuild(source, build_dir, builder, broker).await {
                error!(err = %e, "source watcher stopped");
            }
        });
    }

    server.run().await
}
