//! Exposes the command line application.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sluice_service::config::Config;
use sluice_service::metrics;

use crate::{logging, server, service};

/// Sluice commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Run the web server.
    Run(RunArgs),

    /// Remove all uploaded files.
    Cleanup,
}

/// Overrides for the configuration file.
#[derive(Debug, Default, Args)]
struct RunArgs {
    /// Log cache hits, deferred requests and batch sizes.
    #[arg(long)]
    log: bool,

    /// Send `last-modified` and answer `if-modified-since` with `304`.
    #[arg(long)]
    cache: bool,

    /// Port to listen on, keeping the configured host.
    #[arg(long, value_name = "PORT")]
    port: Option<u16>,

    /// Maximum number of requests joining one read.
    #[arg(long, value_name = "N")]
    max: Option<usize>,
}

impl RunArgs {
    fn apply(&self, config: &mut Config) {
        if self.log {
            config.requester.enable_log = true;
        }
        if self.cache {
            config.router.enable_cache = true;
        }
        if let Some(port) = self.port {
            config.set_port(port);
        }
        if let Some(max) = self.max {
            config.requester.max_fanout = max;
        }
    }
}

/// Command line interface parser.
#[derive(Debug, Parser)]
#[command(bin_name = "sluice", version)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::get(cli.config()).context("failed loading config")?;
    if let Command::Run(ref args) = cli.command {
        args.apply(&mut config);
    }

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: We are still single-threaded at this point, the runtime is only started later on.
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )?;
    }

    match cli.command {
        Command::Run(_) => server::run(config).context("failed to start the server")?,
        Command::Cleanup => service::cleanup(&config).context("failed to clean up uploads")?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_overrides() {
        let cli =
            Cli::try_parse_from(["sluice", "run", "--log", "--cache", "--port=8000", "--max", "4"])
                .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected the run command");
        };

        let mut config = Config {
            bind: "127.0.0.1:3080".into(),
            ..Default::default()
        };
        args.apply(&mut config);

        assert!(config.requester.enable_log);
        assert!(config.router.enable_cache);
        assert_eq!(config.bind, "127.0.0.1:8000");
        assert_eq!(config.requester.max_fanout, 4);
    }

    #[test]
    fn test_no_overrides() {
        let cli = Cli::try_parse_from(["sluice", "-c", "sluice.yml", "run"]).unwrap();
        assert_eq!(cli.config(), Some(Path::new("sluice.yml")));

        let mut config = Config::default();
        let before = config.requester.clone();
        let Command::Run(args) = cli.command else {
            panic!("expected the run command");
        };
        args.apply(&mut config);
        assert_eq!(config.requester, before);
        assert!(!config.router.enable_cache);
    }
}
