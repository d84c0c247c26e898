use anyhow::Result;
use clap::{ArgAction, Parser};
use cod_upgrade::commands::upgrade::{self, UpgradeOptions};
use std::io;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "cod-upgrade")]
#[command(about = "Install a staged cod build and reattach every live shell session", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: <config dir>/cod/upgrade.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Staged daemon build to install
    #[arg(long)]
    staged: Option<PathBuf>,

    /// Where the daemon executable is installed
    #[arg(long)]
    install_path: Option<PathBuf>,

    /// Process name of the daemon
    #[arg(long)]
    daemon_name: Option<String>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    upgrade::execute(UpgradeOptions {
        config: cli.config,
        staged: cli.staged,
        install_path: cli.install_path,
        daemon_name: cli.daemon_name,
    })
}

fn init_tracing(verbose: u8) {
    let default_filter = match verbose {
        0 => "cod_upgrade=warn",
        1 => "cod_upgrade=info",
        _ => "cod_upgrade=debug",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}
