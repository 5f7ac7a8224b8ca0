mod cli;
mod helper;

use crate::cli::{Cli, Handler, Result};
use clap::Parser;
use log::LevelFilter;

/// The default Unix socket path that containerd connects to.
pub const DEFAULT_SOCKET: &str =
    "/run/containerd-clone-snapshotter/containerd-clone-snapshotter.sock";
/// The default root directory where snapshots are stored.
pub const DEFAULT_ROOT: &str = "/var/lib/containerd-clone-snapshotter";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        logger.filter_level(LevelFilter::Off);
    }
    logger.init();

    cli.command().handler().await?;
    Ok(())
}
