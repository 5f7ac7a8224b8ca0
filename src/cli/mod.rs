mod clone;
mod list;
mod serve;

use crate::cli::clone::CloneCommand;
use crate::cli::list::ListCommand;
use crate::cli::serve::ServeCommand;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::fmt;

/// CLI related errors
#[derive(Debug)]
pub enum Error {
    Snapshotter(snapshotter::Error),
    Service(snapshot_service::Error),
    /// An error occurred when trying to create the root directory
    RootDirectory(std::io::Error),
    /// An error occurred when trying to listen for shutdown signals
    Signal(std::io::Error),
}

impl From<snapshotter::Error> for Error {
    fn from(error: snapshotter::Error) -> Self {
        Self::Snapshotter(error)
    }
}

impl From<snapshot_service::Error> for Error {
    fn from(error: snapshot_service::Error) -> Self {
        Self::Service(error)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Snapshotter(e) => write!(f, "{}", e),
            Error::Service(e) => write!(f, "{}", e),
            Error::RootDirectory(e) => write!(f, "create root directory: {}", e),
            Error::Signal(e) => write!(f, "install signal handler: {}", e),
        }
    }
}

impl std::error::Error for Error {}

/// A common result type for our CLI.
pub type Result<T> = std::result::Result<T, Error>;

/// `Handler` is a trait that should be implemented for each of our commands.
///
/// It defines the contract & the input / output of a command execution.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Executes the command handler.
    async fn handler(&self) -> Result<()>;
}

#[derive(Parser, Debug)]
#[clap(version, author)]
pub struct Cli {
    /// If set, nothing is logged.
    #[clap(long, short, global = true)]
    pub(crate) quiet: bool,
    #[clap(subcommand)]
    pub(crate) command: Command,
}

impl Cli {
    /// Get the command used by the user.
    pub fn command(self) -> Box<dyn Handler> {
        match self.command {
            Command::Serve(cmd) => Box::new(cmd),
            Command::Clone(cmd) => Box::new(cmd),
            Command::List(cmd) => Box::new(cmd),
        }
    }
}

/// The enumeration of our commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the clone-aware snapshotter on a Unix socket
    Serve(ServeCommand),
    /// Ask a running snapshotter to clone an active snapshot
    Clone(CloneCommand),
    /// List the snapshots of a running snapshotter
    List(ListCommand),
}
