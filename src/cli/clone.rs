use crate::{Handler, Result, DEFAULT_SOCKET};
use async_trait::async_trait;
use clap::Args;
use snapshot_service::Client;
use std::path::PathBuf;

/// Arguments for our `CloneCommand`.
///
/// Example :
///
/// `containerd-clone-snapshotter clone my-container my-container-copy`
///
/// The new snapshot starts with the filesystem state of the source, and its mounts are printed.
#[derive(Debug, Args)]
pub struct CloneCommand {
    /// The active snapshot to clone.
    source: String,
    /// The key of the new snapshot.
    key: String,
    /// Unix socket path of the snapshotter
    #[clap(long, parse(from_os_str), default_value = DEFAULT_SOCKET)]
    socket: PathBuf,
    /// The namespace of the snapshots
    #[clap(long, short, default_value = "default")]
    namespace: String,
}

#[async_trait]
impl Handler for CloneCommand {
    async fn handler(&self) -> Result<()> {
        let mut client = Client::connect(&self.socket, &self.namespace).await?;
        let mounts = client.clone_snapshot(&self.source, &self.key).await?;

        for mount in mounts {
            println!("{} {} {}", mount.typ, mount.source, mount.options.join(","));
        }
        Ok(())
    }
}
