use crate::cli::{Error, Result};
use snapshot_service::Server;
use snapshotter::{CloneSnapshotter, Snapshotter};
use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;
use tokio::signal::unix::{signal, SignalKind};

/// Create the root storage directory, only accessible by its owner.
pub fn create_root_dir(root: &Path) -> Result<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(root)
        .map_err(Error::RootDirectory)
}

/// Wrap `store` with the clone-aware snapshotter and serve it until SIGINT or SIGTERM.
pub async fn serve_clone_snapshotter<S: Snapshotter + 'static>(
    socket: &Path,
    store: S,
) -> Result<()> {
    let mut interrupt = signal(SignalKind::interrupt()).map_err(Error::Signal)?;
    let mut terminate = signal(SignalKind::terminate()).map_err(Error::Signal)?;
    let shutdown = async move {
        let name = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        };
        log::info!("received signal {}, shutting down", name);
    };

    let server = Server::new(socket, CloneSnapshotter::new(store))?;
    server.serve(shutdown).await?;

    log::info!("snapshotter stopped");
    Ok(())
}
