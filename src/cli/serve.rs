use crate::helper::{create_root_dir, serve_clone_snapshotter};
use crate::{Handler, Result, DEFAULT_ROOT, DEFAULT_SOCKET};
use async_trait::async_trait;
use clap::{ArgEnum, Args};
use snapshotter::snapshots::native::NativeSnapshotter;
use snapshotter::snapshots::overlay::OverlayFS;
use std::path::PathBuf;

/// The store wrapped by the clone-aware snapshotter.
#[derive(ArgEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    /// Overlay layout, snapshots are mounted by the caller with OverlayFS
    Overlay,
    /// Plain directories, every snapshot is a full copy of its parent
    Native,
}

/// Arguments for our `ServeCommand`.
///
/// Example :
///
/// `containerd-clone-snapshotter serve --root /var/lib/clone --backend overlay`
#[derive(Debug, Args)]
pub struct ServeCommand {
    /// Unix socket path that containerd connects to
    #[clap(long, parse(from_os_str), default_value = DEFAULT_SOCKET)]
    socket: PathBuf,
    /// Root directory used to store snapshot data
    #[clap(long, parse(from_os_str), default_value = DEFAULT_ROOT)]
    root: PathBuf,
    /// The underlying snapshot store
    #[clap(long, arg_enum, default_value = "overlay")]
    backend: Backend,
}

#[async_trait]
impl Handler for ServeCommand {
    async fn handler(&self) -> Result<()> {
        create_root_dir(&self.root)?;

        log::info!(
            "starting {:?} snapshotter (socket: {}, root: {})",
            self.backend,
            self.socket.display(),
            self.root.display()
        );

        match self.backend {
            Backend::Overlay => {
                serve_clone_snapshotter(&self.socket, OverlayFS::new(&self.root)?).await
            }
            Backend::Native => {
                serve_clone_snapshotter(&self.socket, NativeSnapshotter::new(&self.root)?).await
            }
        }
    }
}
