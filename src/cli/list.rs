use crate::{Handler, Result, DEFAULT_SOCKET};
use async_trait::async_trait;
use clap::Args;
use snapshot_service::Client;
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct ListCommand {
    /// Unix socket path of the snapshotter
    #[clap(long, parse(from_os_str), default_value = DEFAULT_SOCKET)]
    socket: PathBuf,
    /// The namespace of the snapshots
    #[clap(long, short, default_value = "default")]
    namespace: String,
}

#[async_trait]
impl Handler for ListCommand {
    async fn handler(&self) -> Result<()> {
        let mut client = Client::connect(&self.socket, &self.namespace).await?;

        println!("KEY\tKIND\tPARENT");
        for info in client.list().await? {
            println!(
                "{}\t{:?}\t{}",
                info.name,
                info.kind,
                info.parent.unwrap_or_default()
            );
        }
        Ok(())
    }
}
