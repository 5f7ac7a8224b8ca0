use crate::protocol::{Call, Reply, Request, Response};
use crate::{Error, Result};
use snapshotter::{Info, Mount, LABEL_CLONE_SOURCE};
use std::collections::HashMap;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

/// `Client` talks to a snapshot service over its Unix socket.
///
/// Calls are sent one at a time on a single connection.
pub struct Client {
    namespace: String,
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
}

impl Client {
    pub async fn connect(socket_path: &Path, namespace: &str) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(Error::Connect)?;
        let (read, write) = stream.into_split();

        Ok(Self {
            namespace: namespace.to_string(),
            lines: BufReader::new(read).lines(),
            write,
        })
    }

    /// Send one call and wait for its reply.
    pub async fn call(&mut self, call: Call) -> Result<Reply> {
        let request = Request {
            namespace: self.namespace.clone(),
            call,
        };
        let mut frame = serde_json::to_vec(&request).map_err(|e| Error::Encode(e.to_string()))?;
        frame.push(b'\n');

        match self.send_raw(&frame).await? {
            Response::Ok(reply) => Ok(reply),
            Response::Error(status) => Err(Error::Remote(status)),
        }
    }

    /// Write an already encoded frame and read the response.
    pub async fn send_raw(&mut self, frame: &[u8]) -> Result<Response> {
        self.write.write_all(frame).await.map_err(Error::Io)?;

        let line = self
            .lines
            .next_line()
            .await
            .map_err(Error::Io)?
            .ok_or(Error::ConnectionClosed)?;
        serde_json::from_str(&line).map_err(|e| Error::Decode(e.to_string()))
    }

    pub async fn prepare(
        &mut self,
        key: &str,
        parent: &str,
        labels: HashMap<String, String>,
    ) -> Result<Vec<Mount>> {
        let reply = self
            .call(Call::Prepare {
                key: key.to_string(),
                parent: parent.to_string(),
                labels,
            })
            .await?;
        expect_mounts(reply)
    }

    /// Prepare `key` as a clone of the active snapshot `source`.
    pub async fn clone_snapshot(&mut self, source: &str, key: &str) -> Result<Vec<Mount>> {
        let labels = HashMap::from([(LABEL_CLONE_SOURCE.to_string(), source.to_string())]);
        self.prepare(key, "", labels).await
    }

    pub async fn commit(&mut self, name: &str, key: &str) -> Result<()> {
        match self
            .call(Call::Commit {
                name: name.to_string(),
                key: key.to_string(),
                labels: HashMap::new(),
            })
            .await?
        {
            Reply::Done => Ok(()),
            other => Err(Error::UnexpectedReply(format!("{:?}", other))),
        }
    }

    pub async fn stat(&mut self, key: &str) -> Result<Info> {
        match self.call(Call::Stat { key: key.to_string() }).await? {
            Reply::Info(info) => Ok(info),
            other => Err(Error::UnexpectedReply(format!("{:?}", other))),
        }
    }

    pub async fn list(&mut self) -> Result<Vec<Info>> {
        match self.call(Call::List).await? {
            Reply::Infos(infos) => Ok(infos),
            other => Err(Error::UnexpectedReply(format!("{:?}", other))),
        }
    }
}

fn expect_mounts(reply: Reply) -> Result<Vec<Mount>> {
    match reply {
        Reply::Mounts(mounts) => Ok(mounts),
        other => Err(Error::UnexpectedReply(format!("{:?}", other))),
    }
}
