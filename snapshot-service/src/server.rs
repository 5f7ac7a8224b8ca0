use crate::protocol::{Call, Reply, Request, Response, Status};
use crate::{Error, Result};
use snapshotter::{with_labels, Context, Opt, Snapshotter};
use std::collections::HashMap;
use std::future::Future;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// `Server` exposes a snapshotter on a Unix socket.
pub struct Server<S> {
    socket_path: PathBuf,
    listener: UnixListener,
    snapshotter: Arc<S>,
}

impl<S: Snapshotter + 'static> Server<S> {
    /// Bind the socket, creating its directory and removing a stale socket from a previous run.
    pub fn new(socket_path: &Path, snapshotter: S) -> Result<Self> {
        if let Some(parent) = socket_path.parent() {
            if !parent.exists() {
                log::debug!("creating socket directory = {}", parent.display());
                std::fs::DirBuilder::new()
                    .recursive(true)
                    .mode(0o700)
                    .create(parent)
                    .map_err(Error::Bind)?;
            }
        }

        match std::fs::remove_file(socket_path) {
            Ok(()) => log::debug!("removed stale socket {}", socket_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Bind(e)),
        }

        let listener = UnixListener::bind(socket_path).map_err(Error::Bind)?;

        Ok(Self {
            socket_path: socket_path.to_path_buf(),
            listener,
            snapshotter: Arc::new(snapshotter),
        })
    }

    /// Serve connections until `shutdown` resolves.
    ///
    /// On shutdown the server stops accepting, cancels in-flight requests and waits for
    /// every connection to finish.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let cancel = CancellationToken::new();
        let mut connections = JoinSet::new();

        log::info!("listening on {}", self.socket_path.display());

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let snapshotter = self.snapshotter.clone();
                        let cancel = cancel.clone();
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(snapshotter, stream, cancel).await {
                                log::warn!("connection closed with error: {}", e);
                            }
                        });
                    }
                    Err(e) => log::warn!("failed to accept connection: {}", e),
                },
                // Reap finished connections so the set does not grow unbounded.
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        log::info!("shutting down, waiting for {} connection(s)", connections.len());
        cancel.cancel();
        drop(self.listener);
        while connections.join_next().await.is_some() {}

        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            log::debug!("failed to remove socket {}: {}", self.socket_path.display(), e);
        }
        self.snapshotter.close().await.map_err(Error::Close)
    }
}

async fn handle_connection<S: Snapshotter>(
    snapshotter: Arc<S>,
    stream: UnixStream,
    cancel: CancellationToken,
) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.map_err(Error::Io)?,
            _ = cancel.cancelled() => break,
        };
        let line = match line {
            Some(line) if line.trim().is_empty() => continue,
            Some(line) => line,
            None => break,
        };

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => dispatch(snapshotter.as_ref(), request, cancel.clone()).await,
            Err(e) => Response::Error(Status {
                code: crate::Code::InvalidArgument,
                message: format!("invalid request: {}", e),
            }),
        };

        let mut frame = serde_json::to_vec(&response).map_err(|e| Error::Encode(e.to_string()))?;
        frame.push(b'\n');
        write.write_all(&frame).await.map_err(Error::Io)?;
    }
    Ok(())
}

/// Build the context of a request: its namespace and the server-wide cancellation.
pub fn request_context(request: &Request, cancel: CancellationToken) -> Context {
    Context::with_cancellation(&request.namespace, cancel)
}

/// Run one request against the snapshotter.
pub async fn dispatch<S: Snapshotter>(
    snapshotter: &S,
    request: Request,
    cancel: CancellationToken,
) -> Response {
    let ctx = request_context(&request, cancel);
    let op = request.call.op();
    log::debug!("{} [namespace {}]", op, ctx.namespace());

    match call(snapshotter, &ctx, request.call).await {
        Ok(reply) => Response::Ok(reply),
        Err(e) => {
            log::warn!("{} [namespace {}] failed: {}", op, ctx.namespace(), e);
            Response::Error(Status::from(&e))
        }
    }
}

async fn call<S: Snapshotter>(
    sn: &S,
    ctx: &Context,
    call: Call,
) -> snapshotter::Result<Reply> {
    match call {
        Call::Prepare {
            key,
            parent,
            labels,
        } => sn
            .prepare(ctx, &key, &parent, label_opts(labels))
            .await
            .map(Reply::Mounts),
        Call::View {
            key,
            parent,
            labels,
        } => sn
            .view(ctx, &key, &parent, label_opts(labels))
            .await
            .map(Reply::Mounts),
        Call::Mounts { key } => sn.mounts(ctx, &key).await.map(Reply::Mounts),
        Call::Commit { name, key, labels } => sn
            .commit(ctx, &name, &key, label_opts(labels))
            .await
            .map(|_| Reply::Done),
        Call::Remove { key } => sn.remove(ctx, &key).await.map(|_| Reply::Done),
        Call::Stat { key } => sn.stat(ctx, &key).await.map(Reply::Info),
        Call::Update { info, fieldpaths } => {
            sn.update(ctx, info, &fieldpaths).await.map(Reply::Info)
        }
        Call::Usage { key } => sn.usage(ctx, &key).await.map(Reply::Usage),
        Call::List => sn.walk(ctx).await.map(Reply::Infos),
    }
}

fn label_opts(labels: HashMap<String, String>) -> Vec<Opt> {
    if labels.is_empty() {
        return vec![];
    }
    vec![with_labels(labels)]
}
