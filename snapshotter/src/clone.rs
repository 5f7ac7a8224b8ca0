//! Container cloning on top of any [`Snapshotter`].
//!
//! When `prepare` is called with the [`LABEL_CLONE_SOURCE`] label pointing to an existing
//! active snapshot, the new snapshot is created from the same parent as the source and its
//! writable layer is initialized with a copy of the source's writable layer. The new
//! container then starts with the exact filesystem state of the source container.

use crate::copy::copy_writable_layer;
use crate::mount::{writable_dir, Mount};
use crate::snapshots::{apply_opts, Info, Opt, Snapshotter, Usage};
use crate::{run_blocking, Context, Error, Result};
use async_trait::async_trait;

/// The snapshot label naming the snapshot whose writable layer should be cloned.
///
/// It is only read from `prepare` options and never stored on the new snapshot.
pub const LABEL_CLONE_SOURCE: &str = "containerd.io/snapshot/clone-source";

/// `CloneSnapshotter` wraps a store and adds container cloning to it.
///
/// Every operation is forwarded to the inner store unchanged, except `prepare` calls
/// carrying [`LABEL_CLONE_SOURCE`].
pub struct CloneSnapshotter<S> {
    inner: S,
}

impl<S: Snapshotter> CloneSnapshotter<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Get the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Prepare `key` from the parent of `source_key`, then copy the source writable layer.
    async fn clone_prepare(
        &self,
        ctx: &Context,
        key: &str,
        source_key: &str,
        opts: Vec<Opt>,
    ) -> Result<Vec<Mount>> {
        let source = self
            .inner
            .stat(ctx, source_key)
            .await
            .map_err(|e| e.context(format!("stat source snapshot {:?}", source_key)))?;

        // Captured before the destination exists so both belong to the same request.
        let source_mounts = self
            .inner
            .mounts(ctx, source_key)
            .await
            .map_err(|e| {
                e.context(format!("get mounts for source snapshot {:?}", source_key))
            })?;
        let source_dir = writable_dir(&source_mounts)
            .map_err(|e| e.context(format!("source snapshot {:?}", source_key)))?;

        let parent = source.parent.as_deref().unwrap_or("");
        let mounts = self
            .inner
            .prepare(ctx, key, parent, without_label(opts, LABEL_CLONE_SOURCE))
            .await
            .map_err(|e| e.context(format!("prepare snapshot {:?}", key)))?;

        log::debug!(
            "cloning writable layer of {} into {} (parent {:?})",
            source_key,
            key,
            parent
        );

        let replication = {
            let ctx = ctx.clone();
            let dst_mounts = mounts.clone();
            run_blocking(move || copy_writable_layer(&source_dir, &dst_mounts, &ctx)).await
        };

        if let Err(err) = replication {
            let err = err.context(format!(
                "copy writable layer from {:?} to {:?}",
                source_key, key
            ));
            log::warn!("clone of {} failed, removing {}: {}", source_key, key, err);

            // Cleanup must run even when the request itself was canceled.
            if let Err(cleanup) = self.inner.remove(&ctx.detached(), key).await {
                return Err(Error::Rollback {
                    cause: Box::new(err),
                    cleanup: Box::new(cleanup.context(format!("remove snapshot {:?}", key))),
                });
            }
            return Err(err);
        }

        log::info!("cloned snapshot {} into {}", source_key, key);
        Ok(mounts)
    }
}

/// Wrap `opts` into a single option applying all of them and then deleting `label`.
///
/// The label is removed whatever the original options did with it.
pub fn without_label(opts: Vec<Opt>, label: &str) -> Vec<Opt> {
    let label = label.to_string();
    let stripped: Opt = Box::new(move |info: &mut Info| -> Result<()> {
        apply_opts(info, &opts)?;
        info.labels.remove(&label);
        Ok(())
    });
    vec![stripped]
}

#[async_trait]
impl<S: Snapshotter> Snapshotter for CloneSnapshotter<S> {
    async fn stat(&self, ctx: &Context, key: &str) -> Result<Info> {
        self.inner.stat(ctx, key).await
    }

    async fn update(&self, ctx: &Context, info: Info, fieldpaths: &[String]) -> Result<Info> {
        self.inner.update(ctx, info, fieldpaths).await
    }

    async fn usage(&self, ctx: &Context, key: &str) -> Result<Usage> {
        self.inner.usage(ctx, key).await
    }

    async fn mounts(&self, ctx: &Context, key: &str) -> Result<Vec<Mount>> {
        self.inner.mounts(ctx, key).await
    }

    /// Create an active snapshot, cloning the snapshot named by [`LABEL_CLONE_SOURCE`]
    /// when the label is set. `parent` is ignored when cloning.
    async fn prepare(
        &self,
        ctx: &Context,
        key: &str,
        parent: &str,
        opts: Vec<Opt>,
    ) -> Result<Vec<Mount>> {
        let mut info = Info::default();
        apply_opts(&mut info, &opts)?;

        match info.labels.remove(LABEL_CLONE_SOURCE) {
            None => self.inner.prepare(ctx, key, parent, opts).await,
            Some(source_key) => {
                if !parent.is_empty() {
                    log::debug!(
                        "ignoring parent {:?} of {}, cloning {}",
                        parent,
                        key,
                        source_key
                    );
                }
                self.clone_prepare(ctx, key, &source_key, opts).await
            }
        }
    }

    async fn view(
        &self,
        ctx: &Context,
        key: &str,
        parent: &str,
        opts: Vec<Opt>,
    ) -> Result<Vec<Mount>> {
        self.inner.view(ctx, key, parent, opts).await
    }

    async fn commit(&self, ctx: &Context, name: &str, key: &str, opts: Vec<Opt>) -> Result<()> {
        self.inner.commit(ctx, name, key, opts).await
    }

    async fn remove(&self, ctx: &Context, key: &str) -> Result<()> {
        self.inner.remove(ctx, key).await
    }

    async fn walk(&self, ctx: &Context) -> Result<Vec<Info>> {
        self.inner.walk(ctx).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}
