use crate::copy::copy_dir;
use crate::mount::Mount;
use crate::snapshots::metadata::{MetaStore, Snapshot};
use crate::snapshots::{disk_usage, Info, Kind, Opt, Snapshotter, Usage};
use crate::{run_blocking, Context, Error, Result};
use async_trait::async_trait;
use std::fs::{create_dir, create_dir_all, remove_dir_all};
use std::path::{Path, PathBuf};

const SNAPSHOTS_DIR: &str = "snapshots";

/// `NativeSnapshotter` stores every snapshot as a plain directory.
///
/// A new snapshot starts as a full copy of its parent directory and is exposed through a
/// single bind mount, so no special filesystem support is required.
pub struct NativeSnapshotter {
    root: PathBuf,
    meta: MetaStore,
}

impl NativeSnapshotter {
    pub fn new(root: &Path) -> Result<Self> {
        let snapshots_dir = root.join(SNAPSHOTS_DIR);
        if !snapshots_dir.exists() {
            log::debug!(
                "creating native snapshots directory = {}",
                snapshots_dir.display()
            );
            create_dir_all(&snapshots_dir)
                .map_err(|e| Error::SnapshotDirectory(snapshots_dir.clone(), e))?;
        }

        Ok(Self {
            meta: MetaStore::open(root)?,
            root: root.to_path_buf(),
        })
    }

    fn snapshot_dir(root: &Path, id: u64) -> PathBuf {
        root.join(SNAPSHOTS_DIR).join(id.to_string())
    }

    fn mounts(&self, snapshot: &Snapshot) -> Vec<Mount> {
        let dir = Self::snapshot_dir(&self.root, snapshot.id);
        vec![Mount::bind(
            &dir.to_string_lossy(),
            snapshot.kind != Kind::Active,
        )]
    }

    async fn create_snapshot(
        &self,
        ctx: &Context,
        kind: Kind,
        key: &str,
        parent: &str,
        opts: Vec<Opt>,
    ) -> Result<Vec<Mount>> {
        let root = self.root.clone();
        let ctx = ctx.clone();
        let snapshot = self
            .meta
            .create(kind, key, parent, &opts, move |snapshot| {
                let dir = Self::snapshot_dir(&root, snapshot.id);
                create_dir(&dir).map_err(|e| Error::SnapshotDirectory(dir.clone(), e))?;

                let populated = match snapshot.parent_ids.first() {
                    Some(parent_id) => {
                        copy_dir(&Self::snapshot_dir(&root, *parent_id), &dir, &ctx)
                    }
                    None => Ok(()),
                };
                if populated.is_err() {
                    let _ = remove_dir_all(&dir);
                }
                populated
            })
            .await?;

        log::debug!("created native snapshot {} (id {})", key, snapshot.id);
        Ok(self.mounts(&snapshot))
    }
}

#[async_trait]
impl Snapshotter for NativeSnapshotter {
    async fn stat(&self, _ctx: &Context, key: &str) -> Result<Info> {
        self.meta.view(|state| state.info(key)).await
    }

    async fn update(&self, _ctx: &Context, info: Info, fieldpaths: &[String]) -> Result<Info> {
        self.meta.update(|state| state.update(info, fieldpaths)).await
    }

    async fn usage(&self, _ctx: &Context, key: &str) -> Result<Usage> {
        let snapshot = self.meta.view(|state| state.snapshot(key)).await?;
        let dir = Self::snapshot_dir(&self.root, snapshot.id);
        run_blocking(move || disk_usage(&dir).map_err(|e| Error::SnapshotDirectory(dir, e))).await
    }

    async fn mounts(&self, _ctx: &Context, key: &str) -> Result<Vec<Mount>> {
        let snapshot = self.meta.view(|state| state.snapshot(key)).await?;
        Ok(self.mounts(&snapshot))
    }

    async fn prepare(
        &self,
        ctx: &Context,
        key: &str,
        parent: &str,
        opts: Vec<Opt>,
    ) -> Result<Vec<Mount>> {
        self.create_snapshot(ctx, Kind::Active, key, parent, opts).await
    }

    async fn view(
        &self,
        ctx: &Context,
        key: &str,
        parent: &str,
        opts: Vec<Opt>,
    ) -> Result<Vec<Mount>> {
        self.create_snapshot(ctx, Kind::View, key, parent, opts).await
    }

    async fn commit(&self, _ctx: &Context, name: &str, key: &str, opts: Vec<Opt>) -> Result<()> {
        self.meta
            .update(|state| state.commit(name, key, &opts))
            .await?;
        log::debug!("committed native snapshot {} as {}", key, name);
        Ok(())
    }

    async fn remove(&self, _ctx: &Context, key: &str) -> Result<()> {
        let snapshot = self.meta.update(|state| state.remove(key)).await?;
        let dir = Self::snapshot_dir(&self.root, snapshot.id);
        run_blocking(move || match remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::SnapshotDirectory(dir, e)),
        })
        .await?;
        log::debug!("removed native snapshot {}", key);
        Ok(())
    }

    async fn walk(&self, _ctx: &Context) -> Result<Vec<Info>> {
        self.meta.view(|state| Ok(state.list())).await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::mount::{writable_dir, MountKind};
    use crate::snapshots::native::NativeSnapshotter;
    use crate::snapshots::{Kind, Snapshotter};
    use crate::{Context, ErrorKind};
    use std::fs;
    use tempdir::TempDir;

    #[tokio::test]
    async fn test_prepare_commit_and_reuse_as_parent() {
        let tmp = TempDir::new("native_lifecycle").unwrap();
        let sn = NativeSnapshotter::new(tmp.path()).unwrap();
        let ctx = Context::default();

        let mounts = sn.prepare(&ctx, "layer1", "", vec![]).await.unwrap();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].kind(), MountKind::Bind);
        assert!(mounts[0].options.contains(&"rw".to_string()));

        let dir = writable_dir(&mounts).unwrap();
        fs::write(dir.join("file.txt"), "hello").unwrap();

        sn.commit(&ctx, "layer1-committed", "layer1", vec![])
            .await
            .unwrap();
        let info = sn.stat(&ctx, "layer1-committed").await.unwrap();
        assert_eq!(info.kind, Kind::Committed);

        let mounts = sn
            .prepare(&ctx, "layer2", "layer1-committed", vec![])
            .await
            .unwrap();
        let dir = writable_dir(&mounts).unwrap();
        assert_eq!(fs::read_to_string(dir.join("file.txt")).unwrap(), "hello");

        let usage = sn.usage(&ctx, "layer2").await.unwrap();
        assert_eq!(usage.size, 5);
    }

    #[tokio::test]
    async fn test_view_is_read_only() {
        let tmp = TempDir::new("native_view").unwrap();
        let sn = NativeSnapshotter::new(tmp.path()).unwrap();
        let ctx = Context::default();

        sn.prepare(&ctx, "base", "", vec![]).await.unwrap();
        sn.commit(&ctx, "base-committed", "base", vec![])
            .await
            .unwrap();

        let mounts = sn.view(&ctx, "v", "base-committed", vec![]).await.unwrap();
        assert!(mounts[0].options.contains(&"ro".to_string()));
        assert_eq!(sn.stat(&ctx, "v").await.unwrap().kind, Kind::View);
    }

    #[tokio::test]
    async fn test_remove_deletes_directory() {
        let tmp = TempDir::new("native_remove").unwrap();
        let sn = NativeSnapshotter::new(tmp.path()).unwrap();
        let ctx = Context::default();

        let mounts = sn.prepare(&ctx, "a", "", vec![]).await.unwrap();
        let dir = writable_dir(&mounts).unwrap();
        assert!(dir.is_dir());

        sn.remove(&ctx, "a").await.unwrap();

        assert!(!dir.exists());
        let err = sn.stat(&ctx, "a").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(sn.walk(&ctx).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_prepare_fails() {
        let tmp = TempDir::new("native_duplicate").unwrap();
        let sn = NativeSnapshotter::new(tmp.path()).unwrap();
        let ctx = Context::default();

        sn.prepare(&ctx, "a", "", vec![]).await.unwrap();
        let err = sn.prepare(&ctx, "a", "", vec![]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }
}
