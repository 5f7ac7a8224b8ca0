use crate::mount::Mount;
use crate::snapshots::metadata::{MetaStore, Snapshot};
use crate::snapshots::{disk_usage, Info, Kind, Opt, Snapshotter, Usage};
use crate::{run_blocking, Context, Error, Result};
use async_trait::async_trait;
use std::fs::{create_dir_all, remove_dir_all};
use std::path::{Path, PathBuf};

const SNAPSHOTS_DIR: &str = "snapshots";
const UPPER_DIR: &str = "fs";
const WORK_DIR: &str = "work";

/// `OverlayFS` lays snapshots out for OverlayFS.
///
/// Every snapshot owns an `fs` directory holding its own changes, stacked over the `fs`
/// directories of its parents. The store only describes the mounts, the caller mounts them.
pub struct OverlayFS {
    data_dir: PathBuf,
    meta: MetaStore,
}

impl OverlayFS {
    pub fn new(data_dir: &Path) -> Result<Self> {
        let snapshots_dir = data_dir.join(SNAPSHOTS_DIR);
        if !snapshots_dir.exists() {
            log::debug!(
                "creating OverlayFS data directory = {}",
                snapshots_dir.display()
            );
            create_dir_all(&snapshots_dir)
                .map_err(|e| Error::SnapshotDirectory(snapshots_dir.clone(), e))?;
        }

        Ok(Self {
            meta: MetaStore::open(data_dir)?,
            data_dir: data_dir.to_path_buf(),
        })
    }

    fn snapshot_dir(data_dir: &Path, id: u64) -> PathBuf {
        data_dir.join(SNAPSHOTS_DIR).join(id.to_string())
    }

    fn upper_path(&self, id: u64) -> String {
        Self::snapshot_dir(&self.data_dir, id)
            .join(UPPER_DIR)
            .display()
            .to_string()
    }

    fn work_path(&self, id: u64) -> String {
        Self::snapshot_dir(&self.data_dir, id)
            .join(WORK_DIR)
            .display()
            .to_string()
    }

    /// Build the mounts of a snapshot.
    ///
    /// Active snapshots get a writable `upperdir=` on top of their parents, or a plain bind
    /// mount without parents. Views and committed snapshots are read-only stacks of layers.
    fn mounts(&self, snapshot: &Snapshot) -> Vec<Mount> {
        if snapshot.kind == Kind::Active {
            if snapshot.parent_ids.is_empty() {
                return vec![Mount::bind(&self.upper_path(snapshot.id), false)];
            }
            return vec![Mount::overlay(vec![
                "index=off".to_string(),
                format!("workdir={}", self.work_path(snapshot.id)),
                format!("upperdir={}", self.upper_path(snapshot.id)),
                format!("lowerdir={}", self.lowerdir(&snapshot.parent_ids)),
            ])];
        }

        let mut layers = Vec::with_capacity(snapshot.parent_ids.len() + 1);
        if snapshot.kind == Kind::Committed || snapshot.parent_ids.is_empty() {
            layers.push(snapshot.id);
        }
        layers.extend(&snapshot.parent_ids);

        if layers.len() == 1 {
            return vec![Mount::bind(&self.upper_path(layers[0]), true)];
        }
        vec![Mount::overlay(vec![format!(
            "lowerdir={}",
            self.lowerdir(&layers)
        )])]
    }

    fn lowerdir(&self, ids: &[u64]) -> String {
        ids.iter()
            .map(|id| self.upper_path(*id))
            .collect::<Vec<String>>()
            .join(":")
    }

    async fn create_snapshot(
        &self,
        kind: Kind,
        key: &str,
        parent: &str,
        opts: Vec<Opt>,
    ) -> Result<Vec<Mount>> {
        let data_dir = self.data_dir.clone();
        let snapshot = self
            .meta
            .create(kind, key, parent, &opts, move |snapshot| {
                let dir = Self::snapshot_dir(&data_dir, snapshot.id);
                let mut dirs = vec![dir.join(UPPER_DIR)];
                if snapshot.kind == Kind::Active {
                    dirs.push(dir.join(WORK_DIR));
                }
                for path in dirs {
                    if let Err(e) = create_dir_all(&path) {
                        let _ = remove_dir_all(&dir);
                        return Err(Error::SnapshotDirectory(path, e));
                    }
                }
                Ok(())
            })
            .await?;

        log::debug!("created overlay snapshot {} (id {})", key, snapshot.id);
        Ok(self.mounts(&snapshot))
    }
}

#[async_trait]
impl Snapshotter for OverlayFS {
    async fn stat(&self, _ctx: &Context, key: &str) -> Result<Info> {
        self.meta.view(|state| state.info(key)).await
    }

    async fn update(&self, _ctx: &Context, info: Info, fieldpaths: &[String]) -> Result<Info> {
        self.meta.update(|state| state.update(info, fieldpaths)).await
    }

    async fn usage(&self, _ctx: &Context, key: &str) -> Result<Usage> {
        let snapshot = self.meta.view(|state| state.snapshot(key)).await?;
        let upper = PathBuf::from(self.upper_path(snapshot.id));
        run_blocking(move || {
            disk_usage(&upper).map_err(|e| Error::SnapshotDirectory(upper, e))
        })
        .await
    }

    async fn mounts(&self, _ctx: &Context, key: &str) -> Result<Vec<Mount>> {
        let snapshot = self.meta.view(|state| state.snapshot(key)).await?;
        Ok(self.mounts(&snapshot))
    }

    async fn prepare(
        &self,
        _ctx: &Context,
        key: &str,
        parent: &str,
        opts: Vec<Opt>,
    ) -> Result<Vec<Mount>> {
        self.create_snapshot(Kind::Active, key, parent, opts).await
    }

    async fn view(
        &self,
        _ctx: &Context,
        key: &str,
        parent: &str,
        opts: Vec<Opt>,
    ) -> Result<Vec<Mount>> {
        self.create_snapshot(Kind::View, key, parent, opts).await
    }

    async fn commit(&self, _ctx: &Context, name: &str, key: &str, opts: Vec<Opt>) -> Result<()> {
        let snapshot = self
            .meta
            .update(|state| state.commit(name, key, &opts))
            .await?;

        // The work directory is only needed while the snapshot is mounted read-write.
        let work = PathBuf::from(self.work_path(snapshot.id));
        if let Err(e) = run_blocking(move || {
            remove_dir_all(&work).map_err(|e| Error::SnapshotDirectory(work, e))
        })
        .await
        {
            log::warn!("failed to remove work directory of {}: {}", name, e);
        }

        log::debug!("committed overlay snapshot {} as {}", key, name);
        Ok(())
    }

    async fn remove(&self, _ctx: &Context, key: &str) -> Result<()> {
        let snapshot = self.meta.update(|state| state.remove(key)).await?;
        let dir = Self::snapshot_dir(&self.data_dir, snapshot.id);
        run_blocking(move || match remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::SnapshotDirectory(dir, e)),
        })
        .await?;
        log::debug!("removed overlay snapshot {}", key);
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
    use crate::snapshots::overlay::OverlayFS;
    use crate::snapshots::Snapshotter;
    use crate::Context;
    use std::fs;
    use tempdir::TempDir;

    #[tokio::test]
    async fn test_mount_shapes() {
        let tmp = TempDir::new("overlay_shapes").unwrap();
        let sn = OverlayFS::new(tmp.path()).unwrap();
        let ctx = Context::default();

        let mounts = sn.prepare(&ctx, "base", "", vec![]).await.unwrap();
        assert_eq!(mounts[0].kind(), MountKind::Bind);
        let base_dir = writable_dir(&mounts).unwrap();
        fs::write(base_dir.join("base.txt"), "base").unwrap();
        sn.commit(&ctx, "base-committed", "base", vec![])
            .await
            .unwrap();

        let mounts = sn
            .view(&ctx, "base-view", "base-committed", vec![])
            .await
            .unwrap();
        assert_eq!(mounts[0].kind(), MountKind::Bind);
        assert_eq!(writable_dir(&mounts).unwrap(), base_dir);
        assert!(mounts[0].options.contains(&"ro".to_string()));

        let mounts = sn
            .prepare(&ctx, "container", "base-committed", vec![])
            .await
            .unwrap();
        assert_eq!(mounts[0].kind(), MountKind::Overlay);
        let upper = writable_dir(&mounts).unwrap();
        assert!(upper.is_dir());
        assert_ne!(upper, base_dir);
        assert!(mounts[0]
            .options
            .contains(&format!("lowerdir={}", base_dir.display())));
    }

    #[tokio::test]
    async fn test_lowerdir_lists_nearest_parent_first() {
        let tmp = TempDir::new("overlay_lowerdir").unwrap();
        let sn = OverlayFS::new(tmp.path()).unwrap();
        let ctx = Context::default();

        sn.prepare(&ctx, "l1", "", vec![]).await.unwrap();
        sn.commit(&ctx, "c1", "l1", vec![]).await.unwrap();
        sn.prepare(&ctx, "l2", "c1", vec![]).await.unwrap();
        sn.commit(&ctx, "c2", "l2", vec![]).await.unwrap();

        let mounts = sn.view(&ctx, "v", "c2", vec![]).await.unwrap();
        assert_eq!(mounts[0].kind(), MountKind::Overlay);
        assert_eq!(
            mounts[0].options,
            vec![format!("lowerdir={}:{}", sn.upper_path(2), sn.upper_path(1))]
        );
        assert!(writable_dir(&mounts).is_err());
    }
}
