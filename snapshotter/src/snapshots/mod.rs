mod metadata;
pub mod native;
pub mod overlay;

use crate::mount::Mount;
use crate::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use walkdir::WalkDir;

/// The kind of a snapshot.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Copy, Clone)]
pub enum Kind {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "committed")]
    Committed,
    #[serde(rename = "view")]
    View,
}

impl Default for Kind {
    fn default() -> Self {
        Kind::Active
    }
}

/// `Info` holds the metadata of a snapshot.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Info {
    /// The snapshot key
    pub name: String,
    pub kind: Kind,
    /// The key of the committed parent snapshot, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Disk usage of a snapshot's own directory.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Usage {
    pub size: u64,
    pub inodes: u64,
}

/// An option mutating the `Info` of a snapshot being created.
pub type Opt = Box<dyn Fn(&mut Info) -> Result<()> + Send + Sync>;

/// Merge `labels` into the snapshot labels.
pub fn with_labels(labels: HashMap<String, String>) -> Opt {
    Box::new(move |info: &mut Info| -> Result<()> {
        info.labels
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    })
}

/// Apply every option in order, stopping at the first failure.
pub fn apply_opts(info: &mut Info, opts: &[Opt]) -> Result<()> {
    for opt in opts {
        opt(info)?;
    }
    Ok(())
}

/// The `Snapshotter` trait defines the snapshot lifecycle a store must provide.
///
/// An empty `parent` means the snapshot has no parent.
#[async_trait]
pub trait Snapshotter: Send + Sync {
    async fn stat(&self, ctx: &Context, key: &str) -> Result<Info>;
    /// Update the labels of an existing snapshot.
    ///
    /// `fieldpaths` selects `labels` or `labels.<key>`; an empty list replaces all labels.
    async fn update(&self, ctx: &Context, info: Info, fieldpaths: &[String]) -> Result<Info>;
    async fn usage(&self, ctx: &Context, key: &str) -> Result<Usage>;
    /// Mounts of an existing snapshot.
    async fn mounts(&self, ctx: &Context, key: &str) -> Result<Vec<Mount>>;
    /// Create an active snapshot `key` on top of `parent`.
    async fn prepare(
        &self,
        ctx: &Context,
        key: &str,
        parent: &str,
        opts: Vec<Opt>,
    ) -> Result<Vec<Mount>>;
    /// Create a read-only view `key` of `parent`.
    async fn view(&self, ctx: &Context, key: &str, parent: &str, opts: Vec<Opt>)
        -> Result<Vec<Mount>>;
    /// Turn the active snapshot `key` into the committed snapshot `name`.
    async fn commit(&self, ctx: &Context, name: &str, key: &str, opts: Vec<Opt>) -> Result<()>;
    async fn remove(&self, ctx: &Context, key: &str) -> Result<()>;
    /// List every snapshot, sorted by key.
    async fn walk(&self, ctx: &Context) -> Result<Vec<Info>>;
    async fn close(&self) -> Result<()>;
}

/// Compute the disk usage of a directory tree.
pub(crate) fn disk_usage(dir: &Path) -> std::io::Result<Usage> {
    let mut usage = Usage::default();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry?;
        let metadata = entry.metadata()?;
        usage.inodes += 1;
        if metadata.is_file() {
            usage.size += metadata.len();
        }
    }
    Ok(usage)
}

#[cfg(test)]
mod tests {
    use crate::snapshots::{apply_opts, disk_usage, with_labels, Info, Opt};
    use crate::Error;
    use std::collections::HashMap;
    use tempdir::TempDir;

    #[test]
    fn test_with_labels_merges() {
        let mut info = Info::default();
        info.labels.insert("a".to_string(), "1".to_string());

        let opt = with_labels(HashMap::from([("b".to_string(), "2".to_string())]));
        opt(&mut info).unwrap();

        assert_eq!(info.labels.len(), 2);
        assert_eq!(info.labels["b"], "2");
    }

    #[test]
    fn test_apply_opts_first_failure_wins() {
        let failing: Opt = Box::new(|_: &mut Info| -> crate::Result<()> {
            Err(Error::InvalidArgument("bad option".to_string()))
        });
        let opts = vec![
            with_labels(HashMap::from([("a".to_string(), "1".to_string())])),
            failing,
            with_labels(HashMap::from([("b".to_string(), "2".to_string())])),
        ];

        let mut info = Info::default();
        let err = apply_opts(&mut info, &opts).unwrap_err();

        assert_eq!(err.to_string(), "bad option");
        assert!(!info.labels.contains_key("b"));
    }

    #[test]
    fn test_disk_usage() {
        let tmp = TempDir::new("clone_usage").unwrap();
        std::fs::create_dir(tmp.path().join("d")).unwrap();
        std::fs::write(tmp.path().join("d/f"), "12345").unwrap();

        let usage = disk_usage(tmp.path()).unwrap();
        assert_eq!(usage.size, 5);
        assert_eq!(usage.inodes, 3);
    }
}
