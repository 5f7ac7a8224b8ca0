use crate::snapshots::{apply_opts, Info, Kind, Opt};
use crate::{run_blocking, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// The name of the file where the store metadata is persisted.
pub(crate) const METADATA_FILE: &str = "metadata.json";

/// `SnapshotRecord` is a snapshot as persisted in the state.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub(crate) struct SnapshotRecord {
    /// The internal identifier, used as the on-disk directory name
    pub id: u64,
    pub info: Info,
}

/// `Snapshot` is the storage view of a snapshot: its directory and the directories of its parents.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Snapshot {
    pub id: u64,
    pub kind: Kind,
    /// Parent identifiers, nearest first
    pub parent_ids: Vec<u64>,
}

/// `State` holds every snapshot known by a local store.
#[derive(Clone, Default, Deserialize, Debug, Serialize, PartialEq)]
pub(crate) struct State {
    snapshots: HashMap<String, SnapshotRecord>,
    /// An index to track the last snapshot identifier
    index: u64,
}

impl State {
    /// Save the state into the file.
    ///
    /// The state is written next to `path` then renamed over it, so the file always holds
    /// a complete state.
    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = serde_json::to_string_pretty(&self)
            .map_err(|e| Error::SerializeState(e.to_string()))?;

        let tmp = temp_path(path);
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)
            .map_err(|e| Error::OpenStateFile(e.to_string()))?;
        file.write_all(serialized.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| Error::WriteStateFile(e.to_string()))?;

        fs::rename(&tmp, path).map_err(|e| Error::WriteStateFile(e.to_string()))
    }

    fn record(&self, key: &str) -> Result<&SnapshotRecord> {
        self.snapshots
            .get(key)
            .ok_or_else(|| Error::NotFound(format!("snapshot {:?} does not exist", key)))
    }

    pub fn info(&self, key: &str) -> Result<Info> {
        Ok(self.record(key)?.info.clone())
    }

    pub fn snapshot(&self, key: &str) -> Result<Snapshot> {
        let record = self.record(key)?;
        let mut parent_ids = Vec::new();
        let mut parent = record.info.parent.as_deref();
        while let Some(key) = parent {
            let record = self.record(key)?;
            parent_ids.push(record.id);
            parent = record.info.parent.as_deref();
        }

        Ok(Snapshot {
            id: record.id,
            kind: record.info.kind,
            parent_ids,
        })
    }

    /// List every snapshot info, sorted by key.
    pub fn list(&self) -> Vec<Info> {
        let mut infos = self
            .snapshots
            .values()
            .map(|r| r.info.clone())
            .collect::<Vec<Info>>();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Register a new active snapshot or view.
    pub fn create(
        &mut self,
        kind: Kind,
        key: &str,
        parent: &str,
        opts: &[Opt],
    ) -> Result<Snapshot> {
        if key.is_empty() {
            return Err(Error::InvalidArgument(
                "snapshot key must not be empty".to_string(),
            ));
        }
        if kind == Kind::Committed {
            return Err(Error::InvalidArgument(format!(
                "snapshot {:?} cannot be created as committed",
                key
            )));
        }
        if self.snapshots.contains_key(key) {
            return Err(Error::AlreadyExists(format!(
                "snapshot {:?} already exists",
                key
            )));
        }

        let parent = match parent {
            "" => None,
            parent => {
                let record = self.snapshots.get(parent).ok_or_else(|| {
                    Error::NotFound(format!("parent snapshot {:?} does not exist", parent))
                })?;
                if record.info.kind != Kind::Committed {
                    return Err(Error::FailedPrecondition(format!(
                        "parent snapshot {:?} is not committed",
                        parent
                    )));
                }
                Some(parent.to_string())
            }
        };

        let mut info = Info::default();
        apply_opts(&mut info, opts)?;
        info.name = key.to_string();
        info.kind = kind;
        info.parent = parent;

        self.index += 1;
        self.snapshots.insert(
            key.to_string(),
            SnapshotRecord {
                id: self.index,
                info,
            },
        );
        self.snapshot(key)
    }

    /// Turn the active snapshot `key` into the committed snapshot `name`.
    pub fn commit(&mut self, name: &str, key: &str, opts: &[Opt]) -> Result<Snapshot> {
        if self.record(key)?.info.kind != Kind::Active {
            return Err(Error::FailedPrecondition(format!(
                "snapshot {:?} is not active",
                key
            )));
        }
        if self.snapshots.contains_key(name) {
            return Err(Error::AlreadyExists(format!(
                "snapshot {:?} already exists",
                name
            )));
        }

        let mut record = self.snapshots.remove(key).ok_or_else(|| {
            Error::NotFound(format!("snapshot {:?} does not exist", key))
        })?;
        apply_opts(&mut record.info, opts)?;
        record.info.name = name.to_string();
        record.info.kind = Kind::Committed;
        self.snapshots.insert(name.to_string(), record);
        self.snapshot(name)
    }

    /// Forget the snapshot `key`, which must not be the parent of another snapshot.
    pub fn remove(&mut self, key: &str) -> Result<Snapshot> {
        let snapshot = self.snapshot(key)?;
        if let Some(child) = self
            .snapshots
            .values()
            .find(|r| r.info.parent.as_deref() == Some(key))
        {
            return Err(Error::FailedPrecondition(format!(
                "cannot remove snapshot {:?}: snapshot {:?} depends on it",
                key, child.info.name
            )));
        }
        self.snapshots.remove(key);
        Ok(snapshot)
    }

    /// Update the labels of the snapshot named by `info.name`.
    pub fn update(&mut self, info: Info, fieldpaths: &[String]) -> Result<Info> {
        let record = self.snapshots.get_mut(&info.name).ok_or_else(|| {
            Error::NotFound(format!("snapshot {:?} does not exist", info.name))
        })?;

        if fieldpaths.is_empty() {
            record.info.labels = info.labels;
            return Ok(record.info.clone());
        }

        for path in fieldpaths {
            if path == "labels" {
                record.info.labels = info.labels.clone();
            } else if let Some(label) = path.strip_prefix("labels.") {
                match info.labels.get(label) {
                    Some(value) => {
                        record.info.labels.insert(label.to_string(), value.clone());
                    }
                    None => {
                        record.info.labels.remove(label);
                    }
                }
            } else {
                return Err(Error::InvalidArgument(format!(
                    "cannot update field {:?} of snapshot {:?}",
                    path, info.name
                )));
            }
        }
        Ok(record.info.clone())
    }
}

impl TryFrom<&PathBuf> for State {
    type Error = crate::Error;

    /// Load the state from `state_file`.
    ///
    /// A missing or empty file is a new store. Any other content must parse.
    fn try_from(state_file: &PathBuf) -> std::result::Result<Self, Self::Error> {
        let content = match fs::read_to_string(state_file) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(State::default()),
            Err(e) => return Err(Error::OpenStateFile(e.to_string())),
        };

        if content.trim().is_empty() {
            return Ok(State::default());
        }
        serde_json::from_str(&content).map_err(|e| {
            Error::ParseStateFile(format!("{}: {}", state_file.display(), e))
        })
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// `MetaStore` guards the state of a store and persists every change.
///
/// Mutations are applied to a copy of the state which replaces the current one only once it
/// has been written to disk.
pub(crate) struct MetaStore {
    path: PathBuf,
    state: Mutex<State>,
}

impl MetaStore {
    pub fn open(root: &Path) -> Result<Self> {
        let path = root.join(METADATA_FILE);
        let state = State::try_from(&path)?;
        Ok(MetaStore {
            path,
            state: Mutex::new(state),
        })
    }

    pub async fn view<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&State) -> Result<T>,
    {
        let state = self.state.lock().await;
        f(&state)
    }

    pub async fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut State) -> Result<T>,
    {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let out = f(&mut next)?;
        next.save(&self.path)?;
        *state = next;
        Ok(out)
    }

    /// Register a new snapshot and run `init` on the blocking pool to populate its directory.
    ///
    /// The identifier is reserved on disk before `init` runs, so a directory left behind by
    /// a failed create is never handed to another snapshot. The snapshot itself is only
    /// persisted once `init` succeeds.
    pub async fn create<F>(
        &self,
        kind: Kind,
        key: &str,
        parent: &str,
        opts: &[Opt],
        init: F,
    ) -> Result<Snapshot>
    where
        F: FnOnce(Snapshot) -> Result<()> + Send + 'static,
    {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let snapshot = next.create(kind, key, parent, opts)?;

        let mut reserved = state.clone();
        reserved.index = next.index;
        reserved.save(&self.path)?;
        *state = reserved;

        let created = snapshot.clone();
        run_blocking(move || init(created)).await?;

        next.save(&self.path)?;
        *state = next;
        Ok(snapshot)
    }
}
