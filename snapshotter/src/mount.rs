use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const OVERLAY: &str = "overlay";
const BIND: &str = "bind";
const UPPERDIR_OPTION: &str = "upperdir=";

/// `Mount` describes one filesystem mount needed to materialize a snapshot.
///
/// The store only builds the description, the consumer performs the mount.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Mount {
    /// The filesystem type, such as `overlay` or `bind`
    #[serde(rename = "type")]
    pub typ: String,
    /// The mount source, a path for bind mounts
    pub source: String,
    /// Type specific options, e.g. `upperdir=/path` for overlay
    #[serde(default)]
    pub options: Vec<String>,
}

/// The mount shapes a writable layer can be found in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MountKind<'a> {
    Overlay,
    Bind,
    Other(&'a str),
}

impl<'a> From<&'a str> for MountKind<'a> {
    fn from(typ: &'a str) -> Self {
        match typ {
            OVERLAY => MountKind::Overlay,
            BIND => MountKind::Bind,
            other => MountKind::Other(other),
        }
    }
}

impl Mount {
    /// A bind mount of `source`, read-only when `read_only` is set.
    pub fn bind(source: &str, read_only: bool) -> Self {
        let mode = if read_only { "ro" } else { "rw" };
        Mount {
            typ: BIND.to_string(),
            source: source.to_string(),
            options: vec!["rbind".to_string(), mode.to_string()],
        }
    }

    /// An overlay mount built from raw `key=value` options.
    pub fn overlay(options: Vec<String>) -> Self {
        Mount {
            typ: OVERLAY.to_string(),
            source: OVERLAY.to_string(),
            options,
        }
    }

    pub fn kind(&self) -> MountKind<'_> {
        MountKind::from(self.typ.as_str())
    }
}

/// Find the writable directory of a snapshot from its mounts.
///
/// The first overlay entry carrying an `upperdir=` option, or the first bind entry, wins.
pub fn writable_dir(mounts: &[Mount]) -> Result<PathBuf> {
    for mount in mounts {
        match mount.kind() {
            MountKind::Overlay => {
                if let Some(dir) = mount
                    .options
                    .iter()
                    .find_map(|opt| opt.strip_prefix(UPPERDIR_OPTION))
                {
                    return Ok(PathBuf::from(dir));
                }
            }
            MountKind::Bind => return Ok(PathBuf::from(&mount.source)),
            MountKind::Other(_) => {}
        }
    }

    let types = mounts
        .iter()
        .map(|m| m.typ.as_str())
        .collect::<Vec<&str>>()
        .join(", ");
    Err(Error::UnsupportedMounts(format!(
        "no writable directory found in mounts (types: {})",
        types
    )))
}
