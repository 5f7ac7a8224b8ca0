//! Wire format of the snapshot service.
//!
//! Frames are JSON documents separated by a newline. Each request frame carries the
//! namespace of the caller and one call; each response frame carries either a reply or an
//! error status.

use serde::{Deserialize, Serialize};
use snapshotter::{ErrorKind, Info, Mount, Usage};
use std::collections::HashMap;

/// A request frame.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Request {
    /// The namespace of the caller, `default` when empty
    #[serde(default)]
    pub namespace: String,
    pub call: Call,
}

/// The snapshot operations exposed to remote callers.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Call {
    Prepare {
        key: String,
        #[serde(default)]
        parent: String,
        #[serde(default)]
        labels: HashMap<String, String>,
    },
    View {
        key: String,
        #[serde(default)]
        parent: String,
        #[serde(default)]
        labels: HashMap<String, String>,
    },
    Mounts {
        key: String,
    },
    Commit {
        name: String,
        key: String,
        #[serde(default)]
        labels: HashMap<String, String>,
    },
    Remove {
        key: String,
    },
    Stat {
        key: String,
    },
    Update {
        info: Info,
        #[serde(default)]
        fieldpaths: Vec<String>,
    },
    Usage {
        key: String,
    },
    List,
}

impl Call {
    /// The operation name, as found in the `op` field.
    pub fn op(&self) -> &'static str {
        match self {
            Call::Prepare { .. } => "prepare",
            Call::View { .. } => "view",
            Call::Mounts { .. } => "mounts",
            Call::Commit { .. } => "commit",
            Call::Remove { .. } => "remove",
            Call::Stat { .. } => "stat",
            Call::Update { .. } => "update",
            Call::Usage { .. } => "usage",
            Call::List => "list",
        }
    }
}

/// The successful result of a call.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Mounts(Vec<Mount>),
    Info(Info),
    Infos(Vec<Info>),
    Usage(Usage),
    Done,
}

/// Error codes sent over the wire.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Code {
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    InvalidArgument,
    Canceled,
    Unknown,
}

impl From<ErrorKind> for Code {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NotFound => Code::NotFound,
            ErrorKind::AlreadyExists => Code::AlreadyExists,
            ErrorKind::FailedPrecondition | ErrorKind::UnsupportedMounts => {
                Code::FailedPrecondition
            }
            ErrorKind::InvalidArgument => Code::InvalidArgument,
            ErrorKind::Canceled => Code::Canceled,
            ErrorKind::Io | ErrorKind::Internal => Code::Unknown,
        }
    }
}

/// An error returned by the server.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Status {
    pub code: Code,
    pub message: String,
}

impl From<&snapshotter::Error> for Status {
    fn from(err: &snapshotter::Error) -> Self {
        Status {
            code: Code::from(err.kind()),
            message: err.to_string(),
        }
    }
}

/// A response frame.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    Ok(Reply),
    Error(Status),
}

#[cfg(test)]
mod tests {
    use crate::protocol::{Call, Code, Reply, Request, Response, Status};
    use snapshotter::Error;

    #[test]
    fn test_parse_prepare_request_with_defaults() {
        let raw = r#"{"call":{"op":"prepare","key":"c1","labels":{"containerd.io/snapshot/clone-source":"c0"}}}"#;
        let request: Request = serde_json::from_str(raw).unwrap();

        assert_eq!(request.namespace, "");
        match request.call {
            Call::Prepare {
                key,
                parent,
                labels,
            } => {
                assert_eq!(key, "c1");
                assert_eq!(parent, "");
                assert_eq!(labels["containerd.io/snapshot/clone-source"], "c0");
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[test]
    fn test_list_call_format() {
        let request = Request {
            namespace: "k8s.io".to_string(),
            call: Call::List,
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"namespace":"k8s.io","call":{"op":"list"}}"#
        );
        assert_eq!(request.call.op(), "list");
    }

    #[test]
    fn test_response_format() {
        let ok = serde_json::to_string(&Response::Ok(Reply::Done)).unwrap();
        assert_eq!(ok, r#"{"ok":"done"}"#);

        let err = Error::NotFound("snapshot \"x\" does not exist".to_string())
            .context("stat source snapshot \"x\"");
        let response = Response::Error(Status::from(&err));
        let raw = serde_json::to_string(&response).unwrap();
        assert!(raw.starts_with(r#"{"error":{"code":"not_found""#));

        let parsed: Response = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn test_unsupported_mounts_is_failed_precondition() {
        let err = Error::UnsupportedMounts("no writable directory".to_string());
        assert_eq!(Status::from(&err).code, Code::FailedPrecondition);
    }
}
