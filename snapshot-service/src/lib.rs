use std::fmt;

pub mod client;
pub mod protocol;
pub mod server;

pub use crate::client::Client;
pub use crate::protocol::{Call, Code, Reply, Request, Response, Status};
pub use crate::server::Server;

/// Snapshot service related errors
#[derive(Debug)]
pub enum Error {
    /// An error occurred when trying to prepare or bind the socket
    Bind(std::io::Error),
    /// An error occurred when trying to connect to the socket
    Connect(std::io::Error),
    /// An error occurred when reading or writing a frame
    Io(std::io::Error),
    /// A frame could not be serialized
    Encode(String),
    /// A frame could not be parsed
    Decode(String),
    /// The peer closed the connection before answering
    ConnectionClosed,
    /// The server answered with an error
    Remote(Status),
    /// The server answered with a reply that does not match the call
    UnexpectedReply(String),
    /// The snapshotter failed to shut down
    Close(snapshotter::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Bind(e) => write!(f, "bind socket: {}", e),
            Error::Connect(e) => write!(f, "connect to socket: {}", e),
            Error::Io(e) => write!(f, "connection: {}", e),
            Error::Encode(msg) => write!(f, "encode frame: {}", msg),
            Error::Decode(msg) => write!(f, "decode frame: {}", msg),
            Error::ConnectionClosed => write!(f, "connection closed by peer"),
            Error::Remote(status) => write!(f, "{:?}: {}", status.code, status.message),
            Error::UnexpectedReply(msg) => write!(f, "unexpected reply: {}", msg),
            Error::Close(e) => write!(f, "close snapshotter: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Bind(e) | Error::Connect(e) | Error::Io(e) => Some(e),
            Error::Close(e) => Some(e),
            _ => None,
        }
    }
}

/// A common result type for our crate.
pub type Result<T> = std::result::Result<T, Error>;
