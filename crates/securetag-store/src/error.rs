use std::path::PathBuf;

use securetag_types::ObjectId;

/// Errors from object store sessions.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A response header could not be parsed; the stream is out of sync and
    /// every pending query has been failed.
    #[error("protocol desync: {0}")]
    ProtocolDesync(String),

    /// The store reported the requested object as absent.
    #[error("missing object {0}")]
    ObjectMissing(String),

    /// The requested short name matches more than one object.
    #[error("ambiguous object name {0}")]
    ObjectAmbiguous(String),

    /// The response header names a different object than was requested.
    #[error("unexpected reply for {requested}: got {received}")]
    UnexpectedReply { requested: String, received: ObjectId },

    /// The underlying process exited (or its pipe closed) with queries
    /// outstanding.
    #[error("git cat-file --batch (cwd: {}) exit {status}", root.display())]
    SessionExited { root: PathBuf, status: String },

    /// The session was closed while the query was still pending.
    #[error("session closed (cwd: {})", .0.display())]
    SessionClosed(PathBuf),

    /// The git process could not be started.
    #[error("failed to spawn {program} (cwd: {}): {source}", root.display())]
    Spawn {
        program: String,
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O error on the session pipes.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A tree object could not be decoded.
    #[error("malformed tree: {0}")]
    MalformedTree(String),
}

impl Clone for StoreError {
    fn clone(&self) -> Self {
        match self {
            Self::ProtocolDesync(s) => Self::ProtocolDesync(s.clone()),
            Self::ObjectMissing(s) => Self::ObjectMissing(s.clone()),
            Self::ObjectAmbiguous(s) => Self::ObjectAmbiguous(s.clone()),
            Self::UnexpectedReply { requested, received } => Self::UnexpectedReply {
                requested: requested.clone(),
                received: *received,
            },
            Self::SessionExited { root, status } => Self::SessionExited {
                root: root.clone(),
                status: status.clone(),
            },
            Self::SessionClosed(root) => Self::SessionClosed(root.clone()),
            Self::Spawn { program, root, source } => Self::Spawn {
                program: program.clone(),
                root: root.clone(),
                source: std::io::Error::new(source.kind(), source.to_string()),
            },
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
            Self::MalformedTree(s) => Self::MalformedTree(s.clone()),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
