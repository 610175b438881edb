use securetag_hash::{DigestFormat, HashError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TagError {
    #[error("No `Git-EVTag-v0-SHA512: ...`, nor `Git-Secure-Tag-V0` found in tag description")]
    NoDeclaredDigest,

    /// The digest declared in the tag differs from the one computed now.
    #[error("{format} hash mismatch\nExpected: {computed}\nFound: {declared}")]
    DigestMismatch {
        format: DigestFormat,
        declared: String,
        computed: String,
    },

    #[error("`{command}` failed ({status}): {stderr}")]
    ExternalCommand {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("`{command}` printed unexpected output: {output:?}")]
    UnexpectedOutput { command: String, output: String },

    #[error("hash error: {0}")]
    Hash(#[from] HashError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type TagResult<T> = Result<T, TagError>;
