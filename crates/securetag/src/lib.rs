//! Content-integrity digests for git tags.
//!
//! A signed tag only covers the commit id it points at, and so, through
//! SHA-1, the rest of the history. securetag strengthens that by declaring
//! a SHA-512 digest of every object reachable from the tagged commit,
//! submodules included, inside the tag message. Verifying recomputes the
//! digest and compares.
//!
//! ```no_run
//! # async fn demo() -> securetag::TagResult<()> {
//! use securetag::{SecureTag, SignOptions, VerifyOptions};
//!
//! let repo = SecureTag::new("/path/to/repo");
//! repo.sign("v1.0", None, &SignOptions::default()).await?;
//! let verified = repo.verify("v1.0", &VerifyOptions::default()).await?;
//! println!("{}: {}", verified.format, verified.digest);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod error;
pub mod git;
pub mod message;

pub use api::{SecureTag, SignOptions, Verification, VerifyOptions};
pub use error::{TagError, TagResult};
pub use message::{compose, compose_message, extract, verify_digest, DeclaredDigest};

pub use securetag_hash::{DigestFormat, HashError, HashOptions};
pub use securetag_store::{GitConfig, StoreError};
pub use securetag_types::{ObjectId, ObjectKind};
