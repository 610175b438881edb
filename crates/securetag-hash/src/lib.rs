//! Content digests over git object graphs.
//!
//! Two incompatible formats are supported, each behind the [`DigestEngine`]
//! trait:
//!
//! - [`CurrentHasher`] -- `Git-EVTag-v0-SHA512`: one streaming SHA-512 over
//!   every reachable object's framing and body, tree entries in stored order.
//! - [`LegacyHasher`] -- `Git-Secure-Tag-V0`: a sorted canonical listing of
//!   the tree, blobs and submodules reduced to their own digests, folded
//!   into one SHA-512.
//!
//! Both descend into submodules through a fresh session on the submodule's
//! working directory and release every session they open, on success and on
//! failure alike. Errors carry the chain of tree entries, commits, tags and
//! submodules they unwound through.

pub mod current;
pub mod error;
pub mod format;
pub mod legacy;
pub mod object;

pub use current::CurrentHasher;
pub use error::{Breadcrumb, HashError, HashErrorKind, HashResult};
pub use format::{DigestEngine, DigestFormat, HashOptions, CURRENT_HEADER, LEGACY_HEADER};
pub use legacy::{CanonicalContent, CanonicalNode, CanonicalTree, LegacyHasher};
pub use object::find_reference;
