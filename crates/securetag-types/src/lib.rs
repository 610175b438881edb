//! Foundation types for securetag.
//!
//! This crate provides the identifiers shared by every other securetag crate:
//! the 20-byte git object id and the four git object kinds.
//!
//! # Key Types
//!
//! - [`ObjectId`] -- SHA-1 object name as stored by git (40 hex characters)
//! - [`ObjectKind`] -- `blob`, `tree`, `commit` or `tag`

pub mod error;
pub mod object;

pub use error::TypeError;
pub use object::{is_object_hex, ObjectId, ObjectKind, OBJECT_ID_LEN};
