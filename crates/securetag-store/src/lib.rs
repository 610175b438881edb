//! Object store access for securetag.
//!
//! This crate talks to git's object database the way the hash engines need:
//! a single long-lived `git cat-file --batch` process per repository root,
//! with lookups pipelined through it and answers streamed back in order.
//!
//! # Components
//!
//! - [`ObjectStreamReader`] -- incremental decoder for the batch response stream
//! - [`BatchSession`] / [`ObjectHandle`] -- pipelined query client
//! - [`parse_tree`] / [`parse_tree_sorted`] -- binary tree object codec
//! - [`ObjectSource`] -- opens sessions per repository root
//!   ([`GitObjectSource`] for real repositories, [`MemoryObjectSource`] for tests)
//! - [`GitConfig`] -- how git is invoked
//!
//! # Design Rules
//!
//! 1. Responses are matched to requests strictly in FIFO order.
//! 2. Nothing is cached: every query is a fresh lookup.
//! 3. A malformed response poisons the session; every pending query fails.
//! 4. Sessions are released on close and on drop, never leaked.

pub mod config;
pub mod error;
pub mod memory;
pub mod reader;
pub mod session;
pub mod source;
pub mod tree;

pub use config::{GitConfig, GIT_ENV_VAR};
pub use error::{StoreError, StoreResult};
pub use memory::{MemoryObjectSource, MemoryRepo};
pub use reader::{ObjectStreamReader, StreamEvent, MAX_HEADER_LEN};
pub use session::{BatchSession, ObjectHandle, ObjectHeader};
pub use source::{GitObjectSource, ObjectSource};
pub use tree::{encode_tree, parse_tree, parse_tree_sorted, TreeEntry, SUBMODULE_MODE, TREE_MODE};
