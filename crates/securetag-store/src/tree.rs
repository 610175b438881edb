//! Binary tree object codec.
//!
//! A tree body is a run of `"<mode> <name>\0<20 raw id bytes>"` records with
//! no separators between them.

use securetag_types::{ObjectId, OBJECT_ID_LEN};

use crate::error::{StoreError, StoreResult};

/// Mode of a submodule link (gitlink).
pub const SUBMODULE_MODE: &str = "160000";
/// Mode of a subtree, as git writes it (no leading zero).
pub const TREE_MODE: &str = "40000";

/// A single entry of a tree object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    /// Octal mode as written in the tree, e.g. `100644`.
    pub mode: String,
    /// Entry name, decoded lossily as UTF-8.
    pub name: String,
    /// Referenced object: blob, tree, or a commit in the submodule's store.
    pub id: ObjectId,
}

impl TreeEntry {
    pub fn new(mode: impl Into<String>, name: impl Into<String>, id: ObjectId) -> Self {
        Self {
            mode: mode.into(),
            name: name.into(),
            id,
        }
    }

    /// Gitlink entries point into a nested repository.
    pub fn is_submodule(&self) -> bool {
        self.mode == SUBMODULE_MODE
    }

    pub fn is_subtree(&self) -> bool {
        self.mode == TREE_MODE
    }

    /// The name as a `Git-Secure-Tag-V0` listing records it: the text before
    /// the first space.
    pub fn listing_name(&self) -> &str {
        self.name.split(' ').next().unwrap_or_default()
    }

    /// Append the binary record for this entry to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.mode.as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.name.as_bytes());
        out.push(0);
        out.extend_from_slice(self.id.as_bytes());
    }
}

/// Parse a tree body, keeping the on-disk entry order.
pub fn parse_tree(body: &[u8]) -> StoreResult<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    let mut off = 0;
    while off < body.len() {
        let nul = body[off..]
            .iter()
            .position(|&b| b == 0)
            .map(|p| off + p)
            .ok_or_else(|| {
                StoreError::MalformedTree(format!("entry name at offset {off} is not terminated"))
            })?;

        let header = &body[off..nul];
        let split = header.iter().position(|&b| b == b' ').ok_or_else(|| {
            StoreError::MalformedTree(format!("entry at offset {off} has no mode separator"))
        })?;
        let mode = String::from_utf8_lossy(&header[..split]).into_owned();
        let name = String::from_utf8_lossy(&header[split + 1..]).into_owned();

        off = nul + 1;
        if off + OBJECT_ID_LEN > body.len() {
            return Err(StoreError::MalformedTree(format!(
                "not enough space for the id of entry {name:?}"
            )));
        }
        let id = ObjectId::from_slice(&body[off..off + OBJECT_ID_LEN])
            .map_err(|e| StoreError::MalformedTree(e.to_string()))?;
        off += OBJECT_ID_LEN;

        entries.push(TreeEntry { mode, name, id });
    }
    Ok(entries)
}

/// Parse a tree body and sort the entries by [`TreeEntry::listing_name`],
/// comparing UTF-16 code units.
///
/// The sort is stable: entries whose listing names collide keep their
/// on-disk order.
pub fn parse_tree_sorted(body: &[u8]) -> StoreResult<Vec<TreeEntry>> {
    let mut entries = parse_tree(body)?;
    entries.sort_by(|a, b| {
        a.listing_name()
            .encode_utf16()
            .cmp(b.listing_name().encode_utf16())
    });
    Ok(entries)
}

/// Encode entries in the given order.
pub fn encode_tree(entries: &[TreeEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in entries {
        entry.encode_into(&mut out);
    }
    out
}
