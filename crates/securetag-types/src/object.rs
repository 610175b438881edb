use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Length in bytes of a raw object id.
pub const OBJECT_ID_LEN: usize = 20;

/// Git object name.
///
/// An `ObjectId` is the SHA-1 name git assigns to a blob, tree, commit or tag.
/// securetag never computes these: they are read from `cat-file` headers,
/// tree entries, and the `object`/`tree` lines of tags and commits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId([u8; OBJECT_ID_LEN]);

impl ObjectId {
    /// Create an `ObjectId` from raw bytes.
    pub const fn from_raw(bytes: [u8; OBJECT_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Create an `ObjectId` from a slice, as found inside tree objects.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        let arr: [u8; OBJECT_ID_LEN] =
            bytes.try_into().map_err(|_| TypeError::InvalidLength {
                expected: OBJECT_ID_LEN,
                actual: bytes.len(),
            })?;
        Ok(Self(arr))
    }

    /// The null object ID (all zeros).
    pub const fn null() -> Self {
        Self([0u8; OBJECT_ID_LEN])
    }

    /// Returns `true` if this is the null object ID.
    pub fn is_null(&self) -> bool {
        self.0 == [0u8; OBJECT_ID_LEN]
    }

    /// The raw 20-byte name.
    pub fn as_bytes(&self) -> &[u8; OBJECT_ID_LEN] {
        &self.0
    }

    /// Lowercase hex representation, as git prints it.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 7 characters).
    pub fn short_hex(&self) -> String {
        let mut s = self.to_hex();
        s.truncate(7);
        s
    }

    /// Parse from a 40-character hex string.
    ///
    /// Only lowercase digits are accepted: git never prints uppercase object
    /// names and the digest formats depend on the exact text.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        if !is_object_hex(s.as_bytes()) {
            if s.len() != OBJECT_ID_LEN * 2 {
                return Err(TypeError::InvalidLength {
                    expected: OBJECT_ID_LEN * 2,
                    actual: s.len(),
                });
            }
            return Err(TypeError::InvalidHex(s.to_string()));
        }
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

/// Returns `true` if `s` is exactly 40 lowercase hex characters.
pub fn is_object_hex(s: &[u8]) -> bool {
    s.len() == OBJECT_ID_LEN * 2 && s.iter().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.short_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; OBJECT_ID_LEN]> for ObjectId {
    fn from(bytes: [u8; OBJECT_ID_LEN]) -> Self {
        Self(bytes)
    }
}

/// The kind of a git object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    /// File contents.
    Blob,
    /// Directory listing.
    Tree,
    /// Snapshot pointing at a root tree.
    Commit,
    /// Annotated tag pointing at another object.
    Tag,
}

impl ObjectKind {
    /// The type name git uses on the wire and in object headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
            Self::Tag => "tag",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blob" => Ok(Self::Blob),
            "tree" => Ok(Self::Tree),
            "commit" => Ok(Self::Commit),
            "tag" => Ok(Self::Tag),
            other => Err(TypeError::UnknownKind(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

    #[test]
    fn hex_roundtrip() {
        let id = ObjectId::from_hex(HEX).unwrap();
        assert_eq!(id.to_hex(), HEX);
        assert_eq!(format!("{id}"), HEX);
    }

    #[test]
    fn uppercase_hex_rejected() {
        let upper = HEX.to_uppercase();
        assert!(matches!(ObjectId::from_hex(&upper), Err(TypeError::InvalidHex(_))));
    }

    #[test]
    fn wrong_length_rejected() {
        let err = ObjectId::from_hex("abcd").unwrap_err();
        assert_eq!(err, TypeError::InvalidLength { expected: 40, actual: 4 });
    }

    #[test]
    fn from_slice_checks_length() {
        assert!(ObjectId::from_slice(&[0u8; 19]).is_err());
        assert!(ObjectId::from_slice(&[7u8; 20]).is_ok());
    }

    #[test]
    fn short_hex_is_7_chars() {
        let id = ObjectId::from_hex(HEX).unwrap();
        assert_eq!(id.short_hex(), "4b825dc");
        assert_eq!(format!("{id:?}"), "ObjectId(4b825dc)");
    }

    #[test]
    fn null_is_all_zeros() {
        assert!(ObjectId::null().is_null());
        assert!(!ObjectId::from_hex(HEX).unwrap().is_null());
    }

    #[test]
    fn kind_parses_git_names() {
        for kind in [ObjectKind::Blob, ObjectKind::Tree, ObjectKind::Commit, ObjectKind::Tag] {
            assert_eq!(kind.as_str().parse::<ObjectKind>().unwrap(), kind);
        }
        assert_eq!(
            "missing".parse::<ObjectKind>(),
            Err(TypeError::UnknownKind("missing".into()))
        );
    }

    #[test]
    fn serde_uses_git_names() {
        let json = serde_json::to_string(&ObjectKind::Commit).unwrap();
        assert_eq!(json, "\"commit\"");
        let id = ObjectId::from_hex(HEX).unwrap();
        let parsed: ObjectId = serde_json::from_str(&serde_json::to_string(&id).unwrap()).unwrap();
        assert_eq!(parsed, id);
    }
}
