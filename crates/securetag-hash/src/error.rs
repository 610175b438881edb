use std::fmt;

use securetag_store::StoreError;
use securetag_types::ObjectId;

/// What went wrong, without the traversal context.
#[derive(Debug, thiserror::Error)]
pub enum HashErrorKind {
    /// Lookup, protocol or session failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An object does not have the shape its position in the graph requires.
    #[error("malformed object {id}: {reason}")]
    MalformedObject { id: ObjectId, reason: String },
}

/// One traversal frame an error passed through on its way out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Breadcrumb {
    /// A tree entry, by path relative to its repository root.
    Entry(String),
    Commit(ObjectId),
    Tag(ObjectId),
    /// A submodule, by path relative to the enclosing repository root.
    Submodule(String),
}

impl fmt::Display for Breadcrumb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entry(path) => write!(f, "tree entry `{path}`"),
            Self::Commit(id) => write!(f, "commit {id}"),
            Self::Tag(id) => write!(f, "tag {id}"),
            Self::Submodule(path) => write!(f, "submodule at `{path}`"),
        }
    }
}

/// A digest computation failure plus the frames it unwound through,
/// innermost first.
#[derive(Debug)]
pub struct HashError {
    kind: HashErrorKind,
    trail: Vec<Breadcrumb>,
}

impl HashError {
    pub fn new(kind: HashErrorKind) -> Self {
        Self {
            kind,
            trail: Vec::new(),
        }
    }

    pub fn malformed(id: ObjectId, reason: impl fmt::Display) -> Self {
        Self::new(HashErrorKind::MalformedObject {
            id,
            reason: reason.to_string(),
        })
    }

    /// Record that the error left through `crumb`.
    ///
    /// Idempotent: a frame that annotates twice still shows up once.
    pub fn within(mut self, crumb: Breadcrumb) -> Self {
        if self.trail.last() != Some(&crumb) {
            self.trail.push(crumb);
        }
        self
    }

    pub fn kind(&self) -> &HashErrorKind {
        &self.kind
    }

    pub fn trail(&self) -> &[Breadcrumb] {
        &self.trail
    }

    /// The store error underneath, if any.
    pub fn store_error(&self) -> Option<&StoreError> {
        match &self.kind {
            HashErrorKind::Store(err) => Some(err),
            HashErrorKind::MalformedObject { .. } => None,
        }
    }
}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for crumb in &self.trail {
            write!(f, "\n    while loading {crumb}")?;
        }
        Ok(())
    }
}

impl std::error::Error for HashError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.store_error()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<HashErrorKind> for HashError {
    fn from(kind: HashErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<StoreError> for HashError {
    fn from(err: StoreError) -> Self {
        Self::new(HashErrorKind::Store(err))
    }
}

/// Result alias for digest computations.
pub type HashResult<T> = Result<T, HashError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_is_idempotent_per_frame() {
        let err = HashError::from(StoreError::ObjectMissing("abc".into()))
            .within(Breadcrumb::Entry("a/b".into()))
            .within(Breadcrumb::Entry("a/b".into()))
            .within(Breadcrumb::Entry("a".into()));
        assert_eq!(
            err.trail(),
            &[Breadcrumb::Entry("a/b".into()), Breadcrumb::Entry("a".into())]
        );
    }

    #[test]
    fn display_renders_trail_innermost_first() {
        let err = HashError::from(StoreError::ObjectMissing("abc".into()))
            .within(Breadcrumb::Entry("src/main.rs".into()))
            .within(Breadcrumb::Submodule("lib/sub".into()));
        assert_eq!(
            err.to_string(),
            "missing object abc\n    while loading tree entry `src/main.rs`\n    while loading submodule at `lib/sub`"
        );
    }

    #[test]
    fn malformed_has_no_store_source() {
        let err = HashError::malformed(ObjectId::null(), "commit without `tree`");
        assert!(err.store_error().is_none());
        assert!(err.to_string().contains("commit without `tree`"));
    }
}
