use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use securetag_store::ObjectSource;
use serde::{Deserialize, Serialize};

use crate::current::CurrentHasher;
use crate::error::HashResult;
use crate::legacy::LegacyHasher;

/// Header name of the current digest format.
pub const CURRENT_HEADER: &str = "Git-EVTag-v0-SHA512";
/// Header name of the legacy digest format.
pub const LEGACY_HEADER: &str = "Git-Secure-Tag-V0";

/// The two digest formats a tag message can declare.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestFormat {
    /// Streaming SHA-512 over every reachable object, `Git-EVTag-v0-SHA512`.
    #[default]
    Current,
    /// Canonical-listing digest, `Git-Secure-Tag-V0`.
    Legacy,
}

impl DigestFormat {
    /// The header name used in tag messages.
    pub fn header_name(&self) -> &'static str {
        match self {
            Self::Current => CURRENT_HEADER,
            Self::Legacy => LEGACY_HEADER,
        }
    }

    /// Match a header name case-insensitively.
    pub fn from_header_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case(CURRENT_HEADER) {
            Some(Self::Current)
        } else if name.eq_ignore_ascii_case(LEGACY_HEADER) {
            Some(Self::Legacy)
        } else {
            None
        }
    }

    /// An engine computing this format over `source`.
    pub fn engine<S>(self, source: S, options: HashOptions) -> Box<dyn DigestEngine>
    where
        S: ObjectSource + 'static,
    {
        match self {
            Self::Current => Box::new(CurrentHasher::with_options(source, options)),
            Self::Legacy => Box::new(LegacyHasher::with_options(source, options)),
        }
    }
}

impl fmt::Display for DigestFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header_name())
    }
}

/// Knobs shared by both engines.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashOptions {
    /// Upper bound on one whole computation, submodules included.
    pub deadline: Option<Duration>,
}

impl HashOptions {
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }
}

/// A digest algorithm over a repository's object graph.
#[async_trait]
pub trait DigestEngine: Send + Sync {
    fn format(&self) -> DigestFormat;

    /// Lowercase hex digest of everything reachable from `reference`
    /// in the repository at `root`.
    async fn compute(&self, root: &Path, reference: &str) -> HashResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_names() {
        assert_eq!(DigestFormat::Current.header_name(), "Git-EVTag-v0-SHA512");
        assert_eq!(DigestFormat::Legacy.to_string(), "Git-Secure-Tag-V0");
    }

    #[test]
    fn header_lookup_ignores_case() {
        assert_eq!(
            DigestFormat::from_header_name("git-evtag-V0-sha512"),
            Some(DigestFormat::Current)
        );
        assert_eq!(
            DigestFormat::from_header_name("GIT-SECURE-TAG-V0"),
            Some(DigestFormat::Legacy)
        );
        assert_eq!(DigestFormat::from_header_name("Git-Random-Hash"), None);
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let opts: HashOptions = serde_json::from_str("{}").unwrap();
        assert!(opts.deadline.is_none());
        let opts: HashOptions =
            serde_json::from_str(r#"{"deadline": {"secs": 2, "nanos": 0}}"#).unwrap();
        assert_eq!(opts, HashOptions::with_deadline(Duration::from_secs(2)));
    }

    #[test]
    fn format_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&DigestFormat::Legacy).unwrap(), "\"legacy\"");
    }
}
