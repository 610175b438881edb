//! Digest headers inside tag messages.
//!
//! A tag declares its content digest on a line of its own:
//!
//! ```text
//! Git-EVTag-v0-SHA512: <128 hex digits>
//! ```
//!
//! or, for the legacy format, `Git-Secure-Tag-V0: <128 hex digits>`. Header
//! names match case-insensitively and whitespace around the colon is ignored.

use std::sync::OnceLock;

use regex::Regex;
use securetag_hash::DigestFormat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{TagError, TagResult};

/// A digest as declared in a tag message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredDigest {
    pub format: DigestFormat,
    pub digest: String,
}

fn header_regex() -> &'static Regex {
    static HEADER: OnceLock<Regex> = OnceLock::new();
    HEADER.get_or_init(|| {
        Regex::new(r"(?i)^Git-(EVTag-v0-SHA512|Secure-Tag-V0)\s*:\s*(.*)$")
            .expect("header pattern is valid")
    })
}

/// Find the declared digest in a tag description.
///
/// When a message carries both headers the current format wins; otherwise
/// the first matching line is used.
pub fn extract(text: &str) -> TagResult<DeclaredDigest> {
    let mut legacy = None;
    for line in text.split(['\r', '\n']) {
        let Some(caps) = header_regex().captures(line) else {
            continue;
        };
        let Some(format) = DigestFormat::from_header_name(&format!("Git-{}", &caps[1])) else {
            continue;
        };
        let declared = DeclaredDigest {
            format,
            digest: caps[2].to_string(),
        };
        match format {
            DigestFormat::Current => return Ok(declared),
            DigestFormat::Legacy => {
                legacy.get_or_insert(declared);
            }
        }
    }
    legacy.ok_or(TagError::NoDeclaredDigest)
}

/// The header line declaring `digest`, without a terminator.
pub fn compose(format: DigestFormat, digest: &str) -> String {
    format!("{}: {digest}", format.header_name())
}

/// Full tag message: the body (the tag name when absent), a blank line,
/// then the header.
pub fn compose_message(
    tag: &str,
    body: Option<&str>,
    format: DigestFormat,
    digest: &str,
) -> String {
    let body = match body {
        Some(body) => body.to_string(),
        None => format!("{tag}\n"),
    };
    format!("{body}\n{}\n", compose(format, digest))
}

/// Compare a declared digest with a freshly computed one.
pub fn verify_digest(declared: &DeclaredDigest, computed: &str) -> TagResult<()> {
    if declared.digest == computed {
        return Ok(());
    }
    debug!(format = %declared.format, declared = %declared.digest, computed, "digest mismatch");
    Err(TagError::DigestMismatch {
        format: declared.format,
        declared: declared.digest.clone(),
        computed: computed.to_string(),
    })
}
