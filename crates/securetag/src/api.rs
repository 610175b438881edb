use std::path::{Path, PathBuf};

use securetag_hash::{DigestFormat, HashOptions, LegacyHasher};
use securetag_store::{GitConfig, GitObjectSource};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::TagResult;
use crate::git::{self, TagArgs};
use crate::message::{compose_message, extract, verify_digest};

/// Options for [`SecureTag::verify`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyOptions {
    /// Read the tag with `git show` instead of checking its signature.
    pub insecure: bool,
    pub hash: HashOptions,
}

/// Options for [`SecureTag::sign`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignOptions {
    /// Declare a `Git-Secure-Tag-V0` digest instead of `Git-EVTag-v0-SHA512`.
    pub legacy: bool,
    /// Create an unsigned annotated tag.
    pub insecure: bool,
    /// Message body; defaults to the tag name.
    pub message: Option<String>,
    /// Signing key id, passed as `git tag -u`.
    pub key: Option<String>,
    /// Replace an existing tag of the same name.
    pub force: bool,
    pub hash: HashOptions,
}

impl SignOptions {
    pub fn format(&self) -> DigestFormat {
        if self.legacy {
            DigestFormat::Legacy
        } else {
            DigestFormat::Current
        }
    }
}

/// Outcome of a successful verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub format: DigestFormat,
    /// The digest, declared and recomputed alike.
    pub digest: String,
    /// What git reported about the signature (its stderr).
    pub signature_output: String,
}

/// Signing and verification of digest-carrying tags in one repository.
#[derive(Clone, Debug)]
pub struct SecureTag {
    dir: PathBuf,
    config: GitConfig,
}

impl SecureTag {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_config(dir, GitConfig::from_env())
    }

    pub fn with_config(dir: impl Into<PathBuf>, config: GitConfig) -> Self {
        Self {
            dir: dir.into(),
            config,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &GitConfig {
        &self.config
    }

    /// Compute the digest of `reference` without touching any tag.
    pub async fn digest(
        &self,
        format: DigestFormat,
        reference: &str,
        options: &HashOptions,
    ) -> TagResult<String> {
        let engine = format.engine(self.source(), options.clone());
        Ok(engine.compute(&self.dir, reference).await?)
    }

    /// Legacy digest of the staged index rather than a commit.
    pub async fn legacy_index_digest(&self, options: &HashOptions) -> TagResult<String> {
        let tree = git::write_tree(&self.config, &self.dir).await?;
        let hasher = LegacyHasher::with_options(self.source(), options.clone());
        Ok(hasher.compute_tree(&self.dir, tree).await?)
    }

    /// Check `tag`'s signature (unless insecure) and recompute its declared
    /// digest.
    pub async fn verify(&self, tag: &str, options: &VerifyOptions) -> TagResult<Verification> {
        let description = git::describe_tag(&self.config, &self.dir, tag, options.insecure).await?;
        let declared = extract(&description.stdout)?;
        let computed = self.digest(declared.format, tag, &options.hash).await?;
        verify_digest(&declared, &computed)?;
        info!(tag, format = %declared.format, digest = %computed, "good hash");
        Ok(Verification {
            format: declared.format,
            digest: computed,
            signature_output: description.stderr,
        })
    }

    /// Create `tag` at `reference` (HEAD when absent) declaring its digest.
    ///
    /// Returns the declared digest.
    pub async fn sign(
        &self,
        tag: &str,
        reference: Option<&str>,
        options: &SignOptions,
    ) -> TagResult<String> {
        let format = options.format();
        let digest = self
            .digest(format, reference.unwrap_or("HEAD"), &options.hash)
            .await?;
        let message = compose_message(tag, options.message.as_deref(), format, &digest);
        let args = TagArgs {
            tag,
            reference,
            message: &message,
            key: options.key.as_deref(),
            sign: !options.insecure,
            force: options.force,
        };
        git::create_tag(&self.config, &self.dir, &args).await?;
        info!(tag, reference = reference.unwrap_or("HEAD"), %format, "created tag");
        Ok(digest)
    }

    fn source(&self) -> GitObjectSource {
        GitObjectSource::new(self.config.clone())
    }
}
