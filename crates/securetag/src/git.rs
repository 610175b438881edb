//! One-shot git commands.

use std::path::Path;
use std::process::Stdio;

use securetag_store::GitConfig;
use securetag_types::ObjectId;
use tracing::debug;

use crate::error::{TagError, TagResult};

/// Captured output of a successful command.
#[derive(Clone, Debug, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run `git <args>` in `cwd` and capture its output.
///
/// A non-zero exit, or running past the configured command timeout, is an
/// [`TagError::ExternalCommand`].
pub async fn run(config: &GitConfig, cwd: &Path, args: &[&str]) -> TagResult<CommandOutput> {
    let command = format!("{} {}", config.program_name(), args.join(" "));
    let mut cmd = config.command(cwd);
    cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
    debug!(cwd = %cwd.display(), command = %command, "running git");

    let output = match config.command_timeout {
        Some(limit) => tokio::time::timeout(limit, cmd.output())
            .await
            .map_err(|_| TagError::ExternalCommand {
                command: command.clone(),
                status: format!("timed out after {limit:?}"),
                stderr: String::new(),
            })??,
        None => cmd.output().await?,
    };

    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if !output.status.success() {
        return Err(TagError::ExternalCommand {
            command,
            status: output.status.to_string(),
            stderr,
        });
    }
    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr,
    })
}

/// The tag's description: `git verify-tag -v`, or `git show` when the
/// signature is not to be checked.
pub async fn describe_tag(
    config: &GitConfig,
    dir: &Path,
    tag: &str,
    insecure: bool,
) -> TagResult<CommandOutput> {
    if insecure {
        run(config, dir, &["show", tag]).await
    } else {
        run(config, dir, &["verify-tag", "-v", tag]).await
    }
}

/// Arguments for creating a tag.
#[derive(Clone, Debug)]
pub struct TagArgs<'a> {
    pub tag: &'a str,
    pub reference: Option<&'a str>,
    pub message: &'a str,
    pub key: Option<&'a str>,
    pub sign: bool,
    pub force: bool,
}

impl TagArgs<'_> {
    /// The `git tag` argument list.
    pub fn to_args(&self) -> Vec<&str> {
        let mut args = vec!["tag", "-m", self.message];
        match self.key {
            Some(key) => args.extend(["-u", key]),
            None if self.sign => args.push("-s"),
            None => {}
        }
        if self.force {
            args.push("-f");
        }
        args.push(self.tag);
        if let Some(reference) = self.reference {
            args.push(reference);
        }
        args
    }
}

/// Create the tag.
pub async fn create_tag(config: &GitConfig, dir: &Path, args: &TagArgs<'_>) -> TagResult<()> {
    run(config, dir, &args.to_args()).await?;
    Ok(())
}

/// Write the index as a tree and return its id.
pub async fn write_tree(config: &GitConfig, dir: &Path) -> TagResult<ObjectId> {
    let output = run(config, dir, &["write-tree"]).await?;
    let line = output.stdout.trim();
    line.parse().map_err(|_| TagError::UnexpectedOutput {
        command: "git write-tree".into(),
        output: line.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args<'a>() -> TagArgs<'a> {
        TagArgs {
            tag: "v1",
            reference: None,
            message: "msg",
            key: None,
            sign: true,
            force: false,
        }
    }

    #[test]
    fn signed_by_default() {
        assert_eq!(args().to_args(), ["tag", "-m", "msg", "-s", "v1"]);
    }

    #[test]
    fn key_replaces_default_signing() {
        let a = TagArgs {
            key: Some("ABCD1234"),
            ..args()
        };
        assert_eq!(a.to_args(), ["tag", "-m", "msg", "-u", "ABCD1234", "v1"]);
    }

    #[test]
    fn insecure_force_with_reference() {
        let a = TagArgs {
            sign: false,
            force: true,
            reference: Some("HEAD^"),
            ..args()
        };
        assert_eq!(a.to_args(), ["tag", "-m", "msg", "-f", "v1", "HEAD^"]);
    }

    #[tokio::test]
    async fn missing_program_is_io_error() {
        let config = GitConfig {
            program: "/nonexistent/securetag-git".into(),
            ..GitConfig::default()
        };
        let err = run(&config, Path::new("."), &["--version"]).await.unwrap_err();
        assert!(matches!(err, TagError::Io(_)));
    }
}
