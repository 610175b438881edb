use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable naming the git executable.
pub const GIT_ENV_VAR: &str = "SECURETAG_GIT";

/// How to invoke git.
///
/// Passed explicitly to every session and one-shot command; nothing is read
/// from the process environment unless [`GitConfig::from_env`] is used.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Path or name of the git executable.
    pub program: PathBuf,
    /// Extra environment variables for every git invocation.
    pub env: Vec<(String, String)>,
    /// Deadline for one-shot commands (`verify-tag`, `tag`, `write-tree`).
    pub command_timeout: Option<Duration>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("git"),
            env: Vec::new(),
            command_timeout: None,
        }
    }
}

impl GitConfig {
    /// Default configuration, with the program taken from `SECURETAG_GIT` when set.
    pub fn from_env() -> Self {
        match std::env::var_os(GIT_ENV_VAR) {
            Some(program) if !program.is_empty() => Self {
                program: PathBuf::from(program),
                ..Default::default()
            },
            _ => Self::default(),
        }
    }

    /// Builder-style helper to add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// A git command rooted at `cwd` with all pipes closed.
    ///
    /// Callers opt into the pipes they need. The child is killed if the
    /// handle is dropped.
    pub fn command(&self, cwd: &Path) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.current_dir(cwd)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Program name for diagnostics.
    pub fn program_name(&self) -> String {
        self.program.display().to_string()
    }
}
