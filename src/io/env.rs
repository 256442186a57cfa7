//! Environment collaborator boundary.
//!
//! The [`Environment`] trait is the execute/upload/download contract the
//! orchestrator consumes. Sandbox provisioning is somebody else's problem;
//! this crate ships a local shell implementation and tests use scripted
//! environments.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::error::ExecutionTimeout;
use crate::io::process::run_command_with_timeout;

/// Result of one command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub output: String,
    pub returncode: i32,
}

/// Abstraction over execution backends.
///
/// A timeout must surface as an [`ExecutionTimeout`] error, never as a
/// silent zero-output success.
pub trait Environment {
    fn execute(
        &self,
        command: &str,
        cwd: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<ExecResult>;

    fn work_dir(&self) -> &Path;

    /// Whether upload/download are meaningful for this backend.
    fn supports_transfer(&self) -> bool {
        false
    }

    fn upload_dir(&self, _source: &Path, _target: &str) -> Result<()> {
        Err(anyhow!("this environment does not support uploads"))
    }

    fn download_dir(&self, _target: &Path) -> Result<()> {
        Err(anyhow!("this environment does not support downloads"))
    }
}

/// Shell execution on the host, rooted at a working directory.
pub struct LocalEnvironment {
    work_dir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl LocalEnvironment {
    pub fn new(work_dir: impl Into<PathBuf>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            work_dir: work_dir.into(),
            timeout,
            output_limit_bytes,
        }
    }
}

impl Environment for LocalEnvironment {
    #[instrument(skip_all, fields(command = command))]
    fn execute(
        &self,
        command: &str,
        cwd: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<ExecResult> {
        let timeout = timeout.unwrap_or(self.timeout);
        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(command)
            .current_dir(cwd.unwrap_or(&self.work_dir));

        let output = run_command_with_timeout(cmd, None, timeout, self.output_limit_bytes)
            .with_context(|| format!("execute '{command}'"))?;

        if output.timed_out {
            warn!(timeout_secs = timeout.as_secs(), "command timed out");
            return Err(anyhow::Error::new(ExecutionTimeout {
                command: command.to_string(),
                partial_output: output.combined_text(),
            }));
        }

        debug!(exit_code = ?output.status.code(), "command finished");
        Ok(ExecResult {
            output: output.combined_text(),
            returncode: output.status.code().unwrap_or(-1),
        })
    }

    fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn supports_transfer(&self) -> bool {
        true
    }

    fn upload_dir(&self, source: &Path, target: &str) -> Result<()> {
        let target = self.resolve(target);
        copy_dir(source, &target)
    }

    fn download_dir(&self, target: &Path) -> Result<()> {
        copy_dir(&self.work_dir, target)
    }
}

impl LocalEnvironment {
    fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.work_dir.join(p)
        }
    }
}

fn copy_dir(source: &Path, target: &Path) -> Result<()> {
    fs::create_dir_all(target).with_context(|| format!("create {}", target.display()))?;
    for entry in fs::read_dir(source).with_context(|| format!("read {}", source.display()))? {
        let entry = entry?;
        let dest = target.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &dest)?;
        } else {
            fs::copy(entry.path(), &dest)
                .with_context(|| format!("copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}
