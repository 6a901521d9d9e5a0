//! Process runner
//!
//! Runs interpreter processes for abilities. Every child is bounded by a
//! timeout and killed when the timeout fires.

use async_trait::async_trait;
use sdk::ability::{ProcessHandleImpl, ProcessOutput};
use sdk::errors::EngineError;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Interpreter used for Python scripts
pub const PYTHON: &str = "python";

pub struct ProcessRunner {
    python: String,
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            python: PYTHON.to_string(),
            timeout,
        }
    }

    /// Use a different interpreter binary
    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    /// Run `program args..` in `cwd` and capture its output
    pub async fn run(
        &self,
        program: &str,
        args: &[&std::ffi::OsStr],
        cwd: &std::path::Path,
    ) -> Result<ProcessOutput, EngineError> {
        debug!("Running {} {:?} in {:?}", program, args, cwd);

        let child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Workspace(format!("Failed to start {}: {}", program, e)))?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let result = ProcessOutput {
                    return_code: output.status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                };
                debug!("{} exited with {}", program, result.return_code);
                Ok(result)
            }
            Ok(Err(e)) => Err(EngineError::Io(e)),
            Err(_) => {
                // The future owning the child was dropped, which kills it.
                warn!(
                    "{} timed out after {} seconds",
                    program,
                    self.timeout.as_secs()
                );
                Err(EngineError::Timeout(self.timeout.as_secs()))
            }
        }
    }
}

#[async_trait]
impl ProcessHandleImpl for ProcessRunner {
    async fn run_python(
        &self,
        script: PathBuf,
        cwd: PathBuf,
    ) -> Result<ProcessOutput, EngineError> {
        self.run(&self.python, &[script.as_os_str()], &cwd).await
    }
}
