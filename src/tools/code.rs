//! Sandboxed script execution
//!
//! Writes generated code to a scratch file and runs it in a subprocess with
//! a hard wall-clock timeout. The interpreter is configurable so tests can
//! run with a shell instead of a full Python install.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::CONFIG;

use super::{ExecOutcome, Sandbox};

pub struct PythonSandbox {
    interpreter: String,
    timeout: Duration,
}

impl PythonSandbox {
    pub fn new() -> Self {
        Self {
            interpreter: CONFIG.sandbox_interpreter.clone(),
            timeout: Duration::from_secs(CONFIG.sandbox_timeout_secs),
        }
    }

    pub fn with_interpreter(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self { interpreter: interpreter.into(), timeout }
    }

    fn failure(error: impl Into<String>) -> ExecOutcome {
        ExecOutcome { success: false, output: String::new(), error: Some(error.into()) }
    }
}

impl Default for PythonSandbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sandbox for PythonSandbox {
    async fn run(&self, code: &str) -> ExecOutcome {
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => return Self::failure(format!("Failed to create sandbox dir: {e}")),
        };
        let script_path = dir.path().join("script.py");
        if let Err(e) = tokio::fs::write(&script_path, code).await {
            return Self::failure(format!("Failed to write script: {e}"));
        }

        debug!(interpreter = %self.interpreter, "running sandboxed script ({} bytes)", code.len());
        let child = Command::new(&self.interpreter)
            .arg(&script_path)
            .current_dir(dir.path())
            .env("PYTHONPATH", "")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Self::failure(format!("Failed to launch interpreter: {e}")),
            Err(_) => {
                warn!("sandboxed script exceeded {}s limit", self.timeout.as_secs());
                return Self::failure(format!(
                    "Code execution timed out after {} seconds",
                    self.timeout.as_secs()
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if output.status.success() {
            ExecOutcome { success: true, output: stdout, error: None }
        } else {
            ExecOutcome {
                success: false,
                output: stdout,
                error: Some(if stderr.is_empty() {
                    format!("Process exited with {}", output.status)
                } else {
                    stderr
                }),
            }
        }
    }
}
