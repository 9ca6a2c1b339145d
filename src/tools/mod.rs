//! External computation tools
//!
//! Two trait seams: [`ComputeTool`] for the symbolic-math API and
//! [`Sandbox`] for local code execution. The pipeline only sees the traits,
//! so tests can substitute deterministic fakes.

pub mod code;
pub mod wolfram;

pub use code::PythonSandbox;
pub use wolfram::WolframTool;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Monthly quota exceeded ({used}/{limit})")]
    QuotaExceeded { used: i64, limit: i64 },
    #[error("{0}")]
    NoResult(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Symbolic computation backend (Wolfram Alpha in production).
#[async_trait]
pub trait ComputeTool: Send + Sync {
    /// Evaluate a query and return formatted pod text.
    async fn query(&self, input: &str) -> Result<String, ToolError>;

    /// Whether the monthly quota still has room.
    async fn quota_ok(&self) -> bool;

    /// `(used, limit)` for the current month.
    async fn quota_usage(&self) -> (i64, i64);
}

/// Result of running a script in the sandbox.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

/// Local script execution backend.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn run(&self, code: &str) -> ExecOutcome;
}
