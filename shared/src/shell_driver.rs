//! The seam between this crate and the shell driver (out of scope, SPEC_FULL.md §1).
//!
//! Launching the PowerShell child process, submitting commands to it, and
//! demultiplexing its stdout/stderr is someone else's problem. This trait is
//! the entire contract the facade needs from that collaborator: hand it a
//! command string, get back what the shell printed and whether it errored.

use async_trait::async_trait;
use std::time::Duration;

/// What a single shell command produced.
#[derive(Debug, Clone, Default)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl ShellOutput {
    pub fn is_error(&self) -> bool {
        !self.stderr.is_empty() || matches!(self.exit_code, Some(code) if code != 0)
    }
}

/// Submits a single command string to a running shell session and reports
/// what came back. Implementations own process lifetime, line framing, and
/// stdout/stderr demultiplexing; none of that is this crate's concern.
#[async_trait]
pub trait ShellDriver: Send + Sync {
    /// True once the shell process is running and ready to accept commands.
    fn is_running(&self) -> bool;

    /// Start the shell process if it is not already running.
    async fn start(&self) -> Result<(), crate::errors::ShellError>;

    /// Submit `command` and await its completion, or `timeout` elapsing.
    ///
    /// `raise_on_error` mirrors the convention used throughout the shell-side
    /// protocol vocabulary callers (SPEC_FULL.md §4.5): when true, a non-zero
    /// exit or non-empty stderr is turned into `Err` instead of being returned
    /// in `ShellOutput` for the caller to inspect.
    async fn run(
        &self,
        command: &str,
        raise_on_error: bool,
        timeout: Option<Duration>,
    ) -> Result<ShellOutput, crate::errors::ShellError>;
}
