//! A `ShellDriver` test double that implements the Protocol Vocabulary
//! (SPEC_FULL.md §4.6) against an in-process shell-role [`ChannelHandle`]
//! instead of spawning real `powershell.exe`.
//!
//! Real PowerShell evaluation is out of scope (SPEC_FULL.md §1: "the script
//! fragments injected into the shell ... their code is not [specified
//! here]"). This driver implements only as much evaluation as the end-to-end
//! scenarios in SPEC_FULL.md §8 exercise: integer ranges (`"0..9"`) and the
//! literal text of any other command, UTF-8 encoded. Everything else --
//! channel I/O, variable binding, chunking, the `run_command_into_buffer`
//! measure-then-write handshake -- is real, driven through the same
//! `channel` crate the host side uses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use channel::{ChannelHandle, Dir};
use shared::constants::{DEFAULT_CHUNK_SIZE_BYTES, DEFAULT_CHUNK_THRESHOLD_BYTES};
use shared::shell_driver::{ShellDriver, ShellOutput};
use shell_proto::{parse, ParsedCommand};

const MEASURE_PREFIX: &str = "$__result = ";
const MEASURE_SUFFIX: &str = "[Console]::Out.Write($__bytes.Length)";
const WRITE_BYTES_SUFFIX: &str = ".WriteBytes($__bytes)";

/// Shell-side state: named variables bound by `Import`/`NewWriteableBuffer`,
/// and the one session-scoped `$__bytes` slot `run_command_into_buffer`'s
/// two-phase handshake writes through.
pub struct LoopbackShellDriver {
    running: AtomicBool,
    variables: Mutex<HashMap<String, Vec<u8>>>,
    buffers: Mutex<HashMap<String, ChannelHandle>>,
    last_measured: Mutex<Option<Vec<u8>>>,
    default_timeout: Duration,
}

impl LoopbackShellDriver {
    pub fn new(default_timeout: Duration) -> Self {
        LoopbackShellDriver {
            running: AtomicBool::new(false),
            variables: Mutex::new(HashMap::new()),
            buffers: Mutex::new(HashMap::new()),
            last_measured: Mutex::new(None),
            default_timeout,
        }
    }

    /// The value bound by a prior `Import`, for tests that want to assert on
    /// what the shell side received without a second channel round-trip.
    pub fn variable(&self, name: &str) -> Option<Vec<u8>> {
        self.variables.lock().unwrap().get(name).cloned()
    }

    /// Seed a shell-side variable directly, standing in for PowerShell
    /// assignment the real shell side would otherwise perform. Lets tests
    /// exercise `pull`/`fetch`'s variable-reference path without a PowerShell
    /// evaluator.
    pub fn set_variable(&self, name: &str, bytes: Vec<u8>) {
        self.variables.lock().unwrap().insert(name.to_string(), bytes);
    }

    fn dispatch(&self, command: &str, timeout: Duration) -> Result<String, String> {
        if let Some(parsed) = parse(command) {
            return self.dispatch_vocabulary(parsed, timeout);
        }
        if let Some(rest) = command.strip_prefix(MEASURE_PREFIX) {
            return self.dispatch_measure(rest, timeout);
        }
        if let Some(var) = command
            .strip_suffix(WRITE_BYTES_SUFFIX)
            .and_then(|v| v.strip_prefix('$'))
        {
            return self.dispatch_write_bytes(var, timeout);
        }
        Err(format!("loopback shell does not recognize: {command}"))
    }

    fn dispatch_vocabulary(&self, parsed: ParsedCommand, timeout: Duration) -> Result<String, String> {
        match parsed {
            ParsedCommand::Import(cmd) => {
                let handle = ChannelHandle::open_shell(&cmd.channel_name).map_err(|e| e.to_string())?;
                let bytes = handle
                    .read_any(Dir::HostToShell, Some(timeout))
                    .map_err(|e| e.to_string())?;
                self.variables.lock().unwrap().insert(cmd.variable, bytes);
                Ok(String::new())
            }
            ParsedCommand::ExportVarBytes(cmd) => {
                let bytes = self
                    .variables
                    .lock()
                    .unwrap()
                    .get(&cmd.variable)
                    .cloned()
                    .ok_or_else(|| format!("undefined variable `{}`", cmd.variable))?;
                self.publish_to_host(&cmd.channel_name, &bytes, timeout)?;
                Ok(String::new())
            }
            ParsedCommand::CopyVariable(cmd) => {
                let bytes = self
                    .variables
                    .lock()
                    .unwrap()
                    .get(&cmd.variable)
                    .cloned()
                    .ok_or_else(|| format!("undefined variable `{}`", cmd.variable))?;
                self.publish_to_host(&cmd.channel_name, &bytes, timeout)?;
                Ok(String::new())
            }
            ParsedCommand::Export(cmd) => {
                let bytes = evaluate(&cmd.command);
                self.publish_to_host(&cmd.channel_name, &bytes, timeout)?;
                Ok(String::new())
            }
            ParsedCommand::NewWriteableBuffer(cmd) => {
                let handle = ChannelHandle::open_shell(&cmd.channel_name).map_err(|e| e.to_string())?;
                self.buffers.lock().unwrap().insert(cmd.variable, handle);
                Ok(String::new())
            }
        }
    }

    /// `run_command_into_buffer`'s phase one: evaluate the embedded command,
    /// stash the resulting bytes as the session's `$__bytes`, and report only
    /// the byte count, mirroring the PowerShell script's own
    /// `[Console]::Out.Write($__bytes.Length)` tail.
    fn dispatch_measure(&self, rest: &str, _timeout: Duration) -> Result<String, String> {
        if !rest.trim_end().ends_with(MEASURE_SUFFIX) {
            return Err(format!("unrecognized measure script: {rest}"));
        }
        let command = rest.split('\n').next().unwrap_or("").trim();
        let bytes = evaluate(command);
        let len = bytes.len();
        *self.last_measured.lock().unwrap() = Some(bytes);
        Ok(len.to_string())
    }

    /// `run_command_into_buffer`'s phase two: write the bytes computed in
    /// phase one into the buffer variable `create_buffer` bound earlier.
    fn dispatch_write_bytes(&self, var: &str, timeout: Duration) -> Result<String, String> {
        let bytes = self
            .last_measured
            .lock()
            .unwrap()
            .take()
            .ok_or("WriteBytes referenced $__bytes before a measure script ran")?;
        self.write_bound_buffer(var, &bytes, timeout)?;
        Ok(String::new())
    }

    /// Simulate the shell side of `create_buffer`'s "shell writes N bytes via
    /// V" contract (SPEC_FULL.md §8 round-trip law) for a variable previously
    /// bound by `NewWriteableBuffer`. Exposed publicly for integration tests
    /// that exercise `create_buffer` end to end without a real PowerShell
    /// `$var.WriteBytes(...)` call.
    pub fn write_bound_buffer(&self, variable: &str, bytes: &[u8], timeout: Duration) -> Result<(), String> {
        let handle = self
            .buffers
            .lock()
            .unwrap()
            .remove(variable)
            .ok_or_else(|| format!("undefined writeable buffer variable `{variable}`"))?;
        write_to_shell(&handle, bytes, timeout)
    }

    fn publish_to_host(&self, channel_name: &str, bytes: &[u8], timeout: Duration) -> Result<(), String> {
        let handle = ChannelHandle::open_shell(channel_name).map_err(|e| e.to_string())?;
        write_to_shell(&handle, bytes, timeout)
    }
}

fn write_to_shell(handle: &ChannelHandle, bytes: &[u8], timeout: Duration) -> Result<(), String> {
    if bytes.len() as u64 > DEFAULT_CHUNK_THRESHOLD_BYTES {
        handle
            .write_chunked(Dir::ShellToHost, bytes, DEFAULT_CHUNK_SIZE_BYTES, Some(timeout))
            .map_err(|e| e.to_string())
    } else {
        handle
            .write_single(Dir::ShellToHost, bytes, Some(timeout))
            .map_err(|e| e.to_string())
    }
}

/// Integer range literal (`"0..9"`) per SPEC_FULL.md §8 scenario 3; anything
/// else is returned as its own UTF-8 bytes, which is enough for the commands
/// this test double is ever asked to evaluate (a bound variable reference or
/// a fixed literal supplied by a test).
fn evaluate(expr: &str) -> Vec<u8> {
    let expr = expr.trim();
    if let Some((a, b)) = expr.split_once("..") {
        if let (Ok(a), Ok(b)) = (a.trim().parse::<i64>(), b.trim().parse::<i64>()) {
            let mut out = String::new();
            let range: Box<dyn Iterator<Item = i64>> = if a <= b {
                Box::new(a..=b)
            } else {
                Box::new((b..=a).rev())
            };
            for i in range {
                out.push_str(&i.to_string());
                out.push('\n');
            }
            return out.into_bytes();
        }
    }
    expr.as_bytes().to_vec()
}

#[async_trait]
impl ShellDriver for LoopbackShellDriver {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    async fn start(&self) -> Result<(), shared::errors::ShellError> {
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    async fn run(
        &self,
        command: &str,
        raise_on_error: bool,
        timeout: Option<Duration>,
    ) -> Result<ShellOutput, shared::errors::ShellError> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        match self.dispatch(command, timeout) {
            Ok(stdout) => Ok(ShellOutput {
                stdout,
                stderr: String::new(),
                exit_code: Some(0),
            }),
            Err(reason) if raise_on_error => Err(shared::errors::ShellError {
                exit_code: Some(1),
                stderr: reason,
            }),
            Err(reason) => Ok(ShellOutput {
                stdout: String::new(),
                stderr: reason,
                exit_code: Some(1),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluate_handles_ascending_range() {
        assert_eq!(evaluate("0..9"), b"0\n1\n2\n3\n4\n5\n6\n7\n8\n9\n".to_vec());
    }

    #[test]
    fn evaluate_falls_back_to_literal_text() {
        assert_eq!(evaluate("hello"), b"hello".to_vec());
    }

    #[test]
    fn measure_script_shape_is_recognized() {
        let rest = "0..9\nif ($__result -is [byte[]]) { $__bytes = $__result }\nelseif ($__result -is [string]) { $__bytes = [System.Text.Encoding]::UTF8.GetBytes($__result) }\nelse { $__bytes = [System.Text.Encoding]::UTF8.GetBytes(($__result | Out-String)) }\n[Console]::Out.Write($__bytes.Length)";
        let driver = LoopbackShellDriver::new(Duration::from_secs(1));
        let count = driver.dispatch_measure(rest, Duration::from_secs(1)).unwrap();
        assert_eq!(count, "20");
    }
}
