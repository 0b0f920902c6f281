//! The Host-side Bridge Facade (SPEC_FULL.md §4.5): the ergonomic surface a
//! host caller uses — `publish`, `read`, `pull`, `create_buffer`, `fetch`,
//! `run_command_into_buffer` — expressed in terms of [`channel::ChannelHandle`]
//! and the out-of-scope [`ShellDriver`] seam.
//!
//! Grounded on `shared_memory_bridge.py`'s `SharedMemoryBridge` class
//! (`publish`/`read`/`pull`/`create_buffer`/`fetch`) and `fast_bridge.py`'s
//! auto-chunking threshold, reimplemented against `channel::ChannelHandle`
//! instead of a ctypes DLL and ad-hoc polling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use channel::{ChannelHandle, Dir, WritableView};
use shared::constants::{
    CHANNEL_NAME_PREFIX, DEFAULT_CHUNK_SIZE_BYTES, DEFAULT_CHUNK_THRESHOLD_BYTES,
    DEFAULT_FRAME_BYTES,
};
use shared::errors::{BridgeError, BridgeResult, SizeError};
use shared::format::{Format, FormatToken};
use shared::shell_driver::ShellDriver;
use shell_proto::{
    looks_like_variable_reference, CopyVariableCommand, ExportCommand, ExportVarBytesCommand,
    ImportCommand, NewWriteableBufferCommand,
};

/// What `publish` returned: enough to `read` it back or hand to a caller.
#[derive(Debug, Clone)]
pub struct PublishResult {
    pub channel_name: String,
    pub frame_bytes: u64,
    pub length: u64,
    pub sequence: u64,
    pub zero_copy: bool,
}

fn new_channel_name(suffix: &str) -> String {
    format!("{CHANNEL_NAME_PREFIX}{suffix}_{}", uuid::Uuid::new_v4().simple())
}

/// Default `pull` timeout per SPEC_FULL.md §6: `max(30s, 2s/MiB * frame_bytes)`.
fn default_pull_timeout(frame_bytes: u64) -> Duration {
    const MIB: u64 = 1024 * 1024;
    let mib = frame_bytes.div_ceil(MIB).max(1);
    Duration::from_secs(30.max(mib * 2))
}

/// The facade itself: a shell driver plus a one-time "protocol vocabulary
/// loaded" flag owned here rather than bolted onto the driver (SPEC_FULL.md
/// §9 "Hidden globals on the shell driver").
pub struct BridgeFacade {
    shell: Arc<dyn ShellDriver>,
    default_frame_bytes: u64,
    chunk_threshold_bytes: u64,
    chunk_size_bytes: u64,
    ready: AtomicBool,
    runtime: tokio::runtime::Handle,
    /// Channels kept alive past `publish`'s return because the shell holds a
    /// zero-copy wrapper over them (SPEC_FULL.md §4.5: "the producer must
    /// then keep the segment alive for the variable's lifetime"). Released by
    /// `close_published`.
    zero_copy_channels: Mutex<HashMap<String, ChannelHandle>>,
}

impl BridgeFacade {
    pub fn new(shell: Arc<dyn ShellDriver>, runtime: tokio::runtime::Handle) -> Self {
        BridgeFacade {
            shell,
            default_frame_bytes: DEFAULT_FRAME_BYTES,
            chunk_threshold_bytes: DEFAULT_CHUNK_THRESHOLD_BYTES,
            chunk_size_bytes: DEFAULT_CHUNK_SIZE_BYTES,
            ready: AtomicBool::new(false),
            runtime,
            zero_copy_channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_defaults(
        shell: Arc<dyn ShellDriver>,
        runtime: tokio::runtime::Handle,
        default_frame_bytes: u64,
        chunk_threshold_bytes: u64,
        chunk_size_bytes: u64,
    ) -> Self {
        BridgeFacade {
            shell,
            default_frame_bytes,
            chunk_threshold_bytes,
            chunk_size_bytes,
            ready: AtomicBool::new(false),
            runtime,
            zero_copy_channels: Mutex::new(HashMap::new()),
        }
    }

    /// Release a channel kept alive by a prior `zero_copy=true` publish. The
    /// caller is expected to call this once no side still holds a view over
    /// the variable it bound (SPEC_FULL.md §4.5).
    pub fn close_published(&self, channel_name: &str) {
        if let Some(handle) = self
            .zero_copy_channels
            .lock()
            .unwrap()
            .remove(channel_name)
        {
            handle.close();
        }
    }

    /// Start the shell session if it is not already running. Loading the
    /// actual PowerShell script fragments that implement the shell side is
    /// out of scope (SPEC_FULL.md §1); this only guards the one piece that
    /// *is* this crate's concern, starting the driver, and does so once.
    async fn ensure_ready(&self) -> BridgeResult<()> {
        if self.ready.load(Ordering::Acquire) {
            return Ok(());
        }
        if !self.shell.is_running() {
            self.shell
                .start()
                .await
                .map_err(BridgeError::from)?;
        }
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Bridge an async shell-command submission with the blocking channel
    /// waits the Transfer Engine performs on the calling thread, per
    /// SPEC_FULL.md §10.2: never block the shell driver's own executor, only
    /// the thread that called into the facade.
    fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    /// Submit `command` to the shell and drive a blocking channel operation
    /// concurrently, per SPEC_FULL.md §5 "A host operation that wants overlap
    /// with shell work submits the shell command through an asynchronous
    /// interface that returns a completion future, while driving the channel
    /// side on the calling thread or a dedicated worker": whichever side of a
    /// given call is the Transfer Engine producer blocks on `await_ack` until
    /// the other side (running concurrently, here as the shell command) does
    /// its own wait/read/ack. Running them sequentially would deadlock.
    ///
    /// `blocking` runs on a dedicated worker thread (never the runtime's own
    /// executor thread, per §5's "spawns at most one dedicated worker thread
    /// ... for blocking channel waits").
    ///
    /// `blocking` reports its own outcome as a `BridgeResult<T>` rather than
    /// a bare `T` so this function can see both sides' results before
    /// deciding what to return: per SPEC_FULL.md §7/§10.3, when the channel
    /// side and the shell side disagree -- both failed, for different
    /// reasons -- the facade surfaces both via `BridgeError::Contradictory`
    /// instead of silently dropping one.
    fn run_shell_concurrent<T, F>(
        &self,
        command: &str,
        timeout: Option<Duration>,
        blocking: F,
    ) -> BridgeResult<T>
    where
        F: FnOnce() -> BridgeResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let rendered = command.to_string();
        let shell = Arc::clone(&self.shell);
        let (blocking_out, shell_out) = self.block_on(async move {
            let blocking_task = tokio::task::spawn_blocking(blocking);
            let shell_task = shell.run(&rendered, true, timeout);
            tokio::join!(blocking_task, shell_task)
        });

        let blocking_result = blocking_out.expect("channel worker thread panicked");

        let shell_result: BridgeResult<()> = match shell_out {
            Err(source) => Err(BridgeError::from(source)),
            Ok(output) if output.is_error() => Err(shared::errors::ShellError {
                exit_code: output.exit_code,
                stderr: output.stderr,
            }
            .into()),
            Ok(_) => Ok(()),
        };

        match (blocking_result, shell_result) {
            (Ok(t), Ok(())) => Ok(t),
            (Ok(_), Err(shell_err)) => Err(shell_err),
            (Err(channel_err), Ok(())) => Err(channel_err),
            (Err(channel_err), Err(shell_err)) => Err(BridgeError::Contradictory {
                channel: Box::new(channel_err),
                shell: Box::new(shell_err),
            }),
        }
    }

    /// `publish(payload, target_variable, format, ...)` (SPEC_FULL.md §4.5).
    pub fn publish(
        &self,
        payload: &[u8],
        target_variable: &str,
        format: Format,
        frame_bytes: Option<u64>,
        channel_name: Option<String>,
        zero_copy: bool,
        timeout: Option<Duration>,
    ) -> BridgeResult<PublishResult> {
        self.block_on(self.ensure_ready())?;

        if payload.is_empty() {
            return Err(SizeError::ZeroLength.into());
        }
        let frame_bytes = frame_bytes.unwrap_or(payload.len() as u64).max(1);
        if payload.len() as u64 > frame_bytes {
            return Err(SizeError::PayloadExceedsFrame {
                payload: payload.len() as u64,
                frame_bytes,
            }
            .into());
        }
        let name = channel_name.unwrap_or_else(|| new_channel_name("publish"));
        let handle = ChannelHandle::open_host(&name, frame_bytes)?;

        let fmt_token = if zero_copy {
            FormatToken::ZeroCopy
        } else {
            format.token()
        };
        let cmd = ImportCommand {
            channel_name: name.clone(),
            frame_bytes,
            format: fmt_token,
            encoding: format.encoding().to_string(),
            variable: target_variable.to_string(),
        };

        // The Import command (SPEC_FULL.md §4.6) waits on `data_ready_h2s`,
        // reads, and acks; the write below blocks on that same ack. Both
        // must run at once.
        let chunked = payload.len() as u64 > self.chunk_threshold_bytes;
        let chunk_size = self.chunk_size_bytes;
        let write_payload = payload.to_vec();
        let handle = self.run_shell_concurrent(&cmd.render(), timeout, move || {
            let res = if chunked {
                handle.write_chunked(Dir::HostToShell, &write_payload, chunk_size, timeout)
            } else {
                handle.write_single(Dir::HostToShell, &write_payload, timeout)
            };
            res.map(|()| handle)
        })?;
        let sequence = handle.seq(Dir::HostToShell);

        if zero_copy {
            self.zero_copy_channels
                .lock()
                .unwrap()
                .insert(name.clone(), handle);
        }

        Ok(PublishResult {
            channel_name: name,
            frame_bytes,
            length: payload.len() as u64,
            sequence,
            zero_copy,
        })
    }

    /// `read(PublishResult) -> View` (SPEC_FULL.md §4.5). Valid only for a
    /// `zero_copy` publish: maps the same host->shell region read-only. No
    /// ack is involved (the shell hasn't consumed it, just bound a wrapper
    /// over it), so the returned [`OwnedView`] borrows the region directly
    /// rather than copying it out -- the whole point of `zero_copy=true` is
    /// that a multi-hundred-MiB payload is read without a second memcpy on
    /// top of the one shared-memory mapping.
    pub fn read(&self, result: &PublishResult) -> BridgeResult<OwnedView> {
        if !result.zero_copy {
            return Err(shared::errors::ProtocolError::RequiresZeroCopy {
                channel: result.channel_name.clone(),
            }
            .into());
        }
        if result.length > result.frame_bytes {
            return Err(SizeError::PayloadExceedsFrame {
                payload: result.length,
                frame_bytes: result.frame_bytes,
            }
            .into());
        }
        let handle = ChannelHandle::open_shell(&result.channel_name)?;
        let ptr = handle.region_base(Dir::HostToShell);
        Ok(OwnedView {
            _handle: handle,
            ptr,
            len: result.length as usize,
        })
    }

    /// `pull(source_variable, frame_bytes, timeout?) -> View` (SPEC_FULL.md §4.5).
    pub fn pull(
        &self,
        source_variable: &str,
        frame_bytes: u64,
        timeout: Option<Duration>,
    ) -> BridgeResult<Vec<u8>> {
        self.block_on(self.ensure_ready())?;

        let timeout = timeout.unwrap_or_else(|| default_pull_timeout(frame_bytes));
        let name = new_channel_name("pull");
        let handle = ChannelHandle::open_host(&name, frame_bytes)?;

        let var_ref = looks_like_variable_reference(source_variable)
            .map(str::to_string)
            .unwrap_or_else(|| source_variable.trim_start_matches('$').to_string());
        let cmd = CopyVariableCommand {
            channel_name: name,
            frame_bytes,
            variable: var_ref,
        };

        // `Copy-VariableToSharedMemory` (SPEC_FULL.md §4.6) is itself a
        // producer on the s2h direction: it writes, publishes, and blocks on
        // `ack`. The host's read below is what supplies that ack, so the two
        // must run concurrently or the shell command never returns.
        self.run_shell_concurrent(&cmd.render(), Some(timeout), move || {
            handle.read_single(Dir::ShellToHost, Some(timeout))
        })
    }

    /// `create_buffer(size, target_variable) -> WritableView` (SPEC_FULL.md §4.5).
    pub fn create_buffer<'h>(
        &self,
        handle: &'h ChannelHandle,
        target_variable: &str,
        timeout: Option<Duration>,
    ) -> BridgeResult<WritableView<'h>> {
        self.block_on(self.ensure_ready())?;

        let cmd = NewWriteableBufferCommand {
            channel_name: handle.name().to_string(),
            frame_bytes: handle.frame_bytes(),
            variable: target_variable.to_string(),
        };
        self.run_shell(&cmd.render(), timeout)?;

        Ok(handle.writable_view(Dir::ShellToHost))
    }

    /// `fetch(command, format, ...) -> value` (SPEC_FULL.md §4.5). Returns the
    /// raw decoded bytes; callers apply `Format`-specific decoding (text/JSON)
    /// on top, since that conversion lives outside the channel's byte-exact
    /// contract (§1).
    pub fn fetch(
        &self,
        command: &str,
        format: Format,
        frame_bytes: Option<u64>,
        timeout: Option<Duration>,
    ) -> BridgeResult<Vec<u8>> {
        self.block_on(self.ensure_ready())?;

        let frame_bytes = frame_bytes.unwrap_or(self.default_frame_bytes);
        let name = new_channel_name("fetch");
        let handle = ChannelHandle::open_host(&name, frame_bytes)?;

        let rendered = if let Some(var_ref) = looks_like_variable_reference(command) {
            ExportVarBytesCommand {
                channel_name: name,
                frame_bytes,
                variable: var_ref.to_string(),
                encoding: format.encoding().to_string(),
            }
            .render()
        } else {
            ExportCommand {
                channel_name: name,
                frame_bytes,
                format: format.token(),
                encoding: format.encoding().to_string(),
                command: command.to_string(),
            }
            .render()
        };
        // `Export*` (SPEC_FULL.md §4.6) is a producer on the s2h direction
        // and blocks on `ack`; the host's read below supplies it, so both
        // must run concurrently.
        self.run_shell_concurrent(&rendered, timeout, move || {
            handle.read_single(Dir::ShellToHost, timeout)
        })
    }

    /// `run_command_into_buffer(command, timeout?) -> View` (SPEC_FULL.md
    /// §4.5): measure the exact byte length in the shell first, then transfer
    /// only that many bytes instead of guessing a frame size up front.
    ///
    /// Two shell round-trips, mirroring `shared_memory_bridge.py`'s
    /// `run_command`: the first evaluates `command`, converts the result to
    /// bytes the same way `Export-SharedMemoryData` does, and reports only
    /// the byte count over the shell driver's own stdout capture (no channel
    /// exists yet to size). The second allocates a buffer sized exactly to
    /// that count via `create_buffer` and has the shell copy the
    /// already-computed `$__bytes` into it; both runs share the shell's
    /// persistent session scope, so `$__bytes` survives between them.
    pub fn run_command_into_buffer(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> BridgeResult<Vec<u8>> {
        self.block_on(self.ensure_ready())?;

        let measure_script = format!(
            "$__result = {command}\n\
             if ($__result -is [byte[]]) {{ $__bytes = $__result }}\n\
             elseif ($__result -is [string]) {{ $__bytes = [System.Text.Encoding]::UTF8.GetBytes($__result) }}\n\
             else {{ $__bytes = [System.Text.Encoding]::UTF8.GetBytes(($__result | Out-String)) }}\n\
             [Console]::Out.Write($__bytes.Length)"
        );
        let output = self
            .block_on(self.shell.run(&measure_script, true, timeout))
            .map_err(BridgeError::from)?;
        if output.is_error() {
            return Err(shared::errors::ShellError {
                exit_code: output.exit_code,
                stderr: output.stderr,
            }
            .into());
        }
        let exact_size: u64 = output.stdout.trim().parse().map_err(|_| {
            shared::errors::ShellError {
                exit_code: output.exit_code,
                stderr: format!(
                    "could not parse measured byte count from `{}`",
                    output.stdout.trim()
                ),
            }
        })?;
        if exact_size == 0 {
            return Ok(Vec::new());
        }

        let name = new_channel_name("run");
        let handle = ChannelHandle::open_host(&name, exact_size)?;
        let var = format!("global:__vsbridge_run_{}", uuid::Uuid::new_v4().simple());
        self.create_buffer(&handle, &var, timeout)?;

        // `$var.WriteBytes(...)` drives the same s2h producer path as
        // `Export*`/`CopyVariableToSharedMemory`: it blocks on `ack`, which
        // the host read below supplies, so both must run concurrently.
        self.run_shell_concurrent(&format!("${var}.WriteBytes($__bytes)"), timeout, move || {
            handle.read_single(Dir::ShellToHost, timeout)
        })
    }

    fn run_shell(&self, command: &str, timeout: Option<Duration>) -> BridgeResult<()> {
        let output = self
            .block_on(self.shell.run(command, true, timeout))
            .map_err(BridgeError::from)?;
        if output.is_error() {
            return Err(shared::errors::ShellError {
                exit_code: output.exit_code,
                stderr: output.stderr,
            }
            .into());
        }
        Ok(())
    }
}

/// Owning wrapper the facade hands back for a zero-copy read, erasing the
/// borrow-from-channel lifetime per SPEC_FULL.md §9 "Cyclic references /
/// lifetimes": it keeps the channel handle (and with it the OS mapping)
/// alive for as long as the view lives, and exposes a slice directly over
/// the mapped region instead of an owned copy. Moving `ChannelHandle` only
/// moves the small Rust-side struct; the pointer always refers to the
/// kernel-mapped region, which does not move with it, so the pointer stays
/// valid for the lifetime of `_handle`.
pub struct OwnedView {
    _handle: ChannelHandle,
    ptr: *const u8,
    len: usize,
}

unsafe impl Send for OwnedView {}
unsafe impl Sync for OwnedView {}

impl OwnedView {
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::ops::Deref for OwnedView {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_timeout_floor_is_thirty_seconds() {
        assert_eq!(default_pull_timeout(1024), Duration::from_secs(30));
    }

    #[test]
    fn pull_timeout_scales_with_mib() {
        assert_eq!(
            default_pull_timeout(20 * 1024 * 1024),
            Duration::from_secs(40)
        );
    }

    #[test]
    fn channel_names_carry_the_bridge_prefix() {
        let name = new_channel_name("publish");
        assert!(name.starts_with("vsbridge_publish_"));
    }

    /// A `ShellDriver` whose every command fails, used to exercise the
    /// contradictory-signal path (SPEC_FULL.md §7/§10.3) without a real
    /// channel timeout.
    struct FailingShellDriver;

    #[async_trait::async_trait]
    impl ShellDriver for FailingShellDriver {
        fn is_running(&self) -> bool {
            true
        }

        async fn start(&self) -> Result<(), shared::errors::ShellError> {
            Ok(())
        }

        async fn run(
            &self,
            _command: &str,
            _raise_on_error: bool,
            _timeout: Option<Duration>,
        ) -> Result<shared::shell_driver::ShellOutput, shared::errors::ShellError> {
            Err(shared::errors::ShellError {
                exit_code: Some(1),
                stderr: "shell side failed".to_string(),
            })
        }
    }

    #[test]
    fn both_sides_failing_surfaces_contradictory_error() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("current-thread runtime");
        let facade = BridgeFacade::new(Arc::new(FailingShellDriver), runtime.handle().clone());

        let result: BridgeResult<()> = facade.run_shell_concurrent(
            "noop",
            Some(Duration::from_millis(50)),
            || Err(SizeError::ZeroLength.into()),
        );

        match result {
            Err(BridgeError::Contradictory { channel, shell }) => {
                assert!(matches!(*channel, BridgeError::Size(SizeError::ZeroLength)));
                assert!(matches!(*shell, BridgeError::Shell(_)));
            }
            other => panic!("expected Contradictory, got {other:?}"),
        }
    }
}
