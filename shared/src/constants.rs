//! Name derivation and wire-format constants shared by every crate that speaks
//! the bridge protocol. Keeping these in one place means the channel layer,
//! the shell-side command builders, and the host facade can never disagree on
//! spelling.

/// Default prefix used when the host does not supply an explicit channel name.
/// The convention is `vsbridge_<uuid-v4-hex>`; callers append the hex suffix.
pub const CHANNEL_NAME_PREFIX: &str = "vsbridge_";

/// Suffix appended to the channel name to derive the host->shell "data ready" event.
pub const SUFFIX_H2S_READY: &str = ".h2s.ready";
/// Suffix appended to the channel name to derive the host->shell "ack" event.
pub const SUFFIX_H2S_ACK: &str = ".h2s.ack";
/// Suffix appended to the channel name to derive the shell->host "data ready" event.
pub const SUFFIX_S2H_READY: &str = ".s2h.ready";
/// Suffix appended to the channel name to derive the shell->host "ack" event.
pub const SUFFIX_S2H_ACK: &str = ".s2h.ack";

/// Literal ASCII tag prepended to the first chunk of a chunked transfer.
///
/// Full form: `CHUNKED|<total>|<chunk_size>|<N>|` followed immediately by the
/// first chunk's payload bytes. Always emitted by the producer and always
/// parsed by the consumer (see SPEC_FULL.md Open Questions).
pub const CHUNKED_HEADER_TAG: &str = "CHUNKED";

/// Delimiter used between fields of the in-band chunked header.
pub const CHUNKED_HEADER_DELIM: u8 = b'|';

/// Format tokens recognized by the shell-side protocol vocabulary (external contract, §6).
pub const FORMAT_TOKEN_BYTES: &str = "Bytes";
pub const FORMAT_TOKEN_STRING: &str = "String";
pub const FORMAT_TOKEN_JSON: &str = "Json";
pub const FORMAT_TOKEN_ZERO_COPY: &str = "ZeroCopy";

/// Shell-side command names, emitted verbatim by the host (external contract, §6).
pub const CMD_IMPORT: &str = "Import-SharedMemoryData";
pub const CMD_EXPORT: &str = "Export-SharedMemoryData";
pub const CMD_EXPORT_VAR_BYTES: &str = "Export-SharedMemoryVarBytes";
pub const CMD_COPY_VARIABLE: &str = "Copy-VariableToSharedMemory";
pub const CMD_NEW_WRITEABLE_BUFFER: &str = "New-SharedMemoryWriteableBuffer";

/// Default frame size used by the facade when the caller does not specify one.
pub const DEFAULT_FRAME_BYTES: u64 = 1024 * 1024;

/// Default threshold above which `publish`/`send` switches to chunked mode.
pub const DEFAULT_CHUNK_THRESHOLD_BYTES: u64 = 256 * 1024 * 1024;

/// Default chunk size used once a transfer is chunked.
pub const DEFAULT_CHUNK_SIZE_BYTES: u64 = 128 * 1024 * 1024;
