//! Error taxonomy for the bridge, one enum per kind in SPEC_FULL.md §7, unified
//! under [`BridgeError`].

use std::io;
use thiserror::Error;

/// Segment or event creation/open failed.
#[derive(Error, Debug)]
pub enum ChannelOpenError {
    #[error("failed to create or open shared segment `{name}`: {source}")]
    Segment { name: String, source: io::Error },

    #[error("shared segment `{name}` exists with frame_bytes={existing}, requested {requested}")]
    SizeMismatch {
        name: String,
        existing: u64,
        requested: u64,
    },

    #[error("failed to create or open named event `{name}`: {source}")]
    Event { name: String, source: io::Error },
}

/// Payload exceeds frame capacity, frame exceeds an implementation maximum, or
/// a zero-length publication was attempted.
#[derive(Error, Debug)]
pub enum SizeError {
    #[error("payload of {payload} bytes exceeds frame capacity of {frame_bytes} bytes")]
    PayloadExceedsFrame { payload: u64, frame_bytes: u64 },

    #[error("frame_bytes {requested} exceeds implementation maximum {max}")]
    FrameTooLarge { requested: u64, max: u64 },

    #[error("zero-length publication is rejected")]
    ZeroLength,

    #[error("chunk_size must be in (0, frame_bytes]; got chunk_size={chunk_size}, frame_bytes={frame_bytes}")]
    InvalidChunkSize { chunk_size: u64, frame_bytes: u64 },
}

/// A wait on `data_ready` or `ack` elapsed before the event was signaled.
#[derive(Error, Debug)]
#[error("timed out after {waited_ms} ms waiting for `{what}` on channel `{channel}`")]
pub struct Timeout {
    pub channel: String,
    pub what: &'static str,
    pub waited_ms: u32,
}

/// Chunk index out of order, a state-transition violation, or a malformed
/// in-band chunk header.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("channel `{channel}`: expected chunk_idx {expected}, got {actual}")]
    ChunkOutOfOrder {
        channel: String,
        expected: u32,
        actual: u32,
    },

    #[error("channel `{channel}`: direction `{dir}` is not IDLE/COMPLETE, cannot start a new transfer")]
    NotIdle { channel: String, dir: &'static str },

    #[error("channel `{channel}`: malformed in-band chunk header: {reason}")]
    MalformedChunkHeader { channel: String, reason: String },

    #[error("channel `{channel}`: read() requires a zero_copy publish; use pull()/fetch() instead")]
    RequiresZeroCopy { channel: String },
}

/// The shell command surfaced a non-zero exit code or a non-empty error stream.
#[derive(Error, Debug)]
#[error("shell command failed (exit={exit_code:?}): {stderr}")]
pub struct ShellError {
    pub exit_code: Option<i32>,
    pub stderr: String,
}

/// Operation attempted on a channel whose handle has already been released.
#[derive(Error, Debug)]
#[error("channel `{0}` is closed")]
pub struct Closed(pub String);

/// Top-level error returned by the facade, unifying every taxonomy entry.
///
/// `Contradictory` covers the case in SPEC_FULL.md §7 where the channel and the
/// shell disagree (e.g. the shell reports success but the channel times out):
/// both sources are carried rather than one being silently dropped.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error(transparent)]
    ChannelOpen(#[from] ChannelOpenError),

    #[error(transparent)]
    Size(#[from] SizeError),

    #[error(transparent)]
    Timeout(#[from] Timeout),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Shell(#[from] ShellError),

    #[error(transparent)]
    Closed(#[from] Closed),

    #[error("contradictory result: channel reported {channel}, shell reported {shell}")]
    Contradictory {
        channel: Box<BridgeError>,
        shell: Box<BridgeError>,
    },
}

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors from loading and validating `BridgeConfig` (SPEC_FULL.md §10.4).
/// Kept separate from [`BridgeError`]: a config load failure happens before
/// any channel exists and is never something a channel operation returns.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file `{path}`: {source}")]
    Io { path: std::path::PathBuf, source: io::Error },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Validation(String),
}
