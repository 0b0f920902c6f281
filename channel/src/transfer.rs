//! Direction, state, and the chunked transfer state machine.
//!
//! Grounded on `communications/memory_ring.rs`'s `read_next`/`copy_circular`
//! wrap-safe framing logic, generalized from a single-writer ring to the two
//! independent directions this protocol needs, with the in-band chunk header
//! this implementation always emits (SPEC_FULL.md §4.4.4, §9 Open Questions).

use shared::constants::{CHUNKED_HEADER_DELIM, CHUNKED_HEADER_TAG};
use shared::errors::{BridgeError, ProtocolError, SizeError};

/// Which region a transfer moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dir {
    HostToShell,
    ShellToHost,
}

impl Dir {
    pub fn is_h2s(self) -> bool {
        matches!(self, Dir::HostToShell)
    }

    pub fn label(self) -> &'static str {
        match self {
            Dir::HostToShell => "h2s",
            Dir::ShellToHost => "s2h",
        }
    }
}

/// Per-direction transfer state, mirrored in the header as a `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle = 0,
    Transfer = 1,
    Complete = 2,
}

impl State {
    pub fn from_u32(v: u32) -> Self {
        match v {
            1 => State::Transfer,
            2 => State::Complete,
            _ => State::Idle,
        }
    }
}

/// Everything learned from one `await_publication` call.
#[derive(Debug, Clone, Copy)]
pub struct PublicationInfo {
    pub seq: u64,
    pub length: u64,
    pub chunk_idx: u32,
    pub total: u64,
    pub chunk_size: u64,
}

impl PublicationInfo {
    pub fn is_chunked(&self) -> bool {
        self.total > 0
    }

    pub fn chunk_count(&self) -> u32 {
        if self.chunk_size == 0 {
            0
        } else {
            self.total.div_ceil(self.chunk_size) as u32
        }
    }
}

/// Split `total` bytes into chunks of at most `chunk_size`, returning the
/// number of chunks. Used by producers to precompute `N` before the loop in
/// SPEC_FULL.md §4.4.3.
pub fn chunk_count(total: u64, chunk_size: u64) -> Result<u32, SizeError> {
    if chunk_size == 0 {
        return Err(SizeError::InvalidChunkSize {
            chunk_size,
            frame_bytes: 0,
        });
    }
    Ok(total.div_ceil(chunk_size) as u32)
}

/// Byte range `[start, end)` of chunk `i` within the logical payload.
pub fn chunk_bounds(i: u32, total: u64, chunk_size: u64) -> (u64, u64) {
    let start = i as u64 * chunk_size;
    let end = (start + chunk_size).min(total);
    (start, end)
}

/// Build the literal ASCII tag prepended to chunk 0's payload:
/// `CHUNKED|<total>|<chunk_size>|<N>|`.
pub fn build_chunk_header(total: u64, chunk_size: u64, n: u32) -> Vec<u8> {
    let delim = CHUNKED_HEADER_DELIM as char;
    format!("{CHUNKED_HEADER_TAG}{delim}{total}{delim}{chunk_size}{delim}{n}{delim}").into_bytes()
}

/// Parse the in-band chunk header at the start of `data`, if present, and
/// return `(total, chunk_size, n, rest)`. Returns `None` if `data` does not
/// begin with the tag (the consumer already knows the shape out-of-band).
pub fn parse_chunk_header(
    channel: &str,
    data: &[u8],
) -> Result<Option<(u64, u64, u32, &[u8])>, ProtocolError> {
    let tag = CHUNKED_HEADER_TAG.as_bytes();
    if !data.starts_with(tag) {
        return Ok(None);
    }

    let delim = CHUNKED_HEADER_DELIM;
    let mut fields = Vec::with_capacity(3);
    let mut cursor = tag.len();
    for _ in 0..3 {
        let Some(rel) = data[cursor..].iter().position(|&b| b == delim) else {
            return Err(ProtocolError::MalformedChunkHeader {
                channel: channel.to_string(),
                reason: "missing delimiter in chunk header".to_string(),
            });
        };
        fields.push(&data[cursor..cursor + rel]);
        cursor += rel + 1;
    }

    let parse_u64 = |field: &[u8], name: &str| -> Result<u64, ProtocolError> {
        std::str::from_utf8(field)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| ProtocolError::MalformedChunkHeader {
                channel: channel.to_string(),
                reason: format!("field `{name}` is not a valid u64"),
            })
    };

    let total = parse_u64(fields[0], "total")?;
    let chunk_size = parse_u64(fields[1], "chunk_size")?;
    let n = parse_u64(fields[2], "n")? as u32;

    Ok(Some((total, chunk_size, n, &data[cursor..])))
}

/// Validate that an observed `chunk_idx` matches the expected running index
/// (SPEC_FULL.md §4.4.4 ordering requirement).
pub fn check_chunk_order(
    channel: &str,
    expected: u32,
    actual: u32,
) -> Result<(), ProtocolError> {
    if expected != actual {
        return Err(ProtocolError::ChunkOutOfOrder {
            channel: channel.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

pub(crate) fn size_check(payload_len: u64, frame_bytes: u64) -> Result<(), BridgeError> {
    if payload_len == 0 {
        return Err(SizeError::ZeroLength.into());
    }
    if payload_len > frame_bytes {
        return Err(SizeError::PayloadExceedsFrame {
            payload: payload_len,
            frame_bytes,
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_count_rounds_up() {
        assert_eq!(chunk_count(300, 128).unwrap(), 3);
        assert_eq!(chunk_count(256, 128).unwrap(), 2);
        assert_eq!(chunk_count(1, 128).unwrap(), 1);
    }

    #[test]
    fn chunk_count_rejects_zero_size() {
        assert!(chunk_count(10, 0).is_err());
    }

    #[test]
    fn chunk_bounds_last_chunk_is_short() {
        assert_eq!(chunk_bounds(0, 300, 128), (0, 128));
        assert_eq!(chunk_bounds(1, 300, 128), (128, 256));
        assert_eq!(chunk_bounds(2, 300, 128), (256, 300));
    }

    #[test]
    fn header_round_trips() {
        let header = build_chunk_header(300, 128, 3);
        assert_eq!(header, b"CHUNKED|300|128|3|");

        let mut framed = header.clone();
        framed.extend_from_slice(b"payload-bytes");

        let (total, chunk_size, n, rest) =
            parse_chunk_header("chan", &framed).unwrap().unwrap();
        assert_eq!((total, chunk_size, n), (300, 128, 3));
        assert_eq!(rest, b"payload-bytes");
    }

    #[test]
    fn absent_header_returns_none() {
        assert!(parse_chunk_header("chan", b"plain bytes").unwrap().is_none());
    }

    #[test]
    fn malformed_header_is_an_error() {
        assert!(parse_chunk_header("chan", b"CHUNKED|not-a-number|128|3|").is_err());
    }

    #[test]
    fn chunk_order_mismatch_is_fatal() {
        assert!(check_chunk_order("chan", 2, 3).is_err());
        assert!(check_chunk_order("chan", 2, 2).is_ok());
    }

    #[test]
    fn size_check_accepts_exact_frame_capacity() {
        assert!(size_check(4, 4).is_ok());
    }

    #[test]
    fn size_check_rejects_one_byte_over_capacity() {
        assert!(size_check(5, 4).is_err());
    }

    #[test]
    fn size_check_rejects_zero_length() {
        assert!(size_check(0, 4).is_err());
    }
}
