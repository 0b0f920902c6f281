//! The Channel Handle: owns one process's segment mapping and event handles,
//! and exposes the primitives the Transfer Engine composes into single-shot
//! and chunked transfers.
//!
//! Grounded on `communications/ioctl.rs`'s `Device` RAII handle, generalized
//! from a single IOCTL-brokered handle to a pair of OS objects (segment +
//! events) opened together under one name.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use shared::errors::{BridgeError, ChannelOpenError, Closed, SizeError, Timeout};

use crate::events::{EventSet, WaitResult};
use crate::segment::{Header, SharedSegment};
use crate::transfer::{size_check, Dir, PublicationInfo, State};
use crate::view::RegionView;

/// Owns a segment mapping and its four events for one channel name.
pub struct ChannelHandle {
    name: String,
    segment: SharedSegment,
    events: EventSet,
    closed: AtomicBool,
}

impl ChannelHandle {
    /// Create the segment and events (host role). Idempotent: reopening the
    /// same name from the same or another process yields a distinct handle
    /// bound to the same OS objects.
    pub fn open_host(name: &str, frame_bytes: u64) -> Result<Self, ChannelOpenError> {
        let segment = SharedSegment::create(name, frame_bytes)?;
        let events = EventSet::create_or_open(name)?;
        Ok(ChannelHandle {
            name: name.to_string(),
            segment,
            events,
            closed: AtomicBool::new(false),
        })
    }

    /// Open an existing segment and its events (shell role).
    pub fn open_shell(name: &str) -> Result<Self, ChannelOpenError> {
        let segment = SharedSegment::open(name)?;
        let events = EventSet::create_or_open(name)?;
        Ok(ChannelHandle {
            name: name.to_string(),
            segment,
            events,
            closed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frame_bytes(&self) -> u64 {
        self.segment.frame_bytes()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Release this handle. The backing OS objects are dropped with this
    /// value; this only marks the handle unusable ahead of that so every
    /// other method can reject further calls (SPEC_FULL.md §7 `Closed`).
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn require_open(&self) -> Result<(), Closed> {
        if self.is_closed() {
            Err(Closed(self.name.clone()))
        } else {
            Ok(())
        }
    }

    fn header(&self) -> &Header {
        self.segment.header()
    }

    fn seq_word<'a>(&'a self, header: &'a Header, h2s: bool) -> &'a AtomicU64 {
        if h2s {
            &header.h2s_seq
        } else {
            &header.s2h_seq
        }
    }

    fn len_word<'a>(&'a self, header: &'a Header, h2s: bool) -> &'a AtomicU64 {
        if h2s {
            &header.h2s_len
        } else {
            &header.s2h_len
        }
    }

    fn total_word<'a>(&'a self, header: &'a Header, h2s: bool) -> &'a AtomicU64 {
        if h2s {
            &header.h2s_total
        } else {
            &header.s2h_total
        }
    }

    fn chunk_size_word<'a>(&'a self, header: &'a Header, h2s: bool) -> &'a AtomicU64 {
        if h2s {
            &header.h2s_chunk_size
        } else {
            &header.s2h_chunk_size
        }
    }

    fn chunk_idx_word<'a>(&'a self, header: &'a Header, h2s: bool) -> &'a AtomicU32 {
        if h2s {
            &header.h2s_chunk_idx
        } else {
            &header.s2h_chunk_idx
        }
    }

    fn state_word<'a>(&'a self, header: &'a Header, h2s: bool) -> &'a AtomicU32 {
        if h2s {
            &header.h2s_state
        } else {
            &header.s2h_state
        }
    }

    pub fn state(&self, dir: Dir) -> State {
        State::from_u32(self.state_word(self.header(), dir.is_h2s()).load(Ordering::Acquire))
    }

    /// Current write sequence number for `dir`, for callers that publish
    /// directly (e.g. the facade's `PublishResult.sequence`) rather than
    /// through `await_publication`.
    pub fn seq(&self, dir: Dir) -> u64 {
        self.seq_word(self.header(), dir.is_h2s()).load(Ordering::Acquire)
    }

    fn set_state(&self, dir: Dir, state: State) {
        self.state_word(self.header(), dir.is_h2s())
            .store(state as u32, Ordering::Release);
    }

    /// Copy `src` into `dir`'s region at `offset`. Never crosses regions: the
    /// caller picks the direction, this only bounds-checks against `frame_bytes`.
    pub fn write_region(&self, dir: Dir, src: &[u8], offset: u64) -> Result<(), BridgeError> {
        self.require_open()?;
        let frame_bytes = self.frame_bytes();
        let end = offset.checked_add(src.len() as u64);
        if !matches!(end, Some(e) if e <= frame_bytes) {
            return Err(SizeError::PayloadExceedsFrame {
                payload: end.unwrap_or(u64::MAX),
                frame_bytes,
            }
            .into());
        }

        let base = self.segment.region_ptr(dir.is_h2s());
        unsafe {
            let dst = base.add(offset as usize);
            std::ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len());
        }
        Ok(())
    }

    /// Atomically publish a chunk: set `len`/`chunk_idx`/`total`/`chunk_size`,
    /// transition state, bump `seq`, then signal `data_ready_<dir>`. Control
    /// words are release-stored before the event fires so a waking waiter
    /// observes them (SPEC_FULL.md §3 "written before `data_ready` is signaled").
    pub fn publish(
        &self,
        dir: Dir,
        length: u64,
        chunk_idx: u32,
        total: u64,
        chunk_size: u64,
        state: State,
    ) -> Result<(), BridgeError> {
        self.require_open()?;
        let header = self.header();
        let h2s = dir.is_h2s();

        self.len_word(header, h2s).store(length, Ordering::Relaxed);
        self.chunk_idx_word(header, h2s)
            .store(chunk_idx, Ordering::Relaxed);
        self.total_word(header, h2s).store(total, Ordering::Relaxed);
        self.chunk_size_word(header, h2s)
            .store(chunk_size, Ordering::Relaxed);
        self.state_word(header, h2s)
            .store(state as u32, Ordering::Relaxed);
        self.seq_word(header, h2s).fetch_add(1, Ordering::AcqRel);

        self.events.ready(h2s).signal();
        Ok(())
    }

    /// Wait for `data_ready_<dir>`, then acquire-load the control words.
    pub fn await_publication(
        &self,
        dir: Dir,
        timeout: Option<Duration>,
    ) -> Result<PublicationInfo, BridgeError> {
        self.require_open()?;
        let h2s = dir.is_h2s();
        let wait = self.events.ready(h2s).wait(timeout).map_err(|source| {
            ChannelOpenError::Event {
                name: self.name.clone(),
                source,
            }
        })?;
        match wait {
            WaitResult::Signaled => {}
            WaitResult::TimedOut => {
                self.close();
                return Err(Timeout {
                    channel: self.name.clone(),
                    what: "data_ready",
                    waited_ms: timeout.map(|d| d.as_millis() as u32).unwrap_or(u32::MAX),
                }
                .into());
            }
        }

        let header = self.header();
        Ok(PublicationInfo {
            seq: self.seq_word(header, h2s).load(Ordering::Acquire),
            length: self.len_word(header, h2s).load(Ordering::Acquire),
            chunk_idx: self.chunk_idx_word(header, h2s).load(Ordering::Acquire),
            total: self.total_word(header, h2s).load(Ordering::Acquire),
            chunk_size: self.chunk_size_word(header, h2s).load(Ordering::Acquire),
        })
    }

    /// Borrow `dir`'s region as `[0, length)`. Caller must drop (ack) the
    /// view before the next publication on this direction.
    pub fn view_region(&self, dir: Dir, length: u64) -> Result<RegionView<'_>, BridgeError> {
        self.require_open()?;
        let frame_bytes = self.frame_bytes();
        if length > frame_bytes {
            return Err(SizeError::PayloadExceedsFrame {
                payload: length,
                frame_bytes,
            }
            .into());
        }
        let base = self.segment.region_ptr(dir.is_h2s());
        let bytes = unsafe { std::slice::from_raw_parts(base, length as usize) };
        Ok(RegionView::new(self, dir, bytes))
    }

    /// Mutable borrow over `dir`'s full region, for `create_buffer`'s
    /// writer-wrapper contract (SPEC_FULL.md §4.5).
    pub fn view_region_mut(&self, dir: Dir) -> *mut u8 {
        self.segment.region_ptr(dir.is_h2s())
    }

    /// Base address of `dir`'s region, for a caller building a view that
    /// outlives any single [`RegionView`] borrow (SPEC_FULL.md §4.5 `read()`:
    /// the mapping, not a single chunk, is what the caller holds past the
    /// call). Unlike [`view_region`](Self::view_region) this performs no
    /// bounds check against a specific `length` and is not ack-gated; the
    /// caller is responsible for bounding reads to a `length` it already
    /// knows is valid (e.g. a `PublishResult.length`).
    pub fn region_base(&self, dir: Dir) -> *const u8 {
        self.segment.region_ptr(dir.is_h2s())
    }

    /// A writable borrow over `dir`'s full region, for `create_buffer`'s
    /// writer-wrapper contract (SPEC_FULL.md §4.5).
    pub fn writable_view(&self, dir: Dir) -> crate::view::WritableView<'_> {
        crate::view::WritableView::new(self, dir)
    }

    pub fn ack(&self, dir: Dir) {
        self.events.ack(dir.is_h2s()).signal();
    }

    pub fn await_ack(&self, dir: Dir, timeout: Option<Duration>) -> Result<(), BridgeError> {
        self.require_open()?;
        let wait = self.events.ack(dir.is_h2s()).wait(timeout).map_err(|source| {
            ChannelOpenError::Event {
                name: self.name.clone(),
                source,
            }
        })?;
        match wait {
            WaitResult::Signaled => Ok(()),
            WaitResult::TimedOut => {
                self.close();
                Err(Timeout {
                    channel: self.name.clone(),
                    what: "ack",
                    waited_ms: timeout.map(|d| d.as_millis() as u32).unwrap_or(u32::MAX),
                }
                .into())
            }
        }
    }

    /// Full single-shot producer step (SPEC_FULL.md §4.4.1): write, publish,
    /// await ack, return state to `IDLE`.
    pub fn write_single(
        &self,
        dir: Dir,
        payload: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(), BridgeError> {
        size_check(payload.len() as u64, self.frame_bytes())?;
        if self.state(dir) == State::Transfer {
            return Err(shared::errors::ProtocolError::NotIdle {
                channel: self.name.clone(),
                dir: dir.label(),
            }
            .into());
        }

        self.write_region(dir, payload, 0)?;
        self.publish(dir, payload.len() as u64, 0, 0, 0, State::Transfer)?;
        self.await_ack(dir, timeout)?;
        self.set_state(dir, State::Idle);
        Ok(())
    }

    /// Full single-shot consumer step (SPEC_FULL.md §4.4.2).
    pub fn read_single(&self, dir: Dir, timeout: Option<Duration>) -> Result<Vec<u8>, BridgeError> {
        let info = self.await_publication(dir, timeout)?;
        let view = self.view_region(dir, info.length)?;
        let bytes = view.to_vec();
        self.ack(dir);
        Ok(bytes)
    }

    /// Full chunked producer loop (SPEC_FULL.md §4.4.3). Always prepends the
    /// in-band chunk header to chunk 0, per this implementation's resolution
    /// of the framing Open Question.
    pub fn write_chunked(
        &self,
        dir: Dir,
        payload: &[u8],
        chunk_size: u64,
        timeout: Option<Duration>,
    ) -> Result<(), BridgeError> {
        if self.state(dir) == State::Transfer {
            return Err(shared::errors::ProtocolError::NotIdle {
                channel: self.name.clone(),
                dir: dir.label(),
            }
            .into());
        }
        let frame_bytes = self.frame_bytes();
        if chunk_size == 0 || chunk_size > frame_bytes {
            return Err(SizeError::InvalidChunkSize {
                chunk_size,
                frame_bytes,
            }
            .into());
        }

        let total = payload.len() as u64;
        let n = crate::transfer::chunk_count(total, chunk_size)?;

        for i in 0..n {
            let (start, end) = crate::transfer::chunk_bounds(i, total, chunk_size);
            let chunk = &payload[start as usize..end as usize];

            let framed;
            let out: &[u8] = if i == 0 {
                framed = {
                    let mut buf = crate::transfer::build_chunk_header(total, chunk_size, n);
                    buf.extend_from_slice(chunk);
                    buf
                };
                if framed.len() as u64 > frame_bytes {
                    return Err(SizeError::PayloadExceedsFrame {
                        payload: framed.len() as u64,
                        frame_bytes,
                    }
                    .into());
                }
                &framed
            } else {
                chunk
            };

            self.write_region(dir, out, 0)?;
            let state = if i == 0 { State::Transfer } else { self.state(dir) };
            self.publish(dir, out.len() as u64, i, total, chunk_size, state)?;
            self.await_ack(dir, timeout)?;
        }

        self.set_state(dir, State::Complete);
        Ok(())
    }

    /// Full chunked consumer loop (SPEC_FULL.md §4.4.4). Strips the in-band
    /// header from chunk 0 before appending to the returned buffer.
    pub fn read_chunked(&self, dir: Dir, timeout: Option<Duration>) -> Result<Vec<u8>, BridgeError> {
        let first = self.await_publication(dir, timeout)?;
        self.read_chunked_from(dir, first, timeout)
    }

    /// Continue a chunked read given the first publication's info, already
    /// consumed by the caller. Factored out so [`read_any`](Self::read_any)
    /// can dispatch on `total` without double-waiting on the first
    /// `data_ready` signal.
    fn read_chunked_from(
        &self,
        dir: Dir,
        first: PublicationInfo,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, BridgeError> {
        let mut out: Vec<u8> = Vec::new();
        let mut expected_idx = 0u32;
        let mut n = None;
        let mut info = first;

        loop {
            crate::transfer::check_chunk_order(&self.name, expected_idx, info.chunk_idx)?;

            let view = self.view_region(dir, info.length)?;
            if info.chunk_idx == 0 {
                match crate::transfer::parse_chunk_header(&self.name, &view)? {
                    Some((total, _chunk_size, observed_n, rest)) => {
                        out.reserve(total as usize);
                        out.extend_from_slice(rest);
                        n = Some(observed_n);
                    }
                    None => out.extend_from_slice(&view),
                }
            } else {
                out.extend_from_slice(&view);
            }
            view.ack();

            expected_idx += 1;
            let done = match n {
                Some(n) => expected_idx >= n,
                None => self.state(dir) == State::Complete,
            };
            if done {
                break;
            }
            info = self.await_publication(dir, timeout)?;
        }

        Ok(out)
    }

    /// Read a transfer on `dir` without knowing ahead of time whether the
    /// producer used single-shot or chunked framing: await the first
    /// publication, then dispatch on `total` (SPEC_FULL.md §4.4.4, "the
    /// consumer learns N the first time it observes a `total > 0`
    /// transfer"). Used by the shell-side protocol vocabulary responder,
    /// which only knows a variable name and a region, not the producer's mode.
    pub fn read_any(&self, dir: Dir, timeout: Option<Duration>) -> Result<Vec<u8>, BridgeError> {
        let first = self.await_publication(dir, timeout)?;
        if first.is_chunked() {
            self.read_chunked_from(dir, first, timeout)
        } else {
            let view = self.view_region(dir, first.length)?;
            let bytes = view.to_vec();
            view.ack();
            Ok(bytes)
        }
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("name", &self.name)
            .field("frame_bytes", &self.frame_bytes())
            .field("closed", &self.is_closed())
            .finish()
    }
}
