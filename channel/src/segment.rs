//! The shared segment: a single named mapping of `HEADER + 2 * FRAME` bytes,
//! laid out as `[Header][Region A: host->shell][Region B: shell->host]`.
//!
//! Grounded on `communications/memory_ring.rs`'s `Mapping` RAII wrapper in the
//! teacher crate, generalized from a single ring header to the richer
//! two-direction header this spec requires, and from an IOCTL-brokered handle
//! to a directly named section (there is no kernel driver in this design).

use std::ffi::OsStr;
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use shared::errors::ChannelOpenError;
use windows_sys::Win32::Foundation::{CloseHandle, GetLastError, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::System::Memory::{
    CreateFileMappingW, MapViewOfFile, OpenFileMappingW, UnmapViewOfFile, FILE_MAP_ALL_ACCESS,
    MEMORY_MAPPED_VIEW_ADDRESS, PAGE_READWRITE,
};

const ERROR_ALREADY_EXISTS: u32 = 183;

/// On-shared-memory header, identical layout on host and shell sides.
///
/// Field order groups the 8-byte atomics first and the 4-byte ones last so
/// `repr(C)` needs no padding; `size_of::<Header>()` is the external contract's
/// `HEADER` constant.
#[repr(C)]
pub struct Header {
    pub frame_bytes: AtomicU64,
    pub h2s_seq: AtomicU64,
    pub s2h_seq: AtomicU64,
    pub h2s_len: AtomicU64,
    pub s2h_len: AtomicU64,
    pub h2s_total: AtomicU64,
    pub s2h_total: AtomicU64,
    pub h2s_chunk_size: AtomicU64,
    pub s2h_chunk_size: AtomicU64,
    pub h2s_chunk_idx: AtomicU32,
    pub s2h_chunk_idx: AtomicU32,
    pub h2s_state: AtomicU32,
    pub s2h_state: AtomicU32,
}

pub const HEADER_BYTES: usize = std::mem::size_of::<Header>();

fn wide(s: &str) -> Vec<u16> {
    OsStr::new(s).encode_wide().chain(Some(0)).collect()
}

/// RAII mapping of the whole segment (header + both regions).
pub struct SharedSegment {
    handle: HANDLE,
    view: NonNull<u8>,
    frame_bytes: u64,
}

unsafe impl Send for SharedSegment {}
unsafe impl Sync for SharedSegment {}

impl SharedSegment {
    /// Create the segment if absent, or reuse it if an existing one already
    /// has the same `frame_bytes`. Fails with `SizeMismatch` if a prior
    /// segment with the same name but a different size exists.
    pub fn create(name: &str, frame_bytes: u64) -> Result<Self, ChannelOpenError> {
        let total = (HEADER_BYTES as u64) + 2 * frame_bytes;
        let wide_name = wide(name);

        let handle = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                std::ptr::null(),
                PAGE_READWRITE,
                (total >> 32) as u32,
                (total & 0xFFFF_FFFF) as u32,
                wide_name.as_ptr(),
            )
        };

        if handle.is_null() {
            let err = io::Error::last_os_error();
            log::error!("CreateFileMappingW({name}) failed: {err}");
            return Err(ChannelOpenError::Segment {
                name: name.to_string(),
                source: err,
            });
        }

        let pre_existing = unsafe { GetLastError() } == ERROR_ALREADY_EXISTS;

        let view = map_full(handle).map_err(|source| {
            unsafe { CloseHandle(handle) };
            ChannelOpenError::Segment {
                name: name.to_string(),
                source,
            }
        })?;

        let segment = SharedSegment {
            handle,
            view,
            frame_bytes,
        };

        if pre_existing {
            let existing = segment.header().frame_bytes.load(Ordering::Acquire);
            if existing != 0 && existing != frame_bytes {
                return Err(ChannelOpenError::SizeMismatch {
                    name: name.to_string(),
                    existing,
                    requested: frame_bytes,
                });
            }
            log::debug!("Reused existing segment `{name}` (frame_bytes={frame_bytes})");
        } else {
            segment
                .header()
                .frame_bytes
                .store(frame_bytes, Ordering::Release);
            log::info!("Created segment `{name}` (frame_bytes={frame_bytes}, total={total})");
        }

        Ok(segment)
    }

    /// Open an existing segment by name, learning `frame_bytes` from the header.
    pub fn open(name: &str) -> Result<Self, ChannelOpenError> {
        let wide_name = wide(name);

        let handle = unsafe { OpenFileMappingW(FILE_MAP_ALL_ACCESS, 0, wide_name.as_ptr()) };
        if handle.is_null() {
            let err = io::Error::last_os_error();
            log::error!("OpenFileMappingW({name}) failed: {err}");
            return Err(ChannelOpenError::Segment {
                name: name.to_string(),
                source: err,
            });
        }

        let view = map_full(handle).map_err(|source| {
            unsafe { CloseHandle(handle) };
            ChannelOpenError::Segment {
                name: name.to_string(),
                source,
            }
        })?;

        let frame_bytes = {
            let hdr: &Header = unsafe { &*(view.as_ptr() as *const Header) };
            hdr.frame_bytes.load(Ordering::Acquire)
        };

        log::info!("Opened segment `{name}` (frame_bytes={frame_bytes})");
        Ok(SharedSegment {
            handle,
            view,
            frame_bytes,
        })
    }

    pub fn frame_bytes(&self) -> u64 {
        self.frame_bytes
    }

    pub fn header(&self) -> &Header {
        unsafe { &*(self.view.as_ptr() as *const Header) }
    }

    /// Base address of region A (host->shell) or region B (shell->host).
    pub fn region_ptr(&self, dir_is_h2s: bool) -> *mut u8 {
        let base = unsafe { self.view.as_ptr().add(HEADER_BYTES) };
        if dir_is_h2s {
            base
        } else {
            unsafe { base.add(self.frame_bytes as usize) }
        }
    }
}

fn map_full(handle: HANDLE) -> io::Result<NonNull<u8>> {
    let addr: MEMORY_MAPPED_VIEW_ADDRESS =
        unsafe { MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, 0) };
    if addr.Value.is_null() {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { NonNull::new_unchecked(addr.Value as *mut u8) })
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        unsafe {
            let addr = MEMORY_MAPPED_VIEW_ADDRESS {
                Value: self.view.as_ptr() as _,
            };
            UnmapViewOfFile(addr);
            CloseHandle(self.handle);
        }
        log::debug!("Unmapped segment and closed section handle");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_has_no_padding() {
        // 9 u64 atomics + 4 u32 atomics, grouped so repr(C) needs no padding.
        assert_eq!(HEADER_BYTES, 9 * 8 + 4 * 4);
    }

    #[test]
    fn header_is_eight_byte_aligned() {
        assert_eq!(std::mem::align_of::<Header>(), 8);
    }
}
