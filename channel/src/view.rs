//! Zero-copy views over a region's bytes.
//!
//! `RegionView` is a consuming type on purpose: the only way to release it is
//! to call `ack`, which signals the `ack_<dir>` event and drops the borrow in
//! the same move. There is no way to keep the slice around past that call
//! without holding the `RegionView` itself, so "holding a view past ack" (the
//! undefined behavior SPEC_FULL.md §3 calls out) is not expressible in this
//! API. Grounded on `fast_bridge.py`'s `ZeroCopyBuffer.ack()`/`close()` pair.

use std::ops::Deref;

use crate::handle::ChannelHandle;
use crate::transfer::Dir;

/// A read-only borrow over `dir`'s region, valid until [`RegionView::ack`] is
/// called.
pub struct RegionView<'h> {
    handle: &'h ChannelHandle,
    dir: Dir,
    bytes: &'h [u8],
}

impl<'h> RegionView<'h> {
    pub(crate) fn new(handle: &'h ChannelHandle, dir: Dir, bytes: &'h [u8]) -> Self {
        RegionView { handle, dir, bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Release the view and signal `ack_<dir>`. Consumes `self`: there is no
    /// way to retain the borrow afterward.
    pub fn ack(self) {
        self.handle.ack(self.dir);
    }
}

impl Deref for RegionView<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.bytes
    }
}

/// A writable borrow over `dir`'s full region, backing `create_buffer`'s
/// writer-wrapper contract (SPEC_FULL.md §4.5). Unlike [`RegionView`] this is
/// not ack-gated: coordination between host and shell writers is the
/// caller's responsibility, per spec.
pub struct WritableView<'h> {
    handle: &'h ChannelHandle,
    dir: Dir,
    ptr: *mut u8,
    capacity: usize,
}

unsafe impl Send for WritableView<'_> {}

impl<'h> WritableView<'h> {
    pub(crate) fn new(handle: &'h ChannelHandle, dir: Dir) -> Self {
        let ptr = handle.view_region_mut(dir);
        let capacity = handle.frame_bytes() as usize;
        WritableView {
            handle,
            dir,
            ptr,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn write(&self, offset: usize, byte: u8) {
        assert!(offset < self.capacity, "offset out of bounds");
        unsafe { *self.ptr.add(offset) = byte };
    }

    pub fn write_bytes(&self, offset: usize, bytes: &[u8]) {
        assert!(
            offset + bytes.len() <= self.capacity,
            "write exceeds region capacity"
        );
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.add(offset), bytes.len());
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.capacity) }
    }

    /// Publish the bytes written through this view as a single-shot transfer.
    pub fn publish(&self, length: u64) -> Result<(), shared::errors::BridgeError> {
        self.handle
            .publish(self.dir, length, 0, 0, 0, crate::transfer::State::Transfer)
    }
}
