//! Named, auto-reset Win32 events used to signal `data_ready` and `ack` across
//! the process boundary, one pair per direction.
//!
//! `CreateEventW` is idempotent on the name the same way `CreateFileMappingW`
//! is for the segment, so both host and shell call `create_or_open` and get
//! the same kernel object back. Grounded on the handle-ownership style of
//! `communications/ioctl.rs`'s `Device` wrapper.

use std::ffi::OsStr;
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::time::Duration;

use shared::errors::ChannelOpenError;
use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, WAIT_FAILED, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows_sys::Win32::System::Threading::{CreateEventW, SetEvent, WaitForSingleObject, INFINITE};

fn wide(s: &str) -> Vec<u16> {
    OsStr::new(s).encode_wide().chain(Some(0)).collect()
}

/// Result of waiting on a named event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Signaled,
    TimedOut,
}

/// RAII wrapper around one named, auto-reset event handle.
pub struct NamedEvent {
    name: String,
    handle: HANDLE,
}

unsafe impl Send for NamedEvent {}
unsafe impl Sync for NamedEvent {}

impl NamedEvent {
    /// Create the event if absent, or open the existing one with the same name.
    /// Manual-reset is always false: a successful wait consumes the signal, so
    /// the next publication has to re-signal it.
    pub fn create_or_open(name: &str) -> Result<Self, ChannelOpenError> {
        let wide_name = wide(name);
        let handle = unsafe {
            CreateEventW(
                std::ptr::null(),
                0, // bManualReset = FALSE (auto-reset)
                0, // bInitialState = FALSE
                wide_name.as_ptr(),
            )
        };

        if handle.is_null() {
            let err = io::Error::last_os_error();
            log::error!("CreateEventW({name}) failed: {err}");
            return Err(ChannelOpenError::Event {
                name: name.to_string(),
                source: err,
            });
        }

        Ok(NamedEvent {
            name: name.to_string(),
            handle,
        })
    }

    /// Signal the event, waking at most one waiter (auto-reset semantics).
    pub fn signal(&self) {
        let ok = unsafe { SetEvent(self.handle) };
        if ok == 0 {
            log::warn!(
                "SetEvent({}) failed: {}",
                self.name,
                io::Error::last_os_error()
            );
        }
    }

    /// Block until signaled or `timeout` elapses. `None` waits indefinitely.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<WaitResult, io::Error> {
        let millis = match timeout {
            Some(d) => d.as_millis().min(INFINITE as u128 - 1) as u32,
            None => INFINITE,
        };

        match unsafe { WaitForSingleObject(self.handle, millis) } {
            WAIT_OBJECT_0 => Ok(WaitResult::Signaled),
            WAIT_TIMEOUT => Ok(WaitResult::TimedOut),
            WAIT_FAILED => Err(io::Error::last_os_error()),
            other => {
                log::warn!("WaitForSingleObject({}) returned {other}", self.name);
                Err(io::Error::last_os_error())
            }
        }
    }
}

impl Drop for NamedEvent {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.handle) };
    }
}

/// The four events backing one channel: a `data_ready`/`ack` pair per direction.
pub struct EventSet {
    pub h2s_ready: NamedEvent,
    pub h2s_ack: NamedEvent,
    pub s2h_ready: NamedEvent,
    pub s2h_ack: NamedEvent,
}

impl EventSet {
    pub fn create_or_open(base_name: &str) -> Result<Self, ChannelOpenError> {
        use shared::constants::{SUFFIX_H2S_ACK, SUFFIX_H2S_READY, SUFFIX_S2H_ACK, SUFFIX_S2H_READY};

        Ok(EventSet {
            h2s_ready: NamedEvent::create_or_open(&format!("{base_name}{SUFFIX_H2S_READY}"))?,
            h2s_ack: NamedEvent::create_or_open(&format!("{base_name}{SUFFIX_H2S_ACK}"))?,
            s2h_ready: NamedEvent::create_or_open(&format!("{base_name}{SUFFIX_S2H_READY}"))?,
            s2h_ack: NamedEvent::create_or_open(&format!("{base_name}{SUFFIX_S2H_ACK}"))?,
        })
    }

    pub fn ready(&self, h2s: bool) -> &NamedEvent {
        if h2s {
            &self.h2s_ready
        } else {
            &self.s2h_ready
        }
    }

    pub fn ack(&self, h2s: bool) -> &NamedEvent {
        if h2s {
            &self.h2s_ack
        } else {
            &self.s2h_ack
        }
    }
}
