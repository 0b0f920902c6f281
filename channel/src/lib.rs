//! The shared-memory channel between a host process and a Windows PowerShell
//! child: named segment, named events, and the chunked transfer state
//! machine that moves bulk payloads across the boundary.
//!
//! This crate is Windows-only; every primitive operation below is a thin,
//! RAII-wrapped layer over `CreateFileMappingW`/`MapViewOfFile` and
//! `CreateEventW`/`WaitForSingleObject`.

pub mod events;
pub mod handle;
pub mod segment;
pub mod transfer;
pub mod view;

pub use handle::ChannelHandle;
pub use transfer::{Dir, PublicationInfo, State};
pub use view::{RegionView, WritableView};
