//! Host-side crate: the Bridge Facade, configuration, logging, console
//! cleanup, and a loopback `ShellDriver` test double used by the demo binary
//! and the integration tests.

pub mod cleanup;
pub mod config;
pub mod facade;
pub mod loopback;
pub mod logger;

pub use facade::{BridgeFacade, OwnedView, PublishResult};
pub use loopback::LoopbackShellDriver;
