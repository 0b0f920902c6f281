//! Demonstration binary: wires a [`BridgeFacade`](host::BridgeFacade) to a
//! [`LoopbackShellDriver`](host::LoopbackShellDriver) and exercises
//! publish/read, pull, and fetch against it, without spawning
//! `powershell.exe`. Mirrors the teacher's `main.rs` init-logger /
//! init-config / do-the-work shape, minus the kernel-ring listener and
//! scanner service this domain has no counterpart for.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::info;

use host::cleanup::ConsoleCleanup;
use host::config::ConfigManager;
use host::loopback::LoopbackShellDriver;
use host::{logger, BridgeFacade};
use shared::format::Format;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = find_config_file();
    let cfg_mgr = Arc::new(ConfigManager::new(&config_path)?);
    let cfg = cfg_mgr.get();

    let _logger = logger::init_logger(&cfg.logging.directory)?;
    let _cleanup = ConsoleCleanup::new(|| {
        log::info!("host: cleanup routine ran");
    });

    info!("bridge demo starting");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    let shell = Arc::new(LoopbackShellDriver::new(Duration::from_millis(
        cfg.channel.default_timeout_ms,
    )));
    let facade = BridgeFacade::with_defaults(
        shell,
        runtime.handle().clone(),
        cfg.channel.default_frame_bytes,
        cfg.channel.chunk_threshold_bytes,
        cfg.channel.chunk_size_bytes,
    );

    let payload = b"hello from host".to_vec();
    let published = facade.publish(&payload, "X", Format::Bytes, None, None, true, None)?;
    info!(
        "published {} bytes to `{}` as sequence {}",
        published.length, published.channel_name, published.sequence
    );
    let view = facade.read(&published)?;
    info!("read back {} bytes, matches={}", view.len(), view.as_slice() == payload.as_slice());
    facade.close_published(&published.channel_name);

    let bytes = facade.fetch(
        "0..9",
        Format::Text {
            encoding: "utf-8".to_string(),
        },
        None,
        None,
    )?;
    info!("fetch(\"0..9\") -> {:?}", String::from_utf8_lossy(&bytes));

    info!("bridge demo finished");
    Ok(())
}

/// Resolve `config.toml`: an override environment variable first, otherwise a
/// file next to the running executable.
fn find_config_file() -> PathBuf {
    if let Some(cfg) = env::var_os("BRIDGE_CONFIG") {
        return PathBuf::from(cfg);
    }
    let mut exe_path = env::current_exe().unwrap_or_else(|_| PathBuf::from("."));
    exe_path.pop();
    exe_path.push("config.toml");
    exe_path
}
