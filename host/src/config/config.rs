use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use shared::errors::ConfigError;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{mpsc, Arc, RwLock},
    thread,
};

/// Full application configuration, loaded from TOML.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Channel defaults applied when a caller does not override them.
    pub channel: ChannelConfig,
    /// Logging destination.
    pub logging: LoggingConfig,
}

/// Channel-related settings `[channel]`.
#[derive(Debug, Deserialize, Clone)]
pub struct ChannelConfig {
    /// Region size used when a caller does not specify `frame_bytes`.
    pub default_frame_bytes: u64,
    /// Timeout applied to `await_publication`/`await_ack` when not overridden.
    pub default_timeout_ms: u64,
    /// Payload size above which `publish`/`fetch` switch to chunked mode.
    pub chunk_threshold_bytes: u64,
    /// Chunk size used once a transfer is chunked.
    pub chunk_size_bytes: u64,
}

/// Logging configuration `[logging]`.
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Directory flexi_logger writes rotating log files into.
    pub directory: String,
}

impl Config {
    /// Load, parse, and validate a `Config` from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let s = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let cfg: Config = toml::from_str(&s).map_err(ConfigError::Parse)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.channel.default_frame_bytes == 0 {
            return Err(ConfigError::Validation(
                "channel.default_frame_bytes must be > 0".into(),
            ));
        }
        if self.channel.default_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "channel.default_timeout_ms must be > 0".into(),
            ));
        }
        if self.channel.chunk_size_bytes == 0
            || self.channel.chunk_size_bytes > self.channel.default_frame_bytes
        {
            return Err(ConfigError::Validation(format!(
                "channel.chunk_size_bytes must be in (0, default_frame_bytes={}]",
                self.channel.default_frame_bytes
            )));
        }
        if self.channel.chunk_threshold_bytes < self.channel.chunk_size_bytes {
            return Err(ConfigError::Validation(
                "channel.chunk_threshold_bytes must be >= channel.chunk_size_bytes".into(),
            ));
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn from_str(toml: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(toml).map_err(ConfigError::Parse)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Manages a live-updating `Config` via file-watcher.
pub struct ConfigManager {
    inner: Arc<RwLock<Config>>,
    _watcher: RecommendedWatcher,
}

impl ConfigManager {
    pub fn new(path: &Path) -> Result<Self, ConfigError> {
        let cfg = Config::load(path)?;
        let shared = Arc::new(RwLock::new(cfg));
        let (tx, rx) = mpsc::channel();
        let mut watcher = RecommendedWatcher::new(
            tx,
            notify::Config::default().with_poll_interval(std::time::Duration::from_secs(1)),
        )
        .map_err(|e| ConfigError::Validation(format!("watcher error: {e}")))?;

        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| ConfigError::Validation(format!("watch error: {e}")))?;

        let cfg_path = path.to_path_buf();
        let shared_clone = Arc::clone(&shared);

        let config_thread = thread::Builder::new().name("config_watcher".to_string());
        config_thread
            .spawn(move || {
                for evt in rx {
                    if let Ok(event) = evt {
                        if let EventKind::Modify(_) = event.kind {
                            match Config::load(&cfg_path) {
                                Ok(new_cfg) => {
                                    *shared_clone.write().unwrap() = new_cfg;
                                    log::info!("Config reloaded");
                                }
                                Err(e) => log::error!("Failed to reload config: {e}"),
                            }
                        }
                    }
                }
            })
            .map_err(|e| ConfigError::Validation(format!("failed to spawn watcher thread: {e}")))?;

        Ok(ConfigManager {
            inner: shared,
            _watcher: watcher,
        })
    }

    /// Snapshot-like read of the current config.
    pub fn get(&self) -> Config {
        self.inner.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
    [channel]
    default_frame_bytes = 1048576
    default_timeout_ms = 5000
    chunk_threshold_bytes = 268435456
    chunk_size_bytes = 134217728

    [logging]
    directory = "logs"
    "#;

    #[test]
    fn parse_full_config() {
        let cfg = Config::from_str(SAMPLE).expect("should parse full sample");
        assert_eq!(cfg.channel.default_frame_bytes, 1_048_576);
        assert_eq!(cfg.channel.default_timeout_ms, 5_000);
        assert_eq!(cfg.channel.chunk_threshold_bytes, 268_435_456);
        assert_eq!(cfg.channel.chunk_size_bytes, 134_217_728);
        assert_eq!(cfg.logging.directory, "logs");
    }

    #[test]
    fn missing_channel_section() {
        let toml = r#"
        [logging]
        directory = "logs"
        "#;
        assert!(matches!(
            Config::from_str(toml).unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn zero_frame_bytes_is_rejected() {
        let toml = r#"
        [channel]
        default_frame_bytes = 0
        default_timeout_ms = 5000
        chunk_threshold_bytes = 1000
        chunk_size_bytes = 100

        [logging]
        directory = "logs"
        "#;
        assert!(matches!(
            Config::from_str(toml).unwrap_err(),
            ConfigError::Validation(_)
        ));
    }

    #[test]
    fn chunk_size_larger_than_frame_is_rejected() {
        let toml = r#"
        [channel]
        default_frame_bytes = 100
        default_timeout_ms = 5000
        chunk_threshold_bytes = 1000
        chunk_size_bytes = 200

        [logging]
        directory = "logs"
        "#;
        assert!(matches!(
            Config::from_str(toml).unwrap_err(),
            ConfigError::Validation(_)
        ));
    }

    #[test]
    fn threshold_below_chunk_size_is_rejected() {
        let toml = r#"
        [channel]
        default_frame_bytes = 1000
        default_timeout_ms = 5000
        chunk_threshold_bytes = 50
        chunk_size_bytes = 100

        [logging]
        directory = "logs"
        "#;
        assert!(matches!(
            Config::from_str(toml).unwrap_err(),
            ConfigError::Validation(_)
        ));
    }
}
