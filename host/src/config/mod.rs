mod config;

pub use config::{ChannelConfig, Config, ConfigManager, LoggingConfig};
