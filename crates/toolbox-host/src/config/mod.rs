pub mod host_config;

pub use host_config::{
    ConfigLoadError, DiscordConfig, HostConfig, HotReloadConfig, LoggingConfig, SourcesConfig,
};
