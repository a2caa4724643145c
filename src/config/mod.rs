//! Configuration management

use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

/// Upper bound for the per-command settle delay.
pub const MAX_SETTLE_DELAY_MS: u64 = 10_000;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub player: PlayerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlayerConfig {
    /// Target of the `"*"` device wildcard
    pub default_device: Option<String>,
    /// Device names or ids never shown or controlled (case-insensitive)
    #[serde(default)]
    pub hidden_devices: Vec<String>,
    /// Host script published when the player is turned on
    pub power_on_hook: Option<String>,
    /// Host script published when the player is turned off
    pub power_off_hook: Option<String>,
    #[serde(default = "default_device_cache_max_age_secs")]
    pub device_cache_max_age_secs: u64,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            default_device: None,
            hidden_devices: Vec::new(),
            power_on_hook: None,
            power_off_hook: None,
            device_cache_max_age_secs: default_device_cache_max_age_secs(),
            polling: PollingConfig::default(),
            commands: CommandsConfig::default(),
        }
    }
}

impl PlayerConfig {
    pub fn device_cache_max_age(&self) -> Duration {
        Duration::from_secs(self.device_cache_max_age_secs)
    }
}

fn default_device_cache_max_age_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    /// Fixed external tick
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Ticks between baseline refreshes
    #[serde(default = "default_baseline_ticks")]
    pub baseline_ticks: u32,
    /// Ticks of fast polling after every command
    #[serde(default = "default_post_command_burst")]
    pub post_command_burst: u32,
    /// Poll every tick while less than this much of the item is left
    #[serde(default = "default_near_end_threshold_secs")]
    pub near_end_threshold_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            baseline_ticks: default_baseline_ticks(),
            post_command_burst: default_post_command_burst(),
            near_end_threshold_secs: default_near_end_threshold_secs(),
        }
    }
}

impl PollingConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_baseline_ticks() -> u32 {
    30
}

fn default_post_command_burst() -> u32 {
    5
}

fn default_near_end_threshold_secs() -> u64 {
    2
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandsConfig {
    /// Wait after each mutating backend call
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// How long a transfer waits for a speaker to switch to the cloud source
    #[serde(default = "default_source_settle_timeout_ms")]
    pub source_settle_timeout_ms: u64,
    #[serde(default = "default_source_poll_interval_ms")]
    pub source_poll_interval_ms: u64,
    /// Queued items copied after the current one when mirroring a queue
    #[serde(default = "default_mirror_queue_items")]
    pub mirror_queue_items: usize,
    /// Cap on items enqueued by one local play-content call
    #[serde(default = "default_max_enqueue_items")]
    pub max_enqueue_items: usize,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            source_settle_timeout_ms: default_source_settle_timeout_ms(),
            source_poll_interval_ms: default_source_poll_interval_ms(),
            mirror_queue_items: default_mirror_queue_items(),
            max_enqueue_items: default_max_enqueue_items(),
        }
    }
}

impl CommandsConfig {
    /// Settle delay, clamped to 0..=10s.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms.min(MAX_SETTLE_DELAY_MS))
    }

    pub fn source_settle_timeout(&self) -> Duration {
        Duration::from_millis(self.source_settle_timeout_ms)
    }

    pub fn source_poll_interval(&self) -> Duration {
        Duration::from_millis(self.source_poll_interval_ms.max(1))
    }
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_source_settle_timeout_ms() -> u64 {
    5000
}

fn default_source_poll_interval_ms() -> u64 {
    250
}

fn default_mirror_queue_items() -> usize {
    20
}

fn default_max_enqueue_items() -> usize {
    50
}

/// Get config directory (UCP_CONFIG_DIR or platform default)
pub fn get_config_dir() -> std::path::PathBuf {
    if let Ok(dir) = std::env::var("UCP_CONFIG_DIR") {
        return std::path::PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return std::path::PathBuf::from(home)
                .join("Library/Application Support/unified-cloud-player");
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return std::path::PathBuf::from(xdg).join("unified-cloud-player");
        }
        if let Ok(home) = std::env::var("HOME") {
            return std::path::PathBuf::from(home).join(".config/unified-cloud-player");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return std::path::PathBuf::from(appdata).join("unified-cloud-player");
        }
    }

    // Fallback to current directory
    std::path::PathBuf::from(".")
}

pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir();

    let config = ::config::Config::builder()
        // Load from config file if it exists (config.toml, config.json, ...)
        .add_source(
            ::config::File::with_name(&config_dir.join("config").to_string_lossy()).required(false),
        )
        // Override with environment variables (UCP_PLAYER__DEFAULT_DEVICE, ...)
        .add_source(
            ::config::Environment::with_prefix("UCP")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("player.hidden_devices")
                .try_parsing(true),
        )
        .build()?;

    let config: Config = config.try_deserialize()?;
    if config.player.commands.settle_delay_ms > MAX_SETTLE_DELAY_MS {
        tracing::warn!(
            "settle_delay_ms {} exceeds {}ms, clamping",
            config.player.commands.settle_delay_ms,
            MAX_SETTLE_DELAY_MS
        );
    }
    Ok(config)
}
