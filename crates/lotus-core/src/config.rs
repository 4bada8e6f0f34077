//! Configuration loading and typed config structures for the lotus tracker.
//!
//! The canonical configuration lives in `lotus-config.yaml` next to the
//! binary. This module defines strongly-typed structs that mirror the YAML
//! structure and a loader that reads and validates the file. Every field
//! has a default, so an empty file (or no file at all) yields the stock
//! Eastern Plaguelands setup.
//!
//! Changing zones, layer counts or spot lists after a snapshot exists is
//! not migrated automatically; the store only warns about the mismatch.

use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lotus_types::RoleId;
use serde::Deserialize;

/// Placeholder in a zone's channel format that is replaced by the layer number.
const LAYER_PLACEHOLDER: &str = "{}";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The configuration parsed but describes an unusable setup.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LotusConfig {
    /// Bot-level settings (prefix, roles, snapshot path, timeouts).
    #[serde(default)]
    pub bot: BotConfig,

    /// Statically configured zones.
    #[serde(default = "default_zones")]
    pub zones: Vec<ZoneConfig>,

    /// Pick timer settings.
    #[serde(default)]
    pub timer: TimerConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for LotusConfig {
    fn default() -> Self {
        Self {
            bot: BotConfig::default(),
            zones: default_zones(),
            timer: TimerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl LotusConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// The `LOTUS_STATE_PATH` environment variable overrides
    /// `bot.state_path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] or [`ConfigError::Invalid`].
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.bot.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the store relies on.
    ///
    /// Zone names are unique, every zone has at least one layer and one
    /// spot, spot numbers are unique and non-zero within a zone, and every
    /// channel format contains the `{}` layer placeholder.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.zones.is_empty() {
            return Err(ConfigError::Invalid(String::from("no zones configured")));
        }

        let mut zone_names = BTreeSet::new();
        for zone in &self.zones {
            if !zone_names.insert(zone.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "zone {} is configured twice",
                    zone.name
                )));
            }
            zone.validate()?;
        }

        let mut channels = BTreeSet::new();
        for zone in &self.zones {
            for layer in zone.layer_numbers() {
                let channel = zone.channel_name(layer);
                if !channels.insert(channel.clone()) {
                    return Err(ConfigError::Invalid(format!(
                        "channel {channel} is used by more than one layer"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Channels in which commands are accepted: every layer channel plus
    /// the timer callout channel.
    pub fn authorized_channels(&self) -> BTreeSet<String> {
        self.zones
            .iter()
            .flat_map(|zone| zone.layer_numbers().map(|layer| zone.channel_name(layer)))
            .chain(std::iter::once(self.timer.channel_name.clone()))
            .collect()
    }
}

/// Bot-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BotConfig {
    /// Prefix that marks a message as a command.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Role required for administrative commands.
    #[serde(default = "default_admin_role")]
    pub admin_role_id: RoleId,

    /// Where the snapshot file lives.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// Upper bound on a single connector call during reconciliation.
    #[serde(default = "default_platform_timeout_ms")]
    pub platform_timeout_ms: u64,
}

impl BotConfig {
    /// Override settings with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("LOTUS_STATE_PATH") {
            self.state_path = PathBuf::from(val);
        }
    }

    /// The connector timeout as a [`Duration`].
    pub const fn platform_timeout(&self) -> Duration {
        Duration::from_millis(self.platform_timeout_ms)
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            admin_role_id: default_admin_role(),
            state_path: default_state_path(),
            platform_timeout_ms: default_platform_timeout_ms(),
        }
    }
}

/// Static definition of one zone.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ZoneConfig {
    /// Zone name.
    pub name: String,

    /// Channel name pattern; `{}` is replaced by the layer number.
    pub channel_format: String,

    /// Number of parallel layers.
    #[serde(default = "default_layers")]
    pub layers: u32,

    /// Spots present in every layer of the zone.
    pub spots: Vec<SpotConfig>,
}

impl ZoneConfig {
    /// Channel name of the given layer.
    pub fn channel_name(&self, layer: u32) -> String {
        self.channel_format
            .replacen(LAYER_PLACEHOLDER, &layer.to_string(), 1)
    }

    /// Layer numbers, starting at 1.
    pub const fn layer_numbers(&self) -> RangeInclusive<u32> {
        1..=self.layers
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.channel_format.contains(LAYER_PLACEHOLDER) {
            return Err(ConfigError::Invalid(format!(
                "zone {}: channel_format {:?} has no {LAYER_PLACEHOLDER} placeholder",
                self.name, self.channel_format
            )));
        }
        if self.layers == 0 {
            return Err(ConfigError::Invalid(format!(
                "zone {}: at least one layer is required",
                self.name
            )));
        }
        if self.spots.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "zone {}: at least one spot is required",
                self.name
            )));
        }

        let mut numbers = BTreeSet::new();
        for spot in &self.spots {
            if spot.number == 0 {
                return Err(ConfigError::Invalid(format!(
                    "zone {}: spot {} must have a number of 1 or more",
                    self.name, spot.name
                )));
            }
            if !numbers.insert(spot.number) {
                return Err(ConfigError::Invalid(format!(
                    "zone {}: spot number {} is used twice",
                    self.name, spot.number
                )));
            }
        }
        Ok(())
    }
}

/// Static definition of one spot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SpotConfig {
    /// Display name.
    pub name: String,
    /// 1-based number, unique within the zone.
    pub number: u32,
}

/// Pick timer settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TimerConfig {
    /// Channel where timer callouts are posted.
    #[serde(default = "default_timer_channel")]
    pub channel_name: String,

    /// Minutes after a pick when the next window opens.
    #[serde(default = "default_window_start_minutes")]
    pub window_start_minutes: u32,

    /// Minutes after a pick when the next window closes.
    #[serde(default = "default_window_end_minutes")]
    pub window_end_minutes: u32,
}

impl TimerConfig {
    /// Offset from the pick time to the window opening.
    pub fn window_start(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.window_start_minutes))
    }

    /// Offset from the pick time to the window closing.
    pub fn window_end(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.window_end_minutes))
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            channel_name: default_timer_channel(),
            window_start_minutes: default_window_start_minutes(),
            window_end_minutes: default_window_end_minutes(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_prefix() -> String {
    ">".to_owned()
}

const fn default_admin_role() -> RoleId {
    RoleId::new(713_873_303_064_019_025)
}

fn default_state_path() -> PathBuf {
    PathBuf::from("lotus_state.json")
}

const fn default_platform_timeout_ms() -> u64 {
    30_000
}

const fn default_layers() -> u32 {
    2
}

fn default_timer_channel() -> String {
    "lotus-timer-callouts".to_owned()
}

const fn default_window_start_minutes() -> u32 {
    45
}

const fn default_window_end_minutes() -> u32 {
    75
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_zones() -> Vec<ZoneConfig> {
    let spots = [
        "Cauldron 1",
        "Cauldron 2",
        "Naxx",
        "Northdale",
        "Mill",
        "Noxious Glade",
        "Tyr's Hand",
        "Corin's Crossing",
        "Fungal Vale",
        "Undercroft",
    ];
    vec![ZoneConfig {
        name: "Eastern-Plaguelands".to_owned(),
        channel_format: "epl-layer-{}".to_owned(),
        layers: default_layers(),
        spots: (1..)
            .zip(spots)
            .map(|(number, name)| SpotConfig {
                name: name.to_owned(),
                number,
            })
            .collect(),
    }]
}
