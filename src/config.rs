//! Configuration management for glow_ambientd.
//!
//! Handles loading, parsing, and validation of the YAML configuration file
//! and the partial (coordinates only) reload performed at runtime.

use anyhow::{Context, Result, anyhow, bail};
use log::info;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::RwLock;

use crate::{event::ConfigChangeType, scheduler::TransitionPeriod, solar::Coordinates};

/// Main configuration structure for the glow_ambientd daemon.
///
/// # Example
///
/// ```yaml
/// version: 1
/// latitude: 52.0
/// longitude: 4.9
/// ping_host: "192.168.1.10"
/// transition: "1h"
/// driver:
///   kind: piglow
///   bus: /dev/i2c-1
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// Configuration version for compatibility checking.
    pub version: u8,

    /// Latitude in decimal degrees, north positive.
    pub latitude: f64,

    /// Longitude in decimal degrees, east positive.
    pub longitude: f64,

    /// Host whose reachability gates the solar cycle. Empty disables gating.
    #[serde(default)]
    pub ping_host: String,

    /// Length of each solar fade.
    #[serde(default = "defaults::transition")]
    pub transition: TransitionSetting,

    /// Reload coordinates whenever the file changes on disk.
    #[serde(default)]
    pub watch_config: bool,

    /// LED fixture hardware.
    #[serde(default)]
    pub driver: DriverCfg,
}

/// Transition length as written in the file: plain seconds or a duration
/// string made of `<number><unit>` groups (`s`, `m`, `h`), e.g. `"1h30m"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TransitionSetting {
    Seconds(i64),
    Text(String),
}

impl TransitionSetting {
    pub fn period(&self) -> Result<TransitionPeriod> {
        let seconds = match self {
            TransitionSetting::Seconds(seconds) => *seconds,
            TransitionSetting::Text(text) => parse_duration_secs(text)?,
        };
        TransitionPeriod::from_secs(seconds)
    }
}

fn parse_duration_secs(text: &str) -> Result<i64> {
    let text = text.trim();
    if let Ok(seconds) = text.parse::<i64>() {
        return Ok(seconds);
    }

    let mut total: i64 = 0;
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let unit = match ch {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            _ => bail!("Invalid unit '{ch}' in transition \"{text}\""),
        };
        let value: i64 = digits
            .parse()
            .map_err(|_| anyhow!("Missing number before '{ch}' in transition \"{text}\""))?;
        total = value
            .checked_mul(unit)
            .and_then(|part| total.checked_add(part))
            .ok_or_else(|| anyhow!("Transition \"{text}\" is too long"))?;
        digits.clear();
    }

    if !digits.is_empty() || text.is_empty() {
        bail!("Transition \"{text}\" must end with a unit (s, m or h)");
    }
    Ok(total)
}

/// LED fixture driver variants.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DriverCfg {
    /// PiGlow board (SN3218) on a Linux I²C bus.
    Piglow {
        #[serde(default = "defaults::i2c_bus")]
        bus: PathBuf,
        #[serde(default = "defaults::piglow_address")]
        address: u16,
    },
    /// No hardware; levels are only logged.
    Log,
}

impl Default for DriverCfg {
    fn default() -> Self {
        DriverCfg::Piglow {
            bus: defaults::i2c_bus(),
            address: defaults::piglow_address(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            latitude: 0.0,
            longitude: 0.0,
            ping_host: String::new(),
            transition: defaults::transition(),
            watch_config: false,
            driver: DriverCfg::default(),
        }
    }
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use glow_ambientd::config::Config;
    ///
    /// let config = Config::default();
    /// config.validate()?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            bail!("Unsupported config version {}", self.version);
        }
        self.transition_period()?;
        self.coordinates().validate()
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }

    pub fn transition_period(&self) -> Result<TransitionPeriod> {
        self.transition.period()
    }

    /// Names of the settings that differ from `other`, ignoring coordinates.
    fn startup_sections_changed(&self, other: &Config) -> Vec<String> {
        let mut changed = Vec::new();
        if self.ping_host != other.ping_host {
            changed.push("ping_host".to_string());
        }
        if self.transition != other.transition {
            changed.push("transition".to_string());
        }
        if self.watch_config != other.watch_config {
            changed.push("watch_config".to_string());
        }
        if self.driver != other.driver {
            changed.push("driver".to_string());
        }
        changed
    }
}

mod defaults {
    use super::TransitionSetting;
    use std::path::PathBuf;

    /// One hour.
    pub fn transition() -> TransitionSetting {
        TransitionSetting::Seconds(3600)
    }

    pub fn i2c_bus() -> PathBuf {
        PathBuf::from("/dev/i2c-1")
    }

    pub fn piglow_address() -> u16 {
        0x54
    }
}

fn locate_config() -> Result<PathBuf> {
    if let Ok(env_path) = env::var("GLOW_AMBIENTD_CONFIG") {
        return Ok(PathBuf::from(env_path));
    }

    if let Some(mut cfg_dir) = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| Path::new(&h).join(".config")))
    {
        cfg_dir.push("glow_ambientd/config.yml");
        if cfg_dir.exists() {
            return Ok(cfg_dir);
        }
    }

    let etc = Path::new("/etc/glow_ambientd/config.yml");
    if etc.exists() {
        return Ok(etc.to_path_buf());
    }

    bail!("Configuration file not found in any standard location")
}

/// Configuration manager that owns the config data and its file.
///
/// # Example
///
/// ```no_run
/// use glow_ambientd::config::ConfigManager;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config_manager = ConfigManager::load(None).await?;
/// let here = config_manager.coordinates().await;
///
/// // After SIGHUP
/// config_manager.reload_coordinates().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: Arc<RwLock<Config>>,
    path: PathBuf,
}

impl ConfigManager {
    pub fn new(config: Config, path: PathBuf) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            path,
        }
    }

    /// Loads configuration from file or standard locations.
    ///
    /// Searches for configuration in the following order:
    /// 1. Provided path parameter
    /// 2. GLOW_AMBIENTD_CONFIG environment variable
    /// 3. XDG_CONFIG_HOME/glow_ambientd/config.yml or ~/.config/glow_ambientd/config.yml
    /// 4. /etc/glow_ambientd/config.yml
    pub async fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => locate_config().context("No configuration file found")?,
        };

        info!("Loading config from: {}", config_path.display());
        let config = Self::load_config_from_path(&config_path)?;

        Ok(Self::new(config, config_path))
    }

    /// Gets a read-only reference to the current configuration.
    pub async fn get(&self) -> tokio::sync::RwLockReadGuard<'_, Config> {
        self.config.read().await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn clone_config(&self) -> Config {
        self.config.read().await.clone()
    }

    /// Current coordinates, read as one consistent pair.
    pub async fn coordinates(&self) -> Coordinates {
        self.config.read().await.coordinates()
    }

    /// Re-reads the file and swaps in its coordinates; every other setting
    /// keeps its startup value. The file must still validate as a whole.
    pub async fn reload_coordinates(&self) -> Result<Coordinates> {
        info!("Partially reloading config (only lat/long) from: {}", self.path.display());
        let fresh = Self::load_config_from_path(&self.path)?;

        let mut config = self.config.write().await;
        config.latitude = fresh.latitude;
        config.longitude = fresh.longitude;
        let coordinates = config.coordinates();
        info!(
            "Latitude: {:.6}, Longitude: {:.6}",
            coordinates.latitude, coordinates.longitude
        );
        Ok(coordinates)
    }

    /// Compares the file on disk with the running configuration.
    pub async fn analyze_config_changes(&self) -> Result<ConfigChangeType> {
        let fresh = Self::load_config_from_path(&self.path)?;
        let changed_sections = self.config.read().await.startup_sections_changed(&fresh);

        if changed_sections.is_empty() {
            Ok(ConfigChangeType::HotReload)
        } else {
            Ok(ConfigChangeType::ColdRestart { changed_sections })
        }
    }

    fn load_config_from_path(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML in: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Configuration validation failed for: {}", path.display()))?;

        Ok(config)
    }
}
