//! Configuration for chopdeck
//!
//! Stored as YAML in the user's config directory.
//! Default location: ~/.config/chopdeck/config.yaml

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub playback: PlaybackConfig,
    pub chops: ChopConfig,
    pub separation: SeparationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            playback: PlaybackConfig::default(),
            chops: ChopConfig::default(),
            separation: SeparationConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&mut self) {
        self.playback.validate();
        self.chops.validate();
        self.separation.validate();
    }
}

/// Playback and restart timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Wait between stopping a source and starting its replacement
    pub grace_delay_ms: u64,
    /// Apply a short fade when stopping to avoid clicks
    pub fade_out_on_stop: bool,
    /// Initial state of the global loop flag
    pub loop_by_default: bool,
    /// Display refresh interval
    pub frame_interval_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            grace_delay_ms: 10,
            fade_out_on_stop: true,
            loop_by_default: false,
            frame_interval_ms: 16,
        }
    }
}

impl PlaybackConfig {
    pub fn validate(&mut self) {
        self.grace_delay_ms = self.grace_delay_ms.clamp(1, 250);
        self.frame_interval_ms = self.frame_interval_ms.clamp(4, 100);
    }

    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.grace_delay_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

/// Chop generation defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChopConfig {
    /// MIDI note assigned to the first chop
    pub base_note: u8,
    /// Number of chops produced by an equal split
    pub default_count: usize,
    /// New chop lists start linked (no gaps or overlaps)
    pub linked: bool,
    /// Onset detection sensitivity (0 = few onsets, 1 = many)
    pub transient_sensitivity: f32,
}

impl Default for ChopConfig {
    fn default() -> Self {
        Self {
            base_note: 36,
            default_count: 8,
            linked: true,
            transient_sensitivity: 0.5,
        }
    }
}

impl ChopConfig {
    pub fn validate(&mut self) {
        self.base_note = self.base_note.min(127);
        self.default_count = self.default_count.clamp(1, 64);
        self.transient_sensitivity = self.transient_sensitivity.clamp(0.0, 1.0);
    }
}

/// Stem separation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparationConfig {
    pub backend: BackendType,
    /// Band kept as vocals by the center backend
    pub vocal_low_hz: f32,
    pub vocal_high_hz: f32,
}

impl Default for SeparationConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::Center,
            vocal_low_hz: 150.0,
            vocal_high_hz: 7000.0,
        }
    }
}

impl SeparationConfig {
    pub fn validate(&mut self) {
        self.vocal_low_hz = self.vocal_low_hz.clamp(20.0, 2000.0);
        self.vocal_high_hz = self.vocal_high_hz.clamp(self.vocal_low_hz * 2.0, 20_000.0);
    }
}

/// Available separation backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Band-limited center channel as vocals
    #[default]
    Center,
    /// Whole mid channel as vocals, side channel as accompaniment
    MidSide,
}

impl BackendType {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Center => "Center band",
            Self::MidSide => "Mid/side",
        }
    }
}

/// Get the default config file path
///
/// Returns: <config dir>/chopdeck/config.yaml
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chopdeck")
        .join("config.yaml")
}

/// Load configuration from a YAML file
///
/// A missing file yields defaults. An unreadable or invalid file logs a
/// warning and also yields defaults.
pub fn load_config(path: &Path) -> Config {
    log::info!("load_config: Loading from {:?}", path);

    if !path.exists() {
        log::info!("load_config: Config file doesn't exist, using defaults");
        return Config::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<Config>(&contents) {
            Ok(mut config) => {
                config.validate();
                log::info!(
                    "load_config: Loaded config - grace delay {}ms, loop by default: {}",
                    config.playback.grace_delay_ms,
                    config.playback.loop_by_default
                );
                config
            }
            Err(e) => {
                log::warn!("load_config: Failed to parse config: {}, using defaults", e);
                Config::default()
            }
        },
        Err(e) => {
            log::warn!("load_config: Failed to read config file: {}, using defaults", e);
            Config::default()
        }
    }
}

/// Save configuration to a YAML file, creating parent directories
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    log::info!("save_config: Saving to {:?}", path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;
    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.playback.grace_delay_ms, 10);
        assert!(!config.playback.loop_by_default);
        assert_eq!(config.chops.default_count, 8);
    }

    #[test]
    fn test_validation_clamps_values() {
        let mut config = Config::default();
        config.playback.grace_delay_ms = 0;
        config.playback.frame_interval_ms = 1000;
        config.chops.base_note = 200;
        config.chops.default_count = 0;
        config.chops.transient_sensitivity = 3.0;
        config.separation.vocal_low_hz = 5.0;
        config.separation.vocal_high_hz = 30.0;
        config.validate();

        assert_eq!(config.playback.grace_delay_ms, 1);
        assert_eq!(config.playback.frame_interval_ms, 100);
        assert_eq!(config.chops.base_note, 127);
        assert_eq!(config.chops.default_count, 1);
        assert_eq!(config.chops.transient_sensitivity, 1.0);
        assert_eq!(config.separation.vocal_low_hz, 20.0);
        assert_eq!(config.separation.vocal_high_hz, 40.0);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "playback:\n  grace_delay_ms: 25\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.playback.grace_delay_ms, 25);
        assert!(config.playback.fade_out_on_stop);
        assert_eq!(config.chops, ChopConfig::default());
        assert_eq!(config.separation.backend, BackendType::Center);
    }

    #[test]
    fn test_backend_names_in_yaml() {
        let yaml = "separation:\n  backend: midside\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.separation.backend, BackendType::MidSide);
        assert_eq!(config.separation.vocal_low_hz, 150.0);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("chopdeck-missing-config-test.yaml");
        let _ = std::fs::remove_file(&path);
        assert_eq!(load_config(&path), Config::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = std::env::temp_dir().join(format!("chopdeck-config-{}", std::process::id()));
        let path = dir.join("config.yaml");
        let mut config = Config::default();
        config.playback.loop_by_default = true;
        config.chops.base_note = 48;

        save_config(&config, &path).unwrap();
        let loaded = load_config(&path);
        assert_eq!(loaded, config);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
