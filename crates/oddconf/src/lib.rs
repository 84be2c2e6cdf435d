//! Validated configuration for the oddball stimulus rig.
//!
//! All timing constants, trigger codes, device addresses and paths live here.
//! The configuration is constructed once, validated at construction, and
//! injected into the scheduler - a bad timing constant aborts before any
//! trial runs, never mid-experiment.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `~/.config/oddball/config.toml` (user)
//! 2. `./oddball.toml` (local override)
//!
//! # Example Config
//!
//! ```toml
//! [timing]
//! stim_secs = 0.2
//! iti_secs = 1.0
//!
//! [triggers]
//! standard = 1
//! target = 2
//! novel = 3
//! hold = 4
//! address = "/dev/parport0"
//!
//! [remote]
//! endpoint = "tcp://127.0.0.1:5555"
//!
//! [paths]
//! trial_lists = "trialList"
//! sounds = "sounds"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum spacing between two trigger pulses, in seconds.
///
/// Downstream recording hardware needs this gap to register consecutive
/// pulses as distinct events. The post-stimulus portion of every
/// inter-trial interval must exceed it.
pub const MIN_TRIGGER_SPACING_SECS: f64 = 0.3;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("stimulus duration must be finite and positive, got {0}")]
    StimDuration(f64),

    #[error("inter-trial interval must be finite and positive, got {0}")]
    ItiDuration(f64),

    #[error("inter-trial interval {iti}s must exceed stimulus duration {stim}s")]
    ItiTooShort { iti: f64, stim: f64 },

    #[error(
        "post-stimulus interval {available}s is below the minimum trigger spacing {min}s"
    )]
    TriggerSpacing { available: f64, min: f64 },

    #[error("audio volume must be within 0.0..=1.0, got {0}")]
    Volume(f64),

    #[error("remote poll timeout must be positive, got {0} ms")]
    PollTimeout(i64),
}

/// Trial timing constants, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Duration of each stimulus sound.
    pub stim_secs: f64,
    /// Total inter-trial interval, inclusive of the stimulus duration.
    pub iti_secs: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            stim_secs: 0.2,
            iti_secs: 1.0,
        }
    }
}

impl TimingConfig {
    /// Post-trigger portion of the inter-trial interval.
    pub fn post_stim_secs(&self) -> f64 {
        self.iti_secs - self.stim_secs
    }
}

/// Trigger codes and hardware address.
///
/// The numeric vocabulary is consumed by downstream recording hardware.
/// Renumbering breaks compatibility with existing recordings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub standard: u8,
    pub target: u8,
    pub novel: u8,
    /// Engine-internal, emitted only while held.
    pub hold: u8,
    /// Parallel port character device.
    pub address: PathBuf,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            standard: 1,
            target: 2,
            novel: 3,
            hold: 4,
            address: PathBuf::from("/dev/parport0"),
        }
    }
}

/// Audio output settings handed to the player collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device name, `None` for the system default.
    pub device: Option<String>,
    pub volume: f64,
    /// Expected sample rate of every stimulus file.
    pub sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            volume: 0.1,
            sample_rate: 48_000,
        }
    }
}

/// Remote-control endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// REP endpoint the controller connects to.
    pub endpoint: String,
    /// Per-cycle poll bound in milliseconds.
    pub poll_timeout_ms: i64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: "tcp://127.0.0.1:5555".to_string(),
            poll_timeout_ms: 10,
        }
    }
}

/// Filesystem layout for collaborator data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory of per-condition trial-list files (`<condition>.txt`).
    pub trial_lists: PathBuf,
    /// Directory of stimulus WAV files.
    pub sounds: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            trial_lists: PathBuf::from("trialList"),
            sounds: PathBuf::from("sounds"),
        }
    }
}

/// Force-sensor conversion and streaming constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForceConfig {
    /// Voltage-ratio to weight gain, sensor calibration.
    pub gain: f64,
    /// Zero-load voltage-ratio offset.
    pub offset: f64,
    pub gravity: f64,
    /// Sensor sampling interval in milliseconds.
    pub data_interval_ms: u64,
}

impl Default for ForceConfig {
    fn default() -> Self {
        Self {
            gain: 266.643,
            offset: 0.006_533_9,
            gravity: 9.806,
            data_interval_ms: 10,
        }
    }
}

/// Complete rig configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OddballConfig {
    pub timing: TimingConfig,
    pub triggers: TriggerConfig,
    pub audio: AudioConfig,
    pub remote: RemoteConfig,
    pub paths: PathsConfig,
    pub force: ForceConfig,
}

impl OddballConfig {
    /// Load configuration from the standard locations and validate it.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `~/.config/oddball/config.toml`
    /// 3. `./oddball.toml`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, with an explicit file taking precedence over the
    /// local `./oddball.toml` override. The user config still loads first.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut merged = toml::Value::Table(toml::map::Map::new());
        for path in discover_config_files(config_path) {
            if !path.is_file() {
                continue;
            }
            let text = std::fs::read_to_string(&path)
                .map_err(|source| ConfigError::FileRead {
                    path: path.clone(),
                    source,
                })?;
            let value: toml::Value =
                text.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
            merge_value(&mut merged, value);
        }
        let config: OddballConfig =
            merged.try_into().map_err(|e: toml::de::Error| ConfigError::Parse {
                path: PathBuf::from("<merged>"),
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check every construction-time invariant.
    ///
    /// Called by [`load_from`](Self::load_from); call it directly when
    /// building a config in code.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let stim = self.timing.stim_secs;
        let iti = self.timing.iti_secs;
        if !stim.is_finite() || stim <= 0.0 {
            return Err(ConfigError::StimDuration(stim));
        }
        if !iti.is_finite() || iti <= 0.0 {
            return Err(ConfigError::ItiDuration(iti));
        }
        if iti <= stim {
            return Err(ConfigError::ItiTooShort { iti, stim });
        }
        let available = iti - stim;
        if available <= MIN_TRIGGER_SPACING_SECS {
            return Err(ConfigError::TriggerSpacing {
                available,
                min: MIN_TRIGGER_SPACING_SECS,
            });
        }
        if !(0.0..=1.0).contains(&self.audio.volume) {
            return Err(ConfigError::Volume(self.audio.volume));
        }
        // a negative timeout means "block indefinitely" to zmq, stalling
        // the scheduler between trials; the poll must stay bounded
        if self.remote.poll_timeout_ms <= 0 {
            return Err(ConfigError::PollTimeout(self.remote.poll_timeout_ms));
        }
        Ok(())
    }
}

/// Candidate config files in load order (later wins).
fn discover_config_files(override_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Some(dirs) = directories::ProjectDirs::from("", "", "oddball") {
        files.push(dirs.config_dir().join("config.toml"));
    }
    match override_path {
        Some(path) => files.push(path.to_path_buf()),
        None => files.push(PathBuf::from("oddball.toml")),
    }
    files
}

/// Deep-merge `overlay` into `base`: tables merge recursively, everything
/// else replaces.
fn merge_value(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (base_slot, overlay) => *base_slot = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = OddballConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.triggers.standard, 1);
        assert_eq!(config.triggers.target, 2);
        assert_eq!(config.triggers.novel, 3);
        assert_eq!(config.triggers.hold, 4);
    }

    #[test]
    fn iti_must_exceed_stim() {
        let mut config = OddballConfig::default();
        config.timing.stim_secs = 1.0;
        config.timing.iti_secs = 0.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ItiTooShort { .. })
        ));
    }

    #[test]
    fn trigger_spacing_enforced() {
        let mut config = OddballConfig::default();
        config.timing.stim_secs = 0.8;
        config.timing.iti_secs = 1.0;
        // 0.2s post-stimulus is below the 0.3s minimum
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TriggerSpacing { .. })
        ));
    }

    #[test]
    fn rejects_non_finite_durations() {
        let mut config = OddballConfig::default();
        config.timing.stim_secs = f64::NAN;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::StimDuration(_))
        ));

        let mut config = OddballConfig::default();
        config.timing.iti_secs = f64::INFINITY;
        assert!(matches!(config.validate(), Err(ConfigError::ItiDuration(_))));
    }

    #[test]
    fn volume_range_enforced() {
        let mut config = OddballConfig::default();
        config.audio.volume = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Volume(_))));
    }

    #[test]
    fn poll_timeout_must_be_positive() {
        // -1 would make the remote poll block indefinitely
        let mut config = OddballConfig::default();
        config.remote.poll_timeout_ms = -1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PollTimeout(-1))
        ));

        let mut config = OddballConfig::default();
        config.remote.poll_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PollTimeout(0))
        ));
    }

    #[test]
    fn load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rig.toml");
        std::fs::write(
            &path,
            "[timing]\nstim_secs = 0.1\niti_secs = 0.9\n\n[remote]\nendpoint = \"tcp://127.0.0.1:6666\"\n",
        )
        .unwrap();

        let config = OddballConfig::load_from(Some(&path)).unwrap();
        assert_eq!(config.timing.stim_secs, 0.1);
        assert_eq!(config.timing.iti_secs, 0.9);
        assert_eq!(config.remote.endpoint, "tcp://127.0.0.1:6666");
        // untouched sections keep their defaults
        assert_eq!(config.triggers.novel, 3);
        assert_eq!(config.remote.poll_timeout_ms, 10);
    }

    #[test]
    fn load_from_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rig.toml");
        std::fs::write(&path, "[timing]\nstim_secs = 0.9\niti_secs = 1.0\n").unwrap();

        assert!(matches!(
            OddballConfig::load_from(Some(&path)),
            Err(ConfigError::TriggerSpacing { .. })
        ));
    }

    #[test]
    fn merge_prefers_overlay_scalars() {
        let mut base: toml::Value = "a = 1\n[t]\nx = 1\ny = 2".parse().unwrap();
        let overlay: toml::Value = "a = 3\n[t]\ny = 9".parse().unwrap();
        merge_value(&mut base, overlay);
        assert_eq!(base["a"].as_integer(), Some(3));
        assert_eq!(base["t"]["x"].as_integer(), Some(1));
        assert_eq!(base["t"]["y"].as_integer(), Some(9));
    }
}
