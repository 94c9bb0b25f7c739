//! Strongly-typed configuration loading via Figment.
//!
//! Configuration is merged from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `EPHYS_DAQ_`, with `__` between
//!    nesting levels
//!
//! # Example
//! ```no_run
//! use ephys_daq::config::DaqConfig;
//!
//! let config = DaqConfig::load()?;
//! println!("saving to {}", config.storage.output_dir.display());
//! # Ok::<(), ephys_daq::error::DaqError>(())
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::channel::{TriggerPolarity, TriggerSource};
use crate::error::{AppResult, DaqError};
use crate::storage::SaveFormat;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaqConfig {
    /// Acquisition and filter settings.
    pub acquisition: AcquisitionConfig,
    /// Persistence settings.
    pub storage: StorageConfig,
    /// Episodic trigger settings; absent means untriggered recording.
    #[serde(default)]
    pub trigger: Option<TriggerConfig>,
}

/// Acquisition and filter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Attached headstage streams.
    #[serde(default = "default_num_streams")]
    pub num_streams: usize,
    /// Notch filter center frequency in Hz; `None` disables the notch.
    #[serde(default = "default_notch")]
    pub notch_frequency_hz: Option<f64>,
    /// Notch filter bandwidth in Hz.
    #[serde(default = "default_notch_bandwidth")]
    pub notch_bandwidth_hz: f64,
    /// Software highpass cutoff in Hz; `None` disables the stage.
    #[serde(default)]
    pub highpass_cutoff_hz: Option<f64>,
    /// Amplifier analog bandwidth lower cutoff, recorded in the header.
    #[serde(default = "default_lower_bandwidth")]
    pub lower_bandwidth_hz: f64,
    /// Amplifier analog bandwidth upper cutoff, recorded in the header.
    #[serde(default = "default_upper_bandwidth")]
    pub upper_bandwidth_hz: f64,
    /// Impedance test frequency, recorded in the header.
    #[serde(default = "default_impedance_freq")]
    pub impedance_test_frequency_hz: f64,
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// On-disk layout for new sessions.
    #[serde(default)]
    pub format: SaveFormat,
    /// Directory where session files are created.
    pub output_dir: PathBuf,
    /// Base name for session files/directories.
    #[serde(default = "default_basename")]
    pub base_name: String,
    /// Monolithic-format file rollover interval in minutes.
    #[serde(default = "default_rollover")]
    pub rollover_minutes: u64,
    /// Whether digital output port words are persisted.
    #[serde(default)]
    pub save_digital_out: bool,
    /// Free-text notes written into every header (up to three lines).
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Episodic trigger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Channel the trigger watches.
    pub source: TriggerSource,
    /// Edge direction that opens a session.
    pub polarity: TriggerPolarity,
    /// Seconds of pre-trigger history to keep and flush on trigger.
    #[serde(default = "default_pre_trigger")]
    pub pre_trigger_seconds: f64,
    /// Seconds the trigger must stay de-asserted before the episode closes.
    #[serde(default = "default_post_trigger")]
    pub post_trigger_seconds: f64,
    /// Re-arm after each episode (`true`) or stop after the first (`false`).
    #[serde(default = "default_episodic")]
    pub episodic: bool,
}

fn default_num_streams() -> usize {
    1
}

fn default_notch() -> Option<f64> {
    Some(50.0)
}

fn default_notch_bandwidth() -> f64 {
    10.0
}

fn default_lower_bandwidth() -> f64 {
    0.1
}

fn default_upper_bandwidth() -> f64 {
    7500.0
}

fn default_impedance_freq() -> f64 {
    1000.0
}

fn default_basename() -> String {
    "session".to_string()
}

fn default_rollover() -> u64 {
    60
}

fn default_pre_trigger() -> f64 {
    1.0
}

fn default_post_trigger() -> f64 {
    1.0
}

fn default_episodic() -> bool {
    true
}

impl DaqConfig {
    /// Load configuration from `ephys-daq.toml` and the environment.
    ///
    /// Environment variables override file values with prefix `EPHYS_DAQ_`
    /// and double underscores between nesting levels, e.g.
    /// `EPHYS_DAQ_STORAGE__ROLLOVER_MINUTES=5`.
    pub fn load() -> AppResult<Self> {
        Self::load_from("ephys-daq.toml")
    }

    /// Load configuration from a specific file path.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("EPHYS_DAQ_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> AppResult<()> {
        if self.acquisition.num_streams == 0 {
            return Err(DaqError::Configuration(
                "num_streams must be at least 1".to_string(),
            ));
        }
        if let Some(f0) = self.acquisition.notch_frequency_hz {
            if f0 <= 0.0 {
                return Err(DaqError::Configuration(format!(
                    "notch_frequency_hz must be positive, got {f0}"
                )));
            }
        }
        if self.storage.rollover_minutes == 0 {
            return Err(DaqError::Configuration(
                "rollover_minutes must be at least 1".to_string(),
            ));
        }
        if self.storage.notes.len() > 3 {
            return Err(DaqError::Configuration(format!(
                "at most 3 note lines are recorded in the header, got {}",
                self.storage.notes.len()
            )));
        }
        if let Some(trigger) = &self.trigger {
            match trigger.source {
                TriggerSource::DigitalIn(line) if line >= crate::core::BOARD_DIGITAL_LINES => {
                    return Err(DaqError::Configuration(format!(
                        "trigger digital line {line} out of range"
                    )));
                }
                TriggerSource::BoardAdc(ch) if ch >= crate::core::BOARD_ADC_CHANNELS => {
                    return Err(DaqError::Configuration(format!(
                        "trigger ADC channel {ch} out of range"
                    )));
                }
                _ => {}
            }
            if trigger.pre_trigger_seconds < 0.0 || trigger.post_trigger_seconds < 0.0 {
                return Err(DaqError::Configuration(
                    "trigger buffer durations must be non-negative".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> DaqConfig {
        DaqConfig {
            acquisition: AcquisitionConfig {
                num_streams: 1,
                notch_frequency_hz: Some(50.0),
                notch_bandwidth_hz: 10.0,
                highpass_cutoff_hz: None,
                lower_bandwidth_hz: 0.1,
                upper_bandwidth_hz: 7500.0,
                impedance_test_frequency_hz: 1000.0,
            },
            storage: StorageConfig {
                format: SaveFormat::Monolithic,
                output_dir: PathBuf::from("data"),
                base_name: "session".to_string(),
                rollover_minutes: 60,
                save_digital_out: false,
                notes: vec![],
            },
            trigger: None,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn zero_streams_rejected() {
        let mut config = base_config();
        config.acquisition.num_streams = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_trigger_line_rejected() {
        let mut config = base_config();
        config.trigger = Some(TriggerConfig {
            source: TriggerSource::DigitalIn(16),
            polarity: TriggerPolarity::Rising,
            pre_trigger_seconds: 1.0,
            post_trigger_seconds: 1.0,
            episodic: true,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_round_trip() {
        let config = base_config();
        let text = toml::to_string(&config).expect("serialize");
        let parsed: DaqConfig = toml::from_str(&text).expect("parse");
        assert_eq!(parsed.storage.rollover_minutes, 60);
        assert!(parsed.validate().is_ok());
    }
}
