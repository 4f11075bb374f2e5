use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{OculizerError, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub controller: ControllerConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing fields fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: AppConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.audio.validate()?;
        self.controller.validate()
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Lowest frequency the analysis must resolve. Determines the block size.
    pub min_frequency_hz: f32,
    pub channels: u16,
    /// Capture device name. `None` selects the host default input.
    pub device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            min_frequency_hz: 20.0,
            channels: 1,
            device: None,
        }
    }
}

impl AudioConfig {
    /// Number of samples per analysed block, `round(sample_rate / min_frequency_hz)`.
    pub fn block_size(&self) -> usize {
        if self.min_frequency_hz <= 0.0 {
            return 0;
        }
        (self.sample_rate as f32 / self.min_frequency_hz).round() as usize
    }

    pub fn nyquist_hz(&self) -> f32 {
        self.sample_rate as f32 / 2.0
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(OculizerError::config("sample rate must be positive"));
        }
        if self.min_frequency_hz.is_nan() || self.min_frequency_hz <= 0.0 {
            return Err(OculizerError::config(
                "minimum frequency must be a positive number of Hz",
            ));
        }
        if self.channels == 0 {
            return Err(OculizerError::config("at least one input channel is required"));
        }
        if self.block_size() < 2 {
            return Err(OculizerError::config(format!(
                "minimum frequency {} Hz is too high for a {} Hz stream",
                self.min_frequency_hz, self.sample_rate
            )));
        }
        Ok(())
    }
}

/// Configuration for the output-side tick loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Pause between ticks in milliseconds. Zero yields instead of sleeping.
    pub tick_interval_ms: u64,
    /// Maximum number of non-fatal errors retained before the oldest are dropped.
    pub error_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5,
            error_capacity: 256,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.error_capacity == 0 {
            return Err(OculizerError::config("error capacity must be at least one"));
        }
        Ok(())
    }
}
