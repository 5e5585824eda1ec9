//! Run configuration, loaded from TOML and validated in one place.

use std::{
    ops::RangeInclusive,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    DEFAULT_ARM_DELAY, DEFAULT_LEAD_SIZE, DEFAULT_POST_ROLL, LoopbackError, Result,
    sim::SimConfig, waveform::WaveformConfig,
};

pub const GAIN_RANGE: RangeInclusive<f64> = 0.0..=30.0;
pub const SUPPORTED_MASTER_CLOCK_RATES: [f64; 2] = [184.32e6, 200e6];

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackConfig {
    pub device: DeviceConfig,
    pub waveform: WaveformSettings,
    pub capture: CaptureSettings,
    pub output: OutputConfig,
    pub sim: SimConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device address string passed through to the driver.
    pub args: String,
    pub master_clock_rate: f64,
    pub tx_rate: f64,
    pub rx_rate: f64,
    pub center_freq: f64,
    pub tx_gain: f64,
    pub rx_gain: f64,
    pub tx_antenna: String,
    pub rx_antenna: String,
    pub channel: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            args: "addr=192.168.30.2".to_string(),
            master_clock_rate: 184.32e6,
            tx_rate: 30.72e6,
            rx_rate: 30.72e6,
            center_freq: 5e9,
            tx_gain: 0.0,
            rx_gain: 0.0,
            tx_antenna: "TX/RX".to_string(),
            rx_antenna: "RX2".to_string(),
            channel: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveformSettings {
    pub bandwidth: f64,
    pub pulse_width: f64,
    pub prf: f64,
    /// Staggered PRFs cycled pulse by pulse; overrides `prf` when non-empty.
    pub prf_schedule: Vec<f64>,
    pub n_pulses: usize,
}

impl Default for WaveformSettings {
    fn default() -> Self {
        Self {
            bandwidth: 10e6,
            pulse_width: 10e-6,
            prf: 1e3,
            prf_schedule: Vec::new(),
            n_pulses: 1000,
        }
    }
}

impl WaveformSettings {
    pub fn prfs(&self) -> &[f64] {
        if self.prf_schedule.is_empty() {
            std::slice::from_ref(&self.prf)
        } else {
            &self.prf_schedule
        }
    }

    /// One waveform per scheduled PRF, in transmit order.
    pub fn at_rate(&self, sample_rate: f64) -> Result<Vec<WaveformConfig>> {
        self.prfs()
            .iter()
            .map(|&prf| WaveformConfig::new(self.bandwidth, self.pulse_width, sample_rate, prf))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub lead_size: usize,
    pub post_roll: usize,
    /// Seconds.
    pub arm_delay: f64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            lead_size: DEFAULT_LEAD_SIZE,
            post_roll: DEFAULT_POST_ROLL,
            arm_delay: DEFAULT_ARM_DELAY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Transmit samples from this cf32 file instead of the generated chirp train.
    pub tx_file: Option<PathBuf>,
    pub rx_file: PathBuf,
    pub sigmf: bool,
    pub plot: bool,
    pub description: Option<String>,
    pub author: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            tx_file: None,
            rx_file: PathBuf::from("Test.rx"),
            sigmf: false,
            plot: false,
            description: None,
            author: None,
        }
    }
}

impl OutputConfig {
    /// `<rx_file stem>.sigmf-meta` next to the capture.
    pub fn sigmf_meta_path(&self) -> PathBuf {
        self.rx_file.with_extension("sigmf-meta")
    }
}

fn positive(name: &str, v: f64) -> Result<()> {
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(LoopbackError::InvalidConfig(format!(
            "{name} must be positive, got {v}"
        )))
    }
}

impl LoopbackConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let cfg: LoopbackConfig = toml::from_str(&content)?;
        Ok(cfg)
    }

    /// Checks everything a run depends on before any device command goes out.
    pub fn validate(&self) -> Result<()> {
        let d = &self.device;
        for (name, gain) in [("tx gain", d.tx_gain), ("rx gain", d.rx_gain)] {
            if !GAIN_RANGE.contains(&gain) {
                return Err(LoopbackError::InvalidConfig(format!(
                    "{name} {gain} dB out of bounds, {} to {} dB is valid",
                    GAIN_RANGE.start(),
                    GAIN_RANGE.end()
                )));
            }
        }
        if !SUPPORTED_MASTER_CLOCK_RATES.contains(&d.master_clock_rate) {
            return Err(LoopbackError::InvalidConfig(format!(
                "invalid master clock rate {}: only {:?} are accepted",
                d.master_clock_rate, SUPPORTED_MASTER_CLOCK_RATES
            )));
        }
        positive("tx rate", d.tx_rate)?;
        positive("rx rate", d.rx_rate)?;
        positive("center frequency", d.center_freq)?;
        for (name, rate) in [("tx rate", d.tx_rate), ("rx rate", d.rx_rate)] {
            if rate > d.master_clock_rate {
                return Err(LoopbackError::InvalidConfig(format!(
                    "{name} {rate} exceeds master clock rate {}",
                    d.master_clock_rate
                )));
            }
        }
        positive("arm delay", self.capture.arm_delay)?;

        if self.output.tx_file.is_none() {
            self.waveform.at_rate(d.tx_rate)?;
            if self.waveform.n_pulses == 0 {
                return Err(LoopbackError::InvalidConfig(
                    "pulse count must be at least 1".to_string(),
                ));
            }
        }
        Ok(())
    }
}
