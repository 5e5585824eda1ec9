//! Linear frequency-modulated (chirp) pulse synthesis.

use std::f64::consts::PI;

use tracing::warn;

use crate::{LoopbackError, MAX_BUFFER_SAMPLES, Result, Sample};

/// Parameters of one chirped pulse repetition interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveformConfig {
    /// Swept bandwidth in Hz.
    pub bandwidth: f64,
    /// Active chirp duration in seconds.
    pub pulse_width: f64,
    /// Sample rate in Hz.
    pub sample_rate: f64,
    /// Pulse repetition frequency in Hz.
    pub prf: f64,
}

impl WaveformConfig {
    pub fn new(bandwidth: f64, pulse_width: f64, sample_rate: f64, prf: f64) -> Result<Self> {
        let cfg = Self {
            bandwidth,
            pulse_width,
            sample_rate,
            prf,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("bandwidth", self.bandwidth),
            ("pulse width", self.pulse_width),
            ("sample rate", self.sample_rate),
            ("prf", self.prf),
        ] {
            if !(v.is_finite() && v > 0.0) {
                return Err(LoopbackError::InvalidConfig(format!(
                    "{name} must be positive and finite, got {v}"
                )));
            }
        }

        let duty = self.pulse_width * self.prf;
        if duty >= 1.0 {
            return Err(LoopbackError::InvalidConfig(format!(
                "pulse width {} s does not fit in the {} s repetition interval (duty {duty})",
                self.pulse_width,
                1.0 / self.prf
            )));
        }

        // complex baseband only needs fs >= B
        if self.sample_rate < self.bandwidth {
            return Err(LoopbackError::InvalidConfig(format!(
                "sample rate {} Hz is below the {} Hz chirp bandwidth",
                self.sample_rate, self.bandwidth
            )));
        }
        if self.sample_rate < 2.0 * self.bandwidth {
            warn!(
                sample_rate = self.sample_rate,
                bandwidth = self.bandwidth,
                "sample rate below twice the bandwidth"
            );
        }

        let pri_samples = (self.sample_rate / self.prf).round();
        if pri_samples > MAX_BUFFER_SAMPLES as f64 {
            return Err(LoopbackError::InvalidConfig(format!(
                "prf {} Hz at {} Hz needs {pri_samples} samples per interval",
                self.prf, self.sample_rate
            )));
        }
        if self.pri_len() == 0 {
            return Err(LoopbackError::InvalidConfig(format!(
                "prf {} Hz leaves no samples per interval at {} Hz",
                self.prf, self.sample_rate
            )));
        }
        if (self.pulse_width * self.sample_rate).round() < 1.0 {
            return Err(LoopbackError::InvalidConfig(format!(
                "pulse width {} s is shorter than one sample",
                self.pulse_width
            )));
        }
        Ok(())
    }

    /// Samples in one pulse repetition interval, `round(fs / prf)`.
    pub fn pri_len(&self) -> usize {
        (self.sample_rate / self.prf).round() as usize
    }

    /// Samples carrying the chirp, `round(pulse_width * fs)`, never past the PRI.
    pub fn active_len(&self) -> usize {
        ((self.pulse_width * self.sample_rate).round() as usize).min(self.pri_len())
    }

    /// Pulse repetition interval in seconds.
    pub fn pri(&self) -> f64 {
        1.0 / self.prf
    }
}

/// One pulse repetition interval: chirp followed by quiescent zeros.
#[derive(Debug, Clone, PartialEq)]
pub struct Pulse {
    samples: Vec<Sample>,
    active_len: usize,
}

impl Pulse {
    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn active_len(&self) -> usize {
        self.active_len
    }
}

/// Instantaneous phase in cycles; sweeps -B/2 to +B/2 Hz across the pulse.
fn chirp_phase(t: f64, bandwidth: f64, pulse_width: f64) -> f64 {
    -bandwidth / 2.0 * t + bandwidth / (2.0 * pulse_width) * t * t
}

pub fn generate(cfg: &WaveformConfig) -> Result<Pulse> {
    cfg.validate()?;

    let ts = 1.0 / cfg.sample_rate;
    let active_len = cfg.active_len();
    let mut samples = vec![Sample::default(); cfg.pri_len()];
    samples[..active_len]
        .iter_mut()
        .enumerate()
        .for_each(|(n, s)| {
            let t = n as f64 * ts;
            let phi = 2.0 * PI * chirp_phase(t, cfg.bandwidth, cfg.pulse_width);
            *s = Sample::new(phi.cos() as f32, phi.sin() as f32);
        });

    Ok(Pulse {
        samples,
        active_len,
    })
}
