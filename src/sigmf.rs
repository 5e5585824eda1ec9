//! SigMF metadata sidecar for raw capture dumps.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// `cf32_le` or `cf32_be`, matching how [`crate::dump::write_cf32`] lays out bytes.
pub fn native_cf32_datatype() -> &'static str {
    if cfg!(target_endian = "little") {
        "cf32_le"
    } else {
        "cf32_be"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigMfGlobal {
    #[serde(rename = "core:datatype")]
    pub datatype: String,

    #[serde(rename = "core:sample_rate")]
    pub sample_rate: f64,

    #[serde(rename = "core:version")]
    pub version: String,

    #[serde(rename = "core:description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "core:author", skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(rename = "core:hw", skip_serializing_if = "Option::is_none")]
    pub hw: Option<String>,

    #[serde(rename = "antenna:gain", skip_serializing_if = "Option::is_none")]
    pub gain: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigMfCapture {
    #[serde(rename = "core:sample_start")]
    pub sample_start: u64,

    #[serde(rename = "core:frequency", skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,

    #[serde(rename = "core:datetime", skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigMfMeta {
    pub global: SigMfGlobal,
    pub captures: Vec<SigMfCapture>,
    pub annotations: Vec<serde_json::Value>,
}

impl SigMfMeta {
    pub fn new(sample_rate: f64, frequency: f64, start: DateTime<Utc>) -> Self {
        Self {
            global: SigMfGlobal {
                datatype: native_cf32_datatype().to_string(),
                sample_rate,
                version: "1.0.0".to_string(),
                description: None,
                author: None,
                hw: None,
                gain: None,
            },
            captures: vec![SigMfCapture {
                sample_start: 0,
                frequency: Some(frequency),
                datetime: Some(start.to_rfc3339_opts(SecondsFormat::Millis, true)),
            }],
            annotations: Vec::new(),
        }
    }

    pub fn with_description(mut self, d: impl Into<String>) -> Self {
        self.global.description = Some(d.into());
        self
    }

    pub fn with_author(mut self, a: impl Into<String>) -> Self {
        self.global.author = Some(a.into());
        self
    }

    pub fn with_hw(mut self, hw: impl Into<String>) -> Self {
        self.global.hw = Some(hw.into());
        self
    }

    pub fn with_gain(mut self, gain: f64) -> Self {
        self.global.gain = Some(gain);
        self
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut f = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut f, self)?;
        f.flush()?;
        Ok(())
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let f = File::open(path)?;
        Ok(serde_json::from_reader(f)?)
    }
}
