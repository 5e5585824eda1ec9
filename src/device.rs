//! Device-control and streaming-transport seams.
//!
//! A radio driver implements [`DeviceControl`] for channel setup and hands out
//! one [`TxStreamer`] and one [`RxStreamer`]. Streamer calls are blocking and
//! synchronous; they report how they finished through a [`CompletionReport`]
//! instead of an error so that both workers of a capture can always be joined.

use std::{
    fmt,
    ops::{Add, Sub},
    sync::Arc,
    time::Duration,
};

use tracing::info;

use crate::{LoopbackError, Result, Sample};

/// Absolute device time in seconds.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct TimeSpec(f64);

impl TimeSpec {
    pub fn from_secs(secs: f64) -> Self {
        Self(secs)
    }

    pub fn as_secs(&self) -> f64 {
        self.0
    }
}

impl Add<f64> for TimeSpec {
    type Output = TimeSpec;
    fn add(self, rhs: f64) -> TimeSpec {
        TimeSpec(self.0 + rhs)
    }
}

impl Add<Duration> for TimeSpec {
    type Output = TimeSpec;
    fn add(self, rhs: Duration) -> TimeSpec {
        TimeSpec(self.0 + rhs.as_secs_f64())
    }
}

impl Sub for TimeSpec {
    type Output = f64;
    fn sub(self, rhs: TimeSpec) -> f64 {
        self.0 - rhs.0
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.9} s", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Tx,
    Rx,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Tx => write!(f, "TX"),
            Direction::Rx => write!(f, "RX"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StreamCmd {
    /// Start continuous streaming at `at`, or immediately when `None`.
    StartContinuous { at: Option<TimeSpec> },
    StopContinuous,
}

impl StreamCmd {
    pub fn name(&self) -> &'static str {
        match self {
            StreamCmd::StartContinuous { .. } => "start-continuous",
            StreamCmd::StopContinuous => "stop-continuous",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TxMetadata {
    /// Play the first sample at this time; `None` streams right after the previous call.
    pub time_spec: Option<TimeSpec>,
    pub start_of_burst: bool,
    pub end_of_burst: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Success,
    Timeout,
    Overrun,
    Underrun,
    Error,
}

/// How a blocking send or recv call finished.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionReport {
    pub samples: usize,
    pub status: CompletionStatus,
    /// Device time of the first sample moved, when the driver reports it.
    pub time_spec: Option<TimeSpec>,
    pub detail: Option<String>,
}

impl CompletionReport {
    pub fn success(samples: usize) -> Self {
        Self {
            samples,
            status: CompletionStatus::Success,
            time_spec: None,
            detail: None,
        }
    }

    pub fn failed(samples: usize, status: CompletionStatus, detail: impl Into<String>) -> Self {
        Self {
            samples,
            status,
            time_spec: None,
            detail: Some(detail.into()),
        }
    }

    pub fn with_time_spec(mut self, t: TimeSpec) -> Self {
        self.time_spec = Some(t);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == CompletionStatus::Success
    }
}

impl fmt::Display for CompletionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} after {} samples", self.status, self.samples)?;
        if let Some(ref d) = self.detail {
            write!(f, " ({d})")?;
        }
        Ok(())
    }
}

/// Host/wire sample formats and channel selection for a streamer.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamArgs {
    pub cpu_format: String,
    pub otw_format: String,
    pub args: String,
    pub channels: Vec<usize>,
}

impl Default for StreamArgs {
    fn default() -> Self {
        Self {
            cpu_format: "fc32".to_string(),
            otw_format: "sc16".to_string(),
            args: "spp=1024".to_string(),
            channels: vec![0],
        }
    }
}

pub trait DeviceClock: Send + Sync {
    fn time_now(&self) -> TimeSpec;
}

pub trait TxStreamer: Send + Sync {
    /// Blocks until `buf` is handed to the device or the call fails.
    fn send(&self, buf: &[Sample], md: &TxMetadata, timeout: Duration) -> CompletionReport;
}

pub trait RxStreamer: Send + Sync {
    fn issue_stream_cmd(&self, cmd: StreamCmd) -> Result<()>;

    /// Blocks until `buf` is full or the stream ends.
    fn recv(&self, buf: &mut [Sample], timeout: Duration) -> CompletionReport;
}

/// Per-channel radio setup plus stream creation.
pub trait DeviceControl: Send + Sync {
    fn set_master_clock_rate(&self, rate: f64) -> Result<()>;
    fn set_rate(&self, dir: Direction, rate: f64, chan: usize) -> Result<()>;
    fn rate(&self, dir: Direction, chan: usize) -> f64;
    fn set_freq(&self, dir: Direction, freq: f64, chan: usize) -> Result<()>;
    fn set_gain(&self, dir: Direction, gain: f64, chan: usize) -> Result<()>;
    fn set_antenna(&self, dir: Direction, antenna: &str, chan: usize) -> Result<()>;

    /// `None` when the front end has no LO lock sensor.
    fn lo_locked(&self, dir: Direction, chan: usize) -> Option<bool>;

    fn clock(&self) -> Arc<dyn DeviceClock>;
    fn tx_stream(&self, args: &StreamArgs) -> Result<Arc<dyn TxStreamer>>;
    fn rx_stream(&self, args: &StreamArgs) -> Result<Arc<dyn RxStreamer>>;
}

pub fn check_lo_lock(dev: &dyn DeviceControl, chan: usize) -> Result<()> {
    for dir in [Direction::Tx, Direction::Rx] {
        match dev.lo_locked(dir, chan) {
            Some(true) => info!("{dir} LO locked (channel {chan})"),
            Some(false) => {
                return Err(LoopbackError::device_command(
                    "lo-lock check",
                    format!("{dir} LO not locked on channel {chan}"),
                ));
            }
            None => {}
        }
    }
    Ok(())
}
