//! Timed dual-stream coordinator.
//!
//! Arms the receive stream at `now + arm_delay`, runs one transmit worker and
//! one receive worker in parallel against that trigger, waits for both, then
//! stops the stream. The stop command is issued on every path once the
//! workers have joined, whatever they reported.

use std::{fmt, sync::Arc, time::Duration};

use crossbeam::thread::ScopedJoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    DEFAULT_ARM_DELAY, LoopbackError, Result,
    capture::ReceiveBuffer,
    device::{
        CompletionReport, CompletionStatus, DeviceClock, RxStreamer, StreamCmd, TimeSpec,
        TxMetadata, TxStreamer,
    },
    sequencer::TransmitBuffer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Armed,
    Streaming,
    Draining,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinatorSettings {
    /// Seconds added to the device clock to get the trigger time.
    pub arm_delay: f64,
    pub tx_rate: f64,
    pub rx_rate: f64,
    /// Extra seconds granted to each blocking call beyond delay + duration.
    pub timeout_slack: f64,
}

impl CoordinatorSettings {
    pub fn new(tx_rate: f64, rx_rate: f64) -> Self {
        Self {
            arm_delay: DEFAULT_ARM_DELAY,
            tx_rate,
            rx_rate,
            timeout_slack: 0.5,
        }
    }

    pub fn with_arm_delay(mut self, arm_delay: f64) -> Self {
        self.arm_delay = arm_delay;
        self
    }

    fn timeout(&self, nsamples: usize, rate: f64) -> Result<Duration> {
        let secs = self.arm_delay + nsamples as f64 / rate + self.timeout_slack;
        Duration::try_from_secs_f64(secs).map_err(|e| {
            LoopbackError::InvalidConfig(format!("stream timeout of {secs} s: {e}"))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamTiming {
    pub trigger_time: TimeSpec,
    pub arm_delay: f64,
}

/// Completion of both workers of one capture window.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinReport {
    pub tx: CompletionReport,
    pub rx: CompletionReport,
    pub timing: StreamTiming,
}

impl fmt::Display for JoinReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx: {}; rx: {}", self.tx, self.rx)
    }
}

impl JoinReport {
    pub fn is_success(&self) -> bool {
        self.tx.is_success() && self.rx.is_success()
    }

    pub fn into_result(self) -> Result<JoinReport> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(LoopbackError::StreamCompletion {
                tx: self.tx,
                rx: self.rx,
            })
        }
    }
}

pub struct Coordinator {
    clock: Arc<dyn DeviceClock>,
    tx: Arc<dyn TxStreamer>,
    rx: Arc<dyn RxStreamer>,
    settings: CoordinatorSettings,
    state: CoordinatorState,
    timing: Option<StreamTiming>,
}

impl Coordinator {
    pub fn new(
        clock: Arc<dyn DeviceClock>,
        tx: Arc<dyn TxStreamer>,
        rx: Arc<dyn RxStreamer>,
        settings: CoordinatorSettings,
    ) -> Result<Self> {
        if !(settings.arm_delay.is_finite() && settings.arm_delay > 0.0) {
            return Err(LoopbackError::InvalidConfig(format!(
                "arm delay must be positive, got {}",
                settings.arm_delay
            )));
        }
        for (name, rate) in [("tx", settings.tx_rate), ("rx", settings.rx_rate)] {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(LoopbackError::InvalidConfig(format!(
                    "{name} rate must be positive, got {rate}"
                )));
            }
        }
        if !(settings.timeout_slack.is_finite() && settings.timeout_slack >= 0.0) {
            return Err(LoopbackError::InvalidConfig(format!(
                "timeout slack must be non-negative, got {}",
                settings.timeout_slack
            )));
        }
        Ok(Self {
            clock,
            tx,
            rx,
            settings,
            state: CoordinatorState::Idle,
            timing: None,
        })
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Shared handle for a caller that needs to force a stop from elsewhere.
    pub fn rx_handle(&self) -> Arc<dyn RxStreamer> {
        Arc::clone(&self.rx)
    }

    fn expect_state(&self, expected: CoordinatorState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(LoopbackError::InvalidState {
                expected,
                actual: self.state,
            })
        }
    }

    /// Draining -> Idle: the stop command, issued whatever came before it.
    fn drain(&mut self) -> Result<()> {
        let stopped = self.drain();
        stopped
    }

    /// Idle -> Armed: issue the timed receive start.
    pub fn arm(&mut self) -> Result<StreamTiming> {
        self.expect_state(CoordinatorState::Idle)?;
        let now = self.clock.time_now();
        let timing = StreamTiming {
            trigger_time: now + self.settings.arm_delay,
            arm_delay: self.settings.arm_delay,
        };
        self.rx.issue_stream_cmd(StreamCmd::StartContinuous {
            at: Some(timing.trigger_time),
        })?;
        info!("armed at {now}, trigger at {}", timing.trigger_time);
        self.timing = Some(timing);
        self.state = CoordinatorState::Armed;
        Ok(timing)
    }

    /// Armed -> Streaming -> Draining -> Idle.
    ///
    /// Worker failures are returned inside the report. A rejected stop command
    /// is `StopFailed`, which still carries both reports.
    pub fn stream(
        &mut self,
        tx_buf: &TransmitBuffer,
        rx_buf: &mut ReceiveBuffer,
    ) -> Result<JoinReport> {
        self.expect_state(CoordinatorState::Armed)?;
        let timing = self.timing.take().ok_or(LoopbackError::InvalidState {
            expected: CoordinatorState::Armed,
            actual: CoordinatorState::Idle,
        })?;

        let timeouts = self
            .settings
            .timeout(tx_buf.len(), self.settings.tx_rate)
            .and_then(|tx| Ok((tx, self.settings.timeout(rx_buf.len(), self.settings.rx_rate)?)));
        let (tx_timeout, rx_timeout) = match timeouts {
            Ok(t) => t,
            Err(e) => {
                // armed, nothing launched
                if let Err(stop) = self.drain() {
                    error!("stop after aborted launch failed: {stop}");
                }
                return Err(e);
            }
        };

        let now = self.clock.time_now();
        if now >= timing.trigger_time {
            warn!(
                "trigger {} already elapsed at launch ({now}); the device may start late",
                timing.trigger_time
            );
        }

        self.state = CoordinatorState::Streaming;
        let tx: &dyn TxStreamer = self.tx.as_ref();
        let rx: &dyn RxStreamer = self.rx.as_ref();
        let rx_samples = rx_buf.as_mut_slice();

        info!(
            "launching workers: {} tx samples, {} rx samples",
            tx_buf.len(),
            rx_samples.len()
        );
        let joined = crossbeam::thread::scope(|s| {
            let rx_worker = s
                .builder()
                .name("loopback-rx".to_string())
                .spawn(move |_| rx.recv(rx_samples, rx_timeout));
            let tx_worker = s
                .builder()
                .name("loopback-tx".to_string())
                .spawn(move |_| transmit(tx, tx_buf, timing.trigger_time, tx_timeout));
            (join_worker(rx_worker, "rx"), join_worker(tx_worker, "tx"))
        });
        let (rx_report, tx_report) = joined.unwrap_or_else(|_| {
            (
                CompletionReport::failed(0, CompletionStatus::Error, "rx worker panicked"),
                CompletionReport::failed(0, CompletionStatus::Error, "tx worker panicked"),
            )
        });

        let stopped = self.drain();

        for (name, report) in [("tx", &tx_report), ("rx", &rx_report)] {
            if report.is_success() {
                info!("{name} worker finished: {report}");
            } else {
                error!("{name} worker finished: {report}");
            }
        }
        let report = JoinReport {
            tx: tx_report,
            rx: rx_report,
            timing,
        };
        match stopped {
            Ok(()) => {
                info!("stream stopped");
                Ok(report)
            }
            Err(e) => {
                error!("stream stop failed: {e}");
                Err(LoopbackError::StopFailed {
                    reason: e.to_string(),
                    report,
                })
            }
        }
    }

    /// Arm, stream, and fail if either worker did not succeed.
    pub fn capture(
        &mut self,
        tx_buf: &TransmitBuffer,
        rx_buf: &mut ReceiveBuffer,
    ) -> Result<JoinReport> {
        self.arm()?;
        self.stream(tx_buf, rx_buf)?.into_result()
    }
}

fn join_worker(
    handle: std::io::Result<ScopedJoinHandle<'_, CompletionReport>>,
    name: &str,
) -> CompletionReport {
    match handle {
        Ok(h) => h.join().unwrap_or_else(|_| {
            CompletionReport::failed(0, CompletionStatus::Error, format!("{name} worker panicked"))
        }),
        Err(e) => CompletionReport::failed(
            0,
            CompletionStatus::Error,
            format!("failed to spawn {name} worker: {e}"),
        ),
    }
}

/// Sends the lead-in with the timed start, then the payload right behind it.
fn transmit(
    tx: &dyn TxStreamer,
    buf: &TransmitBuffer,
    trigger: TimeSpec,
    timeout: Duration,
) -> CompletionReport {
    let segments = buf.segments();
    let last = segments.len() - 1;
    let mut total = CompletionReport::success(0);
    for (i, seg) in segments.into_iter().enumerate() {
        let md = TxMetadata {
            time_spec: (i == 0).then_some(trigger),
            start_of_burst: i == 0,
            end_of_burst: i == last,
        };
        debug!("tx segment {i}: {} samples, {md:?}", seg.len());
        let report = tx.send(seg, &md, timeout);
        if i == 0 {
            total.time_spec = report.time_spec;
        }
        total.samples += report.samples;
        if !report.is_success() {
            total.status = report.status;
            total.detail = report.detail;
            break;
        }
    }
    total
}
