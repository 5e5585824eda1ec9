//! Simulated loopback radio.
//!
//! The transmit streamer pushes timestamped chunks onto an in-process "RF
//! line" (a crossbeam channel); the receive streamer lays them into its
//! window at `tx time + loopback_delay`, scaled by `path_gain`, on top of
//! seeded complex white noise.

use std::{
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    LoopbackError, Result, Sample,
    device::{
        CompletionReport, CompletionStatus, DeviceClock, DeviceControl, Direction, RxStreamer,
        StreamArgs, StreamCmd, TimeSpec, TxMetadata, TxStreamer,
    },
};

const POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Seconds between a sample leaving TX and arriving at RX.
    pub loopback_delay: f64,
    pub path_gain: f32,
    /// Standard deviation of each I/Q noise component.
    pub noise_std: f32,
    pub seed: u64,
    /// Pace send/recv against the clock like real hardware.
    pub realtime: bool,
    pub lo_locked: bool,
    #[serde(skip)]
    pub tx_fault: Option<CompletionStatus>,
    #[serde(skip)]
    pub rx_fault: Option<CompletionStatus>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            loopback_delay: 5e-6,
            path_gain: 0.5,
            noise_std: 0.01,
            seed: 0x5eed,
            realtime: true,
            lo_locked: true,
            tx_fault: None,
            rx_fault: None,
        }
    }
}

pub struct SimClock {
    epoch: Instant,
}

impl DeviceClock for SimClock {
    fn time_now(&self) -> TimeSpec {
        TimeSpec::from_secs(self.epoch.elapsed().as_secs_f64())
    }
}

struct TxChunk {
    start: TimeSpec,
    rate: f64,
    samples: Vec<Sample>,
    end_of_burst: bool,
}

enum Wait {
    Reached,
    TimedOut,
    Halted,
}

struct Shared {
    clock: Arc<SimClock>,
    cfg: SimConfig,
    line_tx: Sender<TxChunk>,
    line_rx: Receiver<TxChunk>,
    rx_start: Mutex<Option<TimeSpec>>,
    halted: AtomicBool,
    commands: Mutex<Vec<StreamCmd>>,
    recv_calls: AtomicU64,
}

impl Shared {
    fn now(&self) -> TimeSpec {
        self.clock.time_now()
    }

    fn sleep_until(&self, t: TimeSpec, deadline: TimeSpec) -> Wait {
        loop {
            if self.halted.load(Ordering::Acquire) {
                return Wait::Halted;
            }
            let now = self.now();
            if now >= t {
                return Wait::Reached;
            }
            if now >= deadline {
                return Wait::TimedOut;
            }
            std::thread::sleep(Duration::from_secs_f64(t - now).min(POLL));
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Clone, PartialEq)]
struct FrontEnd {
    rate: f64,
    freq: f64,
    gain: f64,
    antenna: String,
}

#[derive(Debug, Clone, PartialEq)]
struct ChannelState {
    master_clock_rate: f64,
    tx: FrontEnd,
    rx: FrontEnd,
}

pub struct SimulatedDevice {
    shared: Arc<Shared>,
    state: Mutex<ChannelState>,
}

impl SimulatedDevice {
    pub fn new(cfg: SimConfig) -> Self {
        let (line_tx, line_rx) = unbounded();
        let fe = |antenna: &str| FrontEnd {
            rate: 1e6,
            freq: 0.0,
            gain: 0.0,
            antenna: antenna.to_string(),
        };
        Self {
            shared: Arc::new(Shared {
                clock: Arc::new(SimClock {
                    epoch: Instant::now(),
                }),
                cfg,
                line_tx,
                line_rx,
                rx_start: Mutex::new(None),
                halted: AtomicBool::new(false),
                commands: Mutex::new(Vec::new()),
                recv_calls: AtomicU64::new(0),
            }),
            state: Mutex::new(ChannelState {
                master_clock_rate: 200e6,
                tx: fe("TX/RX"),
                rx: fe("RX2"),
            }),
        }
    }

    /// Every stream command issued so far, in order.
    pub fn command_log(&self) -> Vec<StreamCmd> {
        lock(&self.shared.commands).clone()
    }

    pub fn gain(&self, dir: Direction) -> f64 {
        let st = lock(&self.state);
        match dir {
            Direction::Tx => st.tx.gain,
            Direction::Rx => st.rx.gain,
        }
    }

    pub fn freq(&self, dir: Direction) -> f64 {
        let st = lock(&self.state);
        match dir {
            Direction::Tx => st.tx.freq,
            Direction::Rx => st.rx.freq,
        }
    }

    pub fn antenna(&self, dir: Direction) -> String {
        let st = lock(&self.state);
        match dir {
            Direction::Tx => st.tx.antenna.clone(),
            Direction::Rx => st.rx.antenna.clone(),
        }
    }

    fn check_chan(chan: usize) -> Result<()> {
        if chan == 0 {
            Ok(())
        } else {
            Err(LoopbackError::device_command(
                "channel select",
                format!("simulated device has no channel {chan}"),
            ))
        }
    }

    fn check_args(args: &StreamArgs) -> Result<()> {
        if args.cpu_format != "fc32" {
            return Err(LoopbackError::InvalidArgument(format!(
                "unsupported host sample format {}",
                args.cpu_format
            )));
        }
        args.channels.iter().try_for_each(|&c| Self::check_chan(c))
    }

    fn with_front_end<R>(&self, dir: Direction, f: impl FnOnce(&mut FrontEnd, f64) -> R) -> R {
        let mut st = lock(&self.state);
        let mcr = st.master_clock_rate;
        match dir {
            Direction::Tx => f(&mut st.tx, mcr),
            Direction::Rx => f(&mut st.rx, mcr),
        }
    }
}

impl DeviceControl for SimulatedDevice {
    fn set_master_clock_rate(&self, rate: f64) -> Result<()> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(LoopbackError::device_command(
                "set master clock rate",
                format!("invalid rate {rate}"),
            ));
        }
        lock(&self.state).master_clock_rate = rate;
        Ok(())
    }

    fn set_rate(&self, dir: Direction, rate: f64, chan: usize) -> Result<()> {
        Self::check_chan(chan)?;
        self.with_front_end(dir, |fe, mcr| {
            if !(rate.is_finite() && rate > 0.0 && rate <= mcr) {
                return Err(LoopbackError::device_command(
                    format!("set {dir} rate"),
                    format!("{rate} S/s outside (0, {mcr}]"),
                ));
            }
            fe.rate = rate;
            Ok(())
        })
    }

    fn rate(&self, dir: Direction, _chan: usize) -> f64 {
        self.with_front_end(dir, |fe, _| fe.rate)
    }

    fn set_freq(&self, dir: Direction, freq: f64, chan: usize) -> Result<()> {
        Self::check_chan(chan)?;
        self.with_front_end(dir, |fe, _| fe.freq = freq);
        Ok(())
    }

    fn set_gain(&self, dir: Direction, gain: f64, chan: usize) -> Result<()> {
        Self::check_chan(chan)?;
        self.with_front_end(dir, |fe, _| fe.gain = gain);
        Ok(())
    }

    fn set_antenna(&self, dir: Direction, antenna: &str, chan: usize) -> Result<()> {
        Self::check_chan(chan)?;
        self.with_front_end(dir, |fe, _| fe.antenna = antenna.to_string());
        Ok(())
    }

    fn lo_locked(&self, _dir: Direction, _chan: usize) -> Option<bool> {
        Some(self.shared.cfg.lo_locked)
    }

    fn clock(&self) -> Arc<dyn DeviceClock> {
        self.shared.clock.clone()
    }

    fn tx_stream(&self, args: &StreamArgs) -> Result<Arc<dyn TxStreamer>> {
        Self::check_args(args)?;
        Ok(Arc::new(SimTxStreamer {
            shared: Arc::clone(&self.shared),
            rate: self.rate(Direction::Tx, 0),
            next_time: Mutex::new(None),
        }))
    }

    fn rx_stream(&self, args: &StreamArgs) -> Result<Arc<dyn RxStreamer>> {
        Self::check_args(args)?;
        Ok(Arc::new(SimRxStreamer {
            shared: Arc::clone(&self.shared),
            rate: self.rate(Direction::Rx, 0),
        }))
    }
}

pub struct SimTxStreamer {
    shared: Arc<Shared>,
    rate: f64,
    next_time: Mutex<Option<TimeSpec>>,
}

impl TxStreamer for SimTxStreamer {
    fn send(&self, buf: &[Sample], md: &TxMetadata, timeout: Duration) -> CompletionReport {
        let sh = &self.shared;
        if let Some(status) = sh.cfg.tx_fault {
            return CompletionReport::failed(0, status, "injected tx fault");
        }
        if sh.halted.load(Ordering::Acquire) {
            return CompletionReport::failed(0, CompletionStatus::Error, "stream halted");
        }

        let now = sh.now();
        let deadline = now + timeout;
        let mut next_time = lock(&self.next_time);
        let start = match (md.time_spec, *next_time) {
            (Some(t), _) => {
                if t < now {
                    warn!("tx burst for {t} is late (now {now})");
                }
                t
            }
            (None, Some(t)) => t,
            (None, None) => now,
        };

        if sh.cfg.realtime {
            match sh.sleep_until(start, deadline) {
                Wait::Reached => {}
                Wait::TimedOut => {
                    return CompletionReport::failed(0, CompletionStatus::Timeout, "send timed out");
                }
                Wait::Halted => {
                    return CompletionReport::failed(0, CompletionStatus::Error, "stream halted");
                }
            }
        }

        let end = start + buf.len() as f64 / self.rate;
        let chunk = TxChunk {
            start,
            rate: self.rate,
            samples: buf.to_vec(),
            end_of_burst: md.end_of_burst,
        };
        if sh.line_tx.send(chunk).is_err() {
            return CompletionReport::failed(0, CompletionStatus::Error, "rf line closed");
        }
        debug!("sim tx: {} samples from {start}", buf.len());

        if sh.cfg.realtime {
            match sh.sleep_until(end, end + timeout) {
                Wait::Reached => {}
                Wait::TimedOut => {
                    return CompletionReport::failed(
                        buf.len(),
                        CompletionStatus::Underrun,
                        "device starved",
                    );
                }
                Wait::Halted => {
                    return CompletionReport::failed(
                        buf.len(),
                        CompletionStatus::Error,
                        "stream halted",
                    );
                }
            }
        }

        *next_time = if md.end_of_burst { None } else { Some(end) };
        CompletionReport::success(buf.len()).with_time_spec(start)
    }
}

pub struct SimRxStreamer {
    shared: Arc<Shared>,
    rate: f64,
}

impl SimRxStreamer {
    fn fill_noise(&self, buf: &mut [Sample]) {
        let cfg = &self.shared.cfg;
        let call = self.shared.recv_calls.fetch_add(1, Ordering::Relaxed);
        match Normal::new(0.0f32, cfg.noise_std) {
            Ok(normal) if cfg.noise_std > 0.0 => {
                let mut rng = StdRng::seed_from_u64(cfg.seed.wrapping_add(call));
                buf.iter_mut().for_each(|s| {
                    *s = Sample::new(normal.sample(&mut rng), normal.sample(&mut rng));
                });
            }
            _ => buf.fill(Sample::default()),
        }
    }

    /// Adds one transmitted chunk into the window starting at `start`.
    fn mix(&self, buf: &mut [Sample], start: TimeSpec, chunk: &TxChunk) {
        let cfg = &self.shared.cfg;
        let offset = chunk.start + cfg.loopback_delay - start;
        let span = chunk.samples.len() as f64 / chunk.rate;
        // tolerate rounding in the timestamp arithmetic
        let j_lo = ((offset * self.rate - 1e-6).ceil().max(0.0) as usize).min(buf.len());
        let j_hi = (((offset + span) * self.rate - 1e-6).ceil().max(0.0) as usize).min(buf.len());
        for j in j_lo..j_hi {
            let i = ((j as f64 / self.rate - offset) * chunk.rate).round() as isize;
            if let Some(s) = usize::try_from(i).ok().and_then(|i| chunk.samples.get(i)) {
                buf[j] += *s * cfg.path_gain;
            }
        }
    }
}

impl RxStreamer for SimRxStreamer {
    fn issue_stream_cmd(&self, cmd: StreamCmd) -> Result<()> {
        let sh = &self.shared;
        lock(&sh.commands).push(cmd);
        match cmd {
            StreamCmd::StartContinuous { at } => {
                let now = sh.now();
                let at = at.unwrap_or(now);
                if at < now {
                    warn!("stream start for {at} is late (now {now}), starting immediately");
                }
                // chunks left over from an earlier burst
                while sh.line_rx.try_recv().is_ok() {}
                *lock(&sh.rx_start) = Some(at);
                sh.halted.store(false, Ordering::Release);
            }
            StreamCmd::StopContinuous => {
                *lock(&sh.rx_start) = None;
                sh.halted.store(true, Ordering::Release);
            }
        }
        Ok(())
    }

    fn recv(&self, buf: &mut [Sample], timeout: Duration) -> CompletionReport {
        let sh = &self.shared;
        if let Some(status) = sh.cfg.rx_fault {
            return CompletionReport::failed(0, status, "injected rx fault");
        }
        let deadline = sh.now() + timeout;

        let start = loop {
            if let Some(t) = *lock(&sh.rx_start) {
                break t;
            }
            if sh.halted.load(Ordering::Acquire) || sh.now() >= deadline {
                return CompletionReport::failed(0, CompletionStatus::Timeout, "stream not started");
            }
            std::thread::sleep(POLL);
        };

        if sh.cfg.realtime {
            match sh.sleep_until(start, deadline) {
                Wait::Reached => {}
                Wait::TimedOut | Wait::Halted => {
                    return CompletionReport::failed(0, CompletionStatus::Timeout, "no samples");
                }
            }
        }

        self.fill_noise(buf);
        let window_end = start + buf.len() as f64 / self.rate;
        loop {
            if sh.halted.load(Ordering::Acquire) {
                return CompletionReport::failed(0, CompletionStatus::Timeout, "stream stopped");
            }
            match sh.line_rx.recv_timeout(POLL) {
                Ok(chunk) => {
                    self.mix(buf, start, &chunk);
                    let arrives_until = chunk.start
                        + (sh.cfg.loopback_delay + chunk.samples.len() as f64 / chunk.rate);
                    if chunk.end_of_burst || arrives_until >= window_end {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    // nothing transmitted: the window is just noise
                    if sh.now() >= deadline {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if sh.cfg.realtime {
            match sh.sleep_until(window_end, deadline) {
                Wait::Reached => {}
                Wait::TimedOut => {
                    return CompletionReport::failed(0, CompletionStatus::Timeout, "recv timed out");
                }
                Wait::Halted => {
                    return CompletionReport::failed(0, CompletionStatus::Timeout, "stream stopped");
                }
            }
        }
        CompletionReport::success(buf.len()).with_time_spec(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> SimConfig {
        SimConfig {
            loopback_delay: 0.0,
            path_gain: 1.0,
            noise_std: 0.0,
            realtime: false,
            ..SimConfig::default()
        }
    }

    #[test]
    fn test_stream_commands_are_logged() {
        let dev = SimulatedDevice::new(quiet());
        let rx = dev.rx_stream(&StreamArgs::default()).unwrap();
        rx.issue_stream_cmd(StreamCmd::StartContinuous { at: None }).unwrap();
        rx.issue_stream_cmd(StreamCmd::StopContinuous).unwrap();
        assert_eq!(
            dev.command_log(),
            vec![StreamCmd::StartContinuous { at: None }, StreamCmd::StopContinuous]
        );
    }

    #[test]
    fn test_recv_without_start_times_out() {
        let dev = SimulatedDevice::new(quiet());
        let rx = dev.rx_stream(&StreamArgs::default()).unwrap();
        let mut buf = vec![Sample::default(); 8];
        let report = rx.recv(&mut buf, Duration::from_millis(20));
        assert_eq!(report.status, CompletionStatus::Timeout);
    }

    #[test]
    fn test_rate_above_master_clock_is_rejected() {
        let dev = SimulatedDevice::new(quiet());
        dev.set_master_clock_rate(184.32e6).unwrap();
        assert!(dev.set_rate(Direction::Tx, 200e6, 0).is_err());
        dev.set_rate(Direction::Tx, 30.72e6, 0).unwrap();
        assert_eq!(dev.rate(Direction::Tx, 0), 30.72e6);
        assert!(dev.set_gain(Direction::Rx, 10.0, 1).is_err());
    }

    #[test]
    fn test_delayed_echo_lands_at_offset() {
        let cfg = SimConfig {
            loopback_delay: 3.0 / 1e6,
            ..quiet()
        };
        let dev = SimulatedDevice::new(cfg);
        let tx = dev.tx_stream(&StreamArgs::default()).unwrap();
        let rx = dev.rx_stream(&StreamArgs::default()).unwrap();
        let t0 = dev.clock().time_now() + 0.01;
        rx.issue_stream_cmd(StreamCmd::StartContinuous { at: Some(t0) }).unwrap();

        let payload: Vec<Sample> = (1..=4).map(|k| Sample::new(k as f32, 0.0)).collect();
        let md = TxMetadata {
            time_spec: Some(t0),
            start_of_burst: true,
            end_of_burst: true,
        };
        assert!(tx.send(&payload, &md, Duration::from_secs(1)).is_success());

        let mut buf = vec![Sample::default(); 10];
        assert!(rx.recv(&mut buf, Duration::from_secs(1)).is_success());
        assert_eq!(&buf[3..7], payload.as_slice());
        assert_eq!(buf[2], Sample::default());
        assert_eq!(buf[7], Sample::default());
    }

    #[test]
    fn test_noise_is_seeded() {
        let cfg = SimConfig {
            noise_std: 0.1,
            ..quiet()
        };
        let a = SimulatedDevice::new(cfg.clone());
        let b = SimulatedDevice::new(cfg);
        let ra = SimRxStreamer {
            shared: Arc::clone(&a.shared),
            rate: 1e6,
        };
        let rb = SimRxStreamer {
            shared: Arc::clone(&b.shared),
            rate: 1e6,
        };
        let mut xa = vec![Sample::default(); 16];
        let mut xb = vec![Sample::default(); 16];
        ra.fill_noise(&mut xa);
        rb.fill_noise(&mut xb);
        assert!(xa.iter().any(|s| *s != Sample::default()));
        assert_eq!(xa, xb);
    }
}
