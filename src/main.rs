use std::{path::PathBuf, process::ExitCode};

use anyhow::Context;
use clap::Parser;
use sdr_loopback::{
    config::LoopbackConfig, device::StreamCmd, experiment, plot, sim::SimulatedDevice,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Simultaneous transmit and receive: play a chirp train (or a sample file)
/// and capture the loopback, time-aligned to a common trigger.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(short = 'c', long = "config", value_name = "toml file")]
    config: Option<PathBuf>,

    /// FPGA master clock rate: 184.32e6 or 200e6
    #[clap(long, value_name = "Hz")]
    master_clock_rate: Option<f64>,

    #[clap(long, value_name = "S/s")]
    tx_rate: Option<f64>,

    #[clap(long, value_name = "S/s")]
    rx_rate: Option<f64>,

    /// cf32 file to transmit instead of the generated chirp train
    #[clap(long, value_name = "file")]
    tx_file: Option<PathBuf>,

    /// cf32 file the trimmed capture is written to
    #[clap(long, value_name = "file")]
    rx_file: Option<PathBuf>,

    #[clap(long, value_name = "Hz")]
    cent_freq: Option<f64>,

    /// Transmit gain in dB, 0 to 30
    #[clap(long, value_name = "dB", allow_negative_numbers = true)]
    tx_gain: Option<f64>,

    /// Receive gain in dB, 0 to 30
    #[clap(long, value_name = "dB", allow_negative_numbers = true)]
    rx_gain: Option<f64>,

    #[clap(long, value_name = "Hz")]
    bandwidth: Option<f64>,

    #[clap(long, value_name = "s")]
    pulse_width: Option<f64>,

    #[clap(long, value_name = "Hz")]
    prf: Option<f64>,

    /// Staggered PRFs cycled pulse by pulse, e.g. 1e3,2e3
    #[clap(long, value_name = "Hz,...", value_delimiter = ',')]
    prf_schedule: Vec<f64>,

    #[clap(long, value_name = "count")]
    n_pulses: Option<usize>,

    #[clap(long, value_name = "samples")]
    lead_size: Option<usize>,

    #[clap(long, value_name = "s")]
    arm_delay: Option<f64>,

    /// Loopback delay of the simulated radio
    #[clap(long, value_name = "s")]
    sim_delay: Option<f64>,

    /// Noise std of the simulated radio
    #[clap(long, value_name = "std")]
    sim_noise: Option<f32>,

    /// Write a SigMF metadata file next to the capture
    #[clap(long)]
    sigmf: bool,

    /// Plot the received magnitude after capture
    #[clap(short = 'p', long)]
    plot: bool,

    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn apply(&self, cfg: &mut LoopbackConfig) {
        let d = &mut cfg.device;
        if let Some(v) = self.master_clock_rate {
            d.master_clock_rate = v;
        }
        if let Some(v) = self.tx_rate {
            d.tx_rate = v;
        }
        if let Some(v) = self.rx_rate {
            d.rx_rate = v;
        }
        if let Some(v) = self.cent_freq {
            d.center_freq = v;
        }
        if let Some(v) = self.tx_gain {
            d.tx_gain = v;
        }
        if let Some(v) = self.rx_gain {
            d.rx_gain = v;
        }

        let w = &mut cfg.waveform;
        if let Some(v) = self.bandwidth {
            w.bandwidth = v;
        }
        if let Some(v) = self.pulse_width {
            w.pulse_width = v;
        }
        if let Some(v) = self.prf {
            w.prf = v;
        }
        if !self.prf_schedule.is_empty() {
            w.prf_schedule = self.prf_schedule.clone();
        }
        if let Some(v) = self.n_pulses {
            w.n_pulses = v;
        }

        if let Some(v) = self.lead_size {
            cfg.capture.lead_size = v;
        }
        if let Some(v) = self.arm_delay {
            cfg.capture.arm_delay = v;
        }
        if let Some(v) = self.sim_delay {
            cfg.sim.loopback_delay = v;
        }
        if let Some(v) = self.sim_noise {
            cfg.sim.noise_std = v;
        }

        let o = &mut cfg.output;
        if let Some(ref v) = self.tx_file {
            o.tx_file = Some(v.clone());
        }
        if let Some(ref v) = self.rx_file {
            o.rx_file = v.clone();
        }
        o.sigmf |= self.sigmf;
        o.plot |= self.plot;
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let mut cfg = match args.config {
        Some(ref path) => LoopbackConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => LoopbackConfig::default(),
    };
    args.apply(&mut cfg);
    cfg.validate()?;

    let device = SimulatedDevice::new(cfg.sim.clone());
    let prepared = experiment::prepare(&device, &cfg)?;

    let rx = prepared.coordinator.rx_handle();
    ctrlc::set_handler(move || {
        warn!("interrupted, forcing stream stop");
        if let Err(e) = rx.issue_stream_cmd(StreamCmd::StopContinuous) {
            warn!("forced stop failed: {e}");
        }
    })
    .context("failed to install Ctrl-C handler")?;

    let outcome = prepared.run()?;
    info!("tx: {}, rx: {}", outcome.report.tx, outcome.report.rx);
    outcome
        .save(&cfg)
        .with_context(|| format!("failed to save capture to {}", cfg.output.rx_file.display()))?;

    if cfg.output.plot {
        print!("{}", plot::envelope(outcome.useful(), 100, 20));
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}
