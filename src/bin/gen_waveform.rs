use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use sdr_loopback::{
    dump::write_cf32,
    sequencer::sequence_schedule,
    waveform::{WaveformConfig, generate},
};

/// Writes a train of LFM pulses as a raw cf32 file, ready for `loopback --tx-file`.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(short = 'o', long = "out", value_name = "out name", default_value = "TestPulses.tx")]
    outname: String,

    #[clap(short = 'b', long, value_name = "Hz", default_value_t = 10e6)]
    bandwidth: f64,

    #[clap(short = 'w', long, value_name = "s", default_value_t = 10e-6)]
    pulse_width: f64,

    #[clap(short = 'r', long, value_name = "S/s", default_value_t = 30.72e6)]
    sample_rate: f64,

    /// One PRF, or several cycled pulse by pulse
    #[clap(long, value_name = "Hz,...", value_delimiter = ',', default_value = "1e3")]
    prf: Vec<f64>,

    #[clap(short = 'n', value_name = "pulses", default_value_t = 100)]
    n_pulses: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let pulses = args
        .prf
        .iter()
        .map(|&prf| {
            WaveformConfig::new(args.bandwidth, args.pulse_width, args.sample_rate, prf)
                .and_then(|cfg| generate(&cfg))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let train = sequence_schedule(&pulses, args.n_pulses, 0)?;
    write_cf32(&args.outname, train.as_slice())
        .with_context(|| format!("failed to write {}", args.outname))?;
    println!(
        "{} pulses over {} prf(s), {} samples ({} active in the first) -> {}",
        args.n_pulses,
        pulses.len(),
        train.len(),
        pulses[0].active_len(),
        args.outname
    );
    Ok(())
}
