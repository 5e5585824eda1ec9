use anyhow::Context;
use clap::Parser;

use sdr_loopback::{dump::read_cf32, plot::envelope};

/// Prints a magnitude plot of a raw cf32 capture.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(value_name = "file", default_value = "Test.rx")]
    file: String,

    #[clap(short = 'W', long, default_value_t = 100)]
    width: usize,

    #[clap(short = 'H', long, default_value_t = 20)]
    height: usize,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let data = read_cf32(&args.file).with_context(|| format!("failed to read {}", args.file))?;
    println!("{}: {} samples", args.file, data.len());
    print!("{}", envelope(&data, args.width, args.height));
    Ok(())
}
