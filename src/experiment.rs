//! End-to-end loopback run: validate, build buffers, configure the radio,
//! capture, save.

use chrono::{DateTime, Local, Utc};
use tracing::info;

use crate::{
    Result, Sample,
    capture::{ReceiveBuffer, size_receive_buffer},
    config::{DeviceConfig, LoopbackConfig},
    coordinator::{Coordinator, CoordinatorSettings, JoinReport},
    device::{DeviceControl, Direction, StreamArgs, check_lo_lock},
    dump,
    sequencer::{TransmitBuffer, sequence_schedule},
    sigmf::SigMfMeta,
    waveform::generate,
};

/// Generated chirp train (cycling the PRF schedule), or the payload of
/// `output.tx_file`, behind the lead-in.
pub fn build_transmit(cfg: &LoopbackConfig) -> Result<TransmitBuffer> {
    let lead = cfg.capture.lead_size;
    match cfg.output.tx_file {
        Some(ref path) => {
            let payload = dump::read_cf32(path)?;
            info!("tx sample count: {} from {}", payload.len(), path.display());
            TransmitBuffer::from_samples(&payload, lead)
        }
        None => {
            let pulses = cfg
                .waveform
                .at_rate(cfg.device.tx_rate)?
                .iter()
                .map(generate)
                .collect::<Result<Vec<_>>>()?;
            for (prf, pulse) in cfg.waveform.prfs().iter().zip(&pulses) {
                info!(
                    "lfm pulse at prf {prf}: {} samples per pri, {} active",
                    pulse.len(),
                    pulse.active_len()
                );
            }
            sequence_schedule(&pulses, cfg.waveform.n_pulses, lead)
        }
    }
}

pub fn configure_device(dev: &dyn DeviceControl, d: &DeviceConfig) -> Result<()> {
    dev.set_master_clock_rate(d.master_clock_rate)?;
    for (dir, rate, gain, antenna) in [
        (Direction::Tx, d.tx_rate, d.tx_gain, &d.tx_antenna),
        (Direction::Rx, d.rx_rate, d.rx_gain, &d.rx_antenna),
    ] {
        dev.set_rate(dir, rate, d.channel)?;
        dev.set_freq(dir, d.center_freq, d.channel)?;
        dev.set_gain(dir, gain, d.channel)?;
        dev.set_antenna(dir, antenna, d.channel)?;
        info!("{dir}: antenna {antenna}, gain {gain} dB, rate {rate}, freq {}", d.center_freq);
    }
    info!(
        "upconversion rate {}, downconversion rate {}",
        d.master_clock_rate / d.tx_rate,
        d.master_clock_rate / d.rx_rate
    );
    check_lo_lock(dev, d.channel)
}

/// Everything needed for one capture window, with the device already set up.
pub struct Prepared {
    pub coordinator: Coordinator,
    pub tx: TransmitBuffer,
    pub rx: ReceiveBuffer,
}

/// Buffers are built and the config checked before the first device command.
pub fn prepare(dev: &dyn DeviceControl, cfg: &LoopbackConfig) -> Result<Prepared> {
    cfg.validate()?;
    let tx = build_transmit(cfg)?;
    let tx_duration = tx.payload().len() as f64 / cfg.device.tx_rate;
    let rx = size_receive_buffer(
        cfg.capture.lead_size,
        tx_duration,
        cfg.device.rx_rate,
        cfg.capture.post_roll,
    )?;
    info!("rx sample count: {}", rx.len());

    configure_device(dev, &cfg.device)?;
    let args = StreamArgs {
        channels: vec![cfg.device.channel],
        ..StreamArgs::default()
    };
    let tx_stream = dev.tx_stream(&args)?;
    let rx_stream = dev.rx_stream(&args)?;
    let settings = CoordinatorSettings::new(
        dev.rate(Direction::Tx, cfg.device.channel),
        dev.rate(Direction::Rx, cfg.device.channel),
    )
    .with_arm_delay(cfg.capture.arm_delay);
    let coordinator = Coordinator::new(dev.clock(), tx_stream, rx_stream, settings)?;

    Ok(Prepared {
        coordinator,
        tx,
        rx,
    })
}

impl Prepared {
    pub fn run(mut self) -> Result<Outcome> {
        let started = Utc::now();
        info!(
            "start time: {}",
            started.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S%.3f")
        );
        let report = self.coordinator.capture(&self.tx, &mut self.rx)?;
        Ok(Outcome {
            tx: self.tx,
            rx: self.rx,
            report,
            started,
        })
    }
}

pub struct Outcome {
    pub tx: TransmitBuffer,
    pub rx: ReceiveBuffer,
    pub report: JoinReport,
    pub started: DateTime<Utc>,
}

impl Outcome {
    pub fn useful(&self) -> &[Sample] {
        self.rx.useful()
    }

    /// Writes the trimmed capture and, if enabled, its SigMF sidecar.
    pub fn save(&self, cfg: &LoopbackConfig) -> Result<()> {
        let out = &cfg.output;
        dump::write_cf32(&out.rx_file, self.useful())?;
        if out.sigmf {
            let mut meta = SigMfMeta::new(cfg.device.rx_rate, cfg.device.center_freq, self.started)
                .with_hw(cfg.device.args.clone())
                .with_gain(cfg.device.rx_gain);
            if let Some(ref d) = out.description {
                meta = meta.with_description(d.clone());
            }
            if let Some(ref a) = out.author {
                meta = meta.with_author(a.clone());
            }
            let path = out.sigmf_meta_path();
            meta.write(&path)?;
            info!("metadata written to {}", path.display());
        }
        Ok(())
    }
}

pub fn run(dev: &dyn DeviceControl, cfg: &LoopbackConfig) -> Result<Outcome> {
    prepare(dev, cfg)?.run()
}
