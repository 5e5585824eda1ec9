use rayon::prelude::*;

use crate::{LoopbackError, MAX_BUFFER_SAMPLES, Result, Sample, waveform::Pulse};

/// Samples handed to the transmit worker: lead-in zeros, then the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct TransmitBuffer {
    samples: Vec<Sample>,
    lead_size: usize,
}

impl TransmitBuffer {
    /// Wraps an externally produced payload (e.g. a sample file) behind a lead-in.
    pub fn from_samples(payload: &[Sample], lead_size: usize) -> Result<Self> {
        if payload.is_empty() {
            return Err(LoopbackError::InvalidArgument(
                "transmit payload is empty".to_string(),
            ));
        }
        let total = lead_size
            .checked_add(payload.len())
            .filter(|&n| n <= MAX_BUFFER_SAMPLES)
            .ok_or_else(|| {
                LoopbackError::InvalidArgument(format!(
                    "lead-in of {lead_size} samples does not fit in one buffer"
                ))
            })?;
        let mut samples = vec![Sample::default(); total];
        samples[lead_size..].copy_from_slice(payload);
        Ok(Self { samples, lead_size })
    }

    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn lead_size(&self) -> usize {
        self.lead_size
    }

    pub fn lead(&self) -> &[Sample] {
        &self.samples[..self.lead_size]
    }

    pub fn payload(&self) -> &[Sample] {
        &self.samples[self.lead_size..]
    }

    /// Send segments in order; the lead-in is omitted when empty.
    pub fn segments(&self) -> Vec<&[Sample]> {
        if self.lead_size == 0 {
            vec![self.payload()]
        } else {
            vec![self.lead(), self.payload()]
        }
    }

    /// Seconds needed to play the whole buffer at `rate`.
    pub fn duration(&self, rate: f64) -> f64 {
        self.samples.len() as f64 / rate
    }
}

pub fn sequence(pulse: &Pulse, n_pulses: usize, lead_size: usize) -> Result<TransmitBuffer> {
    sequence_schedule(std::slice::from_ref(pulse), n_pulses, lead_size)
}

/// Staggered-PRF train: pulse `i` of the payload is `pulses[i % pulses.len()]`.
pub fn sequence_schedule(
    pulses: &[Pulse],
    n_pulses: usize,
    lead_size: usize,
) -> Result<TransmitBuffer> {
    if n_pulses < 1 {
        return Err(LoopbackError::InvalidArgument(format!(
            "pulse count must be at least 1, got {n_pulses}"
        )));
    }
    if pulses.is_empty() {
        return Err(LoopbackError::InvalidArgument(
            "pulse schedule is empty".to_string(),
        ));
    }
    if pulses.iter().any(Pulse::is_empty) {
        return Err(LoopbackError::InvalidArgument("pulse is empty".to_string()));
    }

    let too_long = || {
        LoopbackError::InvalidArgument(format!(
            "{n_pulses} pulses behind a {lead_size} sample lead-in do not fit in one buffer"
        ))
    };
    let cycle_len = pulses
        .iter()
        .try_fold(0usize, |acc, p| acc.checked_add(p.len()))
        .ok_or_else(too_long)?;
    // a partial last cycle is a prefix of the schedule, so it is shorter than a full one
    let tail_len: usize = pulses[..n_pulses % pulses.len()].iter().map(Pulse::len).sum();
    let total = cycle_len
        .checked_mul(n_pulses / pulses.len())
        .and_then(|n| n.checked_add(tail_len))
        .and_then(|n| n.checked_add(lead_size))
        .filter(|&n| n <= MAX_BUFFER_SAMPLES)
        .ok_or_else(too_long)?;

    let mut samples = vec![Sample::default(); total];
    samples[lead_size..]
        .par_chunks_mut(cycle_len)
        .for_each(|cycle| {
            let mut rest = cycle;
            for p in pulses {
                if rest.is_empty() {
                    break;
                }
                let (head, tail) = std::mem::take(&mut rest).split_at_mut(p.len());
                head.copy_from_slice(p.as_slice());
                rest = tail;
            }
        });

    Ok(TransmitBuffer { samples, lead_size })
}
