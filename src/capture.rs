use crate::{LoopbackError, MAX_BUFFER_SAMPLES, Result, Sample};

/// Zero-initialised receive window: lead-in, expected echo, post-roll.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiveBuffer {
    samples: Vec<Sample>,
    lead_size: usize,
    post_roll: usize,
}

impl ReceiveBuffer {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn lead_size(&self) -> usize {
        self.lead_size
    }

    pub fn post_roll(&self) -> usize {
        self.post_roll
    }

    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    /// Only the receive worker writes through this while streaming.
    pub fn as_mut_slice(&mut self) -> &mut [Sample] {
        &mut self.samples
    }

    /// The post-settling part of the capture.
    pub fn useful(&self) -> &[Sample] {
        trim(&self.samples, self.lead_size, self.post_roll)
    }

    pub fn into_inner(self) -> Vec<Sample> {
        self.samples
    }
}

pub fn size_receive_buffer(
    lead_size: usize,
    tx_duration: f64,
    rx_rate: f64,
    post_roll: usize,
) -> Result<ReceiveBuffer> {
    if !(rx_rate.is_finite() && rx_rate > 0.0) {
        return Err(LoopbackError::InvalidArgument(format!(
            "receive rate must be positive, got {rx_rate}"
        )));
    }
    if !(tx_duration.is_finite() && tx_duration >= 0.0) {
        return Err(LoopbackError::InvalidArgument(format!(
            "transmit duration must be non-negative, got {tx_duration}"
        )));
    }
    // n / rate * rate may land a hair above n
    let echo = (rx_rate * tx_duration - 1e-6).ceil().max(0.0);
    let total = (echo <= MAX_BUFFER_SAMPLES as f64)
        .then_some(echo as usize)
        .and_then(|n| n.checked_add(lead_size))
        .and_then(|n| n.checked_add(post_roll))
        .filter(|&n| n <= MAX_BUFFER_SAMPLES)
        .ok_or_else(|| {
            LoopbackError::InvalidArgument(format!(
                "{tx_duration} s at {rx_rate} S/s with lead-in {lead_size} and post-roll \
                 {post_roll} does not fit in one buffer"
            ))
        })?;
    Ok(ReceiveBuffer {
        samples: vec![Sample::default(); total],
        lead_size,
        post_roll,
    })
}

/// `buffer[lead_size + post_roll..]`, empty if the offset is past the end.
pub fn trim(buffer: &[Sample], lead_size: usize, post_roll: usize) -> &[Sample] {
    let start = (lead_size + post_roll).min(buffer.len());
    &buffer[start..]
}
