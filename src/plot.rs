//! Terminal magnitude plot of a capture.

use crate::Sample;

/// Renders `|x|` as a `width` x `height` character plot, one column per
/// block of samples showing that block's peak magnitude.
pub fn envelope(samples: &[Sample], width: usize, height: usize) -> String {
    if samples.is_empty() || width == 0 || height == 0 {
        return String::new();
    }
    let width = width.min(samples.len());
    let block = samples.len().div_ceil(width);
    let peaks: Vec<f32> = samples
        .chunks(block)
        .map(|c| c.iter().map(|s| s.norm()).fold(0.0, f32::max))
        .collect();
    let top = peaks.iter().copied().fold(0.0, f32::max);

    let mut out = String::new();
    for row in (0..height).rev() {
        let level = top * row as f32 / height as f32;
        out.push(if row == height - 1 { '^' } else { '|' });
        for &p in &peaks {
            out.push(if top > 0.0 && p > level { '#' } else { ' ' });
        }
        out.push('\n');
    }
    out.push('+');
    out.push_str(&"-".repeat(peaks.len()));
    out.push('\n');
    out.push_str(&format!(
        "peak {top:.4}, {} samples, {block} per column\n",
        samples.len()
    ));
    out
}
