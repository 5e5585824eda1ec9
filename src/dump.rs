//! Headerless complex64 sample files (interleaved I/Q `f32`, native byte order).

use std::{
    fs::File,
    io::{BufWriter, Read, Write},
    path::Path,
};

use tracing::info;

use crate::{
    Result, Sample,
    utils::{samples_as_bytes, samples_as_mut_bytes},
};

const SAMPLE_BYTES: usize = std::mem::size_of::<Sample>();

pub fn write_cf32(path: impl AsRef<Path>, samples: &[Sample]) -> Result<()> {
    let path = path.as_ref();
    let mut f = BufWriter::new(File::create(path)?);
    f.write_all(samples_as_bytes(samples))?;
    f.flush()?;
    info!("{} samples written to {}", samples.len(), path.display());
    Ok(())
}

pub fn read_cf32(path: impl AsRef<Path>) -> Result<Vec<Sample>> {
    let path = path.as_ref();
    let mut f = File::open(path)?;
    let nbytes = f.metadata()?.len() as usize;
    if nbytes % SAMPLE_BYTES != 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "{} is {nbytes} bytes, not a whole number of complex64 samples",
                path.display()
            ),
        )
        .into());
    }
    let mut samples = vec![Sample::default(); nbytes / SAMPLE_BYTES];
    f.read_exact(samples_as_mut_bytes(&mut samples))?;
    Ok(samples)
}
