use crate::Sample;

/// Raw interleaved I/Q bytes of a sample slice, native byte order.
pub fn samples_as_bytes(x: &[Sample]) -> &[u8] {
    // SAFETY: `Complex<f32>` is `repr(C)` with two `f32`s and no padding.
    unsafe { std::slice::from_raw_parts(x.as_ptr() as *const u8, std::mem::size_of_val(x)) }
}

/// Mutable byte view for filling samples straight from a reader.
pub fn samples_as_mut_bytes(x: &mut [Sample]) -> &mut [u8] {
    // SAFETY: as above, and every bit pattern is a valid `f32`.
    unsafe { std::slice::from_raw_parts_mut(x.as_mut_ptr() as *mut u8, std::mem::size_of_val(x)) }
}
