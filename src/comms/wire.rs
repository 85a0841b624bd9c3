//! Plain-old-data payloads on the wire.
//!
//! Values travel as their native byte image (all ranks of a run share one
//! architecture). Received buffers carry no alignment guarantee, so decoding
//! copies element by element.

use crate::pstream_error::PstreamError;
use bytemuck::Pod;
use std::mem::size_of;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn bytes_of<T: Pod>(v: &T) -> &[u8] {
    bytemuck::bytes_of(v)
}

pub fn expect_exact_len(from: usize, actual: usize, expected: usize) -> Result<(), PstreamError> {
    if actual == expected {
        Ok(())
    } else {
        Err(PstreamError::BufferSizeMismatch {
            from,
            expected,
            actual,
        })
    }
}

/// Decode exactly one `T` received from rank `from`.
pub fn decode_one<T: Pod>(from: usize, bytes: &[u8]) -> Result<T, PstreamError> {
    expect_exact_len(from, bytes.len(), size_of::<T>())?;
    Ok(bytemuck::pod_read_unaligned(bytes))
}

/// Decode exactly `count` values received from rank `from`.
pub fn decode_vec<T: Pod>(from: usize, bytes: &[u8], count: usize) -> Result<Vec<T>, PstreamError> {
    let width = size_of::<T>();
    expect_exact_len(from, bytes.len(), width * count)?;
    if width == 0 {
        return Ok(vec![<T as bytemuck::Zeroable>::zeroed(); count]);
    }
    Ok(bytes
        .chunks_exact(width)
        .map(bytemuck::pod_read_unaligned)
        .collect())
}
