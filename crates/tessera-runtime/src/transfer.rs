//! Copying tensors between host and device memory.

use crate::convert::{CopyRoutine, SourceIndex, copy_routine};
use crate::error::{Result, RuntimeError};
use crate::tensor::Tensor;

/// How the elements get from source to destination.
#[derive(Debug)]
enum Strategy {
    /// Same element type, no padding: one byte copy.
    Contiguous,
    /// Elementwise through a conversion routine.
    Convert(CopyRoutine),
}

/// Copy `src` into `dst`, converting the element type where needed.
///
/// The destination is written contiguously and receives `dst.len()`
/// elements, taken from `src` in layout iteration order. A padded source is
/// read through its layout; the destination must be unpadded.
///
/// Remote memory on either side is mapped for the duration of the copy and
/// unmapped before this returns, on success and on every error.
///
/// # Errors
///
/// - [`RuntimeError::UnsupportedConversion`] if no routine converts
///   `src.dtype()` into `dst.dtype()`
/// - [`RuntimeError::InvalidLayout`] if `dst` is padded
/// - [`RuntimeError::ShapeMismatch`] if the element counts differ
/// - [`RuntimeError::BufferTooSmall`] if either memory is smaller than its
///   layout requires
/// - [`RuntimeError::NullBuffer`] or a backend error if mapping fails
///
/// The destination is left untouched on every error.
#[tracing::instrument(skip_all, fields(src = %src.dtype(), dst = %dst.dtype(), size = dst.len()))]
pub fn transfer(src: &Tensor, dst: &mut Tensor) -> Result<()> {
    let size = dst.len();
    if size == 0 {
        return Ok(());
    }

    let src_layout = src.layout().clone();
    let strategy = if src.dtype() == dst.dtype() && !src_layout.is_padded() {
        Strategy::Contiguous
    } else {
        Strategy::Convert(copy_routine(src.dtype(), dst.dtype())?)
    };

    if dst.layout().is_padded() {
        return Err(RuntimeError::InvalidLayout(
            "transfer destination must not be padded".to_string(),
        ));
    }
    if src.len() != size {
        return Err(RuntimeError::ShapeMismatch {
            expected: size,
            actual: src.len(),
        });
    }

    let index = if src_layout.is_padded() {
        SourceIndex::Padded(&src_layout)
    } else {
        SourceIndex::Contiguous(size)
    };
    let src_bytes = index.span() * src.dtype().size();
    let dst_bytes = size * dst.dtype().size();
    check_capacity(src_bytes, src.memory().len())?;
    check_capacity(dst_bytes, dst.memory().len())?;

    let src_lock = src.memory().lock_read()?;
    let mut dst_lock = dst.memory_mut().lock_write()?;
    let from = &src_lock.as_slice()[..src_bytes];
    let to = &mut dst_lock.as_mut_slice()[..dst_bytes];

    match strategy {
        Strategy::Contiguous => {
            tracing::trace!(bytes = dst_bytes, "contiguous copy");
            to.copy_from_slice(from);
        }
        Strategy::Convert(routine) => {
            tracing::trace!(padded = src_layout.is_padded(), "elementwise conversion");
            routine(from, to, index);
        }
    }
    Ok(())
}

fn check_capacity(needed: usize, available: usize) -> Result<()> {
    if available < needed {
        return Err(RuntimeError::BufferTooSmall { needed, available });
    }
    Ok(())
}
