//! Element type conversion for host/device transfers.
//!
//! The device works on a narrow set of element types. Data crossing the
//! boundary in any other type is converted elementwise by a routine chosen
//! from a fixed table of `(source, destination)` pairs.

use crate::error::{Result, RuntimeError};
use crate::layout::Layout;
use bytemuck::Pod;
use half::f16;
use tessera_core::DataType;

/// A plain-old-data element with a tessera data type.
pub trait Element: Pod {
    const DTYPE: DataType;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(impl Element for $ty {
            const DTYPE: DataType = DataType::$dtype;
        })*
    };
}

impl_element! {
    f64 => F64,
    f32 => F32,
    f16 => F16,
    i64 => I64,
    i32 => I32,
    i16 => I16,
    u64 => U64,
    u32 => U32,
    u16 => U16,
    u8 => U8,
}

/// Numeric cast from `Self` to `D`.
///
/// Implemented only for the pairs the table supports.
pub trait CastInto<D> {
    fn cast(self) -> D;
}

macro_rules! impl_cast {
    ($($src:ty => $dst:ty),* $(,)?) => {
        $(impl CastInto<$dst> for $src {
            #[inline]
            fn cast(self) -> $dst {
                self as $dst
            }
        })*
    };
}

impl_cast! {
    // Inputs the device cannot consume
    f64 => f32,
    i16 => f32,
    u16 => f32,
    u64 => i32,
    i64 => i32,
    u32 => i32,
    // Outputs the device cannot produce
    f32 => f64,
    i32 => i64,
    i32 => u64,
    i32 => u32,
    f32 => i16,
    f32 => u16,
    u32 => i64,
    u32 => u64,
    f32 => f32,
}

impl CastInto<f16> for f16 {
    #[inline]
    fn cast(self) -> f16 {
        self
    }
}

impl CastInto<f16> for f32 {
    #[inline]
    fn cast(self) -> f16 {
        f16::from_f32(self)
    }
}

impl CastInto<f32> for f16 {
    #[inline]
    fn cast(self) -> f32 {
        self.to_f32()
    }
}

/// Where the source elements of a conversion live.
#[derive(Debug, Clone, Copy)]
pub enum SourceIndex<'a> {
    /// Densely packed; element `i` is at index `i`.
    Contiguous(usize),

    /// Laid out by a (possibly padded) layout; elements are read in
    /// [`Layout::coords`] order.
    Padded(&'a Layout),
}

impl SourceIndex<'_> {
    /// Number of elements the conversion produces.
    pub fn count(&self) -> usize {
        match self {
            SourceIndex::Contiguous(count) => *count,
            SourceIndex::Padded(layout) => layout.count(),
        }
    }

    /// Number of source elements the byte buffer must hold.
    pub fn span(&self) -> usize {
        match self {
            SourceIndex::Contiguous(count) => *count,
            SourceIndex::Padded(layout) => layout.padded_len(),
        }
    }
}

/// Converts `index.count()` elements from `src` bytes into `dst` bytes.
///
/// `dst` is written contiguously from the start. Callers check that both
/// buffers are large enough.
pub type CopyRoutine = fn(src: &[u8], dst: &mut [u8], index: SourceIndex<'_>);

fn convert<S, D>(src: &[u8], dst: &mut [u8], index: SourceIndex<'_>)
where
    S: Element + CastInto<D>,
    D: Element,
{
    let src_size = std::mem::size_of::<S>();
    let read = |i: usize| -> S {
        bytemuck::pod_read_unaligned(&src[i * src_size..(i + 1) * src_size])
    };

    let out = dst.chunks_exact_mut(std::mem::size_of::<D>());
    match index {
        SourceIndex::Contiguous(count) => {
            for (i, chunk) in out.take(count).enumerate() {
                let value: D = read(i).cast();
                chunk.copy_from_slice(bytemuck::bytes_of(&value));
            }
        }
        SourceIndex::Padded(layout) => {
            for (coord, chunk) in layout.coords().zip(out) {
                let value: D = read(layout.linear_offset(&coord)).cast();
                chunk.copy_from_slice(bytemuck::bytes_of(&value));
            }
        }
    }
}

/// Look up the conversion routine for `src -> dst`.
///
/// # Errors
///
/// Returns [`RuntimeError::UnsupportedConversion`] for pairs outside the
/// table.
pub fn copy_routine(src: DataType, dst: DataType) -> Result<CopyRoutine> {
    use DataType::*;

    let routine: CopyRoutine = match (src, dst) {
        (F64, F32) => convert::<f64, f32>,
        (I16, F32) => convert::<i16, f32>,
        (U16, F32) => convert::<u16, f32>,
        (U64, I32) => convert::<u64, i32>,
        (I64, I32) => convert::<i64, i32>,
        (U32, I32) => convert::<u32, i32>,

        (F32, F64) => convert::<f32, f64>,
        (I32, I64) => convert::<i32, i64>,
        (I32, U64) => convert::<i32, u64>,
        (I32, U32) => convert::<i32, u32>,
        (F32, I16) => convert::<f32, i16>,
        (F32, U16) => convert::<f32, u16>,

        // TODO: check whether the two widenings from u32 are still needed
        // once every backend produces i32 indices directly
        (U32, I64) => convert::<u32, i64>,
        (U32, U64) => convert::<u32, u64>,

        (F32, F32) => convert::<f32, f32>,
        (F16, F16) => convert::<f16, f16>,
        (F32, F16) => convert::<f32, f16>,
        (F16, F32) => convert::<f16, f32>,

        _ => return Err(RuntimeError::UnsupportedConversion { src, dst }),
    };
    Ok(routine)
}
