//! End-to-end transfers between host tensors and remote memory.

use half::f16;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tessera_core::DataType;
use tessera_runtime::{
    AccessMode, Dims, Element, Layout, Padding, RemoteMemory, RuntimeError, StagingMemory,
    Tensor, transfer,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// Host -> device -> host, converting on the way in.
fn through_device<S: Element, D: Element>(data: Vec<S>) -> anyhow::Result<Vec<D>> {
    let len = data.len();
    let host = Tensor::from_vec(data, &[len])?;

    let device = Arc::new(StagingMemory::new(len * D::DTYPE.size()));
    let mut remote = Tensor::remote(device.clone(), Layout::from_shape(D::DTYPE, &[len])?);
    transfer(&host, &mut remote)?;
    anyhow::ensure!(
        device.map_count() == device.unmap_count(),
        "mapping leaked: {} maps, {} unmaps",
        device.map_count(),
        device.unmap_count()
    );

    Ok(remote.to_vec::<D>()?)
}

/// Like [`through_device`], with the host source read through one element of
/// x padding on each side, so same-type pairs also go through conversion.
fn through_padded_source<S: Element, D: Element>(data: Vec<S>) -> anyhow::Result<Vec<D>> {
    let len = data.len();
    let mut raw = vec![<S as bytemuck::Zeroable>::zeroed(); len + 2];
    raw[1..=len].copy_from_slice(&data);
    let layout = Layout::new(S::DTYPE, Dims::new(1, 1, [len, 1, 1, 1]))
        .with_padding(Padding::symmetric(Dims::new(0, 0, [1, 0, 0, 0])));
    let host = Tensor::from_raw(bytemuck::cast_slice(&raw).to_vec(), layout)?;

    let device = Arc::new(StagingMemory::new(len * D::DTYPE.size()));
    let mut remote = Tensor::remote(device.clone(), Layout::from_shape(D::DTYPE, &[len])?);
    transfer(&host, &mut remote)?;
    anyhow::ensure!(!device.is_mapped(), "mapping leaked");

    Ok(remote.to_vec::<D>()?)
}

/// One test per supported `(source, destination)` pair: a populated
/// transfer, a padded-source transfer and an empty one.
macro_rules! supported_pair_tests {
    ($($name:ident: $src:ty => $dst:ty, [$($v:expr),* $(,)?], |$x:ident| $cast:expr;)*) => {
        $(
            #[test]
            fn $name() -> anyhow::Result<()> {
                init_tracing();

                let data: Vec<$src> = vec![$($v),*];
                let expected: Vec<$dst> = data.iter().map(|&$x| $cast).collect();
                assert_eq!(through_device::<$src, $dst>(data.clone())?, expected);
                assert_eq!(through_padded_source::<$src, $dst>(data)?, expected);

                assert!(through_device::<$src, $dst>(Vec::new())?.is_empty());
                assert!(through_padded_source::<$src, $dst>(Vec::new())?.is_empty());
                Ok(())
            }
        )*
    };
}

supported_pair_tests! {
    test_pair_f64_to_f32: f64 => f32, [0.0, -1.5, 3.25e10, 1.0e-50, f64::MAX], |x| x as f32;
    test_pair_i16_to_f32: i16 => f32, [0, -1, i16::MIN, i16::MAX, 1234], |x| x as f32;
    test_pair_u16_to_f32: u16 => f32, [0, 1, u16::MAX, 40000], |x| x as f32;
    test_pair_u64_to_i32: u64 => i32, [0, 7, u64::MAX, 1 << 40, 3_000_000_000], |x| x as i32;
    test_pair_i64_to_i32: i64 => i32, [0, -7, i64::MIN, i64::MAX, -(1 << 33) - 5], |x| x as i32;
    test_pair_u32_to_i32: u32 => i32, [0, 9, u32::MAX, 1 << 31], |x| x as i32;
    test_pair_f32_to_f64: f32 => f64, [0.0, -0.1, 1.0e30, f32::MIN_POSITIVE], |x| x as f64;
    test_pair_i32_to_i64: i32 => i64, [0, -1, i32::MIN, i32::MAX], |x| x as i64;
    test_pair_i32_to_u64: i32 => u64, [0, 5, -1, i32::MIN, i32::MAX], |x| x as u64;
    test_pair_i32_to_u32: i32 => u32, [0, 5, -1, i32::MIN, i32::MAX], |x| x as u32;
    test_pair_f32_to_i16: f32 => i16, [0.0, -2.7, 2.7, 1.0e9, -1.0e9], |x| x as i16;
    test_pair_f32_to_u16: f32 => u16, [0.0, 2.7, -3.0, 70000.0, 65535.0], |x| x as u16;
    test_pair_u32_to_i64: u32 => i64, [0, 1, u32::MAX, 1 << 31], |x| x as i64;
    test_pair_u32_to_u64: u32 => u64, [0, 1, u32::MAX, 1 << 31], |x| x as u64;
    test_pair_f32_to_f32: f32 => f32, [0.0, -1.25, f32::MAX, f32::MIN_POSITIVE], |x| x;
    test_pair_f16_to_f16: f16 => f16, [f16::ZERO, f16::ONE, f16::MAX, f16::from_f32(-0.5)], |x| x;
    test_pair_f32_to_f16: f32 => f16, [0.0, 0.1, -2.5, 65504.0, 1.0e6], |x| f16::from_f32(x);
    test_pair_f16_to_f32: f16 => f32, [f16::ZERO, f16::MIN, f16::from_f32(0.333)], |x| x.to_f32();
}

#[test]
fn test_upload_and_download_round_trip() -> anyhow::Result<()> {
    init_tracing();

    let device = Arc::new(StagingMemory::new(6 * 2));
    let layout = Layout::from_shape(DataType::F16, &[2, 3])?;
    let mut remote = Tensor::remote(device.clone(), layout);

    let host = Tensor::from_vec(vec![0.0f32, 0.25, -1.0, 2.0, 1024.0, -0.125], &[2, 3])?;
    transfer(&host, &mut remote)?;

    let mut back = Tensor::zeros(DataType::F32, &[2, 3])?;
    transfer(&remote, &mut back)?;

    assert_eq!(back.to_vec::<f32>()?, host.to_vec::<f32>()?);
    assert_eq!(device.map_count(), 2);
    assert_eq!(device.unmap_count(), 2);
    Ok(())
}

#[test]
fn test_zero_size_transfer_touches_nothing() -> anyhow::Result<()> {
    init_tracing();

    let device = Arc::new(StagingMemory::new(0));
    let src = Tensor::remote(device.clone(), Layout::from_shape(DataType::F64, &[0, 3])?);
    let mut dst = Tensor::zeros(DataType::I32, &[0])?;

    // f64 -> i32 has no routine, but an empty destination never asks
    transfer(&src, &mut dst)?;
    assert_eq!(device.map_count(), 0);
    Ok(())
}

#[test]
fn test_unsupported_pair_leaves_destination_unmodified() -> anyhow::Result<()> {
    init_tracing();

    let src = Tensor::from_vec(vec![1u8, 2, 3], &[3])?;
    let mut dst = Tensor::from_vec(vec![-7.0f32; 3], &[3])?;

    let err = transfer(&src, &mut dst).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::UnsupportedConversion {
            src: DataType::U8,
            dst: DataType::F32
        }
    ));
    assert_eq!(
        err.to_string(),
        "Unsupported element types combination for copy: u8 -> f32"
    );
    assert_eq!(dst.to_vec::<f32>()?, vec![-7.0; 3]);
    Ok(())
}

#[test]
fn test_padded_device_buffer_download() -> anyhow::Result<()> {
    init_tracing();

    // Two rows of three f32 with one element of x padding on each side
    let layout = Layout::new(DataType::F32, Dims::new(2, 1, [3, 1, 1, 1]))
        .with_padding(Padding::symmetric(Dims::new(0, 0, [1, 0, 0, 0])));
    assert_eq!(layout.padded_len(), 10);
    let raw = [0.0f32, 1.0, 2.0, 3.0, 0.0, 0.0, 4.0, 5.0, 6.0, 0.0];
    let device = Arc::new(StagingMemory::from_bytes(bytemuck::cast_slice(&raw).to_vec()));
    let remote = Tensor::remote(device.clone(), layout);

    let mut host = Tensor::zeros(DataType::F64, &[2, 3])?;
    transfer(&remote, &mut host)?;

    assert_eq!(host.to_vec::<f64>()?, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    assert!(!device.is_mapped());
    Ok(())
}

/// Backend whose mappings always come back null.
#[derive(Debug, Default)]
struct NullMemory {
    maps: AtomicUsize,
    unmaps: AtomicUsize,
}

// SAFETY: never hands out a dereferenceable pointer.
unsafe impl RemoteMemory for NullMemory {
    fn len(&self) -> usize {
        64
    }

    fn map(&self, _mode: AccessMode) -> tessera_runtime::Result<*mut u8> {
        self.maps.fetch_add(1, Ordering::Relaxed);
        Ok(std::ptr::null_mut())
    }

    fn unmap(&self) {
        self.unmaps.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn test_null_destination_releases_source_mapping() -> anyhow::Result<()> {
    init_tracing();

    let device = Arc::new(StagingMemory::new(4 * 4));
    let src = Tensor::remote(device.clone(), Layout::from_shape(DataType::F32, &[4])?);
    let null = Arc::new(NullMemory::default());
    let mut dst = Tensor::remote(null.clone(), Layout::from_shape(DataType::F16, &[4])?);

    assert!(matches!(
        transfer(&src, &mut dst),
        Err(RuntimeError::NullBuffer(_))
    ));

    assert!(!device.is_mapped());
    assert_eq!(device.map_count(), 1);
    assert_eq!(device.unmap_count(), 1);
    assert_eq!(null.maps.load(Ordering::Relaxed), 1);
    assert_eq!(null.unmaps.load(Ordering::Relaxed), 1);
    Ok(())
}

#[test]
fn test_aliased_remote_memory_is_released() -> anyhow::Result<()> {
    init_tracing();

    let device = Arc::new(StagingMemory::new(4 * 4));
    let src = Tensor::remote(device.clone(), Layout::from_shape(DataType::I32, &[4])?);
    let mut dst = Tensor::remote(device.clone(), Layout::from_shape(DataType::I64, &[2])?);

    // A second view over the same memory cannot be mapped while the source is
    let mut dst_u32 = dst.clone().with_layout(Layout::from_shape(DataType::U32, &[4])?);
    assert!(matches!(
        transfer(&src, &mut dst_u32),
        Err(RuntimeError::AlreadyMapped)
    ));
    assert!(!device.is_mapped());
    assert_eq!(device.map_count(), 1);
    assert_eq!(device.unmap_count(), 1);

    // Count mismatch is caught before any mapping
    assert!(matches!(
        transfer(&src, &mut dst),
        Err(RuntimeError::ShapeMismatch {
            expected: 2,
            actual: 4
        })
    ));
    assert_eq!(device.map_count(), 1);
    Ok(())
}

// Property-based tests
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_narrowing_upload_is_elementwise(
        data in prop::collection::vec(any::<i64>(), 0..64)
    ) {
        let expected: Vec<i32> = data.iter().map(|&v| v as i32).collect();
        let converted = through_device::<i64, i32>(data).unwrap();
        prop_assert_eq!(converted, expected);
    }

    #[test]
    fn test_float_download_is_elementwise(
        data in prop::collection::vec(-1.0e6f32..1.0e6f32, 0..64)
    ) {
        let expected: Vec<f64> = data.iter().map(|&v| v as f64).collect();
        let converted = through_device::<f32, f64>(data).unwrap();
        prop_assert_eq!(converted, expected);
    }

    #[test]
    fn test_unsigned_widening_is_elementwise(
        data in prop::collection::vec(any::<u32>(), 0..64)
    ) {
        let expected: Vec<i64> = data.iter().map(|&v| v as i64).collect();
        let converted = through_device::<u32, i64>(data).unwrap();
        prop_assert_eq!(converted, expected);
    }

    #[test]
    fn test_half_precision_upload_is_elementwise(
        data in prop::collection::vec(-65504.0f32..65504.0f32, 0..64)
    ) {
        let expected: Vec<f16> = data.iter().map(|&v| f16::from_f32(v)).collect();
        let converted = through_device::<f32, f16>(data).unwrap();
        prop_assert_eq!(converted, expected);
    }
}
