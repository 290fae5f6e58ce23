//! Tensor transfer between host and device memory for tessera.
//!
//! The runtime moves tensor data across the host/device boundary, converting
//! element types the device cannot consume or produce on the way.
//!
//! # Architecture
//!
//! - **Layouts** - [`Layout`] describes extents, padding and axis order, and
//!   maps logical coordinates to physical offsets
//! - **Memory** - [`Memory`] is either host bytes or a [`RemoteMemory`]
//!   backend, accessed through scoped [`ReadLock`] / [`WriteLock`] mappings
//! - **Conversion** - [`copy_routine`] selects the elementwise conversion for
//!   a pair of element types
//! - **Transfer** - [`transfer`] ties the three together
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tessera_core::DataType;
//! use tessera_runtime::{Layout, StagingMemory, Tensor, transfer};
//!
//! fn main() -> anyhow::Result<()> {
//!     // Device memory for a [2, 2] f16 tensor
//!     let device = Arc::new(StagingMemory::new(2 * 4));
//!     let mut remote = Tensor::remote(device, Layout::from_shape(DataType::F16, &[2, 2])?);
//!
//!     // Upload f32 host data, converting to f16
//!     let host = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], &[2, 2])?;
//!     transfer(&host, &mut remote)?;
//!
//!     // Download back to f32
//!     let mut result = Tensor::zeros(DataType::F32, &[2, 2])?;
//!     transfer(&remote, &mut result)?;
//!     assert_eq!(result.to_vec::<f32>()?, vec![1.0, 2.0, 3.0, 4.0]);
//!
//!     Ok(())
//! }
//! ```

mod convert;
mod error;
mod layout;
mod memory;
mod tensor;
mod transfer;

// Public exports
pub use convert::{CastInto, CopyRoutine, Element, SourceIndex, copy_routine};
pub use error::{Result, RuntimeError};
pub use layout::{Axis, Coord, Dims, Format, Layout, Padding, SPATIAL_AXES};
pub use memory::{AccessMode, Memory, ReadLock, RemoteMemory, StagingMemory, WriteLock};
pub use tensor::Tensor;
pub use transfer::transfer;
