//! User-facing tensor type for host/device data interchange.

use crate::convert::Element;
use crate::error::{Result, RuntimeError};
use crate::layout::Layout;
use crate::memory::{Memory, RemoteMemory};
use std::sync::Arc;
use tessera_core::DataType;

/// A tensor: a layout over host or remote memory.
///
/// Host tensors own their bytes. Remote tensors share a [`RemoteMemory`]
/// backend and are only readable through a mapping.
#[derive(Debug, Clone)]
pub struct Tensor {
    memory: Memory,
    layout: Layout,
    shape: Vec<usize>,
}

impl Tensor {
    /// Create a host tensor from a vector with a given shape.
    ///
    /// # Example
    /// ```
    /// # use tessera_runtime::Tensor;
    /// let data = vec![1.0f32, 2.0, 3.0, 4.0];
    /// let tensor = Tensor::from_vec(data, &[2, 2]).unwrap();
    /// assert_eq!(tensor.len(), 4);
    /// ```
    ///
    /// # Errors
    /// Returns an error if the data length doesn't match the shape or the
    /// shape has more axes than a layout supports.
    pub fn from_vec<T: Element>(data: Vec<T>, shape: &[usize]) -> Result<Self> {
        let layout = Layout::from_shape(T::DTYPE, shape)?;
        if data.len() != layout.count() {
            return Err(RuntimeError::ShapeMismatch {
                expected: layout.count(),
                actual: data.len(),
            });
        }

        Ok(Self {
            memory: Memory::Host(bytemuck::cast_slice(&data).to_vec()),
            shape: layout.shape(),
            layout,
        })
    }

    /// Zero-filled host tensor.
    pub fn zeros(dtype: DataType, shape: &[usize]) -> Result<Self> {
        let layout = Layout::from_shape(dtype, shape)?;
        Ok(Self {
            memory: Memory::Host(vec![0u8; layout.bytes()]),
            shape: layout.shape(),
            layout,
        })
    }

    /// Host tensor over raw bytes laid out by `layout`.
    ///
    /// # Errors
    /// Returns [`RuntimeError::BufferTooSmall`] if `data` does not cover the
    /// padded layout.
    pub fn from_raw(data: Vec<u8>, layout: Layout) -> Result<Self> {
        if data.len() < layout.bytes() {
            return Err(RuntimeError::BufferTooSmall {
                needed: layout.bytes(),
                available: data.len(),
            });
        }
        Ok(Self {
            shape: layout.shape(),
            memory: Memory::Host(data),
            layout,
        })
    }

    /// Tensor over backend memory.
    ///
    /// The backend's size is checked against the layout when the tensor takes
    /// part in a transfer.
    pub fn remote(memory: Arc<dyn RemoteMemory>, layout: Layout) -> Self {
        Self {
            shape: layout.shape(),
            memory: Memory::Remote(memory),
            layout,
        }
    }

    /// Replace the layout, keeping the memory.
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.shape = layout.shape();
        self.layout = layout;
        self
    }

    /// Read the logical elements out, in layout iteration order.
    ///
    /// # Errors
    /// Returns an error if `T` doesn't match the tensor's data type, the
    /// memory is smaller than the layout, or a remote mapping fails.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.dtype() {
            return Err(RuntimeError::TensorError(format!(
                "Type mismatch: tensor holds {}, requested {}",
                self.dtype(),
                T::DTYPE
            )));
        }

        let lock = self.memory.lock_read()?;
        let bytes = lock.as_slice();
        let size = std::mem::size_of::<T>();
        if bytes.len() < self.layout.bytes() {
            return Err(RuntimeError::BufferTooSmall {
                needed: self.layout.bytes(),
                available: bytes.len(),
            });
        }

        if !self.layout.is_padded() {
            return Ok(bytes[..self.len() * size]
                .chunks_exact(size)
                .map(bytemuck::pod_read_unaligned)
                .collect());
        }
        Ok(self
            .layout
            .coords()
            .map(|coord| {
                let offset = self.layout.linear_offset(&coord) * size;
                bytemuck::pod_read_unaligned(&bytes[offset..offset + size])
            })
            .collect())
    }

    /// Get the logical shape of the tensor, as reported by its layout.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Get the data type of the tensor.
    pub fn dtype(&self) -> DataType {
        self.layout.dtype
    }

    /// Get the total number of logical elements in the tensor.
    pub fn len(&self) -> usize {
        self.layout.count()
    }

    /// Check if the tensor is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_remote(&self) -> bool {
        self.memory.is_remote()
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }
}
