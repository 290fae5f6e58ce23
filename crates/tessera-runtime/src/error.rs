//! Error types for the runtime crate.

use tessera_core::DataType;
use thiserror::Error;

/// Transfer and memory access errors.
///
/// None of these are transient; callers should not retry.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The conversion table has no entry for this element type pair.
    #[error("Unsupported element types combination for copy: {src} -> {dst}")]
    UnsupportedConversion { src: DataType, dst: DataType },

    /// A mapping resolved to a null pointer.
    #[error("Null buffer: {0}")]
    NullBuffer(String),

    /// The memory region is already mapped by another access.
    #[error("Memory region is already mapped")]
    AlreadyMapped,

    /// A buffer is smaller than its layout requires.
    #[error("Buffer too small: {needed} bytes needed, {available} available")]
    BufferTooSmall { needed: usize, available: usize },

    /// Source and destination disagree on the element count.
    #[error("Element count mismatch: destination holds {expected}, source holds {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// The layout cannot be used for this operation.
    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    /// Invalid tensor.
    #[error("Invalid tensor: {0}")]
    TensorError(String),
}

/// Specialized Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
