//! Compiler passes for graph lowering.

mod reshape_dense;

pub use reshape_dense::ReshapeDensePass;
