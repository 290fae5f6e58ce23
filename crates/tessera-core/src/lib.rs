//! Core intermediate representation and graph rewriting for tessera.
//!
//! This crate provides the abstractions the compiler passes are built on:
//! - Graph-based IR (`IrGraph`, `IrNode`, `IrEdge`)
//! - Shape inference for the operator kinds passes emit (`infer`)
//! - The `Pass` trait and compilation stages
//! - Pattern templates (`Pattern`) and the generic rewrite engine (`GraphRewrite`)

pub mod infer;
pub mod ir;
pub mod pass;
pub mod pattern;
pub mod rewrite;
pub mod types;

// Re-export commonly used types
pub use ir::{EdgeData, IrEdge, IrEdgeId, IrGraph, IrNode, IrNodeId, OpKind};
pub use pass::{Pass, Stage};
pub use pattern::{Pattern, ShapePattern, TensorPattern, TypePattern};
pub use rewrite::{GraphRewrite, Match, RewriteCallback, TransformationCallback};
pub use types::{DataType, TensorData, TensorValue};

/// Result type using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for tessera-core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),

    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Rewrite '{rule}' failed on node '{node}': {reason}")]
    Rewrite {
        rule: String,
        node: String,
        reason: String,
    },
}
