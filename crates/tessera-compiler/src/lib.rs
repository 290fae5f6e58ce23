//! Lowering passes and the pass pipeline for tessera graphs.
//!
//! The compiler runs passes in stages over an `IrGraph`:
//! 1. **Optimization** - Backend-independent rewrites (custom passes)
//! 2. **Lowering** - Rewrites into the operator forms the backend executes
//!
//! The built-in lowering is [`ReshapeDensePass`], which flattens batched dense
//! operators to the 2-D form the backend requires.
//!
//! # Example
//!
//! ```no_run
//! use tessera_compiler::CompilerPipeline;
//! use tessera_core::IrGraph;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let mut graph = IrGraph::new();
//! let mut pipeline = CompilerPipeline::new();
//! let report = pipeline.run(&mut graph)?;
//!
//! println!("Passes that changed the graph: {:?}", report.changed_passes);
//! # Ok(())
//! # }
//! ```

pub mod passes;

pub use passes::ReshapeDensePass;

// Re-export commonly used types from tessera-core
pub use tessera_core::{IrGraph, Pass, Result, Stage, TransformationCallback};

/// Outcome of a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Names of the passes that changed the graph, in run order.
    pub changed_passes: Vec<String>,
}

impl PipelineReport {
    /// Whether any pass changed the graph.
    pub fn changed(&self) -> bool {
        !self.changed_passes.is_empty()
    }
}

/// Compiler pipeline with pluggable passes.
///
/// The pipeline runs in fixed stages: Optimization → Lowering. Built-in passes
/// are registered in their respective stages, and custom passes can be added
/// via `add_pass()`.
pub struct CompilerPipeline {
    /// All passes to run, ordered by (stage, registration order).
    passes: Vec<Box<dyn Pass>>,
}

impl CompilerPipeline {
    /// Create a pipeline with the built-in passes.
    ///
    /// The built-in passes are:
    /// - `ReshapeDensePass` (Lowering stage)
    pub fn new() -> Self {
        let mut pipeline = Self::empty();
        pipeline.add_pass(ReshapeDensePass::new());
        pipeline
    }

    /// Create a pipeline with the built-in passes, all consulting `callback`
    /// before rewriting a node. A callback returning `true` keeps the node as
    /// it is.
    pub fn with_transformation_callback(callback: TransformationCallback) -> Self {
        let mut pipeline = Self::empty();
        pipeline.add_pass(ReshapeDensePass::with_transformation_callback(callback));
        pipeline
    }

    /// Create a pipeline without any passes.
    pub fn empty() -> Self {
        Self { passes: Vec::new() }
    }

    /// Add a custom pass to the pipeline.
    ///
    /// The pass will be inserted into the appropriate stage (determined by
    /// `pass.stage()`). Within a stage, passes run in the order they were
    /// registered.
    pub fn add_pass(&mut self, pass: impl Pass + 'static) -> &mut Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// Number of registered passes.
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Run every pass once, in stage order.
    ///
    /// # Errors
    ///
    /// Returns the first error a pass reports; passes after it do not run.
    #[tracing::instrument(skip_all, fields(num_nodes = graph.node_count(), num_passes = self.passes.len()))]
    pub fn run(&mut self, graph: &mut IrGraph) -> Result<PipelineReport> {
        // Stable sort keeps registration order within a stage
        self.passes.sort_by_key(|p| p.stage());

        let mut report = PipelineReport::default();
        for pass in &self.passes {
            let _span =
                tracing::debug_span!("pass", name = pass.name(), stage = ?pass.stage()).entered();
            if pass.run(graph)? {
                report.changed_passes.push(pass.name().to_string());
            }
        }

        tracing::debug!(
            num_nodes = graph.node_count(),
            changed = report.changed(),
            "pipeline finished"
        );
        Ok(report)
    }
}

impl Default for CompilerPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience function: runs the default pipeline over `graph`.
#[tracing::instrument(skip_all)]
pub fn lower(graph: &mut IrGraph) -> Result<PipelineReport> {
    CompilerPipeline::new().run(graph)
}
