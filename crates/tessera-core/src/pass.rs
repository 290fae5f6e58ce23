//! Compiler pass trait and stage definitions.

use crate::Result;
use crate::ir::IrGraph;

/// Compilation stage for organizing passes.
///
/// Passes are grouped into stages and run in a fixed order. Within each stage,
/// passes run in the order they were registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Backend-independent graph rewriting (dead code elimination, fusion, etc.).
    Optimization,

    /// Rewrites that bring operators into the form the execution backend
    /// accepts, e.g. flattening batched dense inputs to 2-D.
    Lowering,
}

/// Trait for implementing compiler passes.
///
/// A pass is a graph transformation that runs during a specific compilation
/// stage. Passes are standalone objects so one pass may rewrite patterns that
/// span several operator kinds.
///
/// # Return Value
///
/// The `run()` method returns `Ok(true)` if the pass made changes to the
/// graph, or `Ok(false)` if no changes were made.
///
/// # Example
///
/// ```ignore
/// struct DeadCodeEliminationPass;
///
/// impl Pass for DeadCodeEliminationPass {
///     fn name(&self) -> &str {
///         "dead_code_elimination"
///     }
///
///     fn stage(&self) -> Stage {
///         Stage::Optimization
///     }
///
///     fn run(&self, graph: &mut IrGraph) -> Result<bool> {
///         let mut changed = false;
///         // Remove nodes that produce no outputs...
///         Ok(changed)
///     }
/// }
/// ```
pub trait Pass: Send + Sync {
    /// Get the pass name (used for logging and debugging).
    fn name(&self) -> &str;

    /// Get the compilation stage this pass belongs to.
    fn stage(&self) -> Stage;

    /// Run the pass on the given graph.
    ///
    /// The pass holds the only mutable borrow of `graph` for the duration of
    /// the run.
    fn run(&self, graph: &mut IrGraph) -> Result<bool>;
}
