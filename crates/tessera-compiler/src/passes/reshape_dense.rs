//! Dense flattening pass.
//!
//! The backend executes dense (matrix multiply plus bias) operators on 2-D
//! inputs only. This pass rewrites a dense node over a rank > 2 input into
//!
//! ```text
//! Reshape(data, [-1, K]) -> Dense([I, K] x [O, K]) -> Reshape(outShape)
//! ```
//!
//! dropping the trailing reshape when the 2-D result already has the declared
//! output shape. The node producing the final result inherits the original
//! friendly name, so lookups by name keep resolving to the same result.

use tessera_core::infer::reshape_shape;
use tessera_core::{
    Error, GraphRewrite, IrGraph, Match, OpKind, Pass, Pattern, Result, ShapePattern, Stage,
    TensorPattern, TensorValue, TransformationCallback,
};

/// Pass that flattens dense operator inputs to rank 2.
pub struct ReshapeDensePass {
    rewrite: GraphRewrite,
}

impl ReshapeDensePass {
    /// Create the pass without a veto hook.
    pub fn new() -> Self {
        Self {
            rewrite: Self::build(None),
        }
    }

    /// Create the pass with a per-node veto hook.
    pub fn with_transformation_callback(callback: TransformationCallback) -> Self {
        Self {
            rewrite: Self::build(Some(callback)),
        }
    }

    /// The template this pass matches: a dense node with a rank ≥ 2 input,
    /// rank 2 weights and any bias.
    pub fn pattern() -> Pattern {
        Pattern::op("Dense")
            .input(TensorPattern::any().with_shape(ShapePattern::MinRank(2)))
            .input(TensorPattern::any().with_shape(ShapePattern::Rank(2)))
            .input(TensorPattern::any())
    }

    /// Rewrite every matching node once; returns the number of rewrites.
    pub fn apply(&self, graph: &mut IrGraph) -> Result<usize> {
        self.rewrite.apply(graph)
    }

    fn build(callback: Option<TransformationCallback>) -> GraphRewrite {
        let mut rewrite = GraphRewrite::new("reshape_dense", Stage::Lowering);
        rewrite.add_matcher("ReshapeDense", Self::pattern(), flatten_dense_input);
        if let Some(callback) = callback {
            rewrite.set_transformation_callback(callback);
        }
        rewrite
    }
}

impl Default for ReshapeDensePass {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for ReshapeDensePass {
    fn name(&self) -> &str {
        self.rewrite.name()
    }

    fn stage(&self) -> Stage {
        self.rewrite.stage()
    }

    fn run(&self, graph: &mut IrGraph) -> Result<bool> {
        self.rewrite.run(graph)
    }
}

/// Rewrite callback. Every shape is computed before the graph is mutated, so
/// both `Ok(false)` and an error leave the graph as it was.
fn flatten_dense_input(graph: &mut IrGraph, m: &Match) -> Result<bool> {
    let fc = graph.node(m.root())?.clone();
    let &[data, weights, bias] = fc.inputs() else {
        return Ok(false);
    };
    let output = graph.single_output(m.root())?;

    let input = graph.edge(data)?;
    let input_shape = input.shape.clone();
    let input_dtype = input.dtype;
    if input_shape.len() == 2 {
        return Ok(false);
    }

    let result = graph.edge(output)?;
    let output_shape = result.shape.clone();
    let output_dtype = result.dtype;

    let in_features = *input_shape
        .last()
        .ok_or_else(|| Error::Shape(format!("Dense '{}' has a scalar input", fc.name)))?;
    let out_features = *graph
        .edge(weights)?
        .shape
        .first()
        .ok_or_else(|| Error::Shape(format!("Dense '{}' has scalar weights", fc.name)))?;

    // [I, K] x [O, K] = [I, O]
    let flat_target = vec![-1, in_features as i64];
    let flat_shape = reshape_shape(&input_shape, &flat_target, true)?;
    let dense_shape = vec![flat_shape[0], out_features];

    let restore_target: Vec<i64> = output_shape.iter().map(|&d| d as i64).collect();
    let needs_restore = dense_shape != output_shape;
    if needs_restore {
        reshape_shape(&dense_shape, &restore_target, false)?;
    }

    let name = fc.name;
    let flat_target = graph.add_constant(
        format!("{}/Reshape/shape", name),
        TensorValue::shape_vector(flat_target),
    );
    let (_, flat) = graph.add_op(
        format!("{}/Reshape", name),
        OpKind::Reshape { special_zero: true },
        vec![data, flat_target],
        input_dtype,
        flat_shape,
    );

    // The chain is built under derived names; the terminal node takes the
    // original name once the superseded node is gone
    let (dense, dense_out) = graph.add_op(
        format!("{}/FC", name),
        OpKind::Dense,
        vec![flat, weights, bias],
        output_dtype,
        dense_shape,
    );

    let terminal = if needs_restore {
        let restore_target = graph.add_constant(
            format!("{}/Reshape_1/shape", name),
            TensorValue::shape_vector(restore_target),
        );
        let (restore, _) = graph.add_op(
            format!("{}/Reshape_1", name),
            OpKind::Reshape {
                special_zero: false,
            },
            vec![dense_out, restore_target],
            output_dtype,
            output_shape,
        );
        restore
    } else {
        dense
    };

    graph.set_node_name(m.root(), format!("{}/FC", name))?;
    graph.replace_node(m.root(), terminal)?;
    graph.set_node_name(terminal, name.clone())?;

    tracing::trace!(node = %name, restored = needs_restore, "flattened dense input");
    Ok(true)
}
