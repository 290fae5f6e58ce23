//! Pattern templates for matching graph nodes.
//!
//! A `Pattern` names an operator type and, optionally, constrains the element
//! type and shape of each input and of the output with wildcards. Patterns
//! are plain descriptors: they are built once per pass and never inserted
//! into the graph.

use crate::Result;
use crate::ir::{IrEdge, IrGraph, IrNodeId, OpKind};
use crate::types::DataType;

/// Shape wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ShapePattern {
    /// Any shape.
    #[default]
    Any,

    /// Exactly this rank.
    Rank(usize),

    /// At least this rank.
    MinRank(usize),

    /// This rank, with `None` entries matching any extent.
    Dims(Vec<Option<usize>>),
}

impl ShapePattern {
    /// Check a concrete shape against this pattern.
    pub fn matches(&self, shape: &[usize]) -> bool {
        match self {
            ShapePattern::Any => true,
            ShapePattern::Rank(rank) => shape.len() == *rank,
            ShapePattern::MinRank(rank) => shape.len() >= *rank,
            ShapePattern::Dims(dims) => {
                dims.len() == shape.len()
                    && dims
                        .iter()
                        .zip(shape)
                        .all(|(want, &got)| want.map_or(true, |d| d == got))
            }
        }
    }
}

/// Element type wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypePattern {
    #[default]
    Any,
    Is(DataType),
}

impl TypePattern {
    /// Check a concrete element type against this pattern.
    pub fn matches(&self, dtype: DataType) -> bool {
        match self {
            TypePattern::Any => true,
            TypePattern::Is(want) => *want == dtype,
        }
    }
}

/// Wildcards for one tensor (an input or the output of the matched node).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TensorPattern {
    pub dtype: TypePattern,
    pub shape: ShapePattern,
}

impl TensorPattern {
    /// Matches any tensor.
    pub fn any() -> Self {
        Self::default()
    }

    /// Restrict the element type.
    pub fn with_dtype(mut self, dtype: DataType) -> Self {
        self.dtype = TypePattern::Is(dtype);
        self
    }

    /// Restrict the shape.
    pub fn with_shape(mut self, shape: ShapePattern) -> Self {
        self.shape = shape;
        self
    }

    /// Check an edge against this pattern.
    pub fn matches(&self, edge: &IrEdge) -> bool {
        self.dtype.matches(edge.dtype) && self.shape.matches(&edge.shape)
    }
}

/// Template describing which nodes a rewrite rule applies to.
///
/// # Example
///
/// ```
/// use tessera_core::{Pattern, ShapePattern, TensorPattern};
///
/// let pattern = Pattern::op("Dense")
///     .input(TensorPattern::any().with_shape(ShapePattern::MinRank(2)))
///     .input(TensorPattern::any().with_shape(ShapePattern::Rank(2)))
///     .input(TensorPattern::any());
/// assert_eq!(pattern.op_type(), "Dense");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    op: OpKind,
    inputs: Option<Vec<TensorPattern>>,
    output: TensorPattern,
}

impl Pattern {
    /// Match nodes of the given operator type, with any inputs.
    ///
    /// The name is resolved to an [`OpKind`] here. Built-in kinds match on
    /// the variant alone; any other name matches opaque nodes of that name.
    pub fn op(op_type: &str) -> Self {
        Self::kind(OpKind::from_type_name(op_type))
    }

    /// Match nodes of the same kind as `op`, with any inputs.
    pub fn kind(op: OpKind) -> Self {
        Self {
            op,
            inputs: None,
            output: TensorPattern::any(),
        }
    }

    /// Append an input constraint.
    ///
    /// Once any input is constrained, the node must have exactly as many
    /// inputs as the pattern lists.
    pub fn input(mut self, input: TensorPattern) -> Self {
        self.inputs.get_or_insert_with(Vec::new).push(input);
        self
    }

    /// Constrain the first output.
    pub fn output(mut self, output: TensorPattern) -> Self {
        self.output = output;
        self
    }

    /// Operator type this pattern matches.
    pub fn op_type(&self) -> &str {
        self.op.type_name()
    }

    /// Check whether `node_id` satisfies the pattern.
    ///
    /// A mismatch is the ordinary "not applicable" outcome and is reported as
    /// `Ok(false)`. Errors only come from a graph whose tables reference
    /// edges that do not exist.
    pub fn matches(&self, graph: &IrGraph, node_id: IrNodeId) -> Result<bool> {
        let node = graph.node(node_id)?;
        if !self.op.same_kind(node.op()) {
            return Ok(false);
        }

        if let Some(inputs) = &self.inputs {
            if inputs.len() != node.inputs().len() {
                return Ok(false);
            }
            for (pattern, &edge_id) in inputs.iter().zip(node.inputs()) {
                if !pattern.matches(graph.edge(edge_id)?) {
                    return Ok(false);
                }
            }
        }

        match node.outputs().first() {
            Some(&output) => Ok(self.output.matches(graph.edge(output)?)),
            None => Ok(self.output == TensorPattern::any()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::OpKind;

    fn dense_graph(input_shape: Vec<usize>) -> (IrGraph, IrNodeId) {
        let mut graph = IrGraph::new();
        let data = graph.add_edge(IrEdge::new("data".to_string(), DataType::F32, input_shape));
        let weights = graph.add_edge(IrEdge::new("w".to_string(), DataType::F32, vec![5, 4]));
        let bias = graph.add_edge(IrEdge::new("b".to_string(), DataType::F32, vec![5]));
        let (fc, _) = graph.add_op(
            "fc",
            OpKind::Dense,
            vec![data, weights, bias],
            DataType::F32,
            vec![6, 5],
        );
        (graph, fc)
    }

    #[test]
    fn test_shape_pattern() {
        assert!(ShapePattern::Any.matches(&[]));
        assert!(ShapePattern::Rank(2).matches(&[3, 4]));
        assert!(!ShapePattern::Rank(2).matches(&[3, 4, 5]));
        assert!(ShapePattern::MinRank(2).matches(&[3, 4, 5]));
        assert!(!ShapePattern::MinRank(2).matches(&[3]));
        assert!(ShapePattern::Dims(vec![None, Some(4)]).matches(&[7, 4]));
        assert!(!ShapePattern::Dims(vec![None, Some(4)]).matches(&[7, 5]));
        assert!(!ShapePattern::Dims(vec![None]).matches(&[7, 4]));
    }

    #[test]
    fn test_type_pattern() {
        assert!(TypePattern::Any.matches(DataType::I64));
        assert!(TypePattern::Is(DataType::F32).matches(DataType::F32));
        assert!(!TypePattern::Is(DataType::F32).matches(DataType::F16));
    }

    #[test]
    fn test_pattern_matches_op_type_only() {
        let (graph, fc) = dense_graph(vec![6, 4]);
        assert!(Pattern::op("Dense").matches(&graph, fc).unwrap());
        assert!(!Pattern::op("Reshape").matches(&graph, fc).unwrap());
    }

    #[test]
    fn test_pattern_matches_kind_not_name() {
        let mut graph = IrGraph::new();
        let data = graph.add_edge(IrEdge::new("data".to_string(), DataType::F32, vec![6, 4]));
        let (opaque, _) = graph.add_op(
            "opaque_dense",
            OpKind::Other("Dense".to_string()),
            vec![data],
            DataType::F32,
            vec![6, 4],
        );
        let (relu, _) = graph.add_op(
            "relu",
            OpKind::Other("Relu".to_string()),
            vec![data],
            DataType::F32,
            vec![6, 4],
        );
        let (reshape, _) = graph.add_op(
            "reshape",
            OpKind::Reshape { special_zero: true },
            vec![data],
            DataType::F32,
            vec![24],
        );

        assert!(!Pattern::op("Dense").matches(&graph, opaque).unwrap());
        assert!(Pattern::op("Relu").matches(&graph, relu).unwrap());
        assert!(!Pattern::op("Relu").matches(&graph, opaque).unwrap());
        assert!(Pattern::op("Reshape").matches(&graph, reshape).unwrap());
        assert!(Pattern::kind(OpKind::Reshape { special_zero: false })
            .matches(&graph, reshape)
            .unwrap());
    }

    #[test]
    fn test_pattern_input_constraints() {
        let (graph, fc) = dense_graph(vec![2, 3, 4]);

        let pattern = Pattern::op("Dense")
            .input(TensorPattern::any().with_shape(ShapePattern::MinRank(3)))
            .input(TensorPattern::any().with_shape(ShapePattern::Rank(2)))
            .input(TensorPattern::any());
        assert!(pattern.matches(&graph, fc).unwrap());

        let wrong_type = Pattern::op("Dense")
            .input(TensorPattern::any().with_dtype(DataType::F16))
            .input(TensorPattern::any())
            .input(TensorPattern::any());
        assert!(!wrong_type.matches(&graph, fc).unwrap());

        let wrong_arity = Pattern::op("Dense").input(TensorPattern::any());
        assert!(!wrong_arity.matches(&graph, fc).unwrap());
    }

    #[test]
    fn test_pattern_output_constraint() {
        let (graph, fc) = dense_graph(vec![6, 4]);

        let pattern = Pattern::op("Dense").output(
            TensorPattern::any().with_shape(ShapePattern::Dims(vec![Some(6), None])),
        );
        assert!(pattern.matches(&graph, fc).unwrap());

        let pattern = Pattern::op("Dense").output(TensorPattern::any().with_dtype(DataType::I32));
        assert!(!pattern.matches(&graph, fc).unwrap());
    }
}
