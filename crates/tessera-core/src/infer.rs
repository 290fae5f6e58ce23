//! Shape inference for the operator kinds rewrite passes emit.
//!
//! Passes call into these rules to size the nodes they insert before they
//! touch the graph. They assume the graph was validated on load: only the
//! inconsistencies a rewrite could itself introduce are reported.

use crate::ir::{IrEdgeId, IrGraph, OpKind};
use crate::{Error, Result};

/// Output shape of `Reshape(input, target)`.
///
/// `-1` in `target` is inferred from the remaining element count (at most one
/// is allowed). With `special_zero`, a `0` copies the input dimension at the
/// same index; otherwise it is a literal zero-sized dimension.
pub fn reshape_shape(input: &[usize], target: &[i64], special_zero: bool) -> Result<Vec<usize>> {
    let total: usize = input.iter().product();
    let mut shape = Vec::with_capacity(target.len());
    let mut inferred = None;

    for (i, &dim) in target.iter().enumerate() {
        let resolved = match dim {
            -1 => {
                if inferred.replace(i).is_some() {
                    return Err(Error::Shape(format!(
                        "Reshape target {:?} has more than one -1",
                        target
                    )));
                }
                1
            }
            0 if special_zero => *input.get(i).ok_or_else(|| {
                Error::Shape(format!(
                    "Reshape target {:?} copies dimension {} of rank-{} input",
                    target,
                    i,
                    input.len()
                ))
            })?,
            d if d >= 0 => d as usize,
            d => {
                return Err(Error::Shape(format!(
                    "Reshape target {:?} has invalid dimension {}",
                    target, d
                )));
            }
        };
        shape.push(resolved);
    }

    let known: usize = shape.iter().product();
    if let Some(index) = inferred {
        if known == 0 || total % known != 0 {
            return Err(Error::Shape(format!(
                "Cannot infer -1 in reshape of {:?} to {:?}",
                input, target
            )));
        }
        shape[index] = total / known;
    } else if known != total {
        return Err(Error::Shape(format!(
            "Reshape of {:?} ({} elements) to {:?} ({} elements)",
            input, total, shape, known
        )));
    }

    Ok(shape)
}

/// Output shape of `Dense(input, weights [O, K], bias)`.
///
/// The last input dimension must equal `K`; it is replaced by `O`.
pub fn dense_shape(input: &[usize], weights: &[usize]) -> Result<Vec<usize>> {
    let &[out_features, in_features] = weights else {
        return Err(Error::Shape(format!(
            "Dense weights must be rank 2, got {:?}",
            weights
        )));
    };

    match input.split_last() {
        Some((&k, batch)) if k == in_features => {
            let mut shape = batch.to_vec();
            shape.push(out_features);
            Ok(shape)
        }
        _ => Err(Error::Shape(format!(
            "Dense input {:?} does not match weights {:?}",
            input, weights
        ))),
    }
}

/// Infer the output shape of `op` applied to `inputs` in `graph`.
pub fn infer_output_shape(graph: &IrGraph, op: &OpKind, inputs: &[IrEdgeId]) -> Result<Vec<usize>> {
    match op {
        OpKind::Dense => dense_shape(
            input_shape(graph, op, inputs, 0)?,
            input_shape(graph, op, inputs, 1)?,
        ),
        OpKind::Reshape { special_zero } => {
            let target_id = inputs
                .get(1)
                .ok_or_else(|| Error::Shape("Reshape is missing its target shape".to_string()))?;
            let target = graph
                .edge(*target_id)?
                .constant_value()
                .and_then(|value| value.as_i64())
                .ok_or_else(|| {
                    Error::Unsupported("Reshape target shape must be an i64 constant".to_string())
                })?;
            reshape_shape(input_shape(graph, op, inputs, 0)?, target, *special_zero)
        }
        OpKind::Other(name) => Err(Error::Unsupported(format!(
            "No shape inference rule for {}",
            name
        ))),
    }
}

fn input_shape<'g>(
    graph: &'g IrGraph,
    op: &OpKind,
    inputs: &[IrEdgeId],
    index: usize,
) -> Result<&'g [usize]> {
    let id = inputs
        .get(index)
        .ok_or_else(|| Error::Shape(format!("{} is missing input {}", op, index)))?;
    Ok(&graph.edge(*id)?.shape)
}
