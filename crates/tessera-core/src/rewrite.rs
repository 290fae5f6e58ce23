//! Pattern-driven graph rewriting.
//!
//! A `GraphRewrite` holds a list of matchers, each a `Pattern` plus a
//! callback. `apply` visits every node that exists when the run starts, once,
//! in topological order. For the first matcher whose pattern fits (and that
//! the transformation callback does not veto), the rewrite callback decides
//! whether to substitute the node.

use crate::ir::{IrGraph, IrNodeId};
use crate::pass::{Pass, Stage};
use crate::pattern::Pattern;
use crate::Result;

use std::sync::Arc;

/// A matched node, handed to the rewrite callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    root: IrNodeId,
}

impl Match {
    pub fn new(root: IrNodeId) -> Self {
        Self { root }
    }

    /// The node the pattern matched.
    pub fn root(&self) -> IrNodeId {
        self.root
    }
}

/// Rewrite callback: returns `Ok(true)` if it consumed the match.
///
/// A callback that returns `Ok(false)` must leave the graph untouched.
pub type RewriteCallback = Box<dyn Fn(&mut IrGraph, &Match) -> Result<bool> + Send + Sync>;

/// Per-node veto hook: returning `true` skips the node.
pub type TransformationCallback = Arc<dyn Fn(&IrGraph, IrNodeId) -> bool + Send + Sync>;

struct Matcher {
    name: String,
    pattern: Pattern,
    callback: RewriteCallback,
}

/// Pass that applies registered pattern rewrites to a graph.
pub struct GraphRewrite {
    name: String,
    stage: Stage,
    matchers: Vec<Matcher>,
    transformation_callback: Option<TransformationCallback>,
}

impl GraphRewrite {
    /// Create an empty rewrite pass.
    pub fn new(name: impl Into<String>, stage: Stage) -> Self {
        Self {
            name: name.into(),
            stage,
            matchers: Vec::new(),
            transformation_callback: None,
        }
    }

    /// Register a rule.
    ///
    /// Rules are tried in registration order; the first one that consumes a
    /// node wins.
    pub fn add_matcher<F>(&mut self, name: impl Into<String>, pattern: Pattern, callback: F) -> &mut Self
    where
        F: Fn(&mut IrGraph, &Match) -> Result<bool> + Send + Sync + 'static,
    {
        self.matchers.push(Matcher {
            name: name.into(),
            pattern,
            callback: Box::new(callback),
        });
        self
    }

    /// Install the per-node veto hook.
    pub fn set_transformation_callback(&mut self, callback: TransformationCallback) -> &mut Self {
        self.transformation_callback = Some(callback);
        self
    }

    /// Number of registered rules.
    pub fn matcher_count(&self) -> usize {
        self.matchers.len()
    }

    fn is_vetoed(&self, graph: &IrGraph, node_id: IrNodeId) -> bool {
        self.transformation_callback
            .as_ref()
            .is_some_and(|veto| veto(graph, node_id))
    }

    /// Apply all rules once over the graph and return how many rewrites
    /// were applied.
    ///
    /// Nodes created by callbacks during this run are not visited; nodes
    /// removed by an earlier callback are skipped. An error from a callback
    /// aborts the run and is returned as is.
    pub fn apply(&self, graph: &mut IrGraph) -> Result<usize> {
        let mut applied = 0;

        for node_id in graph.topological_order() {
            for matcher in &self.matchers {
                if !graph.contains_node(node_id) {
                    break;
                }
                if !matcher.pattern.matches(graph, node_id)? {
                    continue;
                }
                if self.is_vetoed(graph, node_id) {
                    tracing::trace!(rule = %matcher.name, node = ?node_id, "rewrite vetoed");
                    continue;
                }

                let node_name = graph.node_name(node_id)?.to_string();
                if (matcher.callback)(graph, &Match::new(node_id))? {
                    tracing::debug!(rule = %matcher.name, node = %node_name, "rewrite applied");
                    applied += 1;
                    break;
                }
            }
        }

        Ok(applied)
    }
}

impl Pass for GraphRewrite {
    fn name(&self) -> &str {
        &self.name
    }

    fn stage(&self) -> Stage {
        self.stage
    }

    fn run(&self, graph: &mut IrGraph) -> Result<bool> {
        Ok(self.apply(graph)? > 0)
    }
}
