//! Intermediate representation for the compiler graph.
//!
//! The IR is a directed graph where:
//! - **Nodes** (`IrNode`) are operators (e.g., Dense, Reshape)
//! - **Edges** (`IrEdge`) are tensor value flows between operators
//!
//! Nodes live in a `StableGraph` arena so their ids survive removals. Edge
//! metadata lives in a side table; producer/consumer tables record who writes
//! and who reads each edge. Replacing node X with node Y redirects every read
//! of X's outputs to Y's outputs, after which X is dropped.

use crate::types::{DataType, TensorValue};
use crate::{Error, Result};
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::Topo;

use std::collections::HashMap;
use std::fmt;

/// Type alias for IR node identifiers (backed by petgraph NodeIndex).
pub type IrNodeId = NodeIndex;

/// Unique identifier for an edge (tensor flow) in the IR graph.
///
/// This is an index into `IrGraph::edges`. Edge IDs are plain indices that
/// remain valid across graph mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IrEdgeId(pub usize);

impl IrEdgeId {
    /// Create a new edge ID.
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    /// Get the underlying index.
    pub fn index(&self) -> usize {
        self.0
    }
}

// ──────────────────────────────── OpKind ─────────────────────────────────

/// Operator kind, resolved once when the node is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpKind {
    /// Matrix multiply plus bias: inputs `data`, `weights` `[O, K]`, `bias`.
    Dense,

    /// Reshape to the i64 shape held by the second input.
    ///
    /// With `special_zero`, a `0` in the target copies the input dimension at
    /// the same index.
    Reshape { special_zero: bool },

    /// Any operator the passes here treat as opaque.
    Other(String),
}

impl OpKind {
    /// Operator type name used for pattern matching and logging.
    pub fn type_name(&self) -> &str {
        match self {
            OpKind::Dense => "Dense",
            OpKind::Reshape { .. } => "Reshape",
            OpKind::Other(name) => name,
        }
    }

    /// Resolve a type name to a kind. Names the IR has no variant for stay
    /// opaque.
    ///
    /// Variant fields take their defaults; [`OpKind::same_kind`] ignores them.
    pub fn from_type_name(name: &str) -> Self {
        match name {
            "Dense" => OpKind::Dense,
            "Reshape" => OpKind::Reshape {
                special_zero: false,
            },
            other => OpKind::Other(other.to_string()),
        }
    }

    /// Whether both are the same operator, ignoring variant fields.
    ///
    /// Opaque operators compare by name.
    pub fn same_kind(&self, other: &OpKind) -> bool {
        match (self, other) {
            (OpKind::Other(a), OpKind::Other(b)) => a == b,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

// ──────────────────────────────── IrGraph ────────────────────────────────

/// Intermediate representation graph.
///
/// Nodes are operators; edges are tensor value flows stored in a side-table.
/// petgraph edges exist solely for topological ordering.
#[derive(Debug, Clone)]
pub struct IrGraph {
    /// The graph structure (nodes only, no edge data).
    graph: StableGraph<IrNode, ()>,

    /// Edge metadata side-table. Retired edges leave a `None` so ids stay
    /// stable.
    edges: Vec<Option<IrEdge>>,

    /// Lookup table: edge name -> edge ID.
    edge_by_name: HashMap<String, IrEdgeId>,

    /// Lookup table: edge ID -> producing node ID.
    edge_producer: HashMap<IrEdgeId, IrNodeId>,

    /// Lookup table: edge ID -> consuming node IDs.
    edge_consumers: HashMap<IrEdgeId, Vec<IrNodeId>>,

    /// Graph input edge IDs.
    pub inputs: Vec<IrEdgeId>,

    /// Graph output edge IDs.
    pub outputs: Vec<IrEdgeId>,
}

impl IrGraph {
    /// Create a new empty IR graph.
    pub fn new() -> Self {
        Self {
            graph: StableGraph::new(),
            edges: Vec::new(),
            edge_by_name: HashMap::new(),
            edge_producer: HashMap::new(),
            edge_consumers: HashMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    // ── Node access ──

    /// Get an immutable reference to a node.
    pub fn node(&self, id: IrNodeId) -> Result<&IrNode> {
        self.graph
            .node_weight(id)
            .ok_or_else(|| Error::InvalidGraph(format!("Node {:?} not found", id)))
    }

    /// Get a mutable reference to a node.
    pub fn node_mut(&mut self, id: IrNodeId) -> Result<&mut IrNode> {
        self.graph
            .node_weight_mut(id)
            .ok_or_else(|| Error::InvalidGraph(format!("Node {:?} not found", id)))
    }

    /// Check whether a node is still part of the graph.
    pub fn contains_node(&self, id: IrNodeId) -> bool {
        self.graph.contains_node(id)
    }

    /// Iterate over all nodes in the graph.
    pub fn nodes(&self) -> impl Iterator<Item = (IrNodeId, &IrNode)> {
        self.graph
            .node_indices()
            .filter_map(|id| self.graph.node_weight(id).map(|node| (id, node)))
    }

    /// Get a node's friendly name.
    pub fn node_name(&self, id: IrNodeId) -> Result<&str> {
        Ok(&self.node(id)?.name)
    }

    /// Set a node's friendly name.
    pub fn set_node_name(&mut self, id: IrNodeId, name: impl Into<String>) -> Result<()> {
        self.node_mut(id)?.name = name.into();
        Ok(())
    }

    /// Find a node by its friendly name.
    ///
    /// # Errors
    ///
    /// Returns an error if no node with the given name exists.
    pub fn find_node_by_name(&self, name: &str) -> Result<IrNodeId> {
        self.nodes()
            .find(|(_, node)| node.name == name)
            .map(|(id, _)| id)
            .ok_or_else(|| Error::InvalidGraph(format!("Node '{}' not found", name)))
    }

    /// Get the output edge of a single-output node.
    pub fn single_output(&self, id: IrNodeId) -> Result<IrEdgeId> {
        match self.node(id)?.outputs() {
            [output] => Ok(*output),
            outputs => Err(Error::InvalidGraph(format!(
                "Node {:?} has {} outputs, expected 1",
                id,
                outputs.len()
            ))),
        }
    }

    // ── Edge (tensor) access ──

    /// Get an immutable reference to an edge.
    pub fn edge(&self, id: IrEdgeId) -> Result<&IrEdge> {
        self.edges
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::InvalidGraph(format!("Edge {:?} not found", id)))
    }

    /// Get a mutable reference to an edge.
    pub fn edge_mut(&mut self, id: IrEdgeId) -> Result<&mut IrEdge> {
        self.edges
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::InvalidGraph(format!("Edge {:?} not found", id)))
    }

    /// Iterate over all live edges.
    pub fn edges(&self) -> impl Iterator<Item = (IrEdgeId, &IrEdge)> {
        self.edges
            .iter()
            .enumerate()
            .filter_map(|(i, edge)| edge.as_ref().map(|edge| (IrEdgeId::new(i), edge)))
    }

    /// Look up an edge by name.
    pub fn edge_by_name(&self, name: &str) -> Option<IrEdgeId> {
        self.edge_by_name.get(name).copied()
    }

    /// Get the node that produces an edge, if any.
    pub fn edge_producer(&self, id: IrEdgeId) -> Option<IrNodeId> {
        self.edge_producer.get(&id).copied()
    }

    /// Get the nodes that consume an edge.
    pub fn edge_consumers(&self, id: IrEdgeId) -> Vec<IrNodeId> {
        self.edge_consumers.get(&id).cloned().unwrap_or_default()
    }

    // ── Graph mutation ──

    /// Add a new node to the graph and return its ID.
    ///
    /// This also updates the producer/consumer lookup tables and
    /// adds petgraph edges for topological ordering.
    pub fn add_node(&mut self, node: IrNode) -> IrNodeId {
        let outputs = node.outputs.clone();
        let inputs = node.inputs.clone();
        let node_id = self.graph.add_node(node);
        self.graph[node_id].node_index = node_id;

        for output_id in outputs {
            self.edge_producer.insert(output_id, node_id);
        }

        for input_id in inputs {
            self.edge_consumers
                .entry(input_id)
                .or_default()
                .push(node_id);

            if let Some(&producer_id) = self.edge_producer.get(&input_id) {
                self.graph.add_edge(producer_id, node_id, ());
            }
        }

        node_id
    }

    /// Add an edge (tensor) to the graph and return its ID.
    ///
    /// Edge names are unique among live edges; adding a second edge under a
    /// live name is a construction bug.
    pub fn add_edge(&mut self, edge: IrEdge) -> IrEdgeId {
        let id = IrEdgeId::new(self.edges.len());
        let previous = self.edge_by_name.insert(edge.name.clone(), id);
        debug_assert!(
            previous.is_none(),
            "edge name '{}' is already taken by {:?}",
            edge.name,
            previous
        );
        self.edges.push(Some(edge));
        id
    }

    /// Rename an edge.
    ///
    /// # Errors
    ///
    /// Returns an error if another live edge already has `name`.
    pub fn rename_edge(&mut self, id: IrEdgeId, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        match self.edge_by_name.get(&name) {
            Some(&holder) if holder == id => return Ok(()),
            Some(&holder) => {
                return Err(Error::InvalidGraph(format!(
                    "Edge name '{}' is already taken by {:?}",
                    name, holder
                )));
            }
            None => {}
        }

        let edge = self.edge_mut(id)?;
        let old_name = std::mem::replace(&mut edge.name, name.clone());
        self.edge_by_name.remove(&old_name);
        self.edge_by_name.insert(name, id);
        Ok(())
    }

    /// Drop an edge nothing produces, reads or exports any more.
    fn retire_edge(&mut self, id: IrEdgeId) {
        let Some(edge) = self.edges.get_mut(id.index()).and_then(Option::take) else {
            return;
        };
        if self.edge_by_name.get(&edge.name) == Some(&id) {
            self.edge_by_name.remove(&edge.name);
        }
        self.edge_producer.remove(&id);
        self.edge_consumers.remove(&id);
    }

    /// Add a compile-time constant edge.
    pub fn add_constant(&mut self, name: impl Into<String>, value: TensorValue) -> IrEdgeId {
        let edge = IrEdge::with_constant(name.into(), value);
        self.add_edge(edge)
    }

    /// Add a single-output operator together with its output edge.
    ///
    /// The output edge is named `<name>:0`.
    pub fn add_op(
        &mut self,
        name: impl Into<String>,
        op: OpKind,
        inputs: Vec<IrEdgeId>,
        dtype: DataType,
        shape: Vec<usize>,
    ) -> (IrNodeId, IrEdgeId) {
        let name = name.into();
        let output = self.add_edge(IrEdge::new(format!("{}:0", name), dtype, shape));

        let mut node = IrNode::new(op);
        node.name = name;
        node.inputs = inputs;
        node.outputs = vec![output];

        (self.add_node(node), output)
    }

    /// Remove a node from the graph.
    ///
    /// This also removes the node from producer/consumer lookup tables. With
    /// `StableGraph`, other node indices remain valid.
    pub fn remove_node(&mut self, id: IrNodeId) -> Result<()> {
        let node = self.node(id)?.clone();

        for output_id in &node.outputs {
            self.edge_producer.remove(output_id);
        }

        for input_id in &node.inputs {
            if let Some(consumers) = self.edge_consumers.get_mut(input_id) {
                consumers.retain(|&c| c != id);
            }
        }

        // Also drops the petgraph edges
        self.graph.remove_node(id);

        Ok(())
    }

    /// Replace `old` with `replacement` everywhere `old` is read.
    ///
    /// Every consumer input and graph output that referenced one of `old`'s
    /// output edges is redirected to the output edge of `replacement` at the
    /// same position. `old` is then removed from the graph, its output edges
    /// are retired, and each of `replacement`'s outputs takes over the name of
    /// the edge it replaced.
    pub fn replace_node(&mut self, old: IrNodeId, replacement: IrNodeId) -> Result<()> {
        let old_outputs = self.node(old)?.outputs.clone();
        let new_outputs = self.node(replacement)?.outputs.clone();

        if old_outputs.len() != new_outputs.len() {
            return Err(Error::InvalidGraph(format!(
                "Cannot replace node {:?} ({} outputs) with node {:?} ({} outputs)",
                old,
                old_outputs.len(),
                replacement,
                new_outputs.len()
            )));
        }

        for (&from, &to) in old_outputs.iter().zip(&new_outputs) {
            let consumers = self.edge_consumers.remove(&from).unwrap_or_default();

            for consumer in consumers {
                let node = self.node_mut(consumer)?;
                for input in node.inputs.iter_mut().filter(|input| **input == from) {
                    *input = to;
                }

                self.edge_consumers.entry(to).or_default().push(consumer);
                self.graph.add_edge(replacement, consumer, ());
            }

            for output in self.outputs.iter_mut().filter(|output| **output == from) {
                *output = to;
            }
        }

        self.remove_node(old)?;

        for (&from, &to) in old_outputs.iter().zip(&new_outputs) {
            let name = self.edge(from)?.name.clone();
            self.retire_edge(from);
            self.rename_edge(to, name)?;
        }
        Ok(())
    }

    // ── Graph queries ──

    /// Get the topological order of nodes in the graph.
    ///
    /// Returns nodes in an order such that all inputs to a node are produced
    /// before the node itself.
    pub fn topological_order(&self) -> Vec<IrNodeId> {
        let mut topo = Topo::new(&self.graph);
        let mut order = Vec::new();

        while let Some(id) = topo.next(&self.graph) {
            order.push(id);
        }

        order
    }

    /// Get the number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the number of live edges (tensors) in the graph.
    pub fn edge_count(&self) -> usize {
        self.edges.iter().flatten().count()
    }
}

impl Default for IrGraph {
    fn default() -> Self {
        Self::new()
    }
}

// ──────────────────────────────── IrNode ─────────────────────────────────

/// A node in the IR graph: an operator that transforms tensor edges.
#[derive(Debug, Clone)]
pub struct IrNode {
    /// Friendly name, used by downstream consumers for name-based lookup.
    pub name: String,

    /// Operator kind.
    pub op: OpKind,

    /// Input edge IDs.
    pub inputs: Vec<IrEdgeId>,

    /// Output edge IDs.
    pub outputs: Vec<IrEdgeId>,

    /// The graph node index (for efficient graph traversal).
    pub node_index: IrNodeId,
}

impl IrNode {
    /// Create a new operator node.
    pub fn new(op: OpKind) -> Self {
        Self {
            name: String::new(),
            op,
            inputs: Vec::new(),
            outputs: Vec::new(),
            node_index: NodeIndex::default(),
        }
    }

    /// Get the operator kind.
    pub fn op(&self) -> &OpKind {
        &self.op
    }

    /// Get input edge IDs.
    pub fn inputs(&self) -> &[IrEdgeId] {
        &self.inputs
    }

    /// Get output edge IDs.
    pub fn outputs(&self) -> &[IrEdgeId] {
        &self.outputs
    }

    /// Get the node index.
    pub fn node_index(&self) -> IrNodeId {
        self.node_index
    }

    /// Add an input edge.
    pub fn add_input(&mut self, edge_id: IrEdgeId) {
        self.inputs.push(edge_id);
    }

    /// Add an output edge.
    pub fn add_output(&mut self, edge_id: IrEdgeId) {
        self.outputs.push(edge_id);
    }
}

// ──────────────────────────────── EdgeData ───────────────────────────────

/// What compile-time data an edge carries.
#[derive(Debug, Clone)]
pub enum EdgeData {
    /// No compile-time data; value arrives at runtime.
    Runtime,

    /// Fully evaluated compile-time constant.
    Constant(TensorValue),
}

// ──────────────────────────────── IrEdge ─────────────────────────────────

/// An edge (tensor value flow) in the IR graph.
#[derive(Debug, Clone)]
pub struct IrEdge {
    /// Tensor name (unique within the graph).
    pub name: String,

    /// Element type.
    pub dtype: DataType,

    /// Static shape.
    pub shape: Vec<usize>,

    /// Compile-time data carried by this edge.
    pub data: EdgeData,
}

impl IrEdge {
    /// Create a new runtime edge (no compile-time data).
    pub fn new(name: String, dtype: DataType, shape: Vec<usize>) -> Self {
        Self {
            name,
            dtype,
            shape,
            data: EdgeData::Runtime,
        }
    }

    /// Create a new edge holding a constant value.
    pub fn with_constant(name: String, value: TensorValue) -> Self {
        Self {
            name,
            dtype: value.dtype,
            shape: value.shape.clone(),
            data: EdgeData::Constant(value),
        }
    }

    /// Check if this edge holds a constant value.
    pub fn is_constant(&self) -> bool {
        matches!(self.data, EdgeData::Constant(_))
    }

    /// Get the constant value, if this edge holds one.
    pub fn constant_value(&self) -> Option<&TensorValue> {
        match &self.data {
            EdgeData::Constant(value) => Some(value),
            EdgeData::Runtime => None,
        }
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}
