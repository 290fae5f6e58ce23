//! Lowering a small multi-layer graph through the default pipeline.

use std::sync::Arc;
use tessera_compiler::{CompilerPipeline, lower};
use tessera_core::{DataType, IrEdge, IrGraph, IrNodeId, OpKind, infer};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .try_init();
}

/// Two stacked dense layers over a `[batch, seq, hidden]` input, the way a
/// transformer MLP block looks after loading:
///
/// `x [2,3,4] -> Dense("mlp.up") [2,3,8] -> Gelu("mlp.act") -> Dense("mlp.down") [2,3,4]`
fn mlp_block() -> anyhow::Result<IrGraph> {
    let mut graph = IrGraph::new();

    let x = graph.add_edge(IrEdge::new("x".to_string(), DataType::F32, vec![2, 3, 4]));
    let w_up = graph.add_edge(IrEdge::new("w_up".to_string(), DataType::F32, vec![8, 4]));
    let b_up = graph.add_edge(IrEdge::new("b_up".to_string(), DataType::F32, vec![8]));
    let w_down = graph.add_edge(IrEdge::new("w_down".to_string(), DataType::F32, vec![4, 8]));
    let b_down = graph.add_edge(IrEdge::new("b_down".to_string(), DataType::F32, vec![4]));

    let up_shape = infer::dense_shape(&[2, 3, 4], &[8, 4])?;
    let (_, up) = graph.add_op(
        "mlp.up",
        OpKind::Dense,
        vec![x, w_up, b_up],
        DataType::F32,
        up_shape.clone(),
    );
    let (_, act) = graph.add_op(
        "mlp.act",
        OpKind::Other("Gelu".to_string()),
        vec![up],
        DataType::F32,
        up_shape.clone(),
    );
    let down_shape = infer::dense_shape(&up_shape, &[4, 8])?;
    let (_, down) = graph.add_op(
        "mlp.down",
        OpKind::Dense,
        vec![act, w_down, b_down],
        DataType::F32,
        down_shape,
    );

    graph.inputs = vec![x];
    graph.outputs = vec![down];
    Ok(graph)
}

fn output_shape(graph: &IrGraph, node: IrNodeId) -> Vec<usize> {
    let edge = graph.single_output(node).unwrap();
    graph.edge(edge).unwrap().shape.clone()
}

#[test]
fn test_lower_mlp_block() -> anyhow::Result<()> {
    init_tracing();
    let mut graph = mlp_block()?;

    let report = {
        let _span = tracing::info_span!("lower_mlp_block").entered();
        lower(&mut graph)?
    };
    assert_eq!(report.changed_passes, vec!["reshape_dense".to_string()]);

    // Each dense layer became Reshape -> Dense -> Reshape
    assert_eq!(graph.node_count(), 7);

    // The result names still resolve, with their original shapes
    let up = graph.find_node_by_name("mlp.up")?;
    assert_eq!(output_shape(&graph, up), vec![2, 3, 8]);
    let down = graph.find_node_by_name("mlp.down")?;
    assert_eq!(output_shape(&graph, down), vec![2, 3, 4]);
    assert_eq!(graph.single_output(down)?, graph.outputs[0]);

    // Every dense operator now sees a 2-D input
    for (_, node) in graph.nodes().filter(|(_, n)| n.op == OpKind::Dense) {
        let input = graph.edge(node.inputs()[0])?;
        assert_eq!(input.rank(), 2, "dense '{}' input {:?}", node.name, input.shape);
    }

    // The activation reads the restored up-projection
    let act = graph.find_node_by_name("mlp.act")?;
    let act_input = graph.node(act)?.inputs()[0];
    assert_eq!(graph.edge_producer(act_input), Some(up));

    tracing::info!(num_nodes = graph.node_count(), "lowering complete");
    Ok(())
}

#[test]
fn test_lowering_is_idempotent() -> anyhow::Result<()> {
    init_tracing();
    let mut graph = mlp_block()?;

    lower(&mut graph)?;
    let nodes = graph.node_count();

    let report = lower(&mut graph)?;
    assert!(!report.changed());
    assert_eq!(graph.node_count(), nodes);
    Ok(())
}

#[test]
fn test_pipeline_veto_keeps_selected_layer() -> anyhow::Result<()> {
    init_tracing();
    let mut graph = mlp_block()?;
    let down = graph.find_node_by_name("mlp.down")?;

    let mut pipeline = CompilerPipeline::with_transformation_callback(Arc::new(
        |graph: &IrGraph, id: IrNodeId| {
            graph
                .node_name(id)
                .is_ok_and(|name| name == "mlp.down")
        },
    ));
    let report = pipeline.run(&mut graph)?;

    assert!(report.changed());
    assert!(graph.contains_node(down));
    assert_eq!(graph.node(down)?.op, OpKind::Dense);
    // mlp.up lowered to three nodes, mlp.act and mlp.down unchanged
    assert_eq!(graph.node_count(), 5);
    Ok(())
}
