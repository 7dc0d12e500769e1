use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use super::{ControlFlowGraph, NodeId, Position};

/// Vertical distance between layers.
pub const LAYER_SPACING: f64 = 100.0;
/// Horizontal distance between nodes of one layer.
pub const HORIZONTAL_SPACING: f64 = 180.0;

/// Assigns each node a layer and a position.
///
/// The layer is the BFS distance from the start node along forward edges;
/// loop back-edges are ignored so cycles cannot disturb the ordering. Nodes
/// the search never reaches go on one trailing layer. Within a layer nodes
/// keep creation order and are centred on `x = 0`.
pub fn layout(graph: &mut ControlFlowGraph) {
    let layers = assign_layers(graph);

    let mut rows: Vec<Vec<NodeId>> = Vec::new();
    for node in &graph.nodes {
        let layer = layers.get(&node.id).copied().unwrap_or_default();
        if rows.len() <= layer {
            rows.resize_with(layer + 1, Vec::new);
        }
        rows[layer].push(node.id);
    }

    let mut positions: FxHashMap<NodeId, (usize, Position)> = FxHashMap::default();
    for (layer, row) in rows.iter().enumerate() {
        let width = (row.len().saturating_sub(1)) as f64 * HORIZONTAL_SPACING;
        for (slot, id) in row.iter().enumerate() {
            let position = Position {
                x: slot as f64 * HORIZONTAL_SPACING - width / 2.0,
                y: layer as f64 * LAYER_SPACING,
            };
            positions.insert(*id, (layer, position));
        }
    }

    for node in &mut graph.nodes {
        if let Some((layer, position)) = positions.get(&node.id) {
            node.layer = *layer;
            node.position = *position;
        }
    }
}

fn assign_layers(graph: &ControlFlowGraph) -> FxHashMap<NodeId, usize> {
    let mut layers: FxHashMap<NodeId, usize> = FxHashMap::default();
    let mut queue = VecDeque::new();
    if let Some(start) = graph.start() {
        layers.insert(start.id, 0);
        queue.push_back(start.id);
    }

    while let Some(current) = queue.pop_front() {
        let next_layer = layers[&current] + 1;
        for edge in graph.outgoing(current).filter(|edge| !edge.is_back_edge()) {
            if !layers.contains_key(&edge.target) {
                layers.insert(edge.target, next_layer);
                queue.push_back(edge.target);
            }
        }
    }

    let trailing = layers.values().copied().max().map_or(0, |deepest| deepest + 1);
    for node in &graph.nodes {
        layers.entry(node.id).or_insert(trailing);
    }
    layers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{CfgEdge, CfgEdgeKind, CfgNode, CfgNodeKind, build_cfg};
    use pretty_assertions::assert_eq;

    fn node(id: NodeId, kind: CfgNodeKind) -> CfgNode {
        CfgNode {
            id,
            kind,
            label: format!("n{id}"),
            line: None,
            was_executed: false,
            layer: 0,
            position: Position::default(),
        }
    }

    fn edge(source: NodeId, target: NodeId, kind: CfgEdgeKind) -> CfgEdge {
        CfgEdge {
            source,
            target,
            kind,
            label: None,
            was_executed: false,
        }
    }

    #[test]
    fn layers_follow_bfs_distance() {
        let graph = build_cfg("let a = 1;\nlet b = 2;").expect("program parses");
        let layers: Vec<(&str, usize)> = graph
            .nodes
            .iter()
            .map(|node| (node.label.as_str(), node.layer))
            .collect();
        assert_eq!(
            layers,
            vec![("start", 0), ("end", 3), ("let a = 1;", 1), ("let b = 2;", 2)]
        );
        assert_eq!(graph.nodes[3].position, Position { x: 0.0, y: 200.0 });
    }

    #[test]
    fn back_edges_do_not_pull_nodes_upward() {
        let graph = build_cfg("while (x) {\n    x--;\n}").expect("program parses");
        let loop_node = graph
            .nodes_of(CfgNodeKind::Loop)
            .next()
            .expect("loop node");
        assert_eq!(loop_node.layer, 1);
        let body = graph
            .nodes
            .iter()
            .find(|node| node.label == "x--;")
            .expect("body node");
        assert_eq!(body.layer, 2);
    }

    #[test]
    fn siblings_are_centred() {
        let mut graph = ControlFlowGraph {
            nodes: vec![
                node(0, CfgNodeKind::Start),
                node(1, CfgNodeKind::Statement),
                node(2, CfgNodeKind::Statement),
                node(3, CfgNodeKind::Statement),
            ],
            edges: vec![
                edge(0, 1, CfgEdgeKind::Normal),
                edge(0, 2, CfgEdgeKind::Normal),
                edge(0, 3, CfgEdgeKind::Normal),
            ],
        };
        layout(&mut graph);
        let xs: Vec<f64> = graph.nodes[1..].iter().map(|node| node.position.x).collect();
        assert_eq!(xs, vec![-180.0, 0.0, 180.0]);
        assert!(graph.nodes[1..].iter().all(|node| node.position.y == LAYER_SPACING));
    }

    #[test]
    fn unreachable_nodes_get_a_trailing_layer() {
        let mut graph = ControlFlowGraph {
            nodes: vec![
                node(0, CfgNodeKind::Start),
                node(1, CfgNodeKind::Statement),
                node(2, CfgNodeKind::Statement),
            ],
            edges: vec![edge(0, 1, CfgEdgeKind::Normal), edge(2, 2, CfgEdgeKind::LoopBack)],
        };
        layout(&mut graph);
        assert_eq!(graph.nodes[2].layer, 2);
    }
}
