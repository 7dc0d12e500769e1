use rustc_hash::{FxHashMap, FxHashSet};

use super::{CfgNodeKind, ControlFlowGraph};
use crate::interpreter::ExecutionState;

/// Returns a copy of `graph` with `was_executed` set from a run.
///
/// A node counts as executed when its source line is the current line of
/// some snapshot; start and end count once any snapshot exists. An edge
/// counts when both its endpoints do. This is line based: two nodes on one
/// line are marked together.
pub fn mark_executed_cfg_nodes(
    graph: &ControlFlowGraph,
    states: &[ExecutionState],
) -> ControlFlowGraph {
    let lines: FxHashSet<usize> = states.iter().map(|state| state.current_line).collect();
    let ran = !states.is_empty();

    let mut marked = graph.clone();
    for node in &mut marked.nodes {
        node.was_executed = match node.kind {
            CfgNodeKind::Start | CfgNodeKind::End => ran,
            _ => node.line.is_some_and(|line| lines.contains(&line)),
        };
    }

    let executed: FxHashMap<usize, bool> = marked
        .nodes
        .iter()
        .map(|node| (node.id, node.was_executed))
        .collect();
    let is_executed = |id: usize| executed.get(&id).copied().unwrap_or(false);
    for edge in &mut marked.edges {
        edge.was_executed = is_executed(edge.source) && is_executed(edge.target);
    }
    marked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::build_cfg;
    use crate::interpreter::execute;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    const BRANCHY: &str = indoc! {"
        let x = 1;
        if (x > 5) {
            x = 10;
        } else {
            x = 20;
        }
    "};

    fn label_state(graph: &ControlFlowGraph, label: &str) -> bool {
        graph
            .nodes
            .iter()
            .find(|node| node.label == label)
            .map(|node| node.was_executed)
            .unwrap_or_else(|| panic!("no node labelled {label}"))
    }

    #[test]
    fn only_taken_branch_is_marked() {
        let graph = build_cfg(BRANCHY).expect("program parses");
        let states = execute(BRANCHY).expect("program parses");
        let marked = mark_executed_cfg_nodes(&graph, &states);

        assert!(label_state(&marked, "start"));
        assert!(label_state(&marked, "end"));
        assert!(label_state(&marked, "let x = 1;"));
        assert!(label_state(&marked, "if (x > 5)"));
        assert!(!label_state(&marked, "x = 10;"));
        assert!(label_state(&marked, "x = 20;"));
    }

    #[test]
    fn edges_need_both_endpoints() {
        let graph = build_cfg(BRANCHY).expect("program parses");
        let states = execute(BRANCHY).expect("program parses");
        let marked = mark_executed_cfg_nodes(&graph, &states);
        for edge in &marked.edges {
            let source = marked.node(edge.source).expect("source");
            let target = marked.node(edge.target).expect("target");
            assert_eq!(edge.was_executed, source.was_executed && target.was_executed);
        }
    }

    #[test]
    fn input_graph_is_not_mutated() {
        let graph = build_cfg(BRANCHY).expect("program parses");
        let before = graph.clone();
        let states = execute(BRANCHY).expect("program parses");
        let _ = mark_executed_cfg_nodes(&graph, &states);
        assert_eq!(graph, before);
        assert!(graph.nodes.iter().all(|node| !node.was_executed));
    }

    #[test]
    fn nothing_is_marked_without_snapshots() {
        let graph = build_cfg(BRANCHY).expect("program parses");
        let marked = mark_executed_cfg_nodes(&graph, &[]);
        assert!(marked.nodes.iter().all(|node| !node.was_executed));
        assert!(marked.edges.iter().all(|edge| !edge.was_executed));
    }

    #[test]
    fn statements_sharing_a_line_are_marked_together() {
        let source = "let a = 0; if (a) { a = 1; }";
        let graph = build_cfg(source).expect("program parses");
        let states = execute(source).expect("program parses");
        let marked = mark_executed_cfg_nodes(&graph, &states);
        // The untaken `a = 1;` shares line 1 with code that ran.
        assert!(label_state(&marked, "a = 1;"));
    }
}
