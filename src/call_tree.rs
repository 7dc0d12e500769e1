//! Reconstruction of call nesting from a snapshot sequence.

use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::interpreter::{ExecutionState, SnapshotValue, StackFrame};
use crate::stack::ensure_sufficient_stack;

/// Name of the synthetic root node.
pub const PROGRAM_NODE: &str = "<program>";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallTreeNode {
    pub function_name: String,
    pub args: Vec<SnapshotValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_value: Option<SnapshotValue>,
    pub children: Vec<CallTreeNode>,
    pub depth: usize,
    /// Order in which the call started; the root is 0.
    pub call_index: usize,
    /// A call that made no nested calls.
    pub is_base_case: bool,
    /// An earlier call had the same function and arguments.
    pub is_duplicate: bool,
}

impl CallTreeNode {
    /// Depth of the deepest node below (or at) this one.
    pub fn max_depth(&self) -> usize {
        self.walk()
            .into_iter()
            .map(|node| node.depth)
            .max()
            .unwrap_or(self.depth)
    }

    /// Number of calls in this subtree, excluding the synthetic root.
    pub fn call_count(&self) -> usize {
        self.walk()
            .into_iter()
            .filter(|node| node.function_name != PROGRAM_NODE || node.depth > 0)
            .count()
    }

    /// Pre-order walk over this node and its descendants.
    pub fn walk(&self) -> Vec<&CallTreeNode> {
        let mut nodes = Vec::new();
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            nodes.push(node);
            pending.extend(node.children.iter().rev());
        }
        nodes
    }
}

/// Unlinks descendants one level at a time, so dropping a deep recursion's
/// tree does not recurse per call.
impl Drop for CallTreeNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

/// Arena entry used while the tree is still being discovered.
struct PendingCall {
    function_name: String,
    args: Vec<SnapshotValue>,
    return_value: Option<SnapshotValue>,
    children: Vec<usize>,
    depth: usize,
    call_index: usize,
}

impl PendingCall {
    fn from_frame(frame: &StackFrame, depth: usize, call_index: usize) -> Self {
        Self {
            function_name: frame.function_name.clone(),
            args: frame
                .arguments
                .iter()
                .map(|argument| argument.value.clone())
                .collect(),
            return_value: frame.return_value.clone(),
            children: Vec::new(),
            depth,
            call_index,
        }
    }
}

/// Builds the call tree of a run, rooted at a synthetic `<program>` node.
///
/// Nesting comes from the call stacks of consecutive snapshots: a frame
/// seen for the first time is a child of the frame below it. Frames are
/// told apart by `call_id`, so back-to-back calls at the same depth stay
/// separate. Returns `None` only for an empty sequence.
pub fn build_call_tree(states: &[ExecutionState]) -> Option<CallTreeNode> {
    if states.is_empty() {
        return None;
    }

    let mut arena = vec![PendingCall {
        function_name: PROGRAM_NODE.to_string(),
        args: Vec::new(),
        return_value: None,
        children: Vec::new(),
        depth: 0,
        call_index: 0,
    }];
    // (call_id, arena index) for each frame currently open, outermost first.
    let mut open: Vec<(u64, usize)> = Vec::new();

    for state in states {
        let shared = open
            .iter()
            .zip(&state.call_stack)
            .take_while(|((call_id, _), frame)| *call_id == frame.call_id)
            .count();
        open.truncate(shared);

        for (position, frame) in state.call_stack.iter().enumerate() {
            if let Some(&(_, index)) = open.get(position) {
                if frame.return_value.is_some() {
                    arena[index].return_value = frame.return_value.clone();
                }
                continue;
            }
            let parent = open.last().map_or(0, |&(_, index)| index);
            let index = arena.len();
            arena.push(PendingCall::from_frame(frame, position + 1, index));
            arena[parent].children.push(index);
            open.push((frame.call_id, index));
        }
    }

    let mut seen = FxHashSet::default();
    Some(assemble(&arena, 0, &mut seen))
}

fn assemble(
    arena: &[PendingCall],
    index: usize,
    seen: &mut FxHashSet<String>,
) -> CallTreeNode {
    let call = &arena[index];
    let is_duplicate = index != 0 && !seen.insert(call_key(call));
    let children: Vec<CallTreeNode> = call
        .children
        .iter()
        .map(|&child| ensure_sufficient_stack(|| assemble(arena, child, seen)))
        .collect();
    CallTreeNode {
        function_name: call.function_name.clone(),
        args: call.args.clone(),
        return_value: call.return_value.clone(),
        is_base_case: index != 0 && children.is_empty(),
        children,
        depth: call.depth,
        call_index: call.call_index,
        is_duplicate,
    }
}

fn call_key(call: &PendingCall) -> String {
    let args: Vec<String> = call.args.iter().map(ToString::to_string).collect();
    format!("{}({})", call.function_name, args.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::execute;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn tree(source: &str) -> CallTreeNode {
        let states = execute(source).expect("program parses");
        build_call_tree(&states).expect("non-empty run")
    }

    #[test]
    fn empty_sequence_has_no_tree() {
        assert_eq!(build_call_tree(&[]), None);
    }

    #[test]
    fn program_without_calls_is_a_lone_root() {
        let root = tree("let x = 1;");
        assert_eq!(root.function_name, PROGRAM_NODE);
        assert_eq!(root.depth, 0);
        assert!(root.children.is_empty());
        assert!(!root.is_base_case);
        assert_eq!(root.call_count(), 0);
    }

    #[test]
    fn recursion_nests_and_marks_base_case() {
        let root = tree(indoc! {"
            function factorial(n) {
                if (n <= 1) {
                    return 1;
                }
                return n * factorial(n - 1);
            }
            let result = factorial(5);
        "});
        assert_eq!(root.max_depth(), 5);
        assert_eq!(root.call_count(), 5);

        let mut node = &root.children[0];
        assert_eq!(node.args, vec![SnapshotValue::Number(5.0)]);
        assert_eq!(node.return_value, Some(SnapshotValue::Number(120.0)));
        while let Some(child) = node.children.first() {
            assert!(!node.is_base_case);
            node = child;
        }
        assert_eq!(node.depth, 5);
        assert_eq!(node.args, vec![SnapshotValue::Number(1.0)]);
        assert!(node.is_base_case);
        assert_eq!(node.return_value, Some(SnapshotValue::Number(1.0)));
    }

    #[test]
    fn sibling_calls_stay_separate() {
        let root = tree(indoc! {"
            function id(x) {
                return x;
            }
            let sum = id(1) + id(2);
        "});
        let names: Vec<(&str, usize)> = root
            .children
            .iter()
            .map(|child| (child.function_name.as_str(), child.call_index))
            .collect();
        assert_eq!(names, vec![("id", 1), ("id", 2)]);
        assert_eq!(root.children[1].return_value, Some(SnapshotValue::Number(2.0)));
    }

    #[test]
    fn repeated_calls_are_flagged_as_duplicates() {
        let root = tree(indoc! {"
            function fib(n) {
                if (n < 2) return n;
                return fib(n - 1) + fib(n - 2);
            }
            fib(3);
        "});
        let duplicates: Vec<&CallTreeNode> =
            root.walk().into_iter().filter(|node| node.is_duplicate).collect();
        // fib(1) is computed twice
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].args, vec![SnapshotValue::Number(1.0)]);
        assert_eq!(root.call_count(), 5);
    }

    #[test]
    fn calls_interrupted_by_errors_are_closed() {
        let root = tree(indoc! {"
            function fail() {
                throw 'nope';
            }
            try {
                fail();
            } catch (e) {}
            fail();
        "});
        assert_eq!(root.children.len(), 2);
        assert!(root.children.iter().all(|child| child.return_value.is_none()));
    }

    #[test]
    fn deep_recursion_reconstructs_every_level() {
        let root = tree(indoc! {"
            function down(n) {
                if (n === 0) {
                    return 0;
                }
                return down(n - 1);
            }
            down(1000);
        "});
        assert_eq!(root.max_depth(), 1001);
        assert_eq!(root.call_count(), 1001);
        assert_eq!(root.walk().last().map(|node| node.is_base_case), Some(true));
    }

    #[test]
    fn very_deep_trees_walk_and_drop() {
        let leaf = |depth| CallTreeNode {
            function_name: "f".to_string(),
            args: Vec::new(),
            return_value: None,
            children: Vec::new(),
            depth,
            call_index: depth,
            is_base_case: true,
            is_duplicate: false,
        };
        let mut node = leaf(200_000);
        for depth in (0..200_000).rev() {
            let mut parent = leaf(depth);
            parent.is_base_case = false;
            parent.children.push(node);
            node = parent;
        }
        assert_eq!(node.max_depth(), 200_000);
        assert_eq!(node.walk().len(), 200_001);
        drop(node);
    }
}
