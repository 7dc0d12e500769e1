//! Static control-flow graph of a program, built from syntax alone.

use serde::Serialize;

use crate::ast::{ExpressionKind, FunctionDef, Program, Statement, StatementKind};
use crate::error::SyntaxError;
use crate::parser;
use crate::stack::ensure_sufficient_stack;
use crate::token::Span;

mod layout;
mod marking;

pub use layout::{HORIZONTAL_SPACING, LAYER_SPACING, layout};
pub use marking::mark_executed_cfg_nodes;

/// Longest label kept before truncation.
const MAX_LABEL_CHARS: usize = 40;

pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CfgNodeKind {
    Start,
    End,
    Statement,
    Condition,
    Loop,
    FunctionCall,
    Return,
    TryCatch,
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CfgEdgeKind {
    Normal,
    True,
    False,
    LoopBack,
    Exception,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CfgNode {
    pub id: NodeId,
    pub kind: CfgNodeKind,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub was_executed: bool,
    pub layer: usize,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CfgEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub kind: CfgEdgeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub was_executed: bool,
}

impl CfgEdge {
    pub fn is_back_edge(&self) -> bool {
        self.kind == CfgEdgeKind::LoopBack
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlFlowGraph {
    pub nodes: Vec<CfgNode>,
    pub edges: Vec<CfgEdge>,
}

impl ControlFlowGraph {
    pub fn node(&self, id: NodeId) -> Option<&CfgNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn start(&self) -> Option<&CfgNode> {
        self.nodes.iter().find(|node| node.kind == CfgNodeKind::Start)
    }

    pub fn end(&self) -> Option<&CfgNode> {
        self.nodes.iter().find(|node| node.kind == CfgNodeKind::End)
    }

    pub fn nodes_of(&self, kind: CfgNodeKind) -> impl Iterator<Item = &CfgNode> {
        self.nodes.iter().filter(move |node| node.kind == kind)
    }

    pub fn outgoing(&self, id: NodeId) -> impl Iterator<Item = &CfgEdge> {
        self.edges.iter().filter(move |edge| edge.source == id)
    }

    pub fn incoming(&self, id: NodeId) -> impl Iterator<Item = &CfgEdge> {
        self.edges.iter().filter(move |edge| edge.target == id)
    }
}

/// Parses `source` and builds its laid-out control-flow graph.
pub fn build_cfg(source: &str) -> Result<ControlFlowGraph, SyntaxError> {
    let program = parser::parse(source)?;
    Ok(build_cfg_from_program(&program, source))
}

/// Builds the graph for an already parsed program. `source` supplies labels.
pub fn build_cfg_from_program(program: &Program, source: &str) -> ControlFlowGraph {
    let mut builder = CfgBuilder::new(source);
    let start = builder.add_node(CfgNodeKind::Start, "start".to_string(), None);
    let end = builder.add_node(CfgNodeKind::End, "end".to_string(), None);
    builder.end = end;

    let last = builder.walk_block(&program.body, Link::normal(start));
    builder.connect_to_end(last);

    let mut graph = ControlFlowGraph {
        nodes: builder.nodes,
        edges: builder.edges,
    };
    layout(&mut graph);
    tracing::debug!(
        nodes = graph.nodes.len(),
        edges = graph.edges.len(),
        "control-flow graph built"
    );
    graph
}

/// Edge still to be drawn into whichever node the walk creates next.
#[derive(Debug, Clone)]
struct Link {
    from: NodeId,
    kind: CfgEdgeKind,
    label: Option<String>,
}

impl Link {
    fn normal(from: NodeId) -> Self {
        Self {
            from,
            kind: CfgEdgeKind::Normal,
            label: None,
        }
    }

    fn labelled(from: NodeId, kind: CfgEdgeKind, label: impl Into<String>) -> Self {
        Self {
            from,
            kind,
            label: Some(label.into()),
        }
    }
}

struct CfgBuilder<'src> {
    source: &'src str,
    nodes: Vec<CfgNode>,
    edges: Vec<CfgEdge>,
    end: NodeId,
}

impl<'src> CfgBuilder<'src> {
    fn new(source: &'src str) -> Self {
        Self {
            source,
            nodes: Vec::new(),
            edges: Vec::new(),
            end: 0,
        }
    }

    fn add_node(&mut self, kind: CfgNodeKind, label: String, line: Option<usize>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(CfgNode {
            id,
            kind,
            label,
            line,
            was_executed: false,
            layer: 0,
            position: Position::default(),
        });
        id
    }

    fn add_edge(
        &mut self,
        source: NodeId,
        target: NodeId,
        kind: CfgEdgeKind,
        label: Option<String>,
    ) {
        self.edges.push(CfgEdge {
            source,
            target,
            kind,
            label,
            was_executed: false,
        });
    }

    fn follow(&mut self, link: Link, target: NodeId) {
        self.add_edge(link.from, target, link.kind, link.label);
    }

    /// Creates a node reached through `link` and returns it as the next predecessor.
    fn step(&mut self, link: Link, kind: CfgNodeKind, label: String, line: usize) -> NodeId {
        let id = self.add_node(kind, label, Some(line));
        self.follow(link, id);
        id
    }

    fn connect_to_end(&mut self, link: Link) {
        let end = self.end;
        let exists = self
            .edges
            .iter()
            .any(|edge| edge.source == link.from && edge.target == end);
        if !exists {
            self.follow(link, end);
        }
    }

    fn merge(&mut self, label: &str, incoming: Vec<Link>) -> Link {
        let merge = self.add_node(CfgNodeKind::Merge, label.to_string(), None);
        for link in incoming {
            self.follow(link, merge);
        }
        Link::normal(merge)
    }

    fn walk_block(&mut self, statements: &[Statement], mut link: Link) -> Link {
        for statement in statements {
            link = self.walk_statement(statement, link);
        }
        link
    }

    fn walk_statement(&mut self, statement: &Statement, link: Link) -> Link {
        ensure_sufficient_stack(|| self.walk_statement_inner(statement, link))
    }

    fn walk_statement_inner(&mut self, statement: &Statement, link: Link) -> Link {
        let line = statement.span.line;
        match &statement.kind {
            StatementKind::Empty => link,
            StatementKind::Block(body) => self.walk_block(body, link),
            StatementKind::FunctionDeclaration(def) => {
                let id = self.step(link, CfgNodeKind::FunctionCall, signature(def), line);
                Link::normal(id)
            }
            StatementKind::Expression(expression) => {
                let kind = if matches!(expression.kind, ExpressionKind::Call { .. }) {
                    CfgNodeKind::FunctionCall
                } else {
                    CfgNodeKind::Statement
                };
                let id = self.step(link, kind, self.label(statement.span), line);
                Link::normal(id)
            }
            StatementKind::VariableDeclaration { .. }
            | StatementKind::Break
            | StatementKind::Continue
            | StatementKind::Throw(_) => {
                let id = self.step(link, CfgNodeKind::Statement, self.label(statement.span), line);
                Link::normal(id)
            }
            StatementKind::Return(_) => {
                let id = self.step(link, CfgNodeKind::Return, self.label(statement.span), line);
                self.connect_to_end(Link::normal(id));
                Link::normal(id)
            }
            StatementKind::If {
                condition,
                consequent,
                alternate,
            } => {
                let label = self.wrapped_label("if", condition.span);
                let condition = self.step(link, CfgNodeKind::Condition, label, line);
                let then_end = self.walk_statement(
                    consequent,
                    Link::labelled(condition, CfgEdgeKind::True, "true"),
                );
                let false_link = Link::labelled(condition, CfgEdgeKind::False, "false");
                let else_end = match alternate {
                    Some(alternate) => self.walk_statement(alternate, false_link),
                    None => false_link,
                };
                self.merge("end if", vec![then_end, else_end])
            }
            StatementKind::While { condition, body } => {
                let label = self.wrapped_label("while", condition.span);
                self.walk_loop(link, label, line, body)
            }
            StatementKind::DoWhile { body, condition } => {
                let label = self.wrapped_label("do ... while", condition.span);
                self.walk_loop(link, label, line, body)
            }
            StatementKind::For { body, .. }
            | StatementKind::ForOf { body, .. }
            | StatementKind::ForIn { body, .. } => {
                let header = Span {
                    end: body.span.start,
                    ..statement.span
                };
                let label = self.label(header);
                self.walk_loop(link, label, line, body)
            }
            StatementKind::Try {
                block,
                handler,
                finalizer,
            } => {
                let try_node = self.step(link, CfgNodeKind::TryCatch, "try".to_string(), line);
                let mut incoming = vec![self.walk_block(block, Link::normal(try_node))];
                if let Some(handler) = handler {
                    let label = match &handler.param {
                        Some(param) => format!("catch ({param})"),
                        None => "catch".to_string(),
                    };
                    let catch_node = self.step(
                        Link::labelled(try_node, CfgEdgeKind::Exception, "error"),
                        CfgNodeKind::TryCatch,
                        label,
                        handler.span.line,
                    );
                    incoming.push(self.walk_block(&handler.body, Link::normal(catch_node)));
                }
                let after = self.merge("end try", incoming);
                match finalizer {
                    Some(finalizer) => {
                        let finally_line = finalizer.first().map_or(line, |first| first.span.line);
                        let finally_node = self.step(
                            after,
                            CfgNodeKind::TryCatch,
                            "finally".to_string(),
                            finally_line,
                        );
                        self.walk_block(finalizer, Link::normal(finally_node))
                    }
                    None => after,
                }
            }
            StatementKind::Switch {
                discriminant,
                cases,
            } => {
                let label = self.wrapped_label("switch", discriminant.span);
                let condition = self.step(link, CfgNodeKind::Condition, label, line);
                let mut incoming = Vec::new();
                for case in cases {
                    let label = match &case.test {
                        Some(test) => {
                            truncate_label(&format!("case {}", self.source_text(test.span)))
                        }
                        None => "default".to_string(),
                    };
                    let entry = Link::labelled(condition, CfgEdgeKind::Normal, label);
                    incoming.push(self.walk_block(&case.body, entry));
                }
                if cases.iter().all(|case| case.test.is_some()) {
                    incoming.push(Link::labelled(condition, CfgEdgeKind::False, "false"));
                }
                self.merge("end switch", incoming)
            }
        }
    }

    /// Loop node, body entered on `true` and closed by a back-edge, exit on `false`.
    fn walk_loop(&mut self, link: Link, label: String, line: usize, body: &Statement) -> Link {
        let loop_node = self.step(link, CfgNodeKind::Loop, label, line);
        let body_end = self.walk_statement(
            body,
            Link::labelled(loop_node, CfgEdgeKind::True, "true"),
        );
        self.add_edge(body_end.from, loop_node, CfgEdgeKind::LoopBack, None);
        self.merge(
            "end loop",
            vec![Link::labelled(loop_node, CfgEdgeKind::False, "false")],
        )
    }

    fn source_text(&self, span: Span) -> &'src str {
        self.source.get(span.start..span.end).unwrap_or_default()
    }

    /// `keyword (expression)` with the expression's source text.
    fn wrapped_label(&self, keyword: &str, expression: Span) -> String {
        let inner = self.source_text(expression);
        let collapsed = inner.split_whitespace().collect::<Vec<_>>().join(" ");
        truncate_label(&format!("{keyword} ({collapsed})"))
    }

    /// First source line of a statement, whitespace collapsed, opening brace dropped.
    fn label(&self, span: Span) -> String {
        let first_line = self.source_text(span).lines().next().unwrap_or_default();
        let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");
        let trimmed = collapsed.trim_end_matches('{').trim_end();
        truncate_label(trimmed)
    }
}

fn signature(def: &FunctionDef) -> String {
    truncate_label(&format!(
        "function {}({})",
        def.display_name(),
        def.params.join(", ")
    ))
}

fn truncate_label(text: &str) -> String {
    if text.chars().count() <= MAX_LABEL_CHARS {
        return text.to_string();
    }
    let kept: String = text.chars().take(MAX_LABEL_CHARS).collect();
    format!("{kept}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn cfg(source: &str) -> ControlFlowGraph {
        build_cfg(source).expect("program parses")
    }

    fn edge_kinds_from(graph: &ControlFlowGraph, id: NodeId) -> Vec<CfgEdgeKind> {
        graph.outgoing(id).map(|edge| edge.kind).collect()
    }

    #[test]
    fn empty_program_links_start_to_end() {
        let graph = cfg("");
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 1);
        let start = graph.start().expect("start node");
        let end = graph.end().expect("end node");
        assert_eq!(graph.edges[0].source, start.id);
        assert_eq!(graph.edges[0].target, end.id);
    }

    #[test]
    fn straight_line_statements_chain() {
        let graph = cfg(indoc! {"
            let a = 1;
            a = a + 1;
            console.log(a);
        "});
        let kinds: Vec<CfgNodeKind> = graph.nodes.iter().map(|node| node.kind).collect();
        assert_eq!(
            kinds,
            vec![
                CfgNodeKind::Start,
                CfgNodeKind::End,
                CfgNodeKind::Statement,
                CfgNodeKind::Statement,
                CfgNodeKind::FunctionCall,
            ]
        );
        assert_eq!(graph.edges.len(), 4);
        assert_eq!(graph.nodes[2].label, "let a = 1;");
        assert_eq!(graph.nodes[4].line, Some(3));
    }

    #[test]
    fn if_has_true_and_false_edges_and_merges() {
        let graph = cfg(indoc! {"
            let x = 3;
            if (x > 2) {
                x = 0;
            }
            x;
        "});
        let conditions: Vec<&CfgNode> = graph.nodes_of(CfgNodeKind::Condition).collect();
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].label, "if (x > 2)");
        let mut kinds = edge_kinds_from(&graph, conditions[0].id);
        kinds.sort_by_key(|kind| format!("{kind:?}"));
        assert_eq!(kinds, vec![CfgEdgeKind::False, CfgEdgeKind::True]);

        let merge = graph
            .nodes_of(CfgNodeKind::Merge)
            .next()
            .expect("merge node");
        assert_eq!(merge.label, "end if");
        assert_eq!(graph.incoming(merge.id).count(), 2);
    }

    #[test]
    fn if_else_walks_both_branches() {
        let graph = cfg("if (a) { b(); } else { c(); }");
        let condition = graph
            .nodes_of(CfgNodeKind::Condition)
            .next()
            .expect("condition");
        let targets: Vec<&str> = graph
            .outgoing(condition.id)
            .filter_map(|edge| graph.node(edge.target))
            .map(|node| node.label.as_str())
            .collect();
        assert_eq!(targets, vec!["b();", "c();"]);
    }

    #[test]
    fn loops_have_one_back_edge_from_their_body() {
        let graph = cfg(indoc! {"
            let sum = 0;
            for (let i = 0; i < 3; i++) {
                sum += i;
            }
        "});
        let loop_node = graph.nodes_of(CfgNodeKind::Loop).next().expect("loop node");
        assert_eq!(loop_node.label, "for (let i = 0; i < 3; i++)");
        let back_edges: Vec<&CfgEdge> = graph
            .incoming(loop_node.id)
            .filter(|edge| edge.is_back_edge())
            .collect();
        assert_eq!(back_edges.len(), 1);
        let body = graph.node(back_edges[0].source).expect("body node");
        assert_eq!(body.label, "sum += i;");

        let exit = graph
            .outgoing(loop_node.id)
            .find(|edge| edge.kind == CfgEdgeKind::False)
            .and_then(|edge| graph.node(edge.target))
            .expect("loop exit");
        assert_eq!(exit.label, "end loop");
    }

    #[test]
    fn while_and_do_while_are_loops() {
        let graph = cfg("while (x) { x--; }\ndo { y++; } while (y < 3);");
        let labels: Vec<&str> = graph
            .nodes_of(CfgNodeKind::Loop)
            .map(|node| node.label.as_str())
            .collect();
        assert_eq!(labels, vec!["while (x)", "do ... while (y < 3)"]);
    }

    #[test]
    fn return_links_directly_to_end_once() {
        let graph = cfg("return 1;");
        let ret = graph.nodes_of(CfgNodeKind::Return).next().expect("return node");
        let end = graph.end().expect("end node");
        let to_end = graph
            .edges
            .iter()
            .filter(|edge| edge.source == ret.id && edge.target == end.id)
            .count();
        assert_eq!(to_end, 1);
    }

    #[test]
    fn try_catch_has_exception_edge() {
        let graph = cfg(indoc! {"
            try {
                risky();
            } catch (e) {
                recover(e);
            } finally {
                cleanup();
            }
        "});
        let try_nodes: Vec<&CfgNode> = graph.nodes_of(CfgNodeKind::TryCatch).collect();
        let labels: Vec<&str> = try_nodes.iter().map(|node| node.label.as_str()).collect();
        assert_eq!(labels, vec!["try", "catch (e)", "finally"]);

        let exception = graph
            .edges
            .iter()
            .find(|edge| edge.kind == CfgEdgeKind::Exception)
            .expect("exception edge");
        assert_eq!(exception.source, try_nodes[0].id);
        assert_eq!(exception.target, try_nodes[1].id);
        assert_eq!(exception.label.as_deref(), Some("error"));

        let merge = graph.nodes_of(CfgNodeKind::Merge).next().expect("end try");
        assert_eq!(
            graph.outgoing(merge.id).next().map(|edge| edge.target),
            Some(try_nodes[2].id)
        );
    }

    #[test]
    fn switch_fans_out_per_case() {
        let graph = cfg(indoc! {"
            switch (n) {
                case 1:
                    one();
                    break;
                case 2:
                    two();
            }
        "});
        let condition = graph
            .nodes_of(CfgNodeKind::Condition)
            .next()
            .expect("switch node");
        let labels: Vec<Option<&str>> = graph
            .outgoing(condition.id)
            .map(|edge| edge.label.as_deref())
            .collect();
        assert_eq!(labels, vec![Some("case 1"), Some("case 2"), Some("false")]);
    }

    #[test]
    fn function_declarations_are_single_nodes() {
        let graph = cfg(indoc! {"
            function add(a, b) {
                if (a) return a;
                return b;
            }
        "});
        let calls: Vec<&CfgNode> = graph.nodes_of(CfgNodeKind::FunctionCall).collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].label, "function add(a, b)");
        assert_eq!(graph.nodes_of(CfgNodeKind::Return).count(), 0);
    }

    #[test]
    fn long_labels_are_truncated() {
        let graph = cfg("let message = 'a very long string literal that goes on and on';");
        let label = &graph.nodes[2].label;
        assert!(label.ends_with("..."));
        assert_eq!(label.chars().count(), MAX_LABEL_CHARS + 3);
    }

    #[test]
    fn every_node_is_reachable_without_back_edges() {
        let graph = cfg(indoc! {"
            let i = 0;
            while (i < 3) {
                if (i === 1) {
                    i += 2;
                } else {
                    i++;
                }
            }
            try { f(); } catch (e) {}
        "});
        let mut reached = vec![graph.start().expect("start").id];
        let mut index = 0;
        while index < reached.len() {
            let current = reached[index];
            for edge in graph.outgoing(current).filter(|edge| !edge.is_back_edge()) {
                if !reached.contains(&edge.target) {
                    reached.push(edge.target);
                }
            }
            index += 1;
        }
        assert_eq!(reached.len(), graph.nodes.len());
    }

    #[test]
    fn building_twice_gives_the_same_shape() {
        let source = "for (const x of xs) { if (x) { log(x); } }";
        assert_eq!(cfg(source), cfg(source));
    }

    #[test]
    fn syntax_errors_are_reported() {
        assert!(build_cfg("if (").is_err());
    }
}
