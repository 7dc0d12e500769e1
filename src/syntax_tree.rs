//! Generic labelled tree of a program for the syntax-tree view.

use serde::Serialize;

use crate::ast::{
    Expression, ExpressionKind, FunctionBody, FunctionDef, LoopBinding, MemberProperty, Program,
    Statement, StatementKind, TemplateElement,
};
use crate::error::SyntaxError;
use crate::interpreter::format_number;
use crate::parser;
use crate::stack::ensure_sufficient_stack;
use crate::token::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    Program,
    Declaration,
    Statement,
    ControlFlow,
    Function,
    Expression,
    Literal,
    Identifier,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub id: usize,
    pub label: String,
    pub category: NodeCategory,
    #[serde(rename = "type")]
    pub node_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub children: Vec<TreeNode>,
    pub depth: usize,
    pub is_executing: bool,
    /// Literal value, identifier name or operator symbol.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl TreeNode {
    /// Pre-order walk over this node and its descendants.
    pub fn walk(&self) -> Vec<&TreeNode> {
        let mut nodes = Vec::new();
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            nodes.push(node);
            pending.extend(node.children.iter().rev());
        }
        nodes
    }

    pub fn find(&self, node_type: &str) -> Option<&TreeNode> {
        self.walk().into_iter().find(|node| node.node_type == node_type)
    }

    /// Copy of this node without its children.
    fn clone_shallow(&self) -> TreeNode {
        TreeNode {
            id: self.id,
            label: self.label.clone(),
            category: self.category,
            node_type: self.node_type,
            line: self.line,
            children: Vec::new(),
            depth: self.depth,
            is_executing: self.is_executing,
            value: self.value.clone(),
        }
    }
}

/// Parses `source` into a labelled tree rooted at a `Program` node.
pub fn parse_ast(source: &str) -> Result<TreeNode, SyntaxError> {
    let program = parser::parse(source)?;
    Ok(tree_from_program(&program))
}

pub fn tree_from_program(program: &Program) -> TreeNode {
    let mut builder = TreeBuilder::default();
    let mut root = builder.node(
        "Program",
        NodeCategory::Program,
        "Program".to_string(),
        Some(program.span),
        0,
    );
    root.children = program
        .body
        .iter()
        .map(|statement| builder.statement(statement, 1))
        .collect();
    root
}

/// Returns a copy of `tree` with `is_executing` set on nodes at `current_line`.
pub fn mark_executing_nodes(tree: &TreeNode, current_line: usize) -> TreeNode {
    TreeNode {
        is_executing: tree.line == Some(current_line),
        children: tree
            .children
            .iter()
            .map(|child| ensure_sufficient_stack(|| mark_executing_nodes(child, current_line)))
            .collect(),
        ..tree.clone_shallow()
    }
}

#[derive(Default)]
struct TreeBuilder {
    next_id: usize,
}

impl TreeBuilder {
    fn node(
        &mut self,
        node_type: &'static str,
        category: NodeCategory,
        label: String,
        span: Option<Span>,
        depth: usize,
    ) -> TreeNode {
        let id = self.next_id;
        self.next_id += 1;
        TreeNode {
            id,
            label,
            category,
            node_type,
            line: span.map(|span| span.line),
            children: Vec::new(),
            depth,
            is_executing: false,
            value: None,
        }
    }

    fn leaf(
        &mut self,
        node_type: &'static str,
        category: NodeCategory,
        value: String,
        span: Span,
        depth: usize,
    ) -> TreeNode {
        let label = format!("{node_type}: {value}");
        let mut node = self.node(node_type, category, label, Some(span), depth);
        node.value = Some(value);
        node
    }

    fn plain(
        &mut self,
        node_type: &'static str,
        category: NodeCategory,
        span: Span,
        depth: usize,
    ) -> TreeNode {
        self.node(node_type, category, node_type.to_string(), Some(span), depth)
    }

    fn block(&mut self, statements: &[Statement], span: Span, depth: usize) -> TreeNode {
        let mut node = self.plain("BlockStatement", NodeCategory::Statement, span, depth);
        node.children = statements
            .iter()
            .map(|statement| self.statement(statement, depth + 1))
            .collect();
        node
    }

    fn statement(&mut self, statement: &Statement, depth: usize) -> TreeNode {
        ensure_sufficient_stack(|| self.statement_inner(statement, depth))
    }

    fn statement_inner(&mut self, statement: &Statement, depth: usize) -> TreeNode {
        let span = statement.span;
        let child = depth + 1;
        match &statement.kind {
            StatementKind::VariableDeclaration { kind, declarations } => {
                let label = format!("VariableDeclaration ({})", kind.keyword());
                let mut node = self.node(
                    "VariableDeclaration",
                    NodeCategory::Declaration,
                    label,
                    Some(span),
                    depth,
                );
                node.value = Some(kind.keyword().to_string());
                for declarator in declarations {
                    let mut entry = self.leaf(
                        "VariableDeclarator",
                        NodeCategory::Declaration,
                        declarator.name.clone(),
                        declarator.span,
                        child,
                    );
                    if let Some(init) = &declarator.init {
                        entry.children.push(self.expression(init, child + 1));
                    }
                    node.children.push(entry);
                }
                node
            }
            StatementKind::FunctionDeclaration(def) => {
                self.function("FunctionDeclaration", NodeCategory::Declaration, def, depth)
            }
            StatementKind::Expression(expression) => {
                let mut node =
                    self.plain("ExpressionStatement", NodeCategory::Statement, span, depth);
                node.children.push(self.expression(expression, child));
                node
            }
            StatementKind::Block(body) => self.block(body, span, depth),
            StatementKind::If {
                condition,
                consequent,
                alternate,
            } => {
                let mut node = self.plain("IfStatement", NodeCategory::ControlFlow, span, depth);
                node.children.push(self.expression(condition, child));
                node.children.push(self.statement(consequent, child));
                if let Some(alternate) = alternate {
                    node.children.push(self.statement(alternate, child));
                }
                node
            }
            StatementKind::While { condition, body } => {
                let mut node = self.plain("WhileStatement", NodeCategory::ControlFlow, span, depth);
                node.children.push(self.expression(condition, child));
                node.children.push(self.statement(body, child));
                node
            }
            StatementKind::DoWhile { body, condition } => {
                let mut node =
                    self.plain("DoWhileStatement", NodeCategory::ControlFlow, span, depth);
                node.children.push(self.statement(body, child));
                node.children.push(self.expression(condition, child));
                node
            }
            StatementKind::For {
                init,
                test,
                update,
                body,
            } => {
                let mut node = self.plain("ForStatement", NodeCategory::ControlFlow, span, depth);
                if let Some(init) = init {
                    node.children.push(self.statement(init, child));
                }
                if let Some(test) = test {
                    node.children.push(self.expression(test, child));
                }
                if let Some(update) = update {
                    node.children.push(self.expression(update, child));
                }
                node.children.push(self.statement(body, child));
                node
            }
            StatementKind::ForOf {
                binding,
                iterable,
                body,
            } => {
                let mut node = self.plain("ForOfStatement", NodeCategory::ControlFlow, span, depth);
                node.children.push(self.loop_binding(binding, span, child));
                node.children.push(self.expression(iterable, child));
                node.children.push(self.statement(body, child));
                node
            }
            StatementKind::ForIn {
                binding,
                object,
                body,
            } => {
                let mut node = self.plain("ForInStatement", NodeCategory::ControlFlow, span, depth);
                node.children.push(self.loop_binding(binding, span, child));
                node.children.push(self.expression(object, child));
                node.children.push(self.statement(body, child));
                node
            }
            StatementKind::Break => {
                self.plain("BreakStatement", NodeCategory::ControlFlow, span, depth)
            }
            StatementKind::Continue => {
                self.plain("ContinueStatement", NodeCategory::ControlFlow, span, depth)
            }
            StatementKind::Return(argument) => {
                let mut node =
                    self.plain("ReturnStatement", NodeCategory::ControlFlow, span, depth);
                if let Some(argument) = argument {
                    node.children.push(self.expression(argument, child));
                }
                node
            }
            StatementKind::Throw(argument) => {
                let mut node = self.plain("ThrowStatement", NodeCategory::ControlFlow, span, depth);
                node.children.push(self.expression(argument, child));
                node
            }
            StatementKind::Try {
                block,
                handler,
                finalizer,
            } => {
                let mut node = self.plain("TryStatement", NodeCategory::ControlFlow, span, depth);
                node.children.push(self.block(block, span, child));
                if let Some(handler) = handler {
                    let label = match &handler.param {
                        Some(param) => format!("CatchClause ({param})"),
                        None => "CatchClause".to_string(),
                    };
                    let mut catch = self.node(
                        "CatchClause",
                        NodeCategory::ControlFlow,
                        label,
                        Some(handler.span),
                        child,
                    );
                    catch.value = handler.param.clone();
                    catch.children = handler
                        .body
                        .iter()
                        .map(|statement| self.statement(statement, child + 1))
                        .collect();
                    node.children.push(catch);
                }
                if let Some(finalizer) = finalizer {
                    let finally_span = finalizer.first().map_or(span, |first| first.span);
                    node.children.push(self.block(finalizer, finally_span, child));
                }
                node
            }
            StatementKind::Switch {
                discriminant,
                cases,
            } => {
                let mut node =
                    self.plain("SwitchStatement", NodeCategory::ControlFlow, span, depth);
                node.children.push(self.expression(discriminant, child));
                for case in cases {
                    let label = if case.test.is_some() {
                        "SwitchCase (case)"
                    } else {
                        "SwitchCase (default)"
                    };
                    let mut entry = self.node(
                        "SwitchCase",
                        NodeCategory::ControlFlow,
                        label.to_string(),
                        Some(case.span),
                        child,
                    );
                    if let Some(test) = &case.test {
                        entry.children.push(self.expression(test, child + 1));
                    }
                    for statement in &case.body {
                        entry.children.push(self.statement(statement, child + 1));
                    }
                    node.children.push(entry);
                }
                node
            }
            StatementKind::Empty => {
                self.plain("EmptyStatement", NodeCategory::Statement, span, depth)
            }
        }
    }

    fn loop_binding(&mut self, binding: &LoopBinding, span: Span, depth: usize) -> TreeNode {
        match binding.kind {
            Some(kind) => {
                let label = format!("VariableDeclaration ({})", kind.keyword());
                let mut node = self.node(
                    "VariableDeclaration",
                    NodeCategory::Declaration,
                    label,
                    Some(span),
                    depth,
                );
                node.value = Some(kind.keyword().to_string());
                let declarator = self.leaf(
                    "VariableDeclarator",
                    NodeCategory::Declaration,
                    binding.name.clone(),
                    span,
                    depth + 1,
                );
                node.children.push(declarator);
                node
            }
            None => {
                self.leaf("Identifier", NodeCategory::Identifier, binding.name.clone(), span, depth)
            }
        }
    }

    fn function(
        &mut self,
        node_type: &'static str,
        category: NodeCategory,
        def: &FunctionDef,
        depth: usize,
    ) -> TreeNode {
        let label = format!("{node_type}: {}({})", def.display_name(), def.params.join(", "));
        let mut node = self.node(node_type, category, label, Some(def.span), depth);
        node.value = def.name.clone();
        for param in &def.params {
            let param_node = self.leaf(
                "Parameter",
                NodeCategory::Identifier,
                param.clone(),
                def.span,
                depth + 1,
            );
            node.children.push(param_node);
        }
        let body = match &def.body {
            FunctionBody::Block(statements) => self.block(statements, def.span, depth + 1),
            FunctionBody::Expression(expression) => self.expression(expression, depth + 1),
        };
        node.children.push(body);
        node
    }

    fn expression(&mut self, expression: &Expression, depth: usize) -> TreeNode {
        ensure_sufficient_stack(|| self.expression_inner(expression, depth))
    }

    fn operator(
        &mut self,
        node_type: &'static str,
        symbol: &str,
        span: Span,
        depth: usize,
    ) -> TreeNode {
        let label = format!("{node_type} ({symbol})");
        let mut node = self.node(node_type, NodeCategory::Expression, label, Some(span), depth);
        node.value = Some(symbol.to_string());
        node
    }

    fn expression_inner(&mut self, expression: &Expression, depth: usize) -> TreeNode {
        let span = expression.span;
        let child = depth + 1;
        match &expression.kind {
            ExpressionKind::Number(value) => {
                self.leaf(
                    "NumericLiteral",
                    NodeCategory::Literal,
                    format_number(*value),
                    span,
                    depth,
                )
            }
            ExpressionKind::String(value) => {
                let mut node =
                    self.leaf("StringLiteral", NodeCategory::Literal, value.clone(), span, depth);
                node.label = format!("StringLiteral: \"{value}\"");
                node
            }
            ExpressionKind::Boolean(value) => {
                self.leaf("BooleanLiteral", NodeCategory::Literal, value.to_string(), span, depth)
            }
            ExpressionKind::Null => {
                self.leaf("NullLiteral", NodeCategory::Literal, "null".to_string(), span, depth)
            }
            ExpressionKind::Undefined => {
                self.leaf(
                    "Identifier",
                    NodeCategory::Identifier,
                    "undefined".to_string(),
                    span,
                    depth,
                )
            }
            ExpressionKind::Template(elements) => {
                let mut node = self.plain("TemplateLiteral", NodeCategory::Literal, span, depth);
                for element in elements {
                    let part = match element {
                        TemplateElement::Text(text) => {
                            self.leaf(
                                "TemplateElement",
                                NodeCategory::Literal,
                                text.clone(),
                                span,
                                child,
                            )
                        }
                        TemplateElement::Interpolation(inner) => self.expression(inner, child),
                    };
                    node.children.push(part);
                }
                node
            }
            ExpressionKind::Identifier(name) => {
                self.leaf("Identifier", NodeCategory::Identifier, name.clone(), span, depth)
            }
            ExpressionKind::This => {
                self.plain("ThisExpression", NodeCategory::Identifier, span, depth)
            }
            ExpressionKind::Array(elements) => {
                let mut node = self.plain("ArrayExpression", NodeCategory::Expression, span, depth);
                node.children = elements
                    .iter()
                    .map(|element| self.expression(element, child))
                    .collect();
                node
            }
            ExpressionKind::Object(properties) => {
                let mut node =
                    self.plain("ObjectExpression", NodeCategory::Expression, span, depth);
                for property in properties {
                    let mut entry = self.leaf(
                        "Property",
                        NodeCategory::Expression,
                        property.key.clone(),
                        property.value.span,
                        child,
                    );
                    entry.children.push(self.expression(&property.value, child + 1));
                    node.children.push(entry);
                }
                node
            }
            ExpressionKind::Function(def) => {
                let node_type = if def.is_arrow {
                    "ArrowFunctionExpression"
                } else {
                    "FunctionExpression"
                };
                self.function(node_type, NodeCategory::Function, def, depth)
            }
            ExpressionKind::Unary { op, argument } => {
                let mut node = self.operator("UnaryExpression", op.symbol(), span, depth);
                node.children.push(self.expression(argument, child));
                node
            }
            ExpressionKind::Update { op, prefix, target } => {
                let mut node = self.operator("UpdateExpression", op.symbol(), span, depth);
                if *prefix {
                    node.label = format!("UpdateExpression (prefix {})", op.symbol());
                }
                node.children.push(self.expression(target, child));
                node
            }
            ExpressionKind::Binary { left, op, right } => {
                let mut node = self.operator("BinaryExpression", op.symbol(), span, depth);
                node.children.push(self.expression(left, child));
                node.children.push(self.expression(right, child));
                node
            }
            ExpressionKind::Logical { left, op, right } => {
                let mut node = self.operator("LogicalExpression", op.symbol(), span, depth);
                node.children.push(self.expression(left, child));
                node.children.push(self.expression(right, child));
                node
            }
            ExpressionKind::Assign { op, target, value } => {
                let mut node = self.operator("AssignmentExpression", op.symbol(), span, depth);
                node.children.push(self.expression(target, child));
                node.children.push(self.expression(value, child));
                node
            }
            ExpressionKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                let mut node =
                    self.plain("ConditionalExpression", NodeCategory::Expression, span, depth);
                node.children.push(self.expression(test, child));
                node.children.push(self.expression(consequent, child));
                node.children.push(self.expression(alternate, child));
                node
            }
            ExpressionKind::Member { object, property } => {
                let mut node =
                    self.plain("MemberExpression", NodeCategory::Expression, span, depth);
                node.children.push(self.expression(object, child));
                let property = match property {
                    MemberProperty::Named(name) => {
                        self.leaf("Identifier", NodeCategory::Identifier, name.clone(), span, child)
                    }
                    MemberProperty::Computed(key) => self.expression(key, child),
                };
                node.children.push(property);
                node
            }
            ExpressionKind::Call { callee, args } => {
                let mut node = self.plain("CallExpression", NodeCategory::Expression, span, depth);
                node.children.push(self.expression(callee, child));
                for arg in args {
                    node.children.push(self.expression(arg, child));
                }
                node
            }
            ExpressionKind::New { callee, args } => {
                let mut node = self.plain("NewExpression", NodeCategory::Expression, span, depth);
                node.children.push(self.expression(callee, child));
                for arg in args {
                    node.children.push(self.expression(arg, child));
                }
                node
            }
        }
    }
}
