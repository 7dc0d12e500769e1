use std::rc::Rc;

use thiserror::Error;

use crate::ast::{
    AssignOperator, BinaryOperator, CatchClause, DeclarationKind, Declarator, Expression,
    ExpressionKind, FunctionBody, FunctionDef, LogicalOperator, LoopBinding, MemberProperty,
    Program, Property, Statement, StatementKind, SwitchCase, TemplateElement, UnaryOperator,
    UpdateOperator,
};
use crate::error::SyntaxError;
use crate::lexer::{self, LexError};
use crate::stack::ensure_sufficient_stack;
use crate::token::{Span, TemplatePart, Token, TokenKind};

#[derive(Debug, Error, PartialEq, Clone)]
#[error("{message} at line {line}, column {column}")]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl ParseError {
    fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            line: span.line,
            column: span.column,
        }
    }
}

impl From<LexError> for ParseError {
    fn from(error: LexError) -> Self {
        Self {
            line: error.line(),
            column: error.column(),
            message: error.to_string(),
        }
    }
}

type ParseResult<T> = Result<T, ParseError>;

pub struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    position: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token<'a>>) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    pub fn parse_program(mut self) -> ParseResult<Program> {
        let start = self.current().span;
        let mut body = Vec::new();
        while !self.at(&TokenKind::EOF) {
            body.push(self.parse_statement()?);
        }
        let end = self.current().span;
        Ok(Program {
            body,
            span: start.to(end),
        })
    }

    fn parse_statement(&mut self) -> ParseResult<Statement> {
        ensure_sufficient_stack(|| self.parse_statement_inner())
    }

    fn parse_statement_inner(&mut self) -> ParseResult<Statement> {
        let start = self.current().span;
        match self.current().kind {
            TokenKind::Let | TokenKind::Const | TokenKind::Var => {
                let kind = self.parse_variable_declaration()?;
                self.consume_semicolon()?;
                Ok(self.finish_statement(kind, start))
            }
            TokenKind::Function => {
                self.advance();
                let function = self.parse_function_rest(start, true)?;
                Ok(self.finish_statement(StatementKind::FunctionDeclaration(function), start))
            }
            TokenKind::LBrace => {
                let body = self.parse_block()?;
                Ok(self.finish_statement(StatementKind::Block(body), start))
            }
            TokenKind::If => self.parse_if(),
            TokenKind::While => {
                self.advance();
                let condition = self.parse_parenthesized()?;
                let body = Box::new(self.parse_statement()?);
                Ok(self.finish_statement(StatementKind::While { condition, body }, start))
            }
            TokenKind::Do => {
                self.advance();
                let body = Box::new(self.parse_statement()?);
                self.expect(TokenKind::While)?;
                let condition = self.parse_parenthesized()?;
                if self.at(&TokenKind::Semicolon) {
                    self.advance();
                }
                Ok(self.finish_statement(StatementKind::DoWhile { body, condition }, start))
            }
            TokenKind::For => self.parse_for(),
            TokenKind::Break => {
                self.advance();
                self.consume_semicolon()?;
                Ok(self.finish_statement(StatementKind::Break, start))
            }
            TokenKind::Continue => {
                self.advance();
                self.consume_semicolon()?;
                Ok(self.finish_statement(StatementKind::Continue, start))
            }
            TokenKind::Return => {
                self.advance();
                let value = if self.at_statement_end() {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.consume_semicolon()?;
                Ok(self.finish_statement(StatementKind::Return(value), start))
            }
            TokenKind::Throw => {
                self.advance();
                if self.current().newline_before {
                    return Err(ParseError::new("Illegal newline after throw", start));
                }
                let value = self.parse_expression()?;
                self.consume_semicolon()?;
                Ok(self.finish_statement(StatementKind::Throw(value), start))
            }
            TokenKind::Try => self.parse_try(),
            TokenKind::Switch => self.parse_switch(),
            TokenKind::Semicolon => {
                self.advance();
                Ok(self.finish_statement(StatementKind::Empty, start))
            }
            _ => {
                let expression = self.parse_expression()?;
                self.consume_semicolon()?;
                Ok(self.finish_statement(StatementKind::Expression(expression), start))
            }
        }
    }

    fn parse_variable_declaration(&mut self) -> ParseResult<StatementKind> {
        let kind = match self.advance().kind {
            TokenKind::Let => DeclarationKind::Let,
            TokenKind::Const => DeclarationKind::Const,
            _ => DeclarationKind::Var,
        };
        let mut declarations = Vec::new();
        loop {
            let start = self.current().span;
            let name = self.expect_identifier()?;
            let init = if self.at(&TokenKind::Assign) {
                self.advance();
                Some(self.parse_assignment()?)
            } else {
                None
            };
            if init.is_none() && kind == DeclarationKind::Const {
                return Err(ParseError::new(
                    "Missing initializer in const declaration",
                    start,
                ));
            }
            declarations.push(Declarator {
                name,
                init,
                span: start.to(self.previous_span()),
            });
            if !self.at(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        Ok(StatementKind::VariableDeclaration { kind, declarations })
    }

    fn parse_if(&mut self) -> ParseResult<Statement> {
        let start = self.expect(TokenKind::If)?;
        let condition = self.parse_parenthesized()?;
        let consequent = Box::new(self.parse_statement()?);
        let alternate = if self.at(&TokenKind::Else) {
            self.advance();
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(self.finish_statement(
            StatementKind::If {
                condition,
                consequent,
                alternate,
            },
            start,
        ))
    }

    fn parse_for(&mut self) -> ParseResult<Statement> {
        let start = self.expect(TokenKind::For)?;
        self.expect(TokenKind::LParen)?;

        if let Some(binding) = self.try_parse_loop_binding()? {
            let is_of = matches!(self.advance().kind, TokenKind::Of);
            let target = self.parse_expression()?;
            self.expect(TokenKind::RParen)?;
            let body = Box::new(self.parse_statement()?);
            let kind = if is_of {
                StatementKind::ForOf {
                    binding,
                    iterable: target,
                    body,
                }
            } else {
                StatementKind::ForIn {
                    binding,
                    object: target,
                    body,
                }
            };
            return Ok(self.finish_statement(kind, start));
        }

        let init = if self.at(&TokenKind::Semicolon) {
            None
        } else {
            let init_start = self.current().span;
            let kind = if matches!(
                self.current().kind,
                TokenKind::Let | TokenKind::Const | TokenKind::Var
            ) {
                self.parse_variable_declaration()?
            } else {
                StatementKind::Expression(self.parse_expression()?)
            };
            Some(Box::new(self.finish_statement(kind, init_start)))
        };
        self.expect(TokenKind::Semicolon)?;
        let test = if self.at(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(TokenKind::Semicolon)?;
        let update = if self.at(&TokenKind::RParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(TokenKind::RParen)?;
        let body = Box::new(self.parse_statement()?);
        Ok(self.finish_statement(
            StatementKind::For {
                init,
                test,
                update,
                body,
            },
            start,
        ))
    }

    /// Parses `let x` / `x` when followed by `of` or `in`, leaving that keyword current.
    fn try_parse_loop_binding(&mut self) -> ParseResult<Option<LoopBinding>> {
        let (kind, name_offset) = match self.current().kind {
            TokenKind::Let => (Some(DeclarationKind::Let), 1),
            TokenKind::Const => (Some(DeclarationKind::Const), 1),
            TokenKind::Var => (Some(DeclarationKind::Var), 1),
            _ => (None, 0),
        };
        let TokenKind::Identifier(name) = self.peek_kind(name_offset) else {
            return Ok(None);
        };
        if !matches!(
            self.peek_kind(name_offset + 1),
            TokenKind::Of | TokenKind::In
        ) {
            return Ok(None);
        }
        let name = name.to_string();
        for _ in 0..=name_offset {
            self.advance();
        }
        Ok(Some(LoopBinding { kind, name }))
    }

    fn parse_try(&mut self) -> ParseResult<Statement> {
        let start = self.expect(TokenKind::Try)?;
        let block = self.parse_block()?;
        let handler = if self.at(&TokenKind::Catch) {
            let catch_start = self.advance().span;
            let param = if self.at(&TokenKind::LParen) {
                self.advance();
                let name = self.expect_identifier()?;
                self.expect(TokenKind::RParen)?;
                Some(name)
            } else {
                None
            };
            let body = self.parse_block()?;
            Some(CatchClause {
                param,
                body,
                span: catch_start.to(self.previous_span()),
            })
        } else {
            None
        };
        let finalizer = if self.at(&TokenKind::Finally) {
            self.advance();
            Some(self.parse_block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(ParseError::new(
                "Missing catch or finally after try",
                self.current().span,
            ));
        }
        Ok(self.finish_statement(
            StatementKind::Try {
                block,
                handler,
                finalizer,
            },
            start,
        ))
    }

    fn parse_switch(&mut self) -> ParseResult<Statement> {
        let start = self.expect(TokenKind::Switch)?;
        let discriminant = self.parse_parenthesized()?;
        self.expect(TokenKind::LBrace)?;
        let mut cases = Vec::new();
        let mut seen_default = false;
        while !self.at(&TokenKind::RBrace) {
            let case_start = self.current().span;
            let test = match &self.advance().kind {
                TokenKind::Case => Some(self.parse_expression()?),
                TokenKind::Default if !seen_default => {
                    seen_default = true;
                    None
                }
                TokenKind::Default => {
                    return Err(ParseError::new(
                        "More than one default clause in switch statement",
                        case_start,
                    ));
                }
                other => {
                    return Err(ParseError::new(
                        format!("Expected 'case' or 'default', got {other}"),
                        case_start,
                    ));
                }
            };
            self.expect(TokenKind::Colon)?;
            let mut body = Vec::new();
            while !matches!(
                self.current().kind,
                TokenKind::Case | TokenKind::Default | TokenKind::RBrace | TokenKind::EOF
            ) {
                body.push(self.parse_statement()?);
            }
            cases.push(SwitchCase {
                test,
                body,
                span: case_start.to(self.previous_span()),
            });
        }
        self.expect(TokenKind::RBrace)?;
        Ok(self.finish_statement(
            StatementKind::Switch {
                discriminant,
                cases,
            },
            start,
        ))
    }

    fn parse_block(&mut self) -> ParseResult<Vec<Statement>> {
        self.expect(TokenKind::LBrace)?;
        let mut body = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            if self.at(&TokenKind::EOF) {
                return Err(self.error("'}'"));
            }
            body.push(self.parse_statement()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(body)
    }

    /// Parses the parameter list and body after `function`.
    fn parse_function_rest(
        &mut self,
        start: Span,
        require_name: bool,
    ) -> ParseResult<Rc<FunctionDef>> {
        let name = if let TokenKind::Identifier(name) = self.current().kind {
            let name = name.to_string();
            self.advance();
            Some(name)
        } else if require_name {
            return Err(self.error("function name"));
        } else {
            None
        };
        let params = self.parse_parameters()?;
        let body = self.parse_block()?;
        Ok(Rc::new(FunctionDef {
            name,
            params,
            body: FunctionBody::Block(body),
            is_arrow: false,
            span: start.to(self.previous_span()),
        }))
    }

    fn parse_parameters(&mut self) -> ParseResult<Vec<String>> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.at(&TokenKind::RParen) {
            params.push(self.expect_identifier()?);
            if !self.at(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        self.expect(TokenKind::RParen)?;
        Ok(params)
    }

    fn parse_expression(&mut self) -> ParseResult<Expression> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> ParseResult<Expression> {
        ensure_sufficient_stack(|| self.parse_assignment_inner())
    }

    fn parse_assignment_inner(&mut self) -> ParseResult<Expression> {
        if self.at_arrow_function() {
            return self.parse_arrow_function();
        }

        let start = self.current().span;
        let target = self.parse_conditional()?;
        let op = match self.current().kind {
            TokenKind::Assign => AssignOperator::Assign,
            TokenKind::PlusAssign => AssignOperator::Add,
            TokenKind::MinusAssign => AssignOperator::Sub,
            TokenKind::StarAssign => AssignOperator::Mul,
            TokenKind::SlashAssign => AssignOperator::Div,
            TokenKind::PercentAssign => AssignOperator::Rem,
            _ => return Ok(target),
        };
        if !is_assignment_target(&target) {
            return Err(ParseError::new("Invalid assignment target", target.span));
        }
        self.advance();
        let value = self.parse_assignment()?;
        Ok(Expression {
            span: start.to(value.span),
            kind: ExpressionKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
        })
    }

    fn at_arrow_function(&self) -> bool {
        match self.current().kind {
            TokenKind::Identifier(_) => matches!(self.peek_kind(1), TokenKind::Arrow),
            TokenKind::LParen => {
                let mut depth = 0usize;
                for offset in 0.. {
                    match self.peek_kind(offset) {
                        TokenKind::LParen => depth += 1,
                        TokenKind::RParen => {
                            depth -= 1;
                            if depth == 0 {
                                return matches!(self.peek_kind(offset + 1), TokenKind::Arrow);
                            }
                        }
                        TokenKind::EOF => return false,
                        _ => {}
                    }
                }
                false
            }
            _ => false,
        }
    }

    fn parse_arrow_function(&mut self) -> ParseResult<Expression> {
        let start = self.current().span;
        let params = if let TokenKind::Identifier(name) = self.current().kind {
            let name = name.to_string();
            self.advance();
            vec![name]
        } else {
            self.parse_parameters()?
        };
        self.expect(TokenKind::Arrow)?;
        let body = if self.at(&TokenKind::LBrace) {
            FunctionBody::Block(self.parse_block()?)
        } else {
            FunctionBody::Expression(Box::new(self.parse_assignment()?))
        };
        let span = start.to(self.previous_span());
        Ok(Expression {
            kind: ExpressionKind::Function(Rc::new(FunctionDef {
                name: None,
                params,
                body,
                is_arrow: true,
                span,
            })),
            span,
        })
    }

    fn parse_conditional(&mut self) -> ParseResult<Expression> {
        let test = self.parse_logical_or()?;
        if !self.at(&TokenKind::Question) {
            return Ok(test);
        }
        self.advance();
        let consequent = self.parse_assignment()?;
        self.expect(TokenKind::Colon)?;
        let alternate = self.parse_assignment()?;
        Ok(Expression {
            span: test.span.to(alternate.span),
            kind: ExpressionKind::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            },
        })
    }

    fn parse_logical_or(&mut self) -> ParseResult<Expression> {
        let mut expr = self.parse_logical_and()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Or => LogicalOperator::Or,
                TokenKind::Nullish => LogicalOperator::Nullish,
                _ => break,
            };
            self.advance();
            let right = self.parse_logical_and()?;
            expr = logical(expr, op, right);
        }
        Ok(expr)
    }

    fn parse_logical_and(&mut self) -> ParseResult<Expression> {
        let mut expr = self.parse_equality()?;
        while self.at(&TokenKind::And) {
            self.advance();
            let right = self.parse_equality()?;
            expr = logical(expr, LogicalOperator::And, right);
        }
        Ok(expr)
    }

    fn parse_equality(&mut self) -> ParseResult<Expression> {
        let mut expr = self.parse_relational()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Equal => BinaryOperator::Equal,
                TokenKind::NotEqual => BinaryOperator::NotEqual,
                TokenKind::StrictEqual => BinaryOperator::StrictEqual,
                TokenKind::StrictNotEqual => BinaryOperator::StrictNotEqual,
                _ => break,
            };
            self.advance();
            let right = self.parse_relational()?;
            expr = binary(expr, op, right);
        }
        Ok(expr)
    }

    fn parse_relational(&mut self) -> ParseResult<Expression> {
        let mut expr = self.parse_additive()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Less => BinaryOperator::LessThan,
                TokenKind::LessEqual => BinaryOperator::LessEqual,
                TokenKind::Greater => BinaryOperator::GreaterThan,
                TokenKind::GreaterEqual => BinaryOperator::GreaterEqual,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            expr = binary(expr, op, right);
        }
        Ok(expr)
    }

    fn parse_additive(&mut self) -> ParseResult<Expression> {
        let mut expr = self.parse_multiplicative()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Plus => BinaryOperator::Add,
                TokenKind::Minus => BinaryOperator::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            expr = binary(expr, op, right);
        }
        Ok(expr)
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expression> {
        let mut expr = self.parse_exponent()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Star => BinaryOperator::Mul,
                TokenKind::Slash => BinaryOperator::Div,
                TokenKind::Percent => BinaryOperator::Rem,
                _ => break,
            };
            self.advance();
            let right = self.parse_exponent()?;
            expr = binary(expr, op, right);
        }
        Ok(expr)
    }

    fn parse_exponent(&mut self) -> ParseResult<Expression> {
        let base = self.parse_unary()?;
        if !self.at(&TokenKind::StarStar) {
            return Ok(base);
        }
        self.advance();
        let exponent = self.parse_exponent()?;
        Ok(binary(base, BinaryOperator::Pow, exponent))
    }

    fn parse_unary(&mut self) -> ParseResult<Expression> {
        let start = self.current().span;
        let op = match self.current().kind {
            TokenKind::Bang => UnaryOperator::Not,
            TokenKind::Minus => UnaryOperator::Negate,
            TokenKind::Plus => UnaryOperator::Plus,
            TokenKind::Typeof => UnaryOperator::Typeof,
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let op = if matches!(self.advance().kind, TokenKind::PlusPlus) {
                    UpdateOperator::Increment
                } else {
                    UpdateOperator::Decrement
                };
                let target = self.parse_unary()?;
                if !is_assignment_target(&target) {
                    return Err(ParseError::new(
                        "Invalid left-hand side expression in prefix operation",
                        target.span,
                    ));
                }
                return Ok(Expression {
                    span: start.to(target.span),
                    kind: ExpressionKind::Update {
                        op,
                        prefix: true,
                        target: Box::new(target),
                    },
                });
            }
            _ => return self.parse_postfix(),
        };
        self.advance();
        let argument = self.parse_unary()?;
        Ok(Expression {
            span: start.to(argument.span),
            kind: ExpressionKind::Unary {
                op,
                argument: Box::new(argument),
            },
        })
    }

    fn parse_postfix(&mut self) -> ParseResult<Expression> {
        let expr = self.parse_call()?;
        let op = match self.current().kind {
            TokenKind::PlusPlus if !self.current().newline_before => UpdateOperator::Increment,
            TokenKind::MinusMinus if !self.current().newline_before => UpdateOperator::Decrement,
            _ => return Ok(expr),
        };
        if !is_assignment_target(&expr) {
            return Err(ParseError::new(
                "Invalid left-hand side expression in postfix operation",
                expr.span,
            ));
        }
        let end = self.advance().span;
        Ok(Expression {
            span: expr.span.to(end),
            kind: ExpressionKind::Update {
                op,
                prefix: false,
                target: Box::new(expr),
            },
        })
    }

    fn parse_call(&mut self) -> ParseResult<Expression> {
        let mut expr = if self.at(&TokenKind::New) {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };
        loop {
            match self.current().kind {
                TokenKind::LParen => {
                    let args = self.parse_arguments()?;
                    expr = Expression {
                        span: expr.span.to(self.previous_span()),
                        kind: ExpressionKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                    };
                }
                TokenKind::Dot | TokenKind::LBracket => expr = self.parse_member(expr)?,
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_new(&mut self) -> ParseResult<Expression> {
        let start = self.expect(TokenKind::New)?;
        let mut callee = self.parse_primary()?;
        while matches!(self.current().kind, TokenKind::Dot | TokenKind::LBracket) {
            callee = self.parse_member(callee)?;
        }
        let args = if self.at(&TokenKind::LParen) {
            self.parse_arguments()?
        } else {
            Vec::new()
        };
        Ok(Expression {
            span: start.to(self.previous_span()),
            kind: ExpressionKind::New {
                callee: Box::new(callee),
                args,
            },
        })
    }

    fn parse_member(&mut self, object: Expression) -> ParseResult<Expression> {
        let property = if matches!(self.advance().kind, TokenKind::Dot) {
            MemberProperty::Named(self.expect_property_name()?)
        } else {
            let index = self.parse_expression()?;
            self.expect(TokenKind::RBracket)?;
            MemberProperty::Computed(Box::new(index))
        };
        Ok(Expression {
            span: object.span.to(self.previous_span()),
            kind: ExpressionKind::Member {
                object: Box::new(object),
                property,
            },
        })
    }

    fn parse_arguments(&mut self) -> ParseResult<Vec<Expression>> {
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        while !self.at(&TokenKind::RParen) {
            args.push(self.parse_assignment()?);
            if !self.at(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        self.expect(TokenKind::RParen)?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> ParseResult<Expression> {
        let start = self.current().span;
        let kind = match &self.current().kind {
            TokenKind::Number(value) => {
                let value = *value;
                self.advance();
                ExpressionKind::Number(value)
            }
            TokenKind::String(value) => {
                let value = value.clone();
                self.advance();
                ExpressionKind::String(value)
            }
            TokenKind::Template(parts) => {
                let parts = parts.clone();
                self.advance();
                ExpressionKind::Template(parse_template(parts)?)
            }
            TokenKind::True => {
                self.advance();
                ExpressionKind::Boolean(true)
            }
            TokenKind::False => {
                self.advance();
                ExpressionKind::Boolean(false)
            }
            TokenKind::Null => {
                self.advance();
                ExpressionKind::Null
            }
            TokenKind::Undefined => {
                self.advance();
                ExpressionKind::Undefined
            }
            TokenKind::This => {
                self.advance();
                ExpressionKind::This
            }
            TokenKind::Identifier(name) => {
                let name = name.to_string();
                self.advance();
                ExpressionKind::Identifier(name)
            }
            TokenKind::Function => {
                self.advance();
                ExpressionKind::Function(self.parse_function_rest(start, false)?)
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(TokenKind::RParen)?;
                return Ok(expr);
            }
            TokenKind::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                while !self.at(&TokenKind::RBracket) {
                    elements.push(self.parse_assignment()?);
                    if !self.at(&TokenKind::Comma) {
                        break;
                    }
                    self.advance();
                }
                self.expect(TokenKind::RBracket)?;
                ExpressionKind::Array(elements)
            }
            TokenKind::LBrace => ExpressionKind::Object(self.parse_object_properties()?),
            _ => return Err(self.error("expression")),
        };
        Ok(Expression {
            kind,
            span: start.to(self.previous_span()),
        })
    }

    fn parse_object_properties(&mut self) -> ParseResult<Vec<Property>> {
        self.expect(TokenKind::LBrace)?;
        let mut properties = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            let key_span = self.current().span;
            let key = match &self.current().kind {
                TokenKind::String(value) => value.clone(),
                TokenKind::Number(value) => crate::interpreter::format_number(*value),
                TokenKind::Identifier(name) => name.to_string(),
                _ => return Err(self.error("property name")),
            };
            let shorthand = matches!(self.current().kind, TokenKind::Identifier(_))
                && matches!(self.peek_kind(1), TokenKind::Comma | TokenKind::RBrace);
            self.advance();
            let value = if shorthand {
                Expression {
                    kind: ExpressionKind::Identifier(key.clone()),
                    span: key_span,
                }
            } else if self.at(&TokenKind::LParen) {
                let params = self.parse_parameters()?;
                let body = self.parse_block()?;
                let span = key_span.to(self.previous_span());
                Expression {
                    kind: ExpressionKind::Function(Rc::new(FunctionDef {
                        name: Some(key.clone()),
                        params,
                        body: FunctionBody::Block(body),
                        is_arrow: false,
                        span,
                    })),
                    span,
                }
            } else {
                self.expect(TokenKind::Colon)?;
                self.parse_assignment()?
            };
            properties.push(Property { key, value });
            if !self.at(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        self.expect(TokenKind::RBrace)?;
        Ok(properties)
    }

    fn parse_parenthesized(&mut self) -> ParseResult<Expression> {
        self.expect(TokenKind::LParen)?;
        let expr = self.parse_expression()?;
        self.expect(TokenKind::RParen)?;
        Ok(expr)
    }

    fn consume_semicolon(&mut self) -> ParseResult<()> {
        if self.at(&TokenKind::Semicolon) {
            self.advance();
            return Ok(());
        }
        if self.at_statement_end() {
            return Ok(());
        }
        Err(self.error("';'"))
    }

    /// Automatic semicolon insertion points.
    fn at_statement_end(&self) -> bool {
        let token = self.current();
        token.newline_before
            || matches!(
                token.kind,
                TokenKind::Semicolon | TokenKind::RBrace | TokenKind::EOF
            )
    }

    fn finish_statement(&self, kind: StatementKind, start: Span) -> Statement {
        Statement {
            kind,
            span: start.to(self.previous_span()),
        }
    }

    fn expect_identifier(&mut self) -> ParseResult<String> {
        if let TokenKind::Identifier(name) = self.current().kind {
            let name = name.to_string();
            self.advance();
            Ok(name)
        } else {
            Err(self.error("identifier"))
        }
    }

    /// Identifiers and keywords are both valid after `.`.
    fn expect_property_name(&mut self) -> ParseResult<String> {
        let token = self.current();
        let name = match &token.kind {
            TokenKind::Identifier(name) => name.to_string(),
            kind if is_keyword(kind) => kind.to_string().trim_matches('\'').to_string(),
            _ => return Err(self.error("property name")),
        };
        self.advance();
        Ok(name)
    }

    fn expect(&mut self, expected: TokenKind<'static>) -> ParseResult<Span> {
        if self.at(&expected) {
            Ok(self.advance().span)
        } else {
            Err(self.error(&expected.to_string()))
        }
    }

    fn at(&self, kind: &TokenKind<'_>) -> bool {
        std::mem::discriminant(&self.current().kind) == std::mem::discriminant(kind)
    }

    fn current(&self) -> &Token<'a> {
        &self.tokens[self.position.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self, offset: usize) -> &TokenKind<'a> {
        let index = (self.position + offset).min(self.tokens.len() - 1);
        &self.tokens[index].kind
    }

    fn previous_span(&self) -> Span {
        if self.position == 0 {
            self.current().span
        } else {
            self.tokens[self.position - 1].span
        }
    }

    fn advance(&mut self) -> &Token<'a> {
        let index = self.position.min(self.tokens.len() - 1);
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
        &self.tokens[index]
    }

    fn error(&self, expected: &str) -> ParseError {
        let token = self.current();
        ParseError::new(
            format!("Expected {expected}, got {}", token.kind),
            token.span,
        )
    }
}

fn is_assignment_target(expr: &Expression) -> bool {
    matches!(
        expr.kind,
        ExpressionKind::Identifier(_) | ExpressionKind::Member { .. }
    )
}

fn is_keyword(kind: &TokenKind<'_>) -> bool {
    !matches!(
        kind,
        TokenKind::Identifier(_)
            | TokenKind::Number(_)
            | TokenKind::String(_)
            | TokenKind::Template(_)
            | TokenKind::EOF
    ) && kind.to_string().trim_matches('\'').chars().all(char::is_alphabetic)
}

fn binary(left: Expression, op: BinaryOperator, right: Expression) -> Expression {
    Expression {
        span: left.span.to(right.span),
        kind: ExpressionKind::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        },
    }
}

fn logical(left: Expression, op: LogicalOperator, right: Expression) -> Expression {
    Expression {
        span: left.span.to(right.span),
        kind: ExpressionKind::Logical {
            left: Box::new(left),
            op,
            right: Box::new(right),
        },
    }
}

fn parse_template(parts: Vec<TemplatePart<'_>>) -> ParseResult<Vec<TemplateElement>> {
    let mut elements = Vec::with_capacity(parts.len());
    for part in parts {
        match part {
            TemplatePart::Text(text) => elements.push(TemplateElement::Text(text)),
            TemplatePart::Hole { source, origin } => {
                let tokens = lexer::tokenize_fragment(source, origin)?;
                let mut parser = Parser::new(tokens);
                let expr = parser.parse_expression()?;
                if !parser.at(&TokenKind::EOF) {
                    return Err(parser.error("'}'"));
                }
                elements.push(TemplateElement::Interpolation(expr));
            }
        }
    }
    Ok(elements)
}

pub fn parse_tokens(tokens: Vec<Token<'_>>) -> Result<Program, ParseError> {
    Parser::new(tokens).parse_program()
}

/// Tokenizes and parses `input` into a [`Program`].
pub fn parse(input: &str) -> Result<Program, SyntaxError> {
    let tokens = lexer::tokenize(input)?;
    Ok(parse_tokens(tokens)?)
}
