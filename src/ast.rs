use std::rc::Rc;

use crate::token::Span;

#[derive(Debug, PartialEq, Clone)]
pub struct Program {
    pub body: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Statement {
    pub kind: StatementKind,
    pub span: Span,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum DeclarationKind {
    Let,
    Const,
    Var,
}

impl DeclarationKind {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Let => "let",
            Self::Const => "const",
            Self::Var => "var",
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Declarator {
    pub name: String,
    pub init: Option<Expression>,
    pub span: Span,
}

#[derive(Debug, PartialEq, Clone)]
pub struct CatchClause {
    pub param: Option<String>,
    pub body: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, PartialEq, Clone)]
pub struct SwitchCase {
    /// `None` for the `default` clause.
    pub test: Option<Expression>,
    pub body: Vec<Statement>,
    pub span: Span,
}

/// Binding introduced by a `for ... of` / `for ... in` header.
#[derive(Debug, PartialEq, Clone)]
pub struct LoopBinding {
    /// `None` when the header assigns to an existing name.
    pub kind: Option<DeclarationKind>,
    pub name: String,
}

#[derive(Debug, PartialEq, Clone)]
pub enum StatementKind {
    VariableDeclaration {
        kind: DeclarationKind,
        declarations: Vec<Declarator>,
    },
    FunctionDeclaration(Rc<FunctionDef>),
    Expression(Expression),
    Block(Vec<Statement>),
    If {
        condition: Expression,
        consequent: Box<Statement>,
        alternate: Option<Box<Statement>>,
    },
    While {
        condition: Expression,
        body: Box<Statement>,
    },
    DoWhile {
        body: Box<Statement>,
        condition: Expression,
    },
    For {
        init: Option<Box<Statement>>,
        test: Option<Expression>,
        update: Option<Expression>,
        body: Box<Statement>,
    },
    ForOf {
        binding: LoopBinding,
        iterable: Expression,
        body: Box<Statement>,
    },
    ForIn {
        binding: LoopBinding,
        object: Expression,
        body: Box<Statement>,
    },
    Break,
    Continue,
    Return(Option<Expression>),
    Throw(Expression),
    Try {
        block: Vec<Statement>,
        handler: Option<CatchClause>,
        finalizer: Option<Vec<Statement>>,
    },
    Switch {
        discriminant: Expression,
        cases: Vec<SwitchCase>,
    },
    Empty,
}

#[derive(Debug, PartialEq, Clone)]
pub enum FunctionBody {
    Block(Vec<Statement>),
    /// Arrow function with an expression body; its value is the implicit return.
    Expression(Box<Expression>),
}

#[derive(Debug, PartialEq, Clone)]
pub struct FunctionDef {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: FunctionBody,
    pub is_arrow: bool,
    pub span: Span,
}

impl FunctionDef {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Expression {
    pub kind: ExpressionKind,
    pub span: Span,
}

#[derive(Debug, PartialEq, Clone)]
pub enum TemplateElement {
    Text(String),
    Interpolation(Expression),
}

#[derive(Debug, PartialEq, Clone)]
pub struct Property {
    pub key: String,
    pub value: Expression,
}

#[derive(Debug, PartialEq, Clone)]
pub enum MemberProperty {
    Named(String),
    Computed(Box<Expression>),
}

#[derive(Debug, PartialEq, Clone)]
pub enum ExpressionKind {
    Number(f64),
    String(String),
    Boolean(bool),
    Null,
    Undefined,
    Template(Vec<TemplateElement>),
    Identifier(String),
    This,
    Array(Vec<Expression>),
    Object(Vec<Property>),
    Function(Rc<FunctionDef>),
    Unary {
        op: UnaryOperator,
        argument: Box<Expression>,
    },
    Update {
        op: UpdateOperator,
        prefix: bool,
        target: Box<Expression>,
    },
    Binary {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    Logical {
        left: Box<Expression>,
        op: LogicalOperator,
        right: Box<Expression>,
    },
    Assign {
        op: AssignOperator,
        target: Box<Expression>,
        value: Box<Expression>,
    },
    Conditional {
        test: Box<Expression>,
        consequent: Box<Expression>,
        alternate: Box<Expression>,
    },
    Member {
        object: Box<Expression>,
        property: MemberProperty,
    },
    Call {
        callee: Box<Expression>,
        args: Vec<Expression>,
    },
    New {
        callee: Box<Expression>,
        args: Vec<Expression>,
    },
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum UnaryOperator {
    Not,
    Negate,
    Plus,
    Typeof,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum UpdateOperator {
    Increment,
    Decrement,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum LogicalOperator {
    And,
    Or,
    Nullish,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum AssignOperator {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl UnaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Not => "!",
            Self::Negate => "-",
            Self::Plus => "+",
            Self::Typeof => "typeof",
        }
    }
}

impl UpdateOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Increment => "++",
            Self::Decrement => "--",
        }
    }
}

impl BinaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Pow => "**",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::StrictEqual => "===",
            Self::StrictNotEqual => "!==",
            Self::LessThan => "<",
            Self::LessEqual => "<=",
            Self::GreaterThan => ">",
            Self::GreaterEqual => ">=",
        }
    }
}

impl LogicalOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::And => "&&",
            Self::Or => "||",
            Self::Nullish => "??",
        }
    }
}

impl AssignOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Assign => "=",
            Self::Add => "+=",
            Self::Sub => "-=",
            Self::Mul => "*=",
            Self::Div => "/=",
            Self::Rem => "%=",
        }
    }

    /// Arithmetic operator applied by a compound assignment.
    pub fn binary_operator(self) -> Option<BinaryOperator> {
        match self {
            Self::Assign => None,
            Self::Add => Some(BinaryOperator::Add),
            Self::Sub => Some(BinaryOperator::Sub),
            Self::Mul => Some(BinaryOperator::Mul),
            Self::Div => Some(BinaryOperator::Div),
            Self::Rem => Some(BinaryOperator::Rem),
        }
    }
}
