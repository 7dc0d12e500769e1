use serde::Serialize;

/// Byte range of a token or node plus the line (1-based) and column (0-based) where it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl Span {
    /// Span covering `self` through `other`.
    pub fn to(self, other: Span) -> Span {
        Span {
            start: self.start,
            end: other.end.max(self.end),
            line: self.line,
            column: self.column,
        }
    }
}

/// One piece of a template literal: raw text or the source of an `${...}` hole.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart<'a> {
    Text(String),
    Hole { source: &'a str, origin: Span },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind<'a> {
    Identifier(&'a str),
    Number(f64),
    String(String),
    Template(Vec<TemplatePart<'a>>),

    // Keywords
    Let,
    Const,
    Var,
    Function,
    Return,
    If,
    Else,
    While,
    Do,
    For,
    Of,
    In,
    Break,
    Continue,
    Throw,
    Try,
    Catch,
    Finally,
    Switch,
    Case,
    Default,
    New,
    Typeof,
    This,
    True,
    False,
    Null,
    Undefined,

    // Operators
    Assign,             // =
    PlusAssign,         // +=
    MinusAssign,        // -=
    StarAssign,         // *=
    SlashAssign,        // /=
    PercentAssign,      // %=
    Plus,               // +
    Minus,              // -
    Star,               // *
    StarStar,           // **
    Slash,              // /
    Percent,            // %
    PlusPlus,           // ++
    MinusMinus,         // --
    Equal,              // ==
    NotEqual,           // !=
    StrictEqual,        // ===
    StrictNotEqual,     // !==
    Less,               // <
    LessEqual,          // <=
    Greater,            // >
    GreaterEqual,       // >=
    And,                // &&
    Or,                 // ||
    Nullish,            // ??
    Bang,               // !
    Question,           // ?
    Arrow,              // =>

    // Delimiters
    Colon,     // :
    Semicolon, // ;
    Comma,     // ,
    Dot,       // .
    LParen,    // (
    RParen,    // )
    LBrace,    // {
    RBrace,    // }
    LBracket,  // [
    RBracket,  // ]

    EOF,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub span: Span,
    /// Whether a line break separates this token from the previous one.
    pub newline_before: bool,
}

impl<'a> Token<'a> {
    pub fn new(kind: TokenKind<'a>, span: Span) -> Self {
        Self {
            kind,
            span,
            newline_before: false,
        }
    }

    pub fn kind(&self) -> &TokenKind<'a> {
        &self.kind
    }

    pub fn span(&self) -> Span {
        self.span
    }
}

impl std::fmt::Display for TokenKind<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            Self::Identifier(name) => return write!(f, "identifier '{name}'"),
            Self::Number(value) => return write!(f, "number {value}"),
            Self::String(value) => return write!(f, "string {value:?}"),
            Self::Template(_) => "template literal",
            Self::Let => "'let'",
            Self::Const => "'const'",
            Self::Var => "'var'",
            Self::Function => "'function'",
            Self::Return => "'return'",
            Self::If => "'if'",
            Self::Else => "'else'",
            Self::While => "'while'",
            Self::Do => "'do'",
            Self::For => "'for'",
            Self::Of => "'of'",
            Self::In => "'in'",
            Self::Break => "'break'",
            Self::Continue => "'continue'",
            Self::Throw => "'throw'",
            Self::Try => "'try'",
            Self::Catch => "'catch'",
            Self::Finally => "'finally'",
            Self::Switch => "'switch'",
            Self::Case => "'case'",
            Self::Default => "'default'",
            Self::New => "'new'",
            Self::Typeof => "'typeof'",
            Self::This => "'this'",
            Self::True => "'true'",
            Self::False => "'false'",
            Self::Null => "'null'",
            Self::Undefined => "'undefined'",
            Self::Assign => "'='",
            Self::PlusAssign => "'+='",
            Self::MinusAssign => "'-='",
            Self::StarAssign => "'*='",
            Self::SlashAssign => "'/='",
            Self::PercentAssign => "'%='",
            Self::Plus => "'+'",
            Self::Minus => "'-'",
            Self::Star => "'*'",
            Self::StarStar => "'**'",
            Self::Slash => "'/'",
            Self::Percent => "'%'",
            Self::PlusPlus => "'++'",
            Self::MinusMinus => "'--'",
            Self::Equal => "'=='",
            Self::NotEqual => "'!='",
            Self::StrictEqual => "'==='",
            Self::StrictNotEqual => "'!=='",
            Self::Less => "'<'",
            Self::LessEqual => "'<='",
            Self::Greater => "'>'",
            Self::GreaterEqual => "'>='",
            Self::And => "'&&'",
            Self::Or => "'||'",
            Self::Nullish => "'??'",
            Self::Bang => "'!'",
            Self::Question => "'?'",
            Self::Arrow => "'=>'",
            Self::Colon => "':'",
            Self::Semicolon => "';'",
            Self::Comma => "','",
            Self::Dot => "'.'",
            Self::LParen => "'('",
            Self::RParen => "')'",
            Self::LBrace => "'{'",
            Self::RBrace => "'}'",
            Self::LBracket => "'['",
            Self::RBracket => "']'",
            Self::EOF => "end of input",
        };
        f.write_str(symbol)
    }
}
