use std::{iter::Peekable, str::CharIndices};

use crate::token::{Span, TemplatePart, Token, TokenKind};

pub mod error;

pub use error::{LexError, LexResult};

pub struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
    /// Byte offset of `input` inside the full source (non-zero for template holes).
    base: usize,
    line: usize,
    column: usize,
    newline_pending: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self::with_origin(
            input,
            Span {
                start: 0,
                end: input.len(),
                line: 1,
                column: 0,
            },
        )
    }

    /// Lexer for a fragment of a larger source, so spans point into the full text.
    pub fn with_origin(input: &'a str, origin: Span) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
            base: origin.start,
            line: origin.line,
            column: origin.column,
            newline_pending: false,
        }
    }

    pub fn next_token(&mut self) -> LexResult<Token<'a>> {
        self.skip_trivia()?;
        let newline_before = std::mem::take(&mut self.newline_pending);

        let (start_idx, ch) = match self.chars.peek() {
            Some(&(idx, c)) => (idx, c),
            None => {
                let index = self.current_index();
                let mut token = Token::new(TokenKind::EOF, self.span_at(index, index));
                token.newline_before = newline_before;
                return Ok(token);
            }
        };

        let start_line = self.line;
        let start_column = self.column;
        let kind = match ch {
            '"' | '\'' => self.read_string(ch, start_line, start_column)?,
            '`' => self.read_template(start_line, start_column)?,
            c if c.is_ascii_digit() => self.read_number(start_idx, start_line, start_column)?,
            '.' if self.peek_second().is_some_and(|c| c.is_ascii_digit()) => {
                self.read_number(start_idx, start_line, start_column)?
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => self.read_identifier(start_idx),
            _ => self.read_punctuation(ch, start_line, start_column)?,
        };

        let end_idx = self.current_index();
        let mut token = Token::new(
            kind,
            Span {
                start: self.base + start_idx,
                end: self.base + end_idx,
                line: start_line,
                column: start_column,
            },
        );
        token.newline_before = newline_before;
        Ok(token)
    }

    fn read_punctuation(
        &mut self,
        ch: char,
        line: usize,
        column: usize,
    ) -> LexResult<TokenKind<'a>> {
        self.advance_char();
        let kind = match ch {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ';' => TokenKind::Semicolon,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            '.' => TokenKind::Dot,
            '+' => {
                if self.eat('+') {
                    TokenKind::PlusPlus
                } else if self.eat('=') {
                    TokenKind::PlusAssign
                } else {
                    TokenKind::Plus
                }
            }
            '-' => {
                if self.eat('-') {
                    TokenKind::MinusMinus
                } else if self.eat('=') {
                    TokenKind::MinusAssign
                } else {
                    TokenKind::Minus
                }
            }
            '*' => {
                if self.eat('*') {
                    TokenKind::StarStar
                } else if self.eat('=') {
                    TokenKind::StarAssign
                } else {
                    TokenKind::Star
                }
            }
            '/' => {
                if self.eat('=') {
                    TokenKind::SlashAssign
                } else {
                    TokenKind::Slash
                }
            }
            '%' => {
                if self.eat('=') {
                    TokenKind::PercentAssign
                } else {
                    TokenKind::Percent
                }
            }
            '=' => {
                if self.eat('=') {
                    if self.eat('=') {
                        TokenKind::StrictEqual
                    } else {
                        TokenKind::Equal
                    }
                } else if self.eat('>') {
                    TokenKind::Arrow
                } else {
                    TokenKind::Assign
                }
            }
            '!' => {
                if self.eat('=') {
                    if self.eat('=') {
                        TokenKind::StrictNotEqual
                    } else {
                        TokenKind::NotEqual
                    }
                } else {
                    TokenKind::Bang
                }
            }
            '<' => {
                if self.eat('=') {
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                }
            }
            '>' => {
                if self.eat('=') {
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                }
            }
            '&' if self.eat('&') => TokenKind::And,
            '|' if self.eat('|') => TokenKind::Or,
            '?' => {
                if self.eat('?') {
                    TokenKind::Nullish
                } else {
                    TokenKind::Question
                }
            }
            _ => {
                return Err(LexError::UnexpectedCharacter {
                    character: ch,
                    line,
                    column,
                });
            }
        };
        Ok(kind)
    }

    fn skip_trivia(&mut self) -> LexResult<()> {
        loop {
            match self.chars.peek() {
                Some(&(_, '\n')) => {
                    self.newline_pending = true;
                    self.advance_char();
                }
                Some(&(_, c)) if c.is_whitespace() => {
                    self.advance_char();
                }
                Some(&(_, '/')) => match self.peek_second() {
                    Some('/') => {
                        while let Some(&(_, c)) = self.chars.peek() {
                            if c == '\n' {
                                break;
                            }
                            self.advance_char();
                        }
                    }
                    Some('*') => {
                        let (line, column) = (self.line, self.column);
                        self.advance_char();
                        self.advance_char();
                        let mut closed = false;
                        while let Some((_, c)) = self.advance_char() {
                            if c == '\n' {
                                self.newline_pending = true;
                            }
                            if c == '*' && self.eat('/') {
                                closed = true;
                                break;
                            }
                        }
                        if !closed {
                            return Err(LexError::UnterminatedComment { line, column });
                        }
                    }
                    _ => return Ok(()),
                },
                _ => return Ok(()),
            }
        }
    }

    fn read_identifier(&mut self, start: usize) -> TokenKind<'a> {
        self.advance_char();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' || c == '$' {
                self.advance_char();
            } else {
                break;
            }
        }

        let end_idx = self.current_index();
        let ident = &self.input[start..end_idx];
        match ident {
            "let" => TokenKind::Let,
            "const" => TokenKind::Const,
            "var" => TokenKind::Var,
            "function" => TokenKind::Function,
            "return" => TokenKind::Return,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "do" => TokenKind::Do,
            "for" => TokenKind::For,
            "of" => TokenKind::Of,
            "in" => TokenKind::In,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "throw" => TokenKind::Throw,
            "try" => TokenKind::Try,
            "catch" => TokenKind::Catch,
            "finally" => TokenKind::Finally,
            "switch" => TokenKind::Switch,
            "case" => TokenKind::Case,
            "default" => TokenKind::Default,
            "new" => TokenKind::New,
            "typeof" => TokenKind::Typeof,
            "this" => TokenKind::This,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            "undefined" => TokenKind::Undefined,
            _ => TokenKind::Identifier(ident),
        }
    }

    fn read_number(
        &mut self,
        start: usize,
        line: usize,
        column: usize,
    ) -> LexResult<TokenKind<'a>> {
        let invalid = |literal: &str| LexError::InvalidNumberLiteral {
            literal: literal.to_string(),
            line,
            column,
        };

        if self.chars.peek().is_some_and(|&(_, c)| c == '0')
            && self.peek_second().is_some_and(|c| c == 'x' || c == 'X')
        {
            self.advance_char();
            self.advance_char();
            while self.chars.peek().is_some_and(|&(_, c)| c.is_ascii_hexdigit()) {
                self.advance_char();
            }
            let literal = &self.input[start..self.current_index()];
            let value = i64::from_str_radix(&literal[2..], 16).map_err(|_| invalid(literal))?;
            return Ok(TokenKind::Number(value as f64));
        }

        self.consume_digits();
        if self.chars.peek().is_some_and(|&(_, c)| c == '.') {
            self.advance_char();
            self.consume_digits();
        }
        if self.chars.peek().is_some_and(|&(_, c)| c == 'e' || c == 'E') {
            self.advance_char();
            if self.chars.peek().is_some_and(|&(_, c)| c == '+' || c == '-') {
                self.advance_char();
            }
            self.consume_digits();
        }
        if self
            .chars
            .peek()
            .is_some_and(|&(_, c)| c.is_alphabetic() || c == '_')
        {
            self.advance_char();
            let literal = &self.input[start..self.current_index()];
            return Err(invalid(literal));
        }

        let literal = &self.input[start..self.current_index()];
        literal
            .parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| invalid(literal))
    }

    fn consume_digits(&mut self) {
        while self.chars.peek().is_some_and(|&(_, c)| c.is_ascii_digit()) {
            self.advance_char();
        }
    }

    fn read_string(&mut self, quote: char, line: usize, column: usize) -> LexResult<TokenKind<'a>> {
        self.advance_char();
        let mut value = String::new();
        loop {
            match self.advance_char() {
                Some((_, c)) if c == quote => return Ok(TokenKind::String(value)),
                Some((_, '\\')) => {
                    let escaped = self
                        .read_escape()
                        .ok_or(LexError::UnterminatedString { line, column })?;
                    value.push(escaped);
                }
                Some((_, '\n')) | None => {
                    return Err(LexError::UnterminatedString { line, column });
                }
                Some((_, c)) => value.push(c),
            }
        }
    }

    fn read_escape(&mut self) -> Option<char> {
        let (_, c) = self.advance_char()?;
        let escaped = match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            'b' => '\u{8}',
            'u' => {
                let mut code = 0u32;
                for _ in 0..4 {
                    let (_, digit) = self.advance_char()?;
                    code = code * 16 + digit.to_digit(16)?;
                }
                char::from_u32(code)?
            }
            other => other,
        };
        Some(escaped)
    }

    fn read_template(&mut self, line: usize, column: usize) -> LexResult<TokenKind<'a>> {
        let unterminated = LexError::UnterminatedTemplate { line, column };
        self.advance_char();
        let mut parts = Vec::new();
        let mut text = String::new();
        loop {
            match self.advance_char() {
                None => return Err(unterminated),
                Some((_, '`')) => break,
                Some((_, '\\')) => {
                    let escaped = self.read_escape().ok_or_else(|| unterminated.clone())?;
                    text.push(escaped);
                }
                Some((_, '$')) if self.chars.peek().is_some_and(|&(_, c)| c == '{') => {
                    self.advance_char();
                    if !text.is_empty() {
                        parts.push(TemplatePart::Text(std::mem::take(&mut text)));
                    }
                    let origin_line = self.line;
                    let origin_column = self.column;
                    let hole_start = self.current_index();
                    let hole_end = self.skip_template_hole().ok_or_else(|| unterminated.clone())?;
                    parts.push(TemplatePart::Hole {
                        source: &self.input[hole_start..hole_end],
                        origin: Span {
                            start: self.base + hole_start,
                            end: self.base + hole_end,
                            line: origin_line,
                            column: origin_column,
                        },
                    });
                }
                Some((_, c)) => text.push(c),
            }
        }
        if !text.is_empty() {
            parts.push(TemplatePart::Text(text));
        }
        Ok(TokenKind::Template(parts))
    }

    /// Consumes an interpolation body through its closing brace; returns the body's end offset.
    fn skip_template_hole(&mut self) -> Option<usize> {
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        loop {
            let (idx, c) = self.advance_char()?;
            if let Some(open) = quote {
                if c == '\\' {
                    self.advance_char()?;
                } else if c == open {
                    quote = None;
                }
                continue;
            }
            match c {
                '"' | '\'' | '`' => quote = Some(c),
                '{' => depth += 1,
                '}' if depth == 0 => return Some(idx),
                '}' => depth -= 1,
                _ => {}
            }
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.chars.peek().is_some_and(|&(_, c)| c == expected) {
            self.advance_char();
            true
        } else {
            false
        }
    }

    fn peek_second(&self) -> Option<char> {
        let mut lookahead = self.chars.clone();
        lookahead.next();
        lookahead.next().map(|(_, c)| c)
    }

    fn advance_char(&mut self) -> Option<(usize, char)> {
        let next = self.chars.next();
        if let Some((_, c)) = next {
            if c == '\n' {
                self.line += 1;
                self.column = 0;
            } else {
                self.column += 1;
            }
        }
        next
    }

    fn current_index(&mut self) -> usize {
        self.chars
            .peek()
            .map(|(idx, _)| *idx)
            .unwrap_or(self.input.len())
    }

    fn span_at(&self, start: usize, end: usize) -> Span {
        Span {
            start: self.base + start,
            end: self.base + end,
            line: self.line,
            column: self.column,
        }
    }
}

pub fn tokenize(input: &str) -> LexResult<Vec<Token<'_>>> {
    collect_tokens(Lexer::new(input))
}

/// Tokenizes a fragment (such as a template hole) positioned at `origin` in the full source.
pub fn tokenize_fragment(input: &str, origin: Span) -> LexResult<Vec<Token<'_>>> {
    collect_tokens(Lexer::with_origin(input, origin))
}

fn collect_tokens(mut lexer: Lexer<'_>) -> LexResult<Vec<Token<'_>>> {
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let is_eof = matches!(token.kind, TokenKind::EOF);
        tokens.push(token);
        if is_eof {
            break;
        }
    }
    Ok(tokens)
}
