use thiserror::Error;

use crate::lexer::LexError;
use crate::parser::ParseError;

/// Malformed source text, reported before any execution starts.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyntaxError {
    #[error("SyntaxError: {0}")]
    Lex(#[from] LexError),
    #[error("SyntaxError: {0}")]
    Parse(#[from] ParseError),
}

impl SyntaxError {
    pub fn line(&self) -> usize {
        match self {
            Self::Lex(error) => error.line(),
            Self::Parse(error) => error.line,
        }
    }

    pub fn column(&self) -> usize {
        match self {
            Self::Lex(error) => error.column(),
            Self::Parse(error) => error.column,
        }
    }
}
