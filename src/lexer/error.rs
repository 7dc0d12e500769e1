use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("Unexpected character '{character}' at line {line}, column {column}")]
    UnexpectedCharacter {
        character: char,
        line: usize,
        column: usize,
    },
    #[error("Invalid number literal '{literal}' at line {line}, column {column}")]
    InvalidNumberLiteral {
        literal: String,
        line: usize,
        column: usize,
    },
    #[error("Unterminated string literal at line {line}, column {column}")]
    UnterminatedString { line: usize, column: usize },
    #[error("Unterminated template literal at line {line}, column {column}")]
    UnterminatedTemplate { line: usize, column: usize },
    #[error("Unterminated comment at line {line}, column {column}")]
    UnterminatedComment { line: usize, column: usize },
}

impl LexError {
    pub fn line(&self) -> usize {
        match self {
            Self::UnexpectedCharacter { line, .. }
            | Self::InvalidNumberLiteral { line, .. }
            | Self::UnterminatedString { line, .. }
            | Self::UnterminatedTemplate { line, .. }
            | Self::UnterminatedComment { line, .. } => *line,
        }
    }

    pub fn column(&self) -> usize {
        match self {
            Self::UnexpectedCharacter { column, .. }
            | Self::InvalidNumberLiteral { column, .. }
            | Self::UnterminatedString { column, .. }
            | Self::UnterminatedTemplate { column, .. }
            | Self::UnterminatedComment { column, .. } => *column,
        }
    }
}

pub type LexResult<T> = Result<T, LexError>;
