use serde::Serialize;
use thiserror::Error;

use crate::token::Span;

use super::value::{Value, error_object, error_parts};

/// Typed errors raised while executing a program.
#[derive(Debug, Error, Clone)]
pub(crate) enum RuntimeError {
    #[error("{name} is not defined")]
    UndefinedVariable { name: String },
    #[error("{name} is not defined")]
    AssignToUndeclared { name: String },
    #[error("Assignment to constant variable '{name}'")]
    AssignToConstant { name: String },
    #[error("{callee} is not a function")]
    NotCallable { callee: String },
    #[error("{callee} is not a constructor")]
    NotConstructor { callee: String },
    #[error("Cannot read properties of {base} (reading '{property}')")]
    PropertyOfNullish {
        base: &'static str,
        property: String,
    },
    #[error("Cannot set properties of {base} (setting '{property}')")]
    SetPropertyOfNullish {
        base: &'static str,
        property: String,
    },
    #[error("{value} is not iterable")]
    NotIterable { value: String },
    #[error("Invalid array length")]
    InvalidArrayLength,
    #[error("Invalid count value: {count}")]
    InvalidCount { count: String },
    #[error("Converting circular structure to JSON")]
    CircularJson,
    #[error("Invalid assignment target")]
    InvalidAssignmentTarget,
    #[error("Reduce of empty array with no initial value")]
    ReduceOfEmptyArray,
    #[error("Illegal {statement} statement")]
    IllegalControlFlow { statement: &'static str },
    #[error("Illegal return statement")]
    ReturnOutsideFunction,
    #[error("Maximum call stack size exceeded")]
    CallDepthExceeded,
    #[error("Maximum execution steps exceeded ({limit}). Possible infinite loop detected.")]
    StepLimitExceeded { limit: usize },
    #[error("{message}")]
    Thrown { value: Value, message: String },
}

/// Broad class of a runtime failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Syntax,
    Reference,
    Type,
    Range,
    Thrown,
    StepLimit,
}

impl RuntimeError {
    pub(crate) fn thrown(value: Value) -> Self {
        let message = match &value {
            Value::Object(object) => error_parts(&object.borrow())
                .map(|(_, message)| message)
                .unwrap_or_else(|| value.to_display_string()),
            other => other.to_display_string(),
        };
        Self::Thrown { value, message }
    }

    pub(crate) fn kind(&self) -> ErrorKind {
        match self {
            Self::UndefinedVariable { .. } | Self::AssignToUndeclared { .. } => {
                ErrorKind::Reference
            }
            Self::AssignToConstant { .. }
            | Self::NotCallable { .. }
            | Self::NotConstructor { .. }
            | Self::PropertyOfNullish { .. }
            | Self::SetPropertyOfNullish { .. }
            | Self::NotIterable { .. }
            | Self::CircularJson
            | Self::ReduceOfEmptyArray => ErrorKind::Type,
            Self::InvalidArrayLength | Self::InvalidCount { .. } | Self::CallDepthExceeded => {
                ErrorKind::Range
            }
            Self::IllegalControlFlow { .. }
            | Self::ReturnOutsideFunction
            | Self::InvalidAssignmentTarget => ErrorKind::Syntax,
            Self::StepLimitExceeded { .. } => ErrorKind::StepLimit,
            Self::Thrown { .. } => ErrorKind::Thrown,
        }
    }

    /// Constructor name the program observes for this error.
    pub(crate) fn name(&self) -> String {
        match self {
            Self::Thrown {
                value: Value::Object(object),
                ..
            } => error_parts(&object.borrow())
                .map(|(name, _)| name)
                .unwrap_or_else(|| "Error".to_string()),
            Self::Thrown { .. } | Self::StepLimitExceeded { .. } => "Error".to_string(),
            other => match other.kind() {
                ErrorKind::Reference => "ReferenceError",
                ErrorKind::Type => "TypeError",
                ErrorKind::Range => "RangeError",
                ErrorKind::Syntax => "SyntaxError",
                ErrorKind::Thrown | ErrorKind::StepLimit => "Error",
            }
            .to_string(),
        }
    }

    /// Whether a `catch` clause may intercept this error.
    pub(crate) fn is_catchable(&self) -> bool {
        !matches!(self, Self::StepLimitExceeded { .. })
    }

    /// Value bound to a catch parameter.
    pub(crate) fn to_value(&self) -> Value {
        match self {
            Self::Thrown { value, .. } => value.clone(),
            other => error_object(&other.name(), &other.to_string()),
        }
    }
}

/// A runtime error together with where it was raised.
#[derive(Debug, Clone)]
pub(crate) struct Exception {
    pub(crate) error: RuntimeError,
    pub(crate) span: Span,
    /// Active call frames, innermost first.
    pub(crate) stack: Vec<String>,
}

impl Exception {
    pub(crate) fn to_error_info(&self) -> ErrorInfo {
        let stack = if self.stack.is_empty() {
            None
        } else {
            Some(
                self.stack
                    .iter()
                    .map(|frame| format!("    at {frame}"))
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
        };
        ErrorInfo {
            name: self.error.name(),
            message: self.error.to_string(),
            line: self.span.line,
            column: self.span.column,
            stack,
            kind: self.error.kind(),
        }
    }
}

/// Terminal error attached to the final snapshot of a failed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub name: String,
    pub message: String,
    pub line: usize,
    pub column: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub kind: ErrorKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_error_class() {
        let undefined = RuntimeError::UndefinedVariable {
            name: "x".to_string(),
        };
        assert_eq!(undefined.name(), "ReferenceError");
        assert_eq!(undefined.to_string(), "x is not defined");
        assert_eq!(RuntimeError::CallDepthExceeded.name(), "RangeError");
    }

    #[test]
    fn thrown_error_objects_keep_their_name_and_message() {
        let error = RuntimeError::thrown(error_object("TypeError", "nope"));
        assert_eq!(error.name(), "TypeError");
        assert_eq!(error.to_string(), "nope");
        assert_eq!(error.kind(), ErrorKind::Thrown);
    }

    #[test]
    fn thrown_primitives_are_stringified() {
        let error = RuntimeError::thrown(Value::Number(7.0));
        assert_eq!(error.name(), "Error");
        assert_eq!(error.to_string(), "7");
        assert!(matches!(error.to_value(), Value::Number(n) if n == 7.0));
    }

    #[test]
    fn step_limit_is_not_catchable() {
        let error = RuntimeError::StepLimitExceeded { limit: 10 };
        assert!(!error.is_catchable());
        assert!(
            error
                .to_string()
                .contains("Maximum execution steps exceeded")
        );
    }

    #[test]
    fn interpreter_errors_are_caught_as_error_objects() {
        let error = RuntimeError::NotCallable {
            callee: "x".to_string(),
        };
        let Value::Object(object) = error.to_value() else {
            panic!("expected error object");
        };
        let (name, message) = error_parts(&object.borrow()).expect("error shaped");
        assert_eq!(name, "TypeError");
        assert_eq!(message, "x is not a function");
    }

    #[test]
    fn error_info_formats_stack() {
        let exception = Exception {
            error: RuntimeError::CallDepthExceeded,
            span: Span {
                start: 0,
                end: 1,
                line: 3,
                column: 2,
            },
            stack: vec!["inner (line 3)".to_string(), "outer (line 7)".to_string()],
        };
        let info = exception.to_error_info();
        assert_eq!(info.line, 3);
        assert_eq!(info.column, 2);
        assert_eq!(
            info.stack.as_deref(),
            Some("    at inner (line 3)\n    at outer (line 7)")
        );
    }
}
