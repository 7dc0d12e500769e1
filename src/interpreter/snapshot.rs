use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::stack::ensure_sufficient_stack;

use super::error::ErrorInfo;
use super::value::{Value, VariableType, format_number};

/// Immutable copy of a runtime value as it was when a snapshot was taken.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum SnapshotValue {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Array(Vec<SnapshotValue>),
    Object(Vec<(String, SnapshotValue)>),
    Function { name: String },
    /// Back-reference to a container already being copied.
    Circular,
    /// Container nested deeper than [`MAX_CAPTURE_DEPTH`].
    Elided,
}

/// Containers below this many enclosing containers are not copied.
pub const MAX_CAPTURE_DEPTH: usize = 64;

impl SnapshotValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    /// Property lookup on a copied object.
    pub fn get(&self, key: &str) -> Option<&SnapshotValue> {
        match self {
            Self::Object(entries) => entries
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(value) => write!(f, "'{value}'"),
            other => write!(f, "{other}"),
        }
    }
}

/// Console-style rendering: top-level strings print raw, nested ones quoted.
impl fmt::Display for SnapshotValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Boolean(value) => write!(f, "{value}"),
            Self::Number(value) => write!(f, "{}", format_number(*value)),
            Self::String(value) => write!(f, "{value}"),
            Self::Array(items) => {
                write!(f, "[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    item.fmt_nested(f)?;
                }
                write!(f, "]")
            }
            Self::Object(entries) if entries.is_empty() => write!(f, "{{}}"),
            Self::Object(entries) => {
                write!(f, "{{ ")?;
                for (index, (key, value)) in entries.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: ")?;
                    value.fmt_nested(f)?;
                }
                write!(f, " }}")
            }
            Self::Function { name } => write!(f, "[Function: {name}]"),
            Self::Circular => write!(f, "[Circular]"),
            Self::Elided => write!(f, "[...]"),
        }
    }
}

/// Deep-copies `value`, replacing references to containers on the current
/// copy path with [`SnapshotValue::Circular`] and containers past
/// [`MAX_CAPTURE_DEPTH`] with [`SnapshotValue::Elided`].
pub(crate) fn capture_value(value: &Value) -> SnapshotValue {
    let mut path = Vec::new();
    capture_with_path(value, &mut path)
}

fn capture_with_path(value: &Value, path: &mut Vec<usize>) -> SnapshotValue {
    match value {
        Value::Undefined => SnapshotValue::Undefined,
        Value::Null => SnapshotValue::Null,
        Value::Boolean(value) => SnapshotValue::Boolean(*value),
        Value::Number(value) => SnapshotValue::Number(*value),
        Value::String(value) => SnapshotValue::String(value.to_string()),
        Value::Array(items) => {
            let address = Rc::as_ptr(items) as *const () as usize;
            if path.contains(&address) {
                return SnapshotValue::Circular;
            }
            if path.len() >= MAX_CAPTURE_DEPTH {
                return SnapshotValue::Elided;
            }
            path.push(address);
            let copied: Vec<SnapshotValue> = ensure_sufficient_stack(|| {
                items
                    .borrow()
                    .iter()
                    .map(|item| capture_with_path(item, path))
                    .collect()
            });
            path.pop();
            SnapshotValue::Array(copied)
        }
        Value::Object(object) => {
            let address = Rc::as_ptr(object) as *const () as usize;
            if path.contains(&address) {
                return SnapshotValue::Circular;
            }
            if path.len() >= MAX_CAPTURE_DEPTH {
                return SnapshotValue::Elided;
            }
            path.push(address);
            let copied: Vec<(String, SnapshotValue)> = ensure_sufficient_stack(|| {
                object
                    .borrow()
                    .iter()
                    .map(|(key, value)| (key.to_string(), capture_with_path(value, path)))
                    .collect()
            });
            path.pop();
            SnapshotValue::Object(copied)
        }
        Value::Function(closure) => SnapshotValue::Function {
            name: closure.name.clone(),
        },
        Value::Builtin(builtin) => SnapshotValue::Function {
            name: builtin.name().to_string(),
        },
        Value::BoundMethod { method, .. } => SnapshotValue::Function {
            name: method.to_string(),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableScope {
    Local,
    Closure,
    Global,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    pub value: SnapshotValue,
    #[serde(rename = "type")]
    pub type_tag: VariableType,
    /// Value differs from the previous snapshot (or the variable is new).
    pub is_new: bool,
    pub scope: VariableScope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    /// Unique per invocation within one run.
    pub call_id: u64,
    pub function_name: String,
    pub arguments: Vec<Variable>,
    pub local_variables: BTreeMap<String, Variable>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_value: Option<SnapshotValue>,
    /// Call site of this invocation.
    pub source_location: SourceLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleKind {
    Log,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsoleOutput {
    pub kind: ConsoleKind,
    pub args: Vec<SnapshotValue>,
    /// Milliseconds since the run started.
    pub timestamp: u64,
}

impl ConsoleOutput {
    /// The line as a console would print it.
    pub fn text(&self) -> String {
        self.args
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// One recorded step of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    pub step: usize,
    pub current_line: usize,
    pub current_column: usize,
    pub call_stack: Vec<StackFrame>,
    /// Console history up to this step. Shared between snapshots until the
    /// next console call appends to it.
    pub output: Rc<Vec<ConsoleOutput>>,
    pub error_state: Option<ErrorInfo>,
    pub global_variables: BTreeMap<String, Variable>,
}

impl ExecutionState {
    pub fn global(&self, name: &str) -> Option<&SnapshotValue> {
        self.global_variables
            .get(name)
            .map(|variable| &variable.value)
    }

    pub fn current_frame(&self) -> Option<&StackFrame> {
        self.call_stack.last()
    }
}

/// Copies `bindings` into snapshot variables, flagging those that changed
/// relative to `previous`.
pub(crate) fn capture_variables(
    bindings: &[(String, Value)],
    previous: Option<&BTreeMap<String, Variable>>,
    scope: VariableScope,
) -> BTreeMap<String, Variable> {
    bindings
        .iter()
        .map(|(name, value)| {
            let copied = capture_value(value);
            let is_new = previous
                .and_then(|variables| variables.get(name))
                .is_none_or(|before| before.value != copied);
            let variable = Variable {
                name: name.clone(),
                value: copied,
                type_tag: value.variable_type(),
                is_new,
                scope,
            };
            (name.clone(), variable)
        })
        .collect()
}

pub(crate) fn capture_arguments(
    arguments: &[(String, Value)],
    previous: Option<&[Variable]>,
) -> Vec<Variable> {
    arguments
        .iter()
        .enumerate()
        .map(|(index, (name, value))| {
            let copied = capture_value(value);
            let is_new = previous
                .and_then(|variables| variables.get(index))
                .is_none_or(|before| before.value != copied);
            Variable {
                name: name.clone(),
                value: copied,
                type_tag: value.variable_type(),
                is_new,
                scope: VariableScope::Local,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::value::PropertyMap;
    use pretty_assertions::assert_eq;

    #[test]
    fn copies_are_detached_from_live_values() {
        let array = Value::array(vec![Value::Number(1.0)]);
        let copied = capture_value(&array);
        if let Value::Array(items) = &array {
            items.borrow_mut().push(Value::Number(2.0));
        }
        assert_eq!(copied, SnapshotValue::Array(vec![SnapshotValue::Number(1.0)]));
    }

    #[test]
    fn cycles_are_cut() {
        let object = Value::object(PropertyMap::default());
        if let Value::Object(map) = &object {
            map.borrow_mut().insert("self", object.clone());
        }
        assert_eq!(
            capture_value(&object),
            SnapshotValue::Object(vec![("self".to_string(), SnapshotValue::Circular)])
        );
    }

    #[test]
    fn shared_siblings_are_not_circular() {
        let shared = Value::array(vec![Value::Number(1.0)]);
        let outer = Value::array(vec![shared.clone(), shared]);
        let inner = SnapshotValue::Array(vec![SnapshotValue::Number(1.0)]);
        assert_eq!(
            capture_value(&outer),
            SnapshotValue::Array(vec![inner.clone(), inner])
        );
    }

    #[test]
    fn deep_nesting_is_elided() {
        let mut value = Value::Number(0.0);
        for _ in 0..MAX_CAPTURE_DEPTH + 10 {
            value = Value::array(vec![value]);
        }
        let mut copied = &capture_value(&value);
        let mut depth = 0;
        while let SnapshotValue::Array(items) = copied {
            copied = &items[0];
            depth += 1;
        }
        assert_eq!(depth, MAX_CAPTURE_DEPTH);
        assert_eq!(copied, &SnapshotValue::Elided);
        assert_eq!(SnapshotValue::Elided.to_string(), "[...]");
    }

    #[test]
    fn renders_like_a_console() {
        let value = SnapshotValue::Object(vec![
            ("name".to_string(), SnapshotValue::String("Ada".to_string())),
            (
                "scores".to_string(),
                SnapshotValue::Array(vec![SnapshotValue::Number(1.0), SnapshotValue::Number(2.5)]),
            ),
        ]);
        assert_eq!(value.to_string(), "{ name: 'Ada', scores: [1, 2.5] }");
        assert_eq!(SnapshotValue::String("hi".to_string()).to_string(), "hi");
        assert_eq!(SnapshotValue::Object(Vec::new()).to_string(), "{}");
    }

    #[test]
    fn flags_changed_and_new_variables() {
        let first = capture_variables(
            &[("x".to_string(), Value::Number(1.0))],
            None,
            VariableScope::Global,
        );
        assert!(first["x"].is_new);

        let second = capture_variables(
            &[
                ("x".to_string(), Value::Number(1.0)),
                ("y".to_string(), Value::Null),
            ],
            Some(&first),
            VariableScope::Global,
        );
        assert!(!second["x"].is_new);
        assert!(second["y"].is_new);
        assert_eq!(second["y"].type_tag, VariableType::Null);
    }
}
