use std::cell::RefCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::ast::FunctionDef;
use crate::stack::ensure_sufficient_stack;

use super::builtins::Builtin;
use super::environment::Environment;

pub(crate) type ArrayRef = Rc<RefCell<Elements>>;
pub(crate) type ObjectRef = Rc<RefCell<PropertyMap>>;

/// Element storage of an array value.
#[derive(Debug, Clone, Default)]
pub(crate) struct Elements(Vec<Value>);

impl Deref for Elements {
    type Target = Vec<Value>;

    fn deref(&self) -> &Vec<Value> {
        &self.0
    }
}

impl DerefMut for Elements {
    fn deref_mut(&mut self) -> &mut Vec<Value> {
        &mut self.0
    }
}

impl From<Vec<Value>> for Elements {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl Drop for Elements {
    fn drop(&mut self) {
        dismantle(std::mem::take(&mut self.0));
    }
}

/// Insertion-ordered property storage for plain objects.
#[derive(Debug, Clone, Default)]
pub(crate) struct PropertyMap {
    entries: Vec<(String, Value)>,
}

impl PropertyMap {
    pub(crate) fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    pub(crate) fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if let Some(slot) = self.entries.iter_mut().find(|(name, _)| *name == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl Drop for PropertyMap {
    fn drop(&mut self) {
        dismantle(self.entries.drain(..).map(|(_, value)| value).collect());
    }
}

/// Drops values while unlinking uniquely owned nested containers onto a
/// work list, so a long chain like `a = [a]` never recurses per level.
fn dismantle(mut pending: Vec<Value>) {
    while let Some(value) = pending.pop() {
        match value {
            Value::Array(items) => {
                if let Ok(cell) = Rc::try_unwrap(items) {
                    let mut elements = cell.into_inner();
                    pending.append(&mut elements.0);
                }
            }
            Value::Object(object) => {
                if let Ok(cell) = Rc::try_unwrap(object) {
                    let mut properties = cell.into_inner();
                    pending.extend(properties.entries.drain(..).map(|(_, value)| value));
                }
            }
            _ => {}
        }
    }
}

impl FromIterator<(String, Value)> for PropertyMap {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut map = PropertyMap::default();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

/// A user-defined function value together with the scope it closes over.
pub(crate) struct Closure {
    pub(crate) name: String,
    pub(crate) def: Rc<FunctionDef>,
    pub(crate) env: Environment,
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Closure({})", self.name)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Value {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(Rc<str>),
    Array(ArrayRef),
    Object(ObjectRef),
    Function(Rc<Closure>),
    Builtin(Builtin),
    BoundMethod {
        receiver: Box<Value>,
        method: Rc<str>,
    },
}

/// Type tag reported for a variable in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    Number,
    String,
    Boolean,
    Undefined,
    Null,
    Function,
    Array,
    Object,
}

impl Value {
    pub(crate) fn string(value: impl Into<Rc<str>>) -> Self {
        Value::String(value.into())
    }

    pub(crate) fn array(values: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(Elements(values))))
    }

    pub(crate) fn object(properties: PropertyMap) -> Self {
        Value::Object(Rc::new(RefCell::new(properties)))
    }

    pub(crate) fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub(crate) fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Function(_) | Value::Builtin(_) | Value::BoundMethod { .. }
        )
    }

    pub(crate) fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Boolean(value) => *value,
            Value::Number(value) => *value != 0.0 && !value.is_nan(),
            Value::String(value) => !value.is_empty(),
            Value::Array(_)
            | Value::Object(_)
            | Value::Function(_)
            | Value::Builtin(_)
            | Value::BoundMethod { .. } => true,
        }
    }

    /// Numeric conversion used by arithmetic and relational operators.
    pub(crate) fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Boolean(value) => f64::from(u8::from(*value)),
            Value::Number(value) => *value,
            Value::String(value) => string_to_number(value),
            Value::Array(_) => string_to_number(&self.to_display_string()),
            Value::Object(_)
            | Value::Function(_)
            | Value::Builtin(_)
            | Value::BoundMethod { .. } => f64::NAN,
        }
    }

    /// String conversion (`String(value)`, concatenation, template interpolation).
    pub(crate) fn to_display_string(&self) -> String {
        self.display_with_path(&mut FxHashSet::default())
    }

    /// `path` holds the containers currently being converted; meeting one
    /// again renders it empty, as `join` does.
    fn display_with_path(&self, path: &mut FxHashSet<usize>) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Boolean(value) => value.to_string(),
            Value::Number(value) => format_number(*value),
            Value::String(value) => value.to_string(),
            Value::Array(items) => {
                let address = Rc::as_ptr(items) as *const () as usize;
                if !path.insert(address) {
                    return String::new();
                }
                let text = ensure_sufficient_stack(|| {
                    items
                        .borrow()
                        .iter()
                        .map(|item| {
                            if item.is_nullish() {
                                String::new()
                            } else {
                                item.display_with_path(path)
                            }
                        })
                        .collect::<Vec<_>>()
                        .join(",")
                });
                path.remove(&address);
                text
            }
            Value::Object(object) => {
                let address = Rc::as_ptr(object) as *const () as usize;
                if !path.insert(address) {
                    return "[object Object]".to_string();
                }
                let parts =
                    ensure_sufficient_stack(|| error_parts_with_path(&object.borrow(), path));
                path.remove(&address);
                match parts {
                    Some((name, message)) if message.is_empty() => name,
                    Some((name, message)) => format!("{name}: {message}"),
                    None => "[object Object]".to_string(),
                }
            }
            Value::Function(closure) => format!("function {}() {{ ... }}", closure.name),
            Value::Builtin(builtin) => format!("function {}() {{ [native code] }}", builtin.name()),
            Value::BoundMethod { method, .. } => {
                format!("function {method}() {{ [native code] }}")
            }
        }
    }

    pub(crate) fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Array(_) | Value::Object(_) => "object",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) | Value::Builtin(_) | Value::BoundMethod { .. } => "function",
        }
    }

    pub(crate) fn variable_type(&self) -> VariableType {
        match self {
            Value::Undefined => VariableType::Undefined,
            Value::Null => VariableType::Null,
            Value::Boolean(_) => VariableType::Boolean,
            Value::Number(_) => VariableType::Number,
            Value::String(_) => VariableType::String,
            Value::Array(_) => VariableType::Array,
            Value::Object(_) => VariableType::Object,
            Value::Function(_) | Value::Builtin(_) | Value::BoundMethod { .. } => {
                VariableType::Function
            }
        }
    }

    /// `"null"` or `"undefined"`, for property-access errors.
    pub(crate) fn nullish_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            _ => "undefined",
        }
    }

    /// Short description used in error messages.
    pub(crate) fn describe(&self) -> String {
        match self {
            Value::String(value) => format!("\"{value}\""),
            Value::Array(_) => "array".to_string(),
            Value::Object(_) => "object".to_string(),
            other => other.to_display_string(),
        }
    }
}

/// `(name, message)` when the object looks like an error (`{ name?, message }`).
pub(crate) fn error_parts(object: &PropertyMap) -> Option<(String, String)> {
    error_parts_with_path(object, &mut FxHashSet::default())
}

fn error_parts_with_path(
    object: &PropertyMap,
    path: &mut FxHashSet<usize>,
) -> Option<(String, String)> {
    let message = object.get("message")?.display_with_path(path);
    let name = object
        .get("name")
        .map(|name| name.display_with_path(path))
        .unwrap_or_else(|| "Error".to_string());
    Some((name, message))
}

pub(crate) fn error_object(name: &str, message: &str) -> Value {
    Value::object(PropertyMap::from_iter([
        ("name".to_string(), Value::string(name)),
        ("message".to_string(), Value::string(message)),
    ]))
}

pub(crate) fn string_to_number(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return i64::from_str_radix(hex, 16)
            .map(|value| value as f64)
            .unwrap_or(f64::NAN);
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ if trimmed.chars().any(|c| c.is_alphabetic() && c != 'e' && c != 'E') => f64::NAN,
        _ => trimmed.parse::<f64>().unwrap_or(f64::NAN),
    }
}

/// Formats a number the way the scripting language prints it.
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else if value == 0.0 {
        "0".to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e21 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}
