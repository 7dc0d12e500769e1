use std::cmp::Ordering;
use std::rc::Rc;

use crate::stack::ensure_sufficient_stack;
use crate::token::Span;

use super::environment::Environment;
use super::error::RuntimeError;
use super::operators::{same_value_zero, strict_equals};
use super::runtime::{ExecResult, InterpreterRuntime};
use super::snapshot::{ConsoleKind, ConsoleOutput, capture_value};
use super::value::{ArrayRef, PropertyMap, Value, error_object, format_number, string_to_number};

/// Longest array the runtime will allocate.
const MAX_ARRAY_LENGTH: usize = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MathFunction {
    Floor,
    Ceil,
    Round,
    Abs,
    Sqrt,
    Pow,
    Min,
    Max,
    Trunc,
    Sign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorConstructor {
    Error,
    TypeError,
    RangeError,
    ReferenceError,
}

impl ErrorConstructor {
    fn name(self) -> &'static str {
        match self {
            Self::Error => "Error",
            Self::TypeError => "TypeError",
            Self::RangeError => "RangeError",
            Self::ReferenceError => "ReferenceError",
        }
    }
}

/// Native functions available to every program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    Console(ConsoleKind),
    Math(MathFunction),
    ParseInt,
    ParseFloat,
    IsNaN,
    String,
    Number,
    Boolean,
    Array,
    ArrayIsArray,
    Object,
    ObjectKeys,
    ObjectValues,
    ObjectEntries,
    JsonStringify,
    Error(ErrorConstructor),
}

impl Builtin {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Console(ConsoleKind::Log) => "log",
            Self::Console(ConsoleKind::Info) => "info",
            Self::Console(ConsoleKind::Warn) => "warn",
            Self::Console(ConsoleKind::Error) => "error",
            Self::Math(function) => match function {
                MathFunction::Floor => "floor",
                MathFunction::Ceil => "ceil",
                MathFunction::Round => "round",
                MathFunction::Abs => "abs",
                MathFunction::Sqrt => "sqrt",
                MathFunction::Pow => "pow",
                MathFunction::Min => "min",
                MathFunction::Max => "max",
                MathFunction::Trunc => "trunc",
                MathFunction::Sign => "sign",
            },
            Self::ParseInt => "parseInt",
            Self::ParseFloat => "parseFloat",
            Self::IsNaN => "isNaN",
            Self::String => "String",
            Self::Number => "Number",
            Self::Boolean => "Boolean",
            Self::Array => "Array",
            Self::ArrayIsArray => "isArray",
            Self::Object => "Object",
            Self::ObjectKeys => "keys",
            Self::ObjectValues => "values",
            Self::ObjectEntries => "entries",
            Self::JsonStringify => "stringify",
            Self::Error(constructor) => constructor.name(),
        }
    }

    pub(crate) fn is_constructor(self) -> bool {
        matches!(
            self,
            Self::Error(_)
                | Self::Array
                | Self::Object
                | Self::String
                | Self::Number
                | Self::Boolean
        )
    }

    /// Static members reachable through a constructor, e.g. `Array.isArray`.
    pub(crate) fn static_member(self, key: &str) -> Option<Value> {
        let member = match (self, key) {
            (Self::Array, "isArray") => Self::ArrayIsArray,
            (Self::Object, "keys") => Self::ObjectKeys,
            (Self::Object, "values") => Self::ObjectValues,
            (Self::Object, "entries") => Self::ObjectEntries,
            (_, "name") => return Some(Value::string(self.name())),
            _ => return None,
        };
        Some(Value::Builtin(member))
    }
}

/// Binds the built-in globals into `intrinsics`.
pub(super) fn install(intrinsics: &Environment) {
    let console = [
        ConsoleKind::Log,
        ConsoleKind::Info,
        ConsoleKind::Warn,
        ConsoleKind::Error,
    ]
    .into_iter()
    .map(|kind| {
        let builtin = Builtin::Console(kind);
        (builtin.name().to_string(), Value::Builtin(builtin))
    })
    .collect();
    intrinsics.define_constant("console", Value::object(console));

    let mut math: PropertyMap = [
        MathFunction::Floor,
        MathFunction::Ceil,
        MathFunction::Round,
        MathFunction::Abs,
        MathFunction::Sqrt,
        MathFunction::Pow,
        MathFunction::Min,
        MathFunction::Max,
        MathFunction::Trunc,
        MathFunction::Sign,
    ]
    .into_iter()
    .map(|function| {
        let builtin = Builtin::Math(function);
        (builtin.name().to_string(), Value::Builtin(builtin))
    })
    .collect();
    math.insert("PI", Value::Number(std::f64::consts::PI));
    math.insert("E", Value::Number(std::f64::consts::E));
    intrinsics.define_constant("Math", Value::object(math));

    let json = PropertyMap::from_iter([(
        "stringify".to_string(),
        Value::Builtin(Builtin::JsonStringify),
    )]);
    intrinsics.define_constant("JSON", Value::object(json));

    for builtin in [
        Builtin::ParseInt,
        Builtin::ParseFloat,
        Builtin::IsNaN,
        Builtin::String,
        Builtin::Number,
        Builtin::Boolean,
        Builtin::Array,
        Builtin::Object,
        Builtin::Error(ErrorConstructor::Error),
        Builtin::Error(ErrorConstructor::TypeError),
        Builtin::Error(ErrorConstructor::RangeError),
        Builtin::Error(ErrorConstructor::ReferenceError),
    ] {
        intrinsics.define_constant(builtin.name(), Value::Builtin(builtin));
    }
    intrinsics.define_constant("NaN", Value::Number(f64::NAN));
    intrinsics.define_constant("Infinity", Value::Number(f64::INFINITY));
}

const ARRAY_METHODS: &[&str] = &[
    "push", "pop", "shift", "unshift", "indexOf", "includes", "join", "slice", "concat",
    "reverse", "map", "filter", "forEach", "reduce", "find", "findIndex", "some", "every",
    "sort", "toString",
];

const STRING_METHODS: &[&str] = &[
    "toUpperCase",
    "toLowerCase",
    "charAt",
    "indexOf",
    "includes",
    "slice",
    "substring",
    "split",
    "trim",
    "startsWith",
    "endsWith",
    "repeat",
    "toString",
];

const NUMBER_METHODS: &[&str] = &["toFixed", "toString"];

/// Method `key` of a primitive or array receiver, bound to that receiver.
pub(super) fn bound_method(receiver: &Value, key: &str) -> Option<Value> {
    let known: &[&str] = match receiver {
        Value::Array(_) => ARRAY_METHODS,
        Value::String(_) => STRING_METHODS,
        Value::Number(_) => NUMBER_METHODS,
        Value::Boolean(_) => &["toString"],
        _ => return None,
    };
    known.contains(&key).then(|| Value::BoundMethod {
        receiver: Box::new(receiver.clone()),
        method: Rc::from(key),
    })
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Undefined)
}

/// Resolves a possibly negative position argument against `len`.
fn relative_index(value: &Value, len: usize, default: usize) -> usize {
    if matches!(value, Value::Undefined) {
        return default;
    }
    let position = value.to_number();
    if position.is_nan() {
        return 0;
    }
    let position = position.trunc();
    if position < 0.0 {
        (len as f64 + position).max(0.0) as usize
    } else {
        position.min(len as f64) as usize
    }
}

fn checked_length(value: f64) -> Result<usize, RuntimeError> {
    if value < 0.0 || value.fract() != 0.0 || value > MAX_ARRAY_LENGTH as f64 {
        return Err(RuntimeError::InvalidArrayLength);
    }
    Ok(value as usize)
}

impl InterpreterRuntime {
    pub(super) fn call_builtin(
        &mut self,
        builtin: Builtin,
        args: Vec<Value>,
        span: Span,
    ) -> ExecResult<Value> {
        let value = match builtin {
            Builtin::Console(kind) => {
                self.write_console(kind, &args);
                Value::Undefined
            }
            Builtin::Math(function) => Value::Number(math(function, &args)),
            Builtin::ParseInt => Value::Number(parse_int(
                &arg(&args, 0).to_display_string(),
                &arg(&args, 1),
            )),
            Builtin::ParseFloat => Value::Number(parse_float(&arg(&args, 0).to_display_string())),
            Builtin::IsNaN => Value::Boolean(arg(&args, 0).to_number().is_nan()),
            Builtin::String => match args.first() {
                Some(value) => Value::string(value.to_display_string()),
                None => Value::string(""),
            },
            Builtin::Number => match args.first() {
                Some(value) => Value::Number(value.to_number()),
                None => Value::Number(0.0),
            },
            Builtin::Boolean => Value::Boolean(arg(&args, 0).is_truthy()),
            Builtin::ArrayIsArray => Value::Boolean(matches!(arg(&args, 0), Value::Array(_))),
            Builtin::ObjectKeys => Value::array(
                own_keys(&arg(&args, 0))
                    .into_iter()
                    .map(Value::string)
                    .collect(),
            ),
            Builtin::ObjectValues => Value::array(
                own_entries(&arg(&args, 0))
                    .into_iter()
                    .map(|(_, value)| value)
                    .collect(),
            ),
            Builtin::ObjectEntries => Value::array(
                own_entries(&arg(&args, 0))
                    .into_iter()
                    .map(|(key, value)| Value::array(vec![Value::string(key), value]))
                    .collect(),
            ),
            Builtin::JsonStringify => {
                let mut path = Vec::new();
                match json_stringify(&arg(&args, 0), &mut path) {
                    Ok(Some(text)) => Value::string(text),
                    Ok(None) => Value::Undefined,
                    Err(error) => return Err(self.raise_at(error, span)),
                }
            }
            Builtin::Object => match arg(&args, 0) {
                value @ (Value::Object(_) | Value::Array(_)) => value,
                _ => Value::object(PropertyMap::default()),
            },
            Builtin::Array | Builtin::Error(_) => {
                return self.construct_builtin(builtin, args, span);
            }
        };
        Ok(value)
    }

    pub(super) fn construct_builtin(
        &mut self,
        builtin: Builtin,
        args: Vec<Value>,
        span: Span,
    ) -> ExecResult<Value> {
        match builtin {
            Builtin::Error(constructor) => {
                let message = match args.first() {
                    Some(Value::Undefined) | None => String::new(),
                    Some(value) => value.to_display_string(),
                };
                Ok(error_object(constructor.name(), &message))
            }
            Builtin::Array => match args.as_slice() {
                [Value::Number(length)] => {
                    let length =
                        checked_length(*length).map_err(|error| self.raise_at(error, span))?;
                    Ok(Value::array(vec![Value::Undefined; length]))
                }
                _ => Ok(Value::array(args)),
            },
            Builtin::Object | Builtin::String | Builtin::Number | Builtin::Boolean => {
                self.call_builtin(builtin, args, span)
            }
            other => Err(self.raise_at(
                RuntimeError::NotConstructor {
                    callee: other.name().to_string(),
                },
                span,
            )),
        }
    }

    fn write_console(&mut self, kind: ConsoleKind, args: &[Value]) {
        let entry = ConsoleOutput {
            kind,
            args: args.iter().map(capture_value).collect(),
            timestamp: self.elapsed_millis(),
        };
        tracing::trace!(?kind, text = %entry.text(), "console output");
        Rc::make_mut(&mut self.output).push(entry);
    }

    pub(super) fn call_method(
        &mut self,
        receiver: &Value,
        method: &str,
        args: Vec<Value>,
        env: &Environment,
        span: Span,
    ) -> ExecResult<Value> {
        let result = match receiver {
            Value::Array(items) => return self.call_array_method(items, method, args, env, span),
            Value::String(text) => string_method(text, method, &args),
            Value::Number(number) => number_method(*number, method, &args),
            Value::Boolean(value) if method == "toString" => Ok(Value::string(value.to_string())),
            other => Err(RuntimeError::NotCallable {
                callee: format!("{}.{method}", other.describe()),
            }),
        };
        result.map_err(|error| self.raise_at(error, span))
    }

    fn call_array_method(
        &mut self,
        items: &ArrayRef,
        method: &str,
        args: Vec<Value>,
        env: &Environment,
        span: Span,
    ) -> ExecResult<Value> {
        let receiver = Value::Array(Rc::clone(items));
        let value = match method {
            "push" => {
                let mut items = items.borrow_mut();
                items.extend(args);
                Value::Number(items.len() as f64)
            }
            "pop" => items.borrow_mut().pop().unwrap_or(Value::Undefined),
            "shift" => {
                let mut items = items.borrow_mut();
                if items.is_empty() {
                    Value::Undefined
                } else {
                    items.remove(0)
                }
            }
            "unshift" => {
                let mut items = items.borrow_mut();
                items.splice(0..0, args);
                Value::Number(items.len() as f64)
            }
            "indexOf" => {
                let needle = arg(&args, 0);
                let position = items
                    .borrow()
                    .iter()
                    .position(|item| strict_equals(item, &needle));
                Value::Number(position.map_or(-1.0, |index| index as f64))
            }
            "includes" => {
                let needle = arg(&args, 0);
                Value::Boolean(
                    items
                        .borrow()
                        .iter()
                        .any(|item| same_value_zero(item, &needle)),
                )
            }
            "join" | "toString" => {
                let separator = match args.first() {
                    Some(Value::Undefined) | None => ",".to_string(),
                    Some(value) => value.to_display_string(),
                };
                let joined = items
                    .borrow()
                    .iter()
                    .map(|item| {
                        if item.is_nullish() {
                            String::new()
                        } else {
                            item.to_display_string()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(&separator);
                Value::string(joined)
            }
            "slice" => {
                let items = items.borrow();
                let len = items.len();
                let start = relative_index(&arg(&args, 0), len, 0);
                let end = relative_index(&arg(&args, 1), len, len);
                let sliced = if start < end {
                    items[start..end].to_vec()
                } else {
                    Vec::new()
                };
                Value::array(sliced)
            }
            "concat" => {
                let mut combined = items.borrow().to_vec();
                for value in args {
                    match value {
                        Value::Array(other) => combined.extend(other.borrow().iter().cloned()),
                        other => combined.push(other),
                    }
                }
                Value::array(combined)
            }
            "reverse" => {
                items.borrow_mut().reverse();
                receiver
            }
            "sort" => {
                let comparator = args.first().filter(|value| value.is_callable()).cloned();
                self.sort_array(items, comparator, env, span)?;
                receiver
            }
            "reduce" => return self.reduce_array(items, args, env, span),
            "map" | "filter" | "forEach" | "find" | "findIndex" | "some" | "every" => {
                return self.iterate_array(items, method, args, env, span);
            }
            other => {
                return Err(self.raise_at(
                    RuntimeError::NotCallable {
                        callee: format!("array.{other}"),
                    },
                    span,
                ));
            }
        };
        Ok(value)
    }

    /// Higher-order array methods that invoke a callback per element.
    fn iterate_array(
        &mut self,
        items: &ArrayRef,
        method: &str,
        args: Vec<Value>,
        env: &Environment,
        span: Span,
    ) -> ExecResult<Value> {
        let callback = arg(&args, 0);
        if !callback.is_callable() {
            return Err(self.raise_at(
                RuntimeError::NotCallable {
                    callee: callback.describe(),
                },
                span,
            ));
        }
        let receiver = Value::Array(Rc::clone(items));
        let length = items.borrow().len();
        let mut mapped = Vec::new();
        for index in 0..length {
            let Some(element) = items.borrow().get(index).cloned() else {
                break;
            };
            let result = self.call_value(
                callback.clone(),
                None,
                vec![element.clone(), Value::Number(index as f64), receiver.clone()],
                env,
                span,
            )?;
            match method {
                "map" => mapped.push(result),
                "filter" if result.is_truthy() => mapped.push(element),
                "find" if result.is_truthy() => return Ok(element),
                "findIndex" if result.is_truthy() => return Ok(Value::Number(index as f64)),
                "some" if result.is_truthy() => return Ok(Value::Boolean(true)),
                "every" if !result.is_truthy() => return Ok(Value::Boolean(false)),
                _ => {}
            }
        }
        Ok(match method {
            "map" | "filter" => Value::array(mapped),
            "find" => Value::Undefined,
            "findIndex" => Value::Number(-1.0),
            "some" => Value::Boolean(false),
            "every" => Value::Boolean(true),
            _ => Value::Undefined,
        })
    }

    fn reduce_array(
        &mut self,
        items: &ArrayRef,
        args: Vec<Value>,
        env: &Environment,
        span: Span,
    ) -> ExecResult<Value> {
        let callback = arg(&args, 0);
        if !callback.is_callable() {
            return Err(self.raise_at(
                RuntimeError::NotCallable {
                    callee: callback.describe(),
                },
                span,
            ));
        }
        let receiver = Value::Array(Rc::clone(items));
        let length = items.borrow().len();
        let (mut accumulator, start) = match args.get(1) {
            Some(initial) => (initial.clone(), 0),
            None => match items.borrow().first() {
                Some(first) => (first.clone(), 1),
                None => return Err(self.raise_at(RuntimeError::ReduceOfEmptyArray, span)),
            },
        };
        for index in start..length {
            let Some(element) = items.borrow().get(index).cloned() else {
                break;
            };
            accumulator = self.call_value(
                callback.clone(),
                None,
                vec![accumulator, element, Value::Number(index as f64), receiver.clone()],
                env,
                span,
            )?;
        }
        Ok(accumulator)
    }

    /// Stable insertion sort; the comparator may be a user function.
    fn sort_array(
        &mut self,
        items: &ArrayRef,
        comparator: Option<Value>,
        env: &Environment,
        span: Span,
    ) -> ExecResult<()> {
        let mut sorted = items.borrow().to_vec();
        for index in 1..sorted.len() {
            let mut position = index;
            while position > 0 {
                let order = self.sort_order(
                    &sorted[position - 1],
                    &sorted[position],
                    comparator.as_ref(),
                    env,
                    span,
                )?;
                if order != Ordering::Greater {
                    break;
                }
                sorted.swap(position - 1, position);
                position -= 1;
            }
        }
        *items.borrow_mut() = sorted.into();
        Ok(())
    }

    fn sort_order(
        &mut self,
        left: &Value,
        right: &Value,
        comparator: Option<&Value>,
        env: &Environment,
        span: Span,
    ) -> ExecResult<Ordering> {
        match (left, right) {
            (Value::Undefined, Value::Undefined) => return Ok(Ordering::Equal),
            (Value::Undefined, _) => return Ok(Ordering::Greater),
            (_, Value::Undefined) => return Ok(Ordering::Less),
            _ => {}
        }
        let Some(comparator) = comparator else {
            return Ok(left.to_display_string().cmp(&right.to_display_string()));
        };
        let result = self
            .call_value(
                comparator.clone(),
                None,
                vec![left.clone(), right.clone()],
                env,
                span,
            )?
            .to_number();
        Ok(if result > 0.0 {
            Ordering::Greater
        } else if result < 0.0 {
            Ordering::Less
        } else {
            Ordering::Equal
        })
    }
}

fn math(function: MathFunction, args: &[Value]) -> f64 {
    let x = arg(args, 0).to_number();
    match function {
        MathFunction::Floor => x.floor(),
        MathFunction::Ceil => x.ceil(),
        MathFunction::Round => (x + 0.5).floor(),
        MathFunction::Abs => x.abs(),
        MathFunction::Sqrt => x.sqrt(),
        MathFunction::Pow => x.powf(arg(args, 1).to_number()),
        MathFunction::Trunc => x.trunc(),
        MathFunction::Sign => {
            if x.is_nan() || x == 0.0 {
                x
            } else {
                x.signum()
            }
        }
        MathFunction::Min => args.iter().map(Value::to_number).fold(f64::INFINITY, |acc, n| {
            if acc.is_nan() || n.is_nan() {
                f64::NAN
            } else {
                acc.min(n)
            }
        }),
        MathFunction::Max => args
            .iter()
            .map(Value::to_number)
            .fold(f64::NEG_INFINITY, |acc, n| {
                if acc.is_nan() || n.is_nan() {
                    f64::NAN
                } else {
                    acc.max(n)
                }
            }),
    }
}

fn parse_int(text: &str, radix: &Value) -> f64 {
    let mut rest = text.trim();
    let negative = rest.starts_with('-');
    if let Some(stripped) = rest.strip_prefix('-').or_else(|| rest.strip_prefix('+')) {
        rest = stripped;
    }
    let mut radix = match radix {
        Value::Undefined => 10,
        other => other.to_number() as u32,
    };
    if radix == 0 {
        radix = 10;
    }
    if (radix == 10 || radix == 16)
        && let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X"))
    {
        rest = hex;
        radix = 16;
    }
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let digits: Vec<u32> = rest.chars().map_while(|c| c.to_digit(radix)).collect();
    if digits.is_empty() {
        return f64::NAN;
    }
    let value = digits
        .into_iter()
        .fold(0.0, |acc, digit| acc * f64::from(radix) + f64::from(digit));
    if negative { -value } else { value }
}

fn parse_float(text: &str) -> f64 {
    let trimmed = text.trim_start();
    let bytes = trimmed.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    if trimmed[end..].starts_with("Infinity") {
        return if trimmed.starts_with('-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        };
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end == digits_start || &trimmed[digits_start..end] == "." {
        return f64::NAN;
    }
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exponent_end = end + 1;
        if matches!(bytes.get(exponent_end), Some(b'+' | b'-')) {
            exponent_end += 1;
        }
        let exponent_digits = exponent_end;
        while exponent_end < bytes.len() && bytes[exponent_end].is_ascii_digit() {
            exponent_end += 1;
        }
        if exponent_end > exponent_digits {
            end = exponent_end;
        }
    }
    string_to_number(&trimmed[..end])
}

fn own_keys(value: &Value) -> Vec<String> {
    own_entries(value).into_iter().map(|(key, _)| key).collect()
}

fn own_entries(value: &Value) -> Vec<(String, Value)> {
    match value {
        Value::Object(object) => object
            .borrow()
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect(),
        Value::Array(items) => items
            .borrow()
            .iter()
            .enumerate()
            .map(|(index, value)| (index.to_string(), value.clone()))
            .collect(),
        Value::String(text) => text
            .chars()
            .enumerate()
            .map(|(index, c)| (index.to_string(), Value::string(c.to_string())))
            .collect(),
        _ => Vec::new(),
    }
}

/// Keys of `value` in `for ... in` order.
pub(super) fn enumerable_keys(value: &Value) -> Vec<String> {
    own_keys(value)
}

fn json_quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            c if (c as u32) < 0x20 => quoted.push_str(&format!("\\u{:04x}", c as u32)),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// `None` for values JSON cannot represent (`undefined`, functions).
fn json_stringify(value: &Value, path: &mut Vec<usize>) -> Result<Option<String>, RuntimeError> {
    let text = match value {
        Value::Undefined | Value::Function(_) | Value::Builtin(_) | Value::BoundMethod { .. } => {
            return Ok(None);
        }
        Value::Null => "null".to_string(),
        Value::Boolean(value) => value.to_string(),
        Value::Number(number) if number.is_finite() => format_number(*number),
        Value::Number(_) => "null".to_string(),
        Value::String(text) => json_quote(text),
        Value::Array(items) => {
            let address = Rc::as_ptr(items) as *const () as usize;
            if path.contains(&address) {
                return Err(RuntimeError::CircularJson);
            }
            path.push(address);
            let mut parts = Vec::new();
            for item in items.borrow().iter() {
                let text = ensure_sufficient_stack(|| json_stringify(item, path))?;
                parts.push(text.unwrap_or_else(|| "null".to_string()));
            }
            path.pop();
            format!("[{}]", parts.join(","))
        }
        Value::Object(object) => {
            let address = Rc::as_ptr(object) as *const () as usize;
            if path.contains(&address) {
                return Err(RuntimeError::CircularJson);
            }
            path.push(address);
            let mut parts = Vec::new();
            for (key, value) in object.borrow().iter() {
                if let Some(text) = ensure_sufficient_stack(|| json_stringify(value, path))? {
                    parts.push(format!("{}:{text}", json_quote(key)));
                }
            }
            path.pop();
            format!("{{{}}}", parts.join(","))
        }
    };
    Ok(Some(text))
}

fn char_count(text: &str) -> usize {
    text.chars().count()
}

fn char_slice(text: &str, start: usize, end: usize) -> String {
    text.chars()
        .skip(start)
        .take(end.saturating_sub(start))
        .collect()
}

/// Character index of the first occurrence of `needle`.
fn char_index_of(text: &str, needle: &str) -> Option<usize> {
    text.find(needle).map(|byte| char_count(&text[..byte]))
}

fn string_method(text: &str, method: &str, args: &[Value]) -> Result<Value, RuntimeError> {
    let value = match method {
        "toUpperCase" => Value::string(text.to_uppercase()),
        "toLowerCase" => Value::string(text.to_lowercase()),
        "toString" => Value::string(text),
        "trim" => Value::string(text.trim()),
        "charAt" => {
            let index = arg(args, 0).to_number();
            let index = if index.is_nan() { 0.0 } else { index.trunc() };
            let c = if index < 0.0 {
                None
            } else {
                text.chars().nth(index as usize)
            };
            Value::string(c.map(String::from).unwrap_or_default())
        }
        "indexOf" => {
            let needle = arg(args, 0).to_display_string();
            Value::Number(char_index_of(text, &needle).map_or(-1.0, |index| index as f64))
        }
        "includes" => Value::Boolean(text.contains(arg(args, 0).to_display_string().as_str())),
        "startsWith" => {
            Value::Boolean(text.starts_with(arg(args, 0).to_display_string().as_str()))
        }
        "endsWith" => Value::Boolean(text.ends_with(arg(args, 0).to_display_string().as_str())),
        "slice" => {
            let len = char_count(text);
            let start = relative_index(&arg(args, 0), len, 0);
            let end = relative_index(&arg(args, 1), len, len);
            Value::string(char_slice(text, start, end))
        }
        "substring" => {
            let len = char_count(text);
            let clamp = |value: Value, default: usize| match value {
                Value::Undefined => default,
                other => {
                    let n = other.to_number();
                    if n.is_nan() || n < 0.0 {
                        0
                    } else {
                        (n.trunc() as usize).min(len)
                    }
                }
            };
            let start = clamp(arg(args, 0), 0);
            let end = clamp(arg(args, 1), len);
            let (start, end) = if start > end { (end, start) } else { (start, end) };
            Value::string(char_slice(text, start, end))
        }
        "split" => {
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::Undefined) => vec![Value::string(text)],
                Some(separator) => {
                    let separator = separator.to_display_string();
                    if separator.is_empty() {
                        text.chars().map(|c| Value::string(c.to_string())).collect()
                    } else {
                        text.split(separator.as_str()).map(Value::string).collect()
                    }
                }
            };
            Value::array(parts)
        }
        "repeat" => {
            let count = arg(args, 0).to_number();
            let count = if count.is_nan() { 0.0 } else { count.trunc() };
            if count < 0.0 || count.is_infinite() {
                return Err(RuntimeError::InvalidCount {
                    count: format_number(count),
                });
            }
            if count as usize * text.len() > MAX_ARRAY_LENGTH {
                return Err(RuntimeError::InvalidCount {
                    count: format_number(count),
                });
            }
            Value::string(text.repeat(count as usize))
        }
        other => {
            return Err(RuntimeError::NotCallable {
                callee: format!("string.{other}"),
            });
        }
    };
    Ok(value)
}

fn number_method(number: f64, method: &str, args: &[Value]) -> Result<Value, RuntimeError> {
    match method {
        "toFixed" => {
            let digits = arg(args, 0).to_number();
            let digits = if digits.is_nan() { 0.0 } else { digits.trunc() };
            if !(0.0..=100.0).contains(&digits) {
                return Err(RuntimeError::InvalidCount {
                    count: format_number(digits),
                });
            }
            if !number.is_finite() {
                return Ok(Value::string(format_number(number)));
            }
            Ok(Value::string(format!("{:.*}", digits as usize, number)))
        }
        "toString" => match arg(args, 0) {
            Value::Undefined => Ok(Value::string(format_number(number))),
            radix => {
                let radix = radix.to_number() as u32;
                if !(2..=36).contains(&radix) {
                    return Err(RuntimeError::InvalidCount {
                        count: radix.to_string(),
                    });
                }
                Ok(Value::string(to_radix(number, radix)))
            }
        },
        other => Err(RuntimeError::NotCallable {
            callee: format!("number.{other}"),
        }),
    }
}

/// Integer part of `number` in base `radix`.
fn to_radix(number: f64, radix: u32) -> String {
    if !number.is_finite() || radix == 10 {
        return format_number(number);
    }
    let negative = number < 0.0;
    let mut remaining = number.abs().trunc();
    if remaining == 0.0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while remaining >= 1.0 {
        let digit = (remaining % f64::from(radix)) as u32;
        digits.push(char::from_digit(digit, radix).unwrap_or('0'));
        remaining = (remaining / f64::from(radix)).trunc();
    }
    if negative {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: Value) -> String {
        match value {
            Value::String(s) => s.to_string(),
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn parses_integers_like_parse_int() {
        assert_eq!(parse_int("42px", &Value::Undefined), 42.0);
        assert_eq!(parse_int("  -17", &Value::Undefined), -17.0);
        assert_eq!(parse_int("0x1F", &Value::Undefined), 31.0);
        assert_eq!(parse_int("101", &Value::Number(2.0)), 5.0);
        assert!(parse_int("abc", &Value::Undefined).is_nan());
    }

    #[test]
    fn parses_float_prefixes() {
        assert_eq!(parse_float("3.14abc"), 3.14);
        assert_eq!(parse_float("  -2e3x"), -2000.0);
        assert_eq!(parse_float("1e"), 1.0);
        assert!(parse_float(".").is_nan());
        assert_eq!(parse_float("-Infinity"), f64::NEG_INFINITY);
    }

    #[test]
    fn math_min_max_and_round() {
        assert_eq!(math(MathFunction::Min, &[]), f64::INFINITY);
        assert_eq!(
            math(MathFunction::Max, &[Value::Number(3.0), Value::Number(9.0)]),
            9.0
        );
        assert_eq!(math(MathFunction::Round, &[Value::Number(-2.5)]), -2.0);
        assert_eq!(math(MathFunction::Round, &[Value::Number(2.5)]), 3.0);
    }

    #[test]
    fn string_methods_work_on_characters() {
        assert_eq!(
            text(string_method("hello", "slice", &[Value::Number(-3.0)]).expect("slice")),
            "llo"
        );
        assert_eq!(
            text(
                string_method("hello", "substring", &[Value::Number(4.0), Value::Number(1.0)])
                    .expect("substring")
            ),
            "ell"
        );
        let Value::Array(parts) =
            string_method("a,b,c", "split", &[Value::string(",")]).expect("split")
        else {
            panic!("expected array");
        };
        assert_eq!(parts.borrow().len(), 3);
        assert!(string_method("x", "repeat", &[Value::Number(-1.0)]).is_err());
    }

    #[test]
    fn numbers_format_with_fixed_digits_and_radix() {
        assert_eq!(
            text(number_method(3.14159, "toFixed", &[Value::Number(2.0)]).expect("toFixed")),
            "3.14"
        );
        assert_eq!(
            text(number_method(255.0, "toString", &[Value::Number(16.0)]).expect("toString")),
            "ff"
        );
        assert_eq!(to_radix(-5.0, 2), "-101");
    }

    #[test]
    fn stringifies_json() {
        let object = Value::object(PropertyMap::from_iter([
            ("a".to_string(), Value::Number(1.0)),
            ("skip".to_string(), Value::Undefined),
            (
                "list".to_string(),
                Value::array(vec![Value::string("x\"y"), Value::Undefined]),
            ),
        ]));
        let mut path = Vec::new();
        assert_eq!(
            json_stringify(&object, &mut path).expect("serializable"),
            Some(r#"{"a":1,"list":["x\"y",null]}"#.to_string())
        );
    }

    #[test]
    fn json_rejects_cycles() {
        let array = Value::array(Vec::new());
        if let Value::Array(items) = &array {
            items.borrow_mut().push(array.clone());
        }
        let mut path = Vec::new();
        assert!(matches!(
            json_stringify(&array, &mut path),
            Err(RuntimeError::CircularJson)
        ));
    }

    #[test]
    fn relative_positions_clamp_to_bounds() {
        assert_eq!(relative_index(&Value::Number(-2.0), 5, 0), 3);
        assert_eq!(relative_index(&Value::Number(-9.0), 5, 0), 0);
        assert_eq!(relative_index(&Value::Number(9.0), 5, 0), 5);
        assert_eq!(relative_index(&Value::Undefined, 5, 5), 5);
    }

    #[test]
    fn methods_bind_only_for_known_names() {
        assert!(bound_method(&Value::array(Vec::new()), "push").is_some());
        assert!(bound_method(&Value::array(Vec::new()), "toUpperCase").is_none());
        assert!(bound_method(&Value::string("x"), "toUpperCase").is_some());
        assert!(bound_method(&Value::Null, "toString").is_none());
    }
}
