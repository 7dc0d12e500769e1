use std::cmp::Ordering;
use std::rc::Rc;

use crate::ast::BinaryOperator;

use super::value::Value;

pub(super) fn binary(op: BinaryOperator, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOperator::Add => add(left, right),
        BinaryOperator::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOperator::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOperator::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOperator::Rem => Value::Number(remainder(left.to_number(), right.to_number())),
        BinaryOperator::Pow => Value::Number(power(left.to_number(), right.to_number())),
        BinaryOperator::Equal => Value::Boolean(loose_equals(left, right)),
        BinaryOperator::NotEqual => Value::Boolean(!loose_equals(left, right)),
        BinaryOperator::StrictEqual => Value::Boolean(strict_equals(left, right)),
        BinaryOperator::StrictNotEqual => Value::Boolean(!strict_equals(left, right)),
        BinaryOperator::LessThan => {
            Value::Boolean(matches!(compare(left, right), Some(Ordering::Less)))
        }
        BinaryOperator::LessEqual => Value::Boolean(matches!(
            compare(left, right),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOperator::GreaterThan => {
            Value::Boolean(matches!(compare(left, right), Some(Ordering::Greater)))
        }
        BinaryOperator::GreaterEqual => Value::Boolean(matches!(
            compare(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        )),
    }
}

/// Containers take part in `+` through their string form.
fn is_stringy(value: &Value) -> bool {
    matches!(
        value,
        Value::String(_)
            | Value::Array(_)
            | Value::Object(_)
            | Value::Function(_)
            | Value::Builtin(_)
            | Value::BoundMethod { .. }
    )
}

fn add(left: &Value, right: &Value) -> Value {
    if is_stringy(left) || is_stringy(right) {
        let mut text = left.to_display_string();
        text.push_str(&right.to_display_string());
        Value::string(text)
    } else {
        Value::Number(left.to_number() + right.to_number())
    }
}

/// Truncating remainder; the sign follows the dividend.
fn remainder(left: f64, right: f64) -> f64 {
    if right == 0.0 || left.is_infinite() || left.is_nan() || right.is_nan() {
        return f64::NAN;
    }
    if right.is_infinite() {
        return left;
    }
    left % right
}

fn power(base: f64, exponent: f64) -> f64 {
    if exponent.is_nan() || (base.abs() == 1.0 && exponent.is_infinite()) {
        return f64::NAN;
    }
    base.powf(exponent)
}

/// Relational ordering; `None` when either side is NaN.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    if let (Value::String(left), Value::String(right)) = (left, right) {
        return Some(left.cmp(right));
    }
    left.to_number().partial_cmp(&right.to_number())
}

pub(super) fn strict_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Boolean(left), Value::Boolean(right)) => left == right,
        (Value::Number(left), Value::Number(right)) => left == right,
        (Value::String(left), Value::String(right)) => left == right,
        _ => same_reference(left, right),
    }
}

/// Equality used by `includes`: like `===` but NaN equals NaN.
pub(super) fn same_value_zero(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(left), Value::Number(right)) if left.is_nan() && right.is_nan() => true,
        _ => strict_equals(left, right),
    }
}

pub(super) fn loose_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
        (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
        (Value::Number(_), Value::Number(_))
        | (Value::String(_), Value::String(_))
        | (Value::Boolean(_), Value::Boolean(_)) => strict_equals(left, right),
        (
            Value::Number(_) | Value::String(_) | Value::Boolean(_),
            Value::Number(_) | Value::String(_) | Value::Boolean(_),
        ) => left.to_number() == right.to_number(),
        (
            Value::Array(_) | Value::Object(_),
            Value::Number(_) | Value::String(_) | Value::Boolean(_),
        ) => loose_equals(&Value::string(left.to_display_string()), right),
        (
            Value::Number(_) | Value::String(_) | Value::Boolean(_),
            Value::Array(_) | Value::Object(_),
        ) => loose_equals(left, &Value::string(right.to_display_string())),
        _ => same_reference(left, right),
    }
}

fn same_reference(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Array(left), Value::Array(right)) => Rc::ptr_eq(left, right),
        (Value::Object(left), Value::Object(right)) => Rc::ptr_eq(left, right),
        (Value::Function(left), Value::Function(right)) => Rc::ptr_eq(left, right),
        (Value::Builtin(left), Value::Builtin(right)) => left == right,
        _ => false,
    }
}
