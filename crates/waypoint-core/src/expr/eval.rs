use std::borrow::Cow;
use std::cmp::Ordering;

use serde_json::{Number, Value};

use super::parser::{CmpOp, Expr, Operand, Path};
use crate::types::SharedState;

pub fn evaluate(expr: &Expr, state: &SharedState) -> bool {
    match expr {
        Expr::Or(terms) => terms.iter().any(|t| evaluate(t, state)),
        Expr::And(terms) => terms.iter().all(|t| evaluate(t, state)),
        Expr::Not(inner) => !evaluate(inner, state),
        Expr::Compare { first, rest } => {
            let mut left = operand_value(first, state);
            for (op, right) in rest {
                let right = operand_value(right, state);
                if !compare(*op, &left, &right) {
                    return false;
                }
                left = right;
            }
            true
        }
        Expr::IsNone { operand, negated } => {
            let is_none = operand_value(operand, state).is_null();
            is_none != *negated
        }
        Expr::Operand(operand) => truthy(&operand_value(operand, state)),
    }
}

/// The value an expression produces when used as an operand. A bare operand
/// keeps its own value; boolean-shaped nodes yield `true` or `false`.
pub fn value<'a>(expr: &'a Expr, state: &'a SharedState) -> Cow<'a, Value> {
    match expr {
        Expr::Operand(operand) => operand_value(operand, state),
        other => Cow::Owned(Value::Bool(evaluate(other, state))),
    }
}

fn operand_value<'a>(operand: &'a Operand, state: &'a SharedState) -> Cow<'a, Value> {
    match operand {
        Operand::Literal(value) => Cow::Borrowed(value),
        Operand::Path(path) => resolve(path, state),
        Operand::Group(inner) => value(inner, state),
    }
}

/// Walk a dotted path. Missing keys and non-object intermediates resolve to `null`.
pub fn resolve<'a>(path: &Path, state: &'a SharedState) -> Cow<'a, Value> {
    let namespace = state.namespace(path.root);
    let Some((first, rest)) = path.segments.split_first() else {
        return Cow::Owned(Value::Object(namespace.clone()));
    };

    let mut current = match namespace.get(first) {
        Some(value) => value,
        None => return Cow::Owned(Value::Null),
    };
    for segment in rest {
        current = match current {
            Value::Object(map) => match map.get(segment) {
                Some(value) => value,
                None => return Cow::Owned(Value::Null),
            },
            _ => return Cow::Owned(Value::Null),
        };
    }
    Cow::Borrowed(current)
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> bool {
    match op {
        CmpOp::Eq => values_equal(left, right),
        CmpOp::Ne => !values_equal(left, right),
        CmpOp::Lt => matches!(order(left, right), Some(Ordering::Less)),
        CmpOp::Le => matches!(order(left, right), Some(Ordering::Less | Ordering::Equal)),
        CmpOp::Gt => matches!(order(left, right), Some(Ordering::Greater)),
        CmpOp::Ge => matches!(order(left, right), Some(Ordering::Greater | Ordering::Equal)),
    }
}

/// Structural equality where integers and floats compare by numeric value.
/// Booleans count as `0` and `1` against numbers.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_) | Value::Bool(_), Value::Number(_))
        | (Value::Number(_), Value::Bool(_)) => {
            matches!(numeric_order(left, right), Some(Ordering::Equal))
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => left == right,
    }
}

fn as_number(value: &Value) -> Option<Number> {
    match value {
        Value::Number(n) => Some(n.clone()),
        Value::Bool(b) => Some(Number::from(u8::from(*b))),
        _ => None,
    }
}

fn numeric_order(left: &Value, right: &Value) -> Option<Ordering> {
    let (a, b) = (as_number(left)?, as_number(right)?);
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Some(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return Some(x.cmp(&y));
    }
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

/// Ordering between comparable values. `None` for mismatched or unordered types.
fn order(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Number(_) | Value::Bool(_), Value::Number(_) | Value::Bool(_)) => {
            numeric_order(left, right)
        }
        _ => None,
    }
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
