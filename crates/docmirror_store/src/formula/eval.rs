//! Formula evaluation.
//!
//! Evaluation is total: type mismatches make comparisons false instead of
//! failing, so a compiled formula can be run over any document.

use super::{CompareOp, Expr, Function};
use docmirror_core::{Fields, Value};
use std::cmp::Ordering;

pub(crate) fn eval(expr: &Expr, fields: &Fields) -> Value {
    match expr {
        Expr::Literal(value) => value.clone(),
        Expr::Field(name) => fields.get(name).cloned().unwrap_or(Value::Null),
        Expr::All => Value::Bool(true),
        Expr::Not(inner) => Value::Bool(!truthy(&eval(inner, fields))),
        Expr::And(left, right) => {
            Value::Bool(truthy(&eval(left, fields)) && truthy(&eval(right, fields)))
        }
        Expr::Or(left, right) => {
            Value::Bool(truthy(&eval(left, fields)) || truthy(&eval(right, fields)))
        }
        Expr::Compare(op, left, right) => {
            let left = eval(left, fields);
            let right = eval(right, fields);
            Value::Bool(compare(*op, &left, &right))
        }
        Expr::List(items) => {
            let mut flat = Vec::with_capacity(items.len());
            for item in items {
                flat.extend(eval(item, fields).scalars().cloned());
            }
            Value::List(flat)
        }
        Expr::Call(function, args) => call(*function, args, fields),
    }
}

pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => *n != 0.0,
        Value::Text(s) => !s.is_empty(),
        Value::List(items) => items.iter().any(truthy),
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> bool {
    if op == CompareOp::Ne {
        return !compare(CompareOp::Eq, left, right);
    }
    left.scalars().any(|l| {
        right
            .scalars()
            .any(|r| scalar_ordering(l, r).is_some_and(|o| op.holds(o)))
    })
}

fn scalar_ordering(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.partial_cmp(r),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        _ => match (text_of(left), text_of(right)) {
            (Some(l), Some(r)) => Some(l.cmp(r)),
            _ => None,
        },
    }
}

/// Text view of a scalar; the empty value reads as `""`.
fn text_of(value: &Value) -> Option<&str> {
    match value {
        Value::Text(s) => Some(s),
        Value::Null => Some(""),
        _ => None,
    }
}

fn call(function: Function, args: &[Expr], fields: &Fields) -> Value {
    match function {
        Function::IsAvailable => match args.first() {
            Some(Expr::Field(name)) => Value::Bool(fields.contains_key(name)),
            _ => Value::Bool(false),
        },
        Function::StartsWith | Function::EndsWith | Function::Contains => {
            let (Some(haystack), Some(needle)) = (args.first(), args.get(1)) else {
                return Value::Bool(false);
            };
            let haystack = eval(haystack, fields);
            let needle = eval(needle, fields);
            let hit = haystack.scalars().filter_map(text_of).any(|h| {
                needle.scalars().filter_map(text_of).any(|n| match function {
                    Function::StartsWith => h.starts_with(n),
                    Function::EndsWith => h.ends_with(n),
                    _ => h.contains(n),
                })
            });
            Value::Bool(hit)
        }
        Function::Lowercase | Function::Uppercase => {
            let Some(arg) = args.first() else {
                return Value::Null;
            };
            map_scalars(eval(arg, fields), |v| match v {
                Value::Text(s) if function == Function::Lowercase => Value::Text(s.to_lowercase()),
                Value::Text(s) => Value::Text(s.to_uppercase()),
                other => other,
            })
        }
        Function::Length => {
            let Some(arg) = args.first() else {
                return Value::Null;
            };
            map_scalars(eval(arg, fields), |v| match v {
                Value::Text(s) => Value::Number(s.chars().count() as f64),
                Value::Null => Value::Number(0.0),
                other => Value::Number(other.to_string().chars().count() as f64),
            })
        }
    }
}

fn map_scalars(value: Value, f: impl Fn(Value) -> Value) -> Value {
    match value {
        Value::List(items) => Value::List(items.into_iter().map(f).collect()),
        scalar => f(scalar),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!truthy(&Value::Null));
        assert!(truthy(&Value::Number(1.0)));
        assert!(!truthy(&Value::Number(0.0)));
        assert!(!truthy(&Value::text("")));
        assert!(truthy(&Value::List(vec![Value::Null, Value::Bool(true)])));
    }

    #[test]
    fn mixed_types_never_compare() {
        assert!(!compare(CompareOp::Eq, &Value::Number(1.0), &Value::text("1")));
        assert!(!compare(CompareOp::Lt, &Value::Number(1.0), &Value::text("2")));
        assert!(compare(CompareOp::Ne, &Value::Number(1.0), &Value::text("1")));
    }

    #[test]
    fn null_equals_empty_text() {
        assert!(compare(CompareOp::Eq, &Value::Null, &Value::text("")));
        assert!(!compare(CompareOp::Eq, &Value::Null, &Value::Number(0.0)));
    }
}
