//! Binary and comparison operators, shared by the VM and the tree-walking
//! evaluator so both backends stay semantically identical.
//!
//! Functions here return a plain `String` error message rather than
//! `crate::error::Error`, since the two callers wrap failures differently:
//! the VM as a fatal `Error::Runtime`, the evaluator as an in-language
//! `Value::Error` that keeps propagating as a value.

use std::rc::Rc;

use crate::ast::{InfixOp, PrefixOp};
use crate::object::Value;

pub fn apply_infix(op: InfixOp, left: &Value, right: &Value) -> Result<Value, String> {
    match op {
        InfixOp::Add => apply_add(left, right),
        InfixOp::Sub => numeric_binop("-", left, right, |a, b| a - b),
        InfixOp::Mul => numeric_binop("*", left, right, |a, b| a * b),
        InfixOp::Div => numeric_binop("/", left, right, |a, b| a / b),
        InfixOp::Eq => Ok(Value::Boolean(values_equal(left, right))),
        InfixOp::NotEq => Ok(Value::Boolean(!values_equal(left, right))),
        InfixOp::Gt => apply_greater_than(left, right),
        InfixOp::Lt => apply_greater_than(right, left),
        InfixOp::LtEq => apply_less_or_equal(left, right),
        InfixOp::GtEq => apply_less_or_equal(right, left),
    }
}

fn apply_add(left: &Value, right: &Value) -> Result<Value, String> {
    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(a + b)),
        (Value::String(a), Value::String(b)) => Ok(Value::string(format!("{}{}", a, b))),
        _ => Err(unsupported_types("+", left, right)),
    }
}

fn numeric_binop(
    symbol: &str,
    left: &Value,
    right: &Value,
    f: impl Fn(i64, i64) -> i64,
) -> Result<Value, String> {
    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(f(*a, *b))),
        _ => Err(unsupported_types(symbol, left, right)),
    }
}

fn apply_greater_than(left: &Value, right: &Value) -> Result<Value, String> {
    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => Ok(Value::Boolean(a > b)),
        _ => Err(unsupported_types(">", left, right)),
    }
}

/// `<=`/`>=` are evaluator-only (spec.md §3.4, §9) — the compiler rejects
/// them before they reach bytecode, but the tree-walking evaluator calls
/// this directly.
fn apply_less_or_equal(left: &Value, right: &Value) -> Result<Value, String> {
    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => Ok(Value::Boolean(a <= b)),
        _ => Err(unsupported_types("<=", left, right)),
    }
}

fn unsupported_types(symbol: &str, left: &Value, right: &Value) -> String {
    format!(
        "unsupported types for binary operation: {} {} {}",
        left.type_name(),
        symbol,
        right.type_name()
    )
}

pub fn apply_prefix(op: PrefixOp, right: &Value) -> Result<Value, String> {
    match op {
        PrefixOp::Bang => Ok(Value::Boolean(!right.is_truthy())),
        PrefixOp::Minus => match right {
            Value::Integer(i) => Ok(Value::Integer(-i)),
            other => Err(format!("unknown operator: -{}", other.type_name())),
        },
    }
}

/// Equal/NotEqual: Integer compares numerically; every other type compares
/// by identity (reusing the `True`/`False`/`Null` singletons means this is
/// exact for booleans and null; distinct strings/arrays/closures compare
/// unequal even with identical content, matching the reference language's
/// pointer-comparison semantics).
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => a == b,
        (Value::Boolean(a), Value::Boolean(b)) => a == b,
        (Value::Null, Value::Null) => true,
        (Value::String(a), Value::String(b)) => Rc::ptr_eq(a, b),
        (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
        (Value::Hash(a), Value::Hash(b)) => Rc::ptr_eq(a, b),
        (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
        (Value::CompiledFunction(a), Value::CompiledFunction(b)) => Rc::ptr_eq(a, b),
        (Value::Builtin(a), Value::Builtin(b)) => Rc::ptr_eq(a, b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_supports_integer_and_string() {
        assert_eq!(
            apply_infix(InfixOp::Add, &Value::Integer(1), &Value::Integer(2)),
            Ok(Value::Integer(3))
        );
        assert_eq!(
            apply_infix(InfixOp::Add, &Value::string("mon"), &Value::string("key")),
            Ok(Value::string("monkey"))
        );
    }

    #[test]
    fn add_rejects_string_plus_integer() {
        let err = apply_infix(InfixOp::Add, &Value::string("a"), &Value::Integer(1)).unwrap_err();
        assert!(err.contains("unsupported types"));
    }

    #[test]
    fn lt_desugars_to_swapped_greater_than() {
        assert_eq!(
            apply_infix(InfixOp::Lt, &Value::Integer(1), &Value::Integer(2)),
            Ok(Value::Boolean(true))
        );
    }

    #[test]
    fn equality_is_numeric_for_integers_and_identity_otherwise() {
        assert!(values_equal(&Value::Integer(5), &Value::Integer(5)));
        assert!(values_equal(&Value::Null, &Value::Null));
        assert!(!values_equal(&Value::string("a"), &Value::string("a")));
    }

    #[test]
    fn bang_truth_table() {
        assert_eq!(apply_prefix(PrefixOp::Bang, &Value::Boolean(true)), Ok(Value::Boolean(false)));
        assert_eq!(apply_prefix(PrefixOp::Bang, &Value::Boolean(false)), Ok(Value::Boolean(true)));
        assert_eq!(apply_prefix(PrefixOp::Bang, &Value::Null), Ok(Value::Boolean(true)));
        assert_eq!(apply_prefix(PrefixOp::Bang, &Value::Integer(5)), Ok(Value::Boolean(false)));
    }
}
