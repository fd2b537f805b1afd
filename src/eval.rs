//! Tree-walking reference evaluator.
//!
//! Walks the AST directly against an `Environment`, without compiling to
//! bytecode. This is the semantics of record — the VM is a faster backend
//! expected to agree with it on every program (spec.md §8).
//!
//! `ReturnValue` and `Error` are ordinary `Value` variants rather than Rust
//! `Result` short-circuits, because both must propagate *through* block
//! evaluation: a `return` nested inside an `if` has to unwind every
//! enclosing block up to the call boundary, and an error produced deep in an
//! expression has to surface the same way a `return` does.

use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::{Expression, InfixOp, Program, Statement};
use crate::builtins::builtins;
use crate::object::{Environment, Function, Value};
use crate::operators::{apply_infix, apply_prefix};

/// Evaluates `program` against `env`, returning the value of its last
/// statement (unwrapping a top-level `return`, if any).
pub fn evaluate_tree(
    program: &Program,
    env: Rc<RefCell<Environment>>,
    log_buffer: Rc<RefCell<Vec<String>>>,
) -> Value {
    let builtin_table = builtins(log_buffer);
    let mut result = Value::Null;
    for statement in &program.statements {
        result = eval_statement(statement, &env, &builtin_table);
        match &result {
            Value::ReturnValue(inner) => return (**inner).clone(),
            Value::Error(_) => return result,
            _ => {}
        }
    }
    result
}

fn eval_block(
    statements: &[Statement],
    env: &Rc<RefCell<Environment>>,
    builtin_table: &[crate::object::Builtin],
) -> Value {
    let mut result = Value::Null;
    for statement in statements {
        result = eval_statement(statement, env, builtin_table);
        if matches!(result, Value::ReturnValue(_) | Value::Error(_)) {
            return result;
        }
    }
    result
}

fn eval_statement(
    statement: &Statement,
    env: &Rc<RefCell<Environment>>,
    builtin_table: &[crate::object::Builtin],
) -> Value {
    match statement {
        Statement::Expression { expr, .. } => eval_expression(expr, env, builtin_table),
        Statement::Block { statements, .. } => eval_block(statements, env, builtin_table),
        Statement::Let { name, value, .. } => {
            let evaluated = eval_expression(value, env, builtin_table);
            if evaluated.is_error() {
                return evaluated;
            }
            env.borrow_mut().set(name.name.clone(), evaluated);
            Value::Null
        }
        Statement::Return { value, .. } => {
            let inner = match value {
                Some(expr) => eval_expression(expr, env, builtin_table),
                None => Value::Null,
            };
            if inner.is_error() {
                inner
            } else {
                Value::ReturnValue(Box::new(inner))
            }
        }
    }
}

fn eval_expression(
    expr: &Expression,
    env: &Rc<RefCell<Environment>>,
    builtin_table: &[crate::object::Builtin],
) -> Value {
    match expr {
        Expression::IntegerLiteral { value, .. } => Value::Integer(*value),
        Expression::StringLiteral { value, .. } => Value::string(value.clone()),
        Expression::Boolean { value, .. } => Value::Boolean(*value),
        Expression::Identifier(ident) => eval_identifier(&ident.name, env, builtin_table),
        Expression::ArrayLiteral { elements, .. } => {
            match eval_expressions(elements, env, builtin_table) {
                Ok(values) => Value::array(values),
                Err(err) => err,
            }
        }
        Expression::HashLiteral { pairs, .. } => eval_hash_literal(pairs, env, builtin_table),
        Expression::Prefix { op, right, .. } => {
            let right_value = eval_expression(right, env, builtin_table);
            if right_value.is_error() {
                return right_value;
            }
            apply_prefix(*op, &right_value).unwrap_or_else(Value::error)
        }
        Expression::Infix {
            op, left, right, ..
        } => {
            let left_value = eval_expression(left, env, builtin_table);
            if left_value.is_error() {
                return left_value;
            }
            let right_value = eval_expression(right, env, builtin_table);
            if right_value.is_error() {
                return right_value;
            }
            eval_infix(*op, &left_value, &right_value)
        }
        Expression::Index { left, index, .. } => {
            let left_value = eval_expression(left, env, builtin_table);
            if left_value.is_error() {
                return left_value;
            }
            let index_value = eval_expression(index, env, builtin_table);
            if index_value.is_error() {
                return index_value;
            }
            eval_index(&left_value, &index_value)
        }
        Expression::If {
            condition,
            consequence,
            alternative,
            ..
        } => {
            let condition_value = eval_expression(condition, env, builtin_table);
            if condition_value.is_error() {
                return condition_value;
            }
            if condition_value.is_truthy() {
                eval_statement(consequence, env, builtin_table)
            } else if let Some(alt) = alternative {
                eval_statement(alt, env, builtin_table)
            } else {
                Value::Null
            }
        }
        Expression::FunctionLiteral {
            name, params, body, ..
        } => {
            let function = Value::Function(Rc::new(Function {
                params: params.clone(),
                body: Rc::new((**body).clone()),
                env: env.clone(),
            }));
            if let Some(binding) = name {
                env.borrow_mut().set(binding.clone(), function.clone());
            }
            function
        }
        Expression::Call {
            function,
            arguments,
            ..
        } => {
            let function_value = eval_expression(function, env, builtin_table);
            if function_value.is_error() {
                return function_value;
            }
            let args = match eval_expressions(arguments, env, builtin_table) {
                Ok(values) => values,
                Err(err) => return err,
            };
            apply_function(&function_value, &args, builtin_table)
        }
    }
}

fn eval_identifier(
    name: &str,
    env: &Rc<RefCell<Environment>>,
    builtin_table: &[crate::object::Builtin],
) -> Value {
    if let Some(value) = env.borrow().get(name) {
        return value;
    }
    if let Some(builtin) = builtin_table.iter().find(|b| b.name == name) {
        return Value::Builtin(Rc::new(builtin.clone()));
    }
    Value::error(format!("identifier not found: {}", name))
}

fn eval_expressions(
    expressions: &[Expression],
    env: &Rc<RefCell<Environment>>,
    builtin_table: &[crate::object::Builtin],
) -> Result<Vec<Value>, Value> {
    let mut values = Vec::with_capacity(expressions.len());
    for expr in expressions {
        let value = eval_expression(expr, env, builtin_table);
        if value.is_error() {
            return Err(value);
        }
        values.push(value);
    }
    Ok(values)
}

fn eval_hash_literal(
    pairs: &[(Expression, Expression)],
    env: &Rc<RefCell<Environment>>,
    builtin_table: &[crate::object::Builtin],
) -> Value {
    let mut hash = crate::object::HashObject::default();
    for (key_expr, value_expr) in pairs {
        let key = eval_expression(key_expr, env, builtin_table);
        if key.is_error() {
            return key;
        }
        let value = eval_expression(value_expr, env, builtin_table);
        if value.is_error() {
            return value;
        }
        hash.insert(key, value);
    }
    Value::Hash(Rc::new(hash))
}

/// `<=`/`>=` only reach this path: the compiler rejects them, but the
/// tree-walking evaluator supports them directly (spec.md §9).
fn eval_infix(op: InfixOp, left: &Value, right: &Value) -> Value {
    apply_infix(op, left, right).unwrap_or_else(Value::error)
}

fn eval_index(left: &Value, index: &Value) -> Value {
    match left {
        Value::Array(elements) => match index {
            Value::Integer(i) => {
                if *i < 0 || *i as usize >= elements.len() {
                    Value::Null
                } else {
                    elements[*i as usize].clone()
                }
            }
            other => Value::error(format!(
                "index operator not supported for array index type {}",
                other.type_name()
            )),
        },
        Value::Hash(hash) => hash.get(index).unwrap_or(Value::Null),
        other => Value::error(format!(
            "index operator not supported: {}",
            other.type_name()
        )),
    }
}

fn apply_function(
    function: &Value,
    args: &[Value],
    builtin_table: &[crate::object::Builtin],
) -> Value {
    match function {
        Value::Function(func) => {
            if args.len() != func.params.len() {
                return Value::error(format!(
                    "wrong number of parameters, expected={}, got={}",
                    func.params.len(),
                    args.len()
                ));
            }
            let call_env = Environment::enclosed(func.env.clone());
            for (param, arg) in func.params.iter().zip(args) {
                call_env.borrow_mut().set(param.name.clone(), arg.clone());
            }
            let result = eval_statement(&func.body, &call_env, builtin_table);
            match result {
                Value::ReturnValue(inner) => *inner,
                other => other,
            }
        }
        Value::Builtin(builtin) => (builtin.func)(args),
        other => Value::error(format!("not a function: {}", other.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn run(input: &str) -> Value {
        let program = Parser::from_source(input)
            .parse_program()
            .unwrap_or_else(|errs| panic!("parse errors: {:?}", errs));
        evaluate_tree(&program, Environment::new(), Rc::new(RefCell::new(Vec::new())))
    }

    #[test]
    fn integer_arithmetic() {
        assert_eq!(run("1 + 2 * 3"), Value::Integer(7));
    }

    #[test]
    fn less_than_or_equal_and_greater_than_or_equal() {
        assert_eq!(run("1 <= 1"), Value::Boolean(true));
        assert_eq!(run("2 >= 3"), Value::Boolean(false));
    }

    #[test]
    fn closures_capture_defining_environment() {
        let source = r#"
            let newAdder = fn(a) { fn(b) { a + b } };
            let addTwo = newAdder(2);
            addTwo(3);
        "#;
        assert_eq!(run(source), Value::Integer(5));
    }

    #[test]
    fn recursive_named_function_literal() {
        let source = r#"
            let fib = fn(x) {
                if (x < 2) { x } else { fib(x - 1) + fib(x - 2) }
            };
            fib(10);
        "#;
        assert_eq!(run(source), Value::Integer(55));
    }

    #[test]
    fn return_unwinds_nested_blocks() {
        let source = r#"
            let f = fn(x) {
                if (x > 0) {
                    return 1;
                }
                return 0;
            };
            f(5);
        "#;
        assert_eq!(run(source), Value::Integer(1));
    }

    #[test]
    fn errors_propagate_through_block_evaluation() {
        let source = r#"
            if (true) {
                5 + true;
                8;
            }
        "#;
        assert!(run(source).is_error());
    }

    #[test]
    fn hash_and_array_indexing() {
        assert_eq!(run(r#"{"a": 1, "b": 2}["b"]"#), Value::Integer(2));
        assert_eq!(run("[1, 2, 3][10]"), Value::Null);
    }

    #[test]
    fn arity_mismatch_reports_expected_and_got() {
        let result = run("let f = fn(a) { a }; f();");
        assert_eq!(
            result,
            Value::error("wrong number of parameters, expected=1, got=0")
        );
    }
}
