//! The fixed, ordered table of built-in functions. Order defines the
//! `GetBuiltin` index each one is addressed by, so `builtins()` must keep
//! this exact sequence: `len, push, pop, shift, unshift, first, last, set,
//! keys, delete, log`.

use std::cell::RefCell;
use std::rc::Rc;

use crate::object::{Builtin, Value};

/// Names in `GetBuiltin` index order. The compiler pre-populates the symbol
/// table with these at construction (spec.md §4.5); `builtins()` below must
/// produce its table in the same order.
pub const BUILTIN_NAMES: &[&str] = &[
    "len", "push", "pop", "shift", "unshift", "first", "last", "set", "keys", "delete", "log",
];

fn arity_error(name: &str, want: &str, got: usize) -> Value {
    Value::error(format!(
        "wrong number of arguments to `{}`: want {}, got {}",
        name, want, got
    ))
}

fn type_error(name: &str, got: &Value) -> Value {
    Value::error(format!(
        "argument to `{}` not supported, got {}",
        name,
        got.type_name()
    ))
}

fn builtin_len(args: &[Value]) -> Value {
    if args.len() != 1 {
        return arity_error("len", "1", args.len());
    }
    match &args[0] {
        Value::String(s) => Value::Integer(s.chars().count() as i64),
        Value::Array(elements) => Value::Integer(elements.len() as i64),
        other => type_error("len", other),
    }
}

fn builtin_push(args: &[Value]) -> Value {
    match args.split_first() {
        Some((Value::Array(elements), rest)) => {
            let mut new_elements = (**elements).clone();
            new_elements.extend_from_slice(rest);
            Value::array(new_elements)
        }
        Some((other, _)) => type_error("push", other),
        None => arity_error("push", "at least 1", 0),
    }
}

fn builtin_pop(args: &[Value]) -> Value {
    if args.len() != 1 {
        return arity_error("pop", "1", args.len());
    }
    match &args[0] {
        Value::Array(elements) => {
            let mut new_elements = (**elements).clone();
            new_elements.pop();
            Value::array(new_elements)
        }
        other => type_error("pop", other),
    }
}

fn builtin_shift(args: &[Value]) -> Value {
    if args.len() != 1 {
        return arity_error("shift", "1", args.len());
    }
    match &args[0] {
        Value::Array(elements) => {
            if elements.is_empty() {
                Value::Null
            } else {
                Value::array(elements[1..].to_vec())
            }
        }
        other => type_error("shift", other),
    }
}

fn builtin_unshift(args: &[Value]) -> Value {
    match args.split_first() {
        Some((Value::Array(elements), rest)) => {
            let mut new_elements = rest.to_vec();
            new_elements.extend_from_slice(elements);
            Value::array(new_elements)
        }
        Some((other, _)) => type_error("unshift", other),
        None => arity_error("unshift", "at least 1", 0),
    }
}

fn builtin_first(args: &[Value]) -> Value {
    if args.len() != 1 {
        return arity_error("first", "1", args.len());
    }
    match &args[0] {
        Value::Array(elements) => elements.first().cloned().unwrap_or(Value::Null),
        other => type_error("first", other),
    }
}

fn builtin_last(args: &[Value]) -> Value {
    if args.len() != 1 {
        return arity_error("last", "1", args.len());
    }
    match &args[0] {
        Value::Array(elements) => elements.last().cloned().unwrap_or(Value::Null),
        other => type_error("last", other),
    }
}

fn builtin_set(args: &[Value]) -> Value {
    if args.len() != 3 {
        return arity_error("set", "3", args.len());
    }
    match &args[0] {
        Value::Array(elements) => {
            let Value::Integer(index) = args[1] else {
                return type_error("set", &args[1]);
            };
            if index < 0 || index as usize >= elements.len() {
                return Value::error(format!("index out of bounds: {}", index));
            }
            let mut new_elements = (**elements).clone();
            new_elements[index as usize] = args[2].clone();
            Value::array(new_elements)
        }
        Value::Hash(hash) => {
            let mut new_hash = (**hash).clone();
            new_hash.insert(args[1].clone(), args[2].clone());
            Value::Hash(Rc::new(new_hash))
        }
        other => type_error("set", other),
    }
}

fn builtin_keys(args: &[Value]) -> Value {
    if args.len() != 1 {
        return arity_error("keys", "1", args.len());
    }
    match &args[0] {
        Value::Hash(hash) => Value::array(hash.keys()),
        other => type_error("keys", other),
    }
}

fn builtin_delete(args: &[Value]) -> Value {
    if args.len() != 2 {
        return arity_error("delete", "2", args.len());
    }
    match &args[0] {
        Value::Hash(hash) => {
            let mut new_hash = (**hash).clone();
            new_hash.remove(&args[1]).unwrap_or(Value::Null)
        }
        other => type_error("delete", other),
    }
}

fn builtin_log(log: Rc<RefCell<Vec<String>>>) -> impl Fn(&[Value]) -> Value {
    move |args: &[Value]| {
        let line = args
            .iter()
            .map(|v| v.inspect())
            .collect::<Vec<_>>()
            .join(" ");
        log.borrow_mut().push(line);
        Value::Null
    }
}

/// Builds the fixed built-in table. `log` writes into `log_buffer`, a
/// handle the embedding host keeps to drain recorded log lines.
pub fn builtins(log_buffer: Rc<RefCell<Vec<String>>>) -> Vec<Builtin> {
    let table: Vec<(&'static str, Rc<dyn Fn(&[Value]) -> Value>)> = vec![
        ("len", Rc::new(builtin_len)),
        ("push", Rc::new(builtin_push)),
        ("pop", Rc::new(builtin_pop)),
        ("shift", Rc::new(builtin_shift)),
        ("unshift", Rc::new(builtin_unshift)),
        ("first", Rc::new(builtin_first)),
        ("last", Rc::new(builtin_last)),
        ("set", Rc::new(builtin_set)),
        ("keys", Rc::new(builtin_keys)),
        ("delete", Rc::new(builtin_delete)),
        ("log", Rc::new(builtin_log(log_buffer))),
    ];
    table
        .into_iter()
        .enumerate()
        .map(|(index, (name, func))| Builtin { name, index, func })
        .collect()
}
