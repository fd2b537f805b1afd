//! Runtime value model: a closed sum of variants shared by the VM and the
//! tree-walking evaluator.
//!
//! `CompiledFunction`/`Closure`/`Array`/`Hash` wrap their payloads in `Rc` so
//! that a closure's instructions (itself reachable from the constant pool
//! and potentially from other closures) are shared rather than copied —
//! there is no garbage collector here beyond the host's own reclamation.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::ast::Identifier;
use crate::ast::Statement;
use crate::code::Instructions;

/// A freshly compiled function body: its instructions plus the frame shape
/// the VM needs to set up a call (`num_locals` includes parameters).
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    pub instructions: Instructions,
    pub num_locals: usize,
    pub num_parameters: usize,
}

/// A compiled function paired with its captured free-variable values, in
/// the order the compiler resolved them.
#[derive(Debug, Clone, PartialEq)]
pub struct Closure {
    pub func: Rc<CompiledFunction>,
    pub free: Vec<Value>,
}

pub type BuiltinFn = Rc<dyn Fn(&[Value]) -> Value>;

/// A built-in function: its index defines the operand `GetBuiltin` uses to
/// find it. The function is a shared closure (rather than a bare fn
/// pointer) so that `log` can close over the embedding host's log buffer.
#[derive(Clone)]
pub struct Builtin {
    pub name: &'static str,
    pub index: usize,
    pub func: BuiltinFn,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Builtin({})", self.name)
    }
}

impl PartialEq for Builtin {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// Lexical environment used only by the tree-walking evaluator; chained
/// through `outer` so a closure's environment resolves free names in its
/// defining scope.
#[derive(Debug, Default)]
pub struct Environment {
    pub store: HashMap<String, Value>,
    pub outer: Option<Rc<RefCell<Environment>>>,
}

impl Environment {
    pub fn new() -> Rc<RefCell<Environment>> {
        Rc::new(RefCell::new(Environment::default()))
    }

    pub fn enclosed(outer: Rc<RefCell<Environment>>) -> Rc<RefCell<Environment>> {
        Rc::new(RefCell::new(Environment {
            store: HashMap::new(),
            outer: Some(outer),
        }))
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.store.get(name) {
            return Some(value.clone());
        }
        self.outer.as_ref().and_then(|outer| outer.borrow().get(name))
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.store.insert(name.into(), value);
    }
}

/// A function literal closed over its defining environment, used only by
/// `eval::evaluate_tree` (the bytecode path uses `Closure` instead).
#[derive(Debug, Clone)]
pub struct Function {
    pub params: Vec<Identifier>,
    pub body: Rc<Statement>,
    pub env: Rc<RefCell<Environment>>,
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.body, &other.body) && Rc::ptr_eq(&self.env, &other.env)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum HashKeyTag {
    Integer,
    Boolean,
    String,
}

/// The `{type_tag, 64-bit value}` key a hashable runtime value reduces to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashKey {
    tag: HashKeyTag,
    value: u64,
}

/// Computes the FNV-1a 64-bit hash of `bytes`.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// A runtime hash map: hashable keys (Integer/Boolean/String) resolve
/// straight to a `HashKey`; everything else is matched by its inspect
/// string in a side list, per the data model's non-hashable-key carve-out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HashObject {
    pub hashable: Vec<(HashKey, Value, Value)>,
    pub non_hashable: Vec<(String, Value, Value)>,
}

impl HashObject {
    pub fn get(&self, index: &Value) -> Option<Value> {
        if let Some(key) = hash_key(index) {
            self.hashable
                .iter()
                .find(|(k, _, _)| *k == key)
                .map(|(_, _, v)| v.clone())
        } else {
            let probe = index.inspect();
            self.non_hashable
                .iter()
                .find(|(k, _, _)| *k == probe)
                .map(|(_, _, v)| v.clone())
        }
    }

    pub fn insert(&mut self, key: Value, value: Value) {
        if let Some(hk) = hash_key(&key) {
            if let Some(slot) = self.hashable.iter_mut().find(|(k, _, _)| *k == hk) {
                slot.1 = key;
                slot.2 = value;
            } else {
                self.hashable.push((hk, key, value));
            }
        } else {
            let probe = key.inspect();
            if let Some(slot) = self.non_hashable.iter_mut().find(|(k, _, _)| *k == probe) {
                slot.1 = key;
                slot.2 = value;
            } else {
                self.non_hashable.push((probe, key, value));
            }
        }
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        if let Some(hk) = hash_key(key) {
            if let Some(pos) = self.hashable.iter().position(|(k, _, _)| *k == hk) {
                return Some(self.hashable.remove(pos).2);
            }
            None
        } else {
            let probe = key.inspect();
            if let Some(pos) = self.non_hashable.iter().position(|(k, _, _)| *k == probe) {
                return Some(self.non_hashable.remove(pos).2);
            }
            None
        }
    }

    pub fn keys(&self) -> Vec<Value> {
        let mut out: Vec<Value> = self.hashable.iter().map(|(_, k, _)| k.clone()).collect();
        out.extend(self.non_hashable.iter().map(|(_, k, _)| k.clone()));
        out
    }

    pub fn len(&self) -> usize {
        self.hashable.len() + self.non_hashable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Returns the `HashKey` for `value`, or `None` if `value` is not hashable
/// (only Integer, Boolean, and String are).
pub fn hash_key(value: &Value) -> Option<HashKey> {
    match value {
        Value::Integer(i) => Some(HashKey {
            tag: HashKeyTag::Integer,
            value: *i as u64,
        }),
        Value::Boolean(b) => Some(HashKey {
            tag: HashKeyTag::Boolean,
            value: if *b { 1 } else { 0 },
        }),
        Value::String(s) => Some(HashKey {
            tag: HashKeyTag::String,
            value: fnv1a(s.as_bytes()),
        }),
        _ => None,
    }
}

/// The closed set of runtime values. `ReturnValue` and `Error` are ordinary
/// variants, not `Result`-style wrappers, because both must propagate
/// *through* block evaluation as values (see `eval::eval_block`).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Boolean(bool),
    Null,
    String(Rc<String>),
    Array(Rc<Vec<Value>>),
    Hash(Rc<HashObject>),
    CompiledFunction(Rc<CompiledFunction>),
    Closure(Rc<Closure>),
    Builtin(Rc<Builtin>),
    Function(Rc<Function>),
    ReturnValue(Box<Value>),
    Error(String),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Value {
        Value::String(Rc::new(s.into()))
    }

    pub fn array(elements: Vec<Value>) -> Value {
        Value::Array(Rc::new(elements))
    }

    pub fn error(message: impl Into<String>) -> Value {
        Value::Error(message.into())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "INTEGER",
            Value::Boolean(_) => "BOOLEAN",
            Value::Null => "NULL",
            Value::String(_) => "STRING",
            Value::Array(_) => "ARRAY",
            Value::Hash(_) => "HASH",
            Value::CompiledFunction(_) => "COMPILED_FUNCTION_OBJ",
            Value::Closure(_) => "CLOSURE",
            Value::Builtin(_) => "BUILTIN",
            Value::Function(_) => "FUNCTION",
            Value::ReturnValue(_) => "RETURN_VALUE",
            Value::Error(_) => "ERROR",
        }
    }

    /// Every value other than `False` and `Null` is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Boolean(false) | Value::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn is_hashable(&self) -> bool {
        hash_key(self).is_some()
    }

    /// Inspect form used by error messages, `log`, and as the fallback key
    /// for non-hashable hash keys.
    pub fn inspect(&self) -> String {
        format!("{}", self)
    }
}

#[cfg(feature = "serde")]
mod value_serde {
    use super::*;
    use serde::de::{self, Deserializer, MapAccess, Visitor};
    use serde::ser::{SerializeMap, Serializer};
    use serde::{Deserialize, Serialize};

    /// Wire form for values crossing a process boundary (e.g. the HTTP
    /// endpoint host shells build on top of `Machine`). Only data values
    /// round-trip; closures/compiled functions have no meaningful wire
    /// representation and serialize as their `type_name()` tag with no
    /// payload.
    impl Serialize for Value {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match self {
                Value::Integer(i) => serializer.serialize_i64(*i),
                Value::Boolean(b) => serializer.serialize_bool(*b),
                Value::Null => serializer.serialize_unit(),
                Value::String(s) => serializer.serialize_str(s),
                Value::Array(elements) => elements.serialize(serializer),
                Value::Hash(hash) => {
                    let mut map = serializer.serialize_map(Some(hash.len()))?;
                    for (_, k, v) in &hash.hashable {
                        map.serialize_entry(&k.inspect(), v)?;
                    }
                    for (_, k, v) in &hash.non_hashable {
                        map.serialize_entry(&k.inspect(), v)?;
                    }
                    map.end()
                }
                Value::Error(message) => {
                    let mut map = serializer.serialize_map(Some(2))?;
                    map.serialize_entry("type", "ERROR")?;
                    map.serialize_entry("message", message)?;
                    map.end()
                }
                Value::ReturnValue(inner) => inner.serialize(serializer),
                Value::CompiledFunction(_)
                | Value::Closure(_)
                | Value::Builtin(_)
                | Value::Function(_) => {
                    let mut map = serializer.serialize_map(Some(1))?;
                    map.serialize_entry("type", self.type_name())?;
                    map.end()
                }
            }
        }
    }

    struct ValueVisitor;

    impl<'de> Visitor<'de> for ValueVisitor {
        type Value = Value;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a JSON value representing an xlang runtime value")
        }

        fn visit_bool<E>(self, v: bool) -> Result<Value, E> {
            Ok(Value::Boolean(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Value, E> {
            Ok(Value::Integer(v))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Value, E> {
            Ok(Value::Integer(v as i64))
        }

        fn visit_str<E>(self, v: &str) -> Result<Value, E> {
            Ok(Value::string(v))
        }

        fn visit_unit<E>(self) -> Result<Value, E> {
            Ok(Value::Null)
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut elements = Vec::new();
            while let Some(element) = seq.next_element()? {
                elements.push(element);
            }
            Ok(Value::array(elements))
        }

        fn visit_map<A>(self, mut access: A) -> Result<Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut hash = HashObject::default();
            while let Some((key, value)) = access.next_entry::<String, Value>()? {
                hash.insert(Value::string(key), value);
            }
            Ok(Value::Hash(Rc::new(hash)))
        }
    }

    impl<'de> Deserialize<'de> for Value {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            deserializer.deserialize_any(ValueVisitor)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::super::*;

        #[test]
        fn integer_round_trips_through_json() {
            let value = Value::Integer(42);
            let json = serde_json::to_string(&value).unwrap();
            assert_eq!(json, "42");
            let back: Value = serde_json::from_str(&json).unwrap();
            assert_eq!(back, Value::Integer(42));
        }

        #[test]
        fn array_and_hash_round_trip_through_json() {
            let array = Value::array(vec![Value::Integer(1), Value::string("two")]);
            let json = serde_json::to_string(&array).unwrap();
            let back: Value = serde_json::from_str(&json).unwrap();
            assert_eq!(back, array);

            let mut hash = HashObject::default();
            hash.insert(Value::string("name"), Value::string("monkey"));
            let value = Value::Hash(Rc::new(hash));
            let json = serde_json::to_string(&value).unwrap();
            assert_eq!(json, r#"{"name":"monkey"}"#);
        }

        #[test]
        fn closures_serialize_as_a_type_tag() {
            let func = Rc::new(CompiledFunction {
                instructions: vec![],
                num_locals: 0,
                num_parameters: 0,
            });
            let value = Value::CompiledFunction(func);
            let json = serde_json::to_string(&value).unwrap();
            assert_eq!(json, r#"{"type":"COMPILED_FUNCTION_OBJ"}"#);
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{}", i),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Null => write!(f, "null"),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(elements) => {
                write!(f, "[")?;
                for (i, el) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", el)?;
                }
                write!(f, "]")
            }
            Value::Hash(hash) => {
                write!(f, "{{")?;
                let mut first = true;
                for (_, k, v) in &hash.hashable {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    write!(f, "{}: {}", k, v)?;
                }
                for (_, k, v) in &hash.non_hashable {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::CompiledFunction(cf) => write!(f, "CompiledFunction[{:p}]", Rc::as_ptr(cf)),
            Value::Closure(c) => write!(f, "Closure[{:p}]", Rc::as_ptr(c)),
            Value::Builtin(b) => write!(f, "builtin function {}", b.name),
            Value::Function(func) => {
                write!(f, "fn(")?;
                for (i, p) in func.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p.name)?;
                }
                write!(f, ") {{ ... }}")
            }
            Value::ReturnValue(inner) => write!(f, "{}", inner),
            Value::Error(message) => write!(f, "ERROR: {}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_matches_spec() {
        assert!(!Value::Boolean(false).is_truthy());
        assert!(!Value::Null.is_truthy());
        assert!(Value::Integer(0).is_truthy());
        assert!(Value::string("").is_truthy());
        assert!(Value::Boolean(true).is_truthy());
    }

    #[test]
    fn only_integer_boolean_string_are_hashable() {
        assert!(Value::Integer(1).is_hashable());
        assert!(Value::Boolean(true).is_hashable());
        assert!(Value::string("x").is_hashable());
        assert!(!Value::array(vec![]).is_hashable());
        assert!(!Value::Null.is_hashable());
    }

    #[test]
    fn hash_keys_are_componentwise_equal() {
        assert_eq!(hash_key(&Value::Integer(5)), hash_key(&Value::Integer(5)));
        assert_ne!(hash_key(&Value::Integer(5)), hash_key(&Value::Integer(6)));
        assert_eq!(
            hash_key(&Value::string("name")),
            hash_key(&Value::string("name"))
        );
        assert_ne!(hash_key(&Value::Boolean(true)), hash_key(&Value::Integer(1)));
    }

    #[test]
    fn hash_object_insert_get_remove_round_trip() {
        let mut hash = HashObject::default();
        hash.insert(Value::string("a"), Value::Integer(1));
        hash.insert(Value::string("b"), Value::Integer(2));
        assert_eq!(hash.get(&Value::string("a")), Some(Value::Integer(1)));
        assert_eq!(hash.remove(&Value::string("a")), Some(Value::Integer(1)));
        assert_eq!(hash.get(&Value::string("a")), None);
        assert_eq!(hash.len(), 1);
    }
}
