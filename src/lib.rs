//! xlang - a small embeddable dynamically-typed scripting language.
//!
//! xlang provides a lexer, a Pratt parser, a tree-walking reference
//! evaluator, and a bytecode compiler + stack-based VM for a C-like
//! scripting language with closures, first-class functions, arrays, and
//! hashes.
//!
//! # Features
//!
//! - **Two backends, one semantics**: the bytecode VM is the fast path; the
//!   tree-walking evaluator is the reference semantics both are expected to
//!   agree with.
//! - **Closures and recursion**: nested function literals capture free
//!   variables; direct recursive calls resolve through `CurrentClosure`
//!   without a name lookup.
//! - **REPL-style reuse**: a [`Machine`] keeps its globals, symbol table,
//!   and bindings alive across successive calls.
//! - **Resource limits**: an optional instruction-count ceiling guards
//!   against runaway programs.
//!
//! # Quick Start
//!
//! ```
//! use xlang::Machine;
//!
//! let mut machine = Machine::new();
//! let result = machine.run(r#"
//! let fib = fn(x) {
//!     if (x < 2) { x } else { fib(x - 1) + fib(x - 2) }
//! };
//! fib(10);
//! "#).unwrap();
//! assert_eq!(result.to_string(), "55");
//! ```
//!
//! # Language
//!
//! ## Types
//! - `Integer`, `Boolean`, `Null`, `String`, `Array`, `Hash`
//! - First-class functions (`Function` in the tree-walker, `Closure` on the
//!   VM)
//!
//! ## Operators
//! - Arithmetic: `+`, `-`, `*`, `/` (`+` also concatenates strings)
//! - Comparison: `==`, `!=`, `<`, `>`; `<=`/`>=` are supported by the
//!   tree-walking evaluator only
//! - Prefix: `!`, `-`
//!
//! ## Control flow
//! - `if`/`else` (an expression; a branch with no matching `else` yields
//!   `null`)
//! - `return`
//!
//! ## Functions
//! - `fn(params) { body }`, closures over the defining scope, direct
//!   recursion via a `let`-bound name
//!
//! ## Built-ins
//! - `len`, `push`, `pop`, `shift`, `unshift`, `first`, `last`, `set`,
//!   `keys`, `delete`, `log`
//!
//! # Not Supported
//!
//! - Classes, modules, or imports
//! - Floating point numbers
//! - Garbage collection beyond the host's own `Rc` reclamation

mod ast;
mod builtins;
mod code;
mod compiler;
mod engine;
mod error;
mod eval;
mod lexer;
mod object;
mod operators;
mod parser;
mod symbol_table;
mod token;
mod vm;

pub use code::{disassemble, Instructions, Opcode};
pub use compiler::{Bytecode, Compiler};
pub use engine::{Limits, Machine, Output};
pub use error::{Error, ParseIssue, Result};
pub use object::{Environment, Value};
pub use parser::Parser;
pub use vm::Vm;
