//! Embedding API: a `Machine` wraps a compiler/VM pair and the tree-walking
//! evaluator behind one surface — `compile`/`run` for the bytecode path,
//! `evaluate_tree` for the reference path, plus instruction-limit and
//! log-capture conveniences for hosts.

use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::Program;
use crate::builtins::BUILTIN_NAMES;
use crate::compiler::{Bytecode, Compiler};
use crate::error::{Error, Result};
use crate::object::{Environment, Value};
use crate::parser::Parser;
use crate::symbol_table::SymbolTable;
use crate::vm::Vm;

/// Resource limits enforced by [`Machine::run`]. `None` means unlimited.
#[derive(Debug, Clone, Default)]
pub struct Limits {
    /// Maximum number of bytecode instructions fetched per `run` call.
    pub max_instructions: Option<u64>,
}

/// Result of [`Machine::capture`]: the program's value plus anything it
/// logged via the `log` built-in.
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub value: Value,
    pub log: Vec<String>,
}

/// An embeddable instance of the language: a persistent VM (globals +
/// symbol table carry over across calls, REPL-style) and a tree-walking
/// evaluator sharing the same log buffer and environment model.
pub struct Machine {
    vm: Vm,
    symbol_table: SymbolTable,
    constants: Vec<Value>,
    log_buffer: Rc<RefCell<Vec<String>>>,
    tree_env: Rc<RefCell<Environment>>,
}

impl Default for Machine {
    fn default() -> Self {
        Machine::new()
    }
}

impl Machine {
    pub fn new() -> Self {
        let log_buffer = Rc::new(RefCell::new(Vec::new()));
        let mut symbol_table = SymbolTable::new();
        for (index, name) in BUILTIN_NAMES.iter().enumerate() {
            symbol_table.define_builtin(index, name);
        }
        Machine {
            vm: Vm::new(log_buffer.clone()),
            symbol_table,
            constants: Vec::new(),
            log_buffer,
            tree_env: Environment::new(),
        }
    }

    pub fn limit(&mut self, limits: Limits) {
        self.vm.set_instruction_limit(limits.max_instructions);
    }

    fn parse(source: &str) -> Result<Program> {
        Parser::from_source(source)
            .parse_program()
            .map_err(Error::Parse)
    }

    /// Compiles `source` against this machine's accumulated symbol table
    /// and constant pool, without executing it. Exposed so hosts can inspect
    /// bytecode (e.g. with `code::disassemble`) before running it.
    pub fn compile(&mut self, source: &str) -> Result<Bytecode> {
        let program = Self::parse(source)?;
        let symbol_table = std::mem::take(&mut self.symbol_table);
        let mut compiler = Compiler::new_with_state(symbol_table, std::mem::take(&mut self.constants));
        compiler.compile_program(&program)?;
        let bytecode = compiler.bytecode();
        self.constants = bytecode.constants.clone();
        self.symbol_table = compiler.into_symbol_table();
        Ok(bytecode)
    }

    /// Compiles and runs `source` on the bytecode VM, returning the value of
    /// its last top-level expression.
    pub fn run(&mut self, source: &str) -> Result<Value> {
        let bytecode = self.compile(source)?;
        surface_language_error(self.vm.run(bytecode)?)
    }

    /// Like [`Machine::run`], but also returns anything logged via `log()`
    /// during this call, and clears the log buffer first.
    pub fn capture(&mut self, source: &str) -> Result<Output> {
        self.log_buffer.borrow_mut().clear();
        let value = self.run(source)?;
        let log = self.log_buffer.borrow().clone();
        Ok(Output { value, log })
    }

    /// Evaluates `source` with the tree-walking reference evaluator instead
    /// of the bytecode VM. Bindings persist across calls on the same
    /// `Machine`, mirroring `run`'s REPL-style behaviour.
    pub fn evaluate_tree(&mut self, source: &str) -> Result<Value> {
        let program = Self::parse(source)?;
        let value = crate::eval::evaluate_tree(
            &program,
            self.tree_env.clone(),
            self.log_buffer.clone(),
        );
        surface_language_error(value)
    }

    pub fn flush_log(&mut self) -> Vec<String> {
        std::mem::take(&mut self.log_buffer.borrow_mut())
    }
}

/// Per §7: outer program evaluation surfaces a top-level `Error` value to
/// the host as a genuine `Error::Language`, rather than handing back an
/// `Ok` that happens to wrap an error value.
fn surface_language_error(value: Value) -> Result<Value> {
    match value {
        Value::Error(message) => Err(Error::language(message)),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_persists_globals_across_calls() {
        let mut machine = Machine::new();
        machine.run("let x = 10;").unwrap();
        assert_eq!(machine.run("x + 5;").unwrap(), Value::Integer(15));
    }

    #[test]
    fn capture_collects_log_output() {
        let mut machine = Machine::new();
        let output = machine.capture(r#"log("hello", 1); 42;"#).unwrap();
        assert_eq!(output.value, Value::Integer(42));
        assert_eq!(output.log, vec!["hello 1".to_string()]);
    }

    #[test]
    fn evaluate_tree_persists_bindings() {
        let mut machine = Machine::new();
        machine.evaluate_tree("let x = 10;").unwrap();
        assert_eq!(
            machine.evaluate_tree("x + 5;").unwrap(),
            Value::Integer(15)
        );
    }

    #[test]
    fn top_level_language_error_surfaces_through_run_and_evaluate_tree() {
        let mut vm_machine = Machine::new();
        let err = vm_machine.run("len(1, 2)").unwrap_err();
        assert!(matches!(err, Error::Language(_)));

        let mut tree_machine = Machine::new();
        let err = tree_machine.evaluate_tree("len(1, 2)").unwrap_err();
        assert!(matches!(err, Error::Language(_)));
    }

    #[test]
    fn instruction_limit_aborts_runaway_program() {
        let mut machine = Machine::new();
        machine.limit(Limits {
            max_instructions: Some(100),
        });
        let err = machine
            .run("let f = fn(x) { f(x + 1) }; f(0);")
            .unwrap_err();
        assert!(matches!(err, Error::Runtime(_)));
    }

    #[test]
    fn parse_error_surfaces_as_error_parse() {
        let mut machine = Machine::new();
        let err = machine.run("let = 5;").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }
}
