//! Stack-based bytecode virtual machine.
//!
//! Executes the flat instruction stream produced by [`crate::compiler`] with
//! a fetch-decode-execute loop over fixed-capacity stack, globals, and frame
//! arrays. The VM is the only module that mutates runtime state; `operators`
//! and `builtins` are stateless helpers it calls into.

use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::{InfixOp, PrefixOp};
use crate::builtins::builtins;
use crate::code::{Instructions, Opcode};
use crate::compiler::Bytecode;
use crate::error::{Error, Result};
use crate::object::{Builtin, Closure, CompiledFunction, HashObject, Value};
use crate::operators::{apply_infix, apply_prefix};

const STACK_SIZE: usize = 2048;
const GLOBALS_SIZE: usize = 65536;
const MAX_FRAMES: usize = 65536;

/// One call's activation record: the closure being executed, its
/// instruction pointer, and the stack slot its locals start at.
struct Frame {
    closure: Rc<Closure>,
    ip: isize,
    base_pointer: usize,
}

impl Frame {
    fn new(closure: Rc<Closure>, base_pointer: usize) -> Self {
        Frame {
            closure,
            ip: -1,
            base_pointer,
        }
    }

    fn instructions(&self) -> &Instructions {
        &self.closure.func.instructions
    }
}

/// A stack-based VM. Globals persist across successive `run` calls on the
/// same instance, which is what lets [`crate::engine::Machine`] support
/// REPL-style incremental evaluation.
pub struct Vm {
    stack: Vec<Value>,
    sp: usize,
    globals: Vec<Value>,
    frames: Vec<Frame>,
    builtins: Vec<Builtin>,
    constants: Vec<Value>,
    /// Safety knob: aborts the run with `Error::runtime` once this many
    /// instructions have been fetched. `None` means unlimited.
    instruction_limit: Option<u64>,
}

impl Vm {
    pub fn new(log_buffer: Rc<RefCell<Vec<String>>>) -> Self {
        Vm {
            stack: vec![Value::Null; STACK_SIZE],
            sp: 0,
            globals: vec![Value::Null; GLOBALS_SIZE],
            frames: Vec::with_capacity(MAX_FRAMES),
            builtins: builtins(log_buffer),
            constants: Vec::new(),
            instruction_limit: None,
        }
    }

    pub fn set_instruction_limit(&mut self, limit: Option<u64>) {
        self.instruction_limit = limit;
    }

    /// Runs `bytecode` to completion against this VM's persistent globals,
    /// returning the last value popped off the stack (or `Null` if the
    /// program pushed nothing).
    pub fn run(&mut self, bytecode: Bytecode) -> Result<Value> {
        let main_fn = Rc::new(CompiledFunction {
            instructions: bytecode.instructions,
            num_locals: 0,
            num_parameters: 0,
        });
        let main_closure = Rc::new(Closure {
            func: main_fn,
            free: Vec::new(),
        });
        self.constants = bytecode.constants;
        self.sp = 0;
        self.frames.clear();
        self.frames.push(Frame::new(main_closure, 0));

        self.execute()?;

        Ok(self.last_popped())
    }

    fn push(&mut self, value: Value) -> Result<()> {
        if self.sp >= STACK_SIZE {
            return Err(Error::runtime("stack overflow"));
        }
        self.stack[self.sp] = value;
        self.sp += 1;
        Ok(())
    }

    fn pop(&mut self) -> Value {
        self.sp -= 1;
        self.stack[self.sp].clone()
    }

    fn last_popped(&self) -> Value {
        self.stack[self.sp].clone()
    }

    fn execute(&mut self) -> Result<()> {
        let mut instructions_executed: u64 = 0;
        loop {
            if let Some(limit) = self.instruction_limit {
                instructions_executed += 1;
                if instructions_executed > limit {
                    return Err(Error::runtime("instruction limit exceeded"));
                }
            }
            let frame_index = self.frames.len() - 1;
            self.frames[frame_index].ip += 1;
            let ip = self.frames[frame_index].ip as usize;
            if ip >= self.frames[frame_index].instructions().len() {
                if frame_index == 0 {
                    return Ok(());
                }
                return Err(Error::runtime(
                    "function body ran off the end without a return",
                ));
            }

            let op_byte = self.frames[frame_index].instructions()[ip];
            let Some(op) = Opcode::from_byte(op_byte) else {
                return Err(Error::runtime(format!("unknown opcode byte {}", op_byte)));
            };

            match op {
                Opcode::Constant => {
                    let const_index = self.read_operand(2) as usize;
                    let value = self.constants[const_index].clone();
                    self.push(value)?;
                }
                Opcode::Pop => {
                    self.pop();
                }
                Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                    let right = self.pop();
                    let left = self.pop();
                    let infix_op = match op {
                        Opcode::Add => InfixOp::Add,
                        Opcode::Sub => InfixOp::Sub,
                        Opcode::Mul => InfixOp::Mul,
                        Opcode::Div => InfixOp::Div,
                        _ => unreachable!(),
                    };
                    let result = apply_infix(infix_op, &left, &right).map_err(Error::runtime)?;
                    self.push(result)?;
                }
                Opcode::True => self.push(Value::Boolean(true))?,
                Opcode::False => self.push(Value::Boolean(false))?,
                Opcode::Null => self.push(Value::Null)?,
                Opcode::Equal | Opcode::NotEqual | Opcode::GreaterThan => {
                    let right = self.pop();
                    let left = self.pop();
                    let infix_op = match op {
                        Opcode::Equal => InfixOp::Eq,
                        Opcode::NotEqual => InfixOp::NotEq,
                        Opcode::GreaterThan => InfixOp::Gt,
                        _ => unreachable!(),
                    };
                    let result = apply_infix(infix_op, &left, &right).map_err(Error::runtime)?;
                    self.push(result)?;
                }
                Opcode::Minus => {
                    let right = self.pop();
                    let result = apply_prefix(PrefixOp::Minus, &right).map_err(Error::runtime)?;
                    self.push(result)?;
                }
                Opcode::Bang => {
                    let right = self.pop();
                    let result = apply_prefix(PrefixOp::Bang, &right).map_err(Error::runtime)?;
                    self.push(result)?;
                }
                Opcode::JumpNotTruthy => {
                    let target = self.read_operand(2) as usize;
                    let condition = self.pop();
                    if !condition.is_truthy() {
                        self.frames[frame_index].ip = target as isize - 1;
                    }
                }
                Opcode::Jump => {
                    let target = self.read_operand(2) as usize;
                    self.frames[frame_index].ip = target as isize - 1;
                }
                Opcode::SetGlobal => {
                    let index = self.read_operand(2) as usize;
                    let value = self.pop();
                    self.globals[index] = value;
                }
                Opcode::GetGlobal => {
                    let index = self.read_operand(2) as usize;
                    self.push(self.globals[index].clone())?;
                }
                Opcode::SetLocal => {
                    let index = self.read_operand(1) as usize;
                    let base_pointer = self.frames[frame_index].base_pointer;
                    let value = self.pop();
                    self.stack[base_pointer + index] = value;
                }
                Opcode::GetLocal => {
                    let index = self.read_operand(1) as usize;
                    let base_pointer = self.frames[frame_index].base_pointer;
                    self.push(self.stack[base_pointer + index].clone())?;
                }
                Opcode::GetBuiltin => {
                    let index = self.read_operand(1) as usize;
                    let builtin = self.builtins[index].clone();
                    self.push(Value::Builtin(Rc::new(builtin)))?;
                }
                Opcode::GetFree => {
                    let index = self.read_operand(1) as usize;
                    let value = self.frames[frame_index].closure.free[index].clone();
                    self.push(value)?;
                }
                Opcode::CurrentClosure => {
                    let closure = self.frames[frame_index].closure.clone();
                    self.push(Value::Closure(closure))?;
                }
                Opcode::Array => {
                    let count = self.read_operand(2) as usize;
                    let elements = self.stack[self.sp - count..self.sp].to_vec();
                    self.sp -= count;
                    self.push(Value::array(elements))?;
                }
                Opcode::Hash => {
                    let count = self.read_operand(2) as usize;
                    let mut hash = HashObject::default();
                    let pairs = self.stack[self.sp - count..self.sp].to_vec();
                    self.sp -= count;
                    for pair in pairs.chunks(2) {
                        hash.insert(pair[0].clone(), pair[1].clone());
                    }
                    self.push(Value::Hash(Rc::new(hash)))?;
                }
                Opcode::Index => {
                    let index = self.pop();
                    let left = self.pop();
                    let result = self.execute_index(&left, &index)?;
                    self.push(result)?;
                }
                Opcode::Call => {
                    let num_args = self.read_operand(1) as usize;
                    self.call_function(num_args)?;
                    continue;
                }
                Opcode::ReturnValue => {
                    let return_value = self.pop();
                    let frame = self.frames.pop().expect("frame to return from");
                    self.sp = frame.base_pointer - 1;
                    self.push(return_value)?;
                }
                Opcode::Return => {
                    let frame = self.frames.pop().expect("frame to return from");
                    self.sp = frame.base_pointer - 1;
                    self.push(Value::Null)?;
                }
                Opcode::Closure => {
                    let const_index = self.read_operand(2) as usize;
                    let num_free = self.read_operand(1) as usize;
                    let Value::CompiledFunction(func) = self.constants[const_index].clone() else {
                        return Err(Error::runtime("not a compiled function"));
                    };
                    let free = self.stack[self.sp - num_free..self.sp].to_vec();
                    self.sp -= num_free;
                    self.push(Value::Closure(Rc::new(Closure { func, free })))?;
                }
            }

            if self.frames.is_empty() {
                return Ok(());
            }
        }
    }

    /// Reads a `width`-byte big-endian operand immediately after the opcode
    /// at the current frame's `ip`, advancing `ip` past it.
    fn read_operand(&mut self, width: usize) -> u32 {
        let frame_index = self.frames.len() - 1;
        let ip = self.frames[frame_index].ip as usize;
        let instructions = self.frames[frame_index].instructions();
        let value = match width {
            2 => u16::from_be_bytes([instructions[ip + 1], instructions[ip + 2]]) as u32,
            1 => instructions[ip + 1] as u32,
            other => panic!("unsupported operand width: {}", other),
        };
        self.frames[frame_index].ip += width as isize;
        value
    }

    fn execute_index(&self, left: &Value, index: &Value) -> Result<Value> {
        match left {
            Value::Array(elements) => match index {
                Value::Integer(i) => {
                    if *i < 0 || *i as usize >= elements.len() {
                        Ok(Value::Null)
                    } else {
                        Ok(elements[*i as usize].clone())
                    }
                }
                other => Err(Error::runtime(format!(
                    "index operator not supported for array index type {}",
                    other.type_name()
                ))),
            },
            Value::Hash(hash) => Ok(hash.get(index).unwrap_or(Value::Null)),
            other => Err(Error::runtime(format!(
                "index operator not supported: {}",
                other.type_name()
            ))),
        }
    }

    fn call_function(&mut self, num_args: usize) -> Result<()> {
        let callee = self.stack[self.sp - 1 - num_args].clone();
        match callee {
            Value::Closure(closure) => {
                if num_args != closure.func.num_parameters {
                    return Err(Error::runtime(format!(
                        "wrong number of parameters, expected={}, got={}",
                        closure.func.num_parameters, num_args
                    )));
                }
                if self.frames.len() >= MAX_FRAMES {
                    return Err(Error::runtime("stack overflow"));
                }
                let num_locals = closure.func.num_locals;
                let base_pointer = self.sp - num_args;
                self.frames.push(Frame::new(closure, base_pointer));
                self.sp = base_pointer + num_locals;
                Ok(())
            }
            Value::Builtin(builtin) => {
                let args = self.stack[self.sp - num_args..self.sp].to_vec();
                self.sp = self.sp - num_args - 1;
                let result = (builtin.func)(&args);
                self.push(result)?;
                Ok(())
            }
            other => Err(Error::runtime(format!(
                "calling non-function: {}",
                other.type_name()
            ))),
        }
    }

    /// The value the program last pushed and popped — used by the embedding
    /// API to recover the result of a top-level expression statement.
    pub fn last_popped_stack_element(&self) -> Value {
        self.last_popped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::parser::Parser;

    fn run(input: &str) -> Value {
        let program = Parser::from_source(input)
            .parse_program()
            .unwrap_or_else(|errs| panic!("parse errors: {:?}", errs));
        let mut compiler = Compiler::new();
        compiler.compile_program(&program).expect("compile error");
        let bytecode = compiler.bytecode();
        let mut vm = Vm::new(Rc::new(RefCell::new(Vec::new())));
        vm.run(bytecode).expect("vm error")
    }

    #[test]
    fn integer_arithmetic() {
        assert_eq!(run("1 + 2 * 3"), Value::Integer(7));
        assert_eq!(run("(5 + 10 * 2 + 15 / 3) * 2 + -10"), Value::Integer(50));
    }

    #[test]
    fn boolean_and_comparison_expressions() {
        assert_eq!(run("1 < 2"), Value::Boolean(true));
        assert_eq!(run("1 > 2 == false"), Value::Boolean(true));
        assert_eq!(run("!(if (false) { 5; })"), Value::Boolean(true));
    }

    #[test]
    fn conditionals() {
        assert_eq!(run("if (true) { 10 }"), Value::Integer(10));
        assert_eq!(run("if (false) { 10 }"), Value::Null);
    }

    #[test]
    fn global_let_statements() {
        assert_eq!(run("let one = 1; let two = 2; one + two"), Value::Integer(3));
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(run(r#""mon" + "key""#), Value::string("monkey"));
    }

    #[test]
    fn array_and_hash_indexing() {
        assert_eq!(run("[1, 2, 3][1]"), Value::Integer(2));
        assert_eq!(run("[1, 2, 3][99]"), Value::Null);
        assert_eq!(run(r#"{"a": 1}["a"]"#), Value::Integer(1));
    }

    #[test]
    fn calling_functions_with_bindings_and_arguments() {
        assert_eq!(
            run("let identity = fn(a) { a; }; identity(4);"),
            Value::Integer(4)
        );
        assert_eq!(
            run("let sum = fn(a, b) { a + b }; sum(1, 2);"),
            Value::Integer(3)
        );
    }

    #[test]
    fn closures_capture_free_variables() {
        let source = r#"
            let newAdder = fn(a, b) {
                fn(c) { a + b + c };
            };
            let addTwo = newAdder(1, 1);
            addTwo(9);
        "#;
        assert_eq!(run(source), Value::Integer(11));
    }

    #[test]
    fn recursive_closures_via_current_closure() {
        let source = r#"
            let fib = fn(x) {
                if (x < 2) {
                    x
                } else {
                    fib(x - 1) + fib(x - 2)
                }
            };
            fib(15);
        "#;
        assert_eq!(run(source), Value::Integer(610));
    }

    #[test]
    fn calling_function_with_wrong_number_of_arguments_errors() {
        let program = Parser::from_source("let f = fn(a) { a }; f();")
            .parse_program()
            .unwrap();
        let mut compiler = Compiler::new();
        compiler.compile_program(&program).unwrap();
        let mut vm = Vm::new(Rc::new(RefCell::new(Vec::new())));
        let err = vm.run(compiler.bytecode()).unwrap_err();
        assert!(matches!(err, Error::Runtime(_)));
    }

    #[test]
    fn builtins_len_push_first() {
        assert_eq!(run(r#"len("hello")"#), Value::Integer(5));
        assert_eq!(run("first(push([1, 2], 3))"), Value::Integer(1));
    }

    #[test]
    fn log_builtin_records_into_shared_buffer() {
        let program = Parser::from_source(r#"log("hi", 1);"#).parse_program().unwrap();
        let mut compiler = Compiler::new();
        compiler.compile_program(&program).unwrap();
        let buffer = Rc::new(RefCell::new(Vec::new()));
        let mut vm = Vm::new(buffer.clone());
        vm.run(compiler.bytecode()).unwrap();
        assert_eq!(buffer.borrow().as_slice(), ["hi 1"]);
    }
}
