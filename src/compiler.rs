//! AST → bytecode compiler: emits instructions into a scope stack, resolves
//! names through `SymbolTable`, and builds a closure's free-variable list at
//! the point a function literal is compiled.

use std::rc::Rc;

use crate::ast::{Expression, InfixOp, PrefixOp, Program, Statement};
use crate::builtins::BUILTIN_NAMES;
use crate::code::{self, Instructions, Opcode};
use crate::error::{Error, Result};
use crate::object::{CompiledFunction, Value};
use crate::symbol_table::{Symbol, SymbolScope, SymbolTable};

#[derive(Debug, Clone, Copy)]
struct EmittedInstruction {
    opcode: Opcode,
    position: usize,
}

#[derive(Debug, Default)]
struct CompilationScope {
    instructions: Instructions,
    last_instruction: Option<EmittedInstruction>,
    previous_instruction: Option<EmittedInstruction>,
}

/// The compiler's output: flat instructions plus the constant pool they
/// reference.
#[derive(Debug, Clone)]
pub struct Bytecode {
    pub instructions: Instructions,
    pub constants: Vec<Value>,
}

pub struct Compiler {
    constants: Vec<Value>,
    symbol_table: SymbolTable,
    scopes: Vec<CompilationScope>,
    /// Name of the function literal currently being compiled, one entry per
    /// active scope (`None` at the top level), used to detect direct
    /// recursive self-reference and emit `CurrentClosure` for it.
    function_names: Vec<Option<String>>,
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        let mut symbol_table = SymbolTable::new();
        for (index, name) in BUILTIN_NAMES.iter().enumerate() {
            symbol_table.define_builtin(index, name);
        }
        Compiler {
            constants: Vec::new(),
            symbol_table,
            scopes: vec![CompilationScope::default()],
            function_names: vec![None],
        }
    }

    /// Re-creates a compiler that continues from previously compiled state
    /// (REPL-style incremental evaluation, spec.md §6): the symbol table and
    /// constant pool carry over, only the instruction buffer is fresh.
    pub fn new_with_state(symbol_table: SymbolTable, constants: Vec<Value>) -> Self {
        Compiler {
            constants,
            symbol_table,
            scopes: vec![CompilationScope::default()],
            function_names: vec![None],
        }
    }

    pub fn into_symbol_table(self) -> SymbolTable {
        self.symbol_table
    }

    pub fn compile_program(&mut self, program: &Program) -> Result<()> {
        for statement in &program.statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    pub fn bytecode(&self) -> Bytecode {
        Bytecode {
            instructions: self.current_instructions().clone(),
            constants: self.constants.clone(),
        }
    }

    // -- scope stack plumbing -------------------------------------------------

    fn current_instructions(&self) -> &Instructions {
        &self.scopes.last().expect("at least one scope").instructions
    }

    fn enter_scope(&mut self, function_name: Option<String>) {
        self.scopes.push(CompilationScope::default());
        self.function_names.push(function_name);
        let outer = std::mem::take(&mut self.symbol_table);
        self.symbol_table = SymbolTable::enclosed(outer);
    }

    /// Pops the current scope, returning its instructions together with the
    /// symbol table facts the caller needs before the scope's symbol table
    /// itself is discarded (`num_definitions`, `free_symbols`).
    fn leave_scope(&mut self) -> (Instructions, usize, Vec<Symbol>) {
        let num_locals = self.symbol_table.num_definitions;
        let free_symbols = self.symbol_table.free_symbols.clone();
        let popped = self.scopes.pop().expect("scope stack not empty");
        self.function_names.pop();
        let outer = std::mem::take(&mut self.symbol_table);
        self.symbol_table = outer.pop();
        (popped.instructions, num_locals, free_symbols)
    }

    fn emit(&mut self, op: Opcode, operands: &[usize]) -> usize {
        let instruction = code::make(op, operands);
        let scope = self.scopes.last_mut().expect("at least one scope");
        let position = scope.instructions.len();
        scope.instructions.extend_from_slice(&instruction);

        scope.previous_instruction = scope.last_instruction;
        scope.last_instruction = Some(EmittedInstruction {
            opcode: op,
            position,
        });
        position
    }

    fn last_instruction_is(&self, op: Opcode) -> bool {
        self.scopes
            .last()
            .and_then(|s| s.last_instruction)
            .map(|emitted| emitted.opcode == op)
            .unwrap_or(false)
    }

    fn remove_last_pop(&mut self) {
        let scope = self.scopes.last_mut().expect("at least one scope");
        if let Some(last) = scope.last_instruction {
            if last.opcode == Opcode::Pop {
                scope.instructions.truncate(last.position);
                scope.last_instruction = scope.previous_instruction;
            }
        }
    }

    fn replace_last_pop_with_return(&mut self) {
        let scope = self.scopes.last_mut().expect("at least one scope");
        if let Some(last) = scope.last_instruction {
            if last.opcode == Opcode::Pop {
                let new_instruction = code::make(Opcode::ReturnValue, &[]);
                scope.instructions[last.position..last.position + new_instruction.len()]
                    .copy_from_slice(&new_instruction);
                scope.last_instruction = Some(EmittedInstruction {
                    opcode: Opcode::ReturnValue,
                    position: last.position,
                });
            }
        }
    }

    /// Overwrites the operand of the (single-operand, 2-byte) jump
    /// instruction at `position` with `operand` — used to patch forward
    /// jumps once their target is known.
    fn change_operand(&mut self, position: usize, operand: usize) {
        let scope = self.scopes.last_mut().expect("at least one scope");
        let op = code::Opcode::from_byte(scope.instructions[position]).expect("valid opcode");
        let new_instruction = code::make(op, &[operand]);
        scope.instructions[position..position + new_instruction.len()]
            .copy_from_slice(&new_instruction);
    }

    fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    // -- statements -----------------------------------------------------------

    fn compile_statement(&mut self, statement: &Statement) -> Result<()> {
        match statement {
            Statement::Expression { expr, .. } => {
                self.compile_expression(expr)?;
                self.emit(Opcode::Pop, &[]);
                Ok(())
            }
            Statement::Block { statements, .. } => {
                for stmt in statements {
                    self.compile_statement(stmt)?;
                }
                Ok(())
            }
            Statement::Let { name, value, .. } => {
                let symbol = self.symbol_table.define(&name.name);
                self.compile_expression(value)?;
                self.emit_store(&symbol);
                Ok(())
            }
            Statement::Return { value, .. } => {
                match value {
                    Some(expr) => self.compile_expression(expr)?,
                    None => {
                        self.emit(Opcode::Null, &[]);
                    }
                }
                self.emit(Opcode::ReturnValue, &[]);
                Ok(())
            }
        }
    }

    fn emit_store(&mut self, symbol: &Symbol) {
        match symbol.scope {
            SymbolScope::Global => {
                self.emit(Opcode::SetGlobal, &[symbol.index]);
            }
            SymbolScope::Local => {
                self.emit(Opcode::SetLocal, &[symbol.index]);
            }
            SymbolScope::Free | SymbolScope::Builtin => {
                unreachable!("let bindings never define free or builtin symbols")
            }
        }
    }

    fn load_symbol(&mut self, symbol: &Symbol) {
        match symbol.scope {
            SymbolScope::Global => {
                self.emit(Opcode::GetGlobal, &[symbol.index]);
            }
            SymbolScope::Local => {
                self.emit(Opcode::GetLocal, &[symbol.index]);
            }
            SymbolScope::Builtin => {
                self.emit(Opcode::GetBuiltin, &[symbol.index]);
            }
            SymbolScope::Free => {
                self.emit(Opcode::GetFree, &[symbol.index]);
            }
        }
    }

    // -- expressions ------------------------------------------------------

    fn compile_expression(&mut self, expr: &Expression) -> Result<()> {
        match expr {
            Expression::IntegerLiteral { value, .. } => {
                let idx = self.add_constant(Value::Integer(*value));
                self.emit(Opcode::Constant, &[idx]);
                Ok(())
            }
            Expression::StringLiteral { value, .. } => {
                let idx = self.add_constant(Value::string(value.clone()));
                self.emit(Opcode::Constant, &[idx]);
                Ok(())
            }
            Expression::Boolean { value, .. } => {
                self.emit(if *value { Opcode::True } else { Opcode::False }, &[]);
                Ok(())
            }
            Expression::ArrayLiteral { elements, .. } => {
                for element in elements {
                    self.compile_expression(element)?;
                }
                self.emit(Opcode::Array, &[elements.len()]);
                Ok(())
            }
            Expression::HashLiteral { pairs, line } => self.compile_hash_literal(pairs, *line),
            Expression::Prefix { op, right, .. } => self.compile_prefix(*op, right),
            Expression::Infix {
                op,
                left,
                right,
                line,
            } => self.compile_infix(*op, left, right, *line),
            Expression::Index { left, index, .. } => {
                self.compile_expression(left)?;
                self.compile_expression(index)?;
                self.emit(Opcode::Index, &[]);
                Ok(())
            }
            Expression::Identifier(ident) => self.compile_identifier(&ident.name, ident.line),
            Expression::If {
                condition,
                consequence,
                alternative,
                ..
            } => self.compile_if(condition, consequence, alternative.as_deref()),
            Expression::FunctionLiteral {
                name, params, body, ..
            } => self.compile_function_literal(name.clone(), params, body),
            Expression::Call {
                function,
                arguments,
                ..
            } => {
                self.compile_expression(function)?;
                for arg in arguments {
                    self.compile_expression(arg)?;
                }
                self.emit(Opcode::Call, &[arguments.len()]);
                Ok(())
            }
        }
    }

    fn compile_identifier(&mut self, name: &str, line: u32) -> Result<()> {
        let Some(symbol) = self.symbol_table.resolve(name) else {
            return Err(Error::compile(line, format!("undefined variable {}", name)));
        };
        let is_direct_recursion = symbol.scope == SymbolScope::Free
            && self.function_names.last().and_then(|n| n.as_deref()) == Some(name);
        if is_direct_recursion {
            self.emit(Opcode::CurrentClosure, &[]);
        } else {
            self.load_symbol(&symbol);
        }
        Ok(())
    }

    fn compile_prefix(&mut self, op: PrefixOp, right: &Expression) -> Result<()> {
        self.compile_expression(right)?;
        match op {
            PrefixOp::Bang => {
                self.emit(Opcode::Bang, &[]);
            }
            PrefixOp::Minus => {
                self.emit(Opcode::Minus, &[]);
            }
        }
        Ok(())
    }

    fn compile_infix(
        &mut self,
        op: InfixOp,
        left: &Expression,
        right: &Expression,
        line: u32,
    ) -> Result<()> {
        match op {
            InfixOp::Lt => {
                // `<` is synthesised by swapping operands and emitting GreaterThan.
                self.compile_expression(right)?;
                self.compile_expression(left)?;
                self.emit(Opcode::GreaterThan, &[]);
            }
            InfixOp::Gt => {
                self.compile_expression(left)?;
                self.compile_expression(right)?;
                self.emit(Opcode::GreaterThan, &[]);
            }
            InfixOp::LtEq | InfixOp::GtEq => {
                return Err(Error::compile(
                    line,
                    format!(
                        "unknown operator: {}",
                        if op == InfixOp::LtEq { "<=" } else { ">=" }
                    ),
                ));
            }
            InfixOp::Add
            | InfixOp::Sub
            | InfixOp::Mul
            | InfixOp::Div
            | InfixOp::Eq
            | InfixOp::NotEq => {
                self.compile_expression(left)?;
                self.compile_expression(right)?;
                let opcode = match op {
                    InfixOp::Add => Opcode::Add,
                    InfixOp::Sub => Opcode::Sub,
                    InfixOp::Mul => Opcode::Mul,
                    InfixOp::Div => Opcode::Div,
                    InfixOp::Eq => Opcode::Equal,
                    InfixOp::NotEq => Opcode::NotEqual,
                    _ => unreachable!(),
                };
                self.emit(opcode, &[]);
            }
        }
        Ok(())
    }

    fn compile_if(
        &mut self,
        condition: &Expression,
        consequence: &Statement,
        alternative: Option<&Statement>,
    ) -> Result<()> {
        self.compile_expression(condition)?;
        let jump_not_truthy_pos = self.emit(Opcode::JumpNotTruthy, &[9999]);

        self.compile_statement(consequence)?;
        if self.last_instruction_is(Opcode::Pop) {
            self.remove_last_pop();
        }

        let jump_pos = self.emit(Opcode::Jump, &[9999]);
        let after_consequence_pos = self.current_instructions().len();
        self.change_operand(jump_not_truthy_pos, after_consequence_pos);

        match alternative {
            Some(alt) => {
                self.compile_statement(alt)?;
                if self.last_instruction_is(Opcode::Pop) {
                    self.remove_last_pop();
                }
            }
            None => {
                self.emit(Opcode::Null, &[]);
            }
        }

        let after_alternative_pos = self.current_instructions().len();
        self.change_operand(jump_pos, after_alternative_pos);
        Ok(())
    }

    fn compile_hash_literal(
        &mut self,
        pairs: &[(Expression, Expression)],
        _line: u32,
    ) -> Result<()> {
        let mut sorted: Vec<&(Expression, Expression)> = pairs.iter().collect();
        sorted.sort_by_key(|(key, _)| expression_sort_key(key));

        for (key, value) in &sorted {
            self.compile_expression(key)?;
            self.compile_expression(value)?;
        }
        self.emit(Opcode::Hash, &[sorted.len() * 2]);
        Ok(())
    }

    fn compile_function_literal(
        &mut self,
        name: Option<String>,
        params: &[crate::ast::Identifier],
        body: &Statement,
    ) -> Result<()> {
        self.enter_scope(name);

        for param in params {
            self.symbol_table.define(&param.name);
        }

        self.compile_statement(body)?;

        if self.last_instruction_is(Opcode::Pop) {
            self.replace_last_pop_with_return();
        }
        if !self.last_instruction_is(Opcode::ReturnValue) {
            self.emit(Opcode::Return, &[]);
        }

        let (instructions, num_locals, free_symbols) = self.leave_scope();

        for symbol in &free_symbols {
            self.load_symbol(symbol);
        }

        let compiled = CompiledFunction {
            instructions,
            num_locals,
            num_parameters: params.len(),
        };
        let const_idx = self.add_constant(Value::CompiledFunction(Rc::new(compiled)));
        self.emit(Opcode::Closure, &[const_idx, free_symbols.len()]);
        Ok(())
    }
}

/// A stable textual key used only to sort hash-literal pairs into a
/// deterministic emission order (spec.md §4.5); unrelated to runtime
/// `HashKey`s, which the compiler never computes.
fn expression_sort_key(expr: &Expression) -> String {
    match expr {
        Expression::IntegerLiteral { value, .. } => value.to_string(),
        Expression::StringLiteral { value, .. } => value.clone(),
        Expression::Boolean { value, .. } => value.to_string(),
        Expression::Identifier(ident) => ident.name.clone(),
        other => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::disassemble;
    use crate::parser::Parser;

    fn compile(input: &str) -> Bytecode {
        let program = Parser::from_source(input)
            .parse_program()
            .unwrap_or_else(|errs| panic!("parse errors: {:?}", errs));
        let mut compiler = Compiler::new();
        compiler.compile_program(&program).expect("compile error");
        compiler.bytecode()
    }

    #[test]
    fn compiles_integer_arithmetic() {
        let bytecode = compile("1 + 2");
        let expected = [
            code::make(Opcode::Constant, &[0]),
            code::make(Opcode::Constant, &[1]),
            code::make(Opcode::Add, &[]),
            code::make(Opcode::Pop, &[]),
        ]
        .concat();
        assert_eq!(bytecode.instructions, expected);
        assert_eq!(
            bytecode.constants,
            vec![Value::Integer(1), Value::Integer(2)]
        );
    }

    #[test]
    fn less_than_swaps_operands_for_greater_than() {
        let bytecode = compile("1 < 2");
        let expected = [
            code::make(Opcode::Constant, &[0]),
            code::make(Opcode::Constant, &[1]),
            code::make(Opcode::GreaterThan, &[]),
            code::make(Opcode::Pop, &[]),
        ]
        .concat();
        assert_eq!(bytecode.instructions, expected);
        // `right` compiles before `left` for `<`, so the constant pool holds
        // 2 (right) then 1 (left), the reverse of source order.
        assert_eq!(
            bytecode.constants,
            vec![Value::Integer(2), Value::Integer(1)]
        );
    }

    #[test]
    fn less_than_or_equal_is_a_compile_error() {
        let program = Parser::from_source("1 <= 2;").parse_program().unwrap();
        let mut compiler = Compiler::new();
        let err = compiler.compile_program(&program).unwrap_err();
        assert!(matches!(err, Error::Compile { .. }));
    }

    #[test]
    fn if_without_alternative_pushes_null() {
        let bytecode = compile("if (true) { 10 }; 3333;");
        let text = disassemble(&bytecode.instructions);
        assert!(text.contains("OpJumpNotTruthy"));
        assert!(text.contains("OpNull"));
    }

    #[test]
    fn globals_use_set_and_get_global() {
        let bytecode = compile("let one = 1; let two = 2;");
        let text = disassemble(&bytecode.instructions);
        assert!(text.contains("OpSetGlobal 0"));
        assert!(text.contains("OpSetGlobal 1"));
    }

    #[test]
    fn function_literal_ends_with_return_value() {
        let bytecode = compile("fn() { 5 + 10 }");
        let compiled_fn = bytecode
            .constants
            .iter()
            .find_map(|c| match c {
                Value::CompiledFunction(f) => Some(f.clone()),
                _ => None,
            })
            .expect("expected a compiled function constant");
        let text = disassemble(&compiled_fn.instructions);
        assert!(text.trim_end().ends_with("OpReturnValue"));
    }

    #[test]
    fn recursive_function_emits_current_closure() {
        // Recursion through a *global* binding resolves via GetGlobal (the
        // value is already there by the time the closure calls itself); it
        // only needs CurrentClosure when the binding is local, so that the
        // self-reference isn't captured as a free variable instead.
        let bytecode = compile(
            "let wrapper = fn() { let countDown = fn(x) { countDown(x - 1) }; countDown(1); };",
        );
        let compiled_fn = bytecode
            .constants
            .iter()
            .find_map(|c| match c {
                Value::CompiledFunction(f) if f.num_parameters == 1 => Some(f.clone()),
                _ => None,
            })
            .expect("expected the inner compiled function constant");
        let text = disassemble(&compiled_fn.instructions);
        assert!(text.contains("OpCurrentClosure"));
    }

    #[test]
    fn closure_captures_free_variables() {
        let bytecode = compile("fn(a) { fn(b) { a + b } }");
        let text = disassemble(&bytecode.instructions);
        assert!(text.contains("OpClosure"));
    }

    #[test]
    fn hash_literal_sorts_keys_deterministically() {
        let a = compile(r#"{"b": 2, "a": 1}"#);
        let b = compile(r#"{"a": 1, "b": 2}"#);
        assert_eq!(a.instructions, b.instructions);
    }
}
