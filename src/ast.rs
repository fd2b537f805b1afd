//! Typed AST produced by the parser and consumed by the compiler and the
//! tree-walking evaluator.

/// A parsed program: an ordered list of top-level statements.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Identifier {
    pub name: String,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Let {
        name: Identifier,
        value: Expression,
        line: u32,
    },
    Return {
        value: Option<Expression>,
        line: u32,
    },
    Block {
        statements: Vec<Statement>,
        line: u32,
    },
    Expression {
        expr: Expression,
        line: u32,
    },
}

impl Statement {
    pub fn line(&self) -> u32 {
        match self {
            Statement::Let { line, .. }
            | Statement::Return { line, .. }
            | Statement::Block { line, .. }
            | Statement::Expression { line, .. } => *line,
        }
    }
}

/// Binary infix operators. `Lt`/`Gt` compile to `GreaterThan` (swapping
/// operands for `Lt`); `LtEq`/`GtEq` are evaluator-only, rejected by the
/// compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfixOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOp {
    Bang,
    Minus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Identifier(Identifier),
    IntegerLiteral {
        value: i64,
        line: u32,
    },
    StringLiteral {
        value: String,
        line: u32,
    },
    Boolean {
        value: bool,
        line: u32,
    },
    ArrayLiteral {
        elements: Vec<Expression>,
        line: u32,
    },
    HashLiteral {
        pairs: Vec<(Expression, Expression)>,
        line: u32,
    },
    Prefix {
        op: PrefixOp,
        right: Box<Expression>,
        line: u32,
    },
    Infix {
        op: InfixOp,
        left: Box<Expression>,
        right: Box<Expression>,
        line: u32,
    },
    If {
        condition: Box<Expression>,
        consequence: Box<Statement>,
        alternative: Option<Box<Statement>>,
        line: u32,
    },
    FunctionLiteral {
        name: Option<String>,
        params: Vec<Identifier>,
        body: Box<Statement>,
        line: u32,
    },
    Call {
        function: Box<Expression>,
        arguments: Vec<Expression>,
        line: u32,
    },
    Index {
        left: Box<Expression>,
        index: Box<Expression>,
        line: u32,
    },
}

impl Expression {
    pub fn line(&self) -> u32 {
        match self {
            Expression::Identifier(ident) => ident.line,
            Expression::IntegerLiteral { line, .. }
            | Expression::StringLiteral { line, .. }
            | Expression::Boolean { line, .. }
            | Expression::ArrayLiteral { line, .. }
            | Expression::HashLiteral { line, .. }
            | Expression::Prefix { line, .. }
            | Expression::Infix { line, .. }
            | Expression::If { line, .. }
            | Expression::FunctionLiteral { line, .. }
            | Expression::Call { line, .. }
            | Expression::Index { line, .. } => *line,
        }
    }
}
