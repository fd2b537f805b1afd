//! Pratt (operator-precedence) parser: token stream to AST.

use crate::ast::{Expression, Identifier, InfixOp, PrefixOp, Program, Statement};
use crate::error::ParseIssue;
use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Equals,
    LessGreater,
    Sum,
    Product,
    Prefix,
    Call,
    Index,
}

fn precedence_of(kind: TokenKind) -> Precedence {
    match kind {
        TokenKind::Eq | TokenKind::NotEq => Precedence::Equals,
        TokenKind::Lt | TokenKind::Gt | TokenKind::LtEq | TokenKind::GtEq => {
            Precedence::LessGreater
        }
        TokenKind::Plus | TokenKind::Minus => Precedence::Sum,
        TokenKind::Slash | TokenKind::Asterisk => Precedence::Product,
        TokenKind::LParen => Precedence::Call,
        TokenKind::LBracket => Precedence::Index,
        _ => Precedence::Lowest,
    }
}

/// Parses a full program, accumulating errors rather than aborting on the
/// first one. Call `Parser::parse_program` to drive it.
pub struct Parser {
    lexer: Lexer,
    cur_token: Token,
    peek_token: Token,
    errors: Vec<ParseIssue>,
}

impl Parser {
    pub fn new(mut lexer: Lexer) -> Self {
        let cur_token = lexer.next_token();
        let peek_token = lexer.next_token();
        Parser {
            lexer,
            cur_token,
            peek_token,
            errors: Vec::new(),
        }
    }

    pub fn from_source(source: &str) -> Self {
        Parser::new(Lexer::new(source))
    }

    fn next_token(&mut self) {
        self.cur_token = std::mem::replace(&mut self.peek_token, self.lexer.next_token());
    }

    fn error(&mut self, line: u32, message: impl Into<String>) {
        self.errors.push(ParseIssue {
            line,
            message: message.into(),
        });
    }

    fn peek_precedence(&self) -> Precedence {
        precedence_of(self.peek_token.kind)
    }

    fn cur_precedence(&self) -> Precedence {
        precedence_of(self.cur_token.kind)
    }

    fn expect_peek(&mut self, kind: TokenKind) -> bool {
        if self.peek_token.kind == kind {
            self.next_token();
            true
        } else {
            let line = self.peek_token.line;
            self.error(
                line,
                format!(
                    "expected next token to be {:?}, got {:?} instead",
                    kind, self.peek_token.kind
                ),
            );
            false
        }
    }

    /// Parses the whole token stream into a `Program`, collecting every
    /// error encountered along the way. Returns `Ok` even if statements had
    /// to be skipped, as long as at least partial progress was made;
    /// returns `Err` with the accumulated issues when any occurred.
    pub fn parse_program(mut self) -> Result<Program, Vec<ParseIssue>> {
        let mut statements = Vec::new();
        while self.cur_token.kind != TokenKind::Eof {
            if let Some(stmt) = self.parse_statement() {
                statements.push(stmt);
            }
            self.next_token();
        }
        if self.errors.is_empty() {
            Ok(Program { statements })
        } else {
            Err(self.errors)
        }
    }

    fn parse_statement(&mut self) -> Option<Statement> {
        match self.cur_token.kind {
            TokenKind::Let => self.parse_let_statement(),
            TokenKind::Return => self.parse_return_statement(),
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_let_statement(&mut self) -> Option<Statement> {
        let line = self.cur_token.line;
        if !self.expect_peek(TokenKind::Ident) {
            return self.skip_until_semicolon();
        }
        let name = Identifier {
            name: self.cur_token.literal.clone(),
            line: self.cur_token.line,
        };
        if !self.expect_peek(TokenKind::Assign) {
            return self.skip_until_semicolon();
        }
        self.next_token();

        let value = self.parse_expression(Precedence::Lowest)?;
        let value = name_function_literal(value, &name.name);

        if self.peek_token.kind == TokenKind::Semicolon {
            self.next_token();
        }
        Some(Statement::Let { name, value, line })
    }

    fn parse_return_statement(&mut self) -> Option<Statement> {
        let line = self.cur_token.line;
        self.next_token();

        let value = if self.cur_token.kind == TokenKind::Semicolon {
            None
        } else {
            let expr = self.parse_expression(Precedence::Lowest)?;
            Some(expr)
        };

        if self.peek_token.kind == TokenKind::Semicolon {
            self.next_token();
        }
        Some(Statement::Return { value, line })
    }

    fn parse_expression_statement(&mut self) -> Option<Statement> {
        let line = self.cur_token.line;
        let expr = self.parse_expression(Precedence::Lowest)?;
        if self.peek_token.kind == TokenKind::Semicolon {
            self.next_token();
        }
        Some(Statement::Expression { expr, line })
    }

    fn parse_block_statement(&mut self) -> Statement {
        let line = self.cur_token.line;
        let mut statements = Vec::new();
        self.next_token();
        while self.cur_token.kind != TokenKind::RBrace && self.cur_token.kind != TokenKind::Eof {
            if let Some(stmt) = self.parse_statement() {
                statements.push(stmt);
            }
            self.next_token();
        }
        Statement::Block { statements, line }
    }

    /// Skips tokens until the next `;` or EOF, so a malformed statement
    /// doesn't desynchronize the rest of the program.
    fn skip_until_semicolon(&mut self) -> Option<Statement> {
        while self.cur_token.kind != TokenKind::Semicolon && self.cur_token.kind != TokenKind::Eof
        {
            self.next_token();
        }
        None
    }

    fn parse_expression(&mut self, precedence: Precedence) -> Option<Expression> {
        let mut left = self.parse_prefix()?;

        while self.peek_token.kind != TokenKind::Semicolon && precedence < self.peek_precedence() {
            left = match self.peek_token.kind {
                TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::Slash
                | TokenKind::Asterisk
                | TokenKind::Eq
                | TokenKind::NotEq
                | TokenKind::Lt
                | TokenKind::Gt
                | TokenKind::LtEq
                | TokenKind::GtEq => {
                    self.next_token();
                    self.parse_infix_expression(left)?
                }
                TokenKind::LParen => {
                    self.next_token();
                    self.parse_call_expression(left)?
                }
                TokenKind::LBracket => {
                    self.next_token();
                    self.parse_index_expression(left)?
                }
                _ => return Some(left),
            };
        }
        Some(left)
    }

    fn parse_prefix(&mut self) -> Option<Expression> {
        match self.cur_token.kind {
            TokenKind::Ident => Some(Expression::Identifier(Identifier {
                name: self.cur_token.literal.clone(),
                line: self.cur_token.line,
            })),
            TokenKind::Int => self.parse_integer_literal(),
            TokenKind::Str => Some(Expression::StringLiteral {
                value: self.cur_token.literal.clone(),
                line: self.cur_token.line,
            }),
            TokenKind::True | TokenKind::False => Some(Expression::Boolean {
                value: self.cur_token.kind == TokenKind::True,
                line: self.cur_token.line,
            }),
            TokenKind::Bang | TokenKind::Minus => self.parse_prefix_expression(),
            TokenKind::LParen => self.parse_grouped_expression(),
            TokenKind::LBracket => self.parse_array_literal(),
            TokenKind::LBrace => self.parse_hash_literal(),
            TokenKind::If => self.parse_if_expression(),
            TokenKind::Function => self.parse_function_literal(),
            kind => {
                let line = self.cur_token.line;
                self.error(line, format!("no prefix parse function for {:?} found", kind));
                None
            }
        }
    }

    fn parse_integer_literal(&mut self) -> Option<Expression> {
        let line = self.cur_token.line;
        match self.cur_token.literal.parse::<i64>() {
            Ok(value) => Some(Expression::IntegerLiteral { value, line }),
            Err(_) => {
                self.error(
                    line,
                    format!("could not parse {:?} as integer", self.cur_token.literal),
                );
                None
            }
        }
    }

    fn parse_prefix_expression(&mut self) -> Option<Expression> {
        let line = self.cur_token.line;
        let op = match self.cur_token.kind {
            TokenKind::Bang => PrefixOp::Bang,
            TokenKind::Minus => PrefixOp::Minus,
            _ => unreachable!(),
        };
        self.next_token();
        let right = self.parse_expression(Precedence::Prefix)?;
        Some(Expression::Prefix {
            op,
            right: Box::new(right),
            line,
        })
    }

    fn parse_infix_expression(&mut self, left: Expression) -> Option<Expression> {
        let line = self.cur_token.line;
        let op = match self.cur_token.kind {
            TokenKind::Plus => InfixOp::Add,
            TokenKind::Minus => InfixOp::Sub,
            TokenKind::Asterisk => InfixOp::Mul,
            TokenKind::Slash => InfixOp::Div,
            TokenKind::Eq => InfixOp::Eq,
            TokenKind::NotEq => InfixOp::NotEq,
            TokenKind::Lt => InfixOp::Lt,
            TokenKind::Gt => InfixOp::Gt,
            TokenKind::LtEq => InfixOp::LtEq,
            TokenKind::GtEq => InfixOp::GtEq,
            _ => unreachable!(),
        };
        let precedence = self.cur_precedence();
        self.next_token();
        let right = self.parse_expression(precedence)?;
        Some(Expression::Infix {
            op,
            left: Box::new(left),
            right: Box::new(right),
            line,
        })
    }

    fn parse_grouped_expression(&mut self) -> Option<Expression> {
        self.next_token();
        let expr = self.parse_expression(Precedence::Lowest)?;
        if !self.expect_peek(TokenKind::RParen) {
            return None;
        }
        Some(expr)
    }

    fn parse_if_expression(&mut self) -> Option<Expression> {
        let line = self.cur_token.line;
        if !self.expect_peek(TokenKind::LParen) {
            return None;
        }
        self.next_token();
        let condition = self.parse_expression(Precedence::Lowest)?;
        if !self.expect_peek(TokenKind::RParen) {
            return None;
        }
        if !self.expect_peek(TokenKind::LBrace) {
            return None;
        }
        let consequence = self.parse_block_statement();

        let alternative = if self.peek_token.kind == TokenKind::Else {
            self.next_token();
            if !self.expect_peek(TokenKind::LBrace) {
                return None;
            }
            Some(Box::new(self.parse_block_statement()))
        } else {
            None
        };

        Some(Expression::If {
            condition: Box::new(condition),
            consequence: Box::new(consequence),
            alternative,
            line,
        })
    }

    fn parse_function_literal(&mut self) -> Option<Expression> {
        let line = self.cur_token.line;
        if !self.expect_peek(TokenKind::LParen) {
            return None;
        }
        let params = self.parse_function_parameters();
        if !self.expect_peek(TokenKind::LBrace) {
            return None;
        }
        let body = self.parse_block_statement();
        Some(Expression::FunctionLiteral {
            name: None,
            params,
            body: Box::new(body),
            line,
        })
    }

    fn parse_function_parameters(&mut self) -> Vec<Identifier> {
        let mut identifiers = Vec::new();

        if self.peek_token.kind == TokenKind::RParen {
            self.next_token();
            return identifiers;
        }

        self.next_token();
        identifiers.push(Identifier {
            name: self.cur_token.literal.clone(),
            line: self.cur_token.line,
        });

        while self.peek_token.kind == TokenKind::Comma {
            self.next_token();
            self.next_token();
            identifiers.push(Identifier {
                name: self.cur_token.literal.clone(),
                line: self.cur_token.line,
            });
        }

        if !self.expect_peek(TokenKind::RParen) {
            return Vec::new();
        }
        identifiers
    }

    fn parse_call_expression(&mut self, function: Expression) -> Option<Expression> {
        let line = self.cur_token.line;
        let arguments = self.parse_expression_list(TokenKind::RParen)?;
        Some(Expression::Call {
            function: Box::new(function),
            arguments,
            line,
        })
    }

    fn parse_array_literal(&mut self) -> Option<Expression> {
        let line = self.cur_token.line;
        let elements = self.parse_expression_list(TokenKind::RBracket)?;
        Some(Expression::ArrayLiteral { elements, line })
    }

    fn parse_index_expression(&mut self, left: Expression) -> Option<Expression> {
        let line = self.cur_token.line;
        self.next_token();
        let index = self.parse_expression(Precedence::Lowest)?;
        if !self.expect_peek(TokenKind::RBracket) {
            return None;
        }
        Some(Expression::Index {
            left: Box::new(left),
            index: Box::new(index),
            line,
        })
    }

    fn parse_hash_literal(&mut self) -> Option<Expression> {
        let line = self.cur_token.line;
        let mut pairs = Vec::new();

        while self.peek_token.kind != TokenKind::RBrace {
            self.next_token();
            let key = self.parse_expression(Precedence::Lowest)?;

            if !self.expect_peek(TokenKind::Colon) {
                return None;
            }

            self.next_token();
            let value = self.parse_expression(Precedence::Lowest)?;
            pairs.push((key, value));

            if self.peek_token.kind != TokenKind::RBrace && !self.expect_peek(TokenKind::Comma) {
                return None;
            }
        }

        if !self.expect_peek(TokenKind::RBrace) {
            return None;
        }
        Some(Expression::HashLiteral { pairs, line })
    }

    fn parse_expression_list(&mut self, end: TokenKind) -> Option<Vec<Expression>> {
        let mut list = Vec::new();

        if self.peek_token.kind == end {
            self.next_token();
            return Some(list);
        }

        self.next_token();
        list.push(self.parse_expression(Precedence::Lowest)?);

        while self.peek_token.kind == TokenKind::Comma {
            self.next_token();
            self.next_token();
            list.push(self.parse_expression(Precedence::Lowest)?);
        }

        if !self.expect_peek(end) {
            return None;
        }
        Some(list)
    }
}

/// If `value` is an unnamed function literal, stamps it with `name` so the
/// compiler can emit `CurrentClosure` for direct recursive self-reference.
fn name_function_literal(value: Expression, name: &str) -> Expression {
    match value {
        Expression::FunctionLiteral {
            name: None,
            params,
            body,
            line,
        } => Expression::FunctionLiteral {
            name: Some(name.to_string()),
            params,
            body,
            line,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(input: &str) -> Program {
        Parser::from_source(input)
            .parse_program()
            .unwrap_or_else(|errs| panic!("parser errors: {:?}", errs))
    }

    #[test]
    fn parses_let_statements() {
        let program = parse_ok("let x = 5; let y = true; let foobar = y;");
        assert_eq!(program.statements.len(), 3);
        match &program.statements[0] {
            Statement::Let { name, .. } => assert_eq!(name.name, "x"),
            other => panic!("expected let, got {:?}", other),
        }
    }

    #[test]
    fn parses_operator_precedence() {
        let program = parse_ok("1 + 2 * 3");
        match &program.statements[0] {
            Statement::Expression { expr, .. } => match expr {
                Expression::Infix { op: InfixOp::Add, right, .. } => {
                    assert!(matches!(**right, Expression::Infix { op: InfixOp::Mul, .. }));
                }
                other => panic!("unexpected expression: {:?}", other),
            },
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn parses_less_than_or_equal_as_distinct_token() {
        let program = parse_ok("1 <= 2;");
        match &program.statements[0] {
            Statement::Expression { expr, .. } => {
                assert!(matches!(expr, Expression::Infix { op: InfixOp::LtEq, .. }));
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn names_recursive_function_literal_from_let_binding() {
        let program = parse_ok("let fib = fn(x) { x };");
        match &program.statements[0] {
            Statement::Let { value, .. } => match value {
                Expression::FunctionLiteral { name, .. } => {
                    assert_eq!(name.as_deref(), Some("fib"));
                }
                other => panic!("expected function literal, got {:?}", other),
            },
            other => panic!("expected let, got {:?}", other),
        }
    }

    #[test]
    fn accumulates_multiple_errors_and_keeps_going() {
        let errs = Parser::from_source("let = 5; let y 10; let z = 1;")
            .parse_program()
            .unwrap_err();
        assert!(errs.len() >= 2);
    }

    #[test]
    fn parses_array_and_hash_literals() {
        let program = parse_ok(r#"[1, 2 * 2, 3 + 3]; {"one": 1, "two": 2}"#);
        assert!(matches!(
            &program.statements[0],
            Statement::Expression {
                expr: Expression::ArrayLiteral { .. },
                ..
            }
        ));
        assert!(matches!(
            &program.statements[1],
            Statement::Expression {
                expr: Expression::HashLiteral { .. },
                ..
            }
        ));
    }
}
