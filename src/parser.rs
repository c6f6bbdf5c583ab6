use log::debug;

use crate::{
    ast::{
        ArrowBody, AssignOp, BinaryOp, Expr, ExprKind, LogicalOp, Pos, Program, Property, Stmt,
        StmtKind, SwitchCase, UnaryOp,
    },
    error::{syntax_error, Error, Result},
    tokenizer::{Token, TokenKind},
};

/// Parses a token sequence into a `Program`, failing on the first error.
pub fn parse(tokens: &[Token]) -> Result<Program> {
    assert!(
        tokens.last().is_some_and(|t| t.kind == TokenKind::Eof),
        "token slice must be terminated by Eof"
    );

    let mut parser = Parser::new(tokens);
    let mut body = Vec::new();

    parser.skip_separators();
    while !parser.at_eof() {
        parser.complexity = 0;
        body.push(parser.statement()?);
        parser.skip_separators();
    }

    Ok(Program { body })
}

/// Best-effort parse that accumulates every `SyntaxError` instead of
/// stopping at the first, resynchronizing at statement boundaries. Meant for
/// diagnostic tooling only; execution always goes through [`parse`].
pub fn parse_with_recovery(tokens: &[Token]) -> (Program, Vec<Error>) {
    assert!(
        tokens.last().is_some_and(|t| t.kind == TokenKind::Eof),
        "token slice must be terminated by Eof"
    );

    let mut parser = Parser::new(tokens);
    let mut body = Vec::new();
    let mut errors = Vec::new();

    parser.skip_separators();
    while !parser.at_eof() {
        parser.complexity = 0;
        match parser.statement() {
            Ok(stmt) => body.push(stmt),
            Err(err) => {
                debug!("recovered from {}", err);
                errors.push(err);
                parser.synchronize();
            }
        }
        parser.skip_separators();
    }

    (Program { body }, errors)
}

/// Recursive descent mirrors source nesting on the host stack, so nesting
/// depth is capped long before the stack is threatened.
const MAX_NESTING_DEPTH: usize = 256;

/// The left-associative operator and postfix loops are iterative but grow
/// the tree one level per operand, so a separate per-statement budget caps
/// how tall any one statement's tree can get. Everything downstream that
/// walks a tree recursively (evaluation, cloning a function body, teardown)
/// is bounded by it.
const MAX_STATEMENT_COMPLEXITY: usize = 5_000;

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
    complexity: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Parser {
            tokens,
            pos: 0,
            depth: 0,
            complexity: 0,
        }
    }

    /// Incremented on entry to every recursion point; `depth` only moves
    /// past the increment on success, so error paths stay balanced.
    fn enter_nested(&mut self) -> Result<()> {
        if self.depth >= MAX_NESTING_DEPTH {
            return self.error_here("statement or expression nesting too deep");
        }
        self.depth += 1;
        Ok(())
    }

    /// Charged once per operator/postfix chain link. Only reset between
    /// top-level statements, so nested function bodies cannot renew it.
    fn charge_complexity(&mut self) -> Result<()> {
        self.complexity += 1;
        if self.complexity > MAX_STATEMENT_COMPLEXITY {
            return self.error_here("statement too complex");
        }
        Ok(())
    }

    fn peek(&self) -> &Token {
        // The trailing Eof token is never consumed, so this cannot go past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn pos_here(&self) -> Pos {
        let token = self.peek();
        Pos::new(token.line, token.column)
    }

    fn at_eof(&self) -> bool {
        self.peek_kind() == &TokenKind::Eof
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, expected: &str) -> Result<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            self.error_here(format!("expected {}", expected))
        }
    }

    fn error_here<T>(&self, message: impl Into<String>) -> Result<T> {
        let token = self.peek();
        syntax_error(message, token.line, token.column)
    }

    fn skip_newlines(&mut self) {
        while self.check(&TokenKind::NewLine) {
            self.advance();
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek_kind(), TokenKind::NewLine | TokenKind::Semicolon) {
            self.advance();
        }
    }

    /// Skips ahead to the next statement boundary after a parse error.
    fn synchronize(&mut self) {
        while !self.at_eof() {
            match self.peek_kind() {
                TokenKind::NewLine | TokenKind::Semicolon => {
                    self.advance();
                    return;
                }
                TokenKind::RightBrace => {
                    self.advance();
                    return;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    /// Expression statements and declarations end at `;`, a newline, `}`,
    /// or end of input; anything else is an error.
    fn expect_statement_end(&mut self) -> Result<()> {
        match self.peek_kind() {
            TokenKind::Semicolon | TokenKind::NewLine => {
                self.advance();
                Ok(())
            }
            TokenKind::RightBrace | TokenKind::Eof => Ok(()),
            _ => self.error_here("expected newline or ';' after statement"),
        }
    }

    fn statement(&mut self) -> Result<Stmt> {
        self.enter_nested()?;
        let result = self.statement_kind();
        self.depth -= 1;
        result
    }

    fn statement_kind(&mut self) -> Result<Stmt> {
        let pos = self.pos_here();
        match self.peek_kind() {
            TokenKind::If => self.if_statement(pos),
            TokenKind::While => self.while_statement(pos),
            TokenKind::For => self.for_statement(pos),
            TokenKind::Return => self.return_statement(pos),
            TokenKind::Break => {
                self.advance();
                self.expect_statement_end()?;
                Ok(Stmt {
                    kind: StmtKind::Break,
                    pos,
                })
            }
            TokenKind::Continue => {
                self.advance();
                self.expect_statement_end()?;
                Ok(Stmt {
                    kind: StmtKind::Continue,
                    pos,
                })
            }
            TokenKind::Var | TokenKind::Const => self.variable_declaration(pos),
            TokenKind::Function => self.function_declaration(pos),
            TokenKind::Switch => self.switch_statement(pos),
            TokenKind::LeftBrace => {
                let body = self.block()?;
                Ok(Stmt {
                    kind: StmtKind::Block(body),
                    pos,
                })
            }
            _ => {
                let expr = self.expression()?;
                self.expect_statement_end()?;
                Ok(Stmt {
                    kind: StmtKind::Expression(expr),
                    pos,
                })
            }
        }
    }

    /// `{ stmt* }` with newlines and semicolons as separators.
    fn block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(&TokenKind::LeftBrace, "'{'")?;
        let mut body = Vec::new();

        self.skip_separators();
        while !self.check(&TokenKind::RightBrace) {
            if self.at_eof() {
                return self.error_here("expected '}' to close block");
            }
            body.push(self.statement()?);
            self.skip_separators();
        }
        self.advance(); // '}'

        Ok(body)
    }

    /// Parses the body of an `if`/`while`/`for`, allowing it on the next line.
    fn nested_statement(&mut self) -> Result<Stmt> {
        self.skip_newlines();
        self.statement()
    }

    /// Checks for a token that may sit after the newline ending the previous
    /// statement, e.g. `else` on the line after a closing brace.
    fn eat_past_newlines(&mut self, kind: &TokenKind) -> bool {
        let mut lookahead = self.pos;
        while self.tokens[lookahead].kind == TokenKind::NewLine {
            lookahead += 1;
        }
        if &self.tokens[lookahead].kind == kind {
            self.pos = lookahead + 1;
            true
        } else {
            false
        }
    }

    fn if_statement(&mut self, pos: Pos) -> Result<Stmt> {
        self.advance(); // 'if'
        self.expect(&TokenKind::LeftParen, "'(' after 'if'")?;
        self.skip_newlines();
        let condition = self.expression()?;
        self.skip_newlines();
        self.expect(&TokenKind::RightParen, "')' after condition")?;

        let consequent = Box::new(self.nested_statement()?);
        let alternate = if self.eat_past_newlines(&TokenKind::Else) {
            Some(Box::new(self.nested_statement()?))
        } else {
            None
        };

        Ok(Stmt {
            kind: StmtKind::If {
                condition,
                consequent,
                alternate,
            },
            pos,
        })
    }

    fn while_statement(&mut self, pos: Pos) -> Result<Stmt> {
        self.advance(); // 'while'
        self.expect(&TokenKind::LeftParen, "'(' after 'while'")?;
        self.skip_newlines();
        let condition = self.expression()?;
        self.skip_newlines();
        self.expect(&TokenKind::RightParen, "')' after condition")?;
        let body = Box::new(self.nested_statement()?);

        Ok(Stmt {
            kind: StmtKind::While { condition, body },
            pos,
        })
    }

    /// `for (init; test; update) body`: each clause optional, both
    /// semicolons mandatory.
    fn for_statement(&mut self, pos: Pos) -> Result<Stmt> {
        self.advance(); // 'for'
        self.expect(&TokenKind::LeftParen, "'(' after 'for'")?;
        self.skip_newlines();

        let init = if self.check(&TokenKind::Semicolon) {
            None
        } else if matches!(self.peek_kind(), TokenKind::Var | TokenKind::Const) {
            let init_pos = self.pos_here();
            Some(Box::new(self.variable_declarator(init_pos)?))
        } else {
            let expr_pos = self.pos_here();
            let expr = self.expression()?;
            Some(Box::new(Stmt {
                kind: StmtKind::Expression(expr),
                pos: expr_pos,
            }))
        };
        self.expect(&TokenKind::Semicolon, "';' after for-loop initializer")?;
        self.skip_newlines();

        let test = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(&TokenKind::Semicolon, "';' after for-loop condition")?;
        self.skip_newlines();

        let update = if self.check(&TokenKind::RightParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(&TokenKind::RightParen, "')' after for-loop clauses")?;

        let body = Box::new(self.nested_statement()?);

        Ok(Stmt {
            kind: StmtKind::For {
                init,
                test,
                update,
                body,
            },
            pos,
        })
    }

    fn return_statement(&mut self, pos: Pos) -> Result<Stmt> {
        self.advance(); // 'return'
        let value = if matches!(
            self.peek_kind(),
            TokenKind::Semicolon | TokenKind::NewLine | TokenKind::RightBrace | TokenKind::Eof
        ) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_statement_end()?;

        Ok(Stmt {
            kind: StmtKind::Return(value),
            pos,
        })
    }

    fn variable_declaration(&mut self, pos: Pos) -> Result<Stmt> {
        let stmt = self.variable_declarator(pos)?;
        self.expect_statement_end()?;
        Ok(stmt)
    }

    /// The declaration proper, without the trailing terminator; reused by
    /// `for`-loop initializers.
    fn variable_declarator(&mut self, pos: Pos) -> Result<Stmt> {
        let constant = self.advance().kind == TokenKind::Const;
        let name = self.identifier_name("variable name")?;

        let init = if self.eat(&TokenKind::Equal) {
            self.skip_newlines();
            Some(self.expression()?)
        } else if constant {
            return self.error_here("const declaration requires an initializer");
        } else {
            None
        };

        Ok(Stmt {
            kind: StmtKind::VariableDeclaration {
                name,
                init,
                constant,
            },
            pos,
        })
    }

    fn function_declaration(&mut self, pos: Pos) -> Result<Stmt> {
        self.advance(); // 'function'
        let name = self.identifier_name("function name")?;
        self.expect(&TokenKind::LeftParen, "'(' after function name")?;
        let params = self.parameter_list()?;
        self.skip_newlines();
        let body = self.block()?;

        Ok(Stmt {
            kind: StmtKind::FunctionDeclaration { name, params, body },
            pos,
        })
    }

    fn parameter_list(&mut self) -> Result<Vec<String>> {
        let mut params = Vec::new();

        self.skip_newlines();
        while !self.check(&TokenKind::RightParen) {
            if !params.is_empty() {
                self.expect(&TokenKind::Comma, "',' between parameters")?;
                self.skip_newlines();
                if self.check(&TokenKind::RightParen) {
                    return self.error_here("trailing comma in parameter list");
                }
            }
            params.push(self.identifier_name("parameter name")?);
            self.skip_newlines();
        }
        self.advance(); // ')'

        Ok(params)
    }

    fn switch_statement(&mut self, pos: Pos) -> Result<Stmt> {
        self.advance(); // 'switch'
        self.expect(&TokenKind::LeftParen, "'(' after 'switch'")?;
        self.skip_newlines();
        let discriminant = self.expression()?;
        self.skip_newlines();
        self.expect(&TokenKind::RightParen, "')' after switch value")?;
        self.skip_newlines();
        self.expect(&TokenKind::LeftBrace, "'{' to open switch body")?;

        let mut cases = Vec::new();
        let mut seen_default = false;

        self.skip_separators();
        while !self.check(&TokenKind::RightBrace) {
            let case_pos = self.pos_here();
            let test = match self.peek_kind() {
                TokenKind::Case => {
                    self.advance();
                    Some(self.expression()?)
                }
                TokenKind::Default => {
                    if seen_default {
                        return self.error_here("duplicate 'default' case");
                    }
                    seen_default = true;
                    self.advance();
                    None
                }
                _ => return self.error_here("expected 'case' or 'default' in switch body"),
            };
            self.expect(&TokenKind::Colon, "':' after case label")?;

            let mut body = Vec::new();
            self.skip_separators();
            while !matches!(
                self.peek_kind(),
                TokenKind::Case | TokenKind::Default | TokenKind::RightBrace | TokenKind::Eof
            ) {
                body.push(self.statement()?);
                self.skip_separators();
            }

            cases.push(SwitchCase {
                test,
                body,
                pos: case_pos,
            });
        }
        self.expect(&TokenKind::RightBrace, "'}' to close switch body")?;

        Ok(Stmt {
            kind: StmtKind::Switch {
                discriminant,
                cases,
            },
            pos,
        })
    }

    fn identifier_name(&mut self, expected: &str) -> Result<String> {
        match self.peek_kind() {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => self.error_here(format!("expected {}", expected)),
        }
    }

    // Expression levels, lowest binding strength first.

    fn expression(&mut self) -> Result<Expr> {
        self.enter_nested()?;
        let result = self.assignment();
        self.depth -= 1;
        result
    }

    fn assignment(&mut self) -> Result<Expr> {
        let expr = self.conditional()?;

        let operator = match self.peek_kind() {
            TokenKind::Equal => AssignOp::Assign,
            TokenKind::PlusEqual => AssignOp::AddAssign,
            TokenKind::MinusEqual => AssignOp::SubAssign,
            _ => return Ok(expr),
        };

        if !matches!(
            expr.kind,
            ExprKind::Identifier(_) | ExprKind::Member { .. }
        ) {
            return self.error_here("invalid assignment target");
        }

        let pos = expr.pos;
        self.advance();
        self.skip_newlines();
        let value = self.assignment()?; // right-associative

        Ok(Expr {
            kind: ExprKind::Assignment {
                operator,
                target: Box::new(expr),
                value: Box::new(value),
            },
            pos,
        })
    }

    /// Postfix conditional: `consequent if test else alternate`.
    fn conditional(&mut self) -> Result<Expr> {
        let consequent = self.logical_or()?;

        if !self.eat(&TokenKind::If) {
            return Ok(consequent);
        }
        self.skip_newlines();
        let test = self.logical_or()?;
        self.skip_newlines();
        self.expect(&TokenKind::Else, "'else' in conditional expression")?;
        self.skip_newlines();
        let alternate = self.conditional()?;

        let pos = consequent.pos;
        Ok(Expr {
            kind: ExprKind::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            },
            pos,
        })
    }

    fn logical_or(&mut self) -> Result<Expr> {
        let mut left = self.logical_and()?;
        while self.eat(&TokenKind::Or) {
            self.charge_complexity()?;
            self.skip_newlines();
            let right = self.logical_and()?;
            let pos = left.pos;
            left = Expr {
                kind: ExprKind::Logical {
                    operator: LogicalOp::Or,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                pos,
            };
        }
        Ok(left)
    }

    fn logical_and(&mut self) -> Result<Expr> {
        let mut left = self.equality()?;
        while self.eat(&TokenKind::And) {
            self.charge_complexity()?;
            self.skip_newlines();
            let right = self.equality()?;
            let pos = left.pos;
            left = Expr {
                kind: ExprKind::Logical {
                    operator: LogicalOp::And,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                pos,
            };
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr> {
        let mut left = self.relational()?;
        loop {
            let operator = match self.peek_kind() {
                TokenKind::EqualEqual => BinaryOp::Equal,
                TokenKind::BangEqual => BinaryOp::NotEqual,
                _ => break,
            };
            self.charge_complexity()?;
            self.advance();
            self.skip_newlines();
            let right = self.relational()?;
            let pos = left.pos;
            left = Expr {
                kind: ExprKind::Binary {
                    operator,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                pos,
            };
        }
        Ok(left)
    }

    fn relational(&mut self) -> Result<Expr> {
        let mut left = self.additive()?;
        loop {
            let operator = match self.peek_kind() {
                TokenKind::Less => BinaryOp::Less,
                TokenKind::LessEqual => BinaryOp::LessEqual,
                TokenKind::Greater => BinaryOp::Greater,
                TokenKind::GreaterEqual => BinaryOp::GreaterEqual,
                _ => break,
            };
            self.charge_complexity()?;
            self.advance();
            self.skip_newlines();
            let right = self.additive()?;
            let pos = left.pos;
            left = Expr {
                kind: ExprKind::Binary {
                    operator,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                pos,
            };
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            let operator = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Subtract,
                _ => break,
            };
            self.charge_complexity()?;
            self.advance();
            self.skip_newlines();
            let right = self.multiplicative()?;
            let pos = left.pos;
            left = Expr {
                kind: ExprKind::Binary {
                    operator,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                pos,
            };
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        loop {
            let operator = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Multiply,
                TokenKind::Slash => BinaryOp::Divide,
                TokenKind::Percent => BinaryOp::Modulo,
                _ => break,
            };
            self.charge_complexity()?;
            self.advance();
            self.skip_newlines();
            let right = self.unary()?;
            let pos = left.pos;
            left = Expr {
                kind: ExprKind::Binary {
                    operator,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                pos,
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        // Prefix chains recurse without passing through `expression`.
        self.enter_nested()?;
        let result = self.unary_operator();
        self.depth -= 1;
        result
    }

    fn unary_operator(&mut self) -> Result<Expr> {
        let operator = match self.peek_kind() {
            TokenKind::Not => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Negate,
            TokenKind::Plus => UnaryOp::Plus,
            _ => return self.power(),
        };
        let pos = self.pos_here();
        self.advance();
        self.skip_newlines();
        let operand = self.unary()?;

        Ok(Expr {
            kind: ExprKind::Unary {
                operator,
                operand: Box::new(operand),
            },
            pos,
        })
    }

    /// Right-associative `^`; the exponent re-enters `unary` so `2 ^ -3`
    /// parses, while `-2 ^ 2` negates the whole power.
    fn power(&mut self) -> Result<Expr> {
        let base = self.postfix()?;

        if !self.eat(&TokenKind::Caret) {
            return Ok(base);
        }
        self.skip_newlines();
        let exponent = self.unary()?;

        let pos = base.pos;
        Ok(Expr {
            kind: ExprKind::Binary {
                operator: BinaryOp::Power,
                left: Box::new(base),
                right: Box::new(exponent),
            },
            pos,
        })
    }

    /// `a(b)[c].d(e)` parses as a left-to-right chain.
    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;

        loop {
            match self.peek_kind() {
                TokenKind::LeftParen => {
                    self.charge_complexity()?;
                    self.advance();
                    let arguments = self.argument_list()?;
                    let pos = expr.pos;
                    expr = Expr {
                        kind: ExprKind::Call {
                            callee: Box::new(expr),
                            arguments,
                        },
                        pos,
                    };
                }
                TokenKind::Dot => {
                    self.charge_complexity()?;
                    self.advance();
                    let prop_pos = self.pos_here();
                    let name = self.identifier_name("property name after '.'")?;
                    let pos = expr.pos;
                    expr = Expr {
                        kind: ExprKind::Member {
                            object: Box::new(expr),
                            property: Box::new(Expr {
                                kind: ExprKind::String(name),
                                pos: prop_pos,
                            }),
                            computed: false,
                        },
                        pos,
                    };
                }
                TokenKind::LeftSquare => {
                    self.charge_complexity()?;
                    self.advance();
                    self.skip_newlines();
                    let index = self.expression()?;
                    self.skip_newlines();
                    self.expect(&TokenKind::RightSquare, "']' after index")?;
                    let pos = expr.pos;
                    expr = Expr {
                        kind: ExprKind::Member {
                            object: Box::new(expr),
                            property: Box::new(index),
                            computed: true,
                        },
                        pos,
                    };
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    fn argument_list(&mut self) -> Result<Vec<Expr>> {
        let mut arguments = Vec::new();

        self.skip_newlines();
        while !self.check(&TokenKind::RightParen) {
            if !arguments.is_empty() {
                self.expect(&TokenKind::Comma, "',' between arguments")?;
                self.skip_newlines();
                if self.check(&TokenKind::RightParen) {
                    return self.error_here("trailing comma in argument list");
                }
            }
            arguments.push(self.expression()?);
            self.skip_newlines();
        }
        self.advance(); // ')'

        Ok(arguments)
    }

    fn primary(&mut self) -> Result<Expr> {
        let pos = self.pos_here();
        match self.peek_kind().clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr {
                    kind: ExprKind::Number(n),
                    pos,
                })
            }
            TokenKind::String(s) => {
                self.advance();
                Ok(Expr {
                    kind: ExprKind::String(s),
                    pos,
                })
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr {
                    kind: ExprKind::Boolean(true),
                    pos,
                })
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr {
                    kind: ExprKind::Boolean(false),
                    pos,
                })
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr {
                    kind: ExprKind::Null,
                    pos,
                })
            }
            TokenKind::Identifier(name) => {
                self.advance();
                if self.check(&TokenKind::Arrow) {
                    return self.arrow_function(name, pos);
                }
                Ok(Expr {
                    kind: ExprKind::Identifier(name),
                    pos,
                })
            }
            TokenKind::Function => {
                self.advance();
                let name = match self.peek_kind() {
                    TokenKind::Identifier(name) => {
                        let name = name.clone();
                        self.advance();
                        Some(name)
                    }
                    _ => None,
                };
                self.expect(&TokenKind::LeftParen, "'(' after 'function'")?;
                let params = self.parameter_list()?;
                self.skip_newlines();
                let body = self.block()?;
                Ok(Expr {
                    kind: ExprKind::Function { name, params, body },
                    pos,
                })
            }
            TokenKind::LeftParen => {
                self.advance();
                self.skip_newlines();
                let expr = self.expression()?;
                self.skip_newlines();
                self.expect(&TokenKind::RightParen, "')' after expression")?;
                Ok(expr)
            }
            TokenKind::LeftSquare => self.array_literal(pos),
            TokenKind::LeftBrace => self.object_literal(pos),
            _ => self.error_here("expected expression"),
        }
    }

    /// Single bare parameter followed by `->` and an expression or block body.
    fn arrow_function(&mut self, param: String, pos: Pos) -> Result<Expr> {
        self.advance(); // '->'
        self.skip_newlines();

        let body = if self.check(&TokenKind::LeftBrace) {
            ArrowBody::Block(self.block()?)
        } else {
            ArrowBody::Expr(Box::new(self.assignment()?))
        };

        Ok(Expr {
            kind: ExprKind::ArrowFunction { param, body },
            pos,
        })
    }

    fn array_literal(&mut self, pos: Pos) -> Result<Expr> {
        self.advance(); // '['
        let mut elements = Vec::new();

        self.skip_newlines();
        while !self.check(&TokenKind::RightSquare) {
            if !elements.is_empty() {
                self.expect(&TokenKind::Comma, "',' between array elements")?;
                self.skip_newlines();
                if self.check(&TokenKind::RightSquare) {
                    return self.error_here("trailing comma in array literal");
                }
            }
            elements.push(self.expression()?);
            self.skip_newlines();
        }
        self.advance(); // ']'

        Ok(Expr {
            kind: ExprKind::Array(elements),
            pos,
        })
    }

    fn object_literal(&mut self, pos: Pos) -> Result<Expr> {
        self.advance(); // '{'
        let mut properties: Vec<Property> = Vec::new();

        self.skip_newlines();
        while !self.check(&TokenKind::RightBrace) {
            if !properties.is_empty() {
                self.expect(&TokenKind::Comma, "',' between object properties")?;
                self.skip_newlines();
                if self.check(&TokenKind::RightBrace) {
                    return self.error_here("trailing comma in object literal");
                }
            }

            let key = match self.peek_kind() {
                TokenKind::Identifier(name) => name.clone(),
                TokenKind::String(s) => s.clone(),
                _ => return self.error_here("expected property name"),
            };
            self.advance();
            self.expect(&TokenKind::Colon, "':' after property name")?;
            self.skip_newlines();
            let value = self.expression()?;
            properties.push(Property { key, value });
            self.skip_newlines();
        }
        self.advance(); // '}'

        Ok(Expr {
            kind: ExprKind::Object(properties),
            pos,
        })
    }
}
