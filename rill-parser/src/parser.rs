// rill-parser - Parser for the Rill scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Pratt (top-down operator precedence) parser producing a [`Program`].
//!
//! The parser never panics. Syntax errors are recorded as human-readable
//! `line:column: message` strings; the parser then synchronises on the next
//! statement boundary and keeps going, so a single pass reports as many
//! problems as it can.
//!
//! Internally every `parse_*` method maintains one invariant: on success the
//! current token is the *last* token of the construct just parsed. The
//! statement loops advance past it. This keeps one-line bodies such as
//! `func f(){return func(){return 1}}` unambiguous — a block never consumes
//! the brace of the block enclosing it.

use crate::ast::{
    AssignOp, BinaryOp, BlockStmt, ElseIfClause, Expr, ForBinding, ForStmt, FuncDecl, FuncExpr,
    IfStmt, ObjectField, ObjectKey, Param, Program, Stmt, UnaryOp,
};
use crate::lexer::Lexer;
use crate::token::{Position, Span, Token, TokenKind};

/// Binding strength, weakest first. Comparisons use declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Assign,
    Or,
    And,
    Equality,
    Relational,
    Sum,
    Product,
    Prefix,
    Call,
}

fn precedence_of(kind: TokenKind) -> Precedence {
    match kind {
        TokenKind::Assign | TokenKind::Define => Precedence::Assign,
        TokenKind::OrOr => Precedence::Or,
        TokenKind::AndAnd => Precedence::And,
        TokenKind::Equal | TokenKind::NotEqual => Precedence::Equality,
        TokenKind::Less | TokenKind::LessEqual | TokenKind::Greater | TokenKind::GreaterEqual => {
            Precedence::Relational
        }
        TokenKind::Plus | TokenKind::Minus => Precedence::Sum,
        TokenKind::Star | TokenKind::Slash => Precedence::Product,
        TokenKind::LParen | TokenKind::LBracket | TokenKind::Dot => Precedence::Call,
        _ => Precedence::Lowest,
    }
}

/// Parses a token stream into a program tree, accumulating errors.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    cur: Token,
    peek: Token,
    errors: Vec<String>,
}

impl<'a> Parser<'a> {
    /// Create a parser over an existing lexer.
    pub fn new(mut lexer: Lexer<'a>) -> Self {
        let cur = lexer.next_token();
        let peek = lexer.next_token();
        Parser {
            lexer,
            cur,
            peek,
            errors: Vec::new(),
        }
    }

    /// Create a parser directly from source text.
    pub fn from_source(source: &'a str) -> Self {
        Parser::new(Lexer::new(source))
    }

    /// The errors recorded so far, as `line:column: message` strings.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Consume the parser, returning its recorded errors.
    pub fn into_errors(self) -> Vec<String> {
        self.errors
    }

    /// Parse the whole input as a program.
    pub fn parse_program(&mut self) -> Program {
        let mut statements: Vec<Stmt> = Vec::new();
        self.skip_newlines();
        while self.cur.kind != TokenKind::Eof {
            match self.parse_statement() {
                Some(stmt) => {
                    statements.push(stmt);
                    if self.cur.kind != TokenKind::Eof {
                        self.next_token();
                    }
                }
                None => {
                    self.synchronize();
                    // A stray closing brace at top level would stall the
                    // loop; consume it.
                    if self.cur.kind == TokenKind::RBrace {
                        self.next_token();
                    }
                }
            }
            self.skip_newlines();
        }
        let span = match (statements.first(), statements.last()) {
            (Some(first), Some(last)) => first.span().to(last.span()),
            _ => Span::default(),
        };
        Program { statements, span }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_statement(&mut self) -> Option<Stmt> {
        match self.cur.kind {
            TokenKind::Func => self.parse_func_decl().map(Stmt::FuncDecl),
            TokenKind::Return => self.parse_return(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::LBrace => Some(Stmt::Block(self.parse_block())),
            _ => self.parse_expr_statement(),
        }
    }

    /// Parse a braced statement list. The current token must be `{`; on
    /// return it is the closing `}` (or end of input on error).
    fn parse_block(&mut self) -> BlockStmt {
        let start = self.cur.pos;
        self.next_token();
        self.skip_newlines();
        let mut statements: Vec<Stmt> = Vec::new();
        while self.cur.kind != TokenKind::RBrace && self.cur.kind != TokenKind::Eof {
            match self.parse_statement() {
                Some(stmt) => {
                    statements.push(stmt);
                    if self.cur.kind != TokenKind::Eof {
                        self.next_token();
                    }
                }
                None => self.synchronize(),
            }
            self.skip_newlines();
        }
        let end = if self.cur.kind == TokenKind::RBrace {
            self.cur.pos
        } else {
            self.error_at(self.cur.pos, "expected '}' to close block".to_string());
            statements
                .last()
                .map(|stmt| stmt.span().end)
                .unwrap_or(start)
        };
        BlockStmt {
            statements,
            span: Span::new(start, end),
        }
    }

    fn parse_expr_statement(&mut self) -> Option<Stmt> {
        let start = self.cur.pos;
        let expr = self.parse_expression(Precedence::Lowest)?;
        let span = Span::new(start, expr.span().end);
        Some(Stmt::Expr { expr, span })
    }

    fn parse_return(&mut self) -> Option<Stmt> {
        let start = self.cur.pos;
        let mut end = start;
        let value = if is_end_of_statement(self.peek.kind) {
            None
        } else {
            self.next_token();
            let value = self.parse_expression(Precedence::Lowest)?;
            end = value.span().end;
            Some(value)
        };
        Some(Stmt::Return {
            value,
            span: Span::new(start, end),
        })
    }

    fn parse_if(&mut self) -> Option<Stmt> {
        let start = self.cur.pos;
        let condition = self.parse_paren_condition()?;
        let consequent = self.parse_braced_block()?;
        let mut else_ifs: Vec<ElseIfClause> = Vec::new();

        loop {
            self.skip_peek_newlines();
            if self.peek.kind != TokenKind::ElseIf {
                break;
            }
            self.next_token();
            let clause_start = self.cur.pos;
            let condition = self.parse_paren_condition()?;
            let consequent = self.parse_braced_block()?;
            let span = Span::new(clause_start, consequent.span.end);
            else_ifs.push(ElseIfClause {
                condition,
                consequent,
                span,
            });
        }

        let alternative = if self.peek.kind == TokenKind::Else {
            self.next_token();
            Some(self.parse_braced_block()?)
        } else {
            None
        };

        let end = alternative
            .as_ref()
            .map(|block| block.span.end)
            .or_else(|| else_ifs.last().map(|clause| clause.span.end))
            .unwrap_or(consequent.span.end);
        Some(Stmt::If(IfStmt {
            condition,
            consequent,
            else_ifs,
            alternative,
            span: Span::new(start, end),
        }))
    }

    fn parse_while(&mut self) -> Option<Stmt> {
        let start = self.cur.pos;
        let condition = self.parse_paren_condition()?;
        let body = self.parse_braced_block()?;
        let span = Span::new(start, body.span.end);
        Some(Stmt::While {
            condition,
            body,
            span,
        })
    }

    fn parse_for(&mut self) -> Option<Stmt> {
        let start = self.cur.pos;
        if !self.expect_peek(TokenKind::LParen) {
            return None;
        }
        self.next_token(); // '('
        self.next_token(); // binding start
        let binding = self.parse_for_binding()?;
        if !self.expect_peek(TokenKind::In) {
            return None;
        }
        self.next_token(); // 'in'
        self.next_token(); // iterable start
        let iterable = self.parse_expression(Precedence::Lowest)?;
        if !self.expect_peek(TokenKind::RParen) {
            return None;
        }
        self.next_token(); // ')'
        let body = self.parse_braced_block()?;
        let span = Span::new(start, body.span.end);
        Some(Stmt::ForIn(ForStmt {
            binding,
            iterable,
            body,
            span,
        }))
    }

    fn parse_for_binding(&mut self) -> Option<ForBinding> {
        match self.cur.kind {
            TokenKind::Variable => Some(ForBinding {
                key: String::new(),
                value: self.cur.literal.clone(),
                span: Span::at(self.cur.pos),
            }),
            TokenKind::LBracket => {
                let start = self.cur.pos;
                if !self.expect_peek(TokenKind::Variable) {
                    return None;
                }
                self.next_token();
                let key = self.cur.literal.clone();
                if !self.expect_peek(TokenKind::Comma) {
                    return None;
                }
                self.next_token();
                if !self.expect_peek(TokenKind::Variable) {
                    return None;
                }
                self.next_token();
                let value = self.cur.literal.clone();
                if !self.expect_peek(TokenKind::RBracket) {
                    return None;
                }
                self.next_token();
                Some(ForBinding {
                    key,
                    value,
                    span: Span::new(start, self.cur.pos),
                })
            }
            _ => {
                self.error_at(self.cur.pos, "invalid for binding".to_string());
                None
            }
        }
    }

    fn parse_func_decl(&mut self) -> Option<FuncDecl> {
        let start = self.cur.pos;
        if !self.expect_peek(TokenKind::Ident) {
            return None;
        }
        self.next_token();
        let name = self.cur.literal.clone();
        let (params, body) = self.parse_func_signature()?;
        let span = Span::new(start, body.span.end);
        Some(FuncDecl {
            name,
            params,
            body,
            span,
        })
    }

    fn parse_func_expr(&mut self) -> Option<Expr> {
        let start = self.cur.pos;
        let (params, body) = self.parse_func_signature()?;
        let span = Span::new(start, body.span.end);
        Some(Expr::Func(FuncExpr { params, body, span }))
    }

    /// Parse `(params) { body }`; the current token is the one before `(`.
    fn parse_func_signature(&mut self) -> Option<(Vec<Param>, BlockStmt)> {
        if !self.expect_peek(TokenKind::LParen) {
            return None;
        }
        self.next_token(); // '('
        self.next_token(); // first parameter or ')'
        let params = self.parse_param_list()?;
        if self.cur.kind != TokenKind::RParen {
            if !self.expect_peek(TokenKind::RParen) {
                return None;
            }
            self.next_token();
        }
        let body = self.parse_braced_block()?;
        Some((params, body))
    }

    fn parse_param_list(&mut self) -> Option<Vec<Param>> {
        let mut params: Vec<Param> = Vec::new();
        if self.cur.kind == TokenKind::RParen {
            return Some(params);
        }
        if self.cur.kind != TokenKind::Variable {
            self.error_at(self.cur.pos, "expected parameter".to_string());
            return None;
        }
        params.push(Param {
            name: self.cur.literal.clone(),
            span: Span::at(self.cur.pos),
        });
        while self.peek.kind == TokenKind::Comma {
            self.next_token();
            self.next_token();
            if self.cur.kind != TokenKind::Variable {
                self.error_at(self.cur.pos, "expected parameter".to_string());
                return None;
            }
            params.push(Param {
                name: self.cur.literal.clone(),
                span: Span::at(self.cur.pos),
            });
        }
        Some(params)
    }

    /// Parse `( expression )` after a statement keyword; ends on `)`.
    fn parse_paren_condition(&mut self) -> Option<Expr> {
        if !self.expect_peek(TokenKind::LParen) {
            return None;
        }
        self.next_token(); // '('
        self.next_token(); // condition start
        let condition = self.parse_expression(Precedence::Lowest)?;
        if !self.expect_peek(TokenKind::RParen) {
            return None;
        }
        self.next_token(); // ')'
        Some(condition)
    }

    /// Skip newlines, then parse a `{ .. }` block; ends on `}`.
    fn parse_braced_block(&mut self) -> Option<BlockStmt> {
        self.skip_peek_newlines();
        if !self.expect_peek(TokenKind::LBrace) {
            return None;
        }
        self.next_token();
        Some(self.parse_block())
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn parse_expression(&mut self, precedence: Precedence) -> Option<Expr> {
        let mut left = match self.cur.kind {
            TokenKind::Ident => Expr::Ident {
                name: self.cur.literal.clone(),
                span: Span::at(self.cur.pos),
            },
            TokenKind::Variable => Expr::Variable {
                name: self.cur.literal.clone(),
                span: Span::at(self.cur.pos),
            },
            TokenKind::Number => Expr::Number {
                literal: self.cur.literal.clone(),
                span: Span::at(self.cur.pos),
            },
            TokenKind::Str => Expr::Str {
                value: self.cur.literal.clone(),
                span: Span::at(self.cur.pos),
            },
            TokenKind::True => Expr::Bool {
                value: true,
                span: Span::at(self.cur.pos),
            },
            TokenKind::False => Expr::Bool {
                value: false,
                span: Span::at(self.cur.pos),
            },
            TokenKind::Null => Expr::Null {
                span: Span::at(self.cur.pos),
            },
            TokenKind::Func => self.parse_func_expr()?,
            TokenKind::LParen => {
                self.next_token();
                let inner = self.parse_expression(Precedence::Lowest)?;
                if !self.expect_peek(TokenKind::RParen) {
                    return None;
                }
                self.next_token();
                inner
            }
            TokenKind::LBracket => self.parse_array_or_range()?,
            TokenKind::LBrace => self.parse_object_literal()?,
            TokenKind::Bang | TokenKind::Minus | TokenKind::Plus => self.parse_prefix_expr()?,
            _ => {
                self.error_at(
                    self.cur.pos,
                    format!("unexpected token {}", self.cur.kind),
                );
                return None;
            }
        };

        while !is_end_of_expression(self.peek.kind) && precedence < self.peek_precedence() {
            let op = self.peek.kind;
            self.next_token();
            left = match op {
                TokenKind::Assign | TokenKind::Define => self.parse_assign_expr(left)?,
                TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::Star
                | TokenKind::Slash
                | TokenKind::Equal
                | TokenKind::NotEqual
                | TokenKind::Less
                | TokenKind::LessEqual
                | TokenKind::Greater
                | TokenKind::GreaterEqual
                | TokenKind::AndAnd
                | TokenKind::OrOr => self.parse_infix_expr(left)?,
                TokenKind::LParen => self.parse_call_expr(left)?,
                TokenKind::Dot => self.parse_member_expr(left)?,
                TokenKind::LBracket => self.parse_index_expr(left)?,
                _ => return Some(left),
            };
        }

        Some(left)
    }

    fn parse_prefix_expr(&mut self) -> Option<Expr> {
        let start = self.cur.pos;
        let op = match self.cur.kind {
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Neg,
            _ => UnaryOp::Plus,
        };
        self.next_token();
        let operand = self.parse_expression(Precedence::Prefix)?;
        let span = Span::new(start, operand.span().end);
        Some(Expr::Unary {
            op,
            operand: Box::new(operand),
            span,
        })
    }

    fn parse_infix_expr(&mut self, left: Expr) -> Option<Expr> {
        let op = match self.cur.kind {
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Minus => BinaryOp::Sub,
            TokenKind::Star => BinaryOp::Mul,
            TokenKind::Slash => BinaryOp::Div,
            TokenKind::Equal => BinaryOp::Eq,
            TokenKind::NotEqual => BinaryOp::NotEq,
            TokenKind::Less => BinaryOp::Less,
            TokenKind::LessEqual => BinaryOp::LessEq,
            TokenKind::Greater => BinaryOp::Greater,
            TokenKind::GreaterEqual => BinaryOp::GreaterEq,
            TokenKind::AndAnd => BinaryOp::And,
            _ => BinaryOp::Or,
        };
        let precedence = precedence_of(self.cur.kind);
        self.next_token();
        let right = self.parse_expression(precedence)?;
        let span = left.span().to(right.span());
        Some(Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
            span,
        })
    }

    fn parse_assign_expr(&mut self, left: Expr) -> Option<Expr> {
        let op = if self.cur.kind == TokenKind::Define {
            AssignOp::Define
        } else {
            AssignOp::Assign
        };
        self.next_token();
        let value = self.parse_expression(Precedence::Lowest)?;
        let span = left.span().to(value.span());
        Some(Expr::Assign {
            target: Box::new(left),
            value: Box::new(value),
            op,
            span,
        })
    }

    fn parse_call_expr(&mut self, callee: Expr) -> Option<Expr> {
        self.next_token(); // first argument or ')'
        let args = self.parse_expression_list(TokenKind::RParen);
        let span = Span::new(callee.span().start, self.cur.pos);
        Some(Expr::Call {
            callee: Box::new(callee),
            args,
            span,
        })
    }

    fn parse_member_expr(&mut self, left: Expr) -> Option<Expr> {
        if !self.expect_peek(TokenKind::Ident) {
            return None;
        }
        self.next_token();
        let property = self.cur.literal.clone();
        let span = Span::new(left.span().start, self.cur.pos);
        Some(Expr::Member {
            target: Box::new(left),
            property,
            span,
        })
    }

    fn parse_index_expr(&mut self, left: Expr) -> Option<Expr> {
        self.next_token();
        let index = self.parse_expression(Precedence::Lowest)?;
        if !self.expect_peek(TokenKind::RBracket) {
            return None;
        }
        self.next_token();
        let span = Span::new(left.span().start, self.cur.pos);
        Some(Expr::Index {
            target: Box::new(left),
            index: Box::new(index),
            span,
        })
    }

    /// After `[`, the first expression decides: `..` makes this a range
    /// literal, anything else a comma-separated array (trailing comma
    /// allowed).
    fn parse_array_or_range(&mut self) -> Option<Expr> {
        let start = self.cur.pos;
        self.next_token();
        if self.cur.kind == TokenKind::RBracket {
            return Some(Expr::Array {
                elements: Vec::new(),
                span: Span::new(start, self.cur.pos),
            });
        }

        let first = self.parse_expression(Precedence::Lowest)?;
        if self.peek.kind == TokenKind::Range {
            self.next_token(); // '..'
            self.next_token(); // end expression start
            let end = self.parse_expression(Precedence::Lowest)?;
            if self.peek.kind != TokenKind::RBracket {
                self.error_at(self.cur.pos, "expected ']' to close range".to_string());
                return None;
            }
            self.next_token(); // ']'
            return Some(Expr::RangeLit {
                start: Box::new(first),
                end: Box::new(end),
                span: Span::new(start, self.cur.pos),
            });
        }

        let mut elements = vec![first];
        loop {
            if self.peek.kind == TokenKind::Comma {
                self.next_token(); // ','
                self.next_token(); // next element, or ']' after a trailing comma
                if self.cur.kind == TokenKind::RBracket {
                    break;
                }
                let element = self.parse_expression(Precedence::Lowest)?;
                elements.push(element);
                continue;
            }
            if self.peek.kind != TokenKind::RBracket {
                self.error_at(self.cur.pos, "expected ']' to close array".to_string());
                return None;
            }
            self.next_token(); // ']'
            break;
        }
        Some(Expr::Array {
            elements,
            span: Span::new(start, self.cur.pos),
        })
    }

    /// Braced `key: value` pairs; internal newlines are ignored and a
    /// trailing comma is allowed.
    fn parse_object_literal(&mut self) -> Option<Expr> {
        let start = self.cur.pos;
        self.next_token();
        self.skip_newlines();
        if self.cur.kind == TokenKind::RBrace {
            return Some(Expr::Object {
                fields: Vec::new(),
                span: Span::new(start, self.cur.pos),
            });
        }

        let mut fields: Vec<ObjectField> = Vec::new();
        loop {
            self.skip_newlines();
            if self.cur.kind == TokenKind::RBrace {
                break;
            }
            let key = self.parse_object_key()?;
            self.skip_peek_newlines();
            if !self.expect_peek(TokenKind::Colon) {
                return None;
            }
            self.next_token(); // ':'
            self.next_token(); // value start
            self.skip_newlines();
            let value = self.parse_expression(Precedence::Lowest)?;
            fields.push(ObjectField { key, value });
            self.skip_peek_newlines();
            if self.peek.kind == TokenKind::RBrace {
                self.next_token();
                break;
            }
            if self.peek.kind != TokenKind::Comma {
                self.error_at(
                    self.cur.pos,
                    "expected ',' or '}' in object literal".to_string(),
                );
                return None;
            }
            self.next_token(); // ','
            self.next_token(); // next key or '}'
            if self.cur.kind == TokenKind::RBrace {
                break;
            }
        }
        Some(Expr::Object {
            fields,
            span: Span::new(start, self.cur.pos),
        })
    }

    fn parse_object_key(&mut self) -> Option<ObjectKey> {
        let span = Span::at(self.cur.pos);
        match self.cur.kind {
            TokenKind::Ident => Some(ObjectKey::Ident(self.cur.literal.clone(), span)),
            TokenKind::Str => Some(ObjectKey::Str(self.cur.literal.clone(), span)),
            TokenKind::Number => Some(ObjectKey::Number(self.cur.literal.clone(), span)),
            _ => {
                self.error_at(self.cur.pos, "invalid object key".to_string());
                None
            }
        }
    }

    fn parse_expression_list(&mut self, end: TokenKind) -> Vec<Expr> {
        let mut list: Vec<Expr> = Vec::new();
        if self.cur.kind == end {
            return list;
        }
        loop {
            let Some(expr) = self.parse_expression(Precedence::Lowest) else {
                return list;
            };
            list.push(expr);
            if self.peek.kind == TokenKind::Comma {
                self.next_token();
                self.next_token();
                if self.cur.kind == end {
                    self.error_at(self.cur.pos, "expected expression".to_string());
                    return list;
                }
                continue;
            }
            if self.peek.kind == end {
                self.next_token();
            }
            if self.cur.kind != end {
                self.error_at(self.peek.pos, format!("expected ',' or {end}"));
            }
            break;
        }
        list
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    fn next_token(&mut self) {
        self.cur = std::mem::replace(&mut self.peek, self.lexer.next_token());
    }

    /// Check the next token's kind, recording an error on mismatch. Does not
    /// advance.
    fn expect_peek(&mut self, kind: TokenKind) -> bool {
        if self.peek.kind == kind {
            true
        } else {
            self.error_at(
                self.peek.pos,
                format!("expected next token to be {}, got {}", kind, self.peek.kind),
            );
            false
        }
    }

    fn skip_newlines(&mut self) {
        while self.cur.kind == TokenKind::Newline {
            self.next_token();
        }
    }

    fn skip_peek_newlines(&mut self) {
        while self.peek.kind == TokenKind::Newline {
            self.next_token();
        }
    }

    /// Skip ahead to the next statement boundary after an error.
    fn synchronize(&mut self) {
        loop {
            match self.cur.kind {
                TokenKind::Eof | TokenKind::RBrace => return,
                TokenKind::Newline => {
                    self.next_token();
                    return;
                }
                _ => self.next_token(),
            }
        }
    }

    fn peek_precedence(&self) -> Precedence {
        precedence_of(self.peek.kind)
    }

    fn error_at(&mut self, pos: Position, message: String) {
        self.errors.push(format!("{pos}: {message}"));
    }
}

fn is_end_of_expression(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Newline
            | TokenKind::RBrace
            | TokenKind::Eof
            | TokenKind::Comma
            | TokenKind::RParen
            | TokenKind::RBracket
    )
}

fn is_end_of_statement(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Newline | TokenKind::RBrace | TokenKind::Eof
    )
}
