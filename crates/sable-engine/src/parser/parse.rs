//! Recursive-descent parser for Sable.
//!
//! The parser recovers at statement and item boundaries so that a single
//! compile reports as many syntax errors as possible.

use crate::parser::ast::*;
use crate::parser::lexer::tokenize;
use crate::parser::token::{Span, Token};
use crate::parser::Diagnostic;

/// Parser over a pre-lexed token stream.
pub struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
}

/// Internal unwind for a syntax error; the diagnostic is already recorded.
struct Bail;

type PResult<T> = Result<T, Bail>;

impl Parser {
    /// Lex and parse a source unit. Returns the program (possibly partial
    /// after recovery) and every diagnostic collected on the way.
    pub fn parse_source(source: &str) -> (Program, Vec<Diagnostic>) {
        match tokenize(source) {
            Ok(tokens) => {
                let mut parser = Parser {
                    tokens,
                    pos: 0,
                    diagnostics: Vec::new(),
                };
                let program = parser.parse_program();
                (program, parser.diagnostics)
            }
            Err(diags) => (Program::new(Vec::new(), Span::synthetic()), diags),
        }
    }

    fn parse_program(&mut self) -> Program {
        let start = self.peek_span();
        let mut items = Vec::new();
        while !self.check(&Token::Eof) {
            match self.parse_item() {
                Ok(item) => items.push(item),
                Err(Bail) => self.recover_to_item(),
            }
        }
        let span = start.merge(&self.peek_span());
        Program::new(items, span)
    }

    fn parse_item(&mut self) -> PResult<Item> {
        match self.peek() {
            Token::Function => Ok(Item::Function(self.parse_function()?)),
            Token::Class => Ok(Item::Class(self.parse_class()?)),
            other => {
                let msg = format!("expected 'function' or 'class', found '{}'", other);
                self.error_here(msg);
                Err(Bail)
            }
        }
    }

    fn parse_class(&mut self) -> PResult<ClassDecl> {
        let start = self.expect(Token::Class)?;
        let name = self.parse_ident()?;
        self.expect(Token::LBrace)?;
        let mut methods = Vec::new();
        while !self.check(&Token::RBrace) && !self.check(&Token::Eof) {
            methods.push(self.parse_function()?);
        }
        let end = self.expect(Token::RBrace)?;
        Ok(ClassDecl {
            name,
            methods,
            span: start.merge(&end),
        })
    }

    fn parse_function(&mut self) -> PResult<FunctionDecl> {
        let start = self.expect(Token::Function)?;
        let name = self.parse_ident()?;
        self.expect(Token::LParen)?;
        let mut params = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                let pname = self.parse_ident()?;
                let ty = self.parse_type_ann()?;
                let span = match &ty {
                    Some(t) => pname.span.merge(&t.span),
                    None => pname.span,
                };
                params.push(Param {
                    name: pname,
                    ty,
                    span,
                });
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;
        let return_type = self.parse_type_ann()?;
        let body = self.parse_block()?;
        let span = start.merge(&body.span);
        Ok(FunctionDecl {
            name,
            params,
            return_type,
            body,
            span,
        })
    }

    fn parse_type_ann(&mut self) -> PResult<Option<TypeAnn>> {
        if !self.eat(&Token::Colon) {
            return Ok(None);
        }
        let ident = self.parse_ident()?;
        Ok(Some(TypeAnn {
            name: ident.name,
            span: ident.span,
        }))
    }

    fn parse_block(&mut self) -> PResult<Block> {
        let start = self.expect(Token::LBrace)?;
        let mut stmts = Vec::new();
        while !self.check(&Token::RBrace) && !self.check(&Token::Eof) {
            match self.parse_stmt() {
                Ok(stmt) => stmts.push(stmt),
                Err(Bail) => self.recover_to_stmt(),
            }
        }
        let end = self.expect(Token::RBrace)?;
        Ok(Block {
            stmts,
            span: start.merge(&end),
        })
    }

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        match self.peek() {
            Token::Let => self.parse_let(),
            Token::If => self.parse_if(),
            Token::While => self.parse_while(),
            Token::Return => self.parse_return(),
            Token::Throw => self.parse_throw(),
            Token::Try => self.parse_try(),
            Token::LBrace => Ok(Stmt::Block(self.parse_block()?)),
            _ => {
                let expr = self.parse_expr()?;
                let end = self.expect(Token::Semicolon)?;
                let span = expr.span().merge(&end);
                Ok(Stmt::Expr(ExprStmt { expr, span }))
            }
        }
    }

    fn parse_let(&mut self) -> PResult<Stmt> {
        let start = self.expect(Token::Let)?;
        let name = self.parse_ident()?;
        let ty = self.parse_type_ann()?;
        self.expect(Token::Assign)?;
        let value = self.parse_expr()?;
        let end = self.expect(Token::Semicolon)?;
        Ok(Stmt::Let(LetStmt {
            name,
            ty,
            value,
            span: start.merge(&end),
        }))
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        let start = self.expect(Token::If)?;
        self.expect(Token::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(Token::RParen)?;
        let then_block = self.parse_block()?;
        let mut span = start.merge(&then_block.span);
        let else_branch = if self.eat(&Token::Else) {
            let branch = if self.check(&Token::If) {
                self.parse_if()?
            } else {
                Stmt::Block(self.parse_block()?)
            };
            span = span.merge(&branch.span());
            Some(Box::new(branch))
        } else {
            None
        };
        Ok(Stmt::If(IfStmt {
            cond,
            then_block,
            else_branch,
            span,
        }))
    }

    fn parse_while(&mut self) -> PResult<Stmt> {
        let start = self.expect(Token::While)?;
        self.expect(Token::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(Token::RParen)?;
        let body = self.parse_block()?;
        let span = start.merge(&body.span);
        Ok(Stmt::While(WhileStmt { cond, body, span }))
    }

    fn parse_return(&mut self) -> PResult<Stmt> {
        let start = self.expect(Token::Return)?;
        let value = if self.check(&Token::Semicolon) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        let end = self.expect(Token::Semicolon)?;
        Ok(Stmt::Return(ReturnStmt {
            value,
            span: start.merge(&end),
        }))
    }

    fn parse_throw(&mut self) -> PResult<Stmt> {
        let start = self.expect(Token::Throw)?;
        let value = self.parse_expr()?;
        let end = self.expect(Token::Semicolon)?;
        Ok(Stmt::Throw(ThrowStmt {
            value,
            span: start.merge(&end),
        }))
    }

    fn parse_try(&mut self) -> PResult<Stmt> {
        let start = self.expect(Token::Try)?;
        let body = self.parse_block()?;
        let mut span = start.merge(&body.span);
        let catch = if self.check(&Token::Catch) {
            let cstart = self.advance();
            self.expect(Token::LParen)?;
            let param = self.parse_ident()?;
            self.expect(Token::RParen)?;
            let cbody = self.parse_block()?;
            let cspan = cstart.merge(&cbody.span);
            span = span.merge(&cspan);
            Some(CatchClause {
                param,
                body: cbody,
                span: cspan,
            })
        } else {
            None
        };
        let finally = if self.eat(&Token::Finally) {
            let fblock = self.parse_block()?;
            span = span.merge(&fblock.span);
            Some(fblock)
        } else {
            None
        };
        if catch.is_none() && finally.is_none() {
            self.error_here("'try' requires a 'catch' or 'finally' clause".to_string());
            return Err(Bail);
        }
        Ok(Stmt::Try(TryStmt {
            body,
            catch,
            finally,
            span,
        }))
    }

    // ── Expressions ─────────────────────────────────────────────────────

    fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> PResult<Expr> {
        // `ident = …` only; all other `=` positions are syntax errors caught
        // by the statement parser.
        if let (Token::Ident(_), Token::Assign) = (self.peek(), self.peek_ahead(1)) {
            let target = self.parse_ident()?;
            self.expect(Token::Assign)?;
            let value = self.parse_assignment()?;
            let span = target.span.merge(&value.span());
            return Ok(Expr::Assign(AssignExpr {
                target,
                value: Box::new(value),
                span,
            }));
        }
        self.parse_or()
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::OrOr) {
            let rhs = self.parse_and()?;
            let span = lhs.span().merge(&rhs.span());
            lhs = Expr::Logical(LogicalExpr {
                op: LogicalOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            });
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_equality()?;
        while self.eat(&Token::AndAnd) {
            let rhs = self.parse_equality()?;
            let span = lhs.span().merge(&rhs.span());
            lhs = Expr::Logical(LogicalExpr {
                op: LogicalOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            });
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                Token::EqEq => BinaryOp::Eq,
                Token::NotEq => BinaryOp::Ne,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = Self::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinaryOp::Lt,
                Token::Le => BinaryOp::Le,
                Token::Gt => BinaryOp::Gt,
                Token::Ge => BinaryOp::Ge,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = Self::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Self::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Self::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        let span = lhs.span().merge(&rhs.span());
        Expr::Binary(BinaryExpr {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            span,
        })
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let op = match self.peek() {
            Token::Minus => Some(UnaryOp::Neg),
            Token::Bang => Some(UnaryOp::Not),
            _ => None,
        };
        if let Some(op) = op {
            let start = self.advance();
            let operand = self.parse_unary()?;
            let span = start.merge(&operand.span());
            return Ok(Expr::Unary(UnaryExpr {
                op,
                operand: Box::new(operand),
                span,
            }));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Token::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(&Token::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.eat(&Token::Comma) {
                                break;
                            }
                        }
                    }
                    let end = self.expect(Token::RParen)?;
                    let span = expr.span().merge(&end);
                    expr = Expr::Call(CallExpr {
                        callee: Box::new(expr),
                        args,
                        span,
                    });
                }
                Token::Dot => {
                    self.advance();
                    let property = self.parse_ident()?;
                    let span = expr.span().merge(&property.span);
                    expr = Expr::Member(MemberExpr {
                        object: Box::new(expr),
                        property,
                        span,
                    });
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    let end = self.expect(Token::RBracket)?;
                    let span = expr.span().merge(&end);
                    expr = Expr::Index(IndexExpr {
                        object: Box::new(expr),
                        index: Box::new(index),
                        span,
                    });
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        // `() => expr` needs three tokens of lookahead before `(` commits
        // to a parenthesized expression.
        if self.check(&Token::LParen)
            && self.peek_ahead(1) == &Token::RParen
            && self.peek_ahead(2) == &Token::Arrow
        {
            let start = self.advance();
            self.advance();
            self.advance();
            let body = self.parse_expr()?;
            let span = start.merge(&body.span());
            return Ok(Expr::Arrow(ArrowExpr {
                body: Box::new(body),
                span,
            }));
        }

        match self.peek().clone() {
            Token::Null => {
                let span = self.advance();
                Ok(Expr::Null(span))
            }
            Token::True => {
                let span = self.advance();
                Ok(Expr::Bool(BoolLit { value: true, span }))
            }
            Token::False => {
                let span = self.advance();
                Ok(Expr::Bool(BoolLit { value: false, span }))
            }
            Token::Int(value) => {
                let span = self.advance();
                Ok(Expr::Int(IntLit { value, span }))
            }
            Token::Float(value) => {
                let span = self.advance();
                Ok(Expr::Float(FloatLit { value, span }))
            }
            Token::Str(value) => {
                let span = self.advance();
                Ok(Expr::Str(StrLit { value, span }))
            }
            Token::Ident(_) => Ok(Expr::Ident(self.parse_ident()?)),
            Token::LParen => {
                let start = self.advance();
                let inner = self.parse_expr()?;
                let end = self.expect(Token::RParen)?;
                Ok(Expr::Paren(ParenExpr {
                    inner: Box::new(inner),
                    span: start.merge(&end),
                }))
            }
            Token::LBracket => {
                let start = self.advance();
                let mut elements = Vec::new();
                if !self.check(&Token::RBracket) {
                    loop {
                        elements.push(self.parse_expr()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                }
                let end = self.expect(Token::RBracket)?;
                Ok(Expr::Array(ArrayLit {
                    elements,
                    span: start.merge(&end),
                }))
            }
            other => {
                self.error_here(format!("expected expression, found '{}'", other));
                Err(Bail)
            }
        }
    }

    fn parse_ident(&mut self) -> PResult<Ident> {
        match self.peek().clone() {
            Token::Ident(name) => {
                let span = self.advance();
                Ok(Ident::new(name, span))
            }
            other => {
                self.error_here(format!("expected identifier, found '{}'", other));
                Err(Bail)
            }
        }
    }

    // ── Token-stream helpers ────────────────────────────────────────────

    fn peek(&self) -> &Token {
        &self.tokens[self.pos].0
    }

    fn peek_ahead(&self, n: usize) -> &Token {
        let idx = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[idx].0
    }

    fn peek_span(&self) -> Span {
        self.tokens[self.pos].1
    }

    fn advance(&mut self) -> Span {
        let span = self.tokens[self.pos].1;
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        span
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> PResult<Span> {
        if self.check(&token) {
            Ok(self.advance())
        } else {
            self.error_here(format!("expected '{}', found '{}'", token, self.peek()));
            Err(Bail)
        }
    }

    fn error_here(&mut self, message: String) {
        let span = self.peek_span();
        self.diagnostics.push(Diagnostic::new(message, span));
    }

    /// Skip to the next statement boundary after a syntax error.
    fn recover_to_stmt(&mut self) {
        loop {
            match self.peek() {
                Token::Eof | Token::RBrace => return,
                Token::Semicolon => {
                    self.advance();
                    return;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    /// Skip to the next top-level item after a syntax error.
    fn recover_to_item(&mut self) {
        loop {
            match self.peek() {
                Token::Eof | Token::Function | Token::Class => return,
                _ => {
                    self.advance();
                }
            }
        }
    }
}
