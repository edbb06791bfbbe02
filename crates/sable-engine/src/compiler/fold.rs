//! Conservative constant folding, applied at release optimization only.
//!
//! Folds arithmetic and logical operations over literals. Division and modulo
//! are never folded: they can raise at runtime and the debugger relies on
//! faults surfacing during evaluation, not compilation. Instrumented (debug)
//! compiles skip this pass entirely so line mappings stay stable.

use crate::parser::ast::*;

/// Fold constants throughout a program in place.
pub fn fold_program(program: &mut Program) {
    for item in &mut program.items {
        match item {
            Item::Function(f) => fold_block(&mut f.body),
            Item::Class(c) => {
                for m in &mut c.methods {
                    fold_block(&mut m.body);
                }
            }
        }
    }
}

fn fold_block(block: &mut Block) {
    for stmt in &mut block.stmts {
        fold_stmt(stmt);
    }
}

fn fold_stmt(stmt: &mut Stmt) {
    match stmt {
        Stmt::Let(s) => fold_expr(&mut s.value),
        Stmt::Expr(s) => fold_expr(&mut s.expr),
        Stmt::If(s) => {
            fold_expr(&mut s.cond);
            fold_block(&mut s.then_block);
            if let Some(branch) = &mut s.else_branch {
                fold_stmt(branch);
            }
        }
        Stmt::While(s) => {
            fold_expr(&mut s.cond);
            fold_block(&mut s.body);
        }
        Stmt::Return(s) => {
            if let Some(value) = &mut s.value {
                fold_expr(value);
            }
        }
        Stmt::Throw(s) => fold_expr(&mut s.value),
        Stmt::Try(s) => {
            fold_block(&mut s.body);
            if let Some(catch) = &mut s.catch {
                fold_block(&mut catch.body);
            }
            if let Some(finally) = &mut s.finally {
                fold_block(finally);
            }
        }
        Stmt::Block(b) => fold_block(b),
    }
}

fn fold_expr(expr: &mut Expr) {
    match expr {
        Expr::Array(a) => {
            for e in &mut a.elements {
                fold_expr(e);
            }
        }
        Expr::Unary(u) => {
            fold_expr(&mut u.operand);
            if let Some(folded) = fold_unary(u) {
                *expr = folded;
            }
        }
        Expr::Binary(b) => {
            fold_expr(&mut b.lhs);
            fold_expr(&mut b.rhs);
            if let Some(folded) = fold_binary(b) {
                *expr = folded;
            }
        }
        Expr::Logical(l) => {
            fold_expr(&mut l.lhs);
            fold_expr(&mut l.rhs);
            let span = l.span;
            let folded = match (l.op, l.lhs.as_ref(), l.rhs.as_ref()) {
                (LogicalOp::And, Expr::Bool(a), Expr::Bool(b)) => Some(a.value && b.value),
                (LogicalOp::Or, Expr::Bool(a), Expr::Bool(b)) => Some(a.value || b.value),
                _ => None,
            };
            if let Some(value) = folded {
                *expr = Expr::Bool(BoolLit { value, span });
            }
        }
        Expr::Assign(a) => fold_expr(&mut a.value),
        Expr::Call(c) => {
            fold_expr(&mut c.callee);
            for arg in &mut c.args {
                fold_expr(arg);
            }
        }
        Expr::Member(m) => fold_expr(&mut m.object),
        Expr::Index(i) => {
            fold_expr(&mut i.object);
            fold_expr(&mut i.index);
        }
        Expr::Arrow(a) => fold_expr(&mut a.body),
        Expr::Paren(p) => {
            fold_expr(&mut p.inner);
            if is_literal(&p.inner) {
                let inner = (*p.inner).clone();
                *expr = inner;
            }
        }
        _ => {}
    }
}

fn is_literal(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Null(_) | Expr::Bool(_) | Expr::Int(_) | Expr::Float(_) | Expr::Str(_)
    )
}

fn fold_unary(u: &UnaryExpr) -> Option<Expr> {
    match (u.op, u.operand.as_ref()) {
        (UnaryOp::Neg, Expr::Int(i)) => Some(Expr::Int(IntLit {
            value: i.value.checked_neg()?,
            span: u.span,
        })),
        (UnaryOp::Neg, Expr::Float(f)) => Some(Expr::Float(FloatLit {
            value: -f.value,
            span: u.span,
        })),
        (UnaryOp::Not, Expr::Bool(b)) => Some(Expr::Bool(BoolLit {
            value: !b.value,
            span: u.span,
        })),
        _ => None,
    }
}

fn fold_binary(b: &BinaryExpr) -> Option<Expr> {
    let span = b.span;
    match (b.op, b.lhs.as_ref(), b.rhs.as_ref()) {
        (BinaryOp::Add, Expr::Int(l), Expr::Int(r)) => Some(Expr::Int(IntLit {
            value: l.value.checked_add(r.value)?,
            span,
        })),
        (BinaryOp::Sub, Expr::Int(l), Expr::Int(r)) => Some(Expr::Int(IntLit {
            value: l.value.checked_sub(r.value)?,
            span,
        })),
        (BinaryOp::Mul, Expr::Int(l), Expr::Int(r)) => Some(Expr::Int(IntLit {
            value: l.value.checked_mul(r.value)?,
            span,
        })),
        (BinaryOp::Add, Expr::Float(l), Expr::Float(r)) => Some(Expr::Float(FloatLit {
            value: l.value + r.value,
            span,
        })),
        (BinaryOp::Sub, Expr::Float(l), Expr::Float(r)) => Some(Expr::Float(FloatLit {
            value: l.value - r.value,
            span,
        })),
        (BinaryOp::Mul, Expr::Float(l), Expr::Float(r)) => Some(Expr::Float(FloatLit {
            value: l.value * r.value,
            span,
        })),
        (BinaryOp::Add, Expr::Str(l), Expr::Str(r)) => Some(Expr::Str(StrLit {
            value: format!("{}{}", l.value, r.value),
            span,
        })),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn folded_value(source: &str) -> Expr {
        let (mut program, diags) = Parser::parse_source(source);
        assert!(diags.is_empty());
        fold_program(&mut program);
        let Item::Function(f) = &program.items[0] else {
            panic!()
        };
        let Stmt::Let(l) = &f.body.stmts[0] else {
            panic!()
        };
        l.value.clone()
    }

    #[test]
    fn test_folds_arithmetic() {
        assert!(matches!(
            folded_value("function f() { let x = 1 + 2 * 3; }"),
            Expr::Int(i) if i.value == 7
        ));
    }

    #[test]
    fn test_folds_through_parens() {
        assert!(matches!(
            folded_value("function f() { let x = (1 + 2) * 3; }"),
            Expr::Int(i) if i.value == 9
        ));
    }

    #[test]
    fn test_never_folds_division() {
        assert!(matches!(
            folded_value("function f() { let x = 1 / 0; }"),
            Expr::Binary(b) if b.op == BinaryOp::Div
        ));
        assert!(matches!(
            folded_value("function f() { let x = 6 / 2; }"),
            Expr::Binary(_)
        ));
    }

    #[test]
    fn test_folds_string_concat_and_logical() {
        assert!(matches!(
            folded_value("function f() { let x = \"a\" + \"b\"; }"),
            Expr::Str(s) if s.value == "ab"
        ));
        assert!(matches!(
            folded_value("function f() { let x = true && false; }"),
            Expr::Bool(b) if !b.value
        ));
    }

    #[test]
    fn test_overflow_left_unfolded() {
        assert!(matches!(
            folded_value("function f() { let x = 9223372036854775807 + 1; }"),
            Expr::Binary(_)
        ));
    }
}
