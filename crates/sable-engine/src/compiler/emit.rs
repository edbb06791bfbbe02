//! Source emission: pretty-printing an AST back to Sable source, and the
//! emitted-module artifact pair (code stream + debug-info stream).
//!
//! The printer is used for `--emit` artifacts and for turning a rewritten AST
//! back into compilable text; its output re-parses to an equivalent AST.

use crate::parser::ast::*;
use crate::rewriter::InstrumentationMaps;
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

/// An emitted module: the (possibly instrumented) source text and, when the
/// unit was instrumented, the serialized checkpoint map.
#[derive(Debug, Clone)]
pub struct EmittedModule {
    pub unit_name: String,
    pub source: String,
    pub debug_map: Option<String>,
}

impl EmittedModule {
    /// Write the artifact pair into `dir` as `<unit>.sbl` and
    /// `<unit>.map.json`. Returns the paths written.
    pub fn write_to_dir(&self, dir: &Path) -> io::Result<(PathBuf, Option<PathBuf>)> {
        std::fs::create_dir_all(dir)?;
        let code_path = dir.join(format!("{}.sbl", self.unit_name));
        std::fs::write(&code_path, &self.source)?;
        let map_path = match &self.debug_map {
            Some(json) => {
                let path = dir.join(format!("{}.map.json", self.unit_name));
                std::fs::write(&path, json)?;
                Some(path)
            }
            None => None,
        };
        Ok((code_path, map_path))
    }
}

/// Serialize instrumentation maps as the checkpoint-map debug artifact.
pub fn serialize_maps(maps: &InstrumentationMaps) -> String {
    serde_json::to_string_pretty(maps).expect("instrumentation maps serialize")
}

/// Pretty-print a program back to source text.
pub fn print_program(program: &Program) -> String {
    let mut out = String::new();
    for (i, item) in program.items.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        match item {
            Item::Function(f) => print_function(&mut out, f, 0),
            Item::Class(c) => {
                let _ = writeln!(out, "class {} {{", c.name.name);
                for (j, m) in c.methods.iter().enumerate() {
                    if j > 0 {
                        out.push('\n');
                    }
                    print_function(&mut out, m, 1);
                }
                out.push_str("}\n");
            }
        }
    }
    out
}

fn print_function(out: &mut String, f: &FunctionDecl, depth: usize) {
    indent(out, depth);
    let _ = write!(out, "function {}(", f.name.name);
    for (i, p) in f.params.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&p.name.name);
        if let Some(ty) = &p.ty {
            let _ = write!(out, ": {}", ty.name);
        }
    }
    out.push(')');
    if let Some(ty) = &f.return_type {
        let _ = write!(out, ": {}", ty.name);
    }
    out.push(' ');
    print_block(out, &f.body, depth);
    out.push('\n');
}

fn print_block(out: &mut String, block: &Block, depth: usize) {
    out.push_str("{\n");
    for stmt in &block.stmts {
        print_stmt(out, stmt, depth + 1);
    }
    indent(out, depth);
    out.push('}');
}

fn print_stmt(out: &mut String, stmt: &Stmt, depth: usize) {
    indent(out, depth);
    match stmt {
        Stmt::Let(s) => {
            let _ = write!(out, "let {}", s.name.name);
            if let Some(ty) = &s.ty {
                let _ = write!(out, ": {}", ty.name);
            }
            out.push_str(" = ");
            print_expr(out, &s.value, 0);
            out.push_str(";\n");
        }
        Stmt::Expr(s) => {
            print_expr(out, &s.expr, 0);
            out.push_str(";\n");
        }
        Stmt::If(s) => {
            print_if(out, s, depth);
            out.push('\n');
        }
        Stmt::While(s) => {
            out.push_str("while (");
            print_expr(out, &s.cond, 0);
            out.push_str(") ");
            print_block(out, &s.body, depth);
            out.push('\n');
        }
        Stmt::Return(s) => {
            out.push_str("return");
            if let Some(value) = &s.value {
                out.push(' ');
                print_expr(out, value, 0);
            }
            out.push_str(";\n");
        }
        Stmt::Throw(s) => {
            out.push_str("throw ");
            print_expr(out, &s.value, 0);
            out.push_str(";\n");
        }
        Stmt::Try(s) => {
            out.push_str("try ");
            print_block(out, &s.body, depth);
            if let Some(catch) = &s.catch {
                let _ = write!(out, " catch ({}) ", catch.param.name);
                print_block(out, &catch.body, depth);
            }
            if let Some(finally) = &s.finally {
                out.push_str(" finally ");
                print_block(out, finally, depth);
            }
            out.push('\n');
        }
        Stmt::Block(b) => {
            print_block(out, b, depth);
            out.push('\n');
        }
    }
}

fn print_if(out: &mut String, s: &IfStmt, depth: usize) {
    out.push_str("if (");
    print_expr(out, &s.cond, 0);
    out.push_str(") ");
    print_block(out, &s.then_block, depth);
    if let Some(branch) = &s.else_branch {
        out.push_str(" else ");
        match branch.as_ref() {
            Stmt::If(nested) => print_if(out, nested, depth),
            Stmt::Block(b) => print_block(out, b, depth),
            other => {
                // Shouldn't be produced by the parser; print as a block.
                out.push_str("{\n");
                print_stmt(out, other, depth + 1);
                indent(out, depth);
                out.push('}');
            }
        }
    }
}

/// Binding strength used to decide where parentheses are required.
fn precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Assign(_) | Expr::Arrow(_) => 1,
        Expr::Logical(l) => match l.op {
            LogicalOp::Or => 2,
            LogicalOp::And => 3,
        },
        Expr::Binary(b) => match b.op {
            BinaryOp::Eq | BinaryOp::Ne => 4,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 5,
            BinaryOp::Add | BinaryOp::Sub => 6,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 7,
        },
        Expr::Unary(_) => 8,
        _ => 9,
    }
}

fn print_expr(out: &mut String, expr: &Expr, min_prec: u8) {
    let prec = precedence(expr);
    let needs_parens = prec < min_prec;
    if needs_parens {
        out.push('(');
    }
    match expr {
        Expr::Null(_) => out.push_str("null"),
        Expr::Bool(b) => out.push_str(if b.value { "true" } else { "false" }),
        Expr::Int(i) => {
            let _ = write!(out, "{}", i.value);
        }
        Expr::Float(f) => {
            let text = f.value.to_string();
            out.push_str(&text);
            // Keep the literal a float when it printed as an integer.
            if !text.contains('.') && !text.contains('e') {
                out.push_str(".0");
            }
        }
        Expr::Str(s) => {
            let _ = write!(out, "\"{}\"", escape(&s.value));
        }
        Expr::Ident(i) => out.push_str(&i.name),
        Expr::Array(a) => {
            out.push('[');
            for (i, e) in a.elements.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                print_expr(out, e, 0);
            }
            out.push(']');
        }
        Expr::Unary(u) => {
            out.push(match u.op {
                UnaryOp::Neg => '-',
                UnaryOp::Not => '!',
            });
            print_expr(out, &u.operand, 8);
        }
        Expr::Binary(b) => {
            print_expr(out, &b.lhs, prec);
            let _ = write!(out, " {} ", binary_op_text(b.op));
            print_expr(out, &b.rhs, prec + 1);
        }
        Expr::Logical(l) => {
            print_expr(out, &l.lhs, prec);
            out.push_str(match l.op {
                LogicalOp::And => " && ",
                LogicalOp::Or => " || ",
            });
            print_expr(out, &l.rhs, prec + 1);
        }
        Expr::Assign(a) => {
            out.push_str(&a.target.name);
            out.push_str(" = ");
            print_expr(out, &a.value, 1);
        }
        Expr::Call(c) => {
            print_expr(out, &c.callee, 9);
            out.push('(');
            for (i, arg) in c.args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                print_expr(out, arg, 0);
            }
            out.push(')');
        }
        Expr::Member(m) => {
            print_expr(out, &m.object, 9);
            out.push('.');
            out.push_str(&m.property.name);
        }
        Expr::Index(i) => {
            print_expr(out, &i.object, 9);
            out.push('[');
            print_expr(out, &i.index, 0);
            out.push(']');
        }
        Expr::Arrow(a) => {
            out.push_str("() => ");
            print_expr(out, &a.body, 1);
        }
        Expr::Paren(p) => {
            out.push('(');
            print_expr(out, &p.inner, 0);
            out.push(')');
        }
    }
    if needs_parens {
        out.push(')');
    }
}

fn binary_op_text(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::Eq => "==",
        BinaryOp::Ne => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("    ");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    /// Print → reparse → print must be a fixed point.
    fn roundtrip(source: &str) {
        let (program, diags) = Parser::parse_source(source);
        assert!(diags.is_empty(), "{:?}", diags);
        let printed = print_program(&program);
        let (reparsed, diags) = Parser::parse_source(&printed);
        assert!(diags.is_empty(), "printed source failed to parse: {}", printed);
        let reprinted = print_program(&reparsed);
        assert_eq!(printed, reprinted);
    }

    #[test]
    fn test_roundtrip_function() {
        roundtrip("function add(a: int, b: int): int { return a + b; }");
    }

    #[test]
    fn test_roundtrip_control_flow() {
        roundtrip(
            "function f(x) { if (x > 0) { print(x); } else { while (x < 0) { x = x + 1; } } }",
        );
    }

    #[test]
    fn test_roundtrip_try_and_class() {
        roundtrip(
            "class Main { function run() { try { g(); } catch (e) { throw e; } finally { print(1); } } }",
        );
    }

    #[test]
    fn test_grouping_preserved() {
        let (program, _) = Parser::parse_source("function f() { let x = (1 + 2) * 3; }");
        let printed = print_program(&program);
        assert!(printed.contains("(1 + 2) * 3"), "got: {}", printed);
    }

    #[test]
    fn test_write_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let emitted = EmittedModule {
            unit_name: "demo".into(),
            source: "function main() { }\n".into(),
            debug_map: Some("{\"checkpoints\":{},\"methods\":{}}".into()),
        };
        let (code, map) = emitted.write_to_dir(dir.path()).unwrap();
        assert_eq!(std::fs::read_to_string(code).unwrap(), emitted.source);
        let map = map.expect("map path");
        assert!(map.ends_with("demo.map.json"));
        assert!(std::fs::read_to_string(map).unwrap().contains("checkpoints"));
    }

    #[test]
    fn test_arrow_and_call_print() {
        let (program, _) =
            Parser::parse_source("function f(a) { __checkpoint(1, \"u.f\", () => __locals(\"a\", a)); }");
        let printed = print_program(&program);
        assert!(
            printed.contains("__checkpoint(1, \"u.f\", () => __locals(\"a\", a));"),
            "got: {}",
            printed
        );
    }
}
