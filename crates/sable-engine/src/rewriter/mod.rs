//! The instrumenting rewriter.
//!
//! Transforms a resolved AST so that every function body pushes a debugger
//! frame on entry and pops it on every exit path, and every statement is
//! preceded by a `__checkpoint(id, method, () => __locals(…))` call. Produces
//! the [`InstrumentationMaps`] the debugger engine and UI consume.
//!
//! The transform is idempotent: bodies that already carry the frame wrapper
//! are left untouched, and statements that are themselves instrumentation
//! calls are never instrumented again.

mod maps;

pub use maps::{CheckpointId, InstrumentationMaps, SourceLoc};

use crate::parser::ast::*;
use crate::parser::token::Span;
use crate::parser::{ScopeStack, INTRINSICS};
use thiserror::Error;

/// Errors fatal to instrumentation. No partial output is produced.
#[derive(Debug, Error)]
pub enum RewriteError {
    /// Two declarations map to the same qualified method name, which would
    /// make the method checkpoint map ambiguous.
    #[error("duplicate method name '{0}' in unit")]
    DuplicateMethod(String),
}

/// Result of a rewrite: the instrumented AST plus the index maps.
#[derive(Debug)]
pub struct RewriteOutput {
    pub program: Program,
    pub maps: InstrumentationMaps,
}

/// Rewrite a program for unit `unit_name` whose source lives at `file_path`.
pub fn rewrite(
    program: &Program,
    unit_name: &str,
    file_path: &str,
) -> Result<RewriteOutput, RewriteError> {
    let mut rewriter = Rewriter {
        unit: unit_name.to_string(),
        file: file_path.to_string(),
        next_id: 1,
        maps: InstrumentationMaps::default(),
        scopes: ScopeStack::new(),
    };

    let mut items = Vec::with_capacity(program.items.len());
    for item in &program.items {
        items.push(match item {
            Item::Function(f) => {
                let qualified = format!("{}.{}", rewriter.unit, f.name.name);
                Item::Function(rewriter.instrument_function(f, qualified)?)
            }
            Item::Class(c) => {
                let mut methods = Vec::with_capacity(c.methods.len());
                for m in &c.methods {
                    let qualified =
                        format!("{}.{}.{}", rewriter.unit, c.name.name, m.name.name);
                    methods.push(rewriter.instrument_function(m, qualified)?);
                }
                Item::Class(ClassDecl {
                    name: c.name.clone(),
                    methods,
                    span: c.span,
                })
            }
        });
    }

    Ok(RewriteOutput {
        program: Program::new(items, program.span),
        maps: rewriter.maps,
    })
}

struct Rewriter {
    unit: String,
    file: String,
    next_id: CheckpointId,
    maps: InstrumentationMaps,
    scopes: ScopeStack,
}

impl Rewriter {
    fn instrument_function(
        &mut self,
        f: &FunctionDecl,
        qualified: String,
    ) -> Result<FunctionDecl, RewriteError> {
        // Idempotence: a body that already carries the frame wrapper is left
        // exactly as it is, ids included.
        if is_wrapped(&f.body) {
            return Ok(f.clone());
        }

        if self.maps.methods.contains_key(&qualified) {
            return Err(RewriteError::DuplicateMethod(qualified));
        }
        self.maps.methods.insert(qualified.clone(), Vec::new());

        self.scopes.push();
        for p in &f.params {
            self.scopes.declare(&p.name.name);
        }
        let instrumented = self.instrument_block(&f.body, &qualified);
        self.scopes.pop();

        let span = f.body.span;
        let wrapper = Block {
            stmts: vec![
                intrinsic_call_stmt("__push_frame", vec![str_expr(&qualified, span)], span),
                Stmt::Try(TryStmt {
                    body: instrumented,
                    catch: None,
                    finally: Some(Block {
                        stmts: vec![intrinsic_call_stmt("__pop_frame", Vec::new(), span)],
                        span,
                    }),
                    span,
                }),
            ],
            span,
        };

        Ok(FunctionDecl {
            name: f.name.clone(),
            params: f.params.clone(),
            return_type: f.return_type.clone(),
            body: wrapper,
            span: f.span,
        })
    }

    fn instrument_block(&mut self, block: &Block, method: &str) -> Block {
        self.scopes.push();
        let stmts = self.instrument_stmts(&block.stmts, method);
        self.scopes.pop();
        Block {
            stmts,
            span: block.span,
        }
    }

    /// Instrument a statement list within the current scope.
    fn instrument_stmts(&mut self, stmts: &[Stmt], method: &str) -> Vec<Stmt> {
        let mut out = Vec::with_capacity(stmts.len() * 2);
        for stmt in stmts {
            if is_instrumentation_stmt(stmt) {
                out.push(stmt.clone());
                continue;
            }
            let span = stmt.span();
            let id = self.alloc_id(span, method);
            // Locals visible *before* the statement executes: parameters
            // first, then earlier declarations, outermost scope first.
            let provider = self.locals_provider(span);
            out.push(checkpoint_stmt(id, method, provider, span));
            out.push(self.instrument_stmt(stmt, method));
        }
        out
    }

    fn instrument_stmt(&mut self, stmt: &Stmt, method: &str) -> Stmt {
        match stmt {
            Stmt::Let(s) => {
                self.scopes.declare(&s.name.name);
                stmt.clone()
            }
            Stmt::Expr(_) | Stmt::Return(_) | Stmt::Throw(_) => stmt.clone(),
            Stmt::If(s) => {
                let then_block = self.instrument_block(&s.then_block, method);
                let else_branch = s
                    .else_branch
                    .as_ref()
                    .map(|b| Box::new(self.instrument_stmt(b, method)));
                Stmt::If(IfStmt {
                    cond: s.cond.clone(),
                    then_block,
                    else_branch,
                    span: s.span,
                })
            }
            Stmt::While(s) => Stmt::While(WhileStmt {
                cond: s.cond.clone(),
                body: self.instrument_block(&s.body, method),
                span: s.span,
            }),
            Stmt::Try(s) => {
                let body = self.instrument_block(&s.body, method);
                let catch = s.catch.as_ref().map(|c| {
                    self.scopes.push();
                    self.scopes.declare(&c.param.name);
                    let stmts = self.instrument_stmts(&c.body.stmts, method);
                    self.scopes.pop();
                    CatchClause {
                        param: c.param.clone(),
                        body: Block {
                            stmts,
                            span: c.body.span,
                        },
                        span: c.span,
                    }
                });
                let finally = s
                    .finally
                    .as_ref()
                    .map(|b| self.instrument_block(b, method));
                Stmt::Try(TryStmt {
                    body,
                    catch,
                    finally,
                    span: s.span,
                })
            }
            Stmt::Block(b) => Stmt::Block(self.instrument_block(b, method)),
        }
    }

    fn alloc_id(&mut self, span: Span, method: &str) -> CheckpointId {
        let id = self.next_id;
        self.next_id += 1;
        self.maps.checkpoints.insert(
            id,
            SourceLoc {
                file: self.file.clone(),
                line: span.line,
                column: span.column,
            },
        );
        self.maps
            .methods
            .get_mut(method)
            .expect("method registered before its body is visited")
            .push(id);
        id
    }

    /// `() => __locals("a", a, "b", b, …)` over the visible names.
    fn locals_provider(&self, span: Span) -> Expr {
        let mut args = Vec::new();
        for name in self.scopes.visible_names() {
            args.push(str_expr(&name, span));
            args.push(Expr::Ident(Ident::new(name, span)));
        }
        Expr::Arrow(ArrowExpr {
            body: Box::new(intrinsic_call("__locals", args, span)),
            span,
        })
    }
}

/// True if a body already carries the `__push_frame` / try-finally wrapper.
fn is_wrapped(body: &Block) -> bool {
    if body.stmts.len() != 2 {
        return false;
    }
    let pushes = matches!(&body.stmts[0], Stmt::Expr(s) if is_call_to(&s.expr, "__push_frame"));
    let pops = matches!(&body.stmts[1], Stmt::Try(t) if t.finally.as_ref().is_some_and(|f| {
        f.stmts.len() == 1
            && matches!(&f.stmts[0], Stmt::Expr(s) if is_call_to(&s.expr, "__pop_frame"))
    }));
    pushes && pops
}

/// True for statements that are themselves instrumentation calls.
fn is_instrumentation_stmt(stmt: &Stmt) -> bool {
    match stmt {
        Stmt::Expr(s) => INTRINSICS.iter().any(|name| is_call_to(&s.expr, name)),
        _ => false,
    }
}

fn is_call_to(expr: &Expr, name: &str) -> bool {
    matches!(expr, Expr::Call(c) if matches!(c.callee.as_ref(), Expr::Ident(i) if i.name == name))
}

fn intrinsic_call(name: &str, args: Vec<Expr>, span: Span) -> Expr {
    Expr::Call(CallExpr {
        callee: Box::new(Expr::Ident(Ident::new(name, span))),
        args,
        span,
    })
}

fn intrinsic_call_stmt(name: &str, args: Vec<Expr>, span: Span) -> Stmt {
    Stmt::Expr(ExprStmt {
        expr: intrinsic_call(name, args, span),
        span,
    })
}

fn checkpoint_stmt(id: CheckpointId, method: &str, provider: Expr, span: Span) -> Stmt {
    intrinsic_call_stmt(
        "__checkpoint",
        vec![
            Expr::Int(IntLit {
                value: i64::from(id),
                span,
            }),
            str_expr(method, span),
            provider,
        ],
        span,
    )
}

fn str_expr(value: &str, span: Span) -> Expr {
    Expr::Str(StrLit {
        value: value.to_string(),
        span,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn rewrite_source(source: &str) -> RewriteOutput {
        let (program, diags) = Parser::parse_source(source);
        assert!(diags.is_empty(), "{:?}", diags);
        rewrite(&program, "demo", "demo.sbl").unwrap()
    }

    #[test]
    fn test_wrapper_shape() {
        let out = rewrite_source("function main() { print(1); }");
        let Item::Function(f) = &out.program.items[0] else {
            panic!()
        };
        assert!(is_wrapped(&f.body));
    }

    #[test]
    fn test_ids_dense_and_in_lexical_order() {
        let out = rewrite_source(
            "function main() {\n  let a = 1;\n  if (a > 0) {\n    print(a);\n  }\n  print(2);\n}",
        );
        let ids: Vec<_> = out.maps.checkpoints.keys().copied().collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        // if-statement is id 2, its nested print is 3, trailing print is 4.
        assert_eq!(out.maps.methods["demo.main"], vec![1, 2, 3, 4]);
        assert_eq!(out.maps.checkpoints[&2].line, 3);
        assert_eq!(out.maps.checkpoints[&3].line, 4);
        assert_eq!(out.maps.checkpoints[&4].line, 6);
    }

    #[test]
    fn test_checkpoint_precedes_statement() {
        let out = rewrite_source("function main() { let a = 1; print(a); }");
        let Item::Function(f) = &out.program.items[0] else {
            panic!()
        };
        let Stmt::Try(t) = &f.body.stmts[1] else {
            panic!()
        };
        // checkpoint, let, checkpoint, print
        assert_eq!(t.body.stmts.len(), 4);
        assert!(is_instrumentation_stmt(&t.body.stmts[0]));
        assert!(matches!(&t.body.stmts[1], Stmt::Let(_)));
        assert!(is_instrumentation_stmt(&t.body.stmts[2]));
    }

    #[test]
    fn test_provider_lists_params_then_locals() {
        let out = rewrite_source("function main(p: int) { let a = 1; print(a); }");
        let Item::Function(f) = &out.program.items[0] else {
            panic!()
        };
        let Stmt::Try(t) = &f.body.stmts[1] else {
            panic!()
        };
        // Second checkpoint guards `print(a)` and sees p then a.
        let Stmt::Expr(s) = &t.body.stmts[2] else {
            panic!()
        };
        let Expr::Call(c) = &s.expr else { panic!() };
        let Expr::Arrow(arrow) = &c.args[2] else {
            panic!("expected provider arrow")
        };
        let Expr::Call(locals) = arrow.body.as_ref() else {
            panic!()
        };
        let names: Vec<_> = locals
            .args
            .iter()
            .step_by(2)
            .map(|e| match e {
                Expr::Str(s) => s.value.clone(),
                _ => panic!("expected name literal"),
            })
            .collect();
        assert_eq!(names, vec!["p", "a"]);
    }

    #[test]
    fn test_let_not_visible_at_its_own_checkpoint() {
        let out = rewrite_source("function main() { let a = 1; }");
        let Item::Function(f) = &out.program.items[0] else {
            panic!()
        };
        let Stmt::Try(t) = &f.body.stmts[1] else {
            panic!()
        };
        let Stmt::Expr(s) = &t.body.stmts[0] else {
            panic!()
        };
        let Expr::Call(c) = &s.expr else { panic!() };
        let Expr::Arrow(arrow) = &c.args[2] else {
            panic!()
        };
        let Expr::Call(locals) = arrow.body.as_ref() else {
            panic!()
        };
        assert!(locals.args.is_empty());
    }

    #[test]
    fn test_qualified_names() {
        let out = rewrite_source(
            "class Main { function run() { print(1); } }\nfunction helper() { print(2); }",
        );
        assert!(out.maps.methods.contains_key("demo.Main.run"));
        assert!(out.maps.methods.contains_key("demo.helper"));
    }

    #[test]
    fn test_idempotent() {
        let first = rewrite_source("function main() { let a = 1; print(a); }");
        let second = rewrite(&first.program, "demo", "demo.sbl").unwrap();
        assert_eq!(second.program, first.program);
        assert!(second.maps.checkpoints.is_empty());
    }

    #[test]
    fn test_try_regions_instrumented() {
        let out = rewrite_source(
            "function main() { try { print(1); } catch (e) { print(e); } finally { print(2); } }",
        );
        // try-stmt itself + one statement in each region
        assert_eq!(out.maps.methods["demo.main"].len(), 4);
    }

    #[test]
    fn test_duplicate_method_rejected() {
        let (program, _) = Parser::parse_source("function f() { } function f() { }");
        let err = rewrite(&program, "demo", "demo.sbl").unwrap_err();
        assert!(matches!(err, RewriteError::DuplicateMethod(_)));
    }
}
