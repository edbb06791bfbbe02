//! Name resolution for Sable programs.
//!
//! The resolver validates identifier references, call targets, and duplicate
//! declarations, and owns the lexical-scope bookkeeping ([`ScopeStack`]) that
//! the instrumenting rewriter reuses to compute the ordered visible-locals
//! set at each statement.

use crate::parser::ast::*;
use crate::parser::token::Token;
use crate::parser::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};

/// Names of the injected instrumentation runtime API. Calls to these resolve
/// unconditionally; the interpreter routes them to the process-wide debug
/// host.
pub const INTRINSICS: &[&str] = &["__push_frame", "__pop_frame", "__checkpoint", "__locals"];

/// Built-in functions available to every unit, with their arity.
pub const BUILTINS: &[(&str, usize)] = &[("print", 1), ("len", 1)];

/// Lexical scope tracker. Scope 0 of a function holds its parameters;
/// nested blocks push and pop further scopes.
#[derive(Default)]
pub struct ScopeStack {
    scopes: Vec<Vec<String>>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self) {
        self.scopes.push(Vec::new());
    }

    pub fn pop(&mut self) {
        self.scopes.pop();
    }

    /// Declare a name in the innermost scope. Returns false if the name is
    /// already declared in that same scope.
    pub fn declare(&mut self, name: &str) -> bool {
        let scope = self.scopes.last_mut().expect("no active scope");
        if scope.iter().any(|n| n == name) {
            return false;
        }
        scope.push(name.to_string());
        true
    }

    /// True if the name is visible in any enclosing scope.
    pub fn is_visible(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.iter().any(|n| n == name))
    }

    /// All visible names in declaration order — outermost scope (parameters)
    /// first — deduplicated by name, keeping the first occurrence.
    pub fn visible_names(&self) -> Vec<String> {
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        for scope in &self.scopes {
            for name in scope {
                if seen.insert(name.clone()) {
                    out.push(name.clone());
                }
            }
        }
        out
    }
}

/// Per-unit declaration table plus reference checking.
pub struct Resolver {
    /// Free function name → arity
    functions: FxHashMap<String, usize>,
    /// Class name → method name → arity
    classes: FxHashMap<String, FxHashMap<String, usize>>,
    scopes: ScopeStack,
    diagnostics: Vec<Diagnostic>,
}

/// Resolve a parsed program, returning every diagnostic found.
pub fn resolve(program: &Program) -> Vec<Diagnostic> {
    let mut resolver = Resolver::new(program);
    resolver.check(program);
    resolver.diagnostics
}

impl Resolver {
    fn new(program: &Program) -> Self {
        let mut resolver = Self {
            functions: FxHashMap::default(),
            classes: FxHashMap::default(),
            scopes: ScopeStack::new(),
            diagnostics: Vec::new(),
        };
        resolver.collect_declarations(program);
        resolver
    }

    fn collect_declarations(&mut self, program: &Program) {
        for item in &program.items {
            match item {
                Item::Function(f) => {
                    if self
                        .functions
                        .insert(f.name.name.clone(), f.params.len())
                        .is_some()
                    {
                        self.diagnostics.push(Diagnostic::new(
                            format!("duplicate function '{}'", f.name.name),
                            f.name.span,
                        ));
                    }
                }
                Item::Class(c) => {
                    if self.classes.contains_key(&c.name.name)
                        || self.functions.contains_key(&c.name.name)
                    {
                        self.diagnostics.push(Diagnostic::new(
                            format!("duplicate declaration '{}'", c.name.name),
                            c.name.span,
                        ));
                    }
                    let methods = self.classes.entry(c.name.name.clone()).or_default();
                    for m in &c.methods {
                        if methods.insert(m.name.name.clone(), m.params.len()).is_some() {
                            self.diagnostics.push(Diagnostic::new(
                                format!(
                                    "duplicate method '{}.{}'",
                                    c.name.name, m.name.name
                                ),
                                m.name.span,
                            ));
                        }
                    }
                }
            }
        }
    }

    fn check(&mut self, program: &Program) {
        for item in &program.items {
            match item {
                Item::Function(f) => self.check_function(f),
                Item::Class(c) => {
                    for m in &c.methods {
                        self.check_function(m);
                    }
                }
            }
        }
    }

    fn check_function(&mut self, f: &FunctionDecl) {
        self.scopes.push();
        for p in &f.params {
            if !self.scopes.declare(&p.name.name) {
                self.diagnostics.push(Diagnostic::new(
                    format!("duplicate parameter '{}'", p.name.name),
                    p.name.span,
                ));
            }
        }
        self.check_block(&f.body);
        self.scopes.pop();
    }

    fn check_block(&mut self, block: &Block) {
        self.scopes.push();
        for stmt in &block.stmts {
            self.check_stmt(stmt);
        }
        self.scopes.pop();
    }

    fn check_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Let(s) => {
                self.check_expr(&s.value);
                if !self.scopes.declare(&s.name.name) {
                    self.diagnostics.push(Diagnostic::new(
                        format!("'{}' is already declared in this scope", s.name.name),
                        s.name.span,
                    ));
                }
            }
            Stmt::Expr(s) => self.check_expr(&s.expr),
            Stmt::If(s) => {
                self.check_expr(&s.cond);
                self.check_block(&s.then_block);
                if let Some(branch) = &s.else_branch {
                    self.check_stmt(branch);
                }
            }
            Stmt::While(s) => {
                self.check_expr(&s.cond);
                self.check_block(&s.body);
            }
            Stmt::Return(s) => {
                if let Some(value) = &s.value {
                    self.check_expr(value);
                }
            }
            Stmt::Throw(s) => self.check_expr(&s.value),
            Stmt::Try(s) => {
                self.check_block(&s.body);
                if let Some(catch) = &s.catch {
                    self.scopes.push();
                    self.scopes.declare(&catch.param.name);
                    for stmt in &catch.body.stmts {
                        self.check_stmt(stmt);
                    }
                    self.scopes.pop();
                }
                if let Some(finally) = &s.finally {
                    self.check_block(finally);
                }
            }
            Stmt::Block(b) => self.check_block(b),
        }
    }

    fn check_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Null(_) | Expr::Bool(_) | Expr::Int(_) | Expr::Float(_) | Expr::Str(_) => {}
            Expr::Ident(ident) => {
                if !self.scopes.is_visible(&ident.name) {
                    self.diagnostics.push(Diagnostic::new(
                        format!("unknown variable '{}'", ident.name),
                        ident.span,
                    ));
                }
            }
            Expr::Array(a) => {
                for e in &a.elements {
                    self.check_expr(e);
                }
            }
            Expr::Unary(u) => self.check_expr(&u.operand),
            Expr::Binary(b) => {
                self.check_expr(&b.lhs);
                self.check_expr(&b.rhs);
            }
            Expr::Logical(l) => {
                self.check_expr(&l.lhs);
                self.check_expr(&l.rhs);
            }
            Expr::Assign(a) => {
                self.check_expr(&a.value);
                if !self.scopes.is_visible(&a.target.name) {
                    self.diagnostics.push(Diagnostic::new(
                        format!("assignment to undeclared variable '{}'", a.target.name),
                        a.target.span,
                    ));
                }
            }
            Expr::Call(call) => self.check_call(call),
            Expr::Member(m) => {
                // Dynamic member access on a value; `Class.method` without a
                // call is rejected because methods are not first-class.
                if let Expr::Ident(obj) = m.object.as_ref() {
                    if self.classes.contains_key(&obj.name) {
                        self.diagnostics.push(Diagnostic::new(
                            format!(
                                "method '{}.{}' must be called",
                                obj.name, m.property.name
                            ),
                            m.span,
                        ));
                        return;
                    }
                }
                self.check_expr(&m.object);
            }
            Expr::Index(i) => {
                self.check_expr(&i.object);
                self.check_expr(&i.index);
            }
            Expr::Arrow(a) => self.check_expr(&a.body),
            Expr::Paren(p) => self.check_expr(&p.inner),
        }
    }

    fn check_call(&mut self, call: &CallExpr) {
        for arg in &call.args {
            self.check_expr(arg);
        }
        match call.callee.as_ref() {
            Expr::Ident(name) => {
                if INTRINSICS.contains(&name.name.as_str()) || self.scopes.is_visible(&name.name)
                {
                    return;
                }
                if let Some(&arity) = self.functions.get(&name.name) {
                    self.check_arity(&name.name, arity, call);
                    return;
                }
                if let Some(&(_, arity)) =
                    BUILTINS.iter().find(|(b, _)| *b == name.name.as_str())
                {
                    self.check_arity(&name.name, arity, call);
                    return;
                }
                self.diagnostics.push(Diagnostic::new(
                    format!("unknown function '{}'", name.name),
                    name.span,
                ));
            }
            Expr::Member(m) => {
                if let Expr::Ident(obj) = m.object.as_ref() {
                    if let Some(methods) = self.classes.get(&obj.name) {
                        let qualified = format!("{}.{}", obj.name, m.property.name);
                        match methods.get(&m.property.name) {
                            Some(&arity) => self.check_arity(&qualified, arity, call),
                            None => self.diagnostics.push(Diagnostic::new(
                                format!("unknown method '{}'", qualified),
                                m.property.span,
                            )),
                        }
                        return;
                    }
                }
                // Dynamic member call on a runtime value; dispatch is checked
                // when it executes.
                self.check_expr(&m.object);
            }
            other => self.check_expr(other),
        }
    }

    fn check_arity(&mut self, name: &str, arity: usize, call: &CallExpr) {
        if call.args.len() != arity {
            self.diagnostics.push(Diagnostic::new(
                format!(
                    "'{}' takes {} argument(s) but {} were supplied",
                    name,
                    arity,
                    call.args.len()
                ),
                call.span,
            ));
        }
    }
}

/// True if `name` is safe to use verbatim as a Sable identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let leading_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    leading_ok
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !Token::is_reserved(name)
}
