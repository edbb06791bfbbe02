//! Tree-walking interpreter over a compiled module.
//!
//! Environments are shared scope chains so that arrow closures — including
//! the locals providers the rewriter generates — observe live variable
//! slots rather than snapshots. The interpreter recognizes the injected
//! instrumentation identifiers and routes them to the process-wide debug
//! host; without a host installed they cost a single lookup and do nothing.

use crate::compiler::CompiledModule;
use crate::parser::ast::*;
use crate::vm::host::current_host;
use crate::vm::value::{binary_op, unary_op, Closure};
use crate::vm::{LocalsPairs, RuntimeError, RuntimeResult, Value};
use parking_lot::Mutex;
use std::cell::Cell;
use std::sync::Arc;

/// Maximum interpreter call depth.
const MAX_DEPTH: usize = 256;

/// One lexical scope: declared slots plus the enclosing scope.
pub struct Scope {
    vars: Vec<(String, Value)>,
    parent: Option<Env>,
}

/// Shared handle to a scope. Closures capture these.
pub type Env = Arc<Mutex<Scope>>;

fn child_env(parent: &Env) -> Env {
    Arc::new(Mutex::new(Scope {
        vars: Vec::new(),
        parent: Some(parent.clone()),
    }))
}

fn root_env() -> Env {
    Arc::new(Mutex::new(Scope {
        vars: Vec::new(),
        parent: None,
    }))
}

fn declare(env: &Env, name: &str, value: Value) {
    env.lock().vars.push((name.to_string(), value));
}

fn lookup(env: &Env, name: &str) -> Option<Value> {
    let mut cur = env.clone();
    loop {
        let next = {
            let scope = cur.lock();
            if let Some((_, v)) = scope.vars.iter().rev().find(|(n, _)| n == name) {
                return Some(v.clone());
            }
            scope.parent.clone()
        };
        match next {
            Some(parent) => cur = parent,
            None => return None,
        }
    }
}

fn assign(env: &Env, name: &str, value: Value) -> bool {
    let mut cur = env.clone();
    loop {
        let next = {
            let mut scope = cur.lock();
            if let Some((_, slot)) = scope.vars.iter_mut().rev().find(|(n, _)| n == name) {
                *slot = value;
                return true;
            }
            scope.parent.clone()
        };
        match next {
            Some(parent) => cur = parent,
            None => return false,
        }
    }
}

/// Statement outcome.
enum Flow {
    Normal,
    Return(Value),
}

/// Interpreter bound to one compiled module. Cheap to create; each script
/// thread runs its own.
pub struct Interpreter {
    module: Arc<CompiledModule>,
    depth: Cell<usize>,
}

impl Interpreter {
    pub fn new(module: Arc<CompiledModule>) -> Self {
        Self {
            module,
            depth: Cell::new(0),
        }
    }

    pub fn module(&self) -> &Arc<CompiledModule> {
        &self.module
    }

    /// Call a function by qualified name (`unit.f` or `unit.Class.m`).
    pub fn call(&self, qualified: &str, args: &[Value]) -> RuntimeResult<Value> {
        let decl = self
            .module
            .functions
            .get(qualified)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownFunction(qualified.to_string()))?;
        self.invoke_decl(&decl, qualified, args)
    }

    fn invoke_decl(
        &self,
        decl: &FunctionDecl,
        name: &str,
        args: &[Value],
    ) -> RuntimeResult<Value> {
        if args.len() != decl.params.len() {
            return Err(RuntimeError::ArityMismatch(
                name.to_string(),
                decl.params.len(),
                args.len(),
            ));
        }
        self.enter()?;
        let env = root_env();
        for (param, value) in decl.params.iter().zip(args) {
            declare(&env, &param.name.name, value.clone());
        }
        let result = self.exec_block(&decl.body, &env);
        self.leave();
        match result? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Null),
        }
    }

    /// Invoke a zero-parameter closure value.
    pub fn call_closure(&self, closure: &Closure, args: &[Value]) -> RuntimeResult<Value> {
        if !args.is_empty() {
            return Err(RuntimeError::ArityMismatch(
                "<function>".to_string(),
                0,
                args.len(),
            ));
        }
        self.enter()?;
        let result = if Arc::ptr_eq(&closure.module, &self.module) {
            self.eval(&closure.body, &closure.env)
        } else {
            Interpreter::new(closure.module.clone()).eval(&closure.body, &closure.env)
        };
        self.leave();
        result
    }

    fn enter(&self) -> RuntimeResult<()> {
        let depth = self.depth.get() + 1;
        if depth > MAX_DEPTH {
            return Err(RuntimeError::StackOverflow);
        }
        self.depth.set(depth);
        Ok(())
    }

    fn leave(&self) {
        self.depth.set(self.depth.get() - 1);
    }

    fn exec_block(&self, block: &Block, parent: &Env) -> RuntimeResult<Flow> {
        let env = child_env(parent);
        self.exec_stmts(&block.stmts, &env)
    }

    fn exec_stmts(&self, stmts: &[Stmt], env: &Env) -> RuntimeResult<Flow> {
        for stmt in stmts {
            match self.exec_stmt(stmt, env)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&self, stmt: &Stmt, env: &Env) -> RuntimeResult<Flow> {
        match stmt {
            Stmt::Let(s) => {
                let value = self.eval(&s.value, env)?;
                declare(env, &s.name.name, value);
                Ok(Flow::Normal)
            }
            Stmt::Expr(s) => {
                self.eval(&s.expr, env)?;
                Ok(Flow::Normal)
            }
            Stmt::If(s) => {
                if self.eval(&s.cond, env)?.expect_bool("if condition")? {
                    self.exec_block(&s.then_block, env)
                } else if let Some(branch) = &s.else_branch {
                    self.exec_stmt(branch, env)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While(s) => {
                while self.eval(&s.cond, env)?.expect_bool("while condition")? {
                    match self.exec_block(&s.body, env)? {
                        Flow::Normal => {}
                        flow => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Return(s) => {
                let value = match &s.value {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Throw(s) => {
                let value = self.eval(&s.value, env)?;
                Err(RuntimeError::Thrown(value.to_string()))
            }
            Stmt::Try(s) => self.exec_try(s, env),
            Stmt::Block(b) => self.exec_block(b, env),
        }
    }

    fn exec_try(&self, s: &TryStmt, env: &Env) -> RuntimeResult<Flow> {
        let mut outcome = self.exec_block(&s.body, env);

        if let (Err(err), Some(catch)) = (&outcome, &s.catch) {
            let catch_env = child_env(env);
            declare(&catch_env, &catch.param.name, Value::Str(err.to_string()));
            outcome = self.exec_stmts(&catch.body.stmts, &catch_env);
        }

        if let Some(finally) = &s.finally {
            match self.exec_block(finally, env) {
                // A quietly completing finally preserves the original outcome.
                Ok(Flow::Normal) => {}
                overriding => outcome = overriding,
            }
        }

        outcome
    }

    fn eval(&self, expr: &Expr, env: &Env) -> RuntimeResult<Value> {
        match expr {
            Expr::Null(_) => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(b.value)),
            Expr::Int(i) => Ok(Value::Int(i.value)),
            Expr::Float(f) => Ok(Value::Float(f.value)),
            Expr::Str(s) => Ok(Value::Str(s.value.clone())),
            Expr::Ident(ident) => lookup(env, &ident.name)
                .ok_or_else(|| RuntimeError::UndefinedVariable(ident.name.clone())),
            Expr::Array(a) => {
                let mut items = Vec::with_capacity(a.elements.len());
                for e in &a.elements {
                    items.push(self.eval(e, env)?);
                }
                Ok(Value::array(items))
            }
            Expr::Unary(u) => {
                let operand = self.eval(&u.operand, env)?;
                unary_op(u.op, &operand)
            }
            Expr::Binary(b) => {
                let lhs = self.eval(&b.lhs, env)?;
                let rhs = self.eval(&b.rhs, env)?;
                binary_op(b.op, &lhs, &rhs)
            }
            Expr::Logical(l) => {
                let lhs = self.eval(&l.lhs, env)?.expect_bool("logical operand")?;
                let short_circuit = match l.op {
                    LogicalOp::And => !lhs,
                    LogicalOp::Or => lhs,
                };
                if short_circuit {
                    return Ok(Value::Bool(lhs));
                }
                let rhs = self.eval(&l.rhs, env)?.expect_bool("logical operand")?;
                Ok(Value::Bool(rhs))
            }
            Expr::Assign(a) => {
                let value = self.eval(&a.value, env)?;
                if !assign(env, &a.target.name, value.clone()) {
                    return Err(RuntimeError::UndefinedVariable(a.target.name.clone()));
                }
                Ok(value)
            }
            Expr::Call(call) => self.eval_call(call, env),
            Expr::Member(m) => {
                let object = self.eval(&m.object, env)?;
                object.member(&m.property.name)
            }
            Expr::Index(i) => {
                let object = self.eval(&i.object, env)?;
                let index = self.eval(&i.index, env)?;
                object.index(&index)
            }
            Expr::Arrow(a) => Ok(Value::Closure(Arc::new(Closure {
                body: Arc::new((*a.body).clone()),
                env: env.clone(),
                module: self.module.clone(),
            }))),
            Expr::Paren(p) => self.eval(&p.inner, env),
        }
    }

    fn eval_call(&self, call: &CallExpr, env: &Env) -> RuntimeResult<Value> {
        if let Expr::Ident(name) = call.callee.as_ref() {
            // Injected instrumentation API
            match name.name.as_str() {
                "__locals" => return self.eval_locals_intrinsic(call, env),
                "__push_frame" => return self.eval_push_frame(call, env),
                "__pop_frame" => {
                    if let Some(host) = current_host() {
                        host.pop_frame();
                    }
                    return Ok(Value::Null);
                }
                "__checkpoint" => return self.eval_checkpoint(call, env),
                _ => {}
            }

            // Local variable holding a closure shadows functions and builtins.
            if let Some(value) = lookup(env, &name.name) {
                let args = self.eval_args(&call.args, env)?;
                return match value {
                    Value::Closure(closure) => self.call_closure(&closure, &args),
                    other => Err(RuntimeError::NotCallable(other.type_name())),
                };
            }

            let qualified = format!("{}.{}", self.module.unit_name, name.name);
            if self.module.functions.contains_key(&qualified) {
                let args = self.eval_args(&call.args, env)?;
                return self.call(&qualified, &args);
            }

            return self.eval_builtin(&name.name, call, env);
        }

        if let Expr::Member(m) = call.callee.as_ref() {
            // `Class.method(…)`
            if let Expr::Ident(obj) = m.object.as_ref() {
                let qualified = format!(
                    "{}.{}.{}",
                    self.module.unit_name, obj.name, m.property.name
                );
                if self.module.functions.contains_key(&qualified) {
                    let args = self.eval_args(&call.args, env)?;
                    return self.call(&qualified, &args);
                }
            }
            let target = self.eval(call.callee.as_ref(), env)?;
            let args = self.eval_args(&call.args, env)?;
            return match target {
                Value::Closure(closure) => self.call_closure(&closure, &args),
                other => Err(RuntimeError::NotCallable(other.type_name())),
            };
        }

        let target = self.eval(call.callee.as_ref(), env)?;
        let args = self.eval_args(&call.args, env)?;
        match target {
            Value::Closure(closure) => self.call_closure(&closure, &args),
            other => Err(RuntimeError::NotCallable(other.type_name())),
        }
    }

    fn eval_builtin(&self, name: &str, call: &CallExpr, env: &Env) -> RuntimeResult<Value> {
        match name {
            "print" => {
                let args = self.eval_args(&call.args, env)?;
                let [value] = args.as_slice() else {
                    return Err(RuntimeError::ArityMismatch(
                        "print".to_string(),
                        1,
                        args.len(),
                    ));
                };
                println!("{}", value);
                Ok(Value::Null)
            }
            "len" => {
                let args = self.eval_args(&call.args, env)?;
                let [value] = args.as_slice() else {
                    return Err(RuntimeError::ArityMismatch(
                        "len".to_string(),
                        1,
                        args.len(),
                    ));
                };
                value.length().map(Value::Int)
            }
            _ => Err(RuntimeError::UnknownFunction(name.to_string())),
        }
    }

    fn eval_args(&self, args: &[Expr], env: &Env) -> RuntimeResult<Vec<Value>> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            out.push(self.eval(arg, env)?);
        }
        Ok(out)
    }

    /// `__locals("a", a, "b", b, …)` → array of `[name, value]` pairs.
    fn eval_locals_intrinsic(&self, call: &CallExpr, env: &Env) -> RuntimeResult<Value> {
        let args = self.eval_args(&call.args, env)?;
        if args.len() % 2 != 0 {
            return Err(RuntimeError::TypeError(
                "__locals expects name/value pairs".to_string(),
            ));
        }
        let mut pairs = Vec::with_capacity(args.len() / 2);
        for chunk in args.chunks_exact(2) {
            let Value::Str(name) = &chunk[0] else {
                return Err(RuntimeError::TypeError(
                    "__locals names must be strings".to_string(),
                ));
            };
            pairs.push(Value::array(vec![
                Value::Str(name.clone()),
                chunk[1].clone(),
            ]));
        }
        Ok(Value::array(pairs))
    }

    fn eval_push_frame(&self, call: &CallExpr, env: &Env) -> RuntimeResult<Value> {
        let Some(method_arg) = call.args.first() else {
            return Err(RuntimeError::TypeError(
                "__push_frame requires a method name".to_string(),
            ));
        };
        let Value::Str(method) = self.eval(method_arg, env)? else {
            return Err(RuntimeError::TypeError(
                "__push_frame method name must be a string".to_string(),
            ));
        };
        if let Some(host) = current_host() {
            match self.eval_provider_arg(call.args.get(1), env)? {
                Some(closure) => {
                    let mut provider = || self.locals_from_closure(&closure);
                    host.push_frame(&method, Some(&mut provider));
                }
                None => host.push_frame(&method, None),
            }
        }
        Ok(Value::Null)
    }

    fn eval_checkpoint(&self, call: &CallExpr, env: &Env) -> RuntimeResult<Value> {
        let (Some(id_arg), Some(method_arg)) = (call.args.first(), call.args.get(1)) else {
            return Err(RuntimeError::TypeError(
                "__checkpoint requires an id and a method name".to_string(),
            ));
        };
        let Value::Int(id) = self.eval(id_arg, env)? else {
            return Err(RuntimeError::TypeError(
                "__checkpoint id must be an int".to_string(),
            ));
        };
        let Value::Str(method) = self.eval(method_arg, env)? else {
            return Err(RuntimeError::TypeError(
                "__checkpoint method name must be a string".to_string(),
            ));
        };
        let id = u32::try_from(id)
            .map_err(|_| RuntimeError::TypeError("checkpoint id out of range".to_string()))?;

        if let Some(host) = current_host() {
            match self.eval_provider_arg(call.args.get(2), env)? {
                Some(closure) => {
                    let mut provider = || self.locals_from_closure(&closure);
                    host.checkpoint(id, &method, Some(&mut provider));
                }
                None => host.checkpoint(id, &method, None),
            }
        }
        Ok(Value::Null)
    }

    fn eval_provider_arg(
        &self,
        arg: Option<&Expr>,
        env: &Env,
    ) -> RuntimeResult<Option<Arc<Closure>>> {
        match arg {
            None | Some(Expr::Null(_)) => Ok(None),
            Some(expr) => match self.eval(expr, env)? {
                Value::Closure(closure) => Ok(Some(closure)),
                Value::Null => Ok(None),
                other => Err(RuntimeError::TypeError(format!(
                    "locals provider must be a function, found {}",
                    other.type_name()
                ))),
            },
        }
    }

    /// Run a provider closure and convert its pair-array result.
    fn locals_from_closure(&self, closure: &Closure) -> RuntimeResult<LocalsPairs> {
        let value = self.call_closure(closure, &[])?;
        let Value::Array(entries) = value else {
            return Err(RuntimeError::TypeError(
                "locals provider must return pairs".to_string(),
            ));
        };
        let mut pairs = Vec::with_capacity(entries.len());
        for entry in entries.iter() {
            let Value::Array(pair) = entry else {
                return Err(RuntimeError::TypeError(
                    "locals provider must return pairs".to_string(),
                ));
            };
            let (Some(Value::Str(name)), Some(value)) = (pair.first(), pair.get(1)) else {
                return Err(RuntimeError::TypeError(
                    "locals provider must return pairs".to_string(),
                ));
            };
            pairs.push((name.clone(), value.clone()));
        }
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{compile, CompileOptions};

    fn run(source: &str, entry: &str, args: &[Value]) -> RuntimeResult<Value> {
        let module = compile(source, &CompileOptions::plain("t", "t.sbl")).unwrap();
        Interpreter::new(Arc::new(module)).call(entry, args)
    }

    #[test]
    fn test_arithmetic_and_return() {
        let v = run(
            "function main() { let a = 2; let b = 3; return a * b + 1; }",
            "t.main",
            &[],
        )
        .unwrap();
        assert_eq!(v, Value::Int(7));
    }

    #[test]
    fn test_function_and_method_calls() {
        let v = run(
            "class Math { function double(x) { return x * 2; } }\n\
             function main(n) { return Math.double(n) + helper(); }\n\
             function helper() { return 1; }",
            "t.main",
            &[Value::Int(10)],
        )
        .unwrap();
        assert_eq!(v, Value::Int(21));
    }

    #[test]
    fn test_while_and_assignment() {
        let v = run(
            "function main() { let i = 0; let sum = 0; while (i < 5) { sum = sum + i; i = i + 1; } return sum; }",
            "t.main",
            &[],
        )
        .unwrap();
        assert_eq!(v, Value::Int(10));
    }

    #[test]
    fn test_throw_and_catch() {
        let v = run(
            "function main() { try { throw \"boom\"; } catch (e) { return e; } }",
            "t.main",
            &[],
        )
        .unwrap();
        assert_eq!(v, Value::Str("boom".into()));
    }

    #[test]
    fn test_finally_runs_on_error_path() {
        // The finally block completes quietly and the original error still
        // propagates out of the function.
        let source = "function main() { try { let x = 1 / 0; return x; } finally { print(\"cleanup\"); } }";
        let err = run(source, "t.main", &[]).unwrap_err();
        assert!(matches!(err, RuntimeError::DivisionByZero));
    }

    #[test]
    fn test_finally_return_overrides() {
        let v = run(
            "function main() { try { return 1; } finally { return 2; } }",
            "t.main",
            &[],
        )
        .unwrap();
        assert_eq!(v, Value::Int(2));
    }

    #[test]
    fn test_closure_reads_live_slot() {
        let v = run(
            "function main() { let x = 1; let get = () => x; x = 42; return get(); }",
            "t.main",
            &[],
        )
        .unwrap();
        assert_eq!(v, Value::Int(42));
    }

    #[test]
    fn test_shadowing_in_nested_block() {
        let v = run(
            "function main() { let x = 1; { let x = 2; print(x); } return x; }",
            "t.main",
            &[],
        )
        .unwrap();
        assert_eq!(v, Value::Int(1));
    }

    #[test]
    fn test_recursion_and_overflow_guard() {
        let v = run(
            "function fib(n) { if (n < 2) { return n; } return fib(n - 1) + fib(n - 2); }",
            "t.fib",
            &[Value::Int(10)],
        )
        .unwrap();
        assert_eq!(v, Value::Int(55));

        let err = run(
            "function forever(n) { return forever(n + 1); }",
            "t.forever",
            &[Value::Int(0)],
        )
        .unwrap_err();
        assert!(matches!(err, RuntimeError::StackOverflow));
    }

    #[test]
    fn test_locals_intrinsic_shape() {
        let module = compile(
            "function probe(a) { return __locals(\"a\", a); }",
            &CompileOptions::plain("t", "t.sbl"),
        )
        .unwrap();
        let interp = Interpreter::new(Arc::new(module));
        let v = interp.call("t.probe", &[Value::Int(7)]).unwrap();
        let expected = Value::array(vec![Value::array(vec![
            Value::Str("a".into()),
            Value::Int(7),
        ])]);
        assert_eq!(v, expected);
    }

    #[test]
    fn test_instrumented_module_runs_without_host() {
        let module = compile(
            "function main() { let a = 1; return a + 1; }",
            &CompileOptions::script("t", "t.sbl"),
        )
        .unwrap();
        // No host installed: checkpoints are no-ops.
        let _guard = crate::vm::host::TEST_HOST_LOCK.lock();
        crate::vm::clear_host();
        let v = Interpreter::new(Arc::new(module)).call("t.main", &[]).unwrap();
        assert_eq!(v, Value::Int(2));
    }

    #[test]
    fn test_arity_mismatch() {
        let err = run("function f(a) { return a; }", "t.f", &[]).unwrap_err();
        assert!(matches!(err, RuntimeError::ArityMismatch(_, 1, 0)));
    }
}
