//! Boxed runtime values with dynamically dispatched operators.
//!
//! Every operator and member access resolves against the runtime type, which
//! is what lets the expression evaluator run debugger-console expressions
//! over a paused frame's locals without static type information.

use crate::compiler::CompiledModule;
use crate::parser::ast::{BinaryOp, Expr, UnaryOp};
use crate::vm::interpreter::Env;
use crate::vm::{RuntimeError, RuntimeResult};
use std::fmt;
use std::sync::Arc;

/// A boxed Sable value.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Arc<Vec<Value>>),
    Closure(Arc<Closure>),
}

/// A zero-parameter arrow function with its captured environment. The
/// environment is shared, so the closure observes live variable slots.
pub struct Closure {
    pub body: Arc<Expr>,
    pub env: Env,
    pub module: Arc<CompiledModule>,
}

impl Value {
    pub fn array(values: Vec<Value>) -> Value {
        Value::Array(Arc::new(values))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Closure(_) => "function",
        }
    }

    /// Boolean coercion for conditions. There is no implicit truthiness.
    pub fn expect_bool(&self, context: &str) -> RuntimeResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(RuntimeError::TypeError(format!(
                "{} must be a boolean, found {}",
                context,
                other.type_name()
            ))),
        }
    }

    /// Element count of a string or array.
    pub fn length(&self) -> RuntimeResult<i64> {
        match self {
            Value::Str(s) => Ok(s.chars().count() as i64),
            Value::Array(a) => Ok(a.len() as i64),
            other => Err(RuntimeError::TypeError(format!(
                "{} has no length",
                other.type_name()
            ))),
        }
    }

    /// Dynamic member access.
    pub fn member(&self, name: &str) -> RuntimeResult<Value> {
        match name {
            "len" => self.length().map(Value::Int),
            _ => Err(RuntimeError::TypeError(format!(
                "no member '{}' on {}",
                name,
                self.type_name()
            ))),
        }
    }

    /// Array index read.
    pub fn index(&self, index: &Value) -> RuntimeResult<Value> {
        let (Value::Array(items), Value::Int(i)) = (self, index) else {
            return Err(RuntimeError::TypeError(format!(
                "cannot index {} with {}",
                self.type_name(),
                index.type_name()
            )));
        };
        usize::try_from(*i)
            .ok()
            .and_then(|idx| items.get(idx))
            .cloned()
            .ok_or(RuntimeError::IndexOutOfBounds(*i, items.len()))
    }
}

/// Apply a binary operator, dispatching on the runtime operand types.
pub fn binary_op(op: BinaryOp, lhs: &Value, rhs: &Value) -> RuntimeResult<Value> {
    use BinaryOp::*;
    match op {
        Add => add(lhs, rhs),
        Sub | Mul | Div | Mod => arithmetic(op, lhs, rhs),
        Eq => Ok(Value::Bool(values_equal(lhs, rhs))),
        Ne => Ok(Value::Bool(!values_equal(lhs, rhs))),
        Lt | Le | Gt | Ge => compare(op, lhs, rhs),
    }
}

/// Apply a unary operator.
pub fn unary_op(op: UnaryOp, operand: &Value) -> RuntimeResult<Value> {
    match (op, operand) {
        (UnaryOp::Neg, Value::Int(v)) => Ok(Value::Int(v.wrapping_neg())),
        (UnaryOp::Neg, Value::Float(v)) => Ok(Value::Float(-v)),
        (UnaryOp::Not, Value::Bool(v)) => Ok(Value::Bool(!v)),
        (op, other) => Err(RuntimeError::TypeError(format!(
            "cannot apply '{}' to {}",
            match op {
                UnaryOp::Neg => "-",
                UnaryOp::Not => "!",
            },
            other.type_name()
        ))),
    }
}

fn add(lhs: &Value, rhs: &Value) -> RuntimeResult<Value> {
    match (lhs, rhs) {
        (Value::Str(a), b) => Ok(Value::Str(format!("{}{}", a, b))),
        (a, Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
        _ => arithmetic(BinaryOp::Add, lhs, rhs),
    }
}

fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> RuntimeResult<Value> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => int_arithmetic(op, *a, *b),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(float_arithmetic(op, *a, *b))),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(float_arithmetic(op, *a as f64, *b))),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(float_arithmetic(op, *a, *b as f64))),
        (a, b) => Err(RuntimeError::TypeError(format!(
            "cannot apply '{}' to {} and {}",
            op_text(op),
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn int_arithmetic(op: BinaryOp, a: i64, b: i64) -> RuntimeResult<Value> {
    let v = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div => a.checked_div(b).ok_or(RuntimeError::DivisionByZero)?,
        BinaryOp::Mod => a.checked_rem(b).ok_or(RuntimeError::DivisionByZero)?,
        _ => unreachable!("not an arithmetic operator"),
    };
    Ok(Value::Int(v))
}

fn float_arithmetic(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        _ => unreachable!("not an arithmetic operator"),
    }
}

fn compare(op: BinaryOp, lhs: &Value, rhs: &Value) -> RuntimeResult<Value> {
    let ordering = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (a, b) => {
            return Err(RuntimeError::TypeError(format!(
                "cannot compare {} and {}",
                a.type_name(),
                b.type_name()
            )))
        }
    };
    let Some(ordering) = ordering else {
        return Ok(Value::Bool(false));
    };
    let result = match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::Ge => ordering.is_ge(),
        _ => unreachable!("not a comparison operator"),
    };
    Ok(Value::Bool(result))
}

/// Structural equality; int/float compare numerically, closures by identity.
pub fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a == b,
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| values_equal(x, y))
        }
        (Value::Closure(a), Value::Closure(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

fn op_text(op: BinaryOp) -> &'static str {
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

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        values_equal(self, other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{:.1}", v)
                } else {
                    write!(f, "{}", v)
                }
            }
            Value::Str(s) => write!(f, "{}", s),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Closure(_) => write!(f, "<function>"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s),
            other => write!(f, "{}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_arithmetic_and_promotion() {
        assert_eq!(
            binary_op(BinaryOp::Add, &Value::Int(2), &Value::Int(3)).unwrap(),
            Value::Int(5)
        );
        assert_eq!(
            binary_op(BinaryOp::Mul, &Value::Int(2), &Value::Float(1.5)).unwrap(),
            Value::Float(3.0)
        );
    }

    #[test]
    fn test_division_by_zero() {
        let err = binary_op(BinaryOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert!(matches!(err, RuntimeError::DivisionByZero));
        assert!(err.to_string().contains("division by zero"));

        let err = binary_op(BinaryOp::Mod, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert!(matches!(err, RuntimeError::DivisionByZero));
    }

    #[test]
    fn test_string_concat() {
        assert_eq!(
            binary_op(BinaryOp::Add, &Value::Str("n=".into()), &Value::Int(4)).unwrap(),
            Value::Str("n=4".into())
        );
    }

    #[test]
    fn test_comparison() {
        assert_eq!(
            binary_op(BinaryOp::Lt, &Value::Int(1), &Value::Float(1.5)).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            binary_op(BinaryOp::Ge, &Value::Str("b".into()), &Value::Str("a".into())).unwrap(),
            Value::Bool(true)
        );
        assert!(binary_op(BinaryOp::Lt, &Value::Int(1), &Value::Str("a".into())).is_err());
    }

    #[test]
    fn test_member_len() {
        assert_eq!(Value::Str("abc".into()).member("len").unwrap(), Value::Int(3));
        assert_eq!(
            Value::array(vec![Value::Int(1), Value::Int(2)])
                .member("len")
                .unwrap(),
            Value::Int(2)
        );
        assert!(Value::Int(1).member("len").is_err());
        assert!(Value::Str("abc".into()).member("size").is_err());
    }

    #[test]
    fn test_index() {
        let arr = Value::array(vec![Value::Int(10), Value::Int(20)]);
        assert_eq!(arr.index(&Value::Int(1)).unwrap(), Value::Int(20));
        assert!(matches!(
            arr.index(&Value::Int(5)).unwrap_err(),
            RuntimeError::IndexOutOfBounds(5, 2)
        ));
        assert!(arr.index(&Value::Int(-1)).is_err());
    }

    #[test]
    fn test_type_error_mentions_types() {
        let err = binary_op(BinaryOp::Sub, &Value::Bool(true), &Value::Int(1)).unwrap_err();
        assert!(err.to_string().contains("boolean"));
    }
}
