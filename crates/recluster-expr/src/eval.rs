//! Typed tree-walking evaluation.

use std::fmt;

use crate::ast::{BinaryOp, Expr, Function, UnaryOp};
use crate::error::{EvalError, EvalResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Number(f64),
    Bool(bool),
}

impl Value {
    pub fn type_name(self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Bool(_) => "bool",
        }
    }

    fn number(self, op: &'static str) -> EvalResult<f64> {
        match self {
            Value::Number(n) => Ok(n),
            other => Err(mismatch(op, "number", other)),
        }
    }

    fn boolean(self, op: &'static str) -> EvalResult<bool> {
        match self {
            Value::Bool(b) => Ok(b),
            other => Err(mismatch(op, "bool", other)),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
        }
    }
}

fn mismatch(op: &'static str, expected: &'static str, found: Value) -> EvalError {
    EvalError::TypeMismatch {
        op,
        expected,
        found: found.type_name(),
    }
}

/// Variable environment for one evaluation.
///
/// Bindings are tiny (at most a handful of names), so a linear scan beats
/// hashing.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    vars: Vec<(String, Value)>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name`, replacing an earlier binding of the same name.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        match self.vars.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.vars.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.vars.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }
}

pub(crate) fn eval(expr: &Expr, vars: &Bindings) -> EvalResult<Value> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Var(name) => vars
            .get(name)
            .ok_or_else(|| EvalError::UnknownVariable(name.clone())),
        Expr::Unary { op, expr } => {
            let v = eval(expr, vars)?;
            match op {
                UnaryOp::Neg => Ok(Value::Number(-v.number("-")?)),
                UnaryOp::Not => Ok(Value::Bool(!v.boolean("!")?)),
            }
        }
        Expr::Binary { op, lhs, rhs } => binary(*op, lhs, rhs, vars),
        Expr::Ternary {
            cond,
            then,
            otherwise,
        } => {
            if eval(cond, vars)?.boolean("?:")? {
                eval(then, vars)
            } else {
                eval(otherwise, vars)
            }
        }
        Expr::Call { func, args } => call(*func, args, vars),
    }
}

fn binary(op: BinaryOp, lhs: &Expr, rhs: &Expr, vars: &Bindings) -> EvalResult<Value> {
    let sym = op.symbol();
    let number = |e: &Expr| eval(e, vars)?.number(sym);

    Ok(match op {
        // Short-circuit before touching the right-hand side.
        BinaryOp::And => {
            Value::Bool(eval(lhs, vars)?.boolean(sym)? && eval(rhs, vars)?.boolean(sym)?)
        }
        BinaryOp::Or => {
            Value::Bool(eval(lhs, vars)?.boolean(sym)? || eval(rhs, vars)?.boolean(sym)?)
        }
        BinaryOp::Eq => Value::Bool(equals(sym, eval(lhs, vars)?, eval(rhs, vars)?)?),
        BinaryOp::Ne => Value::Bool(!equals(sym, eval(lhs, vars)?, eval(rhs, vars)?)?),
        BinaryOp::Add => Value::Number(number(lhs)? + number(rhs)?),
        BinaryOp::Sub => Value::Number(number(lhs)? - number(rhs)?),
        BinaryOp::Mul => Value::Number(number(lhs)? * number(rhs)?),
        BinaryOp::Div => Value::Number(number(lhs)? / number(rhs)?),
        BinaryOp::Rem => Value::Number(number(lhs)? % number(rhs)?),
        BinaryOp::Lt => Value::Bool(number(lhs)? < number(rhs)?),
        BinaryOp::Le => Value::Bool(number(lhs)? <= number(rhs)?),
        BinaryOp::Gt => Value::Bool(number(lhs)? > number(rhs)?),
        BinaryOp::Ge => Value::Bool(number(lhs)? >= number(rhs)?),
    })
}

fn equals(sym: &'static str, l: Value, r: Value) -> EvalResult<bool> {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => Ok(a == b),
        (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
        (Value::Number(_), other) => Err(mismatch(sym, "number", other)),
        (Value::Bool(_), other) => Err(mismatch(sym, "bool", other)),
    }
}

fn call(func: Function, args: &[Expr], vars: &Bindings) -> EvalResult<Value> {
    let name = func.name();
    let mut nums = Vec::with_capacity(args.len());
    for arg in args {
        nums.push(eval(arg, vars)?.number(name)?);
    }
    // Arity was checked at compile time.
    let n = |i: usize| nums.get(i).copied().unwrap_or(f64::NAN);

    let out = match func {
        Function::Min => nums.iter().copied().fold(f64::INFINITY, f64::min),
        Function::Max => nums.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Function::Abs => n(0).abs(),
        Function::Floor => n(0).floor(),
        Function::Ceil => n(0).ceil(),
        Function::Sqrt => n(0).sqrt(),
        Function::Pow => n(0).powf(n(1)),
        Function::Log => n(0).ln(),
        Function::Clamp => n(0).max(n(1)).min(n(2)),
        Function::Double => n(0),
        Function::Int => n(0).trunc(),
    };
    Ok(Value::Number(out))
}
