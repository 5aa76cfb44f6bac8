//! Expression tree.

use crate::error::{CompileError, CompileResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Bool(bool),
    Var(String),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Call {
        func: Function,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

/// Built-in functions. Resolved while parsing so a misspelt name or wrong
/// argument count is a compile error rather than a per-node failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Min,
    Max,
    Abs,
    Floor,
    Ceil,
    Sqrt,
    Pow,
    Log,
    Clamp,
    Double,
    Int,
}

impl Function {
    pub fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "min" => Function::Min,
            "max" => Function::Max,
            "abs" => Function::Abs,
            "floor" => Function::Floor,
            "ceil" => Function::Ceil,
            "sqrt" => Function::Sqrt,
            "pow" => Function::Pow,
            "log" => Function::Log,
            "clamp" => Function::Clamp,
            "double" => Function::Double,
            "int" => Function::Int,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Function::Min => "min",
            Function::Max => "max",
            Function::Abs => "abs",
            Function::Floor => "floor",
            Function::Ceil => "ceil",
            Function::Sqrt => "sqrt",
            Function::Pow => "pow",
            Function::Log => "log",
            Function::Clamp => "clamp",
            Function::Double => "double",
            Function::Int => "int",
        }
    }

    /// Accepted argument count as `(min, max)`; `None` means variadic.
    fn arity(self) -> (usize, Option<usize>) {
        match self {
            Function::Min | Function::Max => (1, None),
            Function::Pow => (2, Some(2)),
            Function::Clamp => (3, Some(3)),
            _ => (1, Some(1)),
        }
    }

    pub fn check_arity(self, got: usize) -> CompileResult<()> {
        let (min, max) = self.arity();
        let ok = got >= min && max.is_none_or(|m| got <= m);
        if ok {
            return Ok(());
        }
        let expected = match max {
            Some(m) if m == min => min.to_string(),
            Some(m) => format!("{min}..={m}"),
            None => format!("at least {min}"),
        };
        Err(CompileError::Arity {
            function: self.name(),
            expected,
            got,
        })
    }
}
