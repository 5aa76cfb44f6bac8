//! recluster-expr — expression language for placement policies.
//!
//! Hard constraints (`ram >= 4 && cpu > 2`), metric transforms
//! (`min(x, 180)`) and feed-to-weight mappings (`1 + value / 100`) all
//! compile through one [`Evaluator`].
//!
//! ```text
//!   source ──► lexer ──► parser ──► Program (cached per source string)
//!                                      │
//!                        Bindings ────►├──► eval_bool  (constraints)
//!                                      └──► eval_f64   (transforms, mappings)
//! ```
//!
//! Compile errors (syntax, unknown function, arity) are cached alongside
//! successful programs so a broken policy is reported once per string, not
//! once per node. Evaluation errors (unknown variable, type mismatch) only
//! fail the evaluation that hit them.

pub mod ast;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod parser;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

pub use error::{CompileError, CompileResult, EvalError, EvalResult};
pub use eval::{Bindings, Value};

/// A compiled expression.
#[derive(Debug, Clone)]
pub struct Program {
    source: String,
    root: ast::Expr,
}

impl Program {
    pub fn compile(source: &str) -> CompileResult<Self> {
        Ok(Self {
            source: source.to_string(),
            root: parser::parse(source)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn eval(&self, vars: &Bindings) -> EvalResult<Value> {
        eval::eval(&self.root, vars)
    }

    pub fn eval_bool(&self, vars: &Bindings) -> EvalResult<bool> {
        match self.eval(vars)? {
            Value::Bool(b) => Ok(b),
            other => Err(EvalError::TypeMismatch {
                op: "result",
                expected: "bool",
                found: other.type_name(),
            }),
        }
    }

    /// Numeric result. Booleans are not coerced.
    pub fn eval_f64(&self, vars: &Bindings) -> EvalResult<f64> {
        match self.eval(vars)? {
            Value::Number(n) => Ok(n),
            other => Err(EvalError::TypeMismatch {
                op: "result",
                expected: "number",
                found: other.type_name(),
            }),
        }
    }
}

type Compiled = CompileResult<Arc<Program>>;

#[derive(Debug, Default)]
struct Generations {
    current: HashMap<String, Compiled>,
    previous: HashMap<String, Compiled>,
}

/// Compiles expressions and caches the outcome per source string.
///
/// Constructed explicitly and passed to the scorer, so each planner (and
/// each test) owns an isolated cache. The cache holds two generations:
/// [`Evaluator::rotate`] starts a new one, and anything not compiled since
/// the previous rotation is dropped.
#[derive(Debug, Default)]
pub struct Evaluator {
    cache: RwLock<Generations>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile(&self, source: &str) -> Compiled {
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = cache.current.get(source) {
                return hit.clone();
            }
        }
        {
            let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = cache.current.get(source) {
                return hit.clone();
            }
            if let Some(hit) = cache.previous.remove(source) {
                cache.current.insert(source.to_string(), hit.clone());
                return hit;
            }
        }

        let compiled = Program::compile(source).map(Arc::new);
        if let Err(e) = &compiled {
            debug!(expression = %source, error = %e, "expression failed to compile");
        }
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache
            .current
            .entry(source.to_string())
            .or_insert(compiled)
            .clone()
    }

    /// Start a new cache generation, dropping every source not compiled
    /// since the last rotation.
    pub fn rotate(&self) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let current = std::mem::take(&mut cache.current);
        cache.previous = current;
    }

    /// Number of distinct source strings currently cached.
    pub fn cached(&self) -> usize {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache.current.len() + cache.previous.len()
    }

    pub fn clear(&self) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.current.clear();
        cache.previous.clear();
    }
}
