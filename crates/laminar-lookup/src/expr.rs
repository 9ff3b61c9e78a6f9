//! Join key expressions and their evaluation.
//!
//! A lookup join computes one value per configured key expression for every
//! incoming row. [`KeyEvaluator`] is the seam the operator evaluates through;
//! [`KeyExpr`] is the built-in implementation covering field and metadata
//! references, literals, and calls into a [`FunctionRegistry`].
//!
//! # Null Handling
//!
//! A reference to a missing field or metadata key evaluates to
//! `Value::Null`. Functions receive null arguments as-is and decide for
//! themselves; the built-ins propagate null.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::tuple::Tuple;

/// Errors from join key evaluation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    /// The expression calls a function that is not registered.
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    /// The function rejected its arguments.
    #[error("function '{name}' failed: {message}")]
    Function {
        /// Function name.
        name: String,
        /// Failure reported by the function.
        message: String,
    },
}

/// Signature of a scalar function valuer.
pub type ScalarFunction = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// Named scalar functions available to key expressions.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: FxHashMap<String, ScalarFunction>,
}

impl FunctionRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with `lower`, `upper`, `concat` and `coalesce`.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("lower", |args| {
            map_string(args, "lower", |s| Value::String(s.to_lowercase()))
        });
        registry.register("upper", |args| {
            map_string(args, "upper", |s| Value::String(s.to_uppercase()))
        });
        registry.register("concat", |args| {
            if args.iter().any(Value::is_null) {
                return Ok(Value::Null);
            }
            let joined: String = args.iter().map(scalar_to_string).collect();
            Ok(Value::String(joined))
        });
        registry.register("coalesce", |args| {
            Ok(args.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null))
        });
        registry
    }

    /// Registers (or replaces) a function under `name`. Names are
    /// case-insensitive.
    pub fn register<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.insert(name.to_ascii_lowercase(), Arc::new(f));
    }

    /// Calls `name` with `args`.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::UnknownFunction`] if `name` is not registered, or
    /// [`EvalError::Function`] if the function fails.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        let f = self
            .functions
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| EvalError::UnknownFunction(name.to_string()))?;
        f(args).map_err(|message| EvalError::Function {
            name: name.to_string(),
            message,
        })
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(&name.to_ascii_lowercase())
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

fn map_string(
    args: &[Value],
    name: &str,
    f: impl Fn(&str) -> Value,
) -> Result<Value, String> {
    match args {
        [Value::Null] => Ok(Value::Null),
        [Value::String(s)] => Ok(f(s)),
        [other] => Err(format!("{name} expects a string, got {other}")),
        _ => Err(format!("{name} expects 1 argument, got {}", args.len())),
    }
}

fn scalar_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Evaluates one join key against a row.
pub trait KeyEvaluator: Send + Sync {
    /// Computes the key value for `row`.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError`] if a function call fails.
    fn evaluate(&self, row: &Tuple, functions: &FunctionRegistry) -> Result<Value, EvalError>;
}

/// Built-in join key expression.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyExpr {
    /// Field of the row (`orders.customer_id`).
    Field(String),
    /// Metadata annotation of the row (`meta(topic)`).
    Meta(String),
    /// Constant value.
    Literal(Value),
    /// Scalar function call.
    Call {
        /// Function name, resolved in the [`FunctionRegistry`].
        name: String,
        /// Arguments, evaluated left to right.
        args: Vec<KeyExpr>,
    },
}

impl KeyExpr {
    /// Shorthand for [`KeyExpr::Field`].
    #[must_use]
    pub fn field(name: impl Into<String>) -> Self {
        Self::Field(name.into())
    }

    /// Shorthand for [`KeyExpr::Call`].
    #[must_use]
    pub fn call(name: impl Into<String>, args: Vec<KeyExpr>) -> Self {
        Self::Call {
            name: name.into(),
            args,
        }
    }
}

impl KeyEvaluator for KeyExpr {
    fn evaluate(&self, row: &Tuple, functions: &FunctionRegistry) -> Result<Value, EvalError> {
        match self {
            Self::Field(name) => Ok(row.value(name).cloned().unwrap_or(Value::Null)),
            Self::Meta(name) => Ok(row.meta(name).cloned().unwrap_or(Value::Null)),
            Self::Literal(v) => Ok(v.clone()),
            Self::Call { name, args } => {
                let values = args
                    .iter()
                    .map(|a| a.evaluate(row, functions))
                    .collect::<Result<Vec<_>, _>>()?;
                functions.call(name, &values)
            }
        }
    }
}

impl fmt::Display for KeyExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => write!(f, "{name}"),
            Self::Meta(name) => write!(f, "meta({name})"),
            Self::Literal(v) => write!(f, "{v}"),
            Self::Call { name, args } => {
                write!(f, "{name}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
        }
    }
}
