//! Compiled boolean programs.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use cel_interpreter::objects::Map;
use cel_interpreter::{Context, Program, Value as CelValue};
use serde_json::Value;

use crate::activation::Activation;
use crate::error::{ConfigError, EvalError};

/// Raw outcome of running a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The program produced a boolean.
    Bool(bool),
    /// The program produced something else, rendered for logging.
    NonBoolean(String),
}

impl Verdict {
    /// Only `Bool(true)` lets an exchange continue.
    pub fn passed(&self) -> bool {
        matches!(self, Verdict::Bool(true))
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Bool(b) => write!(f, "{}", b),
            Verdict::NonBoolean(v) => write!(f, "non-boolean {}", v),
        }
    }
}

/// A precompiled check.
///
/// Implementations are built once from configuration and then shared
/// read-only by every concurrent exchange, hence `Send + Sync`.
pub trait Predicate: fmt::Debug + Send + Sync {
    /// Source text, used to identify the check in logs and abort errors.
    fn source(&self) -> &str;

    /// Evaluates the check against `activation`.
    fn evaluate(&self, activation: &Activation) -> Result<Verdict, EvalError>;
}

/// A CEL expression compiled with `cel-interpreter`.
///
/// # Examples
///
/// ```
/// use policy_gate::{Activation, CelProgram, Predicate, Verdict};
///
/// let check = CelProgram::compile("pre_method == 'GET'").unwrap();
///
/// let mut activation = Activation::new();
/// activation.insert("pre_method", "GET");
/// assert_eq!(check.evaluate(&activation).unwrap(), Verdict::Bool(true));
/// ```
#[derive(Debug, Clone)]
pub struct CelProgram {
    source: String,
    program: Arc<Program>,
}

impl CelProgram {
    /// Parses `source` into a program.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Compile`] if the expression does not parse,
    /// including when the parser panics on truncated input.
    pub fn compile(source: impl Into<String>) -> Result<Self, ConfigError> {
        let source = source.into();

        let message = match panic::catch_unwind(AssertUnwindSafe(|| Program::compile(&source))) {
            Ok(Ok(program)) => {
                return Ok(Self {
                    source,
                    program: Arc::new(program),
                })
            }
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("parser panicked: {}", panic_message(payload.as_ref())),
        };

        Err(ConfigError::Compile {
            expression: source,
            message,
        })
    }

    /// Names of the variables the expression reads.
    pub fn variables(&self) -> Vec<String> {
        self.program
            .references()
            .variables()
            .into_iter()
            .map(str::to_owned)
            .collect()
    }
}

impl Predicate for CelProgram {
    fn source(&self) -> &str {
        &self.source
    }

    fn evaluate(&self, activation: &Activation) -> Result<Verdict, EvalError> {
        let mut context = Context::default();
        for (name, value) in activation.iter() {
            context.add_variable_from_value(name, to_cel(value));
        }

        match self.program.execute(&context) {
            Ok(CelValue::Bool(b)) => Ok(Verdict::Bool(b)),
            Ok(other) => Ok(Verdict::NonBoolean(format!("{:?}", other))),
            Err(e) => Err(EvalError::new(e.to_string())),
        }
    }
}

fn panic_message<'a>(payload: &'a (dyn Any + Send + 'static)) -> &'a str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown cause")
}

/// Converts a JSON value into its CEL counterpart.
///
/// Integral numbers become `int` when they fit, so `post_metadata_status == 200`
/// compares like with like.
fn to_cel(value: &Value) -> CelValue {
    match value {
        Value::Null => CelValue::Null,
        Value::Bool(b) => CelValue::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                CelValue::Int(i)
            } else if let Some(u) = n.as_u64() {
                CelValue::UInt(u)
            } else {
                CelValue::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => CelValue::String(Arc::new(s.clone())),
        Value::Array(items) => CelValue::List(Arc::new(items.iter().map(to_cel).collect())),
        Value::Object(fields) => {
            let map: HashMap<Arc<String>, CelValue> = fields
                .iter()
                .map(|(k, v)| (Arc::new(k.clone()), to_cel(v)))
                .collect();
            CelValue::Map(Map::from(map))
        }
    }
}
