use std::fmt;

/// Boxed error type carried by [`Error::Delegate`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced to the caller of a gated stage.
///
/// These are the fail-closed outcomes of an exchange: a check abort, or
/// the wrapped stage's own failure passed through unchanged.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A check evaluated to `false`, to a non-boolean, or failed to evaluate.
    #[error("{gate}: request aborted by check `{check}`")]
    Aborted {
        /// Name of the gate that ran the check (e.g. `proxy /users-pre`)
        gate: String,
        /// Source text of the failing check
        check: String,
    },
    /// The delegate stage failed.
    #[error("delegate failed: {0}")]
    Delegate(#[source] BoxError),
}

impl Error {
    /// Wraps any error as a delegate failure.
    pub fn delegate(err: impl Into<BoxError>) -> Self {
        Error::Delegate(err.into())
    }

    /// Returns `true` if this error is a check abort.
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Aborted { .. })
    }
}

/// Errors raised while building a gate from its definitions.
///
/// Callers treat these as "leave the stage undecorated": the gate is
/// skipped rather than the endpoint going down.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The expression did not parse.
    #[error("cannot compile `{expression}`: {message}")]
    Compile {
        /// Offending expression source
        expression: String,
        /// Parser diagnostic
        message: String,
    },
    /// The expression references both request and response variables.
    #[error("`{expression}` references both request and response variables")]
    MixedPhase {
        /// Offending expression source
        expression: String,
    },
    /// The expression is tagged for one phase but reads the other phase's variables.
    #[error("`{expression}` is a {phase} check but references `{variable}`")]
    WrongPhase {
        /// Offending expression source
        expression: String,
        /// Phase the definition was tagged with
        phase: crate::Phase,
        /// Variable that is not available in that phase
        variable: String,
    },
}

/// Result of evaluating a single program.
///
/// Carried by [`crate::Predicate::evaluate`]; failures are logged and turned
/// into [`Error::Aborted`] by the check list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalError {
    message: String,
}

impl EvalError {
    /// Creates a new evaluation error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evaluation failed: {}", self.message)
    }
}

impl std::error::Error for EvalError {}
