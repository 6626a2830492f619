use std::sync::Arc;

use crate::{
    activation::Activation,
    error::Error,
    logging::GateLog,
    program::{Predicate, Verdict},
};

/// An ordered list of checks for one phase of an exchange.
///
/// Built once at construction time and then shared, read-only, by every
/// exchange going through the gate.
///
/// # Examples
///
/// ```
/// use policy_gate::{Activation, CelProgram, CheckList, GateLog};
///
/// let checks = CheckList::new()
///     .require(CelProgram::compile("pre_method == 'GET'").unwrap())
///     .require(CelProgram::compile("pre_path.startsWith('/api')").unwrap());
///
/// let mut activation = Activation::new();
/// activation.insert("pre_method", "GET");
/// activation.insert("pre_path", "/api/users");
///
/// assert!(checks.evaluate(&activation, &GateLog::new("proxy /api-pre")).is_ok());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CheckList {
    checks: Vec<Arc<dyn Predicate>>,
}

impl CheckList {
    /// Creates an empty list. An empty list always passes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a check, returning the list for chaining.
    pub fn require(mut self, check: impl Predicate + 'static) -> Self {
        self.checks.push(Arc::new(check));
        self
    }

    /// Appends an already shared check.
    pub fn push(&mut self, check: Arc<dyn Predicate>) {
        self.checks.push(check);
    }

    /// Number of checks.
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// Returns `true` if there are no checks.
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Source text of each check, in evaluation order.
    pub fn sources(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.source()).collect()
    }

    /// Runs the checks in order against `activation`.
    ///
    /// Stops at the first check that errors, yields a non-boolean, or yields
    /// `false`; later checks are not evaluated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Aborted`] naming the first failing check.
    pub fn evaluate(&self, activation: &Activation, log: &GateLog<'_>) -> Result<(), Error> {
        for (i, check) in self.checks.iter().enumerate() {
            match check.evaluate(activation) {
                Ok(Verdict::Bool(true)) => {
                    log.debug(format_args!(
                        "evaluator #{} `{}` result: true",
                        i,
                        check.source()
                    ));
                }
                Ok(verdict) => {
                    log.info(format_args!(
                        "evaluator #{} `{}` result: {}",
                        i,
                        check.source(),
                        verdict
                    ));
                    return Err(abort(log, check.as_ref()));
                }
                Err(e) => {
                    log.info(format_args!(
                        "evaluator #{} `{}` err: {}",
                        i,
                        check.source(),
                        e
                    ));
                    return Err(abort(log, check.as_ref()));
                }
            }
        }
        Ok(())
    }
}

fn abort(log: &GateLog<'_>, check: &dyn Predicate) -> Error {
    Error::Aborted {
        gate: log.gate().to_string(),
        check: check.source().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvalError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Fixed {
        name: &'static str,
        outcome: Result<Verdict, EvalError>,
        calls: Arc<AtomicUsize>,
    }

    impl Fixed {
        fn new(name: &'static str, outcome: Result<Verdict, EvalError>) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let check = Self {
                name,
                outcome,
                calls: Arc::clone(&calls),
            };
            (check, calls)
        }
    }

    impl Predicate for Fixed {
        fn source(&self) -> &str {
            self.name
        }

        fn evaluate(&self, _: &Activation) -> Result<Verdict, EvalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn log() -> GateLog<'static> {
        GateLog::new("proxy /test-pre")
    }

    #[test]
    fn empty_list_passes() {
        let checks = CheckList::new();
        assert!(checks.is_empty());
        assert!(checks.evaluate(&Activation::new(), &log()).is_ok());
    }

    #[test]
    fn all_true_passes_and_runs_everything() {
        let (a, a_calls) = Fixed::new("a", Ok(Verdict::Bool(true)));
        let (b, b_calls) = Fixed::new("b", Ok(Verdict::Bool(true)));
        let checks = CheckList::new().require(a).require(b);

        assert!(checks.evaluate(&Activation::new(), &log()).is_ok());
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn false_aborts_and_short_circuits() {
        let (a, a_calls) = Fixed::new("a", Ok(Verdict::Bool(true)));
        let (b, b_calls) = Fixed::new("b", Ok(Verdict::Bool(false)));
        let (c, c_calls) = Fixed::new("c", Ok(Verdict::Bool(true)));
        let checks = CheckList::new().require(a).require(b).require(c);

        let err = checks.evaluate(&Activation::new(), &log()).unwrap_err();

        match err {
            Error::Aborted { gate, check } => {
                assert_eq!(gate, "proxy /test-pre");
                assert_eq!(check, "b");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
        assert_eq!(c_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn non_boolean_aborts() {
        let (a, _) = Fixed::new("a", Ok(Verdict::NonBoolean("Int(1)".to_string())));
        let checks = CheckList::new().require(a);
        assert!(checks.evaluate(&Activation::new(), &log()).unwrap_err().is_abort());
    }

    #[test]
    fn evaluation_error_aborts() {
        let (a, _) = Fixed::new("a", Err(EvalError::new("undeclared reference")));
        let (b, b_calls) = Fixed::new("b", Ok(Verdict::Bool(true)));
        let checks = CheckList::new().require(a).require(b);

        assert!(checks.evaluate(&Activation::new(), &log()).unwrap_err().is_abort());
        assert_eq!(b_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn sources_keep_order() {
        let (a, _) = Fixed::new("first", Ok(Verdict::Bool(true)));
        let (b, _) = Fixed::new("second", Ok(Verdict::Bool(true)));
        let checks = CheckList::new().require(a).require(b);
        assert_eq!(checks.sources(), vec!["first", "second"]);
        assert_eq!(checks.len(), 2);
    }
}
