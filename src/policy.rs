//! Check definitions and their compilation into per-phase check lists.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    activation,
    error::ConfigError,
    gate::CheckList,
    program::CelProgram,
};

/// The phase of an exchange a check runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Before delegating, against the request
    Pre,
    /// After delegating, against the response
    Post,
}

impl Phase {
    /// Variables that only exist in this phase (`now` belongs to both).
    pub fn variables(self) -> &'static [&'static str] {
        match self {
            Phase::Pre => &activation::pre::KEYS,
            Phase::Post => &activation::post::KEYS,
        }
    }

    fn owns(self, variable: &str) -> bool {
        variable != activation::NOW && self.variables().iter().any(|key| *key == variable)
    }

    fn other(self) -> Phase {
        match self {
            Phase::Pre => Phase::Post,
            Phase::Post => Phase::Pre,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Pre => write!(f, "pre"),
            Phase::Post => write!(f, "post"),
        }
    }
}

/// One configured check.
///
/// ```json
/// { "check_expr": "pre_method == 'GET'", "phase": "pre" }
/// ```
///
/// `phase` may be omitted, in which case it is inferred from the variables
/// the expression reads (see [`resolve_phase`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Definition {
    /// Expression source
    pub check_expr: String,
    /// Explicit phase tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
}

impl Definition {
    /// Creates an untagged definition.
    pub fn new(check_expr: impl Into<String>) -> Self {
        Self {
            check_expr: check_expr.into(),
            phase: None,
        }
    }

    /// Creates a definition tagged for request checks.
    pub fn pre(check_expr: impl Into<String>) -> Self {
        Self {
            check_expr: check_expr.into(),
            phase: Some(Phase::Pre),
        }
    }

    /// Creates a definition tagged for response checks.
    pub fn post(check_expr: impl Into<String>) -> Self {
        Self {
            check_expr: check_expr.into(),
            phase: Some(Phase::Post),
        }
    }
}

/// Check lists for both phases of a gate.
#[derive(Debug, Clone, Default)]
pub struct Compiled {
    /// Checks run against the request
    pub pre: CheckList,
    /// Checks run against the response
    pub post: CheckList,
}

/// Turns definitions into per-phase check lists.
pub trait Compiler: Send + Sync {
    /// Compiles every definition, preserving their relative order within each phase.
    ///
    /// # Errors
    ///
    /// Any bad definition fails the whole set.
    fn compile(&self, definitions: &[Definition]) -> Result<Compiled, ConfigError>;
}

/// [`Compiler`] backed by `cel-interpreter`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CelCompiler;

impl Compiler for CelCompiler {
    fn compile(&self, definitions: &[Definition]) -> Result<Compiled, ConfigError> {
        let mut compiled = Compiled::default();

        for def in definitions {
            let program = CelProgram::compile(def.check_expr.as_str())?;
            let phase = resolve_phase(def, &program.variables())?;

            match phase {
                Phase::Pre => compiled.pre.push(Arc::new(program)),
                Phase::Post => compiled.post.push(Arc::new(program)),
            }
        }

        Ok(compiled)
    }
}

/// Decides which phase a definition runs in.
///
/// Only activation variables count; names bound inside the expression
/// (comprehension variables) are ignored. A tagged definition keeps its tag
/// but may not read the other phase's variables. An untagged one runs in
/// `post` if it reads any response variable and in `pre` otherwise; reading
/// both is an error.
///
/// # Errors
///
/// [`ConfigError::WrongPhase`] or [`ConfigError::MixedPhase`].
pub fn resolve_phase(def: &Definition, variables: &[String]) -> Result<Phase, ConfigError> {
    let reads = |phase: Phase| {
        variables
            .iter()
            .find(|v| phase.owns(v))
            .cloned()
    };

    match def.phase {
        Some(phase) => match reads(phase.other()) {
            Some(variable) => Err(ConfigError::WrongPhase {
                expression: def.check_expr.clone(),
                phase,
                variable,
            }),
            None => Ok(phase),
        },
        None => match (reads(Phase::Pre), reads(Phase::Post)) {
            (Some(_), Some(_)) => Err(ConfigError::MixedPhase {
                expression: def.check_expr.clone(),
            }),
            (None, Some(_)) => Ok(Phase::Post),
            _ => Ok(Phase::Pre),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn definition_deserializes() {
        let def: Definition =
            serde_json::from_str(r#"{"check_expr": "post_completed", "phase": "post"}"#).unwrap();
        assert_eq!(def, Definition::post("post_completed"));

        let untagged: Definition = serde_json::from_str(r#"{"check_expr": "true"}"#).unwrap();
        assert_eq!(untagged.phase, None);
    }

    #[test]
    fn definition_rejects_unknown_fields() {
        let res = serde_json::from_str::<Definition>(r#"{"check_expr": "true", "when": "pre"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn untagged_phase_is_inferred() {
        let def = Definition::new("x");
        assert_eq!(resolve_phase(&def, &vars(&["pre_method"])), Ok(Phase::Pre));
        assert_eq!(
            resolve_phase(&def, &vars(&["post_metadata_status", "now"])),
            Ok(Phase::Post)
        );
        assert_eq!(resolve_phase(&def, &vars(&["now"])), Ok(Phase::Pre));
    }

    #[test]
    fn untagged_mixed_is_rejected() {
        let def = Definition::new("pre_method == 'GET' && post_completed");
        let err = resolve_phase(&def, &vars(&["pre_method", "post_completed"])).unwrap_err();
        assert!(matches!(err, ConfigError::MixedPhase { .. }));
    }

    #[test]
    fn tagged_wrong_phase_is_rejected() {
        let def = Definition::pre("post_completed");
        let err = resolve_phase(&def, &vars(&["post_completed"])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::WrongPhase {
                expression: "post_completed".to_string(),
                phase: Phase::Pre,
                variable: "post_completed".to_string(),
            }
        );
    }

    #[test]
    fn compiler_splits_by_phase_in_order() {
        let defs = vec![
            Definition::new("pre_method == 'GET'"),
            Definition::new("post_metadata_status == 200"),
            Definition::pre("now != ''"),
            Definition::post("post_completed"),
        ];

        let compiled = CelCompiler.compile(&defs).unwrap();

        assert_eq!(compiled.pre.sources(), vec!["pre_method == 'GET'", "now != ''"]);
        assert_eq!(
            compiled.post.sources(),
            vec!["post_metadata_status == 200", "post_completed"]
        );
    }

    #[test]
    fn compiler_fails_on_any_bad_definition() {
        let defs = vec![
            Definition::new("pre_method == 'GET'"),
            Definition::new("pre_method =="),
        ];
        let err = CelCompiler.compile(&defs).unwrap_err();
        assert!(matches!(err, ConfigError::Compile { .. }));
    }

    #[test]
    fn compiler_reports_truncated_expressions() {
        for source in ["1 +", "'unterminated"] {
            let err = CelCompiler.compile(&[Definition::new(source)]).unwrap_err();
            assert!(
                matches!(&err, ConfigError::Compile { expression, .. } if expression == source),
                "unexpected error for {source:?}: {err:?}"
            );
        }
    }

    #[test]
    fn phase_display_and_variables() {
        assert_eq!(Phase::Pre.to_string(), "pre");
        assert!(Phase::Post.variables().contains(&"post_metadata_status"));
        assert!(!Phase::Pre.owns("now"));
        assert!(!Phase::Post.owns("post_x"));
    }

    #[test]
    fn comprehension_names_do_not_pick_the_phase() {
        let source = "pre_jwt.roles.exists(post_x, post_x == 'a')";
        let program = CelProgram::compile(source).unwrap();
        let def = Definition::new(source);
        assert_eq!(resolve_phase(&def, &program.variables()), Ok(Phase::Pre));

        let compiled = CelCompiler.compile(&[Definition::pre(source)]).unwrap();
        assert_eq!(compiled.pre.sources(), vec![source]);
        assert!(compiled.post.is_empty());
    }
}
