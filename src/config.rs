//! Endpoint and backend configuration as seen by the gate.
//!
//! The gateway hands each endpoint and backend an opaque `extra_config`
//! object. The gate only reads the entry under [`NAMESPACE`]:
//!
//! ```json
//! {
//!   "endpoint": "/orders",
//!   "extra_config": {
//!     "policy_gate": [
//!       { "check_expr": "pre_method == 'GET'" },
//!       { "check_expr": "post_metadata_status == 200", "phase": "post" }
//!     ]
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::policy::Definition;

/// Key under which check definitions live in `extra_config`.
pub const NAMESPACE: &str = "policy_gate";

/// Opaque per-endpoint or per-backend settings.
pub type ExtraConfig = Map<String, Value>;

/// A gateway endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Public path of the endpoint
    pub endpoint: String,
    /// Plugin settings
    #[serde(default)]
    pub extra_config: ExtraConfig,
}

/// A backend behind an endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend URL pattern
    pub url_pattern: String,
    /// Plugin settings
    #[serde(default)]
    pub extra_config: ExtraConfig,
}

/// Reads the check definitions from `extra`.
///
/// `None` means "no gate here": the namespace is absent, or its content is
/// not a list of definitions (logged as a warning).
pub fn definitions(extra: &ExtraConfig) -> Option<Vec<Definition>> {
    let raw = extra.get(NAMESPACE)?;

    match Vec::<Definition>::deserialize(raw) {
        Ok(defs) => Some(defs),
        Err(e) => {
            tracing::warn!(namespace = NAMESPACE, error = %e, "ignoring malformed check definitions");
            None
        }
    }
}
