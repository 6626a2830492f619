//! Request/response policy gate for API-gateway proxy pipelines.
//!
//! A gate wraps the next stage of a proxy pipeline and evaluates ordered,
//! precompiled boolean checks:
//! - **pre checks** against the inbound request, before delegating
//! - **post checks** against the response, before returning it
//!
//! Any check that yields `false`, yields a non-boolean, or fails to evaluate
//! aborts the exchange with [`Error::Aborted`]. Checks are CEL expressions
//! (via `cel-interpreter`) over a flat set of variables:
//!
//! | pre phase | post phase |
//! |---|---|
//! | `pre_method`, `pre_path`, `pre_params` | `post_completed` |
//! | `pre_headers`, `pre_querystring` | `post_metadata_status` |
//! | `pre_jwt` (claims or null), `pre_body` (map or null) | `post_metadata_headers`, `post_data` |
//! | `now` | `now` |
//!
//! # Core Types
//!
//! - [`Stage`]: one step of the pipeline; [`stage::from_fn`] adapts closures
//! - [`PolicyStage`]: the gate itself
//! - [`GateFactory`]: decorates endpoints/backends from their `extra_config`,
//!   falling back to the undecorated stage when definitions do not compile
//! - [`CheckList`]: ordered, short-circuiting check evaluation
//! - [`Predicate`]: a compiled check; [`CelProgram`] is the CEL implementation
//!
//! JWT claims are decoded for convenience only. No signature is verified.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use policy_gate::{stage, CelCompiler, Definition, Error, PolicyStage, Request, Response, Stage};
//! use tokio_util::sync::CancellationToken;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let backend: Arc<dyn Stage> =
//!     Arc::new(stage::from_fn(|_, _| async { Ok(Response::new(200)) }));
//!
//! let gate = PolicyStage::from_definitions(
//!     "proxy /orders",
//!     &[Definition::new("pre_method == 'GET'")],
//!     &CelCompiler,
//!     backend,
//! )
//! .expect("definitions compile");
//!
//! let ok = gate.call(CancellationToken::new(), Request::new("GET", "/orders")).await;
//! assert!(ok.is_ok());
//!
//! let denied = gate.call(CancellationToken::new(), Request::new("DELETE", "/orders")).await;
//! assert!(matches!(denied, Err(Error::Aborted { .. })));
//! # });
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod activation;
mod clock;
mod config;
mod error;
pub mod extract;
mod gate;
mod logging;
mod policy;
mod program;
mod request;
mod secret;
pub mod stage;

pub use activation::{Activation, RequestContext, ResponseContext};
pub use clock::{format_now, Clock, FixedClock, SystemClock};
pub use config::{definitions, BackendConfig, EndpointConfig, ExtraConfig, NAMESPACE};
pub use error::{BoxError, ConfigError, Error, EvalError};
pub use gate::CheckList;
pub use logging::GateLog;
pub use policy::{resolve_phase, CelCompiler, Compiled, Compiler, Definition, Phase};
pub use program::{CelProgram, Predicate, Verdict};
pub use request::{Body, BufferError, Metadata, MultiMap, Request, Response, AUTHORIZATION, CONTENT_TYPE};
pub use secret::Secret;
pub use stage::{GateFactory, PolicyStage, Stage};
