//! Pipeline stages and the policy-gate decorator.
//!
//! # Exchange flow
//!
//! ```text
//! Request
//!   ↓ extractors + RequestContext  (now read once per exchange)
//! pre checks ──fail──→ Err(Aborted)      delegate never called
//!   ↓
//! next stage ──fail──→ Err(..) unchanged  post checks skipped
//!   ↓
//! ResponseContext
//! post checks ──fail──→ Err(Aborted)     response dropped
//!   ↓
//! Ok(Response) unchanged
//! ```
//!
//! Construction is fail-open: if the definitions do not compile,
//! [`GateFactory`] hands back the undecorated stage. Evaluation is
//! fail-closed: any failing check ends the exchange.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    activation::{RequestContext, ResponseContext},
    clock::{format_now, Clock, SystemClock},
    config::{self, BackendConfig, EndpointConfig, ExtraConfig},
    error::{ConfigError, Error},
    gate::CheckList,
    logging::GateLog,
    policy::{CelCompiler, Compiler, Definition},
    request::{Request, Response},
};

/// A step in the proxy pipeline.
///
/// Called once per exchange, concurrently across exchanges.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Handles one exchange.
    ///
    /// `cancel` governs the whole exchange and must be passed on unchanged
    /// to any stage this one delegates to.
    async fn call(&self, cancel: CancellationToken, request: Request) -> Result<Response, Error>;
}

/// A [`Stage`] built from an async closure. See [`from_fn`].
pub struct FnStage<F> {
    f: F,
}

impl<F> fmt::Debug for FnStage<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnStage { .. }")
    }
}

/// Wraps an async closure as a [`Stage`].
///
/// # Examples
///
/// ```
/// use policy_gate::{stage, Response};
///
/// let backend = stage::from_fn(|_cancel, _request| async { Ok(Response::new(200)) });
/// # let _ = backend;
/// ```
pub fn from_fn<F, Fut>(f: F) -> FnStage<F>
where
    F: Fn(CancellationToken, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, Error>> + Send + 'static,
{
    FnStage { f }
}

#[async_trait]
impl<F, Fut> Stage for FnStage<F>
where
    F: Fn(CancellationToken, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, Error>> + Send + 'static,
{
    async fn call(&self, cancel: CancellationToken, request: Request) -> Result<Response, Error> {
        (self.f)(cancel, request).await
    }
}

/// Runs pre checks, delegates, then runs post checks.
pub struct PolicyStage {
    name: String,
    pre_name: String,
    post_name: String,
    pre: CheckList,
    post: CheckList,
    next: Arc<dyn Stage>,
    clock: Arc<dyn Clock>,
}

impl PolicyStage {
    /// Wraps `next` with the given check lists, using the system clock.
    pub fn new(name: impl Into<String>, pre: CheckList, post: CheckList, next: Arc<dyn Stage>) -> Self {
        let name = name.into();
        Self {
            pre_name: format!("{}-pre", name),
            post_name: format!("{}-post", name),
            name,
            pre,
            post,
            next,
            clock: Arc::new(SystemClock),
        }
    }

    /// Compiles `definitions` and wraps `next` with the result.
    ///
    /// # Errors
    ///
    /// Returns the compiler's [`ConfigError`]; the caller decides whether to
    /// fall back to `next` (see [`GateFactory`]).
    pub fn from_definitions(
        name: impl Into<String>,
        definitions: &[Definition],
        compiler: &dyn Compiler,
        next: Arc<dyn Stage>,
    ) -> Result<Self, ConfigError> {
        let compiled = compiler.compile(definitions)?;
        Ok(Self::new(name, compiled.pre, compiled.post, next))
    }

    /// Replaces the time source used for the `now` variable.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Gate name, e.g. `proxy /orders`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request-phase checks.
    pub fn pre(&self) -> &CheckList {
        &self.pre
    }

    /// Response-phase checks.
    pub fn post(&self) -> &CheckList {
        &self.post
    }
}

impl fmt::Debug for PolicyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyStage")
            .field("name", &self.name)
            .field("pre", &self.pre)
            .field("post", &self.post)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for PolicyStage {
    async fn call(&self, cancel: CancellationToken, mut request: Request) -> Result<Response, Error> {
        // One timestamp for both phases of the exchange.
        let now = format_now(self.clock.now());

        let pre_log = GateLog::new(&self.pre_name);
        let activation = RequestContext::from_request(&mut request, &now, &pre_log)
            .await
            .into_activation();
        self.pre.evaluate(&activation, &pre_log)?;

        let response = match self.next.call(cancel, request).await {
            Ok(response) => response,
            Err(e) => {
                GateLog::new(&self.name).debug(format_args!("delegated execution failed: {}", e));
                return Err(e);
            }
        };

        let post_log = GateLog::new(&self.post_name);
        let activation = ResponseContext::from_response(&response, &now).into_activation();
        self.post.evaluate(&activation, &post_log)?;

        Ok(response)
    }
}

/// Decorates endpoint and backend stages with policy gates.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use policy_gate::{stage, EndpointConfig, GateFactory, Response, Stage};
///
/// let cfg: EndpointConfig = serde_json::from_value(serde_json::json!({
///     "endpoint": "/orders",
///     "extra_config": { "policy_gate": [{ "check_expr": "pre_method == 'GET'" }] }
/// }))
/// .unwrap();
///
/// let backend: Arc<dyn Stage> =
///     Arc::new(stage::from_fn(|_, _| async { Ok(Response::new(200)) }));
/// let gated = GateFactory::new().endpoint(&cfg, backend);
/// # let _ = gated;
/// ```
#[derive(Clone)]
pub struct GateFactory {
    clock: Arc<dyn Clock>,
    compiler: Arc<dyn Compiler>,
}

impl GateFactory {
    /// Factory using the system clock and the CEL compiler.
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            compiler: Arc::new(CelCompiler),
        }
    }

    /// Replaces the time source of every gate built from now on.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the definition compiler.
    pub fn with_compiler(mut self, compiler: Arc<dyn Compiler>) -> Self {
        self.compiler = compiler;
        self
    }

    /// Gates an endpoint stage. The gate is named `proxy <endpoint>`.
    pub fn endpoint(&self, cfg: &EndpointConfig, next: Arc<dyn Stage>) -> Arc<dyn Stage> {
        self.decorate(format!("proxy {}", cfg.endpoint), &cfg.extra_config, next)
    }

    /// Gates a backend stage. The gate is named `backend <url_pattern>`.
    pub fn backend(&self, cfg: &BackendConfig, next: Arc<dyn Stage>) -> Arc<dyn Stage> {
        self.decorate(format!("backend {}", cfg.url_pattern), &cfg.extra_config, next)
    }

    fn decorate(&self, name: String, extra: &ExtraConfig, next: Arc<dyn Stage>) -> Arc<dyn Stage> {
        let log = GateLog::new(&name);

        let Some(definitions) = config::definitions(extra) else {
            log.debug(format_args!("no check definitions configured"));
            return next;
        };
        log.debug(format_args!("loading {} check definitions", definitions.len()));

        match PolicyStage::from_definitions(
            name.as_str(),
            &definitions,
            self.compiler.as_ref(),
            Arc::clone(&next),
        ) {
            Ok(stage) => {
                log.debug(format_args!(
                    "pre checks {:?}, post checks {:?}",
                    stage.pre().sources(),
                    stage.post().sources()
                ));
                Arc::new(stage.with_clock(Arc::clone(&self.clock)))
            }
            Err(e) => {
                log.warn(format_args!("error parsing the definitions: {}", e));
                log.warn(format_args!("falling back to the next stage"));
                next
            }
        }
    }
}

impl Default for GateFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GateFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GateFactory { .. }")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::program::CelProgram;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn counting_backend(status: u16) -> (Arc<dyn Stage>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let stage: Arc<dyn Stage> = Arc::new(from_fn(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(Response::new(status)) }
        }));
        (stage, calls)
    }

    fn check(expr: &str) -> CelProgram {
        CelProgram::compile(expr).unwrap()
    }

    #[tokio::test]
    async fn passing_checks_return_response_unchanged() {
        let (backend, calls) = counting_backend(200);
        let gate = PolicyStage::new(
            "proxy /ok",
            CheckList::new().require(check("pre_method == 'GET'")),
            CheckList::new().require(check("post_metadata_status == 200")),
            backend,
        );

        let resp = gate
            .call(CancellationToken::new(), Request::new("GET", "/ok"))
            .await
            .unwrap();

        assert_eq!(resp, Response::new(200));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_pre_check_skips_delegate() {
        let (backend, calls) = counting_backend(200);
        let gate = PolicyStage::new(
            "proxy /get-only",
            CheckList::new().require(check("pre_method == 'GET'")),
            CheckList::new(),
            backend,
        );

        let err = gate
            .call(CancellationToken::new(), Request::new("POST", "/get-only"))
            .await
            .unwrap_err();

        match err {
            Error::Aborted { gate, check } => {
                assert_eq!(gate, "proxy /get-only-pre");
                assert_eq!(check, "pre_method == 'GET'");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_post_check_suppresses_response() {
        let (backend, calls) = counting_backend(404);
        let gate = PolicyStage::new(
            "backend /items",
            CheckList::new(),
            CheckList::new().require(check("post_metadata_status == 200")),
            backend,
        );

        let err = gate
            .call(CancellationToken::new(), Request::new("GET", "/items"))
            .await
            .unwrap_err();

        assert!(err.is_abort());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delegate_error_passes_through_and_skips_post() {
        let backend: Arc<dyn Stage> =
            Arc::new(from_fn(|_, _| async { Err(Error::delegate("connection refused")) }));
        // Would fail for any response; must not run.
        let gate = PolicyStage::new(
            "proxy /down",
            CheckList::new(),
            CheckList::new().require(check("false")),
            backend,
        );

        let err = gate
            .call(CancellationToken::new(), Request::new("GET", "/down"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Delegate(_)));
        assert_eq!(err.to_string(), "delegate failed: connection refused");
    }

    #[tokio::test]
    async fn same_now_in_both_phases() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let (backend, _) = counting_backend(200);
        let gate = PolicyStage::new(
            "proxy /time",
            CheckList::new().require(check("now == '2024-01-15T10:30:00Z'")),
            CheckList::new().require(check("now == '2024-01-15T10:30:00Z'")),
            backend,
        )
        .with_clock(Arc::new(FixedClock::new(at)));

        assert!(gate
            .call(CancellationToken::new(), Request::new("GET", "/time"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn cancellation_token_reaches_delegate() {
        let seen = Arc::new(Mutex::new(None::<bool>));
        let probe = Arc::clone(&seen);
        let backend: Arc<dyn Stage> = Arc::new(from_fn(move |cancel: CancellationToken, _| {
            *probe.lock().unwrap() = Some(cancel.is_cancelled());
            async { Ok(Response::new(200)) }
        }));
        let gate = PolicyStage::new("proxy /c", CheckList::new(), CheckList::new(), backend);

        let cancel = CancellationToken::new();
        cancel.cancel();
        gate.call(cancel, Request::new("GET", "/c")).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(true));
    }

    #[test]
    fn factory_without_definitions_returns_next() {
        let (backend, _) = counting_backend(200);
        let cfg = EndpointConfig {
            endpoint: "/plain".to_string(),
            extra_config: ExtraConfig::new(),
        };

        let stage = GateFactory::new().endpoint(&cfg, Arc::clone(&backend));
        assert!(Arc::ptr_eq(&stage, &backend));
    }

    #[test]
    fn factory_falls_back_on_compile_error() {
        for expr in ["pre_method ==", "1 +", "'unterminated", "pre_method = 'GET'"] {
            let (backend, _) = counting_backend(200);
            let cfg: BackendConfig = serde_json::from_value(serde_json::json!({
                "url_pattern": "/broken",
                "extra_config": { "policy_gate": [{ "check_expr": expr }] }
            }))
            .unwrap();

            let stage = GateFactory::new().backend(&cfg, Arc::clone(&backend));
            assert!(Arc::ptr_eq(&stage, &backend), "{expr:?} should leave the stage undecorated");
        }
    }

    #[test]
    fn factory_decorates_valid_definitions() {
        let (backend, _) = counting_backend(200);
        let cfg: EndpointConfig = serde_json::from_value(serde_json::json!({
            "endpoint": "/orders",
            "extra_config": { "policy_gate": [{ "check_expr": "pre_method == 'GET'" }] }
        }))
        .unwrap();

        let stage = GateFactory::new().endpoint(&cfg, Arc::clone(&backend));
        assert!(!Arc::ptr_eq(&stage, &backend));
    }

    #[test]
    fn from_definitions_names_and_splits() {
        let (backend, _) = counting_backend(200);
        let defs = vec![
            Definition::new("pre_path == '/x'"),
            Definition::post("post_completed"),
        ];

        let gate = PolicyStage::from_definitions("proxy /x", &defs, &CelCompiler, backend).unwrap();

        assert_eq!(gate.name(), "proxy /x");
        assert_eq!(gate.pre().len(), 1);
        assert_eq!(gate.post().len(), 1);
    }
}
