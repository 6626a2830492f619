//! Evaluation contexts for the two phases of an exchange.
//!
//! Each phase has a typed context ([`RequestContext`], [`ResponseContext`])
//! that is projected into the flat, string-keyed [`Activation`] only when it
//! is handed to the checks.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};

use crate::extract::{self, Claims};
use crate::logging::GateLog;
use crate::request::{MultiMap, Request, Response};

/// Key of the exchange timestamp, present in both phases.
pub const NOW: &str = "now";

/// Request-phase variable names.
pub mod pre {
    /// HTTP method
    pub const METHOD: &str = "pre_method";
    /// Request path
    pub const PATH: &str = "pre_path";
    /// Path parameters
    pub const PARAMS: &str = "pre_params";
    /// Request headers
    pub const HEADERS: &str = "pre_headers";
    /// Query string parameters
    pub const QUERYSTRING: &str = "pre_querystring";
    /// Bearer token claims, or null
    pub const JWT: &str = "pre_jwt";
    /// Decoded body, or null
    pub const BODY: &str = "pre_body";

    /// Every key of a request-phase activation.
    pub const KEYS: [&str; 8] = [
        METHOD,
        PATH,
        PARAMS,
        HEADERS,
        QUERYSTRING,
        JWT,
        BODY,
        super::NOW,
    ];
}

/// Response-phase variable names.
pub mod post {
    /// Whether the backend call completed
    pub const COMPLETED: &str = "post_completed";
    /// Response status code
    pub const STATUS: &str = "post_metadata_status";
    /// Response headers
    pub const HEADERS: &str = "post_metadata_headers";
    /// Response payload
    pub const DATA: &str = "post_data";

    /// Every key of a response-phase activation.
    pub const KEYS: [&str; 5] = [COMPLETED, STATUS, HEADERS, DATA, super::NOW];
}

/// Named variables a check is evaluated against.
///
/// Built fresh for each phase of each exchange and dropped after evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Activation {
    vars: BTreeMap<String, Value>,
}

impl Activation {
    /// Creates an empty activation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a variable, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Returns a bound variable.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    /// Returns `true` if `key` is bound (possibly to null).
    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Iterates over the bindings in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of bound variables.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Returns `true` if nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Typed request-phase context.
#[derive(Debug, Clone)]
pub struct RequestContext<'a> {
    /// HTTP method
    pub method: &'a str,
    /// Request path
    pub path: &'a str,
    /// Path parameters
    pub params: &'a HashMap<String, String>,
    /// Request headers
    pub headers: &'a MultiMap,
    /// Query parameters
    pub query: &'a MultiMap,
    /// Exchange timestamp (RFC 3339)
    pub now: &'a str,
    /// Bearer token claims, if decodable
    pub jwt: Option<Claims>,
    /// Decoded body, if decodable
    pub body: Option<Map<String, Value>>,
}

impl<'a> RequestContext<'a> {
    /// Runs the extractors over `request` and captures its structural fields.
    ///
    /// The request body, if read, is replaced with an equivalent stream.
    pub async fn from_request(
        request: &'a mut Request,
        now: &'a str,
        log: &GateLog<'_>,
    ) -> RequestContext<'a> {
        let body = extract::body::decode(request, log).await;
        let request: &'a Request = request;
        let jwt = extract::jwt::claims(&request.headers, log);

        RequestContext {
            method: &request.method,
            path: &request.path,
            params: &request.params,
            headers: &request.headers,
            query: &request.query,
            now,
            jwt,
            body,
        }
    }

    /// Projects the context onto the `pre_*` variables.
    pub fn into_activation(self) -> Activation {
        let mut activation = Activation::new();
        activation.insert(pre::METHOD, self.method);
        activation.insert(pre::PATH, self.path);
        activation.insert(pre::PARAMS, string_map(self.params));
        activation.insert(pre::HEADERS, multi_map(self.headers));
        activation.insert(pre::QUERYSTRING, multi_map(self.query));
        activation.insert(NOW, self.now);
        activation.insert(pre::JWT, optional(self.jwt));
        activation.insert(pre::BODY, optional(self.body));
        activation
    }
}

/// Typed response-phase context.
#[derive(Debug, Clone, Copy)]
pub struct ResponseContext<'a> {
    /// Whether the backend call completed
    pub completed: bool,
    /// Response status code
    pub status: u16,
    /// Response headers
    pub headers: &'a MultiMap,
    /// Response payload
    pub data: &'a Map<String, Value>,
    /// Exchange timestamp (RFC 3339)
    pub now: &'a str,
}

impl<'a> ResponseContext<'a> {
    /// Captures the fields checks may read from `response`.
    pub fn from_response(response: &'a Response, now: &'a str) -> Self {
        Self {
            completed: response.is_complete,
            status: response.metadata.status_code,
            headers: &response.metadata.headers,
            data: &response.data,
            now,
        }
    }

    /// Projects the context onto the `post_*` variables.
    pub fn into_activation(self) -> Activation {
        let mut activation = Activation::new();
        activation.insert(post::COMPLETED, self.completed);
        activation.insert(post::STATUS, self.status);
        activation.insert(post::HEADERS, multi_map(self.headers));
        activation.insert(post::DATA, Value::Object(self.data.clone()));
        activation.insert(NOW, self.now);
        activation
    }
}

fn string_map(map: &HashMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

fn multi_map(map: &MultiMap) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, vs)| {
                let values = vs.iter().cloned().map(Value::String).collect();
                (k.clone(), Value::Array(values))
            })
            .collect(),
    )
}

fn optional(map: Option<Map<String, Value>>) -> Value {
    map.map_or(Value::Null, Value::Object)
}
