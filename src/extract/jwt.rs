//! Bearer-token claim extraction.
//!
//! This is a convenience for checks such as `pre_jwt.sub == 'alice'`. The
//! signature is NOT verified; a gate must never treat these claims as proof
//! of identity.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_json::{Map, Value};

use crate::logging::GateLog;
use crate::request::{first, MultiMap, AUTHORIZATION};

/// Decoded JWT payload.
pub type Claims = Map<String, Value>;

/// Prefix a usable `Authorization` value must start with.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Decodes the claims of the bearer token in `headers`, if there is one.
///
/// Returns `None` when the header is missing, lacks the `Bearer ` prefix,
/// has fewer than three dot-separated segments, or carries a payload that is
/// not base64url (unpadded) encoded JSON object.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use policy_gate::{extract::jwt, GateLog};
///
/// // {"sub":"alice"}
/// let mut headers = HashMap::new();
/// headers.insert(
///     "Authorization".to_string(),
///     vec!["Bearer e30.eyJzdWIiOiJhbGljZSJ9.sig".to_string()],
/// );
///
/// let claims = jwt::claims(&headers, &GateLog::new("doc")).unwrap();
/// assert_eq!(claims["sub"], "alice");
/// ```
pub fn claims(headers: &MultiMap, log: &GateLog<'_>) -> Option<Claims> {
    let header = first(headers, AUTHORIZATION)?;

    let Some(token) = header.strip_prefix(BEARER_PREFIX) else {
        log.debug(format_args!(
            "auth header found but without token prefix {:?}",
            BEARER_PREFIX
        ));
        return None;
    };
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() < 3 {
        log.error(format_args!(
            "bearer token found, but with {} parts",
            parts.len()
        ));
        return None;
    }

    let payload = match URL_SAFE_NO_PAD.decode(parts[1]) {
        Ok(payload) => payload,
        Err(e) => {
            log.error(format_args!("decode jwt: {}", e));
            return None;
        }
    };

    match serde_json::from_slice::<Claims>(&payload) {
        Ok(claims) => Some(claims),
        Err(e) => {
            log.error(format_args!("unmarshal jwt: {}", e));
            None
        }
    }
}
