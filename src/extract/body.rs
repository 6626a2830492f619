//! Request body decoding.

use std::convert::Infallible;

use bytes::Bytes;
use futures::stream;
use multer::{Constraints, Multipart, SizeLimit};
use serde_json::{Map, Value};

use crate::logging::GateLog;
use crate::request::{Request, CONTENT_TYPE};

/// Largest body the gate will buffer for inspection (32 MiB).
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

const JSON_MARKER: &str = "application/json";
const FORM_MARKER: &str = "multipart/form-data";

/// Decodes the request body into a flat map, leaving the body readable.
///
/// Returns `None` without touching the body when there is no `Content-Type`
/// header or no body, and an empty map without reading it for content types
/// other than JSON and multipart. Otherwise the body is buffered (up to
/// [`MAX_BODY_BYTES`]) and `request.body` is replaced with a stream yielding
/// the same bytes, whatever the decoding outcome.
///
/// - `application/json`: the JSON object, or `None` if it does not parse
/// - `multipart/form-data`: each non-file field mapped to its first value
/// - anything else: an empty map
pub async fn decode(request: &mut Request, log: &GateLog<'_>) -> Option<Map<String, Value>> {
    decode_with_limit(request, MAX_BODY_BYTES, log).await
}

/// [`decode`] with an explicit buffering limit.
pub async fn decode_with_limit(
    request: &mut Request,
    limit: usize,
    log: &GateLog<'_>,
) -> Option<Map<String, Value>> {
    let content_type = request.header(CONTENT_TYPE)?.to_owned();
    request.body.as_ref()?;

    let is_json = content_type.contains(JSON_MARKER);
    let is_form = content_type.contains(FORM_MARKER);
    if !is_json && !is_form {
        return Some(Map::new());
    }

    let body = request.body.take()?;

    let (read, restored) = body.buffer(limit).await;
    request.body = Some(restored);

    let bytes = match read {
        Ok(bytes) => bytes,
        Err(e) => {
            log.error(format_args!("read body: {}", e));
            return None;
        }
    };

    if is_json {
        match serde_json::from_slice::<Map<String, Value>>(&bytes) {
            Ok(data) => Some(data),
            Err(e) => {
                log.error(format_args!("unmarshal body: {}", e));
                None
            }
        }
    } else {
        match form_fields(&content_type, bytes, limit).await {
            Ok(data) => Some(data),
            Err(e) => {
                log.error(format_args!("parse form: {}", e));
                None
            }
        }
    }
}

async fn form_fields(
    content_type: &str,
    bytes: Bytes,
    limit: usize,
) -> Result<Map<String, Value>, multer::Error> {
    let boundary = multer::parse_boundary(content_type)?;
    let constraints = Constraints::new().size_limit(SizeLimit::new().whole_stream(limit as u64));
    let chunks = stream::iter([Ok::<Bytes, Infallible>(bytes)]);
    let mut multipart = Multipart::with_constraints(chunks, boundary, constraints);

    let mut fields = Map::new();
    while let Some(field) = multipart.next_field().await? {
        if field.file_name().is_some() {
            continue;
        }
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        let value = field.text().await?;
        fields.entry(name).or_insert(Value::String(value));
    }
    Ok(fields)
}
