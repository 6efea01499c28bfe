//! Request body decoding with a size ceiling.
//!
//! JSON and URL-encoded bodies are read in full (never past the configured
//! limit), parsed into a [`serde_json::Value`], and attached to the request as
//! a [`DecodedBody`] extension. The raw bytes are put back so downstream
//! extractors can still consume the body. Any other content type passes
//! through untouched.
//!
//! Failures escalate to the central error handler:
//! - declared or actual size above the limit: [`AppError::PayloadTooLarge`]
//! - unparseable JSON: [`AppError::SerializationError`]
//! - unreadable or non-UTF-8 form data: [`AppError::MalformedBody`]
//!
//! # Form Decoding
//!
//! `a=1&a=2` becomes `{"a": ["1", "2"]}`, `user[name]=x` becomes
//! `{"user": {"name": "x"}}` and `tags[]=x` always yields an array. Nesting is
//! capped at [`MAX_FORM_DEPTH`] levels; deeper keys are kept verbatim.

use axum::body::Body;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::Response;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};

/// Deepest bracket nesting honored in form keys.
pub const MAX_FORM_DEPTH: usize = 5;

/// Body ceiling shared by both decoders.
#[derive(Debug, Clone, Copy)]
pub struct BodyLimit {
    pub max_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Json,
    Form,
}

impl BodyKind {
    fn of(headers: &HeaderMap) -> Option<Self> {
        let content_type = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if mime == "application/json" || (mime.starts_with("application/") && mime.ends_with("+json"))
        {
            Some(BodyKind::Json)
        } else if mime == "application/x-www-form-urlencoded" {
            Some(BodyKind::Form)
        } else {
            None
        }
    }
}

/// The parsed request payload, available to handlers as an extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBody(pub Value);

impl<S> FromRequestParts<S> for DecodedBody
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<DecodedBody>()
            .cloned()
            .ok_or_else(|| AppError::BadRequest("Request body is required".to_string()))
    }
}

/// Typed view of the decoded body.
///
/// ```rust,ignore
/// async fn apply_leave(Payload(req): Payload<LeaveRequest>) -> AppResult<Json<Leave>> { ... }
/// ```
#[derive(Debug, Clone)]
pub struct Payload<T>(pub T);

impl<S, T> FromRequestParts<S> for Payload<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let DecodedBody(value) = DecodedBody::from_request_parts(parts, state).await?;
        Ok(Payload(serde_json::from_value(value)?))
    }
}

/// Middleware entry point. Wire with `axum::middleware::from_fn_with_state`.
pub async fn decode_body(
    State(limit): State<BodyLimit>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(kind) = BodyKind::of(req.headers()) else {
        return Ok(next.run(req).await);
    };

    if let Some(declared) = content_length(req.headers())
        && declared > limit.max_bytes
    {
        return Err(AppError::PayloadTooLarge {
            limit: limit.max_bytes,
            received: declared,
        });
    }

    let (mut parts, body) = req.into_parts();
    let bytes = read_limited(body, limit.max_bytes).await?;

    if !bytes.is_empty() {
        let value = match kind {
            BodyKind::Json => serde_json::from_slice(&bytes)?,
            BodyKind::Form => decode_form(&bytes)?,
        };
        parts.extensions.insert(DecodedBody(value));
    }

    let req = Request::from_parts(parts, Body::from(bytes));
    Ok(next.run(req).await)
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Collect the body, failing as soon as it grows past `max_bytes`.
async fn read_limited(body: Body, max_bytes: usize) -> AppResult<Vec<u8>> {
    let mut stream = body.into_data_stream();
    let mut buf = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk
            .map_err(|e| AppError::MalformedBody(format!("Failed to read request body: {e}")))?;

        let received = buf.len().saturating_add(chunk.len());
        if received > max_bytes {
            return Err(AppError::PayloadTooLarge {
                limit: max_bytes,
                received,
            });
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(buf)
}

/// Decode `application/x-www-form-urlencoded` into a JSON object.
pub fn decode_form(bytes: &[u8]) -> AppResult<Value> {
    if std::str::from_utf8(bytes).is_err() {
        return Err(AppError::MalformedBody(
            "Form body is not valid UTF-8".to_string(),
        ));
    }

    let mut root = Map::new();
    for (key, value) in url::form_urlencoded::parse(bytes) {
        let segments = split_key(&key);
        insert_path(&mut root, &segments, Value::String(value.into_owned()));
    }
    Ok(Value::Object(root))
}

/// `user[address][city]` -> `["user", "address", "city"]`, `tags[]` -> `["tags", ""]`.
fn split_key(key: &str) -> Vec<&str> {
    let nested = key
        .find('[')
        .filter(|&open| open > 0 && key.ends_with(']'))
        .and_then(|open| {
            let head = key.get(..open)?;
            let inner = key.get(open + 1..key.len() - 1)?;
            let mut segments = vec![head];
            segments.extend(inner.split("]["));
            Some(segments)
        });

    match nested {
        Some(segments) if segments.len() <= MAX_FORM_DEPTH + 1 => segments,
        _ => vec![key],
    }
}

fn insert_path(map: &mut Map<String, Value>, segments: &[&str], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };

    match rest {
        [] => append(map, head, value),
        [""] => match map.get_mut(*head) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let previous = existing.take();
                *existing = Value::Array(vec![previous, value]);
            }
            None => {
                map.insert(head.to_string(), Value::Array(vec![value]));
            }
        },
        _ => {
            let child = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(child) = child {
                insert_path(child, rest, value);
            }
        }
    }
}

/// Insert, turning repeated keys into arrays.
fn append(map: &mut Map<String, Value>, key: &str, value: Value) {
    match map.get_mut(key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let previous = existing.take();
            *existing = Value::Array(vec![previous, value]);
        }
        None => {
            map.insert(key.to_string(), value);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn headers_with(content_type: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        headers
    }

    #[test]
    fn test_body_kind_detection() {
        assert_eq!(BodyKind::of(&headers_with("application/json")), Some(BodyKind::Json));
        assert_eq!(
            BodyKind::of(&headers_with("Application/JSON; charset=utf-8")),
            Some(BodyKind::Json)
        );
        assert_eq!(
            BodyKind::of(&headers_with("application/merge-patch+json")),
            Some(BodyKind::Json)
        );
        assert_eq!(
            BodyKind::of(&headers_with("application/x-www-form-urlencoded")),
            Some(BodyKind::Form)
        );
        assert_eq!(BodyKind::of(&headers_with("multipart/form-data; boundary=x")), None);
        assert_eq!(BodyKind::of(&HeaderMap::new()), None);
    }

    #[test]
    fn test_decode_flat_form() {
        let value = decode_form(b"email=admin%40raymond.com&remember=true").unwrap();
        assert_eq!(value, json!({"email": "admin@raymond.com", "remember": "true"}));
    }

    #[test]
    fn test_decode_repeated_keys_become_array() {
        let value = decode_form(b"day=mon&day=tue&day=wed").unwrap();
        assert_eq!(value, json!({"day": ["mon", "tue", "wed"]}));
    }

    #[test]
    fn test_decode_bracket_nesting() {
        let value = decode_form(b"leave[type]=sick&leave[days]=2&tags[]=urgent").unwrap();
        assert_eq!(
            value,
            json!({"leave": {"type": "sick", "days": "2"}, "tags": ["urgent"]})
        );
    }

    #[test]
    fn test_decode_plus_as_space() {
        let value = decode_form(b"reason=family+event").unwrap();
        assert_eq!(value["reason"], "family event");
    }

    #[test]
    fn test_split_key_depth_cap() {
        assert_eq!(split_key("a[b][c]"), vec!["a", "b", "c"]);
        assert_eq!(split_key("[weird]"), vec!["[weird]"]);
        assert_eq!(split_key("a[b"), vec!["a[b"]);
        assert_eq!(split_key("a[1][2][3][4][5][6]"), vec!["a[1][2][3][4][5][6]"]);
    }

    #[test]
    fn test_decode_form_rejects_invalid_utf8() {
        assert!(matches!(
            decode_form(b"name=\xff\xfe"),
            Err(AppError::MalformedBody(_))
        ));
    }

    #[tokio::test]
    async fn test_read_limited_enforces_ceiling() {
        let ok = read_limited(Body::from(vec![b'a'; 16]), 16).await.unwrap();
        assert_eq!(ok.len(), 16);

        let err = read_limited(Body::from(vec![b'a'; 17]), 16).await.unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge { limit: 16, .. }));
    }
}
