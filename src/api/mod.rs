use axum::{
    body::Bytes,
    extract::Request,
    http::{Method, StatusCode},
    middleware::Next,
    response::Response,
    Router,
};
use serde_json::Value;
use std::sync::Arc;

use crate::models::ItemFields;
use crate::AppState;

mod enrich;
pub mod error;
mod items;
mod picks;
mod watch;

pub use error::{ApiError, ApiResult};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(items::routes()) // listItems, getItem, createItem, updateItem, deleteItem, markWatched
        .merge(picks::routes()) // randomItems, getWeeklyPicks, saveWeeklyPicks
        .merge(enrich::routes()) // findMovie, aiFindMovie
        .merge(watch::routes()) // watchItems (SSE)
}

/// Fallback for methods an endpoint does not serve.
async fn method_fallback() -> ApiError {
    ApiError::MethodNotAllowed
}

/// Preflight requests are answered by the CORS layer; report them as
/// 204 No Content like every other bodiless success.
pub async fn preflight_no_content(request: Request, next: Next) -> Response {
    let is_preflight = request.method() == Method::OPTIONS;
    let mut response = next.run(request).await;
    if is_preflight && response.status() == StatusCode::OK {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}

/// Parse a request body as a JSON object. Empty or unparseable bodies, and
/// bodies that are not objects, read as `{}`.
fn read_json(body: &Bytes) -> Value {
    match serde_json::from_slice::<Value>(body) {
        Ok(value @ Value::Object(_)) => value,
        _ => Value::Object(Default::default()),
    }
}

/// Non-empty string `id` from a parsed body.
fn body_id(body: &Value) -> Option<String> {
    body.get("id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// The allow-listed writable fields of a body; everything else is dropped.
fn writable_fields(body: &Value) -> ApiResult<ItemFields> {
    serde_json::from_value(body.clone())
        .map_err(|e| ApiError::bad_request(format!("Invalid field value: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_read_json_tolerates_garbage() {
        assert_eq!(read_json(&Bytes::from_static(b"")), json!({}));
        assert_eq!(read_json(&Bytes::from_static(b"{nope")), json!({}));
        assert_eq!(read_json(&Bytes::from_static(b"[1,2]")), json!({}));
        assert_eq!(
            read_json(&Bytes::from_static(br#"{"id":"a"}"#)),
            json!({"id": "a"})
        );
    }

    #[test]
    fn test_body_id_requires_non_empty_string() {
        assert_eq!(body_id(&json!({"id": "abc"})).as_deref(), Some("abc"));
        assert_eq!(body_id(&json!({"id": ""})), None);
        assert_eq!(body_id(&json!({"id": 7})), None);
        assert_eq!(body_id(&json!({})), None);
    }

    #[test]
    fn test_writable_fields_rejects_wrong_types() {
        assert!(writable_fields(&json!({"year": "nineteen"})).is_err());
        let fields = writable_fields(&json!({"year": 1999, "createdAt": 1})).unwrap();
        assert_eq!(fields.year, Some(1999));
    }
}
