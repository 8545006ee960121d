use axum::{
    body::Bytes,
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{method_fallback, read_json, ApiError, ApiResult};
use crate::models::ItemFields;
use crate::services::ai::AiLookup;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/findMovie", get(find_movie).fallback(method_fallback))
        .route("/aiFindMovie", post(ai_find_movie).fallback(method_fallback))
}

#[derive(Debug, Deserialize)]
pub struct FindMovieQuery {
    pub title: Option<String>,
    pub year: Option<String>,
}

fn required_title(raw: Option<&str>) -> ApiResult<String> {
    raw.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::bad_request("title is required"))
}

/// Optional year; present but non-numeric is a client error.
fn optional_year(raw: Option<&Value>) -> ApiResult<Option<i32>> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ApiError::bad_request("year must be a number")),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|y| i32::try_from(y).ok())
            .map(Some)
            .ok_or_else(|| ApiError::bad_request("year must be a number")),
        Some(_) => Err(ApiError::bad_request("year must be a number")),
    }
}

/// GET /findMovie?title=&year=
async fn find_movie(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FindMovieQuery>,
) -> ApiResult<Json<ItemFields>> {
    let title = required_title(params.title.as_deref())?;
    let year = optional_year(params.year.map(Value::String).as_ref())?;

    let tmdb = state.tmdb.as_ref().ok_or_else(|| {
        ApiError::internal(
            "findMovie",
            anyhow::anyhow!("TMDB credentials are not configured"),
        )
    })?;

    let found = tmdb
        .lookup_movie(&title, year)
        .await
        .map_err(|e| ApiError::upstream("findMovie", e))?;

    match found {
        Some(fields) => {
            tracing::debug!("findMovie '{}' ({:?}) matched", title, year);
            Ok(Json(fields))
        }
        None => Err(ApiError::NotFound),
    }
}

/// POST /aiFindMovie {title, year}
async fn ai_find_movie(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult<Json<Value>> {
    let body = read_json(&body);
    let title = required_title(body.get("title").and_then(Value::as_str))?;
    let year = optional_year(body.get("year"))?;

    let ai = state.ai.as_ref().ok_or_else(|| {
        ApiError::internal(
            "aiFindMovie",
            anyhow::anyhow!("OPENAI_API_KEY is not configured"),
        )
    })?;

    let lookup = ai
        .find_movie(&title, year)
        .await
        .map_err(|e| ApiError::upstream("aiFindMovie", e))?;

    let response = match lookup {
        AiLookup::Movie(fields) => {
            serde_json::to_value(fields).map_err(|e| ApiError::internal("aiFindMovie", e))?
        }
        AiLookup::Raw(raw) => json!({ "raw": raw }),
    };

    Ok(Json(response))
}
