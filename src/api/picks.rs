use axum::{
    body::Bytes,
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use super::{method_fallback, read_json, ApiError, ApiResult};
use crate::models::{now_millis, CatalogItem, WeeklyPick, WeeklyPicksDoc, WEEK_DAYS};
use crate::AppState;

const DEFAULT_RANDOM_COUNT: usize = 7;
const MAX_RANDOM_COUNT: usize = 50;
/// Candidates drawn per requested item, so landscape artwork can be preferred
const CANDIDATE_FACTOR: usize = 3;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/randomItems",
            get(random_items_query)
                .post(random_items_body)
                .fallback(method_fallback),
        )
        .route("/getWeeklyPicks", get(get_weekly_picks).fallback(method_fallback))
        .route(
            "/saveWeeklyPicks",
            post(save_weekly_picks).fallback(method_fallback),
        )
}

#[derive(Debug, Deserialize)]
pub struct CountQuery {
    pub count: Option<String>,
}

/// Requested count, defaulting to 7 and clamped to 1..=50.
fn resolve_count(raw: Option<&Value>) -> usize {
    let requested = match raw {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };

    match requested {
        Some(n) => n.clamp(1, MAX_RANDOM_COUNT as i64) as usize,
        None => DEFAULT_RANDOM_COUNT,
    }
}

/// Keep up to `count` items, those with landscape artwork first. Relative
/// order within each group is preserved.
pub fn prefer_landscape(pool: Vec<CatalogItem>, count: usize) -> Vec<CatalogItem> {
    let (mut picked, rest): (Vec<_>, Vec<_>) =
        pool.into_iter().partition(CatalogItem::has_landscape_poster);
    picked.extend(rest);
    picked.truncate(count);
    picked
}

async fn random_items(state: &AppState, count: usize) -> ApiResult<Json<Vec<CatalogItem>>> {
    let pool = state
        .store
        .random(count * CANDIDATE_FACTOR)
        .await
        .map_err(|e| ApiError::store("randomItems", e))?;

    Ok(Json(prefer_landscape(pool, count)))
}

/// GET /randomItems?count=
async fn random_items_query(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CountQuery>,
) -> ApiResult<Json<Vec<CatalogItem>>> {
    let count = resolve_count(params.count.map(Value::String).as_ref());
    random_items(&state, count).await
}

/// POST /randomItems {count}; a query-string count is used when the body has none
async fn random_items_body(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CountQuery>,
    body: Bytes,
) -> ApiResult<Json<Vec<CatalogItem>>> {
    let body = read_json(&body);
    let count = match body.get("count") {
        Some(raw) => resolve_count(Some(raw)),
        None => resolve_count(params.count.map(Value::String).as_ref()),
    };
    random_items(&state, count).await
}

/// GET /getWeeklyPicks
async fn get_weekly_picks(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Option<WeeklyPicksDoc>>> {
    let doc = state
        .store
        .weekly_picks()
        .await
        .map_err(|e| ApiError::store("getWeeklyPicks", e))?;

    Ok(Json(doc))
}

/// Check a schedule: 1 to 7 entries on distinct ISO dates, each with a
/// movie that has an id and a title (or legacy `name`).
pub fn validate_picks(picks: &[WeeklyPick]) -> Result<(), String> {
    if picks.is_empty() || picks.len() > WEEK_DAYS {
        return Err(format!("picks must contain 1 to {} entries", WEEK_DAYS));
    }

    let mut dates = HashSet::new();
    for pick in picks {
        NaiveDate::parse_from_str(&pick.date, "%Y-%m-%d")
            .map_err(|_| format!("invalid pick date: {}", pick.date))?;
        if !dates.insert(pick.date.as_str()) {
            return Err(format!("duplicate pick date: {}", pick.date));
        }
        if pick.movie.id.trim().is_empty() {
            return Err(format!("pick on {} has no movie id", pick.date));
        }
        let titled = [&pick.movie.title, &pick.movie.name]
            .into_iter()
            .flatten()
            .any(|t| !t.trim().is_empty());
        if !titled {
            return Err(format!("pick on {} has no movie title", pick.date));
        }
    }

    Ok(())
}

/// POST /saveWeeklyPicks {picks: [{date, movie}]}
async fn save_weekly_picks(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<Json<WeeklyPicksDoc>> {
    let body = read_json(&body);
    let raw = body
        .get("picks")
        .cloned()
        .ok_or_else(|| ApiError::bad_request("picks is required"))?;

    let picks: Vec<WeeklyPick> = serde_json::from_value(raw)
        .map_err(|e| ApiError::bad_request(format!("Invalid picks: {}", e)))?;
    validate_picks(&picks).map_err(ApiError::BadRequest)?;

    let doc = state
        .store
        .save_weekly_picks(&picks, now_millis())
        .await
        .map_err(|e| ApiError::store("saveWeeklyPicks", e))?;

    tracing::info!("Saved weekly picks ({} days)", doc.picks.len());
    Ok(Json(doc))
}
