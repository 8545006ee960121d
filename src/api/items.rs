use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{body_id, method_fallback, read_json, writable_fields, ApiError, ApiResult};
use crate::models::{now_millis, CatalogItem};
use crate::store::{Direction, ItemQuery, SortField};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/listItems", get(list_items).fallback(method_fallback))
        .route("/getItem", get(get_item).fallback(method_fallback))
        .route("/createItem", post(create_item).fallback(method_fallback))
        .route(
            "/updateItem",
            patch(update_item)
                .post(update_item)
                .fallback(method_fallback),
        )
        .route(
            "/deleteItem",
            delete(delete_by_query)
                .post(delete_by_body)
                .fallback(method_fallback),
        )
        .route("/markWatched", post(mark_watched).fallback(method_fallback))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItemsQuery {
    pub limit: Option<String>,
    pub genre: Option<String>,
    pub sort: Option<String>,
    pub dir: Option<String>,
    pub start_after: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IdQuery {
    pub id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub ok: bool,
    pub id: String,
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

impl ListItemsQuery {
    /// Translate query parameters into a store query. Without `sort` the
    /// listing is newest release first; an explicit sort defaults to ascending.
    fn to_item_query(&self) -> ApiResult<ItemQuery> {
        let (field, default_dir) = match non_empty(self.sort.as_ref()) {
            Some(sort) => {
                let field = SortField::parse(sort)
                    .ok_or_else(|| ApiError::bad_request(format!("Invalid sort field: {}", sort)))?;
                (field, Direction::Asc)
            }
            None => (SortField::Year, Direction::Desc),
        };

        let direction = match non_empty(self.dir.as_ref()) {
            Some(dir) => Direction::parse(dir)
                .ok_or_else(|| ApiError::bad_request(format!("Invalid sort direction: {}", dir)))?,
            None => default_dir,
        };

        // Unparseable or non-positive limits mean "no limit"
        let limit = non_empty(self.limit.as_ref())
            .and_then(|l| l.parse::<i64>().ok())
            .filter(|l| *l > 0)
            .map(|l| l as usize);

        Ok(ItemQuery {
            genre: non_empty(self.genre.as_ref()).map(str::to_string),
            title_eq: None,
            order_by: Some((field, direction)),
            limit,
            start_after: non_empty(self.start_after.as_ref()).map(str::to_string),
        })
    }
}

/// GET /listItems
async fn list_items(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListItemsQuery>,
) -> ApiResult<Json<Vec<CatalogItem>>> {
    let query = params.to_item_query()?;

    let items = state
        .store
        .list(&query)
        .await
        .map_err(|e| ApiError::store("listItems", e))?;

    Ok(Json(items))
}

/// GET /getItem?id=
async fn get_item(
    State(state): State<Arc<AppState>>,
    Query(params): Query<IdQuery>,
) -> ApiResult<Json<CatalogItem>> {
    let id = non_empty(params.id.as_ref()).ok_or_else(|| ApiError::bad_request("Missing id"))?;

    state
        .store
        .get(id)
        .await
        .map_err(|e| ApiError::store("getItem", e))?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

/// POST /createItem
async fn create_item(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<CatalogItem>)> {
    let body = read_json(&body);
    let mut fields = writable_fields(&body)?;

    let title = fields
        .trimmed_title()
        .ok_or_else(|| ApiError::bad_request("title is required"))?;
    fields.title = Some(title);

    let item = state
        .store
        .create(&fields, now_millis())
        .await
        .map_err(|e| ApiError::store("createItem", e))?;

    tracing::info!("Created item {} ({})", item.id, item.display_title());
    Ok((StatusCode::CREATED, Json(item)))
}

/// PATCH|POST /updateItem
async fn update_item(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<Json<CatalogItem>> {
    let body = read_json(&body);
    let id = body_id(&body).ok_or_else(|| ApiError::bad_request("id is required"))?;
    let mut patch = writable_fields(&body)?;

    if patch.title.is_some() {
        let title = patch
            .trimmed_title()
            .ok_or_else(|| ApiError::bad_request("title must not be empty"))?;
        patch.title = Some(title);
    }

    state
        .store
        .update(&id, &patch, now_millis())
        .await
        .map_err(|e| ApiError::store("updateItem", e))?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

/// DELETE /deleteItem?id=
async fn delete_by_query(
    State(state): State<Arc<AppState>>,
    Query(params): Query<IdQuery>,
) -> ApiResult<Json<DeleteResponse>> {
    let id = non_empty(params.id.as_ref()).ok_or_else(|| ApiError::bad_request("id is required"))?;
    delete_item(&state, id).await
}

/// POST /deleteItem {id}
async fn delete_by_body(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<Json<DeleteResponse>> {
    let id = body_id(&read_json(&body)).ok_or_else(|| ApiError::bad_request("id is required"))?;
    delete_item(&state, &id).await
}

async fn delete_item(state: &AppState, id: &str) -> ApiResult<Json<DeleteResponse>> {
    let removed = state
        .store
        .delete(id)
        .await
        .map_err(|e| ApiError::store("deleteItem", e))?;

    if !removed {
        return Err(ApiError::NotFound);
    }

    tracing::info!("Deleted item {}", id);
    Ok(Json(DeleteResponse {
        ok: true,
        id: id.to_string(),
    }))
}

/// POST /markWatched {id}
async fn mark_watched(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<Json<CatalogItem>> {
    let id = body_id(&read_json(&body)).ok_or_else(|| ApiError::bad_request("id is required"))?;

    state
        .store
        .mark_watched(&id, now_millis())
        .await
        .map_err(|e| ApiError::store("markWatched", e))?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

#[cfg(test)]
mod tests {
    use crate::test_support::{memory_store, request, state_with};
    use axum::http::StatusCode;
    use axum::Router;
    use serde_json::{json, Value};

    async fn app() -> Router {
        crate::app(state_with(memory_store().await))
    }

    async fn create(app: &Router, body: Value) -> Value {
        let (status, created) = request(app, "POST", "/createItem", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
        created
    }

    #[tokio::test]
    async fn test_create_trims_title_and_drops_unknown_fields() {
        let app = app().await;
        let created = create(
            &app,
            json!({
                "title": "  Heat  ",
                "year": 1995,
                "genre": ["Crime"],
                "rating": 10,
                "createdAt": 1
            }),
        )
        .await;

        assert_eq!(created["title"], "Heat");
        assert_eq!(created["genre"], json!(["Crime"]));
        assert!(created.get("rating").is_none());
        assert_ne!(created["createdAt"], 1);
        assert_eq!(created["createdAt"], created["updatedAt"]);

        let id = created["id"].as_str().unwrap();
        let (status, fetched) = request(&app, "GET", &format!("/getItem?id={}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_single_genre_string_is_wrapped() {
        let app = app().await;
        let created = create(&app, json!({"title": "Heat", "genre": "Crime"})).await;
        assert_eq!(created["genre"], json!(["Crime"]));

        let id = created["id"].as_str().unwrap();
        let (status, updated) = request(
            &app,
            "PATCH",
            "/updateItem",
            Some(json!({"id": id, "genre": "Thriller"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["genre"], json!(["Thriller"]));
    }

    #[tokio::test]
    async fn test_create_requires_title() {
        let app = app().await;
        for body in [json!({"title": "   "}), json!({"year": 2000}), json!({"title": 5})] {
            let (status, _) = request(&app, "POST", "/createItem", Some(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }

        let (status, body) = request(&app, "POST", "/createItem", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "title is required"}));
    }

    #[tokio::test]
    async fn test_update_touches_only_given_fields() {
        let app = app().await;
        let created = create(
            &app,
            json!({"title": "Alien", "year": 1979, "description": "Space"}),
        )
        .await;
        let id = created["id"].as_str().unwrap();

        let (status, updated) = request(
            &app,
            "PATCH",
            "/updateItem",
            Some(json!({"id": id, "description": "In space", "createdAt": 5})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["title"], "Alien");
        assert_eq!(updated["year"], 1979);
        assert_eq!(updated["description"], "In space");
        assert_eq!(updated["createdAt"], created["createdAt"]);

        let (status, _) = request(
            &app,
            "POST",
            "/updateItem",
            Some(json!({"id": id, "title": ""})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_update_errors() {
        let app = app().await;
        let (status, body) =
            request(&app, "PATCH", "/updateItem", Some(json!({"title": "X"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "id is required");

        let (status, body) = request(
            &app,
            "PATCH",
            "/updateItem",
            Some(json!({"id": "missing", "title": "X"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Not found");
    }

    #[tokio::test]
    async fn test_delete_by_query_and_body() {
        let app = app().await;
        let first = create(&app, json!({"title": "One"})).await;
        let second = create(&app, json!({"title": "Two"})).await;

        let uri = format!("/deleteItem?id={}", first["id"].as_str().unwrap());
        let (status, body) = request(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true, "id": first["id"]}));

        let (status, _) = request(
            &app,
            "POST",
            "/deleteItem",
            Some(json!({"id": second["id"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = request(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = request(&app, "DELETE", "/deleteItem", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_items_orders_and_paginates() {
        let app = app().await;
        for (title, year) in [("B", 1990), ("A", 2000), ("C", 1980)] {
            create(&app, json!({"title": title, "year": year})).await;
        }

        let (status, items) = request(&app, "GET", "/listItems", None).await;
        assert_eq!(status, StatusCode::OK);
        let years: Vec<i64> = items
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["year"].as_i64().unwrap())
            .collect();
        assert_eq!(years, vec![2000, 1990, 1980]);

        let (_, page) = request(&app, "GET", "/listItems?sort=title&limit=2", None).await;
        let page = page.as_array().unwrap().clone();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0]["title"], "A");

        let uri = format!(
            "/listItems?sort=title&limit=2&startAfter={}",
            page[1]["id"].as_str().unwrap()
        );
        let (_, rest) = request(&app, "GET", &uri, None).await;
        assert_eq!(rest.as_array().unwrap().len(), 1);
        assert_eq!(rest[0]["title"], "C");

        let (_, unlimited) = request(&app, "GET", "/listItems?limit=abc", None).await;
        assert_eq!(unlimited.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_list_items_rejects_bad_parameters() {
        let app = app().await;
        let (status, _) = request(&app, "GET", "/listItems?sort=rating", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = request(&app, "GET", "/listItems?dir=sideways", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = request(&app, "GET", "/listItems?startAfter=ghost", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_items_filters_by_genre() {
        let app = app().await;
        create(&app, json!({"title": "Heat", "year": 1995, "genre": ["Crime"]})).await;
        create(&app, json!({"title": "Up", "year": 2009, "genre": ["Animation"]})).await;

        let (_, items) = request(&app, "GET", "/listItems?genre=Crime", None).await;
        let items = items.as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["title"], "Heat");
    }

    #[tokio::test]
    async fn test_get_item_errors() {
        let app = app().await;
        let (status, body) = request(&app, "GET", "/getItem", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing id");

        let (status, _) = request(&app, "GET", "/getItem?id=nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_mark_watched() {
        let app = app().await;
        let created = create(&app, json!({"title": "Up"})).await;

        let (status, watched) = request(
            &app,
            "POST",
            "/markWatched",
            Some(json!({"id": created["id"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(watched["lastWatchedAt"].as_i64().is_some());
        assert_eq!(watched["lastWatchedAt"], watched["updatedAt"]);

        let (status, _) =
            request(&app, "POST", "/markWatched", Some(json!({"id": "nope"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_method_handling() {
        let app = app().await;
        let (status, body) = request(&app, "POST", "/listItems", None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body, json!({"error": "Method not allowed"}));

        let (status, _) = request(&app, "GET", "/deleteItem?id=x", None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        let (status, _) = request(&app, "OPTIONS", "/createItem", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }
}
