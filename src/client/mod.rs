// Typed HTTP client for the catalog API, plus the browsing, background
// loading and weekly-picks logic that sits on top of it.

use futures::stream::{self, Stream, StreamExt};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

use crate::models::{CatalogItem, ItemFields, WeeklyPick, WeeklyPicksDoc};

pub mod browse;
pub mod loader;
pub mod weekly;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Non-success status; `message` is the body's `error` field when present
    #[error("HTTP {status}: {message}")]
    Http { status: StatusCode, message: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("event stream error: {0}")]
    Stream(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Http { status, .. } if *status == StatusCode::NOT_FOUND)
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Parameters of a `listItems` call. `None` leaves the server default.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ListParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    #[serde(rename = "startAfter", skip_serializing_if = "Option::is_none")]
    pub start_after: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CatalogClient {
    client: Client,
    base_url: String,
}

impl CatalogClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Client for streaming endpoints: no overall timeout, only on connect.
    fn streaming(&self) -> ClientResult<Client> {
        Ok(Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            let message = serde_json::from_slice::<Value>(&bytes)
                .ok()
                .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| String::from_utf8_lossy(&bytes).into_owned());
            return Err(ClientError::Http { status, message });
        }

        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn get<T: DeserializeOwned, Q: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        query: &Q,
    ) -> ClientResult<T> {
        let response = self.client.get(self.url(endpoint)).query(query).send().await?;
        Self::decode(response).await
    }

    async fn post<T: DeserializeOwned>(&self, endpoint: &str, body: &Value) -> ClientResult<T> {
        let response = self.client.post(self.url(endpoint)).json(body).send().await?;
        Self::decode(response).await
    }

    pub async fn list_items(&self, params: &ListParams) -> ClientResult<Vec<CatalogItem>> {
        self.get("listItems", params).await
    }

    /// `None` when the item does not exist.
    pub async fn get_item(&self, id: &str) -> ClientResult<Option<CatalogItem>> {
        match self.get("getItem", &[("id", id)]).await {
            Ok(item) => Ok(Some(item)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn create_item(&self, fields: &ItemFields) -> ClientResult<CatalogItem> {
        self.post("createItem", &serde_json::to_value(fields)?).await
    }

    pub async fn update_item(&self, id: &str, patch: &ItemFields) -> ClientResult<CatalogItem> {
        let mut body = serde_json::to_value(patch)?;
        body["id"] = json!(id);
        let response = self
            .client
            .patch(self.url("updateItem"))
            .json(&body)
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn delete_item(&self, id: &str) -> ClientResult<()> {
        let response = self
            .client
            .delete(self.url("deleteItem"))
            .query(&[("id", id)])
            .send()
            .await?;
        Self::decode::<Value>(response).await.map(|_| ())
    }

    pub async fn mark_watched(&self, id: &str) -> ClientResult<CatalogItem> {
        self.post("markWatched", &json!({ "id": id })).await
    }

    pub async fn random_items(&self, count: usize) -> ClientResult<Vec<CatalogItem>> {
        self.post("randomItems", &json!({ "count": count })).await
    }

    pub async fn weekly_picks(&self) -> ClientResult<Option<WeeklyPicksDoc>> {
        let no_query: [(&str, &str); 0] = [];
        self.get("getWeeklyPicks", &no_query).await
    }

    pub async fn save_weekly_picks(&self, picks: &[WeeklyPick]) -> ClientResult<WeeklyPicksDoc> {
        self.post("saveWeeklyPicks", &json!({ "picks": picks })).await
    }

    /// TMDB lookup through the API; `None` when nothing matched.
    pub async fn find_movie(&self, title: &str, year: Option<i32>) -> ClientResult<Option<ItemFields>> {
        let year = year.map(|y| y.to_string());
        let mut query = vec![("title", title)];
        if let Some(year) = year.as_deref() {
            query.push(("year", year));
        }

        match self.get("findMovie", &query).await {
            Ok(fields) => Ok(Some(fields)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// LLM lookup; either normalized fields or `{"raw": ...}`.
    pub async fn ai_find_movie(&self, title: &str, year: Option<i32>) -> ClientResult<Value> {
        self.post("aiFindMovie", &json!({ "title": title, "year": year }))
            .await
    }

    /// Subscribe to `watchItems`. Yields the full item list on connect and
    /// after every change.
    pub async fn watch_items(
        &self,
    ) -> ClientResult<impl Stream<Item = ClientResult<Vec<CatalogItem>>>> {
        let response = self.streaming()?.get(self.url("watchItems")).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Http { status, message });
        }

        let bytes = response.bytes_stream().boxed();
        let parser = SseParser::default();

        Ok(stream::unfold(
            (bytes, parser),
            |(mut bytes, mut parser)| async move {
                loop {
                    if let Some(event) = parser.next_event() {
                        let item = event.into_snapshot();
                        return Some((item, (bytes, parser)));
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => parser.push(&chunk),
                        Some(Err(e)) => return Some((Err(e.into()), (bytes, parser))),
                        None => return None,
                    }
                }
            },
        ))
    }
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq)]
struct SseEvent {
    event: String,
    data: String,
}

impl SseEvent {
    fn into_snapshot(self) -> ClientResult<Vec<CatalogItem>> {
        match self.event.as_str() {
            "snapshot" => Ok(serde_json::from_str(&self.data)?),
            _ => Err(ClientError::Stream(self.data)),
        }
    }
}

/// Incremental `text/event-stream` parser. Comment lines (keep-alives) are
/// skipped and events without data are not dispatched.
#[derive(Debug, Default)]
struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    fn next_event(&mut self) -> Option<SseEvent> {
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if self.data.is_empty() {
                    self.event = None;
                    continue;
                }
                return Some(SseEvent {
                    event: self.event.take().unwrap_or_else(|| "message".to_string()),
                    data: std::mem::take(&mut self.data).join("\n"),
                });
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }
        None
    }
}
