// Paged catalog browsing driven by a URL-style query string.
//
// The query carries `q` (title filter applied locally), `genre`, `sort`,
// `dir` and `page`. Pages are fetched with keyset cursors: page *p* starts
// after the last item of page *p-1*, so cursors are remembered per page and
// thrown away whenever anything but the page index changes.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};

use super::{CatalogClient, ClientResult, ListParams};
use crate::models::CatalogItem;

pub const PAGE_SIZE: usize = 24;

const DEFAULT_SORT: &str = "title";
const DEFAULT_DIR: &str = "asc";

/// One page request against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub genre: Option<String>,
    pub sort: String,
    pub dir: String,
    pub limit: usize,
    pub start_after: Option<String>,
}

#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, request: &PageRequest) -> ClientResult<Vec<CatalogItem>>;
}

#[async_trait]
impl PageSource for CatalogClient {
    async fn fetch_page(&self, request: &PageRequest) -> ClientResult<Vec<CatalogItem>> {
        let params = ListParams {
            limit: Some(request.limit),
            genre: request.genre.clone(),
            sort: Some(request.sort.clone()),
            dir: Some(request.dir.clone()),
            start_after: request.start_after.clone(),
        };
        self.list_items(&params).await
    }
}

/// Effective browse parameters, defaults filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseParams {
    pub q: String,
    pub genre: String,
    pub sort: String,
    pub dir: String,
    pub page: usize,
}

impl BrowseParams {
    /// Everything except the page index. Cursors are valid only while this
    /// stays the same.
    fn shape(&self) -> (String, String, String, String) {
        (
            self.q.clone(),
            self.genre.clone(),
            self.sort.clone(),
            self.dir.clone(),
        )
    }
}

/// The raw query string state. Keys with empty values are never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryState {
    pairs: BTreeMap<String, String>,
}

impl QueryState {
    pub fn parse(query: &str) -> Self {
        let mut state = Self::default();
        for pair in query.trim_start_matches('?').split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = decode(key);
            if !key.is_empty() {
                state.set(&key, &decode(value));
            }
        }
        state
    }

    /// Set a key; an empty value removes it.
    pub fn set(&mut self, key: &str, value: &str) {
        if value.is_empty() {
            self.pairs.remove(key);
        } else {
            self.pairs.insert(key.to_string(), value.to_string());
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.get(key).map(String::as_str)
    }

    pub fn to_query_string(&self) -> String {
        self.pairs
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn params(&self) -> BrowseParams {
        BrowseParams {
            q: self.get("q").unwrap_or_default().to_string(),
            genre: self.get("genre").unwrap_or_default().to_string(),
            sort: self.get("sort").unwrap_or(DEFAULT_SORT).to_string(),
            dir: self.get("dir").unwrap_or(DEFAULT_DIR).to_string(),
            page: self.get("page").and_then(|p| p.parse().ok()).unwrap_or(0),
        }
    }
}

fn decode(raw: &str) -> String {
    let raw = raw.replace('+', " ");
    urlencoding::decode(&raw)
        .map(|s| s.into_owned())
        .unwrap_or(raw)
}

/// Case-insensitive title containment; an empty term keeps everything.
pub fn title_matches(item: &CatalogItem, term: &str) -> bool {
    let term = term.trim().to_lowercase();
    term.is_empty()
        || item
            .title
            .as_deref()
            .unwrap_or_default()
            .to_lowercase()
            .contains(&term)
}

pub struct MovieBrowser<S> {
    source: S,
    query: QueryState,
    /// Last item id of each fetched page, `None` for an empty page
    cursors: HashMap<usize, Option<String>>,
    shape: Option<(String, String, String, String)>,
    items: Vec<CatalogItem>,
}

impl<S: PageSource> MovieBrowser<S> {
    pub fn new(source: S, query_string: &str) -> Self {
        Self {
            source,
            query: QueryState::parse(query_string),
            cursors: HashMap::new(),
            shape: None,
            items: Vec::new(),
        }
    }

    pub fn params(&self) -> BrowseParams {
        self.query.params()
    }

    pub fn query_string(&self) -> String {
        self.query.to_query_string()
    }

    pub fn items(&self) -> &[CatalogItem] {
        &self.items
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Change one parameter. Changing anything but `page` returns to the
    /// first page.
    pub fn set_param(&mut self, key: &str, value: &str) {
        self.query.set(key, value);
        if key != "page" {
            self.query.set("page", "");
        }
    }

    pub fn next(&mut self) {
        let page = self.params().page + 1;
        self.query.set("page", &page.to_string());
    }

    pub fn prev(&mut self) {
        let page = self.params().page.saturating_sub(1);
        self.query.set("page", &page.to_string());
    }

    /// Fetch the current page and apply the local title filter.
    pub async fn load(&mut self) -> ClientResult<&[CatalogItem]> {
        let params = self.params();

        let shape = params.shape();
        if self.shape.as_ref() != Some(&shape) {
            tracing::debug!("Browse parameters changed, dropping page cursors");
            self.cursors.clear();
            self.shape = Some(shape);
        }

        let start_after = match params.page {
            0 => None,
            page => self.cursors.get(&(page - 1)).cloned().flatten(),
        };

        let request = PageRequest {
            genre: Some(params.genre.clone()).filter(|g| !g.is_empty()),
            sort: params.sort.clone(),
            dir: params.dir.clone(),
            limit: PAGE_SIZE,
            start_after,
        };
        let page = self.source.fetch_page(&request).await?;

        self.cursors
            .insert(params.page, page.last().map(|item| item.id.clone()));
        self.items = page
            .into_iter()
            .filter(|item| title_matches(item, &params.q))
            .collect();

        Ok(&self.items)
    }
}
