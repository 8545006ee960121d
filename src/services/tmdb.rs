// TMDB movie lookup backing findMovie
// https://developer.themoviedb.org/reference/search-movie

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::time::Duration;

use crate::config::EnrichmentConfig;
use crate::models::ItemFields;

const TMDB_API_BASE: &str = "https://api.themoviedb.org/3";
const TMDB_IMAGE_BASE: &str = "https://image.tmdb.org/t/p";

/// Number of cast names copied onto a catalog record
const MAX_CAST: usize = 10;

/// How requests authenticate against TMDB
#[derive(Debug, Clone)]
pub enum TmdbAuth {
    /// v4 read access token, sent as a bearer header
    Bearer(String),
    /// v3 API key, sent as the `api_key` query parameter
    ApiKey(String),
}

/// TMDB API client
pub struct TmdbClient {
    client: Client,
    auth: TmdbAuth,
    api_base: String,
    image_base: String,
}

/// One page of `/search/movie` hits
#[derive(Debug, Deserialize)]
pub struct MovieSearchResults {
    pub results: Vec<MovieSearchResult>,
    #[serde(default)]
    pub total_results: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MovieSearchResult {
    pub id: i64,
    pub title: String,
    pub release_date: Option<String>,
}

/// Detailed movie info
#[derive(Debug, Deserialize)]
pub struct MovieDetails {
    pub id: i64,
    pub title: String,
    pub overview: Option<String>,
    pub release_date: Option<String>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub genres: Option<Vec<Genre>>,
    pub credits: Option<Credits>,
}

#[derive(Debug, Deserialize)]
pub struct Genre {
    pub id: i64,
    pub name: String,
}

/// Credits response (cast only, crew is not used)
#[derive(Debug, Deserialize)]
pub struct Credits {
    pub cast: Option<Vec<CastMember>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CastMember {
    pub name: String,
    pub order: Option<i32>,
}

/// Poster and backdrop widths used in catalog records
#[derive(Debug, Clone, Copy)]
pub enum ImageSize {
    /// w500 - portrait poster
    Poster,
    /// w1280 - landscape backdrop
    Backdrop,
}

impl ImageSize {
    fn as_str(&self) -> &'static str {
        match self {
            ImageSize::Poster => "w500",
            ImageSize::Backdrop => "w1280",
        }
    }
}

impl TmdbClient {
    /// Client with a fixed per-request timeout
    pub fn new(auth: TmdbAuth, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build TMDB HTTP client")?;

        Ok(Self {
            client,
            auth,
            api_base: TMDB_API_BASE.to_string(),
            image_base: TMDB_IMAGE_BASE.to_string(),
        })
    }

    /// Create client from the enrichment settings; `None` without credentials.
    /// The bearer token wins when both are configured.
    pub fn from_config(config: &EnrichmentConfig) -> Result<Option<Self>> {
        let auth = match (&config.tmdb_bearer, &config.tmdb_api_key) {
            (Some(token), _) if !token.is_empty() => TmdbAuth::Bearer(token.clone()),
            (_, Some(key)) if !key.is_empty() => TmdbAuth::ApiKey(key.clone()),
            _ => return Ok(None),
        };

        Self::new(auth, Duration::from_secs(config.timeout_secs)).map(Some)
    }

    /// Point the client at a different API host (used against local fakes)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            TmdbAuth::Bearer(token) => request.bearer_auth(token),
            TmdbAuth::ApiKey(key) => request.query(&[("api_key", key.as_str())]),
        }
    }

    /// `/search/movie`, narrowed by release year when given
    pub async fn search_movie(
        &self,
        query: &str,
        year: Option<i32>,
    ) -> Result<Vec<MovieSearchResult>> {
        let mut url = format!(
            "{}/search/movie?query={}&include_adult=false",
            self.api_base,
            urlencoding::encode(query)
        );

        if let Some(y) = year {
            url.push_str(&format!("&year={}", y));
        }

        let response: MovieSearchResults = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .context("Failed to search TMDB for movies")?
            .error_for_status()
            .context("TMDB movie search returned an error status")?
            .json()
            .await
            .context("Failed to parse TMDB movie search response")?;

        tracing::debug!(
            "TMDB search '{}' ({:?}): {} results",
            query,
            year,
            response.total_results
        );

        Ok(response.results)
    }

    /// `/movie/{id}` with credits appended
    pub async fn get_movie_details(&self, tmdb_id: i64) -> Result<MovieDetails> {
        let url = format!(
            "{}/movie/{}?append_to_response=credits",
            self.api_base, tmdb_id
        );

        let response: MovieDetails = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .context("Failed to get TMDB movie details")?
            .error_for_status()
            .context("TMDB movie details returned an error status")?
            .json()
            .await
            .context("Failed to parse TMDB movie details response")?;

        Ok(response)
    }

    /// Search by title and year, take the first hit and map its details onto
    /// the catalog record shape. `None` when the search has no results.
    pub async fn lookup_movie(&self, title: &str, year: Option<i32>) -> Result<Option<ItemFields>> {
        let results = self.search_movie(title, year).await?;

        let Some(first) = results.into_iter().next() else {
            tracing::debug!("TMDB returned no results for '{}'", title);
            return Ok(None);
        };

        let details = self.get_movie_details(first.id).await?;
        Ok(Some(self.movie_fields(details)))
    }

    fn image_url(&self, path: Option<&str>, size: ImageSize) -> Option<String> {
        path.filter(|p| !p.is_empty())
            .map(|p| format!("{}/{}{}", self.image_base, size.as_str(), p))
    }

    /// Map a TMDB detail response onto catalog fields
    pub fn movie_fields(&self, details: MovieDetails) -> ItemFields {
        let year = details
            .release_date
            .as_deref()
            .and_then(|d| d.split('-').next())
            .and_then(|y| y.parse().ok());

        let genre = details
            .genres
            .map(|g| g.into_iter().map(|genre| genre.name).collect())
            .unwrap_or_default();

        ItemFields {
            title: Some(details.title.clone()),
            name: Some(details.title),
            year,
            actors: Some(extract_cast(details.credits, MAX_CAST)),
            genre: Some(genre),
            poster_link: self.image_url(details.poster_path.as_deref(), ImageSize::Poster),
            landscape_poster_link: self
                .image_url(details.backdrop_path.as_deref(), ImageSize::Backdrop),
            description: details.overview.filter(|o| !o.is_empty()),
        }
    }
}

/// Cast names in billing order
fn extract_cast(credits: Option<Credits>, limit: usize) -> Vec<String> {
    let Some(mut cast) = credits.and_then(|c| c.cast) else {
        return Vec::new();
    };

    cast.sort_by_key(|member| member.order.unwrap_or(i32::MAX));
    cast.into_iter()
        .take(limit)
        .map(|member| member.name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use axum::{
        extract::{Path, Query},
        http::HeaderMap,
        routing::get,
        Json, Router,
    };
    use serde_json::{json, Value};
    use std::collections::HashMap;

    fn details() -> MovieDetails {
        serde_json::from_value(json!({
            "id": 949,
            "title": "Heat",
            "overview": "A group of high-end professional thieves...",
            "release_date": "1995-12-15",
            "poster_path": "/heat.jpg",
            "backdrop_path": "/heat-wide.jpg",
            "genres": [{"id": 28, "name": "Action"}, {"id": 80, "name": "Crime"}],
            "credits": {
                "cast": (0..12)
                    .rev()
                    .map(|i| json!({"name": format!("Actor {}", i), "order": i}))
                    .collect::<Vec<_>>()
            }
        }))
        .unwrap()
    }

    fn client() -> TmdbClient {
        TmdbClient::new(TmdbAuth::ApiKey("k".to_string()), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_image_size_paths() {
        assert_eq!(ImageSize::Poster.as_str(), "w500");
        assert_eq!(ImageSize::Backdrop.as_str(), "w1280");
    }

    #[test]
    fn test_movie_fields_mapping() {
        let fields = client().movie_fields(details());

        assert_eq!(fields.title.as_deref(), Some("Heat"));
        assert_eq!(fields.year, Some(1995));
        assert_eq!(
            fields.genre,
            Some(vec!["Action".to_string(), "Crime".to_string()])
        );
        assert_eq!(
            fields.poster_link.as_deref(),
            Some("https://image.tmdb.org/t/p/w500/heat.jpg")
        );
        assert_eq!(
            fields.landscape_poster_link.as_deref(),
            Some("https://image.tmdb.org/t/p/w1280/heat-wide.jpg")
        );
        assert!(fields.description.unwrap().starts_with("A group"));

        let actors = fields.actors.unwrap();
        assert_eq!(actors.len(), 10);
        assert_eq!(actors[0], "Actor 0");
        assert_eq!(actors[9], "Actor 9");
    }

    #[test]
    fn test_missing_artwork_and_date() {
        let details: MovieDetails =
            serde_json::from_value(json!({"id": 1, "title": "Obscure", "poster_path": ""}))
                .unwrap();
        let fields = client().movie_fields(details);
        assert_eq!(fields.year, None);
        assert_eq!(fields.poster_link, None);
        assert_eq!(fields.landscape_poster_link, None);
        assert_eq!(fields.actors, Some(Vec::new()));
    }

    #[test]
    fn test_from_config_prefers_bearer() {
        let mut config = EnrichmentConfig::default();
        assert!(TmdbClient::from_config(&config).unwrap().is_none());

        config.tmdb_api_key = Some("key".to_string());
        config.tmdb_bearer = Some("token".to_string());
        let client = TmdbClient::from_config(&config).unwrap().unwrap();
        assert!(matches!(client.auth, TmdbAuth::Bearer(ref t) if t == "token"));
    }

    #[tokio::test]
    async fn test_lookup_movie_against_fake_api() {
        async fn search(
            headers: HeaderMap,
            Query(params): Query<HashMap<String, String>>,
        ) -> Json<Value> {
            assert_eq!(
                headers.get("authorization").unwrap().to_str().unwrap(),
                "Bearer secret"
            );
            if params.get("query").map(String::as_str) == Some("Heat")
                && params.get("year").map(String::as_str) == Some("1995")
            {
                Json(json!({"results": [{"id": 949, "title": "Heat"}], "total_results": 1}))
            } else {
                Json(json!({"results": [], "total_results": 0}))
            }
        }

        async fn movie(Path(id): Path<i64>) -> Json<Value> {
            Json(json!({
                "id": id,
                "title": "Heat",
                "release_date": "1995-12-15",
                "backdrop_path": "/wide.jpg",
                "credits": {"cast": [{"name": "Al Pacino", "order": 0}]}
            }))
        }

        let base = test_support::serve(
            Router::new()
                .route("/search/movie", get(search))
                .route("/movie/:id", get(movie)),
        )
        .await;

        let client = TmdbClient::new(
            TmdbAuth::Bearer("secret".to_string()),
            Duration::from_secs(5),
        )
        .unwrap()
        .with_api_base(base);

        let found = client.lookup_movie("Heat", Some(1995)).await.unwrap().unwrap();
        assert_eq!(found.actors, Some(vec!["Al Pacino".to_string()]));
        assert_eq!(found.poster_link, None);
        assert!(found
            .landscape_poster_link
            .unwrap()
            .ends_with("/w1280/wide.jpg"));

        assert!(client.lookup_movie("Nothing", None).await.unwrap().is_none());
    }
}
