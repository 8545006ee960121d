// AI-assisted movie lookup over an OpenAI-compatible chat completions API.
//
// The model is asked for a single JSON object under a strict schema. The
// first balanced `{...}` in the assistant text that parses as JSON is taken
// as the answer; when none is found the caller gets the provider body back
// untouched.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::EnrichmentConfig;
use crate::models::ItemFields;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Request timeout")]
    Timeout,
}

/// Result of an AI lookup
#[derive(Debug, Clone, PartialEq)]
pub enum AiLookup {
    /// A movie object was extracted and normalized
    Movie(ItemFields),
    /// Nothing usable in the reply; the provider body as received
    Raw(Value),
}

/// OpenAI-compatible chat client
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: Value,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

const SYSTEM_PROMPT: &str = "You are a film metadata assistant. Answer with a single JSON \
object describing the requested movie and nothing else. Use null for anything you do not \
know. Poster links must be direct image URLs.";

/// JSON schema the model must follow
pub fn movie_schema() -> Value {
    let nullable_string = json!({"type": ["string", "null"]});
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": [
            "title", "name", "year", "actors", "genre",
            "poster_link", "landscape_poster_link", "description"
        ],
        "properties": {
            "title": {"type": "string"},
            "name": nullable_string,
            "year": {"type": ["integer", "null"]},
            "actors": {"type": "array", "items": {"type": "string"}},
            "genre": {"type": "array", "items": {"type": "string"}},
            "poster_link": nullable_string,
            "landscape_poster_link": nullable_string,
            "description": nullable_string
        }
    })
}

fn user_prompt(title: &str, year: Option<i32>) -> String {
    match year {
        Some(year) => format!(
            "Find the movie \"{}\" released in {}. Include up to 10 lead actors and its genres.",
            title, year
        ),
        None => format!(
            "Find the movie \"{}\". Include up to 10 lead actors and its genres.",
            title
        ),
    }
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    /// `None` when no API key is configured.
    pub fn from_config(config: &EnrichmentConfig) -> Result<Option<Self>, LlmError> {
        let Some(key) = config.openai_api_key.as_deref().filter(|k| !k.is_empty()) else {
            return Ok(None);
        };

        Self::new(
            &config.openai_base_url,
            &config.openai_model,
            key,
            Duration::from_secs(config.timeout_secs),
        )
        .map(Some)
    }

    pub async fn find_movie(&self, title: &str, year: Option<i32>) -> Result<AiLookup, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt(title, year),
                },
            ],
            temperature: 0.0,
            response_format: json!({
                "type": "json_schema",
                "json_schema": {"name": "movie", "strict": true, "schema": movie_schema()}
            }),
        };

        tracing::debug!(model = %self.model, title = %title, "Sending AI movie lookup");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(interpret_reply(&body))
    }
}

/// Pull a movie out of a chat completion body, or hand the body back raw.
pub fn interpret_reply(body: &str) -> AiLookup {
    let content = serde_json::from_str::<ChatResponse>(body)
        .ok()
        .and_then(|r| r.choices.into_iter().next())
        .and_then(|c| c.message.content);

    if let Some(movie) = content.as_deref().and_then(extract_first_json_object) {
        if movie.is_object() {
            return AiLookup::Movie(normalize_movie(&movie));
        }
    }

    tracing::warn!("AI reply held no JSON object, returning raw provider body");
    let raw = serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()));
    AiLookup::Raw(raw)
}

/// First balanced `{...}` in `text` that parses as JSON. Braces inside string
/// literals and escaped quotes are not counted.
pub fn extract_first_json_object(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();

    for (start, _) in text.match_indices('{') {
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (offset, &b) in bytes[start..].iter().enumerate() {
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }

            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        let candidate = &text[start..=start + offset];
                        if let Ok(value) = serde_json::from_str(candidate) {
                            return Some(value);
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
    }

    None
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn list_field(value: &Value, key: &str) -> Vec<String> {
    match value.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(joined)) => joined
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Coerce a model-produced object into catalog fields
pub fn normalize_movie(value: &Value) -> ItemFields {
    let title = string_field(value, "title").or_else(|| string_field(value, "name"));
    let name = string_field(value, "name").or_else(|| title.clone());

    let year = match value.get("year") {
        Some(Value::Number(n)) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };

    ItemFields {
        title,
        name,
        year,
        actors: Some(list_field(value, "actors")),
        genre: Some(list_field(value, "genre")),
        poster_link: string_field(value, "poster_link"),
        landscape_poster_link: string_field(value, "landscape_poster_link"),
        description: string_field(value, "description"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use axum::{routing::post, Json, Router};

    #[test]
    fn test_extract_skips_braces_in_strings() {
        let text = r#"Sure! Here it is: {"title": "The {Weird} Movie", "note": "a \"quoted\" }"} trailing"#;
        let value = extract_first_json_object(text).unwrap();
        assert_eq!(value["title"], "The {Weird} Movie");
        assert_eq!(value["note"], "a \"quoted\" }");
    }

    #[test]
    fn test_extract_moves_past_invalid_candidates() {
        let text = "{not json} then {\"year\": 1999}";
        assert_eq!(
            extract_first_json_object(text),
            Some(json!({"year": 1999}))
        );
    }

    #[test]
    fn test_extract_returns_none_without_object() {
        assert_eq!(extract_first_json_object("no json here"), None);
        assert_eq!(extract_first_json_object("{\"unterminated\": 1"), None);
    }

    #[test]
    fn test_normalize_movie_coerces_types() {
        let fields = normalize_movie(&json!({
            "name": "Alien",
            "year": "1979",
            "actors": "Sigourney Weaver, Tom Skerritt",
            "genre": ["Horror", "", "Sci-Fi"],
            "poster_link": null
        }));
        assert_eq!(fields.title.as_deref(), Some("Alien"));
        assert_eq!(fields.year, Some(1979));
        assert_eq!(
            fields.actors,
            Some(vec!["Sigourney Weaver".to_string(), "Tom Skerritt".to_string()])
        );
        assert_eq!(
            fields.genre,
            Some(vec!["Horror".to_string(), "Sci-Fi".to_string()])
        );
        assert_eq!(fields.poster_link, None);
    }

    #[test]
    fn test_interpret_reply_falls_back_to_raw() {
        let body = json!({"choices": [{"message": {"content": "I could not find it."}}]});
        match interpret_reply(&body.to_string()) {
            AiLookup::Raw(raw) => assert_eq!(raw, body),
            other => panic!("expected raw fallback, got {:?}", other),
        }

        match interpret_reply("upstream said no") {
            AiLookup::Raw(raw) => assert_eq!(raw, Value::String("upstream said no".to_string())),
            other => panic!("expected raw fallback, got {:?}", other),
        }
    }

    #[test]
    fn test_schema_requires_every_property() {
        let schema = movie_schema();
        let required = schema["required"].as_array().unwrap();
        let properties = schema["properties"].as_object().unwrap();
        assert_eq!(required.len(), properties.len());
    }

    #[tokio::test]
    async fn test_find_movie_against_fake_provider() {
        async fn completions(Json(request): Json<Value>) -> Json<Value> {
            assert_eq!(request["model"], "test-model");
            assert_eq!(request["response_format"]["json_schema"]["strict"], true);
            Json(json!({
                "choices": [{"message": {"content": "```json\n{\"title\": \"Heat\", \"year\": 1995, \"actors\": [\"Al Pacino\"], \"genre\": [\"Crime\"]}\n```"}}]
            }))
        }

        let base = test_support::serve(Router::new().route("/chat/completions", post(completions))).await;
        let client = OpenAiClient::new(base, "test-model", "key", Duration::from_secs(5)).unwrap();

        let lookup = client.find_movie("Heat", Some(1995)).await.unwrap();
        let AiLookup::Movie(fields) = lookup else {
            panic!("expected a movie");
        };
        assert_eq!(fields.title.as_deref(), Some("Heat"));
        assert_eq!(fields.year, Some(1995));
        assert_eq!(fields.actors, Some(vec!["Al Pacino".to_string()]));
    }

    #[tokio::test]
    async fn test_provider_error_status_is_an_error() {
        async fn completions() -> (axum::http::StatusCode, &'static str) {
            (axum::http::StatusCode::UNAUTHORIZED, "bad key")
        }

        let base = test_support::serve(Router::new().route("/chat/completions", post(completions))).await;
        let client = OpenAiClient::new(base, "m", "key", Duration::from_secs(5)).unwrap();

        let err = client.find_movie("Heat", None).await.unwrap_err();
        assert!(matches!(err, LlmError::Api { status: 401, .. }));
    }
}
