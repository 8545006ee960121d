use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};

/// Fields a client may write on create/update. Anything else in a request body is dropped.
pub const WRITABLE_FIELDS: [&str; 8] = [
    "title",
    "name",
    "year",
    "actors",
    "genre",
    "poster_link",
    "landscape_poster_link",
    "description",
];

/// Days in a weekly-picks schedule.
pub const WEEK_DAYS: usize = 7;

/// Current time as epoch milliseconds, the timestamp unit stored on every record.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// `"Drama"` or `["Drama", "Crime"]`; older documents store a single genre.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) if s.trim().is_empty() => Vec::new(),
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

fn deserialize_string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<OneOrMany>::deserialize(deserializer)?
        .map(OneOrMany::into_vec)
        .unwrap_or_default())
}

fn deserialize_opt_string_or_list<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<OneOrMany>::deserialize(deserializer)?.map(OneOrMany::into_vec))
}

/// A movie record in the catalog collection.
///
/// Older imported documents may lack a title (they used `name`), a year or
/// timestamps, so most fields are optional on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default)]
    pub actors: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_string_or_list")]
    pub genre: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landscape_poster_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(rename = "updatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    #[serde(rename = "lastWatchedAt", default, skip_serializing_if = "Option::is_none")]
    pub last_watched_at: Option<i64>,
}

impl CatalogItem {
    /// Title for display: `title`, then `name`, then a placeholder.
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.name.as_deref().filter(|n| !n.trim().is_empty()))
            .unwrap_or("(untitled)")
    }

    pub fn has_poster(&self) -> bool {
        self.poster_link.as_deref().is_some_and(|p| !p.is_empty())
    }

    pub fn has_landscape_poster(&self) -> bool {
        self.landscape_poster_link
            .as_deref()
            .is_some_and(|p| !p.is_empty())
    }
}

/// The whitelisted writable subset of a [`CatalogItem`].
///
/// Used as the create payload, the partial-update patch, and the normalized
/// output of the enrichment lookups. `None` means "not provided".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actors: Option<Vec<String>>,
    #[serde(
        default,
        deserialize_with = "deserialize_opt_string_or_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub genre: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landscape_poster_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ItemFields {
    pub fn is_empty(&self) -> bool {
        *self == ItemFields::default()
    }

    /// Trimmed title, or `None` when absent or blank.
    pub fn trimmed_title(&self) -> Option<String> {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }
}

/// One day of a saved weekly-picks schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyPick {
    /// ISO calendar date, `YYYY-MM-DD`.
    pub date: String,
    pub movie: CatalogItem,
}

/// The saved weekly-picks document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyPicksDoc {
    pub picks: Vec<WeeklyPick>,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
}
