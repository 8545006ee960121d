// Document store abstraction for the movie collection.
//
// The handlers, admin tools and MCP server only talk to [`CatalogStore`].
// Query semantics follow a document database: ordering by a field skips
// documents that lack it, `start_after` is a keyset cursor naming the last
// document of the previous page, and batched writes are atomic per batch.

mod sqlite;

pub use sqlite::SqliteCatalogStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::{CatalogItem, ItemFields, WeeklyPick, WeeklyPicksDoc};

/// Maximum number of writes a single batch may carry.
pub const MAX_BATCH_WRITES: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("cursor document '{0}' does not exist or lacks the order field")]
    InvalidCursor(String),

    #[error("batch of {0} writes exceeds the limit of {MAX_BATCH_WRITES}")]
    BatchTooLarge(usize),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("malformed stored document: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Fields a listing can be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortField {
    #[serde(rename = "title")]
    Title,
    #[serde(rename = "name")]
    Name,
    #[serde(rename = "year")]
    Year,
    #[serde(rename = "createdAt")]
    CreatedAt,
    #[serde(rename = "updatedAt")]
    UpdatedAt,
}

impl SortField {
    /// Parse the wire name used in query strings (`title`, `createdAt`, ...).
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "title" => Some(SortField::Title),
            "name" => Some(SortField::Name),
            "year" => Some(SortField::Year),
            "createdAt" => Some(SortField::CreatedAt),
            "updatedAt" => Some(SortField::UpdatedAt),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::Title => "title",
            SortField::Name => "name",
            SortField::Year => "year",
            SortField::CreatedAt => "createdAt",
            SortField::UpdatedAt => "updatedAt",
        }
    }

    fn column(&self) -> &'static str {
        match self {
            SortField::Title => "title",
            SortField::Name => "name",
            SortField::Year => "year",
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(
            self,
            SortField::Year | SortField::CreatedAt | SortField::UpdatedAt
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("asc") {
            Some(Direction::Asc)
        } else if value.eq_ignore_ascii_case("desc") {
            Some(Direction::Desc)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

/// A collection query: filters, one ordering, a limit and a keyset cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemQuery {
    /// Keep documents whose genre list contains this value
    pub genre: Option<String>,
    /// Keep documents whose title equals this value
    pub title_eq: Option<String>,
    pub order_by: Option<(SortField, Direction)>,
    pub limit: Option<usize>,
    /// Id of the document the page starts after
    pub start_after: Option<String>,
}

impl ItemQuery {
    pub fn ordered(field: SortField, direction: Direction) -> Self {
        Self {
            order_by: Some((field, direction)),
            ..Default::default()
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, id: impl Into<String>) -> Self {
        self.start_after = Some(id.into());
        self
    }

    pub fn genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = Some(genre.into());
        self
    }
}

/// A record written by a bulk import. Writes merge into an existing document
/// with the same id; fields left `None` keep their stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportRecord {
    /// Target document id, or `None` for a store-assigned one
    pub id: Option<String>,
    pub fields: ItemFields,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
    pub last_watched_at: Option<i64>,
}

/// Notification published after every successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Created(String),
    Updated(String),
    Deleted(String),
    Imported(usize),
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Name of the collection this store reads and writes.
    fn collection(&self) -> &str;

    async fn list(&self, query: &ItemQuery) -> Result<Vec<CatalogItem>, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<CatalogItem>, StoreError>;

    /// Insert a new document with a store-assigned id.
    async fn create(&self, fields: &ItemFields, now: i64) -> Result<CatalogItem, StoreError>;

    /// Write the provided fields and stamp `updated_at`. `None` if the id is unknown.
    async fn update(
        &self,
        id: &str,
        patch: &ItemFields,
        now: i64,
    ) -> Result<Option<CatalogItem>, StoreError>;

    /// Stamp `last_watched_at` and `updated_at`. `None` if the id is unknown.
    async fn mark_watched(&self, id: &str, now: i64) -> Result<Option<CatalogItem>, StoreError>;

    /// Returns whether a document was removed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// Up to `count` documents in random order.
    async fn random(&self, count: usize) -> Result<Vec<CatalogItem>, StoreError>;

    /// Merge-write a batch atomically. Fails without writing anything if the
    /// batch is larger than [`MAX_BATCH_WRITES`].
    async fn write_batch(&self, records: &[ImportRecord]) -> Result<usize, StoreError>;

    async fn weekly_picks(&self) -> Result<Option<WeeklyPicksDoc>, StoreError>;

    async fn save_weekly_picks(
        &self,
        picks: &[WeeklyPick],
        now: i64,
    ) -> Result<WeeklyPicksDoc, StoreError>;

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_field_round_trips_wire_names() {
        for name in ["title", "name", "year", "createdAt", "updatedAt"] {
            assert_eq!(SortField::parse(name).unwrap().as_str(), name);
        }
        assert_eq!(SortField::parse("rating"), None);
        assert_eq!(SortField::parse("created_at"), None);
    }

    #[test]
    fn test_direction_parse_is_case_insensitive() {
        assert_eq!(Direction::parse("DESC"), Some(Direction::Desc));
        assert_eq!(Direction::parse("asc"), Some(Direction::Asc));
        assert_eq!(Direction::parse("up"), None);
    }
}
