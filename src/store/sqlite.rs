use async_trait::async_trait;
use sqlx::{Encode, QueryBuilder, Sqlite, SqlitePool, Type};
use tokio::sync::broadcast;

use super::{
    CatalogStore, ChangeEvent, Direction, ImportRecord, ItemQuery, SortField, StoreError,
    MAX_BATCH_WRITES,
};
use crate::models::{CatalogItem, ItemFields, WeeklyPick, WeeklyPicksDoc};

const ITEM_COLUMNS: &str = "id, title, name, year, actors, genre, poster_link, \
    landscape_poster_link, description, created_at, updated_at, last_watched_at";

/// SQLite-backed catalog collection.
pub struct SqliteCatalogStore {
    pool: SqlitePool,
    collection: String,
    changes: broadcast::Sender<ChangeEvent>,
}

#[derive(Debug, sqlx::FromRow)]
struct ItemRow {
    id: String,
    title: Option<String>,
    name: Option<String>,
    year: Option<i32>,
    actors: Option<String>,
    genre: Option<String>,
    poster_link: Option<String>,
    landscape_poster_link: Option<String>,
    description: Option<String>,
    created_at: Option<i64>,
    updated_at: Option<i64>,
    last_watched_at: Option<i64>,
}

impl ItemRow {
    fn into_item(self) -> Result<CatalogItem, StoreError> {
        Ok(CatalogItem {
            id: self.id,
            title: self.title,
            name: self.name,
            year: self.year,
            actors: decode_list(self.actors)?,
            genre: decode_list(self.genre)?,
            poster_link: self.poster_link,
            landscape_poster_link: self.landscape_poster_link,
            description: self.description,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_watched_at: self.last_watched_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WeeklyPicksRow {
    picks: String,
    created_at: i64,
    updated_at: i64,
}

enum CursorValue {
    Int(i64),
    Text(String),
}

fn decode_list(raw: Option<String>) -> Result<Vec<String>, StoreError> {
    match raw {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(Vec::new()),
    }
}

fn encode_list(list: Option<&Vec<String>>) -> Result<Option<String>, StoreError> {
    list.map(serde_json::to_string)
        .transpose()
        .map_err(StoreError::from)
}

/// Store-assigned document id: 20 alphanumeric characters.
fn new_document_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(20);
    id
}

fn push_set<'a, T>(qb: &mut QueryBuilder<'a, Sqlite>, column: &str, value: T)
where
    T: 'a + Encode<'a, Sqlite> + Type<Sqlite> + Send,
{
    qb.push(", ").push(column).push(" = ").push_bind(value);
}

fn rows_into_items(rows: Vec<ItemRow>) -> Result<Vec<CatalogItem>, StoreError> {
    rows.into_iter().map(ItemRow::into_item).collect()
}

impl SqliteCatalogStore {
    pub fn new(pool: SqlitePool, collection: impl Into<String>) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            pool,
            collection: collection.into(),
            changes,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn notify(&self, event: ChangeEvent) {
        // No subscribers is fine
        let _ = self.changes.send(event);
    }

    async fn cursor_value(&self, field: SortField, id: &str) -> Result<CursorValue, StoreError> {
        let sql = format!(
            "SELECT {} FROM items WHERE collection = ? AND id = ?",
            field.column()
        );
        let value = if field.is_numeric() {
            let row: Option<(Option<i64>,)> = sqlx::query_as(&sql)
                .bind(&self.collection)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            row.and_then(|(v,)| v).map(CursorValue::Int)
        } else {
            let row: Option<(Option<String>,)> = sqlx::query_as(&sql)
                .bind(&self.collection)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            row.and_then(|(v,)| v).map(CursorValue::Text)
        };
        value.ok_or_else(|| StoreError::InvalidCursor(id.to_string()))
    }

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM items WHERE collection = ? AND id = ?")
                .bind(&self.collection)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl CatalogStore for SqliteCatalogStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn list(&self, query: &ItemQuery) -> Result<Vec<CatalogItem>, StoreError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM items WHERE collection = ",
            ITEM_COLUMNS
        ));
        qb.push_bind(self.collection.clone());

        if let Some(genre) = &query.genre {
            qb.push(" AND EXISTS (SELECT 1 FROM json_each(items.genre) WHERE json_each.value = ")
                .push_bind(genre.clone())
                .push(")");
        }

        if let Some(title) = &query.title_eq {
            qb.push(" AND title = ").push_bind(title.clone());
        }

        match query.order_by {
            Some((field, direction)) => {
                let column = field.column();
                let dir = match direction {
                    Direction::Asc => "ASC",
                    Direction::Desc => "DESC",
                };

                // Documents without the order field never appear in an ordered listing
                qb.push(format!(" AND {} IS NOT NULL", column));

                if let Some(after) = &query.start_after {
                    let op = match direction {
                        Direction::Asc => ">",
                        Direction::Desc => "<",
                    };
                    let value = self.cursor_value(field, after).await?;
                    qb.push(format!(" AND ({}, id) {} (", column, op));
                    match value {
                        CursorValue::Int(v) => qb.push_bind(v),
                        CursorValue::Text(v) => qb.push_bind(v),
                    };
                    qb.push(", ").push_bind(after.clone()).push(")");
                }

                qb.push(format!(" ORDER BY {} {}, id {}", column, dir, dir));
            }
            None => {
                if let Some(after) = &query.start_after {
                    if !self.exists(after).await? {
                        return Err(StoreError::InvalidCursor(after.clone()));
                    }
                    qb.push(" AND id > ").push_bind(after.clone());
                }
                qb.push(" ORDER BY id ASC");
            }
        }

        if let Some(limit) = query.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows: Vec<ItemRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows_into_items(rows)
    }

    async fn get(&self, id: &str) -> Result<Option<CatalogItem>, StoreError> {
        let row: Option<ItemRow> = sqlx::query_as(&format!(
            "SELECT {} FROM items WHERE collection = ? AND id = ?",
            ITEM_COLUMNS
        ))
        .bind(&self.collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ItemRow::into_item).transpose()
    }

    async fn create(&self, fields: &ItemFields, now: i64) -> Result<CatalogItem, StoreError> {
        let id = new_document_id();

        sqlx::query(
            r#"
            INSERT INTO items (
                collection, id, title, name, year, actors, genre, poster_link,
                landscape_poster_link, description, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&self.collection)
        .bind(&id)
        .bind(fields.title.as_deref())
        .bind(fields.name.as_deref())
        .bind(fields.year)
        .bind(encode_list(fields.actors.as_ref())?)
        .bind(encode_list(fields.genre.as_ref())?)
        .bind(fields.poster_link.as_deref())
        .bind(fields.landscape_poster_link.as_deref())
        .bind(fields.description.as_deref())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::debug!("Created document {}/{}", self.collection, id);
        self.notify(ChangeEvent::Created(id.clone()));

        self.get(&id)
            .await?
            .ok_or(StoreError::Database(sqlx::Error::RowNotFound))
    }

    async fn update(
        &self,
        id: &str,
        patch: &ItemFields,
        now: i64,
    ) -> Result<Option<CatalogItem>, StoreError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE items SET updated_at = ");
        qb.push_bind(now);

        if let Some(title) = &patch.title {
            push_set(&mut qb, "title", title.clone());
        }
        if let Some(name) = &patch.name {
            push_set(&mut qb, "name", name.clone());
        }
        if let Some(year) = patch.year {
            push_set(&mut qb, "year", year);
        }
        if let Some(actors) = encode_list(patch.actors.as_ref())? {
            push_set(&mut qb, "actors", actors);
        }
        if let Some(genre) = encode_list(patch.genre.as_ref())? {
            push_set(&mut qb, "genre", genre);
        }
        if let Some(poster) = &patch.poster_link {
            push_set(&mut qb, "poster_link", poster.clone());
        }
        if let Some(landscape) = &patch.landscape_poster_link {
            push_set(&mut qb, "landscape_poster_link", landscape.clone());
        }
        if let Some(description) = &patch.description {
            push_set(&mut qb, "description", description.clone());
        }

        qb.push(" WHERE collection = ")
            .push_bind(self.collection.clone())
            .push(" AND id = ")
            .push_bind(id.to_string());

        let result = qb.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.notify(ChangeEvent::Updated(id.to_string()));
        self.get(id).await
    }

    async fn mark_watched(&self, id: &str, now: i64) -> Result<Option<CatalogItem>, StoreError> {
        let result = sqlx::query(
            "UPDATE items SET last_watched_at = ?, updated_at = ? WHERE collection = ? AND id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(&self.collection)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.notify(ChangeEvent::Updated(id.to_string()));
        self.get(id).await
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM items WHERE collection = ? AND id = ?")
            .bind(&self.collection)
            .bind(id)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected() > 0;
        if removed {
            tracing::debug!("Deleted document {}/{}", self.collection, id);
            self.notify(ChangeEvent::Deleted(id.to_string()));
        }
        Ok(removed)
    }

    async fn random(&self, count: usize) -> Result<Vec<CatalogItem>, StoreError> {
        let rows: Vec<ItemRow> = sqlx::query_as(&format!(
            "SELECT {} FROM items WHERE collection = ? ORDER BY RANDOM() LIMIT ?",
            ITEM_COLUMNS
        ))
        .bind(&self.collection)
        .bind(count as i64)
        .fetch_all(&self.pool)
        .await?;

        rows_into_items(rows)
    }

    async fn write_batch(&self, records: &[ImportRecord]) -> Result<usize, StoreError> {
        if records.len() > MAX_BATCH_WRITES {
            return Err(StoreError::BatchTooLarge(records.len()));
        }

        let mut tx = self.pool.begin().await?;

        for record in records {
            let id = record.id.clone().unwrap_or_else(new_document_id);
            let fields = &record.fields;

            sqlx::query(
                r#"
                INSERT INTO items (
                    collection, id, title, name, year, actors, genre, poster_link,
                    landscape_poster_link, description, created_at, updated_at, last_watched_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    title = COALESCE(excluded.title, items.title),
                    name = COALESCE(excluded.name, items.name),
                    year = COALESCE(excluded.year, items.year),
                    actors = COALESCE(excluded.actors, items.actors),
                    genre = COALESCE(excluded.genre, items.genre),
                    poster_link = COALESCE(excluded.poster_link, items.poster_link),
                    landscape_poster_link = COALESCE(excluded.landscape_poster_link, items.landscape_poster_link),
                    description = COALESCE(excluded.description, items.description),
                    created_at = COALESCE(excluded.created_at, items.created_at),
                    updated_at = COALESCE(excluded.updated_at, items.updated_at),
                    last_watched_at = COALESCE(excluded.last_watched_at, items.last_watched_at)
                "#,
            )
            .bind(&self.collection)
            .bind(&id)
            .bind(fields.title.as_deref())
            .bind(fields.name.as_deref())
            .bind(fields.year)
            .bind(encode_list(fields.actors.as_ref())?)
            .bind(encode_list(fields.genre.as_ref())?)
            .bind(fields.poster_link.as_deref())
            .bind(fields.landscape_poster_link.as_deref())
            .bind(fields.description.as_deref())
            .bind(record.created_at)
            .bind(record.updated_at)
            .bind(record.last_watched_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.notify(ChangeEvent::Imported(records.len()));
        Ok(records.len())
    }

    async fn weekly_picks(&self) -> Result<Option<WeeklyPicksDoc>, StoreError> {
        let row: Option<WeeklyPicksRow> = sqlx::query_as(
            "SELECT picks, created_at, updated_at FROM weekly_picks WHERE collection = ?",
        )
        .bind(&self.collection)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(WeeklyPicksDoc {
                picks: serde_json::from_str(&row.picks)?,
                created_at: row.created_at,
                updated_at: row.updated_at,
            })),
            None => Ok(None),
        }
    }

    async fn save_weekly_picks(
        &self,
        picks: &[WeeklyPick],
        now: i64,
    ) -> Result<WeeklyPicksDoc, StoreError> {
        let encoded = serde_json::to_string(picks)?;

        sqlx::query(
            r#"
            INSERT INTO weekly_picks (collection, picks, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(collection) DO UPDATE SET
                picks = excluded.picks,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.collection)
        .bind(&encoded)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.weekly_picks()
            .await?
            .ok_or(StoreError::Database(sqlx::Error::RowNotFound))
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}
