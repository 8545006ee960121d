use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

/// Open the catalog database with the pool settings the server uses.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let connect_options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("Invalid database URL: {}", database_url))?
        .create_if_missing(true)
        // Enable WAL mode for better concurrent performance
        .journal_mode(SqliteJournalMode::Wal)
        // NORMAL sync is safe with WAL and much faster
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .test_before_acquire(true)
        .connect_with(connect_options)
        .await
        .context("Failed to open catalog database")?;

    tracing::info!("SQLite configured: WAL mode, busy timeout 5s");

    migrate(&pool).await?;
    Ok(pool)
}

/// An in-memory database holding a single connection, so every query sees the same data.
pub async fn memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    migrate(&pool).await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        -- Movie documents. Several collections can share one database.
        -- actors/genre hold JSON arrays; NULL means the field was never written.
        CREATE TABLE IF NOT EXISTS items (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            title TEXT,
            name TEXT,
            year INTEGER,
            actors TEXT,
            genre TEXT,
            poster_link TEXT,
            landscape_poster_link TEXT,
            description TEXT,
            created_at INTEGER,
            updated_at INTEGER,
            last_watched_at INTEGER,
            PRIMARY KEY (collection, id)
        );

        -- Singleton weekly-picks document per collection
        CREATE TABLE IF NOT EXISTS weekly_picks (
            collection TEXT PRIMARY KEY,
            picks TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create catalog tables")?;

    create_indexes(pool).await?;

    Ok(())
}

/// Create the indexes backing the browse orderings
async fn create_indexes(pool: &SqlitePool) -> Result<()> {
    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_items_title ON items(collection, title, id)",
        "CREATE INDEX IF NOT EXISTS idx_items_name ON items(collection, name, id)",
        "CREATE INDEX IF NOT EXISTS idx_items_year ON items(collection, year, id)",
        "CREATE INDEX IF NOT EXISTS idx_items_created ON items(collection, created_at, id)",
        "CREATE INDEX IF NOT EXISTS idx_items_updated ON items(collection, updated_at, id)",
    ];

    for index_sql in indexes {
        if let Err(e) = sqlx::query(index_sql).execute(pool).await {
            tracing::warn!("Failed to create index: {} - {}", index_sql, e);
        }
    }

    tracing::debug!("Database indexes created/verified");

    Ok(())
}
