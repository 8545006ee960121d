// Poster backfill: look up each record through `findMovie` and fill in
// poster links it is missing.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::client::CatalogClient;
use crate::models::{now_millis, CatalogItem, ItemFields};
use crate::store::{CatalogStore, ItemQuery};

pub const DEFAULT_DELAY_MS: u64 = 400;

/// Source of looked-up movie fields.
#[async_trait]
pub trait MovieLookup: Send + Sync {
    async fn find_movie(&self, title: &str, year: i32) -> Result<Option<ItemFields>>;
}

#[async_trait]
impl MovieLookup for CatalogClient {
    async fn find_movie(&self, title: &str, year: i32) -> Result<Option<ItemFields>> {
        Ok(CatalogClient::find_movie(self, title, Some(year)).await?)
    }
}

#[derive(Debug, Clone)]
pub struct BackfillOptions {
    pub limit: Option<usize>,
    /// Overwrite existing poster links
    pub force: bool,
    pub dry_run: bool,
    /// Pause after each lookup
    pub delay: Duration,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self {
            limit: None,
            force: false,
            dry_run: false,
            delay: Duration::from_millis(DEFAULT_DELAY_MS),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BackfillSummary {
    pub processed: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failures: usize,
}

/// Poster fields from `found` that should be written to `item`: only the
/// missing ones, or every one found when forced.
pub fn poster_patch(item: &CatalogItem, found: &ItemFields, force: bool) -> ItemFields {
    let wanted = |have: bool, value: &Option<String>| {
        value
            .as_ref()
            .filter(|v| !v.is_empty() && (force || !have))
            .cloned()
    };

    ItemFields {
        poster_link: wanted(item.has_poster(), &found.poster_link),
        landscape_poster_link: wanted(item.has_landscape_poster(), &found.landscape_poster_link),
        ..Default::default()
    }
}

/// Title and year to look up, or `None` when either is missing.
fn lookup_key(item: &CatalogItem) -> Option<(String, i32)> {
    let title = item
        .title
        .as_deref()
        .or(item.name.as_deref())
        .map(str::trim)
        .filter(|t| !t.is_empty())?;
    let year = item.year.filter(|y| *y != 0)?;
    Some((title.to_string(), year))
}

pub async fn run(
    store: &dyn CatalogStore,
    lookup: &dyn MovieLookup,
    options: &BackfillOptions,
) -> Result<BackfillSummary> {
    if options.dry_run {
        println!("Mode: DRY RUN (no writes)");
    }
    if options.force {
        println!("Mode: FORCE (overwrite existing poster links)");
    }

    let query = ItemQuery {
        limit: options.limit,
        ..Default::default()
    };
    let items = store.list(&query).await?;
    println!("Fetched {} documents", items.len());

    let mut summary = BackfillSummary::default();

    for item in &items {
        summary.processed += 1;

        let Some((title, year)) = lookup_key(item) else {
            summary.skipped += 1;
            println!("[skip] {}: missing title/year", item.id);
            continue;
        };
        if item.has_poster() && item.has_landscape_poster() && !options.force {
            summary.skipped += 1;
            println!("[skip] {}: already has both URLs", item.id);
            continue;
        }

        match lookup.find_movie(&title, year).await {
            Ok(Some(found)) => {
                let patch = poster_patch(item, &found, options.force);
                if patch.is_empty() {
                    summary.skipped += 1;
                    println!("[skip] {}: no new data", item.id);
                } else {
                    let written = if options.dry_run {
                        Ok(())
                    } else {
                        store
                            .update(&item.id, &patch, now_millis())
                            .await
                            .map(|_| ())
                    };
                    match written {
                        Ok(()) => {
                            summary.updated += 1;
                            let mut kinds = Vec::new();
                            if patch.poster_link.is_some() {
                                kinds.push("poster");
                            }
                            if patch.landscape_poster_link.is_some() {
                                kinds.push("landscape");
                            }
                            println!("[ok]   {}: {}", item.id, kinds.join(" "));
                        }
                        Err(e) => {
                            summary.failures += 1;
                            eprintln!("[fail] {}: {}", item.id, e);
                        }
                    }
                }
            }
            Ok(None) => {
                summary.failures += 1;
                eprintln!("[fail] {}: no match for '{}' ({})", item.id, title, year);
            }
            Err(e) => {
                summary.failures += 1;
                eprintln!("[fail] {}: {:#}", item.id, e);
            }
        }

        tokio::time::sleep(options.delay).await;
    }

    println!("\nDone");
    println!("Processed: {}", summary.processed);
    println!("Updated:   {}", summary.updated);
    println!("Skipped:   {}", summary.skipped);
    println!("Failures:  {}", summary.failures);

    Ok(summary)
}
