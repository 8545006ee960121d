// Delete movie records by id or by title and year.

use anyhow::Result;

use crate::models::CatalogItem;
use crate::store::{CatalogStore, ItemQuery};

#[derive(Debug, Clone, PartialEq)]
pub enum DeleteTarget {
    Id(String),
    /// Exact title; the year is compared after the query
    TitleYear { title: String, year: i32 },
}

impl DeleteTarget {
    /// `--id` wins; otherwise both `--title` and `--year` are needed.
    pub fn from_args(id: Option<String>, title: Option<String>, year: Option<i32>) -> Option<Self> {
        match (id, title, year) {
            (Some(id), _, _) if !id.trim().is_empty() => Some(DeleteTarget::Id(id)),
            (_, Some(title), Some(year)) if !title.is_empty() => {
                Some(DeleteTarget::TitleYear { title, year })
            }
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum DeleteOutcome {
    NothingFound,
    /// Dry run: these would have been deleted
    Previewed(Vec<CatalogItem>),
    Deleted(Vec<CatalogItem>),
}

pub async fn find_targets(
    store: &dyn CatalogStore,
    target: &DeleteTarget,
) -> Result<Vec<CatalogItem>> {
    match target {
        DeleteTarget::Id(id) => Ok(store.get(id).await?.into_iter().collect()),
        DeleteTarget::TitleYear { title, year } => {
            let query = ItemQuery {
                title_eq: Some(title.clone()),
                ..Default::default()
            };
            let matches = store.list(&query).await?;
            Ok(matches
                .into_iter()
                .filter(|item| item.year == Some(*year))
                .collect())
        }
    }
}

pub async fn run(
    store: &dyn CatalogStore,
    target: &DeleteTarget,
    dry_run: bool,
) -> Result<DeleteOutcome> {
    if dry_run {
        println!("Mode: DRY RUN (no writes)");
    }

    let targets = find_targets(store, target).await?;
    if targets.is_empty() {
        match target {
            DeleteTarget::Id(id) => eprintln!("No document found with id: {}", id),
            DeleteTarget::TitleYear { title, year } => {
                eprintln!("No documents found for title='{}' and year={}", title, year)
            }
        }
        return Ok(DeleteOutcome::NothingFound);
    }

    println!("Found {} document(s) to delete:", targets.len());
    for item in &targets {
        let year = item
            .year
            .map(|y| y.to_string())
            .unwrap_or_else(|| "?".to_string());
        println!(" - {}: {} ({})", item.id, item.display_title(), year);
    }

    if dry_run {
        return Ok(DeleteOutcome::Previewed(targets));
    }

    for item in &targets {
        store.delete(&item.id).await?;
        println!("[deleted] {}", item.id);
    }
    tracing::info!("Deleted {} document(s)", targets.len());

    Ok(DeleteOutcome::Deleted(targets))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemFields;
    use crate::test_support::memory_store;

    fn movie(title: &str, year: i32) -> ItemFields {
        ItemFields {
            title: Some(title.to_string()),
            year: Some(year),
            ..Default::default()
        }
    }

    #[test]
    fn test_target_from_args() {
        assert_eq!(
            DeleteTarget::from_args(Some("abc".into()), Some("T".into()), None),
            Some(DeleteTarget::Id("abc".into()))
        );
        assert_eq!(
            DeleteTarget::from_args(None, Some("Alien".into()), Some(1979)),
            Some(DeleteTarget::TitleYear {
                title: "Alien".into(),
                year: 1979
            })
        );
        assert_eq!(DeleteTarget::from_args(None, Some("Alien".into()), None), None);
        assert_eq!(DeleteTarget::from_args(None, None, None), None);
    }

    #[tokio::test]
    async fn test_title_year_matches_filter_year() {
        let store = memory_store().await;
        let keep = store.create(&movie("Alien", 1979), 1).await.unwrap();
        let remake = store.create(&movie("Alien", 2030), 2).await.unwrap();
        store.create(&movie("Aliens", 1986), 3).await.unwrap();

        let target = DeleteTarget::TitleYear {
            title: "Alien".into(),
            year: 2030,
        };

        let outcome = run(store.as_ref(), &target, true).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Previewed(vec![remake.clone()]));
        assert!(store.get(&remake.id).await.unwrap().is_some());

        let outcome = run(store.as_ref(), &target, false).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Deleted(vec![remake.clone()]));
        assert!(store.get(&remake.id).await.unwrap().is_none());
        assert!(store.get(&keep.id).await.unwrap().is_some());

        assert_eq!(
            run(store.as_ref(), &target, false).await.unwrap(),
            DeleteOutcome::NothingFound
        );
    }

    #[tokio::test]
    async fn test_delete_by_id() {
        let store = memory_store().await;
        let item = store.create(&movie("Heat", 1995), 1).await.unwrap();

        let outcome = run(store.as_ref(), &DeleteTarget::Id(item.id.clone()), false)
            .await
            .unwrap();
        assert!(matches!(outcome, DeleteOutcome::Deleted(ref items) if items.len() == 1));

        let outcome = run(store.as_ref(), &DeleteTarget::Id(item.id), false)
            .await
            .unwrap();
        assert_eq!(outcome, DeleteOutcome::NothingFound);
    }
}
