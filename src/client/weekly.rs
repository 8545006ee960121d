// Weekly movie-night planner: seven days, one random movie each, with no
// movie repeated within a spin.

use async_trait::async_trait;
use chrono::{Days, Local, NaiveDate};
use std::collections::HashSet;
use thiserror::Error;

use super::{CatalogClient, ClientError, ClientResult};
use crate::models::{CatalogItem, WeeklyPick, WeeklyPicksDoc, WEEK_DAYS};

/// Upper bound on `randomItems` calls for one spin
const MAX_REQUESTS_PER_SPIN: usize = 10;

#[derive(Debug, Error)]
pub enum PickError {
    #[error("not enough unique movies")]
    NotEnoughMovies,
    #[error("pick movies for each day before saving")]
    Incomplete,
    #[error("no day {0} in the schedule")]
    NoSuchDay(usize),
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// The API calls the planner needs.
#[async_trait]
pub trait PicksBackend: Send + Sync {
    async fn random_items(&self, count: usize) -> ClientResult<Vec<CatalogItem>>;
    async fn weekly_picks(&self) -> ClientResult<Option<WeeklyPicksDoc>>;
    async fn save_weekly_picks(&self, picks: &[WeeklyPick]) -> ClientResult<WeeklyPicksDoc>;
}

#[async_trait]
impl PicksBackend for CatalogClient {
    async fn random_items(&self, count: usize) -> ClientResult<Vec<CatalogItem>> {
        CatalogClient::random_items(self, count).await
    }

    async fn weekly_picks(&self) -> ClientResult<Option<WeeklyPicksDoc>> {
        CatalogClient::weekly_picks(self).await
    }

    async fn save_weekly_picks(&self, picks: &[WeeklyPick]) -> ClientResult<WeeklyPicksDoc> {
        CatalogClient::save_weekly_picks(self, picks).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DaySlot {
    pub date: NaiveDate,
    /// e.g. `Monday, Oct 19`
    pub label: String,
    pub movie: Option<CatalogItem>,
}

impl DaySlot {
    fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            label: date.format("%A, %b %-d").to_string(),
            movie: None,
        }
    }
}

/// Seven empty days starting at `start`.
pub fn empty_schedule(start: NaiveDate) -> Vec<DaySlot> {
    (0..WEEK_DAYS as u64)
        .map(|offset| DaySlot::empty(start + Days::new(offset)))
        .collect()
}

/// Rebuild a schedule from saved picks, ordered by date. Entries whose date
/// does not parse take the date of the same position in a fresh schedule.
pub fn schedule_from_saved(picks: &[WeeklyPick], start: NaiveDate) -> Vec<DaySlot> {
    let fallback = empty_schedule(start);
    let mut sorted: Vec<&WeeklyPick> = picks.iter().collect();
    sorted.sort_by(|a, b| a.date.cmp(&b.date));

    sorted
        .into_iter()
        .enumerate()
        .map(|(index, pick)| {
            let date = NaiveDate::parse_from_str(&pick.date, "%Y-%m-%d").unwrap_or_else(|_| {
                fallback
                    .get(index)
                    .or(fallback.last())
                    .map(|slot| slot.date)
                    .unwrap_or(start)
            });
            DaySlot {
                movie: Some(pick.movie.clone()),
                ..DaySlot::empty(date)
            }
        })
        .collect()
}

pub struct WeeklyPicker<B> {
    backend: B,
    start: NaiveDate,
    schedule: Vec<DaySlot>,
    /// Every movie id handed out this session
    seen: HashSet<String>,
    last_saved: Option<WeeklyPicksDoc>,
    unsaved: bool,
}

impl<B: PicksBackend> WeeklyPicker<B> {
    /// Planner for the week starting today.
    pub fn new(backend: B) -> Self {
        Self::starting(backend, Local::now().date_naive())
    }

    pub fn starting(backend: B, start: NaiveDate) -> Self {
        Self {
            backend,
            start,
            schedule: empty_schedule(start),
            seen: HashSet::new(),
            last_saved: None,
            unsaved: false,
        }
    }

    pub fn schedule(&self) -> &[DaySlot] {
        &self.schedule
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.unsaved
    }

    pub fn last_saved(&self) -> Option<&WeeklyPicksDoc> {
        self.last_saved.as_ref()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Load the saved schedule, or start from an empty week when there is
    /// none. A failed load also leaves an empty week behind.
    pub async fn load(&mut self) -> Result<(), PickError> {
        let saved = match self.backend.weekly_picks().await {
            Ok(saved) => saved,
            Err(e) => {
                self.schedule = empty_schedule(self.start);
                self.unsaved = false;
                return Err(e.into());
            }
        };

        self.schedule = match &saved {
            Some(doc) if !doc.picks.is_empty() => schedule_from_saved(&doc.picks, self.start),
            _ => empty_schedule(self.start),
        };
        for slot in &self.schedule {
            if let Some(movie) = &slot.movie {
                self.seen.insert(movie.id.clone());
            }
        }
        self.last_saved = saved;
        self.unsaved = false;
        Ok(())
    }

    /// Fill every day with a different movie.
    pub async fn spin_all(&mut self) -> Result<(), PickError> {
        let mut chosen: Vec<CatalogItem> = Vec::with_capacity(WEEK_DAYS);
        let mut ids = HashSet::new();

        for _ in 0..MAX_REQUESTS_PER_SPIN {
            let needed = WEEK_DAYS - chosen.len();
            for movie in self.backend.random_items(needed).await? {
                if chosen.len() < WEEK_DAYS && ids.insert(movie.id.clone()) {
                    chosen.push(movie);
                }
            }
            if chosen.len() == WEEK_DAYS {
                break;
            }
        }
        if chosen.len() < WEEK_DAYS {
            return Err(PickError::NotEnoughMovies);
        }

        self.seen.extend(ids);
        self.schedule = empty_schedule(self.start)
            .into_iter()
            .zip(chosen)
            .map(|(slot, movie)| DaySlot {
                movie: Some(movie),
                ..slot
            })
            .collect();
        self.unsaved = true;
        Ok(())
    }

    /// Replace one day's movie with one not seen this session and not
    /// scheduled on another day.
    pub async fn spin_day(&mut self, index: usize) -> Result<(), PickError> {
        if index >= self.schedule.len() {
            return Err(PickError::NoSuchDay(index));
        }

        let scheduled: HashSet<&str> = self
            .schedule
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .filter_map(|(_, slot)| slot.movie.as_ref().map(|m| m.id.as_str()))
            .collect();

        let mut replacement = None;
        for _ in 0..MAX_REQUESTS_PER_SPIN {
            replacement = self
                .backend
                .random_items(1)
                .await?
                .into_iter()
                .find(|m| !self.seen.contains(&m.id) && !scheduled.contains(m.id.as_str()));
            if replacement.is_some() {
                break;
            }
        }
        let movie = replacement.ok_or(PickError::NotEnoughMovies)?;

        tracing::debug!("Day {} now shows {}", index, movie.display_title());
        self.seen.insert(movie.id.clone());
        self.schedule[index].movie = Some(movie);
        self.unsaved = true;
        Ok(())
    }

    /// The schedule as saveable picks; every day must have a movie.
    pub fn to_picks(&self) -> Result<Vec<WeeklyPick>, PickError> {
        self.schedule
            .iter()
            .map(|slot| {
                let movie = slot.movie.clone().ok_or(PickError::Incomplete)?;
                Ok(WeeklyPick {
                    date: slot.date.format("%Y-%m-%d").to_string(),
                    movie,
                })
            })
            .collect()
    }

    pub async fn save(&mut self) -> Result<&WeeklyPicksDoc, PickError> {
        let picks = self.to_picks()?;
        let saved = self.backend.save_weekly_picks(&picks).await?;

        self.schedule = schedule_from_saved(&saved.picks, self.start);
        self.unsaved = false;
        Ok(self.last_saved.insert(saved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Answers `randomItems` from a queue of canned responses and records
    /// the requested counts.
    #[derive(Default)]
    struct ScriptedBackend {
        responses: Mutex<VecDeque<Vec<CatalogItem>>>,
        counts: Mutex<Vec<usize>>,
        saved: Mutex<Option<WeeklyPicksDoc>>,
        offline: std::sync::atomic::AtomicBool,
    }

    impl ScriptedBackend {
        fn with(responses: Vec<Vec<CatalogItem>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                ..Default::default()
            }
        }

        fn counts(&self) -> Vec<usize> {
            self.counts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PicksBackend for ScriptedBackend {
        async fn random_items(&self, count: usize) -> ClientResult<Vec<CatalogItem>> {
            self.counts.lock().unwrap().push(count);
            Ok(self.responses.lock().unwrap().pop_front().unwrap_or_default())
        }

        async fn weekly_picks(&self) -> ClientResult<Option<WeeklyPicksDoc>> {
            if self.offline.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(ClientError::Http {
                    status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                    message: "unavailable".to_string(),
                });
            }
            Ok(self.saved.lock().unwrap().clone())
        }

        async fn save_weekly_picks(&self, picks: &[WeeklyPick]) -> ClientResult<WeeklyPicksDoc> {
            let doc = WeeklyPicksDoc {
                picks: picks.to_vec(),
                created_at: 1,
                updated_at: 1,
            };
            *self.saved.lock().unwrap() = Some(doc.clone());
            Ok(doc)
        }
    }

    fn movie(id: &str, title: &str) -> CatalogItem {
        serde_json::from_value(serde_json::json!({"id": id, "title": title})).unwrap()
    }

    fn movies(ids: &str) -> Vec<CatalogItem> {
        ids.chars()
            .map(|c| movie(&c.to_string(), &format!("Movie {}", c.to_ascii_uppercase())))
            .collect()
    }

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn titles(picker: &WeeklyPicker<ScriptedBackend>) -> Vec<String> {
        picker
            .schedule()
            .iter()
            .map(|slot| slot.movie.as_ref().unwrap().display_title().to_string())
            .collect()
    }

    #[test]
    fn test_empty_schedule_labels() {
        let schedule = empty_schedule(start());
        assert_eq!(schedule.len(), 7);
        assert_eq!(schedule[0].label, "Monday, Oct 19");
        assert_eq!(schedule[6].date, NaiveDate::from_ymd_opt(2026, 10, 25).unwrap());
        assert!(schedule.iter().all(|slot| slot.movie.is_none()));
    }

    #[test]
    fn test_schedule_from_saved_sorts_and_repairs_dates() {
        let picks = vec![
            WeeklyPick {
                date: "2026-10-21".to_string(),
                movie: movie("c", "C"),
            },
            WeeklyPick {
                date: "2026-10-20".to_string(),
                movie: movie("b", "B"),
            },
            WeeklyPick {
                date: "".to_string(),
                movie: movie("a", "A"),
            },
        ];
        let schedule = schedule_from_saved(&picks, start());

        // The blank date sorts first and takes the first fallback day
        assert_eq!(schedule[0].date, start());
        assert_eq!(schedule[0].movie.as_ref().unwrap().id, "a");
        assert_eq!(schedule[1].label, "Tuesday, Oct 20");
        assert_eq!(schedule[2].movie.as_ref().unwrap().id, "c");
    }

    #[tokio::test]
    async fn test_spin_all_skips_duplicates() {
        let mut duplicates = movies("aabcbc");
        duplicates[1].title = Some("Movie A duplicate".to_string());
        let backend = ScriptedBackend::with(vec![duplicates, movies("ade"), movies("fg")]);
        let mut picker = WeeklyPicker::starting(backend, start());

        picker.spin_all().await.unwrap();

        assert_eq!(picker.backend().counts(), vec![7, 4, 2]);
        assert_eq!(
            titles(&picker),
            vec!["Movie A", "Movie B", "Movie C", "Movie D", "Movie E", "Movie F", "Movie G"]
        );
        assert!(picker.has_unsaved_changes());
    }

    #[tokio::test]
    async fn test_spin_day_avoids_seen_movies() {
        let backend = ScriptedBackend::with(vec![
            movies("abcdefg"),
            vec![movie("a", "Movie A repeat")],
            movies("h"),
        ]);
        let mut picker = WeeklyPicker::starting(backend, start());

        picker.spin_all().await.unwrap();
        picker.spin_day(0).await.unwrap();

        assert_eq!(picker.backend().counts(), vec![7, 1, 1]);
        assert_eq!(titles(&picker)[0], "Movie H");
        assert!(!titles(&picker).contains(&"Movie A".to_string()));
    }

    #[tokio::test]
    async fn test_spin_gives_up_after_request_limit() {
        let mut picker = WeeklyPicker::starting(ScriptedBackend::with(vec![movies("abc")]), start());

        let err = picker.spin_all().await.unwrap_err();
        assert!(matches!(err, PickError::NotEnoughMovies));
        assert_eq!(err.to_string(), "not enough unique movies");
        assert_eq!(picker.backend().counts().len(), MAX_REQUESTS_PER_SPIN);
        assert!(picker.schedule().iter().all(|slot| slot.movie.is_none()));

        assert!(matches!(
            picker.spin_day(7).await,
            Err(PickError::NoSuchDay(7))
        ));
    }

    #[tokio::test]
    async fn test_save_requires_full_week_and_reloads() {
        let mut picker =
            WeeklyPicker::starting(ScriptedBackend::with(vec![movies("abcdefg")]), start());
        assert!(matches!(picker.save().await, Err(PickError::Incomplete)));

        picker.spin_all().await.unwrap();
        let saved = picker.save().await.unwrap();
        assert_eq!(saved.picks[0].date, "2026-10-19");
        assert_eq!(saved.picks.len(), 7);
        assert!(!picker.has_unsaved_changes());

        let backend = ScriptedBackend::default();
        *backend.saved.lock().unwrap() = picker.last_saved().cloned();
        let mut reloaded = WeeklyPicker::starting(backend, start());
        reloaded.load().await.unwrap();
        assert_eq!(reloaded.schedule(), picker.schedule());
    }

    #[tokio::test]
    async fn test_failed_load_falls_back_to_empty_week() {
        let mut picker =
            WeeklyPicker::starting(ScriptedBackend::with(vec![movies("abcdefg")]), start());
        picker.spin_all().await.unwrap();
        assert!(picker.schedule().iter().all(|slot| slot.movie.is_some()));

        picker
            .backend()
            .offline
            .store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(matches!(picker.load().await, Err(PickError::Client(_))));
        assert_eq!(picker.schedule().len(), 7);
        assert!(picker.schedule().iter().all(|slot| slot.movie.is_none()));
        assert!(!picker.has_unsaved_changes());
    }
}
