// Background loader that walks every page of a listing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::browse::{PageRequest, PageSource};
use super::ClientResult;
use crate::models::CatalogItem;

/// Clears the in-flight flag when the loop exits, however it exits.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Fetches pages one after another until a short page comes back,
/// appending each page to a shared list as it arrives.
pub struct EagerLoader<S> {
    source: Arc<S>,
    request: PageRequest,
    items: Arc<RwLock<Vec<CatalogItem>>>,
    in_flight: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl<S: PageSource + 'static> EagerLoader<S> {
    /// `request` supplies filter, order and page size; its cursor is ignored.
    pub fn new(source: Arc<S>, request: PageRequest) -> Self {
        Self {
            source,
            request,
            items: Arc::new(RwLock::new(Vec::new())),
            in_flight: Arc::new(AtomicBool::new(false)),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Everything loaded so far.
    pub async fn items(&self) -> Vec<CatalogItem> {
        self.items.read().await.clone()
    }

    /// Stop the running loop at its next await point. Cancellation is
    /// permanent; later `start` calls finish immediately.
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    /// Start loading from the first page. Returns `None` while a previous
    /// loop is still running; the handle resolves to the number of items
    /// loaded.
    pub fn start(&self) -> Option<JoinHandle<ClientResult<usize>>> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Eager load already running");
            return None;
        }

        let guard = InFlight(self.in_flight.clone());
        let source = self.source.clone();
        let items = self.items.clone();
        let shutdown = self.shutdown.clone();
        let mut request = self.request.clone();
        request.start_after = None;

        Some(tokio::spawn(async move {
            let _guard = guard;
            items.write().await.clear();
            let mut total = 0;

            loop {
                let page = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        tracing::debug!("Eager load cancelled after {} items", total);
                        break;
                    }
                    page = source.fetch_page(&request) => page?,
                };

                let short = page.len() < request.limit;
                request.start_after = page.last().map(|item| item.id.clone());
                total += page.len();
                items.write().await.extend(page);

                if short || request.start_after.is_none() {
                    break;
                }
            }

            tracing::debug!("Eager load finished with {} items", total);
            Ok(total)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct CountingSource {
        total: usize,
        calls: AtomicUsize,
        /// When set, every fetch waits for a notification first
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl PageSource for CountingSource {
        async fn fetch_page(&self, request: &PageRequest) -> ClientResult<Vec<CatalogItem>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if request.sort == "broken" {
                return Err(ClientError::Stream("boom".to_string()));
            }

            let start = request
                .start_after
                .as_deref()
                .map(|id| id.parse::<usize>().unwrap() + 1)
                .unwrap_or(0);
            let end = (start + request.limit).min(self.total);
            Ok((start..end)
                .map(|i| serde_json::from_value(serde_json::json!({"id": i.to_string()})).unwrap())
                .collect())
        }
    }

    fn request(limit: usize) -> PageRequest {
        PageRequest {
            genre: None,
            sort: "title".to_string(),
            dir: "asc".to_string(),
            limit,
            start_after: None,
        }
    }

    fn source(total: usize, gate: Option<Arc<Notify>>) -> Arc<CountingSource> {
        Arc::new(CountingSource {
            total,
            calls: AtomicUsize::new(0),
            gate,
        })
    }

    #[tokio::test]
    async fn test_loads_until_short_page() {
        let source = source(25, None);
        let loader = EagerLoader::new(source.clone(), request(10));

        let loaded = loader.start().unwrap().await.unwrap().unwrap();
        assert_eq!(loaded, 25);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);

        let items = loader.items().await;
        assert_eq!(items.first().unwrap().id, "0");
        assert_eq!(items.last().unwrap().id, "24");
        assert!(!loader.is_loading());
    }

    #[tokio::test]
    async fn test_exact_multiple_stops_on_empty_page() {
        let source = source(20, None);
        let loader = EagerLoader::new(source.clone(), request(10));

        assert_eq!(loader.start().unwrap().await.unwrap().unwrap(), 20);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_guard_prevents_overlap_and_cancel_stops() {
        let gate = Arc::new(Notify::new());
        let source = source(100, Some(gate.clone()));
        let loader = EagerLoader::new(source.clone(), request(10));

        let handle = loader.start().unwrap();
        assert!(loader.is_loading());
        assert!(loader.start().is_none());

        // Let the first page through, then cancel while the second waits
        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;
        loader.cancel();

        let loaded = handle.await.unwrap().unwrap();
        assert_eq!(loaded, 10);
        assert!(!loader.is_loading());
        assert_eq!(loader.items().await.len(), 10);
    }

    #[tokio::test]
    async fn test_error_releases_guard() {
        let mut broken = request(10);
        broken.sort = "broken".to_string();
        let loader = EagerLoader::new(source(5, None), broken);

        assert!(loader.start().unwrap().await.unwrap().is_err());
        assert!(!loader.is_loading());
    }
}
