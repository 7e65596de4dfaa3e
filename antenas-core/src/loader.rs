//! Dataset loader with time-based expiry, stale fallback, and single-flight refresh.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::model::{Snapshot, assign_ids};
use crate::ports::{DatasetSource, SourceError, SourceMeta};

/// Default upper bound for a single dataset fetch. The payload is large.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy)]
/// Cache and fetch settings for a [`DatasetLoader`].
pub struct LoaderConfig {
    /// How long a snapshot stays fresh. `None` keeps it until the process exits.
    pub ttl: Option<Duration>,
    /// Upper bound for one fetch; hitting it counts as a fetch failure.
    pub fetch_timeout: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            ttl: None,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors surfaced by [`DatasetLoader::load`].
pub enum DatasetError {
    /// No snapshot has ever loaded and the latest fetch failed.
    #[error("Dataset unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Default)]
struct RefreshState {
    last_error: Option<String>,
}

/// Holds the current [`Snapshot`] and refreshes it from a [`DatasetSource`].
///
/// The snapshot is swapped as a whole behind an `Arc`, so readers always see
/// either the old or the new dataset. One mutex guards the
/// check-fetch-swap sequence; callers that queue behind an in-flight refresh
/// reuse its outcome instead of fetching again.
pub struct DatasetLoader {
    source: Arc<dyn DatasetSource>,
    config: LoaderConfig,
    current: RwLock<Option<Arc<Snapshot>>>,
    refresh: Mutex<RefreshState>,
    attempts: AtomicU64,
    // bumped by `invalidate`; the snapshot is fresh only once a fetch that
    // started after the latest bump has succeeded
    invalidated: AtomicU64,
    validated: AtomicU64,
}

impl DatasetLoader {
    /// Create a loader over the given source. Nothing is fetched until the first [`load`](Self::load).
    #[must_use]
    pub fn new(source: Arc<dyn DatasetSource>, config: LoaderConfig) -> Self {
        Self {
            source,
            config,
            current: RwLock::new(None),
            refresh: Mutex::new(RefreshState::default()),
            attempts: AtomicU64::new(0),
            invalidated: AtomicU64::new(0),
            validated: AtomicU64::new(0),
        }
    }

    /// Metadata of the underlying source.
    #[must_use]
    pub fn source(&self) -> &SourceMeta {
        self.source.describe()
    }

    /// Settings this loader was built with.
    #[must_use]
    pub fn config(&self) -> LoaderConfig {
        self.config
    }

    /// Return the current snapshot, fetching a new one if it is missing or expired.
    ///
    /// A failed fetch falls back to the previous snapshot when there is one.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::Unavailable`] when no snapshot has ever loaded and
    /// the fetch failed.
    pub async fn load(&self) -> Result<Arc<Snapshot>, DatasetError> {
        if let Some(snapshot) = self.fresh().await {
            return Ok(snapshot);
        }

        let observed = self.attempts.load(Ordering::Acquire);
        let mut state = self.refresh.lock().await;

        if self.attempts.load(Ordering::Acquire) != observed {
            debug!("Reusing outcome of concurrent dataset refresh");
            return self.settled(&state).await;
        }
        if let Some(snapshot) = self.fresh().await {
            return Ok(snapshot);
        }

        let generation = self.invalidated.load(Ordering::Acquire);
        let outcome = self.fetch().await;

        let result = match outcome {
            Ok(snapshot) => {
                *self.current.write().await = Some(Arc::clone(&snapshot));
                self.validated.store(generation, Ordering::Release);
                state.last_error = None;
                Ok(snapshot)
            }
            Err(err) => {
                state.last_error = Some(err.to_string());
                self.fallback(&err).await
            }
        };
        self.attempts.fetch_add(1, Ordering::AcqRel);

        result
    }

    /// Current snapshot without triggering a fetch, fresh or not.
    pub async fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.read().await.as_ref().map(Arc::clone)
    }

    /// Mark the current snapshot as expired so the next [`load`](Self::load) refetches.
    ///
    /// The snapshot itself is kept as the fallback for that fetch and stays
    /// expired until a fetch succeeds. An invalidation that lands while a fetch
    /// is in flight also applies to the snapshot that fetch produces.
    pub fn invalidate(&self) {
        self.invalidated.fetch_add(1, Ordering::AcqRel);
    }

    async fn fresh(&self) -> Option<Arc<Snapshot>> {
        if self.invalidated.load(Ordering::Acquire) != self.validated.load(Ordering::Acquire) {
            return None;
        }

        let current = self.current.read().await;
        let snapshot = current.as_ref()?;
        let is_fresh = self
            .config
            .ttl
            .is_none_or(|ttl| snapshot.loaded_at().elapsed() < ttl);

        is_fresh.then(|| Arc::clone(snapshot))
    }

    async fn settled(&self, state: &RefreshState) -> Result<Arc<Snapshot>, DatasetError> {
        match self.current().await {
            Some(snapshot) => Ok(snapshot),
            None => Err(DatasetError::Unavailable(
                state
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "dataset not loaded".to_owned()),
            )),
        }
    }

    async fn fallback(&self, err: &SourceError) -> Result<Arc<Snapshot>, DatasetError> {
        if let Some(stale) = self.current().await {
            warn!(
                error = %err,
                records = stale.len(),
                fetched_at = %stale.fetched_at(),
                "Dataset fetch failed, serving stale snapshot"
            );
            return Ok(stale);
        }

        error!(error = %err, "Dataset fetch failed and no snapshot is cached");
        Err(DatasetError::Unavailable(err.to_string()))
    }

    async fn fetch(&self) -> Result<Arc<Snapshot>, SourceError> {
        let meta = self.source.describe();
        info!(source = %meta.name, location = %meta.location, "Fetching tower dataset");

        let started = Instant::now();
        let limit = self.config.fetch_timeout;
        let records = timeout(limit, self.source.fetch())
            .await
            .map_err(|_elapsed| SourceError::Timeout(limit))??;

        let snapshot = Snapshot::new(assign_ids(records));
        info!(
            source = %meta.name,
            records = snapshot.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "Tower dataset loaded"
        );

        Ok(Arc::new(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    use async_trait::async_trait;
    use tokio::task::JoinSet;
    use tokio::time::sleep;

    use super::*;
    use crate::model::SourceRecord;

    struct FakeSource {
        meta: SourceMeta,
        records: Vec<SourceRecord>,
        delay: Duration,
        failing: AtomicBool,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn new(count: usize) -> Self {
            let records = (0..count)
                .map(|index| SourceRecord {
                    operator: Some(format!("op-{index}")),
                    ..SourceRecord::default()
                })
                .collect();
            Self {
                meta: SourceMeta::new("fake", "memory"),
                records,
                delay: Duration::ZERO,
                failing: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn fail(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DatasetSource for FakeSource {
        fn describe(&self) -> &SourceMeta {
            &self.meta
        }

        async fn fetch(&self) -> Result<Vec<SourceRecord>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(SourceError::Malformed("simulated outage".to_owned()));
            }
            Ok(self.records.clone())
        }
    }

    fn build_loader(source: &Arc<FakeSource>, ttl: Option<Duration>) -> DatasetLoader {
        let source = Arc::clone(source);
        DatasetLoader::new(
            source,
            LoaderConfig {
                ttl,
                ..LoaderConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn load_within_ttl_fetches_once() {
        let source = Arc::new(FakeSource::new(3));
        let loader = build_loader(&source, None);

        let first = loader.load().await.expect("first load");
        let second = loader.load().await.expect("second load");

        assert_eq!(source.calls(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), 3);
    }

    #[tokio::test]
    async fn synthesizes_sequential_ids() {
        let source = Arc::new(FakeSource::new(3));
        let loader = build_loader(&source, None);

        let snapshot = loader.load().await.expect("load");
        let ids: Vec<u64> = snapshot.records().iter().map(|record| record.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_cache_miss_coalesces_into_one_fetch() {
        let source = Arc::new(FakeSource::new(5).with_delay(Duration::from_millis(50)));
        let loader = Arc::new(build_loader(&source, None));

        let mut tasks = JoinSet::new();
        for _ in 0..16 {
            let loader = Arc::clone(&loader);
            tasks.spawn(async move { loader.load().await });
        }

        let mut snapshots = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            snapshots.push(joined.expect("task").expect("load"));
        }

        assert_eq!(source.calls(), 1);
        let first = snapshots.first().expect("at least one snapshot");
        assert!(snapshots.iter().all(|snapshot| Arc::ptr_eq(first, snapshot)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_failures_share_one_fetch() {
        let source = Arc::new(FakeSource::new(1).with_delay(Duration::from_millis(50)));
        source.fail(true);
        let loader = Arc::new(build_loader(&source, None));

        let mut tasks = JoinSet::new();
        for _ in 0..8 {
            let loader = Arc::clone(&loader);
            tasks.spawn(async move { loader.load().await });
        }

        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.expect("task");
            assert!(matches!(outcome, Err(DatasetError::Unavailable(_))));
        }
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn failure_after_success_serves_stale_snapshot() {
        let source = Arc::new(FakeSource::new(3));
        let loader = build_loader(&source, Some(Duration::ZERO));

        let first = loader.load().await.expect("first load");
        source.fail(true);
        let second = loader.load().await.expect("stale fallback");

        assert_eq!(source.calls(), 2);
        assert!(Arc::ptr_eq(&first, &second));
        let ids: Vec<u64> = second.records().iter().map(|record| record.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn failure_without_snapshot_is_unavailable() {
        let source = Arc::new(FakeSource::new(3));
        source.fail(true);
        let loader = build_loader(&source, None);

        let err = loader.load().await.expect_err("no snapshot to fall back on");
        assert!(err.to_string().contains("simulated outage"));
        assert!(loader.current().await.is_none());
    }

    #[tokio::test]
    async fn recovers_after_failed_first_fetch() {
        let source = Arc::new(FakeSource::new(2));
        source.fail(true);
        let loader = build_loader(&source, None);

        assert!(loader.load().await.is_err());
        source.fail(false);
        let snapshot = loader.load().await.expect("second attempt");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn expired_snapshot_is_replaced() {
        let source = Arc::new(FakeSource::new(1));
        let loader = build_loader(&source, Some(Duration::ZERO));

        let first = loader.load().await.expect("first load");
        let second = loader.load().await.expect("second load");

        assert_eq!(source.calls(), 2);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let source = Arc::new(FakeSource::new(1));
        let loader = build_loader(&source, None);

        loader.load().await.expect("first load");
        loader.invalidate();
        loader.load().await.expect("reload");
        loader.load().await.expect("cached");

        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn invalidate_then_failure_retries_next_load() {
        let source = Arc::new(FakeSource::new(2));
        let loader = build_loader(&source, None);

        let first = loader.load().await.expect("first load");
        loader.invalidate();
        source.fail(true);
        let stale = loader.load().await.expect("stale fallback");
        assert!(Arc::ptr_eq(&first, &stale));

        source.fail(false);
        let refreshed = loader.load().await.expect("retry after recovery");
        assert_eq!(source.calls(), 3);
        assert!(!Arc::ptr_eq(&first, &refreshed));

        loader.load().await.expect("cached");
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn invalidate_during_fetch_is_not_lost() {
        let source = Arc::new(FakeSource::new(1).with_delay(Duration::from_millis(100)));
        let loader = Arc::new(build_loader(&source, None));

        let pending = {
            let loader = Arc::clone(&loader);
            tokio::spawn(async move { loader.load().await })
        };
        sleep(Duration::from_millis(20)).await;
        assert_eq!(source.calls(), 1);
        loader.invalidate();
        pending.await.expect("task").expect("first load");

        loader.load().await.expect("reload");
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn slow_fetch_times_out() {
        let source = Arc::new(FakeSource::new(1).with_delay(Duration::from_millis(500)));
        let source_dyn = Arc::clone(&source);
        let loader = DatasetLoader::new(
            source_dyn,
            LoaderConfig {
                ttl: None,
                fetch_timeout: Duration::from_millis(20),
            },
        );

        let err = loader.load().await.expect_err("timeout");
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn empty_dataset_is_a_valid_snapshot() {
        let source = Arc::new(FakeSource::new(0));
        let loader = build_loader(&source, None);

        let snapshot = loader.load().await.expect("empty load");
        assert!(snapshot.is_empty());
    }
}
