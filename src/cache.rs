//! Per-student cache of the raw projection and its derived views.
//!
//! One [`CacheEntry`] is active at a time. Everything in it belongs to
//! `entry.student_id`; reads for any other id see nothing, and a successful
//! load for a new id replaces the entry wholesale. Each [`Category`] carries
//! its own loading flag and error message.

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::CacheError;
use crate::fetch::RawDataFetcher;
use crate::habits;
use crate::models::{Category, ErrorFlags, LoadingFlags, StudentOverview, StudyHabits};
use crate::persist::{Artifact, KeyValueStore, PersistenceBridge};
use crate::projector;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Default)]
pub struct CacheEntry {
    /// Result rows as handed to the projectors: a one-element array holding
    /// the fetched `studentData`.
    pub raw_data: Option<Arc<Value>>,
    pub performance_data: Option<Arc<StudentOverview>>,
    pub study_habits_data: Option<Arc<StudyHabits>>,
    pub ai_insights: Option<Arc<Value>>,
    pub course_roadmap: Option<Arc<Value>>,
    pub student_id: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn artifact(&self, artifact: Artifact) -> Option<Arc<Value>> {
        match artifact {
            Artifact::AiInsights => self.ai_insights.clone(),
            Artifact::CourseRoadmap => self.course_roadmap.clone(),
        }
    }

    pub fn set_artifact(&mut self, artifact: Artifact, value: Option<Arc<Value>>) {
        match artifact {
            Artifact::AiInsights => self.ai_insights = value,
            Artifact::CourseRoadmap => self.course_roadmap = value,
        }
    }

    /// Drops every view but keeps the owning student id.
    fn clear_views(&mut self) {
        *self = Self {
            student_id: self.student_id.take(),
            ..Self::default()
        };
    }
}

/// A view derived from raw data and cached under its own category.
pub trait DerivedView: Send + Sync + Sized + 'static {
    const CATEGORY: Category;

    fn cached(entry: &CacheEntry) -> Option<Arc<Self>>;

    fn store(entry: &mut CacheEntry, view: Arc<Self>);
}

impl DerivedView for StudentOverview {
    const CATEGORY: Category = Category::PerformanceData;

    fn cached(entry: &CacheEntry) -> Option<Arc<Self>> {
        entry.performance_data.clone()
    }

    fn store(entry: &mut CacheEntry, view: Arc<Self>) {
        entry.performance_data = Some(view);
    }
}

impl DerivedView for StudyHabits {
    const CATEGORY: Category = Category::StudyHabitsData;

    fn cached(entry: &CacheEntry) -> Option<Arc<Self>> {
        entry.study_habits_data.clone()
    }

    fn store(entry: &mut CacheEntry, view: Arc<Self>) {
        entry.study_habits_data = Some(view);
    }
}

/// Point-in-time copy of the cache, including per-category flags.
#[derive(Debug, Clone, Default)]
pub struct CacheState {
    pub entry: CacheEntry,
    pub loading: LoadingFlags,
    pub errors: ErrorFlags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Loading,
    Ready,
    Failed(String),
    Cleared,
}

/// Change notification for observers such as a UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub student_id: Option<String>,
    pub category: Category,
    pub kind: EventKind,
}

impl CacheEvent {
    pub fn new(student_id: &str, category: Category, kind: EventKind) -> Self {
        Self {
            student_id: Some(student_id.to_string()),
            category,
            kind,
        }
    }
}

pub struct CacheService {
    fetcher: Arc<dyn RawDataFetcher>,
    pub(crate) bridge: PersistenceBridge,
    pub(crate) state: Mutex<CacheState>,
    /// Serializes raw loads so concurrent misses issue a single fetch.
    load_gate: tokio::sync::Mutex<()>,
    events: broadcast::Sender<CacheEvent>,
}

/// Clears a category's loading flag when the operation ends, however it ends.
struct LoadingGuard<'a> {
    state: &'a Mutex<CacheState>,
    category: Category,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.state.lock().loading.set(self.category, false);
    }
}

impl CacheService {
    pub fn new(fetcher: Arc<dyn RawDataFetcher>, store: Arc<dyn KeyValueStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            fetcher,
            bridge: PersistenceBridge::new(store),
            state: Mutex::new(CacheState::default()),
            load_gate: tokio::sync::Mutex::new(()),
            events,
        }
    }

    /// Builds the service and restores persisted artifacts.
    pub async fn open(fetcher: Arc<dyn RawDataFetcher>, store: Arc<dyn KeyValueStore>) -> Self {
        let service = Self::new(fetcher, store);
        service.restore_artifacts().await;
        service
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> CacheState {
        self.state.lock().clone()
    }

    pub fn is_loading(&self, category: Category) -> bool {
        *self.state.lock().loading.get(category)
    }

    pub fn error(&self, category: Category) -> Option<String> {
        self.state.lock().errors.get(category).clone()
    }

    pub fn active_student(&self) -> Option<String> {
        self.state.lock().entry.student_id.clone()
    }

    pub fn is_cache_valid(&self, student_id: &str) -> bool {
        self.valid_raw(student_id).is_some()
    }

    /// Raw rows already cached for `student_id`; never fetches.
    pub fn cached_raw(&self, student_id: &str) -> Result<Arc<Value>, CacheError> {
        self.valid_raw(student_id).ok_or(CacheError::NoRawData)
    }

    fn valid_raw(&self, student_id: &str) -> Option<Arc<Value>> {
        let state = self.state.lock();
        let entry = &state.entry;
        if entry.student_id.as_deref() != Some(student_id) || entry.last_updated.is_none() {
            return None;
        }
        entry.raw_data.clone()
    }

    /// Returns the raw rows for `student_id`, fetching them only when the
    /// cache is not valid for that student.
    pub async fn load(&self, student_id: &str) -> Result<Arc<Value>, CacheError> {
        if student_id.is_empty() {
            return Err(CacheError::MissingStudentId);
        }
        if let Some(raw) = self.valid_raw(student_id) {
            debug!(%student_id, "using cached raw data");
            return Ok(raw);
        }

        let _gate = self.load_gate.lock().await;
        if let Some(raw) = self.valid_raw(student_id) {
            debug!(%student_id, "raw data loaded by a concurrent caller");
            return Ok(raw);
        }

        let _loading = self.begin(student_id, Category::RawData);
        info!(%student_id, "fetching raw data");

        match self.fetcher.fetch_student(student_id).await {
            Ok(data) => {
                let raw = Arc::new(Value::Array(vec![data]));
                {
                    let mut state = self.state.lock();
                    if state.entry.student_id.as_deref() != Some(student_id) {
                        state.entry = CacheEntry::default();
                        state.errors = ErrorFlags::default();
                    }
                    state.entry.raw_data = Some(raw.clone());
                    state.entry.student_id = Some(student_id.to_string());
                    state.entry.last_updated = Some(Utc::now());
                }
                info!(%student_id, "raw data loaded");
                self.emit(CacheEvent::new(student_id, Category::RawData, EventKind::Ready));
                Ok(raw)
            }
            Err(err) => {
                let message = err.to_string();
                warn!(%student_id, error = %message, "failed to load raw data");
                self.state.lock().errors.raw_data = Some(message.clone());
                self.emit(CacheEvent::new(
                    student_id,
                    Category::RawData,
                    EventKind::Failed(message),
                ));
                Err(err.into())
            }
        }
    }

    /// Returns the cached view for `student_id`, deriving it from raw data
    /// (loading that first if needed) when absent.
    pub async fn get_derived<V, E, F>(&self, student_id: &str, derive: F) -> Result<Arc<V>, CacheError>
    where
        V: DerivedView,
        E: fmt::Display,
        F: FnOnce(&Value) -> Result<V, E> + Send,
    {
        if student_id.is_empty() {
            return Err(CacheError::MissingStudentId);
        }
        if let Some(view) = self.cached_view::<V>(student_id) {
            debug!(%student_id, category = %V::CATEGORY, "using cached view");
            return Ok(view);
        }

        let raw = self.load(student_id).await?;
        // A caller that waited on the load gate finds the view its peer derived.
        if let Some(view) = self.cached_view::<V>(student_id) {
            return Ok(view);
        }
        let category = V::CATEGORY;
        let _loading = self.begin(student_id, category);

        match derive(&raw) {
            Ok(view) => {
                let view = Arc::new(view);
                {
                    let mut state = self.state.lock();
                    if state.entry.student_id.as_deref() == Some(student_id) {
                        V::store(&mut state.entry, view.clone());
                    }
                }
                debug!(%student_id, %category, "view derived and cached");
                self.emit(CacheEvent::new(student_id, category, EventKind::Ready));
                Ok(view)
            }
            Err(err) => {
                let err = CacheError::Derive {
                    category,
                    message: err.to_string(),
                };
                warn!(%student_id, error = %err, "failed to derive view");
                self.state.lock().errors.set(category, Some(err.to_string()));
                self.emit(CacheEvent::new(
                    student_id,
                    category,
                    EventKind::Failed(err.to_string()),
                ));
                Err(err)
            }
        }
    }

    pub async fn performance(&self, student_id: &str) -> Result<Arc<StudentOverview>, CacheError> {
        self.get_derived(student_id, |raw| {
            Ok::<_, Infallible>(projector::project_all(raw))
        })
        .await
    }

    pub async fn study_habits(&self, student_id: &str) -> Result<Arc<StudyHabits>, CacheError> {
        self.get_derived(student_id, |raw| {
            Ok::<_, Infallible>(habits::aggregate_study_habits(raw))
        })
        .await
    }

    /// Drops every category for `student_id` and the persisted artifacts,
    /// then reloads raw data.
    pub async fn force_refresh(&self, student_id: &str) -> Result<Arc<Value>, CacheError> {
        if student_id.is_empty() {
            return Err(CacheError::MissingStudentId);
        }
        info!(%student_id, "force refreshing student data");

        self.bridge.discard_all().await;
        let cleared = {
            let mut state = self.state.lock();
            let active = state.entry.student_id.as_deref() == Some(student_id);
            if active {
                state.entry.clear_views();
            }
            active
        };
        if cleared {
            for category in Category::ALL {
                self.emit(CacheEvent::new(student_id, category, EventKind::Cleared));
            }
        }

        self.load(student_id).await
    }

    pub async fn clear_all(&self) {
        self.bridge.discard_all().await;
        let previous = {
            let mut state = self.state.lock();
            std::mem::take(&mut *state).entry.student_id
        };
        info!("cleared all cached student data");
        for category in Category::ALL {
            self.emit(CacheEvent {
                student_id: previous.clone(),
                category,
                kind: EventKind::Cleared,
            });
        }
    }

    fn cached_view<V: DerivedView>(&self, student_id: &str) -> Option<Arc<V>> {
        let state = self.state.lock();
        if state.entry.student_id.as_deref() != Some(student_id) {
            return None;
        }
        V::cached(&state.entry)
    }

    fn begin(&self, student_id: &str, category: Category) -> LoadingGuard<'_> {
        {
            let mut state = self.state.lock();
            state.loading.set(category, true);
            state.errors.set(category, None);
        }
        self.emit(CacheEvent::new(student_id, category, EventKind::Loading));
        LoadingGuard {
            state: &self.state,
            category,
        }
    }

    pub(crate) fn emit(&self, event: CacheEvent) {
        // Fails only when nobody is subscribed.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::persist::MemoryStore;
    use crate::projector::tests::sample_rows;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Replays scripted responses; the last one repeats.
    pub(crate) struct StubFetcher {
        responses: parking_lot::Mutex<Vec<Result<Value, FetchError>>>,
        calls: Arc<AtomicUsize>,
        delay: Option<Duration>,
    }

    impl StubFetcher {
        pub(crate) fn scripted(responses: Vec<Result<Value, FetchError>>) -> Self {
            Self {
                responses: parking_lot::Mutex::new(responses),
                calls: Arc::new(AtomicUsize::new(0)),
                delay: None,
            }
        }

        pub(crate) fn ok() -> Self {
            Self::scripted(vec![Ok(sample_rows()[0].clone())])
        }

        pub(crate) fn failing(err: FetchError) -> Self {
            Self::scripted(vec![Err(err)])
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn calls(&self) -> Arc<AtomicUsize> {
            self.calls.clone()
        }
    }

    #[async_trait]
    impl RawDataFetcher for StubFetcher {
        async fn fetch_student(&self, _student_id: &str) -> Result<Value, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let mut responses = self.responses.lock();
            if responses.len() > 1 {
                responses.remove(0)
            } else {
                responses[0].clone()
            }
        }
    }

    pub(crate) fn service_with_store(
        fetcher: StubFetcher,
        store: Arc<dyn KeyValueStore>,
    ) -> CacheService {
        CacheService::new(Arc::new(fetcher), store)
    }

    fn service(fetcher: StubFetcher) -> CacheService {
        service_with_store(fetcher, Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn load_marks_cache_valid_for_that_student_only() {
        let fetcher = StubFetcher::ok();
        let calls = fetcher.calls();
        let cache = service(fetcher);

        cache.load("S1").await.unwrap();
        assert!(cache.is_cache_valid("S1"));
        assert!(!cache.is_cache_valid("S2"));

        cache.load("S1").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.snapshot().entry.last_updated.is_some());
    }

    #[tokio::test]
    async fn cached_raw_never_fetches() {
        let fetcher = StubFetcher::ok();
        let calls = fetcher.calls();
        let cache = service(fetcher);

        assert_eq!(cache.cached_raw("S1").unwrap_err(), CacheError::NoRawData);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let loaded = cache.load("S1").await.unwrap();
        assert!(Arc::ptr_eq(&loaded, &cache.cached_raw("S1").unwrap()));
    }

    #[tokio::test]
    async fn missing_student_id_is_rejected() {
        let cache = service(StubFetcher::ok());
        assert_eq!(cache.load("").await.unwrap_err(), CacheError::MissingStudentId);
        assert_eq!(
            cache.performance("").await.unwrap_err(),
            CacheError::MissingStudentId
        );
    }

    #[tokio::test]
    async fn network_failure_is_recorded_per_category() {
        let cache = service(StubFetcher::failing(FetchError::Network(
            "connection refused".to_string(),
        )));

        let err = cache.load("S1").await.unwrap_err();
        assert_eq!(err.to_string(), "Network error: connection refused");
        assert_eq!(
            cache.error(Category::RawData).as_deref(),
            Some("Network error: connection refused")
        );
        assert!(!cache.is_loading(Category::RawData));
        assert!(cache.snapshot().entry.raw_data.is_none());
        assert!(!cache.is_cache_valid("S1"));
        assert_eq!(cache.error(Category::PerformanceData), None);
    }

    #[tokio::test]
    async fn upstream_error_surfaces_through_derived_reads() {
        let cache = service(StubFetcher::failing(FetchError::not_found()));
        let err = cache.performance("S404").await.unwrap_err();
        assert_eq!(err.to_string(), "Student not found");
        assert_eq!(cache.error(Category::RawData).as_deref(), Some("Student not found"));
    }

    #[tokio::test]
    async fn retry_after_failure_clears_error() {
        let cache = service(StubFetcher::scripted(vec![
            Err(FetchError::Network("timeout".to_string())),
            Ok(sample_rows()[0].clone()),
        ]));
        assert!(cache.load("S1").await.is_err());
        assert!(cache.load("S1").await.is_ok());
        assert_eq!(cache.error(Category::RawData), None);
        assert!(cache.is_cache_valid("S1"));
    }

    #[tokio::test]
    async fn derived_views_are_computed_once() {
        let fetcher = StubFetcher::ok();
        let calls = fetcher.calls();
        let cache = service(fetcher);

        let first = cache.performance("S1").await.unwrap();
        let second = cache.performance("S1").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.student_info.id, "S1");

        let habits = cache.study_habits("S1").await.unwrap();
        assert!(habits.current_term.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!cache.is_loading(Category::PerformanceData));
    }

    #[tokio::test]
    async fn switching_students_supersedes_entry() {
        let fetcher = StubFetcher::ok();
        let calls = fetcher.calls();
        let cache = service(fetcher);

        let s1 = cache.performance("S1").await.unwrap();
        let s2 = cache.performance("S2").await.unwrap();
        assert!(!Arc::ptr_eq(&s1, &s2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.active_student().as_deref(), Some("S2"));
        assert!(!cache.is_cache_valid("S1"));
        assert!(cache.snapshot().entry.study_habits_data.is_none());
    }

    #[tokio::test]
    async fn derive_failure_is_recorded() {
        let cache = service(StubFetcher::ok());
        let err = cache
            .get_derived::<StudyHabits, _, _>("S1", |_| Err("bad session data"))
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Error deriving study habits data: bad session data"
        );
        assert_eq!(
            cache.error(Category::StudyHabitsData).as_deref(),
            Some("Error deriving study habits data: bad session data")
        );
        assert!(!cache.is_loading(Category::StudyHabitsData));
        assert!(cache.snapshot().entry.study_habits_data.is_none());
        assert!(cache.is_cache_valid("S1"));
    }

    #[tokio::test]
    async fn force_refresh_invalidates_until_reload() {
        let fetcher = StubFetcher::scripted(vec![
            Ok(sample_rows()[0].clone()),
            Err(FetchError::Network("offline".to_string())),
        ]);
        let cache = service(fetcher);

        cache.performance("S1").await.unwrap();
        assert!(cache.force_refresh("S1").await.is_err());
        assert!(!cache.is_cache_valid("S1"));
        let entry = cache.snapshot().entry;
        assert!(entry.performance_data.is_none());
        assert!(entry.last_updated.is_none());
        assert_eq!(entry.student_id.as_deref(), Some("S1"));
    }

    #[tokio::test]
    async fn force_refresh_reloads_and_drops_artifacts() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = StubFetcher::ok();
        let calls = fetcher.calls();
        let cache = service_with_store(fetcher, store.clone());

        cache.load("S1").await.unwrap();
        cache
            .save_artifact("S1", Artifact::AiInsights, serde_json::json!({"a": 1}))
            .await;
        assert_eq!(store.len(), 2);

        cache.force_refresh("S1").await.unwrap();
        assert!(cache.is_cache_valid("S1"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.artifact("S1", Artifact::AiInsights), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn concurrent_loads_share_one_fetch() {
        let fetcher = StubFetcher::ok().with_delay(Duration::from_millis(20));
        let calls = fetcher.calls();
        let cache = service(fetcher);

        let (a, b) = tokio::join!(cache.load("S1"), cache.performance("S1"));
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_reads_derive_a_view_once() {
        let cache = service(StubFetcher::ok().with_delay(Duration::from_millis(20)));
        let derived = AtomicUsize::new(0);
        let derive = |raw: &Value| {
            derived.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(projector::project_all(raw))
        };

        let (a, b) = tokio::join!(
            cache.get_derived::<StudentOverview, _, _>("S1", derive),
            cache.get_derived::<StudentOverview, _, _>("S1", derive)
        );
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(derived.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn clear_all_resets_everything() {
        let store = Arc::new(MemoryStore::new());
        let cache = service_with_store(StubFetcher::ok(), store.clone());
        cache.performance("S1").await.unwrap();
        cache
            .save_artifact("S1", Artifact::CourseRoadmap, serde_json::json!({"plan": []}))
            .await;

        cache.clear_all().await;
        let state = cache.snapshot();
        assert!(state.entry.student_id.is_none());
        assert!(state.entry.raw_data.is_none());
        assert!(!cache.is_cache_valid("S1"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn observers_see_loading_then_ready() {
        let cache = service(StubFetcher::ok());
        let mut events = cache.subscribe();

        cache.load("S1").await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            CacheEvent::new("S1", Category::RawData, EventKind::Loading)
        );
        assert_eq!(
            events.recv().await.unwrap(),
            CacheEvent::new("S1", Category::RawData, EventKind::Ready)
        );
    }
}
