//! Durable storage of AI-generated artifacts.
//!
//! Each artifact lives under two keys: `<artifact>` holds the JSON payload and
//! `<artifact>StudentId` the student it was produced for. Durable writes are
//! best effort; a failing store is logged and never breaks the in-memory cache.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use tracing::{info, warn};

use crate::cache::{CacheEvent, CacheService, EventKind};
use crate::error::StoreError;
use crate::models::Category;

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"```(?:json)?\s*(\{[\s\S]*\})\s*```").expect("valid fence pattern")
});

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Process-local store; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    AiInsights,
    CourseRoadmap,
}

impl Artifact {
    pub const ALL: [Artifact; 2] = [Artifact::AiInsights, Artifact::CourseRoadmap];

    pub fn key(self) -> &'static str {
        match self {
            Self::AiInsights => "aiInsights",
            Self::CourseRoadmap => "courseRoadmap",
        }
    }

    pub fn owner_key(self) -> &'static str {
        match self {
            Self::AiInsights => "aiInsightsStudentId",
            Self::CourseRoadmap => "courseRoadmapStudentId",
        }
    }

    pub fn category(self) -> Category {
        match self {
            Self::AiInsights => Category::AiInsights,
            Self::CourseRoadmap => Category::CourseRoadmap,
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.category(), f)
    }
}

/// An artifact read back from durable storage.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoredArtifact {
    pub artifact: Artifact,
    pub student_id: String,
    pub value: Value,
}

/// Durable side of artifact persistence.
#[derive(Clone)]
pub struct PersistenceBridge {
    store: Arc<dyn KeyValueStore>,
}

impl PersistenceBridge {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Reads one artifact. Both keys must be present and the payload must be
    /// valid JSON; a corrupt payload has both keys removed.
    pub async fn restore(&self, artifact: Artifact) -> Option<RestoredArtifact> {
        let payload = self.read(artifact.key()).await?;
        let student_id = self.read(artifact.owner_key()).await?;
        if student_id.is_empty() {
            return None;
        }

        match serde_json::from_str(&payload) {
            Ok(value) => {
                info!(%student_id, artifact = artifact.key(), "restored artifact from local storage");
                Some(RestoredArtifact {
                    artifact,
                    student_id,
                    value,
                })
            }
            Err(err) => {
                warn!(artifact = artifact.key(), error = %err, "discarding corrupt artifact");
                self.discard(artifact).await;
                None
            }
        }
    }

    pub async fn persist(&self, student_id: &str, artifact: Artifact, value: &Value) {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(artifact = artifact.key(), error = %err, "artifact is not serializable");
                return;
            }
        };
        self.write(artifact.key(), &payload).await;
        self.write(artifact.owner_key(), student_id).await;
    }

    pub async fn discard(&self, artifact: Artifact) {
        for key in [artifact.key(), artifact.owner_key()] {
            if let Err(err) = self.store.remove(key).await {
                warn!(key, error = %err, "failed to remove from local storage");
            }
        }
    }

    pub async fn discard_all(&self) {
        for artifact in Artifact::ALL {
            self.discard(artifact).await;
        }
    }

    async fn read(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(value) => value,
            Err(err) => {
                warn!(key, error = %err, "failed to read local storage");
                None
            }
        }
    }

    async fn write(&self, key: &str, value: &str) {
        if let Err(err) = self.store.set(key, value).await {
            warn!(key, error = %err, "failed to write local storage");
        }
    }
}

/// Parses AI collaborator output, unwrapping a Markdown code fence if present.
pub fn parse_artifact_text(text: &str) -> Result<Value, serde_json::Error> {
    let json = FENCED_JSON
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map_or(text.trim(), |m| m.as_str());
    serde_json::from_str(json)
}

impl CacheService {
    /// Restores persisted artifacts into the cache entry.
    ///
    /// The entry tracks a single owner, so an artifact owned by a different
    /// student than one already restored stays on disk only.
    pub async fn restore_artifacts(&self) {
        for artifact in Artifact::ALL {
            let Some(restored) = self.bridge.restore(artifact).await else {
                continue;
            };
            let mut state = self.state.lock();
            let owner = state.entry.student_id.clone();
            if owner.as_deref().is_some_and(|id| id != restored.student_id) {
                warn!(
                    artifact = artifact.key(),
                    student_id = %restored.student_id,
                    "skipping artifact owned by a different student"
                );
                continue;
            }
            state.entry.student_id = Some(restored.student_id);
            state.entry.set_artifact(artifact, Some(Arc::new(restored.value)));
        }
    }

    /// Writes the artifact durably, then into memory if `student_id` is the
    /// active student.
    pub async fn save_artifact(&self, student_id: &str, artifact: Artifact, value: Value) {
        if student_id.is_empty() || value.is_null() {
            warn!(artifact = artifact.key(), "cannot save artifact: missing student id or value");
            return;
        }

        self.bridge.persist(student_id, artifact, &value).await;

        let updated = {
            let mut state = self.state.lock();
            if state.entry.student_id.as_deref() == Some(student_id) {
                state.entry.set_artifact(artifact, Some(Arc::new(value)));
                state.entry.last_updated = Some(Utc::now());
                true
            } else {
                false
            }
        };
        if updated {
            info!(%student_id, artifact = artifact.key(), "artifact saved");
            self.emit(CacheEvent::new(student_id, artifact.category(), EventKind::Ready));
        } else {
            warn!(%student_id, artifact = artifact.key(), "student id mismatch, artifact kept in local storage only");
        }
    }

    /// In-memory artifact for `student_id`; never falls back to durable storage.
    pub fn artifact(&self, student_id: &str, artifact: Artifact) -> Option<Arc<Value>> {
        let state = self.state.lock();
        if state.entry.student_id.as_deref() != Some(student_id) {
            return None;
        }
        state.entry.artifact(artifact)
    }

    pub async fn delete_artifact(&self, student_id: &str, artifact: Artifact) {
        if student_id.is_empty() {
            warn!(artifact = artifact.key(), "cannot delete artifact: missing student id");
            return;
        }

        self.bridge.discard(artifact).await;

        let removed = {
            let mut state = self.state.lock();
            if state.entry.student_id.as_deref() == Some(student_id) {
                state.entry.set_artifact(artifact, None);
                true
            } else {
                false
            }
        };
        if removed {
            self.emit(CacheEvent::new(student_id, artifact.category(), EventKind::Cleared));
        } else {
            warn!(%student_id, artifact = artifact.key(), "student id mismatch on artifact delete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::{service_with_store, StubFetcher};
    use serde_json::json;

    struct BrokenStore;

    #[async_trait]
    impl KeyValueStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("quota exceeded".to_string()))
        }
        async fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("quota exceeded".to_string()))
        }
        async fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("quota exceeded".to_string()))
        }
    }

    #[tokio::test]
    async fn saved_artifact_survives_restart() {
        let store = Arc::new(MemoryStore::new());
        let insights = json!({"academicPatterns": {"performanceTrend": "Improving"}});

        let first = service_with_store(StubFetcher::ok(), store.clone());
        first.load("S1").await.unwrap();
        first.save_artifact("S1", Artifact::AiInsights, insights.clone()).await;
        assert_eq!(first.artifact("S1", Artifact::AiInsights).as_deref(), Some(&insights));

        let second = service_with_store(StubFetcher::ok(), store.clone());
        second.restore_artifacts().await;
        assert_eq!(second.artifact("S1", Artifact::AiInsights).as_deref(), Some(&insights));
        assert_eq!(second.artifact("S2", Artifact::AiInsights), None);
    }

    #[tokio::test]
    async fn save_for_other_student_is_durable_only() {
        let store = Arc::new(MemoryStore::new());
        let cache = service_with_store(StubFetcher::ok(), store.clone());
        cache.load("S1").await.unwrap();

        cache.save_artifact("S2", Artifact::CourseRoadmap, json!({"terms": []})).await;
        assert_eq!(cache.artifact("S1", Artifact::CourseRoadmap), None);
        assert_eq!(cache.artifact("S2", Artifact::CourseRoadmap), None);
        assert_eq!(
            store.get("courseRoadmapStudentId").await.unwrap().as_deref(),
            Some("S2")
        );
    }

    #[tokio::test]
    async fn corrupt_payload_is_discarded() {
        let store = Arc::new(MemoryStore::new());
        store.set("aiInsights", "{not json").await.unwrap();
        store.set("aiInsightsStudentId", "S1").await.unwrap();

        let cache = service_with_store(StubFetcher::ok(), store.clone());
        cache.restore_artifacts().await;

        assert_eq!(cache.artifact("S1", Artifact::AiInsights), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn restore_needs_both_keys() {
        let store = Arc::new(MemoryStore::new());
        store.set("courseRoadmap", "{}").await.unwrap();
        let bridge = PersistenceBridge::new(store.clone());
        assert_eq!(bridge.restore(Artifact::CourseRoadmap).await, None);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn restore_keeps_a_single_owner() {
        let store = Arc::new(MemoryStore::new());
        store.set("aiInsights", r#"{"a": 1}"#).await.unwrap();
        store.set("aiInsightsStudentId", "S1").await.unwrap();
        store.set("courseRoadmap", r#"{"b": 2}"#).await.unwrap();
        store.set("courseRoadmapStudentId", "S2").await.unwrap();

        let cache = service_with_store(StubFetcher::ok(), store.clone());
        cache.restore_artifacts().await;
        assert!(cache.artifact("S1", Artifact::AiInsights).is_some());
        assert_eq!(cache.artifact("S1", Artifact::CourseRoadmap), None);
        assert_eq!(cache.artifact("S2", Artifact::CourseRoadmap), None);
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn delete_is_id_guarded_in_memory() {
        let store = Arc::new(MemoryStore::new());
        let cache = service_with_store(StubFetcher::ok(), store.clone());
        cache.load("S1").await.unwrap();
        cache.save_artifact("S1", Artifact::AiInsights, json!({"x": 1})).await;

        cache.delete_artifact("S2", Artifact::AiInsights).await;
        assert!(cache.artifact("S1", Artifact::AiInsights).is_some());
        assert!(store.is_empty());

        cache.delete_artifact("S1", Artifact::AiInsights).await;
        assert_eq!(cache.artifact("S1", Artifact::AiInsights), None);
    }

    #[tokio::test]
    async fn failing_store_never_breaks_memory() {
        let cache = service_with_store(StubFetcher::ok(), Arc::new(BrokenStore));
        cache.restore_artifacts().await;
        cache.load("S1").await.unwrap();
        cache.save_artifact("S1", Artifact::AiInsights, json!({"ok": true})).await;
        assert!(cache.artifact("S1", Artifact::AiInsights).is_some());
        cache.clear_all().await;
        assert_eq!(cache.artifact("S1", Artifact::AiInsights), None);
    }

    #[test]
    fn artifact_text_unwraps_code_fences() {
        let fenced = "Here you go:\n```json\n{\"riskAreas\": [\"Late nights\"]}\n```";
        assert_eq!(
            parse_artifact_text(fenced).unwrap(),
            json!({"riskAreas": ["Late nights"]})
        );
        assert_eq!(parse_artifact_text(" {\"a\": 1} ").unwrap(), json!({"a": 1}));
        assert!(parse_artifact_text("not json").is_err());
    }
}
