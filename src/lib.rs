//! Client-side academic record cache for Group Scholar advisors.
//!
//! Raw per-student graph projections are fetched once, cached, and turned into
//! typed views: profile, degrees, enrollments, past semesters with GPA
//! summaries, similar students, and study-habit statistics. AI-generated
//! artifacts are persisted to a local key-value store.

pub mod cache;
pub mod codec;
pub mod db;
pub mod error;
pub mod fetch;
pub mod graph;
pub mod habits;
pub mod models;
pub mod persist;
pub mod projector;
pub mod report;
pub mod summary;

pub use cache::{CacheEvent, CacheService, CacheState, EventKind};
pub use error::{CacheError, FetchError, ProjectionError, StoreError};
pub use fetch::{EmulatorFetcher, HttpFetcher, HttpFetcherConfig, RawDataFetcher};
pub use persist::{Artifact, KeyValueStore, MemoryStore};
