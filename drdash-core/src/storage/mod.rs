//! Storage modules for drdash
//!
//! SQLite-backed event log, key-value options and artifact registry, plus
//! the shared upload directory.

pub mod artifact_registry;
pub mod database;
pub mod event_store;
pub mod kv_store;
pub mod last_result;
pub mod media_store;

pub use artifact_registry::{
    ArtifactRegistration, ArtifactRegistry, RegisteredArtifact, SqliteArtifactRegistry,
    mime_type_for,
};
pub use database::Database;
pub use event_store::{
    EventId, EventStore, MAX_TAIL_LIMIT, MIN_TAIL_LIMIT, ProbeAction, ProbeEvent, clamp_limit,
};
pub use kv_store::{KvStore, SqliteKvStore, UpdateFn};
pub use last_result::{LAST_RESULT_KEY, LastResult, LastResultCache};
pub use media_store::{MediaStore, StoredArtifact, UploadLocation};
