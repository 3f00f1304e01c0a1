//! drdash core - health aggregation for HA/DR failover dashboards
//!
//! Answers "is the whole stack healthy right now, and who is serving me?":
//! - Event store: append-only probe log in SQLite
//! - Last-result cache of the most recent probe outcomes
//! - Cluster reconciler polling per-node role endpoints in parallel
//! - Consistency and durability probes
//! - Status snapshot for the dashboard

pub mod cluster;
pub mod error;
pub mod identity;
pub mod operations;
pub mod render;
pub mod storage;

pub use cluster::{
    ClusterStatusReconciler, ClusterVerdict, DEFAULT_NODE_TIMEOUT, FetchOutcome, NodeStatus,
    PRIMARY_NOT_DETECTED, ROLE_BAD_RESPONSE, ROLE_INVALID_JSON, ROLE_UNKNOWN, ROLE_UNREACHABLE,
    classify_response, is_primary_role,
};
pub use error::{DashError, Result};
pub use identity::{BackendIdentity, sanitize_label};
pub use operations::{
    DB_PROBE_KEY, DEFAULT_STATUS_EVENT_TAIL, DbWriteReadOperation, DbWriteReadOperationRequest,
    DbWriteReadOperationResult, MediaUploadFailure, MediaUploadOperation,
    MediaUploadOperationOutcome, MediaUploadOperationRequest, MediaUploadOperationResult,
    StatusSnapshot, StatusSnapshotOperation, StatusSnapshotOperationRequest,
    format_probe_timestamp, upload_filename,
};
pub use render::{ARTIFACT_HEIGHT, ARTIFACT_WIDTH, ArtifactRenderer, PngRenderer};
pub use storage::{
    ArtifactRegistration, ArtifactRegistry, Database, EventId, EventStore, KvStore,
    LAST_RESULT_KEY, LastResult, LastResultCache, MAX_TAIL_LIMIT, MIN_TAIL_LIMIT, MediaStore,
    ProbeAction, ProbeEvent, RegisteredArtifact, SqliteArtifactRegistry, SqliteKvStore,
    StoredArtifact, UpdateFn, UploadLocation, clamp_limit, mime_type_for,
};
