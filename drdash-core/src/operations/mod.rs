pub mod db_write_read;
pub mod media_upload;
pub mod status_snapshot;

pub use db_write_read::{
    DB_PROBE_KEY, DbWriteReadOperation, DbWriteReadOperationRequest, DbWriteReadOperationResult,
};
pub use media_upload::{
    MediaUploadFailure, MediaUploadOperation, MediaUploadOperationOutcome,
    MediaUploadOperationRequest, MediaUploadOperationResult, upload_filename,
};
pub use status_snapshot::{
    DEFAULT_STATUS_EVENT_TAIL, StatusSnapshot, StatusSnapshotOperation,
    StatusSnapshotOperationRequest,
};

use chrono::{DateTime, SecondsFormat, Utc};

/// ISO-8601 timestamp with second precision and an explicit `+00:00` offset.
pub fn format_probe_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, false)
}
