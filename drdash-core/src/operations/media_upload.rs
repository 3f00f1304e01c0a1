use super::format_probe_timestamp;
use crate::{
    ArtifactRegistration, ArtifactRegistry, ArtifactRenderer, BackendIdentity, DashError, EventId,
    EventStore, LastResultCache, MediaStore, ProbeAction, Result, mime_type_for,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

/// Storage durability probe: render a test image, persist it on shared
/// storage, register it and confirm it is reachable under a public URL.
#[derive(Clone)]
pub struct MediaUploadOperation {
    renderer: Arc<dyn ArtifactRenderer>,
    media_store: Arc<MediaStore>,
    registry: Arc<dyn ArtifactRegistry>,
    last_result: Arc<LastResultCache>,
    events: Arc<EventStore>,
}

#[derive(Debug, Clone)]
pub struct MediaUploadOperationRequest {
    pub backend: BackendIdentity,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaUploadOperationResult {
    pub ok: bool,
    pub action: ProbeAction,
    pub backend: String,
    pub time_utc: String,
    pub filename: String,
    pub path: String,
    pub url: Option<String>,
    pub bytes: u64,
    pub attach_id: i64,
    pub event_id: EventId,
}

/// A probe that stopped before the artifact was registered.
#[derive(Debug, Clone, Serialize)]
pub struct MediaUploadFailure {
    pub ok: bool,
    pub action: ProbeAction,
    pub backend: String,
    pub time_utc: String,
    /// Stable failure code.
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub event_id: EventId,
}

#[derive(Debug, Clone)]
pub enum MediaUploadOperationOutcome {
    Completed(MediaUploadOperationResult),
    Failed(MediaUploadFailure),
}

impl MediaUploadOperationOutcome {
    pub fn ok(&self) -> bool {
        match self {
            Self::Completed(result) => result.ok,
            Self::Failed(_) => false,
        }
    }

    pub fn event_id(&self) -> EventId {
        match self {
            Self::Completed(result) => result.event_id,
            Self::Failed(failure) => failure.event_id,
        }
    }
}

const ERROR_RENDER_UNAVAILABLE: &str = "render_unavailable";
const ERROR_RENDER_FAILED: &str = "render_failed";
const ERROR_STORAGE_LOCATION: &str = "storage_location_unavailable";
const ERROR_WRITE_FILE: &str = "failed_write_file";
const ERROR_REGISTRATION: &str = "artifact_registration_failed";

struct ProbeContext {
    backend: BackendIdentity,
    time_utc: String,
}

impl MediaUploadOperation {
    pub fn new(
        renderer: Arc<dyn ArtifactRenderer>,
        media_store: Arc<MediaStore>,
        registry: Arc<dyn ArtifactRegistry>,
        last_result: Arc<LastResultCache>,
        events: Arc<EventStore>,
    ) -> Self {
        Self {
            renderer,
            media_store,
            registry,
            last_result,
            events,
        }
    }

    pub async fn run(
        &self,
        request: MediaUploadOperationRequest,
    ) -> Result<MediaUploadOperationOutcome> {
        let MediaUploadOperationRequest { backend, now } = request;
        let ctx = ProbeContext {
            time_utc: format_probe_timestamp(now),
            backend,
        };

        let label = format!("time_utc={} | backend={}", ctx.time_utc, ctx.backend);
        let png = match self.render(label).await {
            Ok(png) => png,
            Err(error @ DashError::RenderUnavailable(_)) => {
                return self.fail(&ctx, ERROR_RENDER_UNAVAILABLE, error, None).await;
            }
            Err(error) => return self.fail(&ctx, ERROR_RENDER_FAILED, error, None).await,
        };

        let location = match self.media_store.resolve_location(now).await {
            Ok(location) => location,
            Err(error) => return self.fail(&ctx, ERROR_STORAGE_LOCATION, error, None).await,
        };

        let filename = upload_filename(now, &ctx.backend);
        let stored = match self
            .media_store
            .write_artifact(&location, &filename, png)
            .await
        {
            Ok(stored) => stored,
            Err(error) => {
                let path = location.dir.join(&filename);
                return self.fail(&ctx, ERROR_WRITE_FILE, error, Some(&path)).await;
            }
        };

        let registration = ArtifactRegistration {
            path: stored.path.clone(),
            title: filename.clone(),
            mime_type: mime_type_for(&filename).to_string(),
        };
        let registered = match self.registry.register(registration).await {
            Ok(registered) => registered,
            Err(error) => {
                if let Err(cleanup) = self.media_store.remove(&stored.path).await {
                    tracing::warn!(
                        "Failed to remove unregistered artifact {:?}: {}",
                        stored.path,
                        cleanup
                    );
                }
                return self
                    .fail(&ctx, ERROR_REGISTRATION, error, Some(&stored.path))
                    .await;
            }
        };

        let url = registered.url.filter(|url| !url.is_empty());
        let ok = url.is_some() && self.media_store.exists(&stored.path).await;
        let path = stored.path.to_string_lossy().to_string();

        let summary = format!("{} | {} | backend={}", ctx.time_utc, filename, ctx.backend);
        if let Err(error) = self.last_result.set_media_outcome(ok, &summary).await {
            tracing::error!("Failed to update last media result: {}", error);
        }

        let event_id = self.events.append(
            ProbeAction::MediaUpload,
            ok,
            ctx.backend.as_str(),
            Some(&json!({
                "filename": filename,
                "path": path,
                "url": url,
                "bytes": stored.bytes,
                "attach_id": registered.id,
            })),
        )?;

        if ok {
            tracing::info!(
                "Media upload probe passed on backend {}: {}",
                ctx.backend,
                path
            );
        } else {
            tracing::warn!(
                "Media upload probe failed on backend {}: url={:?} path={}",
                ctx.backend,
                url,
                path
            );
        }

        Ok(MediaUploadOperationOutcome::Completed(MediaUploadOperationResult {
            ok,
            action: ProbeAction::MediaUpload,
            backend: ctx.backend.to_string(),
            time_utc: ctx.time_utc,
            filename,
            path,
            url,
            bytes: stored.bytes,
            attach_id: registered.id,
            event_id,
        }))
    }

    async fn render(&self, label: String) -> Result<Bytes> {
        let renderer = self.renderer.clone();
        tokio::task::spawn_blocking(move || renderer.render(&label))
            .await
            .map_err(|error| DashError::Internal(format!("render task failed: {}", error)))?
    }

    async fn fail(
        &self,
        ctx: &ProbeContext,
        code: &str,
        error: DashError,
        path: Option<&Path>,
    ) -> Result<MediaUploadOperationOutcome> {
        let message = error.to_string();
        let path = path.map(|path| path.to_string_lossy().to_string());
        tracing::error!(
            "Media upload probe aborted on backend {}: {} ({})",
            ctx.backend,
            code,
            message
        );

        let summary = format!("{} | error={} | backend={}", ctx.time_utc, code, ctx.backend);
        if let Err(error) = self.last_result.set_media_outcome(false, &summary).await {
            tracing::error!("Failed to update last media result: {}", error);
        }

        let mut details = json!({ "error": code, "message": message });
        if let Some(path) = &path {
            details["path"] = json!(path);
        }
        let event_id = self.events.append(
            ProbeAction::MediaUpload,
            false,
            ctx.backend.as_str(),
            Some(&details),
        )?;

        Ok(MediaUploadOperationOutcome::Failed(MediaUploadFailure {
            ok: false,
            action: ProbeAction::MediaUpload,
            backend: ctx.backend.to_string(),
            time_utc: ctx.time_utc.clone(),
            error: code.to_string(),
            message,
            path,
            event_id,
        }))
    }
}

/// `drd-upload-<YYYYmmdd-HHMMSS>-<backend>.png`, with the backend label
/// reduced to `[A-Za-z0-9-]`.
pub fn upload_filename(now: DateTime<Utc>, backend: &BackendIdentity) -> String {
    format!(
        "drd-upload-{}-{}.png",
        now.format("%Y%m%d-%H%M%S"),
        backend.sanitized()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, KvStore, RegisteredArtifact, SqliteArtifactRegistry, SqliteKvStore};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::path::PathBuf;

    struct StaticRenderer;

    impl ArtifactRenderer for StaticRenderer {
        fn render(&self, label: &str) -> Result<Bytes> {
            Ok(Bytes::from(format!("fake-png:{}", label)))
        }
    }

    struct UnavailableRenderer;

    impl ArtifactRenderer for UnavailableRenderer {
        fn render(&self, _label: &str) -> Result<Bytes> {
            Err(DashError::RenderUnavailable("no image backend".to_string()))
        }
    }

    struct FailingRegistry;

    #[async_trait]
    impl ArtifactRegistry for FailingRegistry {
        async fn register(&self, registration: ArtifactRegistration) -> Result<RegisteredArtifact> {
            Err(DashError::Registration {
                path: registration.path,
                reason: "metadata store offline".to_string(),
            })
        }
    }

    struct UrlLessRegistry;

    #[async_trait]
    impl ArtifactRegistry for UrlLessRegistry {
        async fn register(
            &self,
            _registration: ArtifactRegistration,
        ) -> Result<RegisteredArtifact> {
            Ok(RegisteredArtifact { id: 7, url: None })
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        uploads: PathBuf,
        last_result: Arc<LastResultCache>,
        events: Arc<EventStore>,
        operation: MediaUploadOperation,
    }

    fn harness(
        renderer: Arc<dyn ArtifactRenderer>,
        registry: Option<Arc<dyn ArtifactRegistry>>,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let db = Database::open_in(&dir.path().join("data")).unwrap();
        let kv: Arc<dyn KvStore> = Arc::new(SqliteKvStore::new(db.clone()).unwrap());
        let last_result = Arc::new(LastResultCache::new(kv));
        let events = Arc::new(EventStore::new(db.clone()).unwrap());
        let registry: Arc<dyn ArtifactRegistry> = match registry {
            Some(registry) => registry,
            None => Arc::new(
                SqliteArtifactRegistry::new(db, uploads.clone(), "http://dr.example/uploads")
                    .unwrap(),
            ),
        };
        let operation = MediaUploadOperation::new(
            renderer,
            Arc::new(MediaStore::new(uploads.clone())),
            registry,
            last_result.clone(),
            events.clone(),
        );
        Harness {
            _dir: dir,
            uploads,
            last_result,
            events,
            operation,
        }
    }

    fn request(backend: &str) -> MediaUploadOperationRequest {
        MediaUploadOperationRequest {
            backend: BackendIdentity::new(backend),
            now: Utc.with_ymd_and_hms(2025, 2, 3, 4, 5, 6).unwrap(),
        }
    }

    fn files_under(dir: &Path) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let Ok(entries) = std::fs::read_dir(dir) else {
            return found;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                found.extend(files_under(&path));
            } else {
                found.push(path);
            }
        }
        found
    }

    #[tokio::test]
    async fn test_successful_upload() {
        let h = harness(Arc::new(StaticRenderer), None);

        let outcome = h.operation.run(request("wp-node-1")).await.unwrap();
        let MediaUploadOperationOutcome::Completed(result) = outcome else {
            panic!("expected completed outcome");
        };

        assert!(result.ok);
        assert_eq!(result.filename, "drd-upload-20250203-040506-wp-node-1.png");
        assert!(result.path.ends_with("2025/02/drd-upload-20250203-040506-wp-node-1.png"));
        assert_eq!(
            result.url.as_deref(),
            Some("http://dr.example/uploads/2025/02/drd-upload-20250203-040506-wp-node-1.png")
        );
        let expected = "fake-png:time_utc=2025-02-03T04:05:06+00:00 | backend=wp-node-1";
        assert_eq!(result.bytes, expected.len() as u64);
        assert_eq!(std::fs::read_to_string(&result.path).unwrap(), expected);

        let last = h.last_result.get().await.unwrap();
        assert_eq!(last.media_ok, Some(true));
        let summary = "2025-02-03T04:05:06+00:00 | drd-upload-20250203-040506-wp-node-1.png \
                       | backend=wp-node-1";
        assert_eq!(last.media_last.as_deref(), Some(summary));

        let event = &h.events.tail(1).unwrap()[0];
        assert_eq!(event.id, result.event_id);
        assert_eq!(event.action, ProbeAction::MediaUpload);
        assert!(event.ok);
        assert_eq!(event.details["filename"], result.filename.as_str());
        assert_eq!(event.details["attach_id"], result.attach_id);
        assert_eq!(event.details["bytes"], result.bytes);
    }

    #[tokio::test]
    async fn test_render_unavailable_fails_fast() {
        let h = harness(Arc::new(UnavailableRenderer), None);

        let outcome = h.operation.run(request("wp-node-1")).await.unwrap();
        assert!(!outcome.ok());
        let MediaUploadOperationOutcome::Failed(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.error, "render_unavailable");
        assert!(failure.message.contains("no image backend"));
        assert_eq!(failure.path, None);

        assert!(files_under(&h.uploads).is_empty());

        let event = &h.events.tail(1).unwrap()[0];
        assert!(!event.ok);
        assert_eq!(event.details["error"], "render_unavailable");
        assert!(event.details.get("url").is_none());

        assert_eq!(h.last_result.get().await.unwrap().media_ok, Some(false));
    }

    #[tokio::test]
    async fn test_registration_failure_removes_file() {
        let h = harness(Arc::new(StaticRenderer), Some(Arc::new(FailingRegistry)));

        let outcome = h.operation.run(request("wp-node-2")).await.unwrap();
        let MediaUploadOperationOutcome::Failed(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.error, "artifact_registration_failed");
        assert!(failure.path.as_deref().unwrap().ends_with(".png"));
        assert!(files_under(&h.uploads).is_empty());

        let event = &h.events.tail(1).unwrap()[0];
        assert!(!event.ok);
        assert_eq!(event.details["path"], failure.path.unwrap().as_str());
    }

    #[tokio::test]
    async fn test_missing_url_is_not_ok() {
        let h = harness(Arc::new(StaticRenderer), Some(Arc::new(UrlLessRegistry)));

        let outcome = h.operation.run(request("wp-node-3")).await.unwrap();
        let MediaUploadOperationOutcome::Completed(result) = outcome else {
            panic!("expected completed outcome");
        };
        assert!(!result.ok);
        assert_eq!(result.url, None);
        assert_eq!(result.attach_id, 7);
        assert!(!h.events.tail(1).unwrap()[0].ok);
        assert_eq!(h.last_result.get().await.unwrap().media_ok, Some(false));
    }

    #[tokio::test]
    async fn test_storage_location_failure() {
        let h = harness(Arc::new(StaticRenderer), None);
        std::fs::write(&h.uploads, b"not a directory").unwrap();

        let outcome = h.operation.run(request("wp-node-1")).await.unwrap();
        let MediaUploadOperationOutcome::Failed(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.error, "storage_location_unavailable");
        assert!(!h.events.tail(1).unwrap()[0].ok);
    }

    #[tokio::test]
    async fn test_write_failure_records_path() {
        let h = harness(Arc::new(StaticRenderer), None);
        // A directory squatting on the target name makes the write fail.
        let target = h
            .uploads
            .join("2025/02/drd-upload-20250203-040506-wp-node-1.png");
        std::fs::create_dir_all(&target).unwrap();

        let outcome = h.operation.run(request("wp-node-1")).await.unwrap();
        let MediaUploadOperationOutcome::Failed(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.error, "failed_write_file");
        let path = failure.path.clone().unwrap();
        assert_eq!(PathBuf::from(&path), target);
        assert!(files_under(&h.uploads).is_empty());

        let event = &h.events.tail(1).unwrap()[0];
        assert!(!event.ok);
        assert_eq!(event.id, failure.event_id);
        assert_eq!(event.details["error"], "failed_write_file");
        assert_eq!(event.details["path"], path.as_str());
        assert!(event.details.get("url").is_none());

        let last = h.last_result.get().await.unwrap();
        assert_eq!(last.media_ok, Some(false));
        assert_eq!(
            last.media_last.as_deref(),
            Some("2025-02-03T04:05:06+00:00 | error=failed_write_file | backend=wp-node-1")
        );
    }

    #[tokio::test]
    async fn test_same_second_upload_keeps_first_file() {
        let h = harness(Arc::new(StaticRenderer), None);

        let first = h.operation.run(request("wp-node-1")).await.unwrap();
        let MediaUploadOperationOutcome::Completed(first) = first else {
            panic!("expected completed outcome");
        };
        assert!(first.ok);

        let second = h.operation.run(request("wp-node-1")).await.unwrap();
        let MediaUploadOperationOutcome::Failed(failure) = second else {
            panic!("expected failure");
        };
        assert_eq!(failure.error, "failed_write_file");
        assert_eq!(failure.path.as_deref(), Some(first.path.as_str()));

        let files = files_under(&h.uploads);
        assert_eq!(files, vec![PathBuf::from(&first.path)]);
        let expected = "fake-png:time_utc=2025-02-03T04:05:06+00:00 | backend=wp-node-1";
        assert_eq!(std::fs::read_to_string(&first.path).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_hostile_backend_label_is_sanitized() {
        let h = harness(Arc::new(StaticRenderer), None);

        let outcome = h
            .operation
            .run(request("../../etc/pass wd ünï/node 7"))
            .await
            .unwrap();
        let MediaUploadOperationOutcome::Completed(result) = outcome else {
            panic!("expected completed outcome");
        };

        assert_eq!(result.filename, "drd-upload-20250203-040506-etcpasswdnnode7.png");
        let files = files_under(&h.uploads);
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with(h.uploads.join("2025/02")));
    }

    #[test]
    fn test_upload_filename_charset() {
        let now = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 58).unwrap();
        for backend in ["web 1", "a/b\\c", "nœud", "x;rm -rf", "", "node-01"] {
            let filename = upload_filename(now, &BackendIdentity::new(backend));
            let stem = filename.strip_suffix(".png").unwrap();
            assert!(
                stem.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'),
                "filename: {}",
                filename
            );
            assert!(filename.starts_with("drd-upload-20241231-235958-"));
        }
    }
}
