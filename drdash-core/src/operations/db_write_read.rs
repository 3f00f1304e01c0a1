use super::format_probe_timestamp;
use crate::{BackendIdentity, EventId, EventStore, KvStore, LastResultCache, ProbeAction, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// Key the consistency probe writes to and reads back from.
pub const DB_PROBE_KEY: &str = "drd_last_write_value";

/// Write-then-read round trip against the shared datastore.
///
/// The probe writes a value unique to this backend and instant, reads the
/// same key straight back and passes only if the bytes match. A mismatch
/// points at replication lag or a failed write on the node that served the
/// request.
#[derive(Clone)]
pub struct DbWriteReadOperation {
    kv: Arc<dyn KvStore>,
    last_result: Arc<LastResultCache>,
    events: Arc<EventStore>,
}

#[derive(Debug, Clone)]
pub struct DbWriteReadOperationRequest {
    pub backend: BackendIdentity,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DbWriteReadOperationResult {
    pub ok: bool,
    pub action: ProbeAction,
    pub written: String,
    pub read_back: String,
    pub backend: String,
    pub time_utc: String,
    pub event_id: EventId,
}

impl DbWriteReadOperation {
    pub fn new(
        kv: Arc<dyn KvStore>,
        last_result: Arc<LastResultCache>,
        events: Arc<EventStore>,
    ) -> Self {
        Self {
            kv,
            last_result,
            events,
        }
    }

    pub async fn run(
        &self,
        request: DbWriteReadOperationRequest,
    ) -> Result<DbWriteReadOperationResult> {
        let DbWriteReadOperationRequest { backend, now } = request;

        let time_utc = format_probe_timestamp(now);
        let written = format!("{} | backend={}", time_utc, backend);

        let write_acknowledged = match self.kv.set(DB_PROBE_KEY, &written).await {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!("DB probe write failed on backend {}: {}", backend, error);
                false
            }
        };

        let read_back = match self.kv.get(DB_PROBE_KEY).await {
            Ok(value) => value.unwrap_or_default(),
            Err(error) => {
                tracing::warn!("DB probe read-back failed on backend {}: {}", backend, error);
                String::new()
            }
        };

        let ok = read_back == written;

        if let Err(error) = self
            .last_result
            .set_db_outcome(ok, &written, backend.as_str())
            .await
        {
            tracing::error!("Failed to update last DB result: {}", error);
        }

        let event_id = self.events.append(
            ProbeAction::DbWriteRead,
            ok,
            backend.as_str(),
            Some(&json!({
                "written": written,
                "read_back": read_back,
                "write_acknowledged": write_acknowledged,
            })),
        )?;

        if ok {
            tracing::info!("DB write/read probe passed on backend {}", backend);
        } else {
            tracing::warn!(
                "DB write/read probe failed on backend {}: written={:?} read_back={:?}",
                backend,
                written,
                read_back
            );
        }

        Ok(DbWriteReadOperationResult {
            ok,
            action: ProbeAction::DbWriteRead,
            written,
            read_back,
            backend: backend.to_string(),
            time_utc,
            event_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DashError, Database, SqliteKvStore, UpdateFn};
    use async_trait::async_trait;
    use chrono::TimeZone;

    /// Key-value store whose probe key behaves like a lagging replica: writes
    /// to it are acknowledged but reads return a stale value.
    struct StaleProbeKey {
        inner: SqliteKvStore,
    }

    #[async_trait]
    impl KvStore for StaleProbeKey {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            if key == DB_PROBE_KEY {
                return Ok(Some("stale value".to_string()));
            }
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<()> {
            if key == DB_PROBE_KEY {
                return Ok(());
            }
            self.inner.set(key, value).await
        }

        async fn update(&self, key: &str, apply: &UpdateFn<'_>) -> Result<()> {
            self.inner.update(key, apply).await
        }
    }

    /// Key-value store whose probe key rejects writes.
    struct RejectingProbeKey {
        inner: SqliteKvStore,
    }

    #[async_trait]
    impl KvStore for RejectingProbeKey {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<()> {
            if key == DB_PROBE_KEY {
                return Err(DashError::Internal("read-only transaction".to_string()));
            }
            self.inner.set(key, value).await
        }

        async fn update(&self, key: &str, apply: &UpdateFn<'_>) -> Result<()> {
            self.inner.update(key, apply).await
        }
    }

    fn build(
        make_kv: impl FnOnce(SqliteKvStore) -> Arc<dyn KvStore>,
    ) -> (tempfile::TempDir, DbWriteReadOperation, Arc<LastResultCache>, Arc<EventStore>) {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = Database::open_in(temp_dir.path()).unwrap();
        let kv = make_kv(SqliteKvStore::new(db.clone()).unwrap());
        let last_result = Arc::new(LastResultCache::new(kv.clone()));
        let events = Arc::new(EventStore::new(db).unwrap());
        let operation = DbWriteReadOperation::new(kv, last_result.clone(), events.clone());
        (temp_dir, operation, last_result, events)
    }

    fn request(backend: &str) -> DbWriteReadOperationRequest {
        DbWriteReadOperationRequest {
            backend: BackendIdentity::new(backend),
            now: Utc.with_ymd_and_hms(2025, 6, 1, 8, 30, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_round_trip_passes() {
        let (_dir, operation, last_result, events) = build(|kv| Arc::new(kv) as Arc<dyn KvStore>);

        let result = operation.run(request("node2")).await.unwrap();

        assert!(result.ok);
        assert_eq!(result.written, "2025-06-01T08:30:00+00:00 | backend=node2");
        assert_eq!(result.read_back, result.written);
        assert_eq!(result.backend, "node2");
        assert_eq!(result.time_utc, "2025-06-01T08:30:00+00:00");

        let last = last_result.get().await.unwrap();
        assert_eq!(last.db_ok, Some(true));
        assert_eq!(last.db_last.as_deref(), Some(result.written.as_str()));
        assert_eq!(last.db_writer.as_deref(), Some("node2"));

        let tail = events.tail(1).unwrap();
        assert_eq!(tail[0].id, result.event_id);
        assert_eq!(tail[0].action, ProbeAction::DbWriteRead);
        assert!(tail[0].ok);
        assert_eq!(tail[0].backend, "node2");
        assert_eq!(tail[0].details["written"], result.written.as_str());
        assert_eq!(tail[0].details["write_acknowledged"], true);
    }

    #[tokio::test]
    async fn test_stale_read_fails_probe() {
        let (_dir, operation, last_result, events) =
            build(|kv| Arc::new(StaleProbeKey { inner: kv }) as Arc<dyn KvStore>);

        let result = operation.run(request("node3")).await.unwrap();

        assert!(!result.ok);
        assert_eq!(result.read_back, "stale value");

        let last = last_result.get().await.unwrap();
        assert_eq!(last.db_ok, Some(false));
        assert_eq!(last.db_writer.as_deref(), Some("node3"));

        let tail = events.tail(1).unwrap();
        assert!(!tail[0].ok);
        assert_eq!(tail[0].details["read_back"], "stale value");
    }

    #[tokio::test]
    async fn test_rejected_write_fails_probe() {
        let (_dir, operation, last_result, events) =
            build(|kv| Arc::new(RejectingProbeKey { inner: kv }) as Arc<dyn KvStore>);

        let result = operation.run(request("node1")).await.unwrap();

        assert!(!result.ok);
        assert_eq!(result.read_back, "");
        assert_eq!(last_result.get().await.unwrap().db_ok, Some(false));
        assert_eq!(events.tail(1).unwrap()[0].details["write_acknowledged"], false);
    }

    #[tokio::test]
    async fn test_later_probe_overwrites_earlier_value() {
        let (_dir, operation, last_result, events) = build(|kv| Arc::new(kv) as Arc<dyn KvStore>);

        let first = operation.run(request("node1")).await.unwrap();
        let second = operation
            .run(DbWriteReadOperationRequest {
                backend: BackendIdentity::new("node2"),
                now: Utc.with_ymd_and_hms(2025, 6, 1, 8, 31, 0).unwrap(),
            })
            .await
            .unwrap();

        assert!(first.ok && second.ok);
        assert!(second.event_id > first.event_id);
        let last = last_result.get().await.unwrap();
        assert_eq!(last.db_last.as_deref(), Some(second.written.as_str()));
        assert_eq!(last.db_writer.as_deref(), Some("node2"));
        assert_eq!(events.tail(20).unwrap().len(), 2);
    }
}
