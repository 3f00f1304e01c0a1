use super::format_probe_timestamp;
use crate::{
    BackendIdentity, ClusterStatusReconciler, EventStore, LastResultCache, NodeStatus, ProbeEvent,
    Result,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

pub const DEFAULT_STATUS_EVENT_TAIL: usize = 20;

#[derive(Clone)]
pub struct StatusSnapshotOperation {
    last_result: Arc<LastResultCache>,
    reconciler: Arc<ClusterStatusReconciler>,
    events: Arc<EventStore>,
    event_tail: usize,
}

#[derive(Debug, Clone)]
pub struct StatusSnapshotOperationRequest {
    pub backend: BackendIdentity,
    /// Value of the frontend-identity request header, if present.
    pub frontend_header: Option<String>,
    /// Value of the backend-identity request header, if present.
    pub backend_header: Option<String>,
    pub now: DateTime<Utc>,
}

/// Everything the dashboard needs for one refresh.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub ok: bool,
    pub frontend_host: String,
    pub backend_host: String,
    pub backend_hdr: String,
    pub db_ok: Option<bool>,
    pub db_last: String,
    pub db_writer: String,
    pub media_ok: Option<bool>,
    pub media_last: String,
    pub patroni_primary: String,
    /// Hosts of the configured node endpoints, even when unreachable.
    pub patroni_hosts: Vec<String>,
    pub patroni_rows: Vec<NodeStatus>,
    pub events: Vec<ProbeEvent>,
    pub time_utc: String,
}

impl StatusSnapshotOperation {
    pub fn new(
        last_result: Arc<LastResultCache>,
        reconciler: Arc<ClusterStatusReconciler>,
        events: Arc<EventStore>,
    ) -> Self {
        Self {
            last_result,
            reconciler,
            events,
            event_tail: DEFAULT_STATUS_EVENT_TAIL,
        }
    }

    pub fn with_event_tail(mut self, event_tail: usize) -> Self {
        self.event_tail = event_tail;
        self
    }

    pub async fn run(&self, request: StatusSnapshotOperationRequest) -> Result<StatusSnapshot> {
        let StatusSnapshotOperationRequest {
            backend,
            frontend_header,
            backend_header,
            now,
        } = request;

        let (last, verdict) = tokio::join!(self.last_result.get(), self.reconciler.poll());
        let last = last?;
        let events = self.events.tail(self.event_tail)?;

        Ok(StatusSnapshot {
            ok: true,
            frontend_host: frontend_header.unwrap_or_default(),
            backend_host: backend.to_string(),
            backend_hdr: backend_header.unwrap_or_default(),
            db_ok: last.db_ok,
            db_last: last.db_last.unwrap_or_default(),
            db_writer: last.db_writer.unwrap_or_default(),
            media_ok: last.media_ok,
            media_last: last.media_last.unwrap_or_default(),
            patroni_primary: verdict.primary,
            patroni_hosts: self.reconciler.endpoint_hosts(),
            patroni_rows: verdict.rows,
            events,
            time_utc: format_probe_timestamp(now),
        })
    }
}
