use super::classify::{FetchOutcome, NodeStatus, classify_response};
use crate::error::{DashError, Result};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_millis(1500);
pub const PRIMARY_NOT_DETECTED: &str = "not_detected";

/// Reconciled view of the database cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterVerdict {
    /// `"<name> (<role>)"` of the first primary in endpoint order,
    /// [`PRIMARY_NOT_DETECTED`] if none, empty if no endpoints are configured.
    pub primary: String,
    /// One row per configured endpoint, in configured order.
    pub rows: Vec<NodeStatus>,
}

impl ClusterVerdict {
    pub fn from_rows(rows: Vec<NodeStatus>) -> Self {
        if rows.is_empty() {
            return Self {
                primary: String::new(),
                rows,
            };
        }

        let primary = rows
            .iter()
            .find(|row| row.is_primary() && !row.display_name().is_empty())
            .map(|row| format!("{} ({})", row.display_name(), row.role))
            .unwrap_or_else(|| PRIMARY_NOT_DETECTED.to_string());

        Self { primary, rows }
    }

    pub fn primary_detected(&self) -> bool {
        !self.primary.is_empty() && self.primary != PRIMARY_NOT_DETECTED
    }
}

/// Polls the configured node status endpoints concurrently and reduces the
/// answers to a [`ClusterVerdict`]. Peer failures never surface as errors.
#[derive(Clone)]
pub struct ClusterStatusReconciler {
    client: reqwest::Client,
    endpoints: Vec<String>,
    timeout: Duration,
}

impl ClusterStatusReconciler {
    pub fn new(endpoints: Vec<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|error| DashError::Http(error.to_string()))?;
        Ok(Self::with_client(client, endpoints, timeout))
    }

    pub fn with_client(client: reqwest::Client, endpoints: Vec<String>, timeout: Duration) -> Self {
        Self {
            client,
            endpoints,
            timeout,
        }
    }

    /// Host part of each configured endpoint, in configured order.
    pub fn endpoint_hosts(&self) -> Vec<String> {
        self.endpoints.iter().map(|url| endpoint_host(url)).collect()
    }

    pub async fn poll(&self) -> ClusterVerdict {
        // join_all yields results in input order regardless of completion order.
        let rows = join_all(self.endpoints.iter().map(|url| self.poll_endpoint(url))).await;
        let verdict = ClusterVerdict::from_rows(rows);

        if verdict.rows.is_empty() || verdict.primary_detected() {
            tracing::debug!(
                "Cluster poll finished: endpoints={} primary={}",
                verdict.rows.len(),
                verdict.primary
            );
        } else {
            tracing::warn!(
                "Cluster poll found no primary among {} endpoints",
                verdict.rows.len()
            );
        }
        verdict
    }

    async fn poll_endpoint(&self, url: &str) -> NodeStatus {
        let host = endpoint_host(url);
        let outcome = self.fetch(url).await;
        let row = classify_response(url, &host, outcome);
        tracing::debug!("Node {} reported role={} name={}", url, row.role, row.name);
        row
    }

    async fn fetch(&self, url: &str) -> FetchOutcome {
        let response = match self.client.get(url).timeout(self.timeout).send().await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!("Node status endpoint {} unreachable: {}", url, error);
                return FetchOutcome::Unreachable;
            }
        };

        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => FetchOutcome::Response { status, body },
            Err(error) => {
                tracing::warn!("Failed to read status body from {}: {}", url, error);
                FetchOutcome::Unreachable
            }
        }
    }
}

fn endpoint_host(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string))
        .unwrap_or_default()
}
