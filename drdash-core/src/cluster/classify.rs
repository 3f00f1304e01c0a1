use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ROLE_UNREACHABLE: &str = "unreachable";
pub const ROLE_BAD_RESPONSE: &str = "bad_response";
pub const ROLE_INVALID_JSON: &str = "invalid_json";
pub const ROLE_UNKNOWN: &str = "unknown";

const PRIMARY_ROLE_MARKERS: [&str; 3] = ["primary", "leader", "master"];

/// One row of the cluster table, as reported by (or inferred for) a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub url: String,
    pub host: String,
    pub name: String,
    pub role: String,
    pub sync_standby: Option<bool>,
}

impl NodeStatus {
    fn sentinel(url: &str, host: &str, role: &str) -> Self {
        Self {
            url: url.to_string(),
            host: host.to_string(),
            name: String::new(),
            role: role.to_string(),
            sync_standby: None,
        }
    }

    pub fn is_primary(&self) -> bool {
        is_primary_role(&self.role)
    }

    /// Name if the node reported one, else the endpoint host.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.host
        } else {
            &self.name
        }
    }
}

/// Result of a single status call, before classification.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Connection failure or timeout.
    Unreachable,
    Response { status: u16, body: String },
}

/// Classify one endpoint's answer. Every input maps to exactly one row.
pub fn classify_response(url: &str, host: &str, outcome: FetchOutcome) -> NodeStatus {
    let (status, body) = match outcome {
        FetchOutcome::Unreachable => return NodeStatus::sentinel(url, host, ROLE_UNREACHABLE),
        FetchOutcome::Response { status, body } => (status, body),
    };

    if !(200..300).contains(&status) || body.is_empty() {
        return NodeStatus::sentinel(url, host, ROLE_BAD_RESPONSE);
    }

    let document = match serde_json::from_str::<Value>(&body) {
        Ok(Value::Object(map)) => map,
        _ => return NodeStatus::sentinel(url, host, ROLE_INVALID_JSON),
    };

    let role = document
        .get("role")
        .and_then(Value::as_str)
        .unwrap_or_default();
    // The node's own name sits under `patroni.name`, not at the top level.
    let name = document
        .get("patroni")
        .and_then(|patroni| patroni.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let sync_standby = document.get("sync_standby").and_then(Value::as_bool);

    NodeStatus {
        url: url.to_string(),
        host: host.to_string(),
        name: (if name.is_empty() { host } else { name }).to_string(),
        role: (if role.is_empty() { ROLE_UNKNOWN } else { role }).to_string(),
        sync_standby,
    }
}

pub fn is_primary_role(role: &str) -> bool {
    let role = role.to_ascii_lowercase();
    PRIMARY_ROLE_MARKERS
        .iter()
        .any(|marker| role.contains(marker))
}
