//! Backend identity: the label of the node instance serving a request.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendIdentity(String);

impl BackendIdentity {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// Resolve the identity of this host. An explicit override wins, then the
    /// `HOSTNAME` environment variable, then the kernel hostname.
    pub fn resolve(override_name: Option<&str>) -> Self {
        if let Some(name) = override_name.map(str::trim).filter(|name| !name.is_empty()) {
            return Self::new(name);
        }

        if let Ok(name) = std::env::var("HOSTNAME") {
            let name = name.trim();
            if !name.is_empty() {
                return Self::new(name);
            }
        }

        match std::fs::read_to_string("/proc/sys/kernel/hostname") {
            Ok(name) if !name.trim().is_empty() => Self::new(name.trim()),
            _ => {
                tracing::warn!("Could not determine hostname; using 'unknown' backend identity");
                Self::new("unknown")
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identity reduced to `[A-Za-z0-9-]`, safe to embed in a filename.
    pub fn sanitized(&self) -> String {
        sanitize_label(&self.0)
    }
}

impl fmt::Display for BackendIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect()
}
