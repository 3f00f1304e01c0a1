use super::Database;
use crate::error::{DashError, Result};
use async_trait::async_trait;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ArtifactRegistration {
    pub path: PathBuf,
    pub title: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredArtifact {
    pub id: i64,
    /// Public URL; `None` when the artifact is not reachable through the
    /// public upload prefix.
    pub url: Option<String>,
}

/// Media-library registration for stored artifacts.
#[async_trait]
pub trait ArtifactRegistry: Send + Sync {
    async fn register(&self, registration: ArtifactRegistration) -> Result<RegisteredArtifact>;
}

/// Registry that records attachments in SQLite and derives public URLs from
/// the path relative to the upload base directory.
pub struct SqliteArtifactRegistry {
    db: Database,
    base_dir: PathBuf,
    base_url: String,
}

impl SqliteArtifactRegistry {
    pub fn new(db: Database, base_dir: PathBuf, base_url: impl Into<String>) -> Result<Self> {
        let registry = Self {
            db,
            base_dir,
            base_url: base_url.into(),
        };
        registry.init_schema()?;
        Ok(registry)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.db.connect()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS drd_attachments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                path TEXT NOT NULL,
                relative_path TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn relative_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.base_dir).ok()?;
        let components: Vec<String> = relative
            .components()
            .map(|component| component.as_os_str().to_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()?;
        if components.is_empty() {
            return None;
        }
        Some(components.join("/"))
    }

    fn public_url(&self, relative_path: &str) -> Option<String> {
        let base = self.base_url.trim_end_matches('/');
        if base.is_empty() {
            return None;
        }
        Some(format!("{}/{}", base, relative_path))
    }
}

#[async_trait]
impl ArtifactRegistry for SqliteArtifactRegistry {
    async fn register(&self, registration: ArtifactRegistration) -> Result<RegisteredArtifact> {
        let path_str = registration.path.to_str().ok_or_else(|| DashError::Registration {
            path: registration.path.clone(),
            reason: "path is not valid UTF-8".to_string(),
        })?;
        let relative_path = self.relative_path(&registration.path);

        let conn = self.db.connect()?;
        conn.execute(
            "INSERT INTO drd_attachments (title, mime_type, path, relative_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                registration.title,
                registration.mime_type,
                path_str,
                relative_path,
                chrono::Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|error| DashError::Registration {
            path: registration.path.clone(),
            reason: error.to_string(),
        })?;

        let id = conn.last_insert_rowid();
        let url = relative_path.as_deref().and_then(|rel| self.public_url(rel));

        Ok(RegisteredArtifact { id, url })
    }
}

pub fn mime_type_for(filename: &str) -> &'static str {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_registry(base_url: &str) -> (tempfile::TempDir, SqliteArtifactRegistry) {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = Database::open_in(&temp_dir.path().join("data")).unwrap();
        let registry =
            SqliteArtifactRegistry::new(db, temp_dir.path().join("uploads"), base_url).unwrap();
        (temp_dir, registry)
    }

    #[tokio::test]
    async fn test_register_assigns_ids_and_urls() {
        let (temp_dir, registry) = new_registry("http://dr.example/uploads/");
        let path = temp_dir.path().join("uploads/2025/03/drd-upload-a.png");

        let first = registry
            .register(ArtifactRegistration {
                path: path.clone(),
                title: "drd-upload-a.png".to_string(),
                mime_type: "image/png".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(
            first.url.as_deref(),
            Some("http://dr.example/uploads/2025/03/drd-upload-a.png")
        );

        let second = registry
            .register(ArtifactRegistration {
                path,
                title: "drd-upload-a.png".to_string(),
                mime_type: "image/png".to_string(),
            })
            .await
            .unwrap();
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn test_path_outside_uploads_has_no_url() {
        let (temp_dir, registry) = new_registry("http://dr.example/uploads");
        let registered = registry
            .register(ArtifactRegistration {
                path: temp_dir.path().join("elsewhere/x.png"),
                title: "x.png".to_string(),
                mime_type: "image/png".to_string(),
            })
            .await
            .unwrap();
        assert!(registered.id > 0);
        assert_eq!(registered.url, None);
    }

    #[test]
    fn test_mime_type_for() {
        assert_eq!(mime_type_for("drd-upload-x.png"), "image/png");
        assert_eq!(mime_type_for("photo.JPG"), "image/jpeg");
        assert_eq!(mime_type_for("noext"), "application/octet-stream");
    }
}
