use crate::error::{DashError, Result};
use bytes::Bytes;
use chrono::{DateTime, Datelike, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Directory on shared storage that receives an upload, `<base>/<YYYY>/<MM>`.
#[derive(Debug, Clone)]
pub struct UploadLocation {
    pub dir: PathBuf,
    pub subdir: String,
}

#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Shared upload storage (typically an NFS mount visible to every backend).
pub struct MediaStore {
    base_dir: PathBuf,
}

impl MediaStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub async fn resolve_location(&self, now: DateTime<Utc>) -> Result<UploadLocation> {
        let subdir = format!("{:04}/{:02}", now.year(), now.month());
        let dir = self.base_dir.join(&subdir);

        fs::create_dir_all(&dir).await.map_err(|error| {
            DashError::StorageLocation(format!(
                "unable to create upload directory {:?}: {}",
                dir, error
            ))
        })?;

        let metadata = fs::metadata(&dir).await.map_err(|error| {
            DashError::StorageLocation(format!(
                "unable to stat upload directory {:?}: {}",
                dir, error
            ))
        })?;
        if !metadata.is_dir() {
            return Err(DashError::StorageLocation(format!(
                "upload location {:?} is not a directory",
                dir
            )));
        }

        Ok(UploadLocation { dir, subdir })
    }

    /// Write `data` under `location`. Never replaces an existing file: if
    /// `filename` is already taken the write fails with `AlreadyExists`.
    ///
    /// The bytes land in a temporary file private to this call and are
    /// hard-linked into place, which is atomic and refuses an existing
    /// target even when another node wins the race.
    pub async fn write_artifact(
        &self,
        location: &UploadLocation,
        filename: &str,
        data: Bytes,
    ) -> Result<StoredArtifact> {
        let path = location.dir.join(filename);
        let temp_path = location.dir.join(temp_name(filename));

        let write = async {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&temp_path)
                .await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            drop(file);
            fs::hard_link(&temp_path, &path).await
        };
        let written = write.await;
        let _ = fs::remove_file(&temp_path).await;

        if let Err(source) = written {
            return Err(DashError::ArtifactWrite { path, source });
        }

        tracing::debug!("Stored artifact {:?} ({} bytes)", path, data.len());
        Ok(StoredArtifact {
            path,
            bytes: data.len() as u64,
        })
    }

    pub async fn exists(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    pub async fn remove(&self, path: &Path) -> Result<()> {
        if self.exists(path).await {
            fs::remove_file(path).await?;
        }
        Ok(())
    }
}

/// Hidden per-write name: `.<filename>.<pid>.<seq>.tmp`.
fn temp_name(filename: &str) -> String {
    format!(
        ".{}.{}.{}.tmp",
        filename,
        std::process::id(),
        TEMP_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}
