use super::KvStore;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const LAST_RESULT_KEY: &str = "drd_last_result";

/// Most recent outcome of each probe type. `None` means the probe never ran.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_last: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_writer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_last: Option<String>,
}

/// Single-document cache of [`LastResult`], stored in the key-value store.
///
/// Writers only replace the field group of their own probe type. Each write
/// is one atomic [`KvStore::update`], so concurrent DB and media updates
/// from any node never drop each other's fields. The local lock only keeps
/// this process's writers from queueing on the store's write lock.
pub struct LastResultCache {
    kv: Arc<dyn KvStore>,
    write_lock: Mutex<()>,
}

impl LastResultCache {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn get(&self) -> Result<LastResult> {
        let raw = self.kv.get(LAST_RESULT_KEY).await?;
        Ok(decode(raw))
    }

    pub async fn set_db_outcome(&self, ok: bool, written_value: &str, writer: &str) -> Result<()> {
        self.update(|last| {
            last.db_ok = Some(ok);
            last.db_last = Some(written_value.to_string());
            last.db_writer = Some(writer.to_string());
        })
        .await
    }

    pub async fn set_media_outcome(&self, ok: bool, summary: &str) -> Result<()> {
        self.update(|last| {
            last.media_ok = Some(ok);
            last.media_last = Some(summary.to_string());
        })
        .await
    }

    async fn update<F>(&self, apply: F) -> Result<()>
    where
        F: Fn(&mut LastResult) + Send + Sync,
    {
        let _guard = self.write_lock.lock().await;

        self.kv
            .update(LAST_RESULT_KEY, &|raw| {
                let mut last = decode(raw);
                apply(&mut last);
                Ok(serde_json::to_string(&last)?)
            })
            .await
    }
}

fn decode(raw: Option<String>) -> LastResult {
    let Some(raw) = raw else {
        return LastResult::default();
    };

    match serde_json::from_str(&raw) {
        Ok(last) => last,
        Err(error) => {
            tracing::warn!("Discarding undecodable last result record: {}", error);
            LastResult::default()
        }
    }
}
