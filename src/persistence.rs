//! Explicit save/restore of a room's full state.
//!
//! Saving is a full overwrite keyed by room id. Nothing here takes part in
//! live propagation; the gateway calls a [`RoomStore`] only when a member asks
//! for it, and always with a snapshot taken outside the room lock.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::room::RoomSnapshot;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored room is unreadable: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    pub id: String,
    #[serde(flatten)]
    pub state: RoomSnapshot,
    pub saved_at: String,
}

impl RoomRecord {
    pub fn new(id: impl Into<String>, state: RoomSnapshot) -> Self {
        RoomRecord {
            id: id.into(),
            state,
            saved_at: Utc::now().to_rfc3339(),
        }
    }
}

#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn save(&self, record: &RoomRecord) -> Result<(), PersistenceError>;

    async fn load(&self, room_id: &str) -> Result<Option<RoomRecord>, PersistenceError>;
}

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, RoomRecord>>,
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn save(&self, record: &RoomRecord) -> Result<(), PersistenceError> {
        let mut records = self.records.write().await;
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn load(&self, room_id: &str) -> Result<Option<RoomRecord>, PersistenceError> {
        Ok(self.records.read().await.get(room_id).cloned())
    }
}

/// One JSON document per room. Room ids are caller-supplied, so file names are
/// the SHA-256 of the id rather than the id itself.
pub struct JsonFileStore {
    storage_path: PathBuf,
}

impl JsonFileStore {
    pub async fn open(storage_path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let storage_path = storage_path.as_ref().to_path_buf();
        fs::create_dir_all(&storage_path).await?;
        Ok(JsonFileStore { storage_path })
    }

    fn file_stem(room_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(room_id.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn record_path(&self, room_id: &str) -> PathBuf {
        self.storage_path
            .join(format!("{}.json", Self::file_stem(room_id)))
    }
}

#[async_trait]
impl RoomStore for JsonFileStore {
    async fn save(&self, record: &RoomRecord) -> Result<(), PersistenceError> {
        let body = serde_json::to_vec_pretty(record)?;
        let path = self.record_path(&record.id);
        let tmp = self.storage_path.join(format!(
            "{}.{}.tmp",
            Self::file_stem(&record.id),
            Uuid::new_v4()
        ));

        fs::write(&tmp, body).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn load(&self, room_id: &str) -> Result<Option<RoomRecord>, PersistenceError> {
        match fs::read(self.record_path(room_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
