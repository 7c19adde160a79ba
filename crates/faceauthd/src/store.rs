//! Registration persistence.
//!
//! Exactly one record per user id. An update keeps the record's original
//! position, so [`FaceStore::all_entries`] returns registrations in
//! first-registration order.

use async_trait::async_trait;
use faceauth_core::{FeatureVector, Registration};
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite connection: {0}")]
    Connection(#[from] tokio_rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid record for {user_id}: {reason}")]
    InvalidRecord { user_id: String, reason: String },
}

/// Whether an upsert created a new registration or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[async_trait]
pub trait FaceStore: Send + Sync {
    /// Insert or replace the vector registered for `user_id`.
    async fn upsert(&self, user_id: &str, vector: &FeatureVector) -> Result<UpsertOutcome, StoreError>;

    /// Every registration, in first-registration order.
    async fn all_entries(&self) -> Result<Vec<Registration>, StoreError>;

    /// Release the backend. Called once at shutdown.
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS faces (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     TEXT NOT NULL UNIQUE,
    dim         INTEGER NOT NULL,
    vector      BLOB NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
";

/// SQLite-backed store. All statements run on the connection's worker thread,
/// so concurrent upserts for one user id apply one after another.
pub struct SqliteFaceStore {
    conn: tokio_rusqlite::Connection,
}

impl SqliteFaceStore {
    /// Open or create the database at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let conn = tokio_rusqlite::Connection::open(path).await?;
        conn.call(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.execute_batch(SCHEMA_SQL)?;
            Ok(())
        })
        .await?;

        tracing::info!(path = %path.display(), "face store opened");
        Ok(Self { conn })
    }
}

#[async_trait]
impl FaceStore for SqliteFaceStore {
    async fn upsert(&self, user_id: &str, vector: &FeatureVector) -> Result<UpsertOutcome, StoreError> {
        let user_id = user_id.to_string();
        let dim = vector.len() as i64;
        let blob = encode_vector(vector);
        let now = chrono::Utc::now().to_rfc3339();

        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let existing: Option<i64> = tx
                    .query_row("SELECT seq FROM faces WHERE user_id = ?1", params![user_id], |row| row.get(0))
                    .optional()?;
                tx.execute(
                    "INSERT INTO faces (user_id, dim, vector, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)
                     ON CONFLICT(user_id) DO UPDATE SET
                        dim = excluded.dim,
                        vector = excluded.vector,
                        updated_at = excluded.updated_at",
                    params![user_id, dim, blob, now],
                )?;
                tx.commit()?;
                Ok(if existing.is_some() {
                    UpsertOutcome::Updated
                } else {
                    UpsertOutcome::Inserted
                })
            })
            .await?;

        Ok(outcome)
    }

    async fn all_entries(&self) -> Result<Vec<Registration>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT user_id, dim, vector FROM faces ORDER BY seq")?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, Vec<u8>>(2)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(user_id, dim, blob)| {
                let vector = decode_vector(&blob, dim).map_err(|reason| StoreError::InvalidRecord {
                    user_id: user_id.clone(),
                    reason,
                })?;
                Ok(Registration::new(user_id, vector))
            })
            .collect()
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.conn.clone().close().await?;
        tracing::info!("face store closed");
        Ok(())
    }
}

fn encode_vector(vector: &FeatureVector) -> Vec<u8> {
    vector.as_slice().iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8], dim: i64) -> Result<FeatureVector, String> {
    let expected = usize::try_from(dim)
        .ok()
        .and_then(|d| d.checked_mul(4))
        .ok_or_else(|| format!("invalid dimension {dim}"))?;
    if blob.len() != expected {
        return Err(format!("blob is {} bytes, expected {expected}", blob.len()));
    }
    let values = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(FeatureVector::new(values))
}

/// In-process store. Contents are lost when the process exits.
#[derive(Default)]
pub struct MemoryFaceStore {
    entries: RwLock<Vec<Registration>>,
}

impl MemoryFaceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FaceStore for MemoryFaceStore {
    async fn upsert(&self, user_id: &str, vector: &FeatureVector) -> Result<UpsertOutcome, StoreError> {
        let mut entries = self.entries.write().await;
        match entries.iter_mut().find(|r| r.user_id == user_id) {
            Some(existing) => {
                existing.vector = vector.clone();
                Ok(UpsertOutcome::Updated)
            }
            None => {
                entries.push(Registration::new(user_id, vector.clone()));
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn all_entries(&self) -> Result<Vec<Registration>, StoreError> {
        Ok(self.entries.read().await.clone())
    }
}
