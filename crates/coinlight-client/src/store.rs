//! Append-only persistence for trusted checkpoints.
//!
//! One JSON-encoded [`TrustAnchor`] per line. Only the height, chain and
//! header hash are kept; full headers are re-fetched and checked against the
//! hash when trust is resumed.

use crate::error::StoreError;
use coinlight_core::TrustAnchor;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

pub struct TrustLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl TrustLog {
    /// Open for appending, creating the file if needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably record one anchor.
    pub async fn append(&self, anchor: &TrustAnchor) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(anchor).map_err(|e| StoreError::Corrupt {
            line: 0,
            reason: e.to_string(),
        })?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.sync_data().await?;
        debug!(height = anchor.height, path = %self.path.display(), "Trust anchor persisted");
        Ok(())
    }

    /// Read every anchor, ordered by height.
    ///
    /// A missing file reads as empty. Duplicate lines for the same header are
    /// collapsed; two different hashes at one height or a second chain ID
    /// make the log unusable.
    pub async fn load(path: impl AsRef<Path>) -> Result<Vec<TrustAnchor>, StoreError> {
        let contents = match tokio::fs::read_to_string(path.as_ref()).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut chain_id: Option<String> = None;
        let mut anchors: BTreeMap<u64, TrustAnchor> = BTreeMap::new();
        for (index, line) in contents.lines().enumerate() {
            let line_no = index + 1;
            if line.trim().is_empty() {
                continue;
            }
            let anchor: TrustAnchor =
                serde_json::from_str(line).map_err(|e| StoreError::Corrupt {
                    line: line_no,
                    reason: e.to_string(),
                })?;

            match &chain_id {
                Some(expected) if *expected != anchor.chain_id => {
                    return Err(StoreError::ChainMismatch {
                        expected: expected.clone(),
                        got: anchor.chain_id,
                    });
                }
                Some(_) => {}
                None => chain_id = Some(anchor.chain_id.clone()),
            }

            if let Some(existing) = anchors.get(&anchor.height) {
                if existing.header_hash != anchor.header_hash {
                    return Err(StoreError::Corrupt {
                        line: line_no,
                        reason: format!("conflicting header hash at height {}", anchor.height),
                    });
                }
                continue;
            }
            anchors.insert(anchor.height, anchor);
        }
        Ok(anchors.into_values().collect())
    }
}

#[cfg(test)]
impl TrustLog {
    /// Blocks appends until the guard is dropped.
    pub(crate) async fn hold(&self) -> tokio::sync::MutexGuard<'_, File> {
        self.file.lock().await
    }
}

impl std::fmt::Debug for TrustLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustLog").field("path", &self.path).finish()
    }
}
