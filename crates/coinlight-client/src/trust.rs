//! The set of checkpoints the client believes.
//!
//! Entries are keyed by height and never removed or replaced. A height is
//! either fully verified (header and commit in memory) or pinned by hash
//! only, as restored from a [`TrustLog`]; a pinned entry is upgraded the
//! first time its header is fetched and matches.

use crate::error::{StoreError, TrustError};
use crate::store::TrustLog;
use coinlight_core::{hash_header, Checkpoint, CommitTally, TrustAnchor};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info};

/// A checkpoint held in trust, with the evidence it was admitted on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrustedCheckpoint {
    pub checkpoint: Checkpoint,
    pub header_hash: [u8; 32],
    /// Signatures counted when the commit was verified. `None` for a
    /// restored checkpoint that was matched against its pinned hash.
    pub tally: Option<CommitTally>,
    /// Height of the trusted checkpoint whose validator set admitted this one.
    /// `None` for seeds and restored checkpoints.
    pub verified_from: Option<u64>,
}

impl TrustedCheckpoint {
    pub fn verified(checkpoint: Checkpoint, tally: CommitTally, verified_from: u64) -> Self {
        Self {
            header_hash: hash_header(&checkpoint.header),
            checkpoint,
            tally: Some(tally),
            verified_from: Some(verified_from),
        }
    }

    /// A checkpoint trusted out of band: a seed, or one matching a pinned hash.
    pub fn anchored(checkpoint: Checkpoint, tally: Option<CommitTally>) -> Self {
        Self {
            header_hash: hash_header(&checkpoint.header),
            checkpoint,
            tally,
            verified_from: None,
        }
    }

    pub fn height(&self) -> u64 {
        self.checkpoint.height()
    }

    pub fn anchor(&self) -> TrustAnchor {
        TrustAnchor {
            height: self.height(),
            header_hash: self.header_hash,
            chain_id: self.checkpoint.header.chain_id.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub enum TrustEntry {
    Verified(Arc<TrustedCheckpoint>),
    Pinned(TrustAnchor),
}

impl TrustEntry {
    pub fn height(&self) -> u64 {
        match self {
            TrustEntry::Verified(t) => t.height(),
            TrustEntry::Pinned(a) => a.height,
        }
    }

    pub fn header_hash(&self) -> [u8; 32] {
        match self {
            TrustEntry::Verified(t) => t.header_hash,
            TrustEntry::Pinned(a) => a.header_hash,
        }
    }
}

/// Trusted checkpoints for one chain.
///
/// Reads are concurrent. Extending trust is serialized through
/// [`TrustChain::extension_lock`], so two certifications never verify the
/// same stretch of chain twice.
pub struct TrustChain {
    chain_id: String,
    entries: RwLock<BTreeMap<u64, TrustEntry>>,
    extension: Mutex<()>,
    log: Option<TrustLog>,
}

impl TrustChain {
    /// Trust `seed` unconditionally. It is the root every later
    /// certification hangs from.
    pub async fn seeded(seed: TrustedCheckpoint, log: Option<TrustLog>) -> Result<Self, StoreError> {
        if let Some(log) = &log {
            log.append(&seed.anchor()).await?;
        }
        info!(
            chain_id = %seed.checkpoint.header.chain_id,
            height = seed.height(),
            header_hash = %hex::encode(seed.header_hash),
            "Trust seeded"
        );
        let chain_id = seed.checkpoint.header.chain_id.clone();
        let entries = BTreeMap::from([(seed.height(), TrustEntry::Verified(Arc::new(seed)))]);
        Ok(Self::from_entries(chain_id, entries, log))
    }

    /// Rebuild trust from a persisted log. Every entry comes back pinned.
    pub async fn resume(path: impl AsRef<std::path::Path>) -> Result<Self, StoreError> {
        let anchors = TrustLog::load(path.as_ref()).await?;
        let chain_id = anchors
            .first()
            .map(|a| a.chain_id.clone())
            .ok_or(StoreError::Empty)?;
        info!(
            %chain_id,
            anchors = anchors.len(),
            path = %path.as_ref().display(),
            "Trust resumed from log"
        );
        let entries = anchors
            .into_iter()
            .map(|a| (a.height, TrustEntry::Pinned(a)))
            .collect();
        let log = TrustLog::open(path).await?;
        Ok(Self::from_entries(chain_id, entries, Some(log)))
    }

    fn from_entries(chain_id: String, entries: BTreeMap<u64, TrustEntry>, log: Option<TrustLog>) -> Self {
        Self {
            chain_id,
            entries: RwLock::new(entries),
            extension: Mutex::new(()),
            log,
        }
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub async fn get(&self, height: u64) -> Option<TrustEntry> {
        self.entries.read().await.get(&height).cloned()
    }

    /// The highest trusted entry strictly below `height`.
    pub async fn latest_below(&self, height: u64) -> Option<TrustEntry> {
        self.entries
            .read()
            .await
            .range(..height)
            .next_back()
            .map(|(_, e)| e.clone())
    }

    pub async fn lowest_height(&self) -> Option<u64> {
        self.entries.read().await.keys().next().copied()
    }

    pub async fn latest_height(&self) -> Option<u64> {
        self.entries.read().await.keys().next_back().copied()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn heights(&self) -> Vec<u64> {
        self.entries.read().await.keys().copied().collect()
    }

    /// Every entry held with its full header, in height order.
    pub async fn verified(&self) -> Vec<Arc<TrustedCheckpoint>> {
        self.entries
            .read()
            .await
            .values()
            .filter_map(|e| match e {
                TrustEntry::Verified(t) => Some(t.clone()),
                TrustEntry::Pinned(_) => None,
            })
            .collect()
    }

    /// Held by whoever is extending trust.
    pub async fn extension_lock(&self) -> MutexGuard<'_, ()> {
        self.extension.lock().await
    }

    /// Admit a checkpoint. Returns the entry now held at its height.
    ///
    /// Idempotent for an identical header. A pinned entry with the same hash
    /// is upgraded in place. A different header at a trusted height is a
    /// [`TrustError::ConflictingCheckpoint`] and leaves trust untouched.
    ///
    /// New heights are written to the log before they become visible. The
    /// entry map is not locked during that write, so callers adding new
    /// heights should hold [`TrustChain::extension_lock`].
    pub async fn insert(&self, trusted: TrustedCheckpoint) -> Result<Arc<TrustedCheckpoint>, TrustError> {
        if trusted.checkpoint.header.chain_id != self.chain_id {
            return Err(TrustError::ChainIdMismatch {
                expected: self.chain_id.clone(),
                got: trusted.checkpoint.header.chain_id.clone(),
            });
        }

        let height = trusted.height();
        let is_new = match self.get(height).await {
            Some(existing) if existing.header_hash() != trusted.header_hash => {
                return Err(conflict(height, &existing, &trusted));
            }
            Some(TrustEntry::Verified(existing)) => return Ok(existing),
            Some(TrustEntry::Pinned(_)) => false,
            None => true,
        };
        if is_new {
            if let Some(log) = &self.log {
                log.append(&trusted.anchor()).await?;
            }
        }

        let mut entries = self.entries.write().await;
        match entries.get(&height).cloned() {
            Some(existing) if existing.header_hash() != trusted.header_hash => {
                Err(conflict(height, &existing, &trusted))
            }
            Some(TrustEntry::Verified(existing)) => Ok(existing),
            Some(TrustEntry::Pinned(_)) => {
                debug!(height, "Pinned checkpoint upgraded");
                let trusted = Arc::new(trusted);
                entries.insert(height, TrustEntry::Verified(trusted.clone()));
                Ok(trusted)
            }
            None => {
                debug!(height, header_hash = %hex::encode(trusted.header_hash), "Checkpoint trusted");
                let trusted = Arc::new(trusted);
                entries.insert(height, TrustEntry::Verified(trusted.clone()));
                Ok(trusted)
            }
        }
    }
}

fn conflict(height: u64, existing: &TrustEntry, candidate: &TrustedCheckpoint) -> TrustError {
    TrustError::ConflictingCheckpoint {
        height,
        trusted: hex::encode(existing.header_hash()),
        candidate: hex::encode(candidate.header_hash),
    }
}

impl std::fmt::Debug for TrustChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustChain")
            .field("chain_id", &self.chain_id)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}
