use crate::consensus::commit::hash_header;
use crate::types::chain::Checkpoint;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while handling trust anchors.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Header hash format invalid: {reason}")]
    InvalidFormat { reason: String },

    #[error("Trust anchor at height {height} expected header hash {expected}, got {actual}")]
    HashMismatch {
        height: u64,
        expected: String,
        actual: String,
    },

    #[error("Trust anchor belongs to chain {anchor}, checkpoint to {checkpoint}")]
    ChainMismatch { anchor: String, checkpoint: String },
}

/// The persisted form of a trusted checkpoint.
///
/// Small enough to log on every trust extension; the full header can be
/// re-fetched from any source later and checked against `header_hash`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustAnchor {
    pub height: u64,
    #[serde(with = "hash_hex")]
    pub header_hash: [u8; 32],
    pub chain_id: String,
}

impl TrustAnchor {
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        Self {
            height: checkpoint.header.height,
            header_hash: hash_header(&checkpoint.header),
            chain_id: checkpoint.header.chain_id.clone(),
        }
    }

    /// Check that a freshly fetched checkpoint is the one this anchor pinned.
    pub fn matches(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        if checkpoint.header.chain_id != self.chain_id {
            return Err(CheckpointError::ChainMismatch {
                anchor: self.chain_id.clone(),
                checkpoint: checkpoint.header.chain_id.clone(),
            });
        }
        let actual = hash_header(&checkpoint.header);
        if checkpoint.header.height != self.height || actual != self.header_hash {
            return Err(CheckpointError::HashMismatch {
                height: self.height,
                expected: hex::encode(self.header_hash),
                actual: hex::encode(actual),
            });
        }
        Ok(())
    }
}

/// Parse a hex-encoded header hash string.
pub fn parse_header_hash(hex_str: &str) -> Result<[u8; 32], CheckpointError> {
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);

    if hex_str.len() != 64 {
        return Err(CheckpointError::InvalidFormat {
            reason: format!("Expected 64 hex characters, got {}", hex_str.len()),
        });
    }

    let bytes = hex::decode(hex_str).map_err(|e| CheckpointError::InvalidFormat {
        reason: format!("Invalid hex: {}", e),
    })?;

    let mut result = [0u8; 32];
    result.copy_from_slice(&bytes);
    Ok(result)
}

mod hash_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(hash: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(hash))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_header_hash(&s).map_err(serde::de::Error::custom)
    }
}
