//! Error types for the light client.
//!
//! Transient failures (`SourceUnavailable`, `HeightUnavailable`) are surfaced
//! for the caller to retry with its own backoff; nothing in this crate retries
//! silently.

use coinlight_core::{CheckpointError, DecodeError, KeyError, ProofError, VerificationError};
use std::time::Duration;
use thiserror::Error;

/// Failures talking to a checkpoint source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Source unavailable during {op}: {reason}")]
    Unavailable { op: &'static str, reason: String },

    #[error("Source call {op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("Height {height} not reached within {waited:?}")]
    HeightNotReached { height: u64, waited: Duration },
}

/// Failures reading or writing the persisted trust log.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Trust log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Trust log corrupt at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("Trust log mixes chains: {expected} and {got}")]
    ChainMismatch { expected: String, got: String },

    #[error("Trust log is empty")]
    Empty,
}

/// Why a checkpoint could not be trusted.
#[derive(Debug, Error)]
pub enum TrustError {
    #[error("Chain ID mismatch: trusting {expected}, checkpoint is for {got}")]
    ChainIdMismatch { expected: String, got: String },

    #[error("Cannot prove height {height}: {signed}/{total} voting power from the nearest trusted set")]
    InsufficientPower { height: u64, signed: u64, total: u64 },

    #[error("Height {height} already trusted with a different header ({trusted}, candidate {candidate})")]
    ConflictingCheckpoint {
        height: u64,
        trusted: String,
        candidate: String,
    },

    #[error("Height {height} is below the trust anchor at {anchor}")]
    BelowTrustAnchor { height: u64, anchor: u64 },

    #[error("Source returned height {got} when asked for {requested}")]
    WrongHeight { requested: u64, got: u64 },

    #[error("Invalid validator set for height {height}: {source}")]
    InvalidValidatorSet {
        height: u64,
        #[source]
        source: VerificationError,
    },

    #[error("Invalid commit at height {height}: {source}")]
    InvalidCommit {
        height: u64,
        #[source]
        source: VerificationError,
    },

    #[error("Restored trust anchor does not match the source: {0}")]
    AnchorMismatch(#[from] CheckpointError),

    #[error(transparent)]
    SourceUnavailable(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Certification cancelled")]
    Cancelled,
}

impl TrustError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TrustError::SourceUnavailable(_))
    }
}

/// Why a proof could not be fetched.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Height {height} is not available yet")]
    HeightUnavailable { height: u64 },

    #[error("Inconsistent proof response: {reason}")]
    Inconsistent { reason: String },

    #[error(transparent)]
    SourceUnavailable(#[from] SourceError),

    #[error("Fetch cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::HeightUnavailable { .. } | FetchError::SourceUnavailable(_)
        )
    }
}

/// Marker returned when a cancellation signal wins a race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cancelled")]
pub struct Cancelled;

impl From<Cancelled> for TrustError {
    fn from(_: Cancelled) -> Self {
        TrustError::Cancelled
    }
}

impl From<Cancelled> for FetchError {
    fn from(_: Cancelled) -> Self {
        FetchError::Cancelled
    }
}

/// Pipeline stage a query failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetching,
    Certifying,
    Validating,
    Decoding,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Fetching => "fetching",
            Stage::Certifying => "certifying",
            Stage::Validating => "validating",
            Stage::Decoding => "decoding",
        };
        f.write_str(name)
    }
}

/// The error a stage produced.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Trust(#[from] TrustError),

    #[error(transparent)]
    Proof(#[from] ProofError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// A failed query: which stage failed and why.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{stage} failed: {error}")]
    Stage {
        stage: Stage,
        #[source]
        error: StageError,
    },

    #[error("Invalid account address: {0}")]
    InvalidAddress(#[from] KeyError),
}

impl QueryError {
    pub fn at(stage: Stage, error: impl Into<StageError>) -> Self {
        QueryError::Stage {
            stage,
            error: error.into(),
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            QueryError::Stage { stage, .. } => Some(*stage),
            QueryError::InvalidAddress(_) => None,
        }
    }

    /// Whether retrying the whole query later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            QueryError::Stage {
                error: StageError::Fetch(e),
                ..
            } => e.is_retryable(),
            QueryError::Stage {
                error: StageError::Trust(e),
                ..
            } => e.is_retryable(),
            _ => false,
        }
    }

    /// True when a source served state that does not match a certified header.
    pub fn is_forgery(&self) -> bool {
        matches!(
            self,
            QueryError::Stage {
                error: StageError::Proof(ProofError::RootMismatch { .. }),
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_attached_to_message() {
        let err = QueryError::at(Stage::Fetching, FetchError::HeightUnavailable { height: 9 });
        assert_eq!(err.to_string(), "fetching failed: Height 9 is not available yet");
        assert_eq!(err.stage(), Some(Stage::Fetching));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_fatal_errors_not_retryable() {
        let mismatch = QueryError::at(
            Stage::Certifying,
            TrustError::ChainIdMismatch {
                expected: "a".into(),
                got: "b".into(),
            },
        );
        assert!(!mismatch.is_retryable());

        let forged = QueryError::at(
            Stage::Validating,
            ProofError::RootMismatch {
                computed: "00".into(),
                expected: "11".into(),
            },
        );
        assert!(!forged.is_retryable());
        assert!(forged.is_forgery());
    }

    #[test]
    fn test_source_errors_retryable() {
        let err = QueryError::at(
            Stage::Certifying,
            TrustError::SourceUnavailable(SourceError::Timeout {
                op: "commit",
                after: Duration::from_secs(1),
            }),
        );
        assert!(err.is_retryable());
    }
}
