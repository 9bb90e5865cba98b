//! Where untrusted chain data comes from.
//!
//! Nothing a [`CheckpointSource`] returns is believed until it passes
//! through the certifier or the proof validator.

pub mod cached;
pub mod network;

pub use cached::CachedSource;
pub use network::{NetworkSource, NodeClient, NodeStatus};

use crate::error::SourceError;
use async_trait::async_trait;
use coinlight_core::{Checkpoint, ProofResponse, QueryHeight, ValidatorSet};
use std::sync::Arc;
use std::time::Duration;

/// Provider of headers, commits, validator sets and state proofs.
#[async_trait]
pub trait CheckpointSource: Send + Sync {
    /// The validator set that signs headers at `height`.
    async fn validator_set(&self, height: u64) -> Result<ValidatorSet, SourceError>;

    /// The header at `height` and the commit that signs it.
    async fn commit(&self, height: u64) -> Result<Checkpoint, SourceError>;

    /// An inclusion proof for `key`, with the height it was read at.
    async fn proof(&self, key: &[u8], height: QueryHeight) -> Result<ProofResponse, SourceError>;

    /// Resolve once the chain has produced `height`, or fail with
    /// [`SourceError::HeightNotReached`] after `timeout`.
    async fn wait_for_height(&self, height: u64, timeout: Duration) -> Result<(), SourceError>;

    /// Forget anything remembered for `height`. Called when an answer for
    /// that height was rejected, so a retry goes back to the node.
    async fn invalidate(&self, _height: u64) {}
}

#[async_trait]
impl<S: CheckpointSource + ?Sized> CheckpointSource for Arc<S> {
    async fn validator_set(&self, height: u64) -> Result<ValidatorSet, SourceError> {
        (**self).validator_set(height).await
    }

    async fn commit(&self, height: u64) -> Result<Checkpoint, SourceError> {
        (**self).commit(height).await
    }

    async fn proof(&self, key: &[u8], height: QueryHeight) -> Result<ProofResponse, SourceError> {
        (**self).proof(key, height).await
    }

    async fn wait_for_height(&self, height: u64, timeout: Duration) -> Result<(), SourceError> {
        (**self).wait_for_height(height, timeout).await
    }

    async fn invalidate(&self, height: u64) {
        (**self).invalidate(height).await
    }
}
