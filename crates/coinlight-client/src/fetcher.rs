use crate::cancel::CancelToken;
use crate::config::ClientConfig;
use crate::error::{FetchError, SourceError};
use crate::source::CheckpointSource;
use coinlight_core::{Proof, QueryHeight};
use std::time::Duration;
use tracing::debug;

/// Retrieves state proofs. The proof is only checked for being an answer to
/// the question asked; its contents are validated later against a certified
/// header.
pub struct ProofFetcher<S> {
    source: S,
    wait_timeout: Duration,
}

impl<S: CheckpointSource> ProofFetcher<S> {
    pub fn new(source: S, config: &ClientConfig) -> Self {
        Self {
            source,
            wait_timeout: config.wait_timeout(),
        }
    }

    /// Fetch a proof for `key`. For an exact height, first waits for the
    /// chain to reach it.
    pub async fn fetch(
        &self,
        key: &[u8],
        height: QueryHeight,
        cancel: &CancelToken,
    ) -> Result<Proof, FetchError> {
        if let QueryHeight::At(h) = height {
            match cancel
                .guard(self.source.wait_for_height(h, self.wait_timeout))
                .await?
            {
                Ok(()) => {}
                Err(SourceError::HeightNotReached { height, .. }) => {
                    return Err(FetchError::HeightUnavailable { height });
                }
                Err(e) => return Err(e.into()),
            }
        }

        let response = cancel.guard(self.source.proof(key, height)).await??;
        let proof = response.proof;

        if proof.height != response.height {
            return Err(FetchError::Inconsistent {
                reason: format!(
                    "response height {} but proof height {}",
                    response.height, proof.height
                ),
            });
        }
        if let Some(requested) = height.exact() {
            if proof.height != requested {
                return Err(FetchError::Inconsistent {
                    reason: format!("asked for height {}, got {}", requested, proof.height),
                });
            }
        }
        if proof.key != key {
            return Err(FetchError::Inconsistent {
                reason: format!("proof is for key {}", hex::encode(&proof.key)),
            });
        }

        debug!(height = proof.height, key = %hex::encode(key), "Proof fetched");
        Ok(proof)
    }
}
