//! Extends trust from a known checkpoint to newer ones.
//!
//! A candidate is accepted when validators holding more than 2/3 of the
//! voting power of the nearest trusted checkpoint's next validator set
//! signed it. When too much power has rotated out for that, the certifier
//! bisects: it certifies the midpoint first and retries from there. Every
//! checkpoint admitted along the way was verified against an already
//! trusted one.

use crate::cancel::CancelToken;
use crate::config::ClientConfig;
use crate::error::TrustError;
use crate::source::CheckpointSource;
use crate::store::TrustLog;
use crate::trust::{TrustChain, TrustEntry, TrustedCheckpoint};
use coinlight_core::{
    check_validators_hash, hash_header, verify_commit, Checkpoint, TrustAnchor, ValidatorSet,
    VerificationError,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct Certifier<S> {
    source: S,
    trust: Arc<TrustChain>,
    max_bisection_depth: usize,
}

fn commit_error(height: u64, error: VerificationError) -> TrustError {
    match error {
        VerificationError::InsufficientPower { signed, total } => {
            TrustError::InsufficientPower {
                height,
                signed,
                total,
            }
        }
        source => TrustError::InvalidCommit { height, source },
    }
}

impl<S: CheckpointSource> Certifier<S> {
    pub fn new(source: S, trust: Arc<TrustChain>, config: &ClientConfig) -> Self {
        Self {
            source,
            trust,
            max_bisection_depth: config.max_bisection_depth,
        }
    }

    /// Start trusting the chain at `height`, as served by `source`.
    ///
    /// The seed is accepted on the caller's say-so; it is only checked for
    /// being signed by the validator set its own header names.
    pub async fn seed(source: &S, height: u64, log: Option<TrustLog>) -> Result<TrustChain, TrustError> {
        let checkpoint = source.commit(height).await?;
        if checkpoint.height() != height {
            return Err(TrustError::WrongHeight {
                requested: height,
                got: checkpoint.height(),
            });
        }
        let set = source.validator_set(height).await?;
        let checked = check_validators_hash(&set, &checkpoint.header.validators_hash)
            .map_err(|source| TrustError::InvalidValidatorSet { height, source })
            .and_then(|()| verify_commit(&checkpoint, &set).map_err(|e| commit_error(height, e)));
        let tally = match checked {
            Ok(tally) => tally,
            Err(e) => {
                source.invalidate(height).await;
                return Err(e);
            }
        };

        let seed = TrustedCheckpoint::anchored(checkpoint, Some(tally));
        Ok(TrustChain::seeded(seed, log).await?)
    }

    pub fn trust(&self) -> &Arc<TrustChain> {
        &self.trust
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// The trusted checkpoint at `height`, certifying it first if needed.
    /// Already-verified heights are answered without touching the source.
    pub async fn certified_at(
        &self,
        height: u64,
        cancel: &CancelToken,
    ) -> Result<Arc<TrustedCheckpoint>, TrustError> {
        match self.trust.get(height).await {
            Some(TrustEntry::Verified(trusted)) => Ok(trusted),
            Some(TrustEntry::Pinned(pin)) => self.restore(&pin, cancel).await,
            None => {
                if let Some(lowest) = self.trust.lowest_height().await {
                    if height < lowest {
                        return Err(TrustError::BelowTrustAnchor {
                            height,
                            anchor: lowest,
                        });
                    }
                }
                let candidate = self.fetch_commit(height, cancel).await?;
                self.certify(&candidate, cancel).await
            }
        }
    }

    /// Verify `candidate` against trust, bisecting as needed, and admit it.
    ///
    /// On any error trust is left as it was, except for intermediate
    /// checkpoints that were themselves fully verified.
    #[instrument(skip_all, fields(height = candidate.height()))]
    pub async fn certify(
        &self,
        candidate: &Checkpoint,
        cancel: &CancelToken,
    ) -> Result<Arc<TrustedCheckpoint>, TrustError> {
        self.check_chain_id(candidate)?;
        if let Some(trusted) = self.already_trusted(candidate).await? {
            return Ok(trusted);
        }

        let _extension = cancel.guard(self.trust.extension_lock()).await?;
        // Another certification may have covered this height while we waited.
        if let Some(trusted) = self.already_trusted(candidate).await? {
            debug!("Adopted concurrent certification");
            return Ok(trusted);
        }
        self.extend_to(candidate, cancel).await
    }

    fn check_chain_id(&self, checkpoint: &Checkpoint) -> Result<(), TrustError> {
        if checkpoint.chain_id() != self.trust.chain_id() {
            warn!(
                expected = self.trust.chain_id(),
                got = checkpoint.chain_id(),
                height = checkpoint.height(),
                "Checkpoint from another chain"
            );
            return Err(TrustError::ChainIdMismatch {
                expected: self.trust.chain_id().to_string(),
                got: checkpoint.chain_id().to_string(),
            });
        }
        Ok(())
    }

    async fn already_trusted(
        &self,
        candidate: &Checkpoint,
    ) -> Result<Option<Arc<TrustedCheckpoint>>, TrustError> {
        let height = candidate.height();
        let hash = hash_header(&candidate.header);
        match self.trust.get(height).await {
            Some(TrustEntry::Verified(trusted)) if trusted.header_hash == hash => Ok(Some(trusted)),
            Some(TrustEntry::Pinned(pin)) if pin.header_hash == hash => self
                .trust
                .insert(TrustedCheckpoint::anchored(candidate.clone(), None))
                .await
                .map(Some),
            Some(entry) => Err(TrustError::ConflictingCheckpoint {
                height,
                trusted: hex::encode(entry.header_hash()),
                candidate: hex::encode(hash),
            }),
            None => match self.trust.lowest_height().await {
                Some(lowest) if height < lowest => Err(TrustError::BelowTrustAnchor {
                    height,
                    anchor: lowest,
                }),
                _ => Ok(None),
            },
        }
    }

    /// Must be called with the extension lock held.
    async fn extend_to(
        &self,
        target: &Checkpoint,
        cancel: &CancelToken,
    ) -> Result<Arc<TrustedCheckpoint>, TrustError> {
        let mut midpoints: Vec<Checkpoint> = Vec::new();
        loop {
            let next = midpoints.last().unwrap_or(target);
            let height = next.height();
            let anchor = self.anchor_below(height, cancel).await?;
            let validators = self.validators_after(&anchor, cancel).await?;

            match verify_commit(next, &validators) {
                Ok(tally) => {
                    let checkpoint = midpoints.pop().unwrap_or_else(|| target.clone());
                    info!(
                        height,
                        anchor = anchor.height(),
                        signed = tally.signed_power,
                        total = tally.total_power,
                        "Checkpoint certified"
                    );
                    let trusted = self
                        .trust
                        .insert(TrustedCheckpoint::verified(checkpoint, tally, anchor.height()))
                        .await?;
                    if height == target.height() {
                        return Ok(trusted);
                    }
                }
                Err(VerificationError::InsufficientPower { signed, total }) => {
                    let anchor_height = anchor.height();
                    if height - anchor_height <= 1 || midpoints.len() >= self.max_bisection_depth {
                        warn!(
                            height,
                            anchor = anchor_height,
                            signed,
                            total,
                            depth = midpoints.len(),
                            "Cannot bridge validator change"
                        );
                        return Err(TrustError::InsufficientPower {
                            height,
                            signed,
                            total,
                        });
                    }
                    let mid = anchor_height + (height - anchor_height) / 2;
                    debug!(height, anchor = anchor_height, mid, "Bisecting");
                    let checkpoint = self.fetch_commit(mid, cancel).await?;
                    midpoints.push(checkpoint);
                }
                Err(e) => {
                    warn!(height, anchor = anchor.height(), error = %e, "Rejected commit");
                    self.source.invalidate(height).await;
                    return Err(commit_error(height, e));
                }
            }
        }
    }

    /// The nearest trusted checkpoint below `height`, with its header in hand.
    async fn anchor_below(
        &self,
        height: u64,
        cancel: &CancelToken,
    ) -> Result<Arc<TrustedCheckpoint>, TrustError> {
        match self.trust.latest_below(height).await {
            Some(TrustEntry::Verified(trusted)) => Ok(trusted),
            Some(TrustEntry::Pinned(pin)) => self.restore(&pin, cancel).await,
            None => Err(TrustError::BelowTrustAnchor {
                height,
                anchor: self.trust.lowest_height().await.unwrap_or(height),
            }),
        }
    }

    /// Re-fetch a pinned checkpoint and check it against the pinned hash.
    async fn restore(
        &self,
        pin: &TrustAnchor,
        cancel: &CancelToken,
    ) -> Result<Arc<TrustedCheckpoint>, TrustError> {
        let checkpoint = self.fetch_commit(pin.height, cancel).await?;
        if let Err(e) = pin.matches(&checkpoint) {
            self.source.invalidate(pin.height).await;
            return Err(e.into());
        }
        debug!(height = pin.height, "Pinned checkpoint restored");
        self.trust
            .insert(TrustedCheckpoint::anchored(checkpoint, None))
            .await
    }

    async fn fetch_commit(&self, height: u64, cancel: &CancelToken) -> Result<Checkpoint, TrustError> {
        let checkpoint = cancel.guard(self.source.commit(height)).await??;
        if checkpoint.height() != height {
            self.source.invalidate(height).await;
            return Err(TrustError::WrongHeight {
                requested: height,
                got: checkpoint.height(),
            });
        }
        self.check_chain_id(&checkpoint)?;
        Ok(checkpoint)
    }

    /// The validator set a trusted checkpoint committed to for the next height.
    async fn validators_after(
        &self,
        anchor: &TrustedCheckpoint,
        cancel: &CancelToken,
    ) -> Result<ValidatorSet, TrustError> {
        let height = anchor.height() + 1;
        let set = cancel.guard(self.source.validator_set(height)).await??;
        if let Err(source) = check_validators_hash(&set, &anchor.checkpoint.header.next_validators_hash) {
            self.source.invalidate(height).await;
            return Err(TrustError::InvalidValidatorSet { height, source });
        }
        Ok(set)
    }
}
