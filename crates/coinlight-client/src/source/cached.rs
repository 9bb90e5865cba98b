//! Memoizing wrapper around a checkpoint source.
//!
//! Commits and validator sets at a fixed height never change, so they are
//! kept in bounded in-memory maps. Proofs and height waits always go to the
//! wrapped source. A commit labelled with another height is passed through
//! uncached, and anything the certifier rejects is dropped via
//! [`CheckpointSource::invalidate`].

use super::CheckpointSource;
use crate::error::SourceError;
use async_trait::async_trait;
use coinlight_core::{Checkpoint, ProofResponse, QueryHeight, ValidatorSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, trace};

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub struct CachedSource<S> {
    inner: S,
    capacity: usize,
    commits: RwLock<BTreeMap<u64, Checkpoint>>,
    validators: RwLock<BTreeMap<u64, ValidatorSet>>,
    stats: RwLock<CacheStats>,
}

impl<S: CheckpointSource> CachedSource<S> {
    /// `capacity` bounds each map separately. Lowest heights are evicted first.
    pub fn new(inner: S, capacity: usize) -> Self {
        Self {
            inner,
            capacity: capacity.max(1),
            commits: RwLock::new(BTreeMap::new()),
            validators: RwLock::new(BTreeMap::new()),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub async fn stats(&self) -> CacheStats {
        self.stats.read().await.clone()
    }

    async fn record(&self, hit: bool) {
        let mut stats = self.stats.write().await;
        if hit {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
    }

    async fn store<T>(&self, map: &RwLock<BTreeMap<u64, T>>, height: u64, value: T) {
        let mut map = map.write().await;
        map.insert(height, value);
        let mut evicted = 0;
        while map.len() > self.capacity {
            map.pop_first();
            evicted += 1;
        }
        if evicted > 0 {
            self.stats.write().await.evictions += evicted;
        }
    }
}

#[async_trait]
impl<S: CheckpointSource> CheckpointSource for CachedSource<S> {
    async fn validator_set(&self, height: u64) -> Result<ValidatorSet, SourceError> {
        if let Some(set) = self.validators.read().await.get(&height).cloned() {
            trace!(height, "Validator set cache hit");
            self.record(true).await;
            return Ok(set);
        }
        self.record(false).await;
        let set = self.inner.validator_set(height).await?;
        self.store(&self.validators, height, set.clone()).await;
        Ok(set)
    }

    async fn commit(&self, height: u64) -> Result<Checkpoint, SourceError> {
        if let Some(checkpoint) = self.commits.read().await.get(&height).cloned() {
            trace!(height, "Commit cache hit");
            self.record(true).await;
            return Ok(checkpoint);
        }
        self.record(false).await;
        let checkpoint = self.inner.commit(height).await?;
        if checkpoint.height() == height {
            self.store(&self.commits, height, checkpoint.clone()).await;
        } else {
            debug!(height, got = checkpoint.height(), "Not caching commit for another height");
        }
        Ok(checkpoint)
    }

    async fn proof(&self, key: &[u8], height: QueryHeight) -> Result<ProofResponse, SourceError> {
        self.inner.proof(key, height).await
    }

    async fn wait_for_height(&self, height: u64, timeout: Duration) -> Result<(), SourceError> {
        self.inner.wait_for_height(height, timeout).await
    }

    async fn invalidate(&self, height: u64) {
        let commit = self.commits.write().await.remove(&height).is_some();
        let set = self.validators.write().await.remove(&height).is_some();
        if commit || set {
            debug!(height, "Dropped rejected answers from cache");
        }
        self.inner.invalidate(height).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::certifier::Certifier;
    use crate::error::TrustError;
    use crate::source::NetworkSource;
    use crate::testing::{test_config, MockChain};
    use std::sync::Arc;

    fn cached(chain: &Arc<MockChain>, capacity: usize) -> CachedSource<NetworkSource<Arc<MockChain>>> {
        CachedSource::new(NetworkSource::new(chain.clone(), &test_config()), capacity)
    }

    #[tokio::test]
    async fn test_repeated_commit_served_from_cache() {
        let chain = Arc::new(MockChain::builder().build(20));
        let source = cached(&chain, 8);

        let first = source.commit(5).await.unwrap();
        let second = source.commit(5).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(chain.calls().commit, 1);

        source.validator_set(6).await.unwrap();
        source.validator_set(6).await.unwrap();
        assert_eq!(chain.calls().validators, 1);

        let stats = source.stats().await;
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 2);
    }

    #[tokio::test]
    async fn test_lowest_heights_evicted() {
        let chain = Arc::new(MockChain::builder().build(20));
        let source = cached(&chain, 2);

        for height in [3, 7, 9] {
            source.commit(height).await.unwrap();
        }
        assert_eq!(source.stats().await.evictions, 1);

        source.commit(9).await.unwrap();
        source.commit(7).await.unwrap();
        assert_eq!(chain.calls().commit, 3);
        source.commit(3).await.unwrap();
        assert_eq!(chain.calls().commit, 4);
    }

    #[tokio::test]
    async fn test_failures_not_cached() {
        let chain = Arc::new(MockChain::builder().build(20));
        let source = cached(&chain, 8);

        chain.set_unavailable(true);
        assert!(source.commit(4).await.is_err());
        chain.set_unavailable(false);
        assert_eq!(source.commit(4).await.unwrap().height(), 4);
        assert_eq!(chain.calls().commit, 2);
    }

    type TestCertifier = Certifier<Arc<CachedSource<NetworkSource<Arc<MockChain>>>>>;

    async fn cached_certifier(chain: &Arc<MockChain>) -> TestCertifier {
        let source = Arc::new(cached(chain, 8));
        let trust = Certifier::seed(&source, 0, None).await.unwrap();
        Certifier::new(source, Arc::new(trust), &test_config())
    }

    #[tokio::test]
    async fn test_commit_for_other_height_not_cached() {
        let chain = Arc::new(MockChain::builder().build(20));
        let source = cached(&chain, 8);

        chain.serve_commit_once(10, chain.checkpoint(11));
        assert_eq!(source.commit(10).await.unwrap().height(), 11);
        assert_eq!(source.commit(10).await.unwrap().height(), 10);
        assert_eq!(chain.calls().commit, 2);
        assert_eq!(source.stats().await.hits, 0);
    }

    #[tokio::test]
    async fn test_wrong_height_retry_reaches_node() {
        let chain = Arc::new(MockChain::builder().build(20));
        let certifier = cached_certifier(&chain).await;
        let cancel = CancelToken::never();

        chain.serve_commit_once(10, chain.checkpoint(11));
        let err = certifier.certified_at(10, &cancel).await.unwrap_err();
        assert!(matches!(err, TrustError::WrongHeight { requested: 10, got: 11 }));

        let trusted = certifier.certified_at(10, &cancel).await.unwrap();
        assert_eq!(trusted.height(), 10);
    }

    #[tokio::test]
    async fn test_rejected_commit_evicted() {
        let chain = Arc::new(MockChain::builder().build(20));
        let certifier = cached_certifier(&chain).await;
        let cancel = CancelToken::never();

        let mut forged = chain.checkpoint(10);
        forged.commit = chain.checkpoint(11).commit;
        chain.serve_commit_once(10, forged);
        let err = certifier.certified_at(10, &cancel).await.unwrap_err();
        assert!(matches!(err, TrustError::InvalidCommit { height: 10, .. }));
        assert!(certifier.trust().get(10).await.is_none());

        let trusted = certifier.certified_at(10, &cancel).await.unwrap();
        assert_eq!(trusted.checkpoint, chain.checkpoint(10));
    }

    #[tokio::test]
    async fn test_invalidate_drops_both_maps() {
        let chain = Arc::new(MockChain::builder().build(20));
        let source = cached(&chain, 8);

        source.commit(6).await.unwrap();
        source.validator_set(6).await.unwrap();
        source.invalidate(6).await;
        source.commit(6).await.unwrap();
        source.validator_set(6).await.unwrap();
        assert_eq!(chain.calls().commit, 2);
        assert_eq!(chain.calls().validators, 2);
    }

    #[tokio::test]
    async fn test_proofs_never_cached() {
        let chain = Arc::new(
            MockChain::builder()
                .state_from(0, b"k".to_vec(), b"v".to_vec())
                .build(20),
        );
        let source = cached(&chain, 8);
        source.proof(b"k", QueryHeight::At(4)).await.unwrap();
        source.proof(b"k", QueryHeight::At(4)).await.unwrap();
        assert_eq!(chain.calls().abci_query, 2);
    }
}
