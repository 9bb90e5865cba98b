use super::CheckpointSource;
use crate::config::ClientConfig;
use crate::error::SourceError;
use async_trait::async_trait;
use coinlight_core::{Checkpoint, ProofResponse, QueryHeight, ValidatorSet};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Chain tip as reported by a node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub latest_height: u64,
}

/// Transport to a full node. Implementations own encoding and connection
/// handling; every answer is untrusted.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn status(&self) -> anyhow::Result<NodeStatus>;

    async fn commit(&self, height: u64) -> anyhow::Result<Checkpoint>;

    async fn validators(&self, height: u64) -> anyhow::Result<ValidatorSet>;

    /// Read `key` from application state with an inclusion proof.
    /// `None` asks for the latest height.
    async fn abci_query(&self, key: &[u8], height: Option<u64>) -> anyhow::Result<ProofResponse>;
}

#[async_trait]
impl<C: NodeClient + ?Sized> NodeClient for Arc<C> {
    async fn status(&self) -> anyhow::Result<NodeStatus> {
        (**self).status().await
    }

    async fn commit(&self, height: u64) -> anyhow::Result<Checkpoint> {
        (**self).commit(height).await
    }

    async fn validators(&self, height: u64) -> anyhow::Result<ValidatorSet> {
        (**self).validators(height).await
    }

    async fn abci_query(&self, key: &[u8], height: Option<u64>) -> anyhow::Result<ProofResponse> {
        (**self).abci_query(key, height).await
    }
}

/// A [`CheckpointSource`] backed by a remote node.
///
/// Every request carries a deadline; transport failures become
/// [`SourceError`]s and are never retried here.
pub struct NetworkSource<C> {
    client: C,
    request_timeout: Duration,
    poll_interval: Duration,
}

impl<C: NodeClient> NetworkSource<C> {
    pub fn new(client: C, config: &ClientConfig) -> Self {
        Self {
            client,
            request_timeout: config.request_timeout(),
            poll_interval: config.poll_interval(),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    async fn call<T, F>(&self, op: &'static str, request: F) -> Result<T, SourceError>
    where
        F: Future<Output = anyhow::Result<T>> + Send,
        T: Send,
    {
        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(op, error = %e, "Source request failed");
                Err(SourceError::Unavailable {
                    op,
                    reason: format!("{:#}", e),
                })
            }
            Err(_) => {
                warn!(op, timeout = ?self.request_timeout, "Source request timed out");
                Err(SourceError::Timeout {
                    op,
                    after: self.request_timeout,
                })
            }
        }
    }
}

#[async_trait]
impl<C: NodeClient> CheckpointSource for NetworkSource<C> {
    async fn validator_set(&self, height: u64) -> Result<ValidatorSet, SourceError> {
        self.call("validators", self.client.validators(height)).await
    }

    async fn commit(&self, height: u64) -> Result<Checkpoint, SourceError> {
        self.call("commit", self.client.commit(height)).await
    }

    async fn proof(&self, key: &[u8], height: QueryHeight) -> Result<ProofResponse, SourceError> {
        self.call("abci_query", self.client.abci_query(key, height.exact()))
            .await
    }

    async fn wait_for_height(&self, height: u64, timeout: Duration) -> Result<(), SourceError> {
        let poll = async {
            loop {
                let status = self.call("status", self.client.status()).await?;
                if status.latest_height >= height {
                    return Ok(());
                }
                debug!(height, latest = status.latest_height, "Waiting for height");
                tokio::time::sleep(self.poll_interval).await;
            }
        };
        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::HeightNotReached {
                height,
                waited: timeout,
            }),
        }
    }
}
