//! Verified state reads.
//!
//! A query runs four stages in order: fetch a proof, certify the header at
//! the proof's height, validate the proof against that header's app hash,
//! decode the value. A failure names the stage it happened in.
//!
//! Only the fetch stage waits for the chain. Once a proof is in hand its
//! height exists, so certification goes straight to the commit.

use crate::cancel::CancelToken;
use crate::certifier::Certifier;
use crate::config::ClientConfig;
use crate::error::{QueryError, Stage, TrustError};
use crate::fetcher::ProofFetcher;
use crate::source::{CachedSource, CheckpointSource, NetworkSource, NodeClient};
use crate::store::TrustLog;
use crate::trust::TrustChain;
use coinlight_core::{
    account_key, decode_account, parse_address, validate_proof, ProofError, QueryHeight,
    VerifiedAccount,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, Instrument};

/// A coin as handed to callers outside the library.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportCoin {
    pub denom: String,
    pub amount: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportAccount {
    pub coins: Vec<ExportCoin>,
}

/// The answer to an account lookup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountResult {
    pub height: u64,
    /// Hex-encoded storage key.
    pub key: String,
    pub account: ExportAccount,
}

impl From<VerifiedAccount> for AccountResult {
    fn from(verified: VerifiedAccount) -> Self {
        Self {
            height: verified.height,
            key: hex::encode(&verified.key),
            account: ExportAccount {
                coins: verified
                    .account
                    .coins
                    .into_iter()
                    .map(|c| ExportCoin {
                        denom: c.denom,
                        amount: c.amount,
                    })
                    .collect(),
            },
        }
    }
}

pub struct QueryFacade<S> {
    fetcher: ProofFetcher<Arc<S>>,
    certifier: Certifier<Arc<S>>,
}

impl<C: NodeClient> QueryFacade<CachedSource<NetworkSource<C>>> {
    /// A facade over a node: a network source behind a cache, with trust
    /// resumed from the configured trust log, or seeded at `seed_height`
    /// when there is no log yet.
    pub async fn connect(client: C, config: &ClientConfig, seed_height: u64) -> Result<Self, TrustError> {
        let source = Arc::new(CachedSource::new(
            NetworkSource::new(client, config),
            config.cache_capacity,
        ));

        let trust = match &config.trust_log {
            Some(path) => {
                if TrustLog::load(path).await?.is_empty() {
                    let log = TrustLog::open(path).await?;
                    Certifier::seed(&source, seed_height, Some(log)).await?
                } else {
                    TrustChain::resume(path).await?
                }
            }
            None => Certifier::seed(&source, seed_height, None).await?,
        };
        info!(
            chain_id = trust.chain_id(),
            latest = ?trust.latest_height().await,
            "Light client ready"
        );
        Ok(Self::new(source, Arc::new(trust), config))
    }
}

impl<S: CheckpointSource> QueryFacade<S> {
    pub fn new(source: Arc<S>, trust: Arc<TrustChain>, config: &ClientConfig) -> Self {
        Self {
            fetcher: ProofFetcher::new(source.clone(), config),
            certifier: Certifier::new(source, trust, config),
        }
    }

    pub fn trust(&self) -> &Arc<TrustChain> {
        self.certifier.trust()
    }

    pub fn certifier(&self) -> &Certifier<Arc<S>> {
        &self.certifier
    }

    /// Read and verify the account stored under `key`.
    pub async fn query(
        &self,
        key: &[u8],
        height: QueryHeight,
        cancel: &CancelToken,
    ) -> Result<VerifiedAccount, QueryError> {
        let span = info_span!("query", key = %hex::encode(key), %height);
        self.run(key, height, cancel).instrument(span).await
    }

    async fn run(
        &self,
        key: &[u8],
        height: QueryHeight,
        cancel: &CancelToken,
    ) -> Result<VerifiedAccount, QueryError> {
        debug!(stage = %Stage::Fetching, "Query stage");
        let proof = self
            .fetcher
            .fetch(key, height, cancel)
            .await
            .map_err(|e| QueryError::at(Stage::Fetching, e))?;

        debug!(stage = %Stage::Certifying, height = proof.height, "Query stage");
        let trusted = self
            .certifier
            .certified_at(proof.height, cancel)
            .await
            .map_err(|e| QueryError::at(Stage::Certifying, e))?;

        debug!(stage = %Stage::Validating, "Query stage");
        if let Err(e) = validate_proof(&proof, &trusted.checkpoint) {
            if let ProofError::RootMismatch { computed, expected } = &e {
                error!(
                    height = proof.height,
                    %computed,
                    %expected,
                    "Source served state that contradicts a certified header"
                );
            }
            return Err(QueryError::at(Stage::Validating, e));
        }

        debug!(stage = %Stage::Decoding, "Query stage");
        let account =
            decode_account(&proof.value).map_err(|e| QueryError::at(Stage::Decoding, e))?;

        Ok(VerifiedAccount {
            height: proof.height,
            key: proof.key,
            account,
        })
    }

    /// Look up an account by hex address at the latest height.
    pub async fn get_account(
        &self,
        address: &str,
        cancel: &CancelToken,
    ) -> Result<AccountResult, QueryError> {
        let address = parse_address(address)?;
        let key = account_key(&address);
        let verified = self.query(&key, QueryHeight::Latest, cancel).await?;
        Ok(verified.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;
    use crate::error::{FetchError, StageError};
    use crate::source::{CachedSource, NetworkSource};
    use crate::testing::{test_config, MockChain};
    use coinlight_core::testing::make_validators;
    use coinlight_core::{Account, Coin, DecodeError};
    use std::time::Duration;

    type TestSource = CachedSource<NetworkSource<Arc<MockChain>>>;

    const ALICE: &[u8] = b"acct:alice";

    fn alice() -> Account {
        Account {
            coins: vec![Coin::new("atom", 420)],
        }
    }

    async fn facade(chain: MockChain) -> (Arc<MockChain>, QueryFacade<TestSource>) {
        let config = test_config();
        let chain = Arc::new(chain);
        let source = Arc::new(CachedSource::new(
            NetworkSource::new(chain.clone(), &config),
            config.cache_capacity,
        ));
        let trust = Certifier::seed(&source, 0, None).await.unwrap();
        (chain.clone(), QueryFacade::new(source, Arc::new(trust), &config))
    }

    fn alice_chain(latest: u64) -> MockChain {
        MockChain::builder()
            .account_from(0, ALICE.to_vec(), &alice())
            .build(latest)
    }

    #[tokio::test]
    async fn test_query_at_height() {
        let (chain, facade) = facade(alice_chain(60)).await;
        let verified = facade
            .query(ALICE, QueryHeight::At(42), &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(verified.height, 42);
        assert_eq!(verified.key, ALICE);
        assert_eq!(verified.account.balance_of("atom"), 420);
        assert_eq!(facade.trust().heights().await, vec![0, 42]);
        // One status poll from the fetch stage, none from certification.
        assert_eq!(chain.calls().status, 1);
    }

    #[tokio::test]
    async fn test_query_latest_across_rotation() {
        let chain = MockChain::builder()
            .validators_from(51, make_validators(4, 100, 10))
            .account_from(0, ALICE.to_vec(), &alice())
            .account_from(
                80,
                ALICE.to_vec(),
                &Account {
                    coins: vec![Coin::new("atom", 7), Coin::new("uosmo", 3)],
                },
            )
            .build(100);
        let (_, facade) = facade(chain).await;

        let verified = facade
            .query(ALICE, QueryHeight::Latest, &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(verified.height, 100);
        assert_eq!(verified.account.balance_of("atom"), 7);
        assert_eq!(verified.account.balance_of("uosmo"), 3);
        assert_eq!(facade.trust().heights().await, vec![0, 50, 100]);
    }

    #[tokio::test]
    async fn test_forged_value_caught_at_validation() {
        let (chain, facade) = facade(alice_chain(60)).await;
        chain.tamper_proofs(|proof| {
            proof.value = coinlight_core::encode_account(&Account {
                coins: vec![Coin::new("atom", 1_000_000)],
            })
        });

        let err = facade
            .query(ALICE, QueryHeight::At(42), &CancelToken::never())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Validating));
        assert!(err.is_forgery());
        assert!(!err.is_retryable());
        // The header itself was genuine and stays trusted.
        assert!(facade.trust().get(42).await.is_some());
    }

    #[tokio::test]
    async fn test_non_account_value_fails_decoding() {
        let chain = MockChain::builder()
            .state_from(0, b"config".to_vec(), b"not an account".to_vec())
            .build(20);
        let (_, facade) = facade(chain).await;
        let err = facade
            .query(b"config", QueryHeight::At(10), &CancelToken::never())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QueryError::Stage {
                stage: Stage::Decoding,
                error: StageError::Decode(DecodeError::Malformed { .. })
            }
        ));
    }

    #[tokio::test]
    async fn test_foreign_header_fails_certification() {
        let chain = MockChain::builder()
            .account_from(0, ALICE.to_vec(), &alice())
            .chain_id_at(42, "evil-chain")
            .build(60);
        let (_, facade) = facade(chain).await;

        let err = facade
            .query(ALICE, QueryHeight::At(42), &CancelToken::never())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QueryError::Stage {
                stage: Stage::Certifying,
                error: StageError::Trust(TrustError::ChainIdMismatch { .. })
            }
        ));
        assert_eq!(facade.trust().heights().await, vec![0]);
    }

    #[tokio::test]
    async fn test_missing_key_fails_fetching() {
        let (_, facade) = facade(alice_chain(20)).await;
        let err = facade
            .query(b"acct:bob", QueryHeight::At(10), &CancelToken::never())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QueryError::Stage {
                stage: Stage::Fetching,
                error: StageError::Fetch(FetchError::SourceUnavailable(_))
            }
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_future_height_waits_for_chain() {
        let (chain, facade) = facade(alice_chain(30)).await;
        let producer = {
            let chain = chain.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                chain.advance_to(40);
            })
        };

        let verified = facade
            .query(ALICE, QueryHeight::At(35), &CancelToken::never())
            .await
            .unwrap();
        producer.await.unwrap();
        assert_eq!(verified.height, 35);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_query() {
        let (chain, facade) = facade(alice_chain(60)).await;
        chain.set_delay(Duration::from_millis(300));
        let (handle, token) = cancel_pair();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            handle.cancel();
        });
        // The status poll lands at 300ms; the proof request is cut short.
        let err = facade
            .query(ALICE, QueryHeight::At(42), &token)
            .await
            .unwrap_err();
        canceller.await.unwrap();
        assert!(matches!(
            err,
            QueryError::Stage {
                stage: Stage::Fetching,
                error: StageError::Fetch(FetchError::Cancelled)
            }
        ));
        assert!(!err.is_retryable());
        assert_eq!(facade.trust().heights().await, vec![0]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_queries_share_certification() {
        let chain = MockChain::builder()
            .account_from(0, ALICE.to_vec(), &alice())
            .account_from(0, b"acct:bob".to_vec(), &Account::default())
            .build(60);
        let (_, facade) = facade(chain).await;
        let cancel = CancelToken::never();

        let (a, b) = futures::join!(
            facade.query(ALICE, QueryHeight::At(42), &cancel),
            facade.query(b"acct:bob", QueryHeight::At(42), &cancel),
        );
        assert_eq!(a.unwrap().account.balance_of("atom"), 420);
        assert!(b.unwrap().account.coins.is_empty());
        assert_eq!(facade.trust().heights().await, vec![0, 42]);
    }

    #[tokio::test]
    async fn test_get_account_by_address() {
        let address = [0x42u8; 20];
        let chain = MockChain::builder()
            .account_from(0, account_key(&address), &alice())
            .build(25);
        let (_, facade) = facade(chain).await;

        let result = facade
            .get_account(&format!("0x{}", hex::encode(address)), &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(result.height, 25);
        assert_eq!(result.key, hex::encode(account_key(&address)));
        assert_eq!(
            result.account.coins,
            vec![ExportCoin {
                denom: "atom".into(),
                amount: 420
            }]
        );

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["account"]["coins"][0]["amount"], 420);
    }

    #[tokio::test]
    async fn test_connect_seeds_then_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trust.log");
        let config = ClientConfig {
            trust_log: Some(path.clone()),
            ..test_config()
        };
        let chain = Arc::new(alice_chain(60));

        {
            let facade = QueryFacade::connect(chain.clone(), &config, 0).await.unwrap();
            facade
                .query(ALICE, QueryHeight::At(42), &CancelToken::never())
                .await
                .unwrap();
        }

        let before = chain.calls();
        let facade = QueryFacade::connect(chain.clone(), &config, 0).await.unwrap();
        assert_eq!(chain.calls().consensus(), before.consensus());
        assert_eq!(facade.trust().heights().await, vec![0, 42]);

        let verified = facade
            .query(ALICE, QueryHeight::At(55), &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(verified.account.balance_of("atom"), 420);
        assert_eq!(facade.trust().heights().await, vec![0, 42, 55]);
    }

    #[tokio::test]
    async fn test_get_account_rejects_bad_address() {
        let (_, facade) = facade(alice_chain(5)).await;
        let err = facade
            .get_account("0xdead", &CancelToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidAddress(_)));
        assert_eq!(err.stage(), None);
    }
}
