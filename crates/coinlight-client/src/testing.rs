//! An in-memory chain for driving the client end to end.
//!
//! Blocks are produced deterministically from a schedule of validator sets
//! and state writes, signed with real BLS keys, and served through
//! [`NodeClient`] with call counting and fault injection.

use crate::config::ClientConfig;
use crate::source::{NodeClient, NodeStatus};
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use coinlight_core::testing::{make_validators, sign_header, validator_set, TestValidator};
use coinlight_core::{
    encode_account, hash_validator_set, Account, Checkpoint, Header, Proof, ProofResponse,
    StateTree, ValidatorSet,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

pub const TEST_CHAIN_ID: &str = "coinlight-test";
pub const GENESIS_TIME: u64 = 1_700_000_000;

/// Client settings with short deadlines, suited to paused-clock tests.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        request_timeout_ms: 1_000,
        wait_timeout_ms: 2_000,
        poll_interval_ms: 10,
        ..ClientConfig::default()
    }
}

/// Schedule for a [`MockChain`].
#[derive(Clone, Debug)]
pub struct MockChainBuilder {
    chain_id: String,
    validators: BTreeMap<u64, Vec<TestValidator>>,
    state: BTreeMap<u64, Vec<(Vec<u8>, Vec<u8>)>>,
    signers: BTreeMap<u64, Vec<TestValidator>>,
    chain_ids: BTreeMap<u64, String>,
}

impl MockChainBuilder {
    /// `validators` sign every header from `height` until the next change.
    pub fn validators_from(mut self, height: u64, validators: Vec<TestValidator>) -> Self {
        self.validators.insert(height, validators);
        self
    }

    /// Write `key = value` into application state from `height` on.
    pub fn state_from(mut self, height: u64, key: Vec<u8>, value: Vec<u8>) -> Self {
        self.state.entry(height).or_default().push((key, value));
        self
    }

    pub fn account_from(self, height: u64, key: Vec<u8>, account: &Account) -> Self {
        self.state_from(height, key, encode_account(account))
    }

    /// Sign the commit at `height` with `signers` instead of the scheduled set.
    pub fn signed_by(mut self, height: u64, signers: Vec<TestValidator>) -> Self {
        self.signers.insert(height, signers);
        self
    }

    /// Make the header at `height` claim a different chain.
    pub fn chain_id_at(mut self, height: u64, chain_id: &str) -> Self {
        self.chain_ids.insert(height, chain_id.to_string());
        self
    }

    pub fn build(self, latest: u64) -> MockChain {
        MockChain {
            state: Mutex::new(ChainState {
                schedule: self,
                latest,
                blocks: BTreeMap::new(),
                unavailable: false,
                delay: Duration::ZERO,
                proof_tamper: None,
                commit_overrides: BTreeMap::new(),
            }),
            calls: CallCounts::default(),
        }
    }

    fn signers_at(&self, height: u64) -> &[TestValidator] {
        self.validators
            .range(..=height)
            .next_back()
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }

    fn set_at(&self, height: u64) -> ValidatorSet {
        validator_set(self.signers_at(height))
    }

    fn tree_at(&self, height: u64) -> StateTree {
        let mut tree = StateTree::new();
        for writes in self.state.range(..=height).map(|(_, w)| w) {
            for (key, value) in writes {
                tree.insert(key.clone(), value.clone());
            }
        }
        tree
    }

    fn produce(&self, height: u64) -> Checkpoint {
        let header = Header {
            chain_id: self
                .chain_ids
                .get(&height)
                .cloned()
                .unwrap_or_else(|| self.chain_id.clone()),
            height,
            time: GENESIS_TIME + height,
            app_hash: self.tree_at(height).root(),
            validators_hash: hash_validator_set(&self.set_at(height)),
            next_validators_hash: hash_validator_set(&self.set_at(height + 1)),
        };
        let signers = self
            .signers
            .get(&height)
            .map(Vec::as_slice)
            .unwrap_or_else(|| self.signers_at(height));
        let commit = sign_header(&header, signers);
        Checkpoint { header, commit }
    }
}

#[derive(Debug, Default)]
struct CallCounts {
    status: AtomicUsize,
    commit: AtomicUsize,
    validators: AtomicUsize,
    abci_query: AtomicUsize,
}

/// Requests served so far, per endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallSnapshot {
    pub status: usize,
    pub commit: usize,
    pub validators: usize,
    pub abci_query: usize,
}

impl CallSnapshot {
    /// Requests that fetch consensus data, the ones certification pays for.
    pub fn consensus(&self) -> usize {
        self.commit + self.validators
    }
}

type ProofTamper = Box<dyn Fn(&mut Proof) + Send>;

struct ChainState {
    schedule: MockChainBuilder,
    latest: u64,
    blocks: BTreeMap<u64, Checkpoint>,
    unavailable: bool,
    delay: Duration,
    proof_tamper: Option<ProofTamper>,
    commit_overrides: BTreeMap<u64, Checkpoint>,
}

impl ChainState {
    fn checkpoint(&mut self, height: u64) -> Checkpoint {
        let schedule = &self.schedule;
        self.blocks
            .entry(height)
            .or_insert_with(|| schedule.produce(height))
            .clone()
    }
}

pub struct MockChain {
    state: Mutex<ChainState>,
    calls: CallCounts,
}

impl MockChain {
    /// A chain of four equal-power validators and empty state.
    pub fn builder() -> MockChainBuilder {
        MockChainBuilder {
            chain_id: TEST_CHAIN_ID.to_string(),
            validators: BTreeMap::from([(0, make_validators(4, 0, 10))]),
            state: BTreeMap::new(),
            signers: BTreeMap::new(),
            chain_ids: BTreeMap::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().expect("mock chain lock poisoned")
    }

    pub fn chain_id(&self) -> String {
        self.lock().schedule.chain_id.clone()
    }

    pub fn latest(&self) -> u64 {
        self.lock().latest
    }

    pub fn advance_to(&self, height: u64) {
        let mut state = self.lock();
        state.latest = state.latest.max(height);
    }

    /// The block at `height`, without counting it as a request.
    pub fn checkpoint(&self, height: u64) -> Checkpoint {
        self.lock().checkpoint(height)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = delay;
    }

    /// Rewrite every proof before it is served.
    pub fn tamper_proofs(&self, tamper: impl Fn(&mut Proof) + Send + 'static) {
        self.lock().proof_tamper = Some(Box::new(tamper));
    }

    /// Answer the next commit request for `height` with `checkpoint`.
    pub fn serve_commit_once(&self, height: u64, checkpoint: Checkpoint) {
        self.lock().commit_overrides.insert(height, checkpoint);
    }

    pub fn calls(&self) -> CallSnapshot {
        CallSnapshot {
            status: self.calls.status.load(Ordering::SeqCst),
            commit: self.calls.commit.load(Ordering::SeqCst),
            validators: self.calls.validators.load(Ordering::SeqCst),
            abci_query: self.calls.abci_query.load(Ordering::SeqCst),
        }
    }

    async fn respond(&self, counter: &AtomicUsize) -> anyhow::Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        let (delay, unavailable) = {
            let state = self.lock();
            (state.delay, state.unavailable)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if unavailable {
            bail!("node unreachable");
        }
        Ok(())
    }
}

#[async_trait]
impl NodeClient for MockChain {
    async fn status(&self) -> anyhow::Result<NodeStatus> {
        self.respond(&self.calls.status).await?;
        Ok(NodeStatus {
            latest_height: self.latest(),
        })
    }

    async fn commit(&self, height: u64) -> anyhow::Result<Checkpoint> {
        self.respond(&self.calls.commit).await?;
        let mut state = self.lock();
        if height > state.latest {
            bail!("height {} not yet committed (latest {})", height, state.latest);
        }
        if let Some(checkpoint) = state.commit_overrides.remove(&height) {
            return Ok(checkpoint);
        }
        Ok(state.checkpoint(height))
    }

    async fn validators(&self, height: u64) -> anyhow::Result<ValidatorSet> {
        self.respond(&self.calls.validators).await?;
        let state = self.lock();
        if height > state.latest + 1 {
            bail!("no validator set for height {}", height);
        }
        Ok(state.schedule.set_at(height))
    }

    async fn abci_query(&self, key: &[u8], height: Option<u64>) -> anyhow::Result<ProofResponse> {
        self.respond(&self.calls.abci_query).await?;
        let state = self.lock();
        let height = height.unwrap_or(state.latest);
        if height > state.latest {
            bail!("height {} not yet committed (latest {})", height, state.latest);
        }
        let mut proof = state
            .schedule
            .tree_at(height)
            .prove(key, height)
            .ok_or_else(|| anyhow!("key {} not found", hex::encode(key)))?;
        if let Some(tamper) = &state.proof_tamper {
            tamper(&mut proof);
        }
        Ok(ProofResponse { height, proof })
    }
}
