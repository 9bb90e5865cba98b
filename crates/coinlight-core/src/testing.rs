//! Deterministic validators for tests and test doubles.
//!
//! Keys are derived from a numeric seed, so the same seed always yields the
//! same validator. Never use these keys outside of tests.

use crate::consensus::commit::{compute_signing_root, sha256_hash, BLS_DST};
use crate::types::chain::*;
use blst::min_pk::SecretKey;

/// A validator that holds its secret key and can sign headers.
#[derive(Clone)]
pub struct TestValidator {
    secret: SecretKey,
    pub public: BlsPublicKey,
    pub power: u64,
}

impl std::fmt::Debug for TestValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestValidator")
            .field("public", &hex::encode(self.public.0))
            .field("power", &self.power)
            .finish()
    }
}

impl TestValidator {
    pub fn new(seed: u64, power: u64) -> Self {
        let ikm = sha256_hash(&seed.to_le_bytes());
        let secret = SecretKey::key_gen(&ikm, &[]).expect("32-byte ikm is always accepted");
        let public = BlsPublicKey(secret.sk_to_pk().to_bytes());
        Self {
            secret,
            public,
            power,
        }
    }

    pub fn validator(&self) -> Validator {
        Validator {
            pub_key: self.public.clone(),
            voting_power: self.power,
        }
    }

    pub fn sign(&self, header: &Header) -> CommitSig {
        let root = compute_signing_root(header);
        let sig = self.secret.sign(&root, BLS_DST, &[]);
        CommitSig {
            validator: self.public.clone(),
            signature: BlsSignature(sig.to_bytes()),
        }
    }
}

/// `count` validators with seeds `first_seed..first_seed + count`, equal power.
pub fn make_validators(count: usize, first_seed: u64, power: u64) -> Vec<TestValidator> {
    (0..count as u64)
        .map(|i| TestValidator::new(first_seed + i, power))
        .collect()
}

pub fn validator_set(validators: &[TestValidator]) -> ValidatorSet {
    ValidatorSet::new(validators.iter().map(TestValidator::validator).collect())
}

/// A commit carrying one signature per given signer.
pub fn sign_header(header: &Header, signers: &[TestValidator]) -> Commit {
    Commit {
        signatures: signers.iter().map(|v| v.sign(header)).collect(),
    }
}
