use crate::types::chain::*;
use bitvec::prelude::*;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Domain separation tag for validator BLS signatures (proof-of-possession scheme).
pub const BLS_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

/// Errors that can occur while verifying a commit against a validator set.
/// Each variant is a specific, actionable failure.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("Insufficient voting power: {signed}/{total} signed (need more than 2/3)")]
    InsufficientPower { signed: u64, total: u64 },

    #[error("Invalid BLS signature: the aggregate signature does not verify against the counted signers")]
    InvalidSignature,

    #[error("Invalid BLS public key at index {index}: {reason}")]
    InvalidPublicKey { index: usize, reason: String },

    #[error("Validator set is empty")]
    EmptyValidatorSet,

    #[error("Validator set total voting power is zero")]
    ZeroTotalPower,

    #[error("Validator set total voting power overflows u64")]
    PowerOverflow,

    #[error("Duplicate validator public key at index {index}")]
    DuplicateValidator { index: usize },

    #[error("Validator set hash mismatch: header commits to {expected}, set hashes to {computed}")]
    ValidatorsHashMismatch { expected: String, computed: String },

    #[error("BLS aggregation error: {0}")]
    BlsError(String),
}

/// Outcome of counting a commit's signatures against a validator set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitTally {
    /// Voting power of distinct, known validators that signed.
    pub signed_power: u64,
    /// Total voting power of the set.
    pub total_power: u64,
    /// Indices into the commit's signature list that were counted.
    pub counted: Vec<usize>,
}

impl CommitTally {
    pub fn is_supermajority(&self) -> bool {
        exceeds_two_thirds(self.signed_power, self.total_power)
    }
}

/// `signed > 2/3 * total`, computed without rounding or overflow.
pub fn exceeds_two_thirds(signed: u64, total: u64) -> bool {
    (signed as u128) * 3 > (total as u128) * 2
}

/// Compute the signing domain for a chain.
/// domain = domain_type + sha256(chain_id)[:28]
pub fn compute_domain(chain_id: &str) -> [u8; 32] {
    let chain_root = sha256_hash(chain_id.as_bytes());
    let mut domain = [0u8; 32];
    domain[..4].copy_from_slice(&DOMAIN_COMMIT);
    domain[4..].copy_from_slice(&chain_root[..28]);
    domain
}

/// Compute the signing root for a header.
/// Validators sign this, not the header directly: the header root wrapped in
/// the chain's signing domain, so a commit cannot be replayed on another chain.
pub fn compute_signing_root(header: &Header) -> [u8; 32] {
    let header_root = hash_header(header);
    let domain = compute_domain(&header.chain_id);
    sha256_pair(&header_root, &domain)
}

/// Hash a header by merkleizing its fields.
pub fn hash_header(header: &Header) -> [u8; 32] {
    // 6 leaves -> pad to 8:
    // [chain_id, height, time, app_hash, validators_hash, next_validators_hash, 0, 0]
    let chain_leaf = sha256_hash(header.chain_id.as_bytes());
    let height_leaf = uint64_to_leaf(header.height);
    let time_leaf = uint64_to_leaf(header.time);
    let zero = [0u8; 32];

    let h01 = sha256_pair(&chain_leaf, &height_leaf);
    let h23 = sha256_pair(&time_leaf, &header.app_hash);
    let h45 = sha256_pair(&header.validators_hash, &header.next_validators_hash);
    let h67 = sha256_pair(&zero, &zero);

    let h0123 = sha256_pair(&h01, &h23);
    let h4567 = sha256_pair(&h45, &h67);

    sha256_pair(&h0123, &h4567)
}

/// Commitment to an ordered validator set.
pub fn hash_validator_set(set: &ValidatorSet) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update((set.validators.len() as u64).to_be_bytes());
    for v in &set.validators {
        hasher.update(v.pub_key.0);
        hasher.update(v.voting_power.to_be_bytes());
    }
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Check the structural invariants of a validator set and return its total power.
pub fn validate_validator_set(set: &ValidatorSet) -> Result<u64, VerificationError> {
    if set.is_empty() {
        return Err(VerificationError::EmptyValidatorSet);
    }

    for (i, v) in set.validators.iter().enumerate() {
        if set.validators[..i].iter().any(|w| w.pub_key == v.pub_key) {
            return Err(VerificationError::DuplicateValidator { index: i });
        }
    }

    let total = set.total_power().ok_or(VerificationError::PowerOverflow)?;
    if total == 0 {
        return Err(VerificationError::ZeroTotalPower);
    }
    Ok(total)
}

/// Check that a validator set is the one a header committed to.
pub fn check_validators_hash(
    set: &ValidatorSet,
    expected: &[u8; 32],
) -> Result<(), VerificationError> {
    let computed = hash_validator_set(set);
    if &computed != expected {
        return Err(VerificationError::ValidatorsHashMismatch {
            expected: hex::encode(expected),
            computed: hex::encode(computed),
        });
    }
    Ok(())
}

/// Count the voting power behind a commit.
///
/// Signatures from keys outside the set are ignored, and each validator is
/// counted at most once no matter how many times it appears in the commit.
/// Signatures are not checked here; see [`verify_commit`].
pub fn tally_commit(commit: &Commit, set: &ValidatorSet) -> Result<CommitTally, VerificationError> {
    let total_power = validate_validator_set(set)?;

    let mut seen = bitvec![0; set.len()];
    let mut signed_power: u64 = 0;
    let mut counted = Vec::new();

    for (i, sig) in commit.signatures.iter().enumerate() {
        let Some(index) = set.index_of(&sig.validator) else {
            continue;
        };
        if seen[index] {
            continue;
        }
        seen.set(index, true);
        // Cannot overflow: bounded by total_power which was checked above.
        signed_power += set.validators[index].voting_power;
        counted.push(i);
    }

    Ok(CommitTally {
        signed_power,
        total_power,
        counted,
    })
}

/// Verify a checkpoint's commit against a trusted validator set.
///
/// Requires more than 2/3 of the set's voting power to have signed, and the
/// aggregate BLS signature of the counted signers to verify over the header's
/// signing root. One aggregate check, not one per validator.
pub fn verify_commit(
    checkpoint: &Checkpoint,
    set: &ValidatorSet,
) -> Result<CommitTally, VerificationError> {
    let tally = tally_commit(&checkpoint.commit, set)?;

    if !tally.is_supermajority() {
        return Err(VerificationError::InsufficientPower {
            signed: tally.signed_power,
            total: tally.total_power,
        });
    }

    let signing_root = compute_signing_root(&checkpoint.header);

    let counted: Vec<&CommitSig> = tally
        .counted
        .iter()
        .map(|&i| &checkpoint.commit.signatures[i])
        .collect();

    verify_aggregate_bls_signature(&counted, &signing_root)?;

    Ok(tally)
}

/// Verify that a group of validators all signed the same message, by
/// aggregating their signatures and their public keys.
fn verify_aggregate_bls_signature(
    sigs: &[&CommitSig],
    message: &[u8; 32],
) -> Result<(), VerificationError> {
    use blst::min_pk::{AggregatePublicKey, AggregateSignature, PublicKey, Signature};
    use blst::BLST_ERROR;

    if sigs.is_empty() {
        return Err(VerificationError::InsufficientPower {
            signed: 0,
            total: 0,
        });
    }

    let pks: Vec<PublicKey> = sigs
        .iter()
        .enumerate()
        .map(|(i, s)| {
            PublicKey::from_bytes(&s.validator.0).map_err(|e| VerificationError::InvalidPublicKey {
                index: i,
                reason: format!("{:?}", e),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let signatures: Vec<Signature> = sigs
        .iter()
        .map(|s| {
            Signature::from_bytes(&s.signature.0).map_err(|e| {
                VerificationError::BlsError(format!("Failed to deserialize signature: {:?}", e))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let pk_refs: Vec<&PublicKey> = pks.iter().collect();
    let agg_pk = AggregatePublicKey::aggregate(&pk_refs, false).map_err(|e| {
        VerificationError::BlsError(format!("Failed to aggregate public keys: {:?}", e))
    })?;

    let sig_refs: Vec<&Signature> = signatures.iter().collect();
    let agg_sig = AggregateSignature::aggregate(&sig_refs, true).map_err(|e| {
        VerificationError::BlsError(format!("Failed to aggregate signatures: {:?}", e))
    })?;

    let result = agg_sig
        .to_signature()
        .verify(false, message, BLS_DST, &[], &agg_pk.to_public_key(), false);
    if result != BLST_ERROR::BLST_SUCCESS {
        return Err(VerificationError::InvalidSignature);
    }

    Ok(())
}

// --- Helper functions ---

/// SHA256 hash of arbitrary data.
pub(crate) fn sha256_hash(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// SHA256 hash of two 32-byte values concatenated.
fn sha256_pair(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(a);
    data[32..].copy_from_slice(b);
    sha256_hash(&data)
}

/// Encode a u64 as a 32-byte leaf (little-endian, zero-padded).
fn uint64_to_leaf(value: u64) -> [u8; 32] {
    let mut leaf = [0u8; 32];
    leaf[..8].copy_from_slice(&value.to_le_bytes());
    leaf
}
