use crate::types::chain::Checkpoint;
use crate::types::state::*;
use thiserror::Error;
use tiny_keccak::{Hasher, Keccak};

/// Deepest inclusion path accepted. Leaf indices are u64, so a deeper path
/// could not address its leaf anyway.
pub const MAX_PROOF_DEPTH: usize = 64;

/// Errors during state inclusion proof validation.
#[derive(Debug, Error)]
pub enum ProofError {
    #[error("Proof is for height {proof} but the checkpoint is at height {checkpoint}")]
    HeightMismatch { proof: u64, checkpoint: u64 },

    #[error("Proof has an empty key")]
    EmptyKey,

    #[error("Malformed inclusion path: {reason}")]
    MalformedPath { reason: String },

    #[error("Proof verification failed: computed root {computed} does not match app hash {expected}")]
    RootMismatch { computed: String, expected: String },
}

/// Compute keccak256 hash of data.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut output);
    output
}

/// Hash of a state tree leaf.
/// The key length is included so (key, value) splits are unambiguous.
pub fn leaf_hash(key: &[u8], value: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(&[0x00]);
    hasher.update(&(key.len() as u64).to_be_bytes());
    hasher.update(key);
    hasher.update(value);
    hasher.finalize(&mut output);
    output
}

/// Hash of an inner node. The prefix byte keeps leaves and inner nodes apart.
pub fn inner_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(&[0x01]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize(&mut output);
    output
}

/// Fold a proof's inclusion path over its leaf and return the implied root.
pub fn compute_root(proof: &Proof) -> Result<[u8; 32], ProofError> {
    if proof.key.is_empty() {
        return Err(ProofError::EmptyKey);
    }

    let depth = proof.path.siblings.len();
    if depth > MAX_PROOF_DEPTH {
        return Err(ProofError::MalformedPath {
            reason: format!("depth {} exceeds maximum {}", depth, MAX_PROOF_DEPTH),
        });
    }
    if depth < 64 && proof.path.leaf_index >> depth != 0 {
        return Err(ProofError::MalformedPath {
            reason: format!(
                "leaf index {} out of range for depth {}",
                proof.path.leaf_index, depth
            ),
        });
    }

    let mut current = leaf_hash(&proof.key, &proof.value);
    for (i, sibling) in proof.path.siblings.iter().enumerate() {
        if (proof.path.leaf_index >> i) & 1 == 1 {
            current = inner_hash(sibling, &current);
        } else {
            current = inner_hash(&current, sibling);
        }
    }

    Ok(current)
}

/// Validate a state proof against a certified checkpoint.
///
/// IMPORTANT: the checkpoint must already be certified. This function only
/// binds the proof to the checkpoint's app hash; it says nothing about
/// whether the checkpoint itself is trustworthy.
///
/// The value is not interpreted here.
pub fn validate_proof(proof: &Proof, checkpoint: &Checkpoint) -> Result<(), ProofError> {
    if proof.height != checkpoint.header.height {
        return Err(ProofError::HeightMismatch {
            proof: proof.height,
            checkpoint: checkpoint.header.height,
        });
    }

    let computed = compute_root(proof)?;
    if computed != checkpoint.header.app_hash {
        return Err(ProofError::RootMismatch {
            computed: hex::encode(computed),
            expected: hex::encode(checkpoint.header.app_hash),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tree::StateTree;
    use crate::types::chain::{Commit, Header};
    use hex_literal::hex;
    use proptest::prelude::*;

    fn checkpoint_for(tree: &StateTree, height: u64) -> Checkpoint {
        Checkpoint {
            header: Header {
                chain_id: "test-chain".into(),
                height,
                time: 0,
                app_hash: tree.root(),
                validators_hash: [0; 32],
                next_validators_hash: [0; 32],
            },
            commit: Commit::default(),
        }
    }

    fn sample_tree() -> StateTree {
        let mut tree = StateTree::new();
        tree.insert(b"acct:alice".to_vec(), b"alice-value".to_vec());
        tree.insert(b"acct:bob".to_vec(), b"bob-value".to_vec());
        tree.insert(b"acct:carol".to_vec(), b"carol-value".to_vec());
        tree.insert(b"acct:dave".to_vec(), b"dave-value".to_vec());
        tree.insert(b"acct:erin".to_vec(), b"erin-value".to_vec());
        tree
    }

    #[test]
    fn test_keccak256_empty() {
        assert_eq!(
            keccak256(&[]),
            hex!("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470")
        );
    }

    #[test]
    fn test_leaf_hash_key_boundary() {
        // Same concatenated bytes, different split.
        assert_ne!(leaf_hash(b"ab", b"c"), leaf_hash(b"a", b"bc"));
    }

    #[test]
    fn test_valid_proof_accepted() {
        let tree = sample_tree();
        let checkpoint = checkpoint_for(&tree, 42);
        for key in [&b"acct:alice"[..], b"acct:carol", b"acct:erin"] {
            let proof = tree.prove(key, 42).unwrap();
            validate_proof(&proof, &checkpoint).unwrap();
        }
    }

    #[test]
    fn test_height_mismatch() {
        let tree = sample_tree();
        let checkpoint = checkpoint_for(&tree, 43);
        let proof = tree.prove(b"acct:bob", 42).unwrap();
        assert!(matches!(
            validate_proof(&proof, &checkpoint),
            Err(ProofError::HeightMismatch {
                proof: 42,
                checkpoint: 43
            })
        ));
    }

    #[test]
    fn test_forged_value_rejected() {
        let tree = sample_tree();
        let checkpoint = checkpoint_for(&tree, 42);
        let mut proof = tree.prove(b"acct:alice", 42).unwrap();
        proof.value = b"a million atoms".to_vec();
        assert!(matches!(
            validate_proof(&proof, &checkpoint),
            Err(ProofError::RootMismatch { .. })
        ));
    }

    #[test]
    fn test_swapped_key_rejected() {
        let tree = sample_tree();
        let checkpoint = checkpoint_for(&tree, 42);
        let mut proof = tree.prove(b"acct:alice", 42).unwrap();
        proof.key = b"acct:bob".to_vec();
        assert!(matches!(
            validate_proof(&proof, &checkpoint),
            Err(ProofError::RootMismatch { .. })
        ));
    }

    #[test]
    fn test_leaf_index_out_of_range() {
        let tree = sample_tree();
        let checkpoint = checkpoint_for(&tree, 42);
        let mut proof = tree.prove(b"acct:alice", 42).unwrap();
        proof.path.leaf_index = 1 << proof.path.siblings.len();
        assert!(matches!(
            validate_proof(&proof, &checkpoint),
            Err(ProofError::MalformedPath { .. })
        ));
    }

    #[test]
    fn test_too_deep_rejected() {
        let tree = sample_tree();
        let checkpoint = checkpoint_for(&tree, 42);
        let mut proof = tree.prove(b"acct:alice", 42).unwrap();
        proof.path.siblings = vec![[0u8; 32]; MAX_PROOF_DEPTH + 1];
        assert!(matches!(
            validate_proof(&proof, &checkpoint),
            Err(ProofError::MalformedPath { .. })
        ));
    }

    #[test]
    fn test_empty_key_rejected() {
        let tree = sample_tree();
        let checkpoint = checkpoint_for(&tree, 42);
        let mut proof = tree.prove(b"acct:alice", 42).unwrap();
        proof.key.clear();
        assert!(matches!(
            validate_proof(&proof, &checkpoint),
            Err(ProofError::EmptyKey)
        ));
    }

    proptest! {
        #[test]
        fn tampered_path_byte_always_rejected(
            sibling_pick in any::<prop::sample::Index>(),
            byte in 0usize..32,
            flip in 1u8..=255,
        ) {
            let tree = sample_tree();
            let checkpoint = checkpoint_for(&tree, 42);
            let mut proof = tree.prove(b"acct:carol", 42).unwrap();
            prop_assume!(!proof.path.siblings.is_empty());

            let i = sibling_pick.index(proof.path.siblings.len());
            proof.path.siblings[i][byte] ^= flip;

            let is_root_mismatch = matches!(
                validate_proof(&proof, &checkpoint),
                Err(ProofError::RootMismatch { .. })
            );
            prop_assert!(is_root_mismatch);
        }

        #[test]
        fn flipped_leaf_index_bit_always_rejected(
            key_pick in any::<prop::sample::Index>(),
            level_pick in any::<prop::sample::Index>(),
        ) {
            let tree = sample_tree();
            let checkpoint = checkpoint_for(&tree, 42);
            let keys: [&[u8]; 3] = [b"acct:alice", b"acct:carol", b"acct:erin"];
            let mut proof = tree.prove(keys[key_pick.index(keys.len())], 42).unwrap();
            prop_assume!(!proof.path.siblings.is_empty());

            // Stays below 2^depth, so only the left/right order at one level changes.
            let level = level_pick.index(proof.path.siblings.len());
            proof.path.leaf_index ^= 1 << level;

            let is_root_mismatch = matches!(
                validate_proof(&proof, &checkpoint),
                Err(ProofError::RootMismatch { .. })
            );
            prop_assert!(is_root_mismatch);
        }
    }
}
