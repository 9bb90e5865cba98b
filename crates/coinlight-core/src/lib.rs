//! # Coinlight Core
//!
//! Pure Rust light client verification logic.
//!
//! This crate contains **no networking code** and **no async runtime**.
//! Every header, validator set and state proof the client sees passes
//! through these functions before being trusted.
//!
//! ## Trust Model
//!
//! - **Commit verification** (`consensus` module): a header is believed when
//!   validators holding more than 2/3 of a trusted set's voting power signed
//!   it. Signatures are BLS12-381, checked as one aggregate.
//!
//! - **State proof validation** (`state` module): binary Merkle inclusion
//!   proofs checked against the certified header's app hash. Zero trust
//!   assumptions beyond the certified header.
//!
//! ## Usage
//!
//! ```ignore
//! use coinlight_core::consensus::verify_commit;
//! use coinlight_core::state::{decode_account, validate_proof};
//! ```

pub mod consensus;
pub mod state;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export commonly used types for convenience
pub use consensus::{
    checkpoint::{parse_header_hash, CheckpointError, TrustAnchor},
    commit::{
        check_validators_hash, exceeds_two_thirds, hash_header, hash_validator_set,
        validate_validator_set, verify_commit, CommitTally, VerificationError,
    },
};
pub use state::{
    account::{decode_account, encode_account, DecodeError, VerifiedAccount},
    key::{account_key, parse_address, KeyError},
    proof::{compute_root, keccak256, validate_proof, ProofError},
    tree::StateTree,
};
pub use types::{chain::*, state::*};
