use serde::{Deserialize, Serialize};

/// Number of bytes in a BLS12-381 public key (compressed).
pub const BLS_PUBKEY_LEN: usize = 48;

/// Number of bytes in a BLS12-381 signature (compressed).
pub const BLS_SIGNATURE_LEN: usize = 96;

/// Domain type for commit signatures.
pub const DOMAIN_COMMIT: [u8; 4] = [0x43, 0x4d, 0x54, 0x00];

/// A BLS12-381 public key (48 bytes, compressed G1 point).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlsPublicKey(pub [u8; BLS_PUBKEY_LEN]);

impl Serialize for BlsPublicKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for BlsPublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

impl BlsPublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes.len() != BLS_PUBKEY_LEN {
            return Err("Invalid BLS public key length");
        }
        let mut arr = [0u8; BLS_PUBKEY_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }
}

/// A BLS12-381 signature (96 bytes, compressed G2 point).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlsSignature(pub [u8; BLS_SIGNATURE_LEN]);

impl Serialize for BlsSignature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for BlsSignature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

impl BlsSignature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes.len() != BLS_SIGNATURE_LEN {
            return Err("Invalid BLS signature length");
        }
        let mut arr = [0u8; BLS_SIGNATURE_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }
}

/// A block header as seen by the light client.
/// Only the fields needed to anchor state proofs and follow validator set changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Chain this header belongs to. Part of the signing domain.
    pub chain_id: String,
    /// Block height.
    pub height: u64,
    /// Block time, unix seconds.
    pub time: u64,
    /// Root of the application state tree. State proofs are checked against this.
    pub app_hash: [u8; 32],
    /// Commitment to the validator set that signs this header.
    pub validators_hash: [u8; 32],
    /// Commitment to the validator set that signs the next header.
    pub next_validators_hash: [u8; 32],
}

/// A single validator: a BLS public key and its voting power.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub pub_key: BlsPublicKey,
    pub voting_power: u64,
}

/// Ordered validator set. Order matters for [`ValidatorSet::hash`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    pub validators: Vec<Validator>,
}

impl ValidatorSet {
    pub fn new(validators: Vec<Validator>) -> Self {
        Self { validators }
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Total voting power, `None` on overflow.
    pub fn total_power(&self) -> Option<u64> {
        self.validators
            .iter()
            .try_fold(0u64, |acc, v| acc.checked_add(v.voting_power))
    }

    /// Position of a validator by public key.
    pub fn index_of(&self, pub_key: &BlsPublicKey) -> Option<usize> {
        self.validators.iter().position(|v| &v.pub_key == pub_key)
    }
}

/// One validator's vote for a header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSig {
    /// Public key of the signing validator.
    pub validator: BlsPublicKey,
    /// BLS signature over the header's signing root.
    pub signature: BlsSignature,
}

/// The set of validator signatures attesting a header.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub signatures: Vec<CommitSig>,
}

/// A header together with the commit that signs it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub header: Header,
    pub commit: Commit,
}

impl Checkpoint {
    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn chain_id(&self) -> &str {
        &self.header.chain_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(byte: u8, power: u64) -> Validator {
        Validator {
            pub_key: BlsPublicKey([byte; BLS_PUBKEY_LEN]),
            voting_power: power,
        }
    }

    #[test]
    fn test_total_power() {
        let set = ValidatorSet::new(vec![validator(1, 10), validator(2, 20), validator(3, 30)]);
        assert_eq!(set.total_power(), Some(60));
    }

    #[test]
    fn test_total_power_overflow() {
        let set = ValidatorSet::new(vec![validator(1, u64::MAX), validator(2, 1)]);
        assert_eq!(set.total_power(), None);
    }

    #[test]
    fn test_index_of() {
        let set = ValidatorSet::new(vec![validator(1, 10), validator(2, 20)]);
        assert_eq!(set.index_of(&BlsPublicKey([2; BLS_PUBKEY_LEN])), Some(1));
        assert_eq!(set.index_of(&BlsPublicKey([9; BLS_PUBKEY_LEN])), None);
    }

    #[test]
    fn test_pubkey_hex_serde() {
        let pk = BlsPublicKey([0xAB; BLS_PUBKEY_LEN]);
        let json = serde_json::to_string(&pk).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(BLS_PUBKEY_LEN)));

        let with_prefix = format!("\"0x{}\"", "ab".repeat(BLS_PUBKEY_LEN));
        let decoded: BlsPublicKey = serde_json::from_str(&with_prefix).unwrap();
        assert_eq!(decoded, pk);
    }

    #[test]
    fn test_signature_rejects_wrong_length() {
        assert!(BlsSignature::from_bytes(&[0u8; 95]).is_err());
        assert!(BlsSignature::from_bytes(&[0u8; 96]).is_ok());
    }
}
