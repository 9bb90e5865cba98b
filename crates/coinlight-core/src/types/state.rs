use alloy_rlp::{RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};

/// Height selector for state queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryHeight {
    /// Whatever height the source considers latest; resolved by the source.
    Latest,
    /// An exact block height.
    At(u64),
}

impl QueryHeight {
    pub fn exact(&self) -> Option<u64> {
        match self {
            QueryHeight::Latest => None,
            QueryHeight::At(h) => Some(*h),
        }
    }
}

impl std::fmt::Display for QueryHeight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryHeight::Latest => write!(f, "latest"),
            QueryHeight::At(h) => write!(f, "{}", h),
        }
    }
}

/// Path from a leaf of the state tree to its root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionPath {
    /// Position of the leaf. Bit `i` set means the sibling at depth `i` is on the left.
    pub leaf_index: u64,
    /// Sibling hashes ordered from the leaf up to the root.
    pub siblings: Vec<[u8; 32]>,
}

/// A state inclusion proof for one key at one height.
/// Comes from an untrusted source; nothing in it is believed until validated
/// against a certified header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    #[serde(with = "bytes_hex")]
    pub key: Vec<u8>,
    #[serde(with = "bytes_hex")]
    pub value: Vec<u8>,
    pub height: u64,
    pub path: InclusionPath,
}

/// What a source answers to a proof query: the height it resolved the query
/// at, and the proof itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofResponse {
    pub height: u64,
    pub proof: Proof,
}

/// A balance in one denomination.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, RlpEncodable, RlpDecodable)]
pub struct Coin {
    pub denom: String,
    pub amount: u64,
}

impl Coin {
    pub fn new(denom: impl Into<String>, amount: u64) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }
}

/// An account as stored in application state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, RlpEncodable, RlpDecodable)]
pub struct Account {
    pub coins: Vec<Coin>,
}

impl Account {
    /// Amount held in `denom`, zero when absent.
    pub fn balance_of(&self, denom: &str) -> u64 {
        self.coins
            .iter()
            .filter(|c| c.denom == denom)
            .map(|c| c.amount)
            .sum()
    }
}

pub(crate) mod bytes_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_of() {
        let account = Account {
            coins: vec![Coin::new("atom", 420), Coin::new("photon", 7)],
        };
        assert_eq!(account.balance_of("atom"), 420);
        assert_eq!(account.balance_of("photon"), 7);
        assert_eq!(account.balance_of("btc"), 0);
    }

    #[test]
    fn test_query_height_display() {
        assert_eq!(QueryHeight::Latest.to_string(), "latest");
        assert_eq!(QueryHeight::At(42).to_string(), "42");
        assert_eq!(QueryHeight::At(42).exact(), Some(42));
        assert_eq!(QueryHeight::Latest.exact(), None);
    }

    #[test]
    fn test_proof_json_uses_hex_bytes() {
        let proof = Proof {
            key: b"acct:alice".to_vec(),
            value: vec![0x01, 0xc0],
            height: 42,
            path: InclusionPath {
                leaf_index: 0,
                siblings: vec![],
            },
        };
        let json = serde_json::to_value(&proof).unwrap();
        assert_eq!(json["key"], hex::encode(b"acct:alice"));
        assert_eq!(json["value"], "01c0");

        let decoded: Proof = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, proof);
    }
}
