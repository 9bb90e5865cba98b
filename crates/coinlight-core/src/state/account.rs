use crate::types::state::*;
use alloy_rlp::{Decodable, Encodable};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// First byte of every encoded account. Anything else in the state tree is
/// not an account and must not be decoded as one.
pub const ACCOUNT_TYPE_TAG: u8 = 0x01;

/// Longest accepted denomination.
pub const MAX_DENOM_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed account encoding: {reason}")]
    Malformed { reason: String },
}

fn malformed(reason: impl Into<String>) -> DecodeError {
    DecodeError::Malformed {
        reason: reason.into(),
    }
}

/// Encode an account: type tag followed by RLP([[[denom, amount], ...]]).
pub fn encode_account(account: &Account) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + account.length());
    out.push(ACCOUNT_TYPE_TAG);
    account.encode(&mut out);
    out
}

/// Decode an account from a proven state value.
/// Pure; fails on truncation, a wrong type tag, trailing bytes or a bad denom.
pub fn decode_account(value: &[u8]) -> Result<Account, DecodeError> {
    let (&tag, body) = value
        .split_first()
        .ok_or_else(|| malformed("empty value"))?;

    if tag != ACCOUNT_TYPE_TAG {
        return Err(malformed(format!(
            "type tag 0x{:02x}, expected 0x{:02x}",
            tag, ACCOUNT_TYPE_TAG
        )));
    }

    let mut buf = body;
    let account = Account::decode(&mut buf).map_err(|e| malformed(e.to_string()))?;
    if !buf.is_empty() {
        return Err(malformed(format!("{} trailing bytes", buf.len())));
    }

    for coin in &account.coins {
        validate_denom(&coin.denom)?;
    }

    Ok(account)
}

fn validate_denom(denom: &str) -> Result<(), DecodeError> {
    if denom.is_empty() || denom.len() > MAX_DENOM_LEN {
        return Err(malformed(format!("denom length {} out of range", denom.len())));
    }
    if !denom.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(malformed(format!("denom {:?} is not an ASCII token", denom)));
    }
    Ok(())
}

/// An account whose value was proven against a certified header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedAccount {
    /// Height of the certified header the proof was checked against.
    pub height: u64,
    /// Storage key the account was read from.
    pub key: Vec<u8>,
    /// The decoded account.
    pub account: Account,
}
