use thiserror::Error;

/// Number of bytes in an account address.
pub const ADDRESS_LEN: usize = 20;

/// Store prefix under which the coin module keeps accounts.
pub const COIN_STORE_PREFIX: &[u8] = b"coin/";

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Invalid address hex: {0}")]
    InvalidHex(String),

    #[error("Address must be {ADDRESS_LEN} bytes, got {got}")]
    InvalidLength { got: usize },
}

/// Parse a hex-encoded account address, with or without a 0x prefix.
pub fn parse_address(hex_str: &str) -> Result<[u8; ADDRESS_LEN], KeyError> {
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    let bytes = hex::decode(hex_str).map_err(|e| KeyError::InvalidHex(e.to_string()))?;
    if bytes.len() != ADDRESS_LEN {
        return Err(KeyError::InvalidLength { got: bytes.len() });
    }
    let mut address = [0u8; ADDRESS_LEN];
    address.copy_from_slice(&bytes);
    Ok(address)
}

/// Storage key of an account in application state.
pub fn account_key(address: &[u8; ADDRESS_LEN]) -> Vec<u8> {
    let mut key = Vec::with_capacity(COIN_STORE_PREFIX.len() + ADDRESS_LEN);
    key.extend_from_slice(COIN_STORE_PREFIX);
    key.extend_from_slice(address);
    key
}
