// ============================================================================
// KIN-SDK - StrKey Encoding
// ============================================================================
// Stellar "G..." account ids and "S..." secret seeds: version byte + 32 bytes
// + CRC16, base32 encoded. The heavy lifting is done by `stellar-strkey`.

use crate::error::KinError;
use crate::Result;
use stellar_strkey::ed25519::{PrivateKey, PublicKey};

/// Encoded length of both addresses and seeds
pub const STRKEY_LENGTH: usize = 56;

/// Encode a 32-byte Ed25519 public key as a `G...` address
pub fn encode_address(public_key: &[u8; 32]) -> String {
    PublicKey(*public_key).to_string()
}

/// Decode a `G...` address into its 32-byte public key
pub fn decode_address(address: &str) -> Result<[u8; 32]> {
    if address.len() != STRKEY_LENGTH {
        return Err(KinError::InvalidAddress(address.to_string()));
    }
    address
        .parse::<PublicKey>()
        .map(|key| key.0)
        .map_err(|_| KinError::InvalidAddress(address.to_string()))
}

/// Encode a raw 32-byte seed as an `S...` secret
pub fn encode_seed(raw_seed: &[u8; 32]) -> String {
    PrivateKey(*raw_seed).to_string()
}

/// Decode an `S...` secret into its raw 32-byte seed
pub fn decode_seed(seed: &str) -> Result<[u8; 32]> {
    if seed.len() != STRKEY_LENGTH {
        return Err(KinError::InvalidSeed);
    }
    seed.parse::<PrivateKey>()
        .map(|key| key.0)
        .map_err(|_| KinError::InvalidSeed)
}

pub fn is_valid_address(address: &str) -> bool {
    decode_address(address).is_ok()
}

pub fn is_valid_secret_key(seed: &str) -> bool {
    decode_seed(seed).is_ok()
}

/// 64 hex characters
pub fn is_valid_transaction_hash(tx_hash: &str) -> bool {
    tx_hash.len() == 64 && tx_hash.bytes().all(|b| b.is_ascii_hexdigit())
}
