// ============================================================================
// KIN-SDK - Keypair
// ============================================================================
// Ed25519 keypair addressed by its StrKey seed. Signing produces Stellar
// "decorated" signatures (4-byte hint + 64-byte signature).

use crate::strkey;
use crate::xdr::DecoratedSignature;
use crate::Result;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Clone)]
pub struct Keypair {
    secret_seed: String,
    public_address: String,
    signing_key: SigningKey,
}

impl Keypair {
    /// Load a keypair from `seed`, or generate a fresh one when `None`
    pub fn new(seed: Option<&str>) -> Result<Self> {
        match seed {
            Some(seed) => Self::from_seed(seed),
            None => Ok(Self::random()),
        }
    }

    pub fn from_seed(seed: &str) -> Result<Self> {
        let raw = strkey::decode_seed(seed)?;
        Ok(Self::from_raw_seed(raw))
    }

    pub fn from_raw_seed(raw_seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&raw_seed);
        let public_address = strkey::encode_address(&signing_key.verifying_key().to_bytes());
        Self {
            secret_seed: strkey::encode_seed(&raw_seed),
            public_address,
            signing_key,
        }
    }

    pub fn random() -> Self {
        let mut raw = [0u8; 32];
        OsRng.fill_bytes(&mut raw);
        Self::from_raw_seed(raw)
    }

    pub fn secret_seed(&self) -> &str {
        &self.secret_seed
    }

    pub fn public_address(&self) -> &str {
        &self.public_address
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Last four bytes of the public key
    pub fn signature_hint(&self) -> [u8; 4] {
        let key = self.public_key();
        [key[28], key[29], key[30], key[31]]
    }

    pub fn sign(&self, data: &[u8]) -> DecoratedSignature {
        let signature = self.signing_key.sign(data);
        DecoratedSignature {
            hint: self.signature_hint(),
            signature: signature.to_bytes().to_vec(),
        }
    }

    pub fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        let Ok(bytes) = <[u8; 64]>::try_from(signature) else {
            return false;
        };
        self.signing_key
            .verifying_key()
            .verify(data, &Signature::from_bytes(&bytes))
            .is_ok()
    }

    // ==================== Seed helpers ====================

    pub fn address_from_seed(seed: &str) -> Result<String> {
        Ok(Self::from_seed(seed)?.public_address)
    }

    pub fn generate_seed() -> String {
        Self::random().secret_seed
    }

    /// Deterministic seed: `sha256(base_seed || salt)` taken as the raw seed.
    /// The base seed is hashed as text, it is not decoded.
    pub fn generate_hd_seed(base_seed: &str, salt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(base_seed.as_bytes());
        hasher.update(salt.as_bytes());
        let raw: [u8; 32] = hasher.finalize().into();
        strkey::encode_seed(&raw)
    }
}

impl PartialEq for Keypair {
    fn eq(&self, other: &Self) -> bool {
        self.secret_seed == other.secret_seed
    }
}

impl Eq for Keypair {}

// Seeds never show up in logs
impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public_address", &self.public_address)
            .finish_non_exhaustive()
    }
}
