//! Reference [`Signer`] implementations. The gateway only needs `sign`, so
//! these wrap key material the same way the bundler's `KeyProvider` wraps a
//! fee-payer key: load once at startup, hold in memory, sign on demand.

use std::path::Path;

use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer as DalekSigner, SigningKey};
use gateway_types::GatewayError;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::transport::Signer;

/// An Ed25519 signer holding a key in memory. Construct from a raw 32-byte
/// seed (`from_bytes`), a file containing one (`from_file`), or generate an
/// ephemeral key for tests/demos (`generate`).
pub struct Ed25519Signer {
    signing_key: SigningKey,
    signer_id: String,
}

impl Ed25519Signer {
    pub fn from_bytes(seed: &[u8; 32], signer_id: impl Into<String>) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
            signer_id: signer_id.into(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>, signer_id: impl Into<String>) -> Result<Self, GatewayError> {
        let bytes = std::fs::read(path.as_ref())
            .map_err(|e| GatewayError::Signing(format!("failed to read key file: {e}")))?;
        let seed: [u8; 32] = bytes
            .get(..32)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| GatewayError::Signing("key file must contain at least 32 bytes".into()))?;
        Ok(Self::from_bytes(&seed, signer_id))
    }

    pub fn generate(signer_id: impl Into<String>) -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self::from_bytes(&seed, signer_id)
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }
}

#[async_trait]
impl Signer for Ed25519Signer {
    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>, GatewayError> {
        let signature: Signature = self.signing_key.sign(message);
        Ok(signature.to_bytes().to_vec())
    }

    fn signer_id(&self) -> &str {
        &self.signer_id
    }
}
