//! Concrete [`Signer`] backed by a local secp256k1 private key.

use std::str::FromStr;

use alloy_signer::Signer as AlloySigner;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;

use crate::core::exchange::{GatewayError, Signer};

/// Signs order payloads with a raw private key held in memory
/// (`spec.md` §6: external interfaces, order signing).
pub struct LocalKeySigner {
    inner: PrivateKeySigner,
}

impl LocalKeySigner {
    /// # Errors
    ///
    /// Returns [`GatewayError::Auth`] if `private_key_hex` is not a valid
    /// secp256k1 private key.
    pub fn from_hex(private_key_hex: &str) -> Result<Self, GatewayError> {
        let inner = PrivateKeySigner::from_str(private_key_hex)
            .map_err(|e| GatewayError::Auth(format!("invalid private key: {e}")))?;
        Ok(Self { inner })
    }

    #[must_use]
    pub fn address(&self) -> String {
        self.inner.address().to_string()
    }
}

#[async_trait]
impl Signer for LocalKeySigner {
    async fn sign_order(&self, payload: &[u8]) -> Result<Vec<u8>, GatewayError> {
        let signature = self
            .inner
            .sign_message(payload)
            .await
            .map_err(|e| GatewayError::Auth(format!("signing failed: {e}")))?;
        Ok(signature.as_bytes().to_vec())
    }
}
