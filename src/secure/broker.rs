//! In-memory trusted secrets broker.
//!
//! The broker is an external collaborator in production: it holds escrow
//! decryption material the core never sees, issues signed request
//! tokens, and re-encrypts authorized secrets under a requestor's
//! trusted key. This implementation keeps everything in process memory
//! and is intended for tests and single-node setups.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{BlocktreeError, InvalidKeyReason, InvalidSignatureReason, Result};
use crate::providers::{
    BrokerToken, CryptoProvider, EncryptedSecret, KeyPair, SecretRequest, SecretsBroker,
};
use crate::types::{Layer, PublicKey};

const L: Layer = Layer::SecureBlocktree;

/// Process-local [`SecretsBroker`].
pub struct InMemoryBroker<R> {
    crypto: R,
    signing_key: Vec<u8>,
    public_key: PublicKey,
    /// Maps a key entry's public key to the escrow private key able to
    /// decrypt that entry's stored secret.
    vault: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl<R> InMemoryBroker<R>
where
    R: CryptoProvider,
{
    /// Creates a broker with a fresh token-signing key pair.
    pub async fn new(crypto: R) -> Result<Self> {
        let pair = crypto.generate_key_pair().await?;
        Ok(Self {
            crypto,
            signing_key: pair.private_key,
            public_key: pair.public_key,
            vault: RwLock::new(HashMap::new()),
        })
    }

    /// The key the broker signs tokens with.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Registers the escrow key pair able to open secrets stored for
    /// `owner`.
    pub fn register_escrow(&self, owner: &PublicKey, escrow: &KeyPair) {
        self.vault
            .write()
            .insert(owner.as_bytes().to_vec(), escrow.private_key.clone());
    }

    fn token_payload(request: &SecretRequest) -> Vec<u8> {
        let mut payload = Vec::with_capacity(32 + request.trusted_key.as_bytes().len());
        payload.extend_from_slice(request.block.as_bytes());
        payload.extend_from_slice(request.trusted_key.as_bytes());
        payload
    }
}

#[async_trait]
impl<R> SecretsBroker for InMemoryBroker<R>
where
    R: CryptoProvider,
{
    async fn issue_token(&self, request: &SecretRequest) -> Result<BrokerToken> {
        let payload = Self::token_payload(request);
        let signature = self.crypto.sign(&self.signing_key, &payload).await?;
        Ok(BrokerToken { payload, signature })
    }

    async fn reencrypt(
        &self,
        token: &BrokerToken,
        secrets: &[EncryptedSecret],
        trusted_key: &PublicKey,
    ) -> Result<Vec<Vec<u8>>> {
        let token_ok = self
            .crypto
            .verify(&self.public_key, &token.signature, &token.payload)
            .await?;
        if !token_ok {
            return Err(BlocktreeError::invalid_signature(
                L,
                InvalidSignatureReason::DoesNotMatch,
            ));
        }

        let mut out = Vec::with_capacity(secrets.len());
        for secret in secrets {
            let escrow_key = self
                .vault
                .read()
                .get(secret.owner.as_bytes())
                .cloned()
                .ok_or_else(|| BlocktreeError::invalid_key(L, InvalidKeyReason::NotFound))?;
            let plaintext = self.crypto.decrypt(&escrow_key, &secret.ciphertext).await?;
            out.push(self.crypto.encrypt(trusted_key.as_bytes(), &plaintext).await?);
        }
        Ok(out)
    }
}
