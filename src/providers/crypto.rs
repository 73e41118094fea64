//! Software crypto provider and key-pair signer.
//!
//! Signing is Ed25519 (`ed25519-dalek`); hashing is BLAKE3-256;
//! randomness comes from the operating system. `encrypt`/`decrypt` are
//! AES-256-GCM under a key derived from the recipient's Ed25519 key with
//! BLAKE3's key-derivation mode, the random 96-bit nonce prepended to
//! the ciphertext.
//!
//! The encryption scheme binds ciphertexts to a key pair but offers no
//! secrecy against a holder of the public key; it is suitable for tests
//! and single-operator deployments. Deployments guarding real secrets
//! should supply their own [`CryptoProvider`].

use aes_gcm::aead::{Aead, KeyInit, OsRng as AeadOsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use async_trait::async_trait;
use ed25519_dalek::{Signer as _, Verifier as _, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{BlocktreeError, Result};
use crate::providers::{BlockSigner, CryptoProvider, KeyPair, SigningRequest};
use crate::types::secure::{signing_bytes, SignatureRecord};
use crate::types::{Hash256, PublicKey, Signature};

/// Context string for the key-derivation step of `encrypt`/`decrypt`.
const SEAL_CONTEXT: &str = "blocktree 2024 sealed secret";

/// Length of the AES-GCM nonce prepended to ciphertexts.
const NONCE_LEN: usize = 12;

/// Default [`CryptoProvider`] implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct SoftwareCrypto;

impl SoftwareCrypto {
    /// Creates the provider.
    pub fn new() -> Self {
        Self
    }

    fn sealing_key(public_key: &[u8]) -> [u8; 32] {
        blake3::derive_key(SEAL_CONTEXT, public_key)
    }

    fn verifying_key_of_private(private_key: &[u8]) -> Result<VerifyingKey> {
        let seed: [u8; 32] = private_key
            .try_into()
            .map_err(|_| BlocktreeError::Storage("private key must be 32 bytes".into()))?;
        Ok(SigningKey::from_bytes(&seed).verifying_key())
    }
}

#[async_trait]
impl CryptoProvider for SoftwareCrypto {
    async fn content_hash(&self, bytes: &[u8]) -> Hash256 {
        Hash256::compute(bytes)
    }

    async fn random_bytes(&self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        OsRng.fill_bytes(&mut buf);
        buf
    }

    async fn generate_key_pair(&self) -> Result<KeyPair> {
        let signing_key = SigningKey::generate(&mut OsRng);
        Ok(KeyPair {
            public_key: PublicKey(signing_key.verifying_key().to_bytes().to_vec()),
            private_key: signing_key.to_bytes().to_vec(),
        })
    }

    async fn sign(&self, private_key: &[u8], message: &[u8]) -> Result<Signature> {
        let seed: [u8; 32] = private_key
            .try_into()
            .map_err(|_| BlocktreeError::Storage("private key must be 32 bytes".into()))?;
        let signing_key = SigningKey::from_bytes(&seed);
        Ok(Signature(signing_key.sign(message).to_bytes().to_vec()))
    }

    async fn verify(
        &self,
        public_key: &PublicKey,
        signature: &Signature,
        message: &[u8],
    ) -> Result<bool> {
        let key_bytes: [u8; 32] = match public_key.as_bytes().try_into() {
            Ok(bytes) => bytes,
            Err(_) => return Ok(false),
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
            return Ok(false);
        };
        let Ok(sig) = ed25519_dalek::Signature::from_slice(signature.as_bytes()) else {
            return Ok(false);
        };
        Ok(verifying_key.verify(message, &sig).is_ok())
    }

    async fn encrypt(&self, public_key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(&Self::sealing_key(public_key))
            .map_err(|e| BlocktreeError::Storage(format!("sealing key rejected: {e}")))?;
        let nonce = Aes256Gcm::generate_nonce(&mut AeadOsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| BlocktreeError::Storage(format!("encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    async fn decrypt(&self, private_key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_LEN {
            return Err(BlocktreeError::Storage("ciphertext too short".into()));
        }
        let public = Self::verifying_key_of_private(private_key)?;
        let cipher = Aes256Gcm::new_from_slice(&Self::sealing_key(public.as_bytes()))
            .map_err(|e| BlocktreeError::Storage(format!("sealing key rejected: {e}")))?;
        let nonce = Nonce::from_slice(&ciphertext[..NONCE_LEN]);
        cipher
            .decrypt(nonce, &ciphertext[NONCE_LEN..])
            .map_err(|e| BlocktreeError::Storage(format!("decryption failed: {e}")))
    }
}

/// [`BlockSigner`] holding an Ed25519 key pair in memory.
pub struct KeyPairSigner {
    signing_key: SigningKey,
}

impl KeyPairSigner {
    /// Builds a signer from a 32-byte Ed25519 seed.
    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        let seed: [u8; 32] = seed
            .try_into()
            .map_err(|_| BlocktreeError::Storage("signing seed must be 32 bytes".into()))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    /// Builds a signer from a generated [`KeyPair`].
    pub fn from_key_pair(pair: &KeyPair) -> Result<Self> {
        Self::from_seed(&pair.private_key)
    }

    /// The public key this signer signs as.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().to_bytes().to_vec())
    }
}

#[async_trait]
impl BlockSigner for KeyPairSigner {
    async fn sign_block(&self, request: &SigningRequest) -> Result<SignatureRecord> {
        let message = signing_bytes(
            request.prev.as_ref(),
            request.parent.as_ref(),
            request.kind,
            &request.body,
        );
        let signature = self.signing_key.sign(&message);
        Ok(SignatureRecord {
            public_key: self.public_key(),
            signature: Signature(signature.to_bytes().to_vec()),
        })
    }
}
