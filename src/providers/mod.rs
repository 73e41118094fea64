//! Collaborator interfaces consumed by the core layers.
//!
//! The layers never touch bytes, clocks, or key material directly; they
//! suspend at these trait boundaries. Implementations can be backed by
//! memory, RocksDB, an HSM, or a remote service; the contracts here are
//! intentionally small.

use async_trait::async_trait;

use crate::cache::{CacheSlot, CacheValue};
use crate::error::Result;
use crate::types::secure::{BlockKind, SignatureRecord};
use crate::types::{BlockHash, Hash256, PublicKey, Signature};

/// Deterministic clock implementation for tests.
pub mod clock;
/// Software crypto provider and key-pair signer.
pub mod crypto;

pub use clock::{ManualClock, SystemClock};
pub use crypto::{KeyPairSigner, SoftwareCrypto};

/// Content-addressed byte store backing L1.
///
/// The store maps `hash -> bytes` where the hash is the BLAKE3-256 digest
/// of the bytes; no other persisted structure exists. `find` and `map`
/// iterate stored values in unspecified order.
#[async_trait]
pub trait BlockStorage: Send + Sync {
    /// Persists `bytes` under their content hash and returns it.
    async fn write_bytes(&self, bytes: &[u8]) -> Result<BlockHash>;

    /// Fetches the bytes stored under `hash`, if present.
    async fn read_bytes(&self, hash: &BlockHash) -> Result<Option<Vec<u8>>>;

    /// Returns the first stored value matching `pred`, if any.
    async fn find_in_storage(
        &self,
        pred: &(dyn for<'a> Fn(&'a [u8]) -> bool + Send + Sync),
    ) -> Result<Option<Vec<u8>>>;

    /// Applies `f` to every stored value, collecting the non-`None`
    /// results.
    async fn map_in_storage(
        &self,
        f: &(dyn for<'a> Fn(&'a [u8]) -> Option<Vec<u8>> + Send + Sync),
    ) -> Result<Vec<Vec<u8>>>;

    /// Lists stored hashes, optionally restricted to those whose bytes
    /// start with `prefix`.
    async fn list_keys(&self, prefix: Option<&[u8]>) -> Result<Vec<BlockHash>>;

    /// Number of stored entries.
    async fn count(&self) -> Result<u64>;
}

/// Mutable hint cache keyed by `(block, slot)`.
///
/// The cache is never authoritative: misses are not errors, and failures
/// are swallowed by implementations (hence the infallible signatures).
#[async_trait]
pub trait SlotCache: Send + Sync {
    /// Reads a slot, if populated.
    async fn read_cache(&self, block: &BlockHash, slot: CacheSlot) -> Option<CacheValue>;

    /// Replaces a slot's value.
    async fn write_cache(&self, block: &BlockHash, slot: CacheSlot, value: CacheValue);

    /// Appends to a list slot. Appending to a slot that was never
    /// populated is a no-op (a partial list would mislead later reads).
    async fn push_cache(&self, block: &BlockHash, slot: CacheSlot, value: BlockHash);
}

/// Monotonic 64-bit time source (milliseconds since the Unix epoch).
#[async_trait]
pub trait TimeSource: Send + Sync {
    /// Current timestamp.
    async fn now(&self) -> u64;
}

/// A generated key pair. The private half's encoding is provider
/// specific (a 32-byte Ed25519 seed for [`SoftwareCrypto`]).
#[derive(Clone, Debug)]
pub struct KeyPair {
    /// Public half, as stored in key sets.
    pub public_key: PublicKey,
    /// Private half, never persisted by the core.
    pub private_key: Vec<u8>,
}

/// Cryptographic operations consumed by the layers.
#[async_trait]
pub trait CryptoProvider: Send + Sync {
    /// Content hash of `bytes`.
    async fn content_hash(&self, bytes: &[u8]) -> Hash256;

    /// `n` bytes of cryptographically secure randomness.
    async fn random_bytes(&self, n: usize) -> Vec<u8>;

    /// Generates a fresh signing key pair.
    async fn generate_key_pair(&self) -> Result<KeyPair>;

    /// Signs `message` with `private_key`.
    async fn sign(&self, private_key: &[u8], message: &[u8]) -> Result<Signature>;

    /// Verifies `signature` over `message` against `public_key`.
    ///
    /// Returns `Ok(false)` for a well-formed but non-matching signature;
    /// malformed key or signature material is also reported as
    /// `Ok(false)` (the caller cannot act on the difference).
    async fn verify(
        &self,
        public_key: &PublicKey,
        signature: &Signature,
        message: &[u8],
    ) -> Result<bool>;

    /// Encrypts `plaintext` for the holder of `public_key`.
    async fn encrypt(&self, public_key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypts `ciphertext` with `private_key`.
    async fn decrypt(&self, private_key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Everything a signer needs to produce a block signature.
///
/// The layer fills this in at call time; the signer returns the public
/// key it used alongside the signature, and the layer then verifies and
/// authorizes that key. Private material never crosses into the core.
#[derive(Clone, Debug)]
pub struct SigningRequest {
    /// `prev` link of the block under construction.
    pub prev: Option<BlockHash>,
    /// `parent` link of the block under construction.
    pub parent: Option<BlockHash>,
    /// Kind of the block under construction.
    pub kind: BlockKind,
    /// Raw kind-specific body bytes.
    pub body: Vec<u8>,
}

/// Higher-order signing hook ("sign as").
///
/// Implementations may hold keys directly ([`KeyPairSigner`]), delegate
/// to an HSM, or route through the secrets broker.
#[async_trait]
pub trait BlockSigner: Send + Sync {
    /// Signs the canonical bytes for the block described by `request`.
    async fn sign_block(&self, request: &SigningRequest) -> Result<SignatureRecord>;
}

/// An encrypted private-key blob collected from a key entry, tagged with
/// the public key it belongs to.
#[derive(Clone, Debug)]
pub struct EncryptedSecret {
    /// Public key whose private half the ciphertext holds.
    pub owner: PublicKey,
    /// Encrypted private-key material.
    pub ciphertext: Vec<u8>,
}

/// A trusted-read request submitted to the broker.
#[derive(Clone, Debug)]
pub struct SecretRequest {
    /// Block whose secrets are being read.
    pub block: BlockHash,
    /// Key the caller wants the secrets re-encrypted under.
    pub trusted_key: PublicKey,
}

/// A signed token authorizing one re-encryption exchange.
#[derive(Clone, Debug)]
pub struct BrokerToken {
    /// Canonical bytes of the request the broker signed.
    pub payload: Vec<u8>,
    /// Broker signature over `payload`.
    pub signature: Signature,
}

/// External re-encryption broker for the trusted-read path.
///
/// The broker holds decryption material the core never sees; it validates
/// its own tokens and returns payloads re-encrypted under the requestor's
/// trusted key.
#[async_trait]
pub trait SecretsBroker: Send + Sync {
    /// Issues a signed token for `request`.
    async fn issue_token(&self, request: &SecretRequest) -> Result<BrokerToken>;

    /// Re-encrypts each secret under `trusted_key`, in order.
    async fn reencrypt(
        &self,
        token: &BrokerToken,
        secrets: &[EncryptedSecret],
        trusted_key: &PublicKey,
    ) -> Result<Vec<Vec<u8>>>;
}
