//! L3: typed, signature-authenticated blocks.
//!
//! The secure layer gives every block a kind, a signed envelope, and a
//! place in the authority hierarchy. Mutations share one flow: resolve
//! the target chain, check the parent-type rule table, obtain a
//! signature from the caller's signer, verify it cryptographically, walk
//! the ancestor key sets for authorization, and only then write.
//!
//! Authority is held by ancestors: a chain's own key set governs its
//! children, while writes to the chain itself answer to the parent level
//! (and the root chain answers to the root key set, the trust anchor).

mod keys;

/// In-memory secrets broker for the trusted-read path.
pub mod broker;

use tracing::debug;

use crate::chain::WriteOptions;
use crate::error::{
    BlocktreeError, InvalidBlockReason, InvalidKeyReason, InvalidSignatureReason, Result,
};
use crate::providers::{
    BlockSigner, BlockStorage, CryptoProvider, EncryptedSecret, SecretRequest, SecretsBroker,
    SigningRequest, SlotCache, TimeSource,
};
use crate::tree::Blocktree;
use crate::types::secure::{
    decode_secure_payload, encode_secure_payload, signing_bytes, BlockKind, KeyAction, KeySet,
    OptionsRecord, SecureBody, SignatureRecord, VALID_TO_REVOKED,
};
use crate::types::tree::{NewTreeBlock, TreeBlock};
use crate::types::{BlockHash, Layer, PublicKey};

const L: Layer = Layer::SecureBlocktree;

/// A fully parsed secure block.
///
/// Produced by [`SecureBlocktree::read_secure_block`], which also
/// verifies the embedded signature against its declared public key, so a
/// successfully read block's `signature` is cryptographically sound.
/// Authorization is a separate question; see
/// [`SecureBlocktree::validate_signature`].
#[derive(Clone, Debug)]
pub struct SecureBlock {
    /// The underlying tree block.
    pub tree: TreeBlock,
    /// Typed kind.
    pub kind: BlockKind,
    /// Signature record; absent only on the `root` block.
    pub signature: Option<SignatureRecord>,
    /// Parsed, typed body.
    pub body: SecureBody,
    /// Raw body bytes as signed.
    pub body_bytes: Vec<u8>,
}

impl SecureBlock {
    /// Content hash of this block.
    pub fn hash(&self) -> BlockHash {
        self.tree.hash()
    }
}

/// Hashes of the blocks written by [`SecureBlocktree::install_root`].
#[derive(Clone, Copy, Debug)]
pub struct RootInstallation {
    /// The `root` block: the trust anchor.
    pub root: BlockHash,
    /// The root `zone` block, parented under the root.
    pub root_zone: BlockHash,
    /// The `keys` block carrying the root zone's key set.
    pub root_zone_keys: BlockHash,
}

/// The L3 secure store, layered over [`Blocktree`].
pub struct SecureBlocktree<S, C, T, R> {
    tree: Blocktree<S, C, T, R>,
}

impl<S, C, T, R> SecureBlocktree<S, C, T, R>
where
    S: BlockStorage,
    C: SlotCache,
    T: TimeSource,
    R: CryptoProvider,
{
    /// Creates a secure store over the given collaborators.
    pub fn new(storage: S, cache: C, clock: T, crypto: R) -> Self {
        Self {
            tree: Blocktree::new(storage, cache, clock, crypto),
        }
    }

    /// Returns a reference to the underlying tree layer.
    pub fn tree(&self) -> &Blocktree<S, C, T, R> {
        &self.tree
    }

    /// Reads and fully parses a secure block.
    ///
    /// The embedded signature (when present) is verified against its
    /// declared public key; a tampered payload fails with
    /// `does_not_match`.
    pub async fn read_secure_block(&self, hash: &BlockHash) -> Result<Option<SecureBlock>> {
        let tree_block = match self.tree.read_block(hash).await? {
            Some(b) => b,
            None => return Ok(None),
        };

        let (kind, signature, body_bytes) = decode_secure_payload(&tree_block.payload)?;
        if let Some(record) = &signature {
            let message = signing_bytes(
                tree_block.prev().as_ref(),
                tree_block.parent.as_ref(),
                kind,
                &body_bytes,
            );
            let ok = self
                .tree
                .chain()
                .crypto()
                .verify(&record.public_key, &record.signature, &message)
                .await?;
            if !ok {
                return Err(BlocktreeError::invalid_signature(
                    L,
                    InvalidSignatureReason::DoesNotMatch,
                ));
            }
        }

        let body = SecureBody::decode(kind, &body_bytes)?;
        Ok(Some(SecureBlock {
            tree: tree_block,
            kind,
            signature,
            body,
            body_bytes,
        }))
    }

    /// Reads a secure block, failing with `is_null` when it does not
    /// resolve.
    pub(crate) async fn require_secure_block(&self, hash: &BlockHash) -> Result<SecureBlock> {
        self.read_secure_block(hash).await?.ok_or_else(|| {
            BlocktreeError::invalid_block(L, InvalidBlockReason::IsNull, Some(*hash))
        })
    }

    /// Installs the trust anchor into an empty store.
    ///
    /// Writes, in order: the `root` block carrying `root_keys`; the root
    /// `zone` block parented under it; and the `keys` block on the zone
    /// chain carrying `root_zone_keys`. Fails with `InvalidRootError`
    /// when the store already holds any block.
    pub async fn install_root(
        &self,
        root_keys: &KeySet,
        root_zone_keys: &KeySet,
        sign_as_root: &dyn BlockSigner,
    ) -> Result<RootInstallation> {
        if self.tree.chain().count_blocks().await? > 0 {
            return Err(BlocktreeError::InvalidRoot);
        }

        let root_body = root_keys.encode()?;
        let payload = encode_secure_payload(BlockKind::Root, None, &root_body)?;
        let root = self
            .tree
            .write_block(
                &NewTreeBlock {
                    prev: None,
                    parent: None,
                    layer: Layer::SecureBlocktree,
                    data: payload,
                },
                &WriteOptions::default(),
            )
            .await?;

        let zone_body = OptionsRecord::new().encode()?;
        let root_zone = self
            .write_signed(None, Some(root), root, BlockKind::Zone, zone_body, sign_as_root)
            .await?;

        let keys_body = root_zone_keys.encode()?;
        let root_zone_keys = self
            .write_signed(
                Some(root_zone),
                Some(root),
                root,
                BlockKind::Keys,
                keys_body,
                sign_as_root,
            )
            .await?;

        debug!(root = %root, zone = %root_zone, "installed root");
        Ok(RootInstallation {
            root,
            root_zone,
            root_zone_keys,
        })
    }

    /// Creates a `zone` chain under `target`'s chain root.
    pub async fn create_zone(
        &self,
        target: &BlockHash,
        options: &OptionsRecord,
        initial_keys: Option<&KeySet>,
        signer: &dyn BlockSigner,
    ) -> Result<BlockHash> {
        self.create_child(target, BlockKind::Zone, options, initial_keys, signer)
            .await
    }

    /// Creates an `identity` chain under `target`'s chain root.
    pub async fn create_identity(
        &self,
        target: &BlockHash,
        options: &OptionsRecord,
        initial_keys: Option<&KeySet>,
        signer: &dyn BlockSigner,
    ) -> Result<BlockHash> {
        self.create_child(target, BlockKind::Identity, options, initial_keys, signer)
            .await
    }

    /// Creates a `collection` chain under `target`'s chain root.
    pub async fn create_collection(
        &self,
        target: &BlockHash,
        options: &OptionsRecord,
        initial_keys: Option<&KeySet>,
        signer: &dyn BlockSigner,
    ) -> Result<BlockHash> {
        self.create_child(target, BlockKind::Collection, options, initial_keys, signer)
            .await
    }

    /// Appends a `keys` block (rotation, addition) to `target`'s chain.
    pub async fn set_keys(
        &self,
        target: &BlockHash,
        key_set: &KeySet,
        signer: &dyn BlockSigner,
    ) -> Result<BlockHash> {
        let body = key_set.encode()?;
        self.append_to_chain(target, BlockKind::Keys, body, signer)
            .await
    }

    /// Appends an `options` block to `target`'s chain.
    pub async fn set_options(
        &self,
        target: &BlockHash,
        options: &OptionsRecord,
        signer: &dyn BlockSigner,
    ) -> Result<BlockHash> {
        let body = options.encode()?;
        self.append_to_chain(target, BlockKind::Options, body, signer)
            .await
    }

    /// Appends a domain record to a `collection` chain.
    pub async fn add_record(
        &self,
        target: &BlockHash,
        record: &OptionsRecord,
        signer: &dyn BlockSigner,
    ) -> Result<BlockHash> {
        let (_, root_block) = self.resolve_chain_root(target).await?;
        if root_block.kind != BlockKind::Collection {
            return Err(BlocktreeError::invalid_block(
                L,
                InvalidBlockReason::InvalidParentType,
                Some(root_block.hash()),
            ));
        }
        let body = record.encode()?;
        self.append_to_chain(target, BlockKind::Options, body, signer)
            .await
    }

    /// Appends a `keys` block replaying the chain's effective key set
    /// with the given keys' validity windows closed to the revocation
    /// sentinel.
    ///
    /// Fails with `InvalidKeyError(not_found)` when none of `revoked`
    /// appears in the effective key set.
    pub async fn revoke_keys(
        &self,
        target: &BlockHash,
        revoked: &[PublicKey],
        signer: &dyn BlockSigner,
    ) -> Result<BlockHash> {
        let (root_hash, _) = self.resolve_chain_root(target).await?;
        let current = match self.latest_key_set(&root_hash).await? {
            Some((_, set)) => set,
            None => {
                return Err(BlocktreeError::invalid_key(L, InvalidKeyReason::NotFound))
            }
        };

        let mut next = KeySet::new();
        let mut touched = false;
        for (action, entries) in current.groups() {
            for entry in entries {
                let mut entry = entry.clone();
                if revoked.contains(&entry.public_key) {
                    entry.valid_to = VALID_TO_REVOKED;
                    touched = true;
                }
                next.grant(action, entry);
            }
        }
        if !touched {
            return Err(BlocktreeError::invalid_key(L, InvalidKeyReason::NotFound));
        }

        let body = next.encode()?;
        self.append_to_chain(target, BlockKind::Keys, body, signer)
            .await
    }

    /// Verifies a stored block's signature end to end: record presence,
    /// cryptographic validity, and authorization against the key sets
    /// governing the block, evaluated at the block's own timestamp.
    pub async fn validate_signature(&self, hash: &BlockHash) -> Result<()> {
        let block = self.require_secure_block(hash).await?;
        let record = block.signature.as_ref().ok_or_else(|| {
            BlocktreeError::invalid_signature(L, InvalidSignatureReason::NotFound)
        })?;

        let level = match block.tree.parent {
            Some(parent) => parent,
            // Root-chain mutations answer to the root itself.
            None => match self.tree.chain().get_root_block(hash).await? {
                Some(root) => root,
                None => {
                    return Err(BlocktreeError::invalid_signature(
                        L,
                        InvalidSignatureReason::Unauthorized,
                    ))
                }
            },
        };

        let at = block.tree.block.timestamp;
        self.authorize(&level, &record.public_key, KeyAction::Write, at)
            .await?;
        Ok(())
    }

    /// Collects the encrypted read-key chain governing `block`, obtains
    /// a signed token from `broker`, and returns the secrets
    /// re-encrypted under `trusted_key`.
    pub async fn read_secret(
        &self,
        block: &BlockHash,
        trusted_key: &PublicKey,
        broker: &dyn SecretsBroker,
    ) -> Result<Vec<Vec<u8>>> {
        self.require_secure_block(block).await?;
        let (root_hash, _) = self.resolve_chain_root(block).await?;
        let now = self.tree.chain().clock().now().await;

        let mut secrets = Vec::new();
        let mut worst: Option<InvalidKeyReason> = None;
        let mut level = root_hash;
        loop {
            if let Some((_, set)) = self.latest_key_set(&level).await? {
                for entry in set.entries(KeyAction::Read) {
                    let Some(ciphertext) = &entry.encrypted_secret else {
                        continue;
                    };
                    if entry.valid_at(now) {
                        secrets.push(EncryptedSecret {
                            owner: entry.public_key.clone(),
                            ciphertext: ciphertext.clone(),
                        });
                    } else if entry.valid_to == VALID_TO_REVOKED {
                        worst = Some(InvalidKeyReason::Revoked);
                    } else if worst != Some(InvalidKeyReason::Revoked) {
                        worst = Some(InvalidKeyReason::Expired);
                    }
                }
            }
            let level_block = match self.tree.read_block(&level).await? {
                Some(b) => b,
                None => break,
            };
            match level_block.parent {
                Some(parent) => level = parent,
                None => break,
            }
        }

        if secrets.is_empty() {
            return Err(BlocktreeError::invalid_key(
                L,
                worst.unwrap_or(InvalidKeyReason::NotFound),
            ));
        }

        let token = broker
            .issue_token(&SecretRequest {
                block: *block,
                trusted_key: trusted_key.clone(),
            })
            .await?;
        broker.reencrypt(&token, &secrets, trusted_key).await
    }

    /// Resolves `target` to its chain root and the root's parsed secure
    /// block. A missing target or unresolvable root fails with
    /// `is_null`.
    async fn resolve_chain_root(&self, target: &BlockHash) -> Result<(BlockHash, SecureBlock)> {
        self.require_secure_block(target).await?;
        let root = self
            .tree
            .chain()
            .get_root_block(target)
            .await?
            .ok_or_else(|| {
                BlocktreeError::invalid_block(L, InvalidBlockReason::IsNull, Some(*target))
            })?;
        let block = self.require_secure_block(&root).await?;
        Ok((root, block))
    }

    /// Starts a new chain of `kind` under `target`'s chain root.
    async fn create_child(
        &self,
        target: &BlockHash,
        kind: BlockKind,
        options: &OptionsRecord,
        initial_keys: Option<&KeySet>,
        signer: &dyn BlockSigner,
    ) -> Result<BlockHash> {
        let (parent_hash, parent_block) = self.resolve_chain_root(target).await?;
        if !parent_block.kind.allows_child(kind) {
            return Err(BlocktreeError::invalid_block(
                L,
                InvalidBlockReason::InvalidParentType,
                Some(parent_hash),
            ));
        }

        let body = options.encode()?;
        let created = self
            .write_signed(None, Some(parent_hash), parent_hash, kind, body, signer)
            .await?;

        if let Some(keys) = initial_keys {
            let keys_body = keys.encode()?;
            self.write_signed(
                Some(created),
                Some(parent_hash),
                parent_hash,
                BlockKind::Keys,
                keys_body,
                signer,
            )
            .await?;
        }
        Ok(created)
    }

    /// Appends a block of `kind` at the head of `target`'s chain.
    async fn append_to_chain(
        &self,
        target: &BlockHash,
        kind: BlockKind,
        body: Vec<u8>,
        signer: &dyn BlockSigner,
    ) -> Result<BlockHash> {
        let (root_hash, root_block) = self.resolve_chain_root(target).await?;

        // Only key maintenance may touch the root chain directly.
        if root_block.kind == BlockKind::Root && kind != BlockKind::Keys {
            return Err(BlocktreeError::invalid_block(
                L,
                InvalidBlockReason::IsNull,
                Some(root_hash),
            ));
        }
        if !root_block.kind.allows_child(kind) {
            return Err(BlocktreeError::invalid_block(
                L,
                InvalidBlockReason::InvalidParentType,
                Some(root_hash),
            ));
        }

        let head = self
            .tree
            .chain()
            .get_head_block(&root_hash)
            .await?
            .unwrap_or(root_hash);
        let parent = root_block.tree.parent;
        let level = parent.unwrap_or(root_hash);

        self.write_signed(Some(head), parent, level, kind, body, signer)
            .await
    }

    /// Signs, verifies, authorizes, and writes one secure block.
    ///
    /// `level_root` is the chain root whose key-set walk governs this
    /// write (the block's parent level, or the root chain itself for
    /// root-chain maintenance).
    async fn write_signed(
        &self,
        prev: Option<BlockHash>,
        parent: Option<BlockHash>,
        level_root: BlockHash,
        kind: BlockKind,
        body: Vec<u8>,
        signer: &dyn BlockSigner,
    ) -> Result<BlockHash> {
        let now = self.tree.chain().clock().now().await;

        let record = signer
            .sign_block(&SigningRequest {
                prev,
                parent,
                kind,
                body: body.clone(),
            })
            .await?;

        let message = signing_bytes(prev.as_ref(), parent.as_ref(), kind, &body);
        let ok = self
            .tree
            .chain()
            .crypto()
            .verify(&record.public_key, &record.signature, &message)
            .await?;
        if !ok {
            return Err(BlocktreeError::invalid_signature(
                L,
                InvalidSignatureReason::DoesNotMatch,
            ));
        }

        self.authorize(&level_root, &record.public_key, KeyAction::Write, now)
            .await?;

        let payload = encode_secure_payload(kind, Some(&record), &body)?;
        self.tree
            .write_block(
                &NewTreeBlock {
                    prev,
                    parent,
                    layer: Layer::SecureBlocktree,
                    data: payload,
                },
                &WriteOptions::default(),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::providers::{KeyPair, KeyPairSigner, ManualClock, SoftwareCrypto};
    use crate::storage::InMemoryStorage;
    use crate::types::secure::KeyEntry;

    use async_trait::async_trait;

    type TestSecure = SecureBlocktree<InMemoryStorage, InMemoryCache, ManualClock, SoftwareCrypto>;

    fn test_secure() -> TestSecure {
        SecureBlocktree::new(
            InMemoryStorage::new(),
            InMemoryCache::new(),
            ManualClock::new(),
            SoftwareCrypto::new(),
        )
    }

    async fn generate_pair() -> KeyPair {
        SoftwareCrypto::new()
            .generate_key_pair()
            .await
            .expect("keygen")
    }

    fn write_keys(pair: &KeyPair) -> KeySet {
        let mut set = KeySet::new();
        set.grant(KeyAction::Write, KeyEntry::forever(pair.public_key.clone()));
        set
    }

    struct Installed {
        installation: RootInstallation,
        root_pair: KeyPair,
        zone_pair: KeyPair,
    }

    async fn install(secure: &TestSecure) -> Installed {
        let root_pair = generate_pair().await;
        let zone_pair = generate_pair().await;

        let root_signer = KeyPairSigner::from_key_pair(&root_pair).expect("signer");
        let installation = secure
            .install_root(
                &write_keys(&root_pair),
                &write_keys(&zone_pair),
                &root_signer,
            )
            .await
            .expect("install root");

        Installed {
            installation,
            root_pair,
            zone_pair,
        }
    }

    fn signer_for(pair: &KeyPair) -> KeyPairSigner {
        KeyPairSigner::from_key_pair(pair).expect("signer")
    }

    /// Signs over a body other than the one requested, producing a
    /// cryptographically broken record.
    struct TamperingSigner {
        inner: KeyPairSigner,
    }

    #[async_trait]
    impl crate::providers::BlockSigner for TamperingSigner {
        async fn sign_block(&self, request: &SigningRequest) -> crate::error::Result<SignatureRecord> {
            let mut tampered = request.clone();
            tampered.body = b"something else entirely".to_vec();
            self.inner.sign_block(&tampered).await
        }
    }

    #[tokio::test]
    async fn install_root_writes_anchor_zone_and_keys() {
        let secure = test_secure();
        let installed = install(&secure).await;

        assert_eq!(
            secure.tree().chain().count_blocks().await.expect("count"),
            3
        );

        let root = secure
            .read_secure_block(&installed.installation.root)
            .await
            .expect("read")
            .expect("root exists");
        assert_eq!(root.kind, BlockKind::Root);
        assert!(root.signature.is_none());
        assert!(root.body.as_keys().is_some());
        assert!(root.tree.parent.is_none());

        let zone = secure
            .read_secure_block(&installed.installation.root_zone)
            .await
            .expect("read")
            .expect("zone exists");
        assert_eq!(zone.kind, BlockKind::Zone);
        assert_eq!(zone.tree.parent, Some(installed.installation.root));
        assert!(zone.signature.is_some());

        let keys = secure
            .read_secure_block(&installed.installation.root_zone_keys)
            .await
            .expect("read")
            .expect("keys exist");
        assert_eq!(keys.kind, BlockKind::Keys);
        assert_eq!(keys.tree.prev(), Some(installed.installation.root_zone));
    }

    #[tokio::test]
    async fn second_install_fails_on_non_empty_store() {
        let secure = test_secure();
        let installed = install(&secure).await;

        let signer = signer_for(&installed.root_pair);
        let err = secure
            .install_root(
                &write_keys(&installed.root_pair),
                &write_keys(&installed.zone_pair),
                &signer,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BlocktreeError::InvalidRoot));
    }

    #[tokio::test]
    async fn zone_lifecycle_matches_authority_hierarchy() {
        let secure = test_secure();
        let installed = install(&secure).await;
        let zone_signer = signer_for(&installed.zone_pair);

        // Create a zone under the root zone, signed by the root-zone
        // write key.
        let mut zone_options = OptionsRecord::new();
        zone_options.set("name", "ORIGINAL");
        let z = secure
            .create_zone(
                &installed.installation.root_zone,
                &zone_options,
                None,
                &zone_signer,
            )
            .await
            .expect("create zone");

        // set_options signed by the root-zone write key succeeds.
        let mut rename = OptionsRecord::new();
        rename.set("name", "NEW NAME");
        secure
            .set_options(&z, &rename, &zone_signer)
            .await
            .expect("rename by zone authority");

        // The same call signed by the root write key also succeeds (the
        // walk continues up to the root key set).
        let root_signer = signer_for(&installed.root_pair);
        secure
            .set_options(&z, &rename, &root_signer)
            .await
            .expect("rename by root authority");

        // Give the zone its own key, then try to mutate the zone chain
        // with it: authority over a chain sits with its ancestors, so
        // the zone's own key is not accepted.
        let z_pair = generate_pair().await;
        secure
            .set_keys(&z, &write_keys(&z_pair), &zone_signer)
            .await
            .expect("set zone keys");

        let z_signer = signer_for(&z_pair);
        let err = secure.set_options(&z, &rename, &z_signer).await.unwrap_err();
        match err {
            BlocktreeError::InvalidSignature { reason, .. } => {
                assert_eq!(reason, InvalidSignatureReason::Unauthorized);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // The zone's key does govern the zone's children.
        let id = secure
            .create_identity(&z, &OptionsRecord::new(), None, &z_signer)
            .await
            .expect("create identity under zone");
        let id_block = secure
            .read_secure_block(&id)
            .await
            .expect("read")
            .expect("identity exists");
        assert_eq!(id_block.kind, BlockKind::Identity);
        assert_eq!(id_block.tree.parent, Some(z));
    }

    #[tokio::test]
    async fn foreign_signer_is_unauthorized() {
        let secure = test_secure();
        let installed = install(&secure).await;

        let outsider = generate_pair().await;
        let outsider_signer = signer_for(&outsider);

        let err = secure
            .create_zone(
                &installed.installation.root_zone,
                &OptionsRecord::new(),
                None,
                &outsider_signer,
            )
            .await
            .unwrap_err();
        match err {
            BlocktreeError::InvalidSignature { reason, .. } => {
                assert_eq!(reason, InvalidSignatureReason::Unauthorized);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn tampered_signature_does_not_match() {
        let secure = test_secure();
        let installed = install(&secure).await;

        let tampering = TamperingSigner {
            inner: signer_for(&installed.zone_pair),
        };
        let err = secure
            .create_zone(
                &installed.installation.root_zone,
                &OptionsRecord::new(),
                None,
                &tampering,
            )
            .await
            .unwrap_err();
        match err {
            BlocktreeError::InvalidSignature { reason, .. } => {
                assert_eq!(reason, InvalidSignatureReason::DoesNotMatch);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn identity_under_root_violates_parent_type_table() {
        let secure = test_secure();
        let installed = install(&secure).await;
        let root_signer = signer_for(&installed.root_pair);

        let err = secure
            .create_identity(
                &installed.installation.root,
                &OptionsRecord::new(),
                None,
                &root_signer,
            )
            .await
            .unwrap_err();
        match err {
            BlocktreeError::InvalidBlock { reason, .. } => {
                assert_eq!(reason, InvalidBlockReason::InvalidParentType);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_target_is_null() {
        let secure = test_secure();
        install(&secure).await;

        let ghost = BlockHash::compute(b"ghost");
        let pair = generate_pair().await;
        let err = secure
            .create_zone(&ghost, &OptionsRecord::new(), None, &signer_for(&pair))
            .await
            .unwrap_err();
        match err {
            BlocktreeError::InvalidBlock { reason, .. } => {
                assert_eq!(reason, InvalidBlockReason::IsNull);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn root_chain_accepts_keys_but_not_options() {
        let secure = test_secure();
        let installed = install(&secure).await;
        let root_signer = signer_for(&installed.root_pair);

        // Rotation on the root chain is allowed.
        let next_root = generate_pair().await;
        let mut rotated = write_keys(&installed.root_pair);
        rotated.grant(
            KeyAction::Write,
            KeyEntry::forever(next_root.public_key.clone()),
        );
        secure
            .set_keys(&installed.installation.root, &rotated, &root_signer)
            .await
            .expect("rotate root keys");

        // The rotated-in key is now honoured.
        secure
            .create_zone(
                &installed.installation.root,
                &OptionsRecord::new(),
                None,
                &signer_for(&next_root),
            )
            .await
            .expect("create zone with rotated key");

        // Anything other than key maintenance on the root chain is
        // rejected.
        let err = secure
            .set_options(
                &installed.installation.root,
                &OptionsRecord::new(),
                &root_signer,
            )
            .await
            .unwrap_err();
        match err {
            BlocktreeError::InvalidBlock { reason, .. } => {
                assert_eq!(reason, InvalidBlockReason::IsNull);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn expired_key_window_is_unauthorized() {
        let secure = test_secure();
        let installed = install(&secure).await;
        let zone_signer = signer_for(&installed.zone_pair);

        // Zone admin whose write window closes at t = 50.
        let admin = generate_pair().await;
        let mut admin_keys = KeySet::new();
        admin_keys.grant(
            KeyAction::Write,
            KeyEntry {
                public_key: admin.public_key.clone(),
                valid_from: 0,
                valid_to: 50,
                encrypted_secret: None,
            },
        );
        let z = secure
            .create_zone(
                &installed.installation.root_zone,
                &OptionsRecord::new(),
                Some(&admin_keys),
                &zone_signer,
            )
            .await
            .expect("create zone");

        // Inside the window the admin can create under the zone.
        let admin_signer = signer_for(&admin);
        secure
            .create_identity(&z, &OptionsRecord::new(), None, &admin_signer)
            .await
            .expect("create inside window");

        // Past the window the same signer is rejected.
        secure.tree().chain().clock().set_next_timestamp(1_000);
        let err = secure
            .create_identity(&z, &OptionsRecord::new(), None, &admin_signer)
            .await
            .unwrap_err();
        match err {
            BlocktreeError::InvalidSignature { reason, .. } => {
                assert_eq!(reason, InvalidSignatureReason::Unauthorized);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn revoked_key_is_rejected_and_unknown_revocation_fails() {
        let secure = test_secure();
        let installed = install(&secure).await;
        let zone_signer = signer_for(&installed.zone_pair);

        let admin = generate_pair().await;
        let z = secure
            .create_zone(
                &installed.installation.root_zone,
                &OptionsRecord::new(),
                Some(&write_keys(&admin)),
                &zone_signer,
            )
            .await
            .expect("create zone");

        let admin_signer = signer_for(&admin);
        secure
            .create_identity(&z, &OptionsRecord::new(), None, &admin_signer)
            .await
            .expect("create before revocation");

        // Revoke the admin key on the zone chain (authorized by the
        // parent level).
        secure
            .revoke_keys(&z, &[admin.public_key.clone()], &zone_signer)
            .await
            .expect("revoke");

        let err = secure
            .create_identity(&z, &OptionsRecord::new(), None, &admin_signer)
            .await
            .unwrap_err();
        match err {
            BlocktreeError::InvalidSignature { reason, .. } => {
                assert_eq!(reason, InvalidSignatureReason::Unauthorized);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // Revoking a key that is nowhere in the effective set fails.
        let stranger = generate_pair().await;
        let err = secure
            .revoke_keys(&z, &[stranger.public_key.clone()], &zone_signer)
            .await
            .unwrap_err();
        match err {
            BlocktreeError::InvalidKey { reason, .. } => {
                assert_eq!(reason, InvalidKeyReason::NotFound);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn collections_and_records() {
        let secure = test_secure();
        let installed = install(&secure).await;
        let zone_signer = signer_for(&installed.zone_pair);

        let z = secure
            .create_zone(
                &installed.installation.root_zone,
                &OptionsRecord::new(),
                None,
                &zone_signer,
            )
            .await
            .expect("create zone");
        let coll = secure
            .create_collection(&z, &OptionsRecord::new(), None, &zone_signer)
            .await
            .expect("create collection");

        let mut record = OptionsRecord::new();
        record.set("payload", "first measurement");
        let rec = secure
            .add_record(&coll, &record, &zone_signer)
            .await
            .expect("add record");

        let stored = secure
            .read_secure_block(&rec)
            .await
            .expect("read")
            .expect("record exists");
        assert_eq!(stored.kind, BlockKind::Options);
        assert_eq!(
            stored.body.as_options().and_then(|o| o.get("payload")),
            Some("first measurement")
        );

        // add_record is collection-only.
        let err = secure
            .add_record(&z, &record, &zone_signer)
            .await
            .unwrap_err();
        match err {
            BlocktreeError::InvalidBlock { reason, .. } => {
                assert_eq!(reason, InvalidBlockReason::InvalidParentType);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn validate_signature_and_trace() {
        let secure = test_secure();
        let installed = install(&secure).await;
        let zone_signer = signer_for(&installed.zone_pair);

        let z = secure
            .create_zone(
                &installed.installation.root_zone,
                &OptionsRecord::new(),
                None,
                &zone_signer,
            )
            .await
            .expect("create zone");

        secure.validate_signature(&z).await.expect("zone validates");

        // The root block has no signature record to validate.
        let err = secure
            .validate_signature(&installed.installation.root)
            .await
            .unwrap_err();
        match err {
            BlocktreeError::InvalidSignature { reason, .. } => {
                assert_eq!(reason, InvalidSignatureReason::NotFound);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // The trace climbs from the zone's authorizing level to the
        // root: the root-zone key set first, the root key set last.
        let trace = secure.perform_signature_trace(&z).await.expect("trace");
        assert_eq!(
            trace,
            vec![
                installed.installation.root_zone_keys,
                installed.installation.root
            ]
        );
    }

    #[tokio::test]
    async fn appends_extend_the_chain_head() {
        let secure = test_secure();
        let installed = install(&secure).await;
        let zone_signer = signer_for(&installed.zone_pair);

        let z = secure
            .create_zone(
                &installed.installation.root_zone,
                &OptionsRecord::new(),
                None,
                &zone_signer,
            )
            .await
            .expect("create zone");

        let mut options = OptionsRecord::new();
        options.set("step", "one");
        let o1 = secure
            .set_options(&z, &options, &zone_signer)
            .await
            .expect("first append");
        options.set("step", "two");
        let o2 = secure
            .set_options(&z, &options, &zone_signer)
            .await
            .expect("second append");

        let first = secure
            .read_secure_block(&o1)
            .await
            .expect("read")
            .expect("exists");
        let second = secure
            .read_secure_block(&o2)
            .await
            .expect("read")
            .expect("exists");
        assert_eq!(first.tree.prev(), Some(z));
        assert_eq!(second.tree.prev(), Some(o1));

        // Appends carry the chain's parent edge without becoming
        // children of it.
        assert_eq!(second.tree.parent, Some(installed.installation.root_zone));
    }
}
