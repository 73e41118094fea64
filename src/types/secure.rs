//! L3 typed payloads.
//!
//! Every secure block's L2 payload carries a typed header:
//!
//! ```text
//! [1 byte: block kind]
//! [signature record, absent for the root kind]
//! [kind-specific body]
//! ```
//!
//! `root` and `keys` bodies are key sets; `zone`, `identity`,
//! `collection`, and `options` bodies are options records. The signature
//! covers `prev ∥ parent ∥ kind ∥ body` (see [`signing_bytes`]).

use std::collections::BTreeMap;

use crate::codec;
use crate::error::{BlocktreeError, Result, SerializationReason};
use crate::types::{BlockHash, Layer, PublicKey, Signature};

const L: Layer = Layer::SecureBlocktree;

/// Validity-window sentinel: the key has been explicitly revoked.
pub const VALID_TO_REVOKED: u64 = 0;
/// Validity-window sentinel: the key never expires.
pub const VALID_TO_FOREVER: u64 = u64::MAX;

/// Typed block kinds.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum BlockKind {
    /// The single system-wide trust anchor; carries the root key set.
    Root,
    /// A named authority region; may nest under another zone or the root.
    Zone,
    /// A principal within a zone.
    Identity,
    /// A container for domain data under an identity or zone.
    Collection,
    /// Key rotation, addition, or revocation on an existing chain.
    Keys,
    /// Named metadata appended to an existing chain.
    Options,
}

impl BlockKind {
    /// Wire tag byte for this kind.
    pub fn tag(self) -> u8 {
        match self {
            BlockKind::Root => 1,
            BlockKind::Zone => 2,
            BlockKind::Identity => 3,
            BlockKind::Collection => 4,
            BlockKind::Keys => 5,
            BlockKind::Options => 6,
        }
    }

    /// Parses a wire tag byte.
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(BlockKind::Root),
            2 => Ok(BlockKind::Zone),
            3 => Ok(BlockKind::Identity),
            4 => Ok(BlockKind::Collection),
            5 => Ok(BlockKind::Keys),
            6 => Ok(BlockKind::Options),
            _ => Err(BlocktreeError::serialization(
                L,
                SerializationReason::ArgumentOutOfBounds,
            )),
        }
    }

    /// Parent-type rule table: whether `child` may be created under (or
    /// appended to a chain rooted at) a block of this kind.
    ///
    /// The match is exhaustive over both kinds, which doubles as the
    /// completeness check for the dispatch table.
    pub fn allows_child(self, child: BlockKind) -> bool {
        match (self, child) {
            (_, BlockKind::Root) => false,

            (BlockKind::Root, BlockKind::Zone) => true,
            (BlockKind::Root, BlockKind::Identity) => false,
            (BlockKind::Root, BlockKind::Collection) => false,
            (BlockKind::Root, BlockKind::Keys) => true,
            (BlockKind::Root, BlockKind::Options) => true,

            (BlockKind::Zone, BlockKind::Zone) => true,
            (BlockKind::Zone, BlockKind::Identity) => true,
            (BlockKind::Zone, BlockKind::Collection) => true,
            (BlockKind::Zone, BlockKind::Keys) => true,
            (BlockKind::Zone, BlockKind::Options) => true,

            (BlockKind::Identity, BlockKind::Zone) => false,
            (BlockKind::Identity, BlockKind::Identity) => false,
            (BlockKind::Identity, BlockKind::Collection) => true,
            (BlockKind::Identity, BlockKind::Keys) => true,
            (BlockKind::Identity, BlockKind::Options) => true,

            (BlockKind::Collection, BlockKind::Zone) => false,
            (BlockKind::Collection, BlockKind::Identity) => false,
            (BlockKind::Collection, BlockKind::Collection) => false,
            (BlockKind::Collection, BlockKind::Keys) => true,
            (BlockKind::Collection, BlockKind::Options) => true,

            (BlockKind::Keys, _) => false,
            (BlockKind::Options, _) => false,
        }
    }
}

/// Actions a key can be authorized for.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum KeyAction {
    /// Read / decrypt authority.
    Read,
    /// Write / sign authority.
    Write,
}

impl KeyAction {
    /// Wire tag byte for this action.
    pub fn tag(self) -> u8 {
        match self {
            KeyAction::Read => 1,
            KeyAction::Write => 2,
        }
    }

    /// Parses a wire tag byte.
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(KeyAction::Read),
            2 => Ok(KeyAction::Write),
            _ => Err(BlocktreeError::serialization(
                L,
                SerializationReason::ArgumentOutOfBounds,
            )),
        }
    }
}

/// One authorized key with its validity window.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyEntry {
    /// The authorized public key.
    pub public_key: PublicKey,
    /// Start of the validity window (inclusive, epoch millis).
    pub valid_from: u64,
    /// End of the validity window (inclusive). [`VALID_TO_FOREVER`] means
    /// no expiry; [`VALID_TO_REVOKED`] means explicitly revoked.
    pub valid_to: u64,
    /// Optional encrypted private-key material for the trusted-read path.
    pub encrypted_secret: Option<Vec<u8>>,
}

impl KeyEntry {
    /// A non-expiring entry with no attached secret.
    pub fn forever(public_key: PublicKey) -> Self {
        Self {
            public_key,
            valid_from: 0,
            valid_to: VALID_TO_FOREVER,
            encrypted_secret: None,
        }
    }

    /// Whether `at` falls inside this entry's validity window.
    pub fn valid_at(&self, at: u64) -> bool {
        self.valid_to != VALID_TO_REVOKED && self.valid_from <= at && at <= self.valid_to
    }
}

/// Outcome of matching a key against a key set at a point in time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyDecision {
    /// A matching entry covers the timestamp.
    Granted,
    /// A matching entry exists but its window has passed.
    Expired,
    /// A matching entry exists but was explicitly revoked.
    Revoked,
    /// No entry matches the key and action at all.
    NotFound,
}

/// A mapping from action to an ordered list of time-windowed keys.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct KeySet {
    entries: BTreeMap<KeyAction, Vec<KeyEntry>>,
}

impl KeySet {
    /// An empty key set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry under `action`, preserving insertion order.
    pub fn grant(&mut self, action: KeyAction, entry: KeyEntry) {
        self.entries.entry(action).or_default().push(entry);
    }

    /// Entries recorded for `action`.
    pub fn entries(&self, action: KeyAction) -> &[KeyEntry] {
        self.entries.get(&action).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All `(action, entries)` groups, ordered by action tag.
    pub fn groups(&self) -> impl Iterator<Item = (KeyAction, &[KeyEntry])> {
        self.entries.iter().map(|(a, v)| (*a, v.as_slice()))
    }

    /// Whether the set holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.values().all(Vec::is_empty)
    }

    /// Matches `public_key` for `action` at time `at`.
    ///
    /// When several entries name the same key, a granted window wins;
    /// otherwise revocation outranks plain expiry in the verdict.
    pub fn decision(&self, action: KeyAction, public_key: &PublicKey, at: u64) -> KeyDecision {
        let mut verdict = KeyDecision::NotFound;
        for entry in self.entries(action) {
            if entry.public_key != *public_key {
                continue;
            }
            if entry.valid_at(at) {
                return KeyDecision::Granted;
            }
            if entry.valid_to == VALID_TO_REVOKED {
                verdict = KeyDecision::Revoked;
            } else if verdict == KeyDecision::NotFound {
                verdict = KeyDecision::Expired;
            }
        }
        verdict
    }

    /// Serializes the key set.
    ///
    /// Layout: `[1: group count]` then per group `[1: action] [2: entry
    /// count]` and per entry `[var: public key] [8: valid_from]
    /// [8: valid_to] [var: encrypted secret, empty when absent]`.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        codec::put_uint(L, &mut buf, self.entries.len() as u64, 1)?;
        for (action, entries) in &self.entries {
            codec::put_uint(L, &mut buf, action.tag() as u64, 1)?;
            codec::put_uint(L, &mut buf, entries.len() as u64, 2)?;
            for entry in entries {
                codec::put_var_bytes(L, &mut buf, entry.public_key.as_bytes())?;
                codec::put_uint(L, &mut buf, entry.valid_from, 8)?;
                codec::put_uint(L, &mut buf, entry.valid_to, 8)?;
                let secret = entry.encrypted_secret.as_deref().unwrap_or(&[]);
                codec::put_var_bytes(L, &mut buf, secret)?;
            }
        }
        Ok(buf)
    }

    /// Decodes a key set, consuming bytes at `*offset`.
    pub fn decode(bytes: &[u8], offset: &mut usize) -> Result<KeySet> {
        let mut set = KeySet::new();
        let groups = codec::get_uint(L, bytes, offset, 1)?;
        for _ in 0..groups {
            let action = KeyAction::from_tag(codec::get_uint(L, bytes, offset, 1)? as u8)?;
            let count = codec::get_uint(L, bytes, offset, 2)?;
            for _ in 0..count {
                let public_key = PublicKey(codec::get_var_bytes(L, bytes, offset)?);
                let valid_from = codec::get_uint(L, bytes, offset, 8)?;
                let valid_to = codec::get_uint(L, bytes, offset, 8)?;
                let secret = codec::get_var_bytes(L, bytes, offset)?;
                set.grant(
                    action,
                    KeyEntry {
                        public_key,
                        valid_from,
                        valid_to,
                        encrypted_secret: if secret.is_empty() { None } else { Some(secret) },
                    },
                );
            }
        }
        Ok(set)
    }
}

/// Named key/value metadata carried by zone, identity, collection, and
/// options bodies.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OptionsRecord {
    entries: BTreeMap<String, String>,
}

impl OptionsRecord {
    /// An empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a key, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Looks up a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// All entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the record holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes the record as `[2: pair count]` followed by
    /// length-prefixed key and value fields, in key order.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        codec::put_uint(L, &mut buf, self.entries.len() as u64, 2)?;
        for (key, value) in &self.entries {
            codec::put_var_bytes(L, &mut buf, key.as_bytes())?;
            codec::put_var_bytes(L, &mut buf, value.as_bytes())?;
        }
        Ok(buf)
    }

    /// Decodes a record, consuming bytes at `*offset`.
    pub fn decode(bytes: &[u8], offset: &mut usize) -> Result<OptionsRecord> {
        let mut record = OptionsRecord::new();
        let count = codec::get_uint(L, bytes, offset, 2)?;
        for _ in 0..count {
            let key = String::from_utf8(codec::get_var_bytes(L, bytes, offset)?).map_err(|_| {
                BlocktreeError::serialization(L, SerializationReason::ArgumentOutOfBounds)
            })?;
            let value =
                String::from_utf8(codec::get_var_bytes(L, bytes, offset)?).map_err(|_| {
                    BlocktreeError::serialization(L, SerializationReason::ArgumentOutOfBounds)
                })?;
            record.set(key, value);
        }
        Ok(record)
    }
}

/// A signature over a block's canonical bytes, plus the signing key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignatureRecord {
    /// The public half of the signing key.
    pub public_key: PublicKey,
    /// Detached signature over [`signing_bytes`].
    pub signature: Signature,
}

impl SignatureRecord {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        codec::put_var_bytes(L, buf, self.public_key.as_bytes())?;
        codec::put_var_bytes(L, buf, self.signature.as_bytes())?;
        Ok(())
    }

    fn decode(bytes: &[u8], offset: &mut usize) -> Result<SignatureRecord> {
        let public_key = PublicKey(codec::get_var_bytes(L, bytes, offset)?);
        let signature = Signature(codec::get_var_bytes(L, bytes, offset)?);
        Ok(SignatureRecord {
            public_key,
            signature,
        })
    }
}

/// Parsed, typed body of a secure block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SecureBody {
    /// Key set (`root` and `keys` kinds).
    Keys(KeySet),
    /// Options record (`zone`, `identity`, `collection`, `options`).
    Options(OptionsRecord),
}

impl SecureBody {
    /// Decodes a body for the given kind.
    pub fn decode(kind: BlockKind, bytes: &[u8]) -> Result<SecureBody> {
        let mut offset = 0;
        match kind {
            BlockKind::Root | BlockKind::Keys => {
                Ok(SecureBody::Keys(KeySet::decode(bytes, &mut offset)?))
            }
            _ => Ok(SecureBody::Options(OptionsRecord::decode(
                bytes,
                &mut offset,
            )?)),
        }
    }

    /// The key set, when this body carries one.
    pub fn as_keys(&self) -> Option<&KeySet> {
        match self {
            SecureBody::Keys(set) => Some(set),
            SecureBody::Options(_) => None,
        }
    }

    /// The options record, when this body carries one.
    pub fn as_options(&self) -> Option<&OptionsRecord> {
        match self {
            SecureBody::Options(record) => Some(record),
            SecureBody::Keys(_) => None,
        }
    }
}

/// Assembles the canonical bytes covered by a block signature:
/// `prev-or-zeros(32) ∥ parent-or-zeros(32) ∥ kind(1) ∥ body`.
pub fn signing_bytes(
    prev: Option<&BlockHash>,
    parent: Option<&BlockHash>,
    kind: BlockKind,
    body: &[u8],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32 + 32 + 1 + body.len());
    codec::put_opt_hash(&mut buf, prev);
    codec::put_opt_hash(&mut buf, parent);
    buf.push(kind.tag());
    buf.extend_from_slice(body);
    buf
}

/// Serializes a secure payload: kind tag, signature record (non-root
/// kinds only), then the raw body bytes.
pub fn encode_secure_payload(
    kind: BlockKind,
    signature: Option<&SignatureRecord>,
    body: &[u8],
) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(1 + body.len());
    buf.push(kind.tag());
    match (kind, signature) {
        (BlockKind::Root, _) => {}
        (_, Some(record)) => record.encode(&mut buf)?,
        (_, None) => {
            return Err(BlocktreeError::invalid_signature(
                L,
                crate::error::InvalidSignatureReason::NotFound,
            ))
        }
    }
    buf.extend_from_slice(body);
    Ok(buf)
}

/// Splits a secure payload into its kind, signature record, and raw body
/// bytes.
pub fn decode_secure_payload(
    payload: &[u8],
) -> Result<(BlockKind, Option<SignatureRecord>, Vec<u8>)> {
    let mut offset = 0;
    let kind = BlockKind::from_tag(codec::get_uint(L, payload, &mut offset, 1)? as u8)?;
    let signature = match kind {
        BlockKind::Root => None,
        _ => Some(SignatureRecord::decode(payload, &mut offset)?),
    };
    Ok((kind, signature, payload[offset..].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_key(byte: u8) -> PublicKey {
        PublicKey(vec![byte; 32])
    }

    fn dummy_record() -> SignatureRecord {
        SignatureRecord {
            public_key: dummy_key(7),
            signature: Signature(vec![9; 64]),
        }
    }

    #[test]
    fn kind_tag_roundtrip() {
        for kind in [
            BlockKind::Root,
            BlockKind::Zone,
            BlockKind::Identity,
            BlockKind::Collection,
            BlockKind::Keys,
            BlockKind::Options,
        ] {
            assert_eq!(BlockKind::from_tag(kind.tag()).unwrap(), kind);
        }
        assert!(BlockKind::from_tag(0).is_err());
    }

    #[test]
    fn parent_type_rule_table() {
        use BlockKind::*;

        assert!(Root.allows_child(Zone));
        assert!(!Root.allows_child(Identity));
        assert!(!Root.allows_child(Collection));
        assert!(Root.allows_child(Keys));
        assert!(Root.allows_child(Options));

        assert!(Zone.allows_child(Zone));
        assert!(Zone.allows_child(Identity));
        assert!(Zone.allows_child(Collection));

        assert!(!Identity.allows_child(Zone));
        assert!(Identity.allows_child(Collection));

        assert!(!Collection.allows_child(Collection));
        assert!(Collection.allows_child(Keys));
        assert!(Collection.allows_child(Options));

        // Nothing nests under leaf kinds, and nothing may create a root.
        assert!(!Keys.allows_child(Options));
        assert!(!Options.allows_child(Keys));
        assert!(!Zone.allows_child(Root));
    }

    #[test]
    fn key_set_encode_decode_roundtrip() {
        let mut set = KeySet::new();
        set.grant(KeyAction::Write, KeyEntry::forever(dummy_key(1)));
        set.grant(
            KeyAction::Read,
            KeyEntry {
                public_key: dummy_key(2),
                valid_from: 10,
                valid_to: 20,
                encrypted_secret: Some(vec![0xAA, 0xBB]),
            },
        );

        let bytes = set.encode().expect("encode");
        let mut offset = 0;
        let decoded = KeySet::decode(&bytes, &mut offset).expect("decode");
        assert_eq!(offset, bytes.len());
        assert_eq!(decoded, set);
    }

    #[test]
    fn key_set_decision_granted_expired_revoked() {
        let mut set = KeySet::new();
        set.grant(
            KeyAction::Write,
            KeyEntry {
                public_key: dummy_key(1),
                valid_from: 0,
                valid_to: 100,
                encrypted_secret: None,
            },
        );
        set.grant(
            KeyAction::Write,
            KeyEntry {
                public_key: dummy_key(2),
                valid_from: 0,
                valid_to: VALID_TO_REVOKED,
                encrypted_secret: None,
            },
        );

        assert_eq!(
            set.decision(KeyAction::Write, &dummy_key(1), 50),
            KeyDecision::Granted
        );
        assert_eq!(
            set.decision(KeyAction::Write, &dummy_key(1), 101),
            KeyDecision::Expired
        );
        assert_eq!(
            set.decision(KeyAction::Write, &dummy_key(2), 50),
            KeyDecision::Revoked
        );
        assert_eq!(
            set.decision(KeyAction::Write, &dummy_key(3), 50),
            KeyDecision::NotFound
        );
        // Action scoping: the write grant does not cover reads.
        assert_eq!(
            set.decision(KeyAction::Read, &dummy_key(1), 50),
            KeyDecision::NotFound
        );
    }

    #[test]
    fn granted_window_wins_over_older_expired_entry() {
        let mut set = KeySet::new();
        set.grant(
            KeyAction::Write,
            KeyEntry {
                public_key: dummy_key(1),
                valid_from: 0,
                valid_to: 10,
                encrypted_secret: None,
            },
        );
        set.grant(
            KeyAction::Write,
            KeyEntry {
                public_key: dummy_key(1),
                valid_from: 11,
                valid_to: VALID_TO_FOREVER,
                encrypted_secret: None,
            },
        );
        assert_eq!(
            set.decision(KeyAction::Write, &dummy_key(1), 500),
            KeyDecision::Granted
        );
    }

    #[test]
    fn options_record_roundtrip() {
        let mut record = OptionsRecord::new();
        record.set("name", "NEW NAME").set("region", "eu-west");

        let bytes = record.encode().expect("encode");
        let mut offset = 0;
        let decoded = OptionsRecord::decode(&bytes, &mut offset).expect("decode");
        assert_eq!(decoded.get("name"), Some("NEW NAME"));
        assert_eq!(decoded.get("region"), Some("eu-west"));
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn secure_payload_roundtrip_non_root() {
        let body = OptionsRecord::new().set("k", "v").encode().expect("body");
        let record = dummy_record();
        let payload =
            encode_secure_payload(BlockKind::Zone, Some(&record), &body).expect("encode");

        let (kind, signature, decoded_body) = decode_secure_payload(&payload).expect("decode");
        assert_eq!(kind, BlockKind::Zone);
        assert_eq!(signature, Some(record));
        assert_eq!(decoded_body, body);
    }

    #[test]
    fn secure_payload_root_has_no_signature() {
        let body = KeySet::new().encode().expect("body");
        let payload = encode_secure_payload(BlockKind::Root, None, &body).expect("encode");

        let (kind, signature, _) = decode_secure_payload(&payload).expect("decode");
        assert_eq!(kind, BlockKind::Root);
        assert!(signature.is_none());
    }

    #[test]
    fn non_root_payload_requires_signature() {
        let err = encode_secure_payload(BlockKind::Keys, None, &[]).unwrap_err();
        match err {
            BlocktreeError::InvalidSignature { reason, .. } => {
                assert_eq!(reason, crate::error::InvalidSignatureReason::NotFound);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn signing_bytes_bind_links_kind_and_body() {
        let prev = BlockHash::compute(b"prev");
        let parent = BlockHash::compute(b"parent");
        let base = signing_bytes(Some(&prev), Some(&parent), BlockKind::Zone, b"body");

        assert_ne!(
            base,
            signing_bytes(None, Some(&parent), BlockKind::Zone, b"body")
        );
        assert_ne!(
            base,
            signing_bytes(Some(&prev), None, BlockKind::Zone, b"body")
        );
        assert_ne!(
            base,
            signing_bytes(Some(&prev), Some(&parent), BlockKind::Options, b"body")
        );
        assert_ne!(
            base,
            signing_bytes(Some(&prev), Some(&parent), BlockKind::Zone, b"tampered")
        );
    }
}
