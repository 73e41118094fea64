// src/main.rs
//
// Blocktree CLI: a thin command surface over the three-layer stack,
// wired with RocksDB storage, an in-process cache, the system clock,
// and software crypto.
//
// Exit codes: 0 success, 1 validation error, 2 signature error,
// 3 serialization error, 4 I/O error.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use blocktree::{
    BlockHash, BlockKind, BlocktreeConfig, BlocktreeError, CryptoProvider, InMemoryCache,
    KeyAction, KeyEntry, KeyPair, KeyPairSigner, KeySet, NewBlock, NewTreeBlock, OptionsRecord,
    PublicKey, Result, RocksDbConfig, RocksDbStorage, SecureBlocktree, SoftwareCrypto,
    SystemClock, TreeBlock, ValidationReport, WriteOptions, VALID_TO_FOREVER,
};

type Stack = blocktree::DefaultSecureBlocktree;

#[derive(Parser)]
#[command(name = "blocktree")]
#[command(about = "Layered, content-addressed, signature-authenticated block store")]
#[command(version)]
struct Cli {
    /// RocksDB database directory.
    #[arg(long, default_value = "data/blocktree-db")]
    db: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a block and print its decoded fields.
    ReadBlock {
        /// Block hash (hex).
        hash: String,
    },

    /// Write a raw block.
    WriteBlock {
        /// Previous block hash (hex); omit to start a new chain.
        #[arg(long)]
        prev: Option<String>,
        /// Inline payload string.
        #[arg(long, conflicts_with = "data_file")]
        data: Option<String>,
        /// File to read the payload from.
        #[arg(long)]
        data_file: Option<PathBuf>,
    },

    /// List stored block hashes.
    ListBlocks {
        /// Hex prefix filter.
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Read a block and print its parsed tree header.
    ReadTreeBlock {
        /// Block hash (hex).
        hash: String,
    },

    /// Write a tree block with an optional parent edge.
    WriteTreeBlock {
        /// Previous block hash (hex); omit to start a new chain.
        #[arg(long)]
        prev: Option<String>,
        /// Parent chain-root hash (hex).
        #[arg(long)]
        parent: Option<String>,
        /// Inline payload string.
        #[arg(long)]
        data: Option<String>,
    },

    /// Walk parent links starting at a block.
    ParentScan {
        /// Block hash (hex).
        hash: String,
    },

    /// List the chain roots parented under a block.
    ChildScan {
        /// Block hash (hex).
        hash: String,
    },

    /// Print a block's parent link.
    GetParentBlock {
        /// Block hash (hex).
        hash: String,
    },

    /// Validate the chain ending at a block.
    ValidateBlockchain {
        /// Tip block hash (hex).
        hash: String,
    },

    /// Validate a chain and every ancestor chain above it.
    ValidateBlocktree {
        /// Block hash (hex).
        hash: String,
    },

    /// Install the trust anchor into an empty store, generating the
    /// root and root-zone key pairs.
    InstallRoot {
        /// File to write the root signing seed to (hex).
        #[arg(long)]
        root_key_file: PathBuf,
        /// File to write the root-zone signing seed to (hex).
        #[arg(long)]
        zone_key_file: PathBuf,
    },

    /// Create a zone under a block's chain.
    CreateZone {
        /// Target block hash (hex).
        block: String,
        /// Signing seed file (hex).
        #[arg(long)]
        key_file: PathBuf,
        /// Zone options as key=value pairs.
        #[arg(long = "option", value_parser = parse_key_val)]
        options: Vec<(String, String)>,
        /// Generate a key pair for the new chain and write its seed here.
        #[arg(long)]
        new_key_file: Option<PathBuf>,
    },

    /// Create an identity under a block's chain.
    CreateIdentity {
        /// Target block hash (hex).
        block: String,
        /// Signing seed file (hex).
        #[arg(long)]
        key_file: PathBuf,
        /// Identity options as key=value pairs.
        #[arg(long = "option", value_parser = parse_key_val)]
        options: Vec<(String, String)>,
        /// Generate a key pair for the new chain and write its seed here.
        #[arg(long)]
        new_key_file: Option<PathBuf>,
    },

    /// Create a collection under a block's chain.
    CreateCollection {
        /// Target block hash (hex).
        block: String,
        /// Signing seed file (hex).
        #[arg(long)]
        key_file: PathBuf,
        /// Collection options as key=value pairs.
        #[arg(long = "option", value_parser = parse_key_val)]
        options: Vec<(String, String)>,
        /// Generate a key pair for the new chain and write its seed here.
        #[arg(long)]
        new_key_file: Option<PathBuf>,
    },

    /// Append a key set to a block's chain.
    SetKeys {
        /// Target block hash (hex).
        block: String,
        /// Signing seed file (hex).
        #[arg(long)]
        key_file: PathBuf,
        /// Public keys (hex) to grant read and write authority.
        #[arg(long = "grant", required = true)]
        grants: Vec<String>,
        /// Start of the granted validity window (epoch millis).
        #[arg(long)]
        valid_from: Option<u64>,
        /// End of the granted validity window (epoch millis).
        #[arg(long)]
        valid_to: Option<u64>,
    },

    /// Append options to a block's chain.
    SetOptions {
        /// Target block hash (hex).
        block: String,
        /// Signing seed file (hex).
        #[arg(long)]
        key_file: PathBuf,
        /// Options as key=value pairs.
        #[arg(long = "option", value_parser = parse_key_val, required = true)]
        options: Vec<(String, String)>,
    },

    /// Revoke keys on a block's chain.
    RevokeKeys {
        /// Target block hash (hex).
        block: String,
        /// Signing seed file (hex).
        #[arg(long)]
        key_file: PathBuf,
        /// Public keys (hex) to revoke.
        #[arg(long = "revoke", required = true)]
        revoked: Vec<String>,
    },

    /// Append a record to a collection chain.
    AddRecord {
        /// Target block hash (hex).
        block: String,
        /// Signing seed file (hex).
        #[arg(long)]
        key_file: PathBuf,
        /// Record fields as key=value pairs.
        #[arg(long = "field", value_parser = parse_key_val, required = true)]
        fields: Vec<(String, String)>,
    },

    /// Verify a stored block's signature and authorization.
    ValidateSignature {
        /// Block hash (hex).
        block: String,
    },

    /// Print the key-set blocks governing a block, up to the root.
    SignatureTrace {
        /// Block hash (hex).
        block: String,
    },
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) => Ok((key.to_string(), value.to_string())),
        None => Err(format!("expected key=value, got {s:?}")),
    }
}

#[derive(Serialize)]
struct BlockDto {
    hash: String,
    prev: Option<String>,
    nonce: u64,
    timestamp: u64,
    data_hex: String,
}

#[derive(Serialize)]
struct TreeBlockDto {
    hash: String,
    prev: Option<String>,
    parent: Option<String>,
    layer: String,
    payload_hex: String,
}

#[derive(Serialize)]
struct WriteResult {
    hash: String,
}

#[derive(Serialize)]
struct InstallResult {
    root: String,
    root_zone: String,
    root_zone_keys: String,
}

impl TreeBlockDto {
    fn from_tree_block(block: &TreeBlock) -> Self {
        Self {
            hash: block.hash().to_hex(),
            prev: block.prev().map(|h| h.to_hex()),
            parent: block.parent.map(|h| h.to_hex()),
            layer: block.layer.to_string(),
            payload_hex: hex::encode(&block.payload),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn exit_code(err: &BlocktreeError) -> u8 {
    match err {
        BlocktreeError::InvalidBlock { .. }
        | BlocktreeError::InvalidKey { .. }
        | BlocktreeError::InvalidRoot => 1,
        BlocktreeError::InvalidSignature { .. } => 2,
        BlocktreeError::Serialization { .. } => 3,
        BlocktreeError::Storage(_) => 4,
    }
}

fn open_stack(db: &str) -> Result<Stack> {
    let cfg = BlocktreeConfig {
        storage: RocksDbConfig {
            path: db.to_string(),
            create_if_missing: true,
        },
    };
    let storage = RocksDbStorage::open(&cfg.storage)?;
    Ok(SecureBlocktree::new(
        storage,
        InMemoryCache::new(),
        SystemClock,
        SoftwareCrypto::new(),
    ))
}

fn parse_hash(s: &str) -> Result<BlockHash> {
    BlockHash::from_hex(s)
}

fn parse_opt_hash(s: &Option<String>) -> Result<Option<BlockHash>> {
    s.as_deref().map(BlockHash::from_hex).transpose()
}

fn parse_public_key(s: &str) -> Result<PublicKey> {
    let bytes = hex::decode(s)
        .map_err(|_| BlocktreeError::Storage(format!("invalid public key hex: {s:?}")))?;
    Ok(PublicKey(bytes))
}

fn options_record(pairs: &[(String, String)]) -> OptionsRecord {
    let mut record = OptionsRecord::new();
    for (key, value) in pairs {
        record.set(key.clone(), value.clone());
    }
    record
}

fn load_signer(path: &Path) -> Result<KeyPairSigner> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| BlocktreeError::Storage(format!("cannot read {}: {e}", path.display())))?;
    let seed = hex::decode(text.trim())
        .map_err(|_| BlocktreeError::Storage(format!("{} is not a hex seed", path.display())))?;
    KeyPairSigner::from_seed(&seed)
}

async fn generate_key_file(stack: &Stack, path: &Path) -> Result<KeyPair> {
    let pair = stack.tree().chain().crypto().generate_key_pair().await?;
    std::fs::write(path, hex::encode(&pair.private_key))
        .map_err(|e| BlocktreeError::Storage(format!("cannot write {}: {e}", path.display())))?;
    Ok(pair)
}

fn full_access_keys(pair: &KeyPair) -> KeySet {
    let mut set = KeySet::new();
    set.grant(KeyAction::Read, KeyEntry::forever(pair.public_key.clone()));
    set.grant(KeyAction::Write, KeyEntry::forever(pair.public_key.clone()));
    set
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|e| BlocktreeError::Storage(format!("cannot render output: {e}")))?;
    println!("{rendered}");
    Ok(())
}

/// Prints a validation report and maps an invalid outcome to exit code 1.
fn report_exit(report: &ValidationReport) -> Result<ExitCode> {
    print_json(report)?;
    Ok(if report.is_valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

async fn create_child_command(
    stack: &Stack,
    kind: BlockKind,
    block: &str,
    key_file: &Path,
    options: &[(String, String)],
    new_key_file: &Option<PathBuf>,
) -> Result<BlockHash> {
    let target = parse_hash(block)?;
    let signer = load_signer(key_file)?;
    let record = options_record(options);

    let initial_keys = match new_key_file {
        Some(path) => Some(full_access_keys(&generate_key_file(stack, path).await?)),
        None => None,
    };

    match kind {
        BlockKind::Zone => {
            stack
                .create_zone(&target, &record, initial_keys.as_ref(), &signer)
                .await
        }
        BlockKind::Identity => {
            stack
                .create_identity(&target, &record, initial_keys.as_ref(), &signer)
                .await
        }
        _ => {
            stack
                .create_collection(&target, &record, initial_keys.as_ref(), &signer)
                .await
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let stack = open_stack(&cli.db)?;
    let tree = stack.tree();
    let chain = tree.chain();

    match &cli.command {
        Commands::ReadBlock { hash } => {
            let hash = parse_hash(hash)?;
            match chain.read_block(&hash).await? {
                Some(block) => print_json(&BlockDto {
                    hash: block.hash.to_hex(),
                    prev: block.prev.map(|h| h.to_hex()),
                    nonce: block.nonce,
                    timestamp: block.timestamp,
                    data_hex: hex::encode(&block.data),
                })?,
                None => println!("null"),
            }
        }

        Commands::WriteBlock {
            prev,
            data,
            data_file,
        } => {
            let payload = match (data, data_file) {
                (Some(inline), _) => inline.clone().into_bytes(),
                (None, Some(path)) => std::fs::read(path).map_err(|e| {
                    BlocktreeError::Storage(format!("cannot read {}: {e}", path.display()))
                })?,
                (None, None) => Vec::new(),
            };
            let hash = chain
                .write_block(
                    &NewBlock {
                        prev: parse_opt_hash(prev)?,
                        data: payload,
                    },
                    &WriteOptions::default(),
                )
                .await?;
            print_json(&WriteResult {
                hash: hash.to_hex(),
            })?;
        }

        Commands::ListBlocks { prefix } => {
            let prefix_bytes = prefix
                .as_deref()
                .map(hex::decode)
                .transpose()
                .map_err(|_| BlocktreeError::Storage("invalid hex prefix".into()))?;
            let hashes = chain.list_blocks(prefix_bytes.as_deref()).await?;
            let rendered: Vec<String> = hashes.iter().map(BlockHash::to_hex).collect();
            print_json(&rendered)?;
        }

        Commands::ReadTreeBlock { hash } => {
            let hash = parse_hash(hash)?;
            match tree.read_block(&hash).await? {
                Some(block) => print_json(&TreeBlockDto::from_tree_block(&block))?,
                None => println!("null"),
            }
        }

        Commands::WriteTreeBlock { prev, parent, data } => {
            let hash = tree
                .write_block(
                    &NewTreeBlock::new(
                        parse_opt_hash(prev)?,
                        parse_opt_hash(parent)?,
                        data.clone().unwrap_or_default().into_bytes(),
                    ),
                    &WriteOptions::default(),
                )
                .await?;
            print_json(&WriteResult {
                hash: hash.to_hex(),
            })?;
        }

        Commands::ParentScan { hash } => {
            let hash = parse_hash(hash)?;
            let blocks = tree.perform_parent_scan(&hash).await?;
            let rendered: Vec<TreeBlockDto> =
                blocks.iter().map(TreeBlockDto::from_tree_block).collect();
            print_json(&rendered)?;
        }

        Commands::ChildScan { hash } => {
            let hash = parse_hash(hash)?;
            let blocks = tree.perform_child_scan(&hash).await?;
            let rendered: Vec<TreeBlockDto> =
                blocks.iter().map(TreeBlockDto::from_tree_block).collect();
            print_json(&rendered)?;
        }

        Commands::GetParentBlock { hash } => {
            let hash = parse_hash(hash)?;
            match tree.get_parent_block(&hash).await? {
                Some(parent) => println!("{parent}"),
                None => println!("null"),
            }
        }

        Commands::ValidateBlockchain { hash } => {
            let hash = parse_hash(hash)?;
            let report = chain.validate_blockchain(&hash).await?;
            return report_exit(&report);
        }

        Commands::ValidateBlocktree { hash } => {
            let hash = parse_hash(hash)?;
            let report = tree.validate_blocktree(&hash).await?;
            return report_exit(&report);
        }

        Commands::InstallRoot {
            root_key_file,
            zone_key_file,
        } => {
            let root_pair = generate_key_file(&stack, root_key_file).await?;
            let zone_pair = generate_key_file(&stack, zone_key_file).await?;
            let signer = KeyPairSigner::from_key_pair(&root_pair)?;
            let installation = stack
                .install_root(
                    &full_access_keys(&root_pair),
                    &full_access_keys(&zone_pair),
                    &signer,
                )
                .await?;
            print_json(&InstallResult {
                root: installation.root.to_hex(),
                root_zone: installation.root_zone.to_hex(),
                root_zone_keys: installation.root_zone_keys.to_hex(),
            })?;
        }

        Commands::CreateZone {
            block,
            key_file,
            options,
            new_key_file,
        } => {
            let hash = create_child_command(
                &stack,
                BlockKind::Zone,
                block,
                key_file,
                options,
                new_key_file,
            )
            .await?;
            print_json(&WriteResult {
                hash: hash.to_hex(),
            })?;
        }

        Commands::CreateIdentity {
            block,
            key_file,
            options,
            new_key_file,
        } => {
            let hash = create_child_command(
                &stack,
                BlockKind::Identity,
                block,
                key_file,
                options,
                new_key_file,
            )
            .await?;
            print_json(&WriteResult {
                hash: hash.to_hex(),
            })?;
        }

        Commands::CreateCollection {
            block,
            key_file,
            options,
            new_key_file,
        } => {
            let hash = create_child_command(
                &stack,
                BlockKind::Collection,
                block,
                key_file,
                options,
                new_key_file,
            )
            .await?;
            print_json(&WriteResult {
                hash: hash.to_hex(),
            })?;
        }

        Commands::SetKeys {
            block,
            key_file,
            grants,
            valid_from,
            valid_to,
        } => {
            let target = parse_hash(block)?;
            let signer = load_signer(key_file)?;

            let mut set = KeySet::new();
            for grant in grants {
                let public_key = parse_public_key(grant)?;
                for action in [KeyAction::Read, KeyAction::Write] {
                    set.grant(
                        action,
                        KeyEntry {
                            public_key: public_key.clone(),
                            valid_from: valid_from.unwrap_or(0),
                            valid_to: valid_to.unwrap_or(VALID_TO_FOREVER),
                            encrypted_secret: None,
                        },
                    );
                }
            }

            let hash = stack.set_keys(&target, &set, &signer).await?;
            print_json(&WriteResult {
                hash: hash.to_hex(),
            })?;
        }

        Commands::SetOptions {
            block,
            key_file,
            options,
        } => {
            let target = parse_hash(block)?;
            let signer = load_signer(key_file)?;
            let hash = stack
                .set_options(&target, &options_record(options), &signer)
                .await?;
            print_json(&WriteResult {
                hash: hash.to_hex(),
            })?;
        }

        Commands::RevokeKeys {
            block,
            key_file,
            revoked,
        } => {
            let target = parse_hash(block)?;
            let signer = load_signer(key_file)?;
            let keys: Vec<PublicKey> = revoked
                .iter()
                .map(|s| parse_public_key(s))
                .collect::<Result<_>>()?;
            let hash = stack.revoke_keys(&target, &keys, &signer).await?;
            print_json(&WriteResult {
                hash: hash.to_hex(),
            })?;
        }

        Commands::AddRecord {
            block,
            key_file,
            fields,
        } => {
            let target = parse_hash(block)?;
            let signer = load_signer(key_file)?;
            let hash = stack
                .add_record(&target, &options_record(fields), &signer)
                .await?;
            print_json(&WriteResult {
                hash: hash.to_hex(),
            })?;
        }

        Commands::ValidateSignature { block } => {
            let target = parse_hash(block)?;
            stack.validate_signature(&target).await?;
            println!("ok");
        }

        Commands::SignatureTrace { block } => {
            let target = parse_hash(block)?;
            let trace = stack.perform_signature_trace(&target).await?;
            let rendered: Vec<String> = trace.iter().map(BlockHash::to_hex).collect();
            print_json(&rendered)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
