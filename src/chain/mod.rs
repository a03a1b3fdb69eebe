//! Block codec and the append-only chain store.
//!
//! The codec is a pure function of its inputs; the store owns the committed
//! chain and exposes the validation primitives peers run against the tip.

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Previous-hash marker carried by the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "CarChainGenesisBlock";

/// Blocks returned per page by the paginated chain download.
pub const PAGE_SIZE: usize = 100;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A committed or candidate ledger record. Immutable once committed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Block {
    pub index: u64,
    /// Process-unique creation id, for tracing only.
    pub id: String,
    /// `YYYY-MM-DD HH:MM:SS`, caller-supplied or generated at creation.
    pub timestamp: String,
    /// Registration plate this entry is about.
    pub plate: String,
    /// Opaque vehicle/transaction payload, hashed verbatim.
    pub data: Value,
    pub hash: String,
    pub previous_hash: String,
}

/// How much history this node holds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaMode {
    /// Complete chain starting at genesis.
    Full,
    /// Recent tail only, synced at bootstrap.
    Light,
}

impl ReplicaMode {
    pub fn parse(s: &str) -> Option<ReplicaMode> {
        match s {
            "full" => Some(ReplicaMode::Full),
            "light" => Some(ReplicaMode::Light),
            _ => None,
        }
    }
}

/// Per-check outcome of validating a candidate against the tip.
///
/// Callers log which check failed, not just pass/fail, so a stale tip is
/// distinguishable from a corrupted hash or a wrong index.
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct BlockValidation {
    pub index_ok: bool,
    pub linkage_ok: bool,
    pub hash_ok: bool,
}

impl BlockValidation {
    pub fn is_valid(&self) -> bool {
        self.index_ok && self.linkage_ok && self.hash_ok
    }
}

impl std::fmt::Display for BlockValidation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "index_ok={} linkage_ok={} hash_ok={}",
            self.index_ok, self.linkage_ok, self.hash_ok
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// `tip()` before genesis insertion. Unreachable after construction.
    EmptyChain,
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainError::EmptyChain => write!(f, "chain holds no blocks"),
        }
    }
}

impl std::error::Error for ChainError {}

/// Malformed request input, rejected before a candidate is created.
#[derive(Debug, Clone)]
pub struct MetaError {
    pub field: String,
    pub reason: String,
}

impl std::fmt::Display for MetaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {}: {}", self.field, self.reason)
    }
}

impl std::error::Error for MetaError {}

/// Content hash over `(previous_hash, plate, data)`.
///
/// The payload is rendered as canonical JSON (serde_json sorts object keys)
/// and concatenated with the other fields before hashing, so identical
/// logical inputs always produce an identical digest.
pub fn block_hash(previous_hash: &str, plate: &str, data: &Value) -> String {
    let data_str = serde_json::to_string(data).unwrap_or_default();
    let input = format!("{}{}{}", previous_hash, plate, data_str);
    let mut hasher = Sha256::new();
    hasher.update(input);
    format!("{:x}", hasher.finalize())
}

/// Current wall-clock time in the ledger timestamp format.
pub fn current_timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Exact-shape check for caller-supplied timestamps.
pub fn is_valid_timestamp(timestamp: &str) -> bool {
    timestamp.len() == 19 && NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).is_ok()
}

/// Ordered, append-only sequence of committed blocks. One instance per node.
pub struct Blockchain {
    blocks: Vec<Block>,
    mode: ReplicaMode,
}

impl Blockchain {
    /// Creates the store and commits the genesis block at position 1.
    pub fn new(mode: ReplicaMode) -> Self {
        let mut chain = Blockchain {
            blocks: Vec::new(),
            mode,
        };
        let genesis_data = serde_json::json!({ "note": "genesis block" });
        let genesis = Block {
            index: 1,
            id: Uuid::new_v4().simple().to_string(),
            timestamp: current_timestamp(),
            plate: "-".to_string(),
            data: genesis_data.clone(),
            hash: block_hash(GENESIS_PREVIOUS_HASH, "-", &genesis_data),
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
        };
        chain.blocks.push(genesis);
        chain
    }

    pub fn mode(&self) -> ReplicaMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The last committed block.
    pub fn tip(&self) -> Result<&Block, ChainError> {
        self.blocks.last().ok_or(ChainError::EmptyChain)
    }

    /// Builds a candidate for the next chain position. Reads the tip for the
    /// index but does not append.
    pub fn create_block(
        &self,
        previous_hash: &str,
        plate: &str,
        data: Value,
        timestamp: Option<String>,
    ) -> Result<Block, MetaError> {
        if plate.trim().is_empty() {
            return Err(MetaError {
                field: "plate".to_string(),
                reason: "plate must not be empty".to_string(),
            });
        }
        let timestamp = match timestamp {
            Some(ts) => {
                if !is_valid_timestamp(&ts) {
                    return Err(MetaError {
                        field: "timestamp".to_string(),
                        reason: format!("'{}' does not match YYYY-MM-DD HH:MM:SS", ts),
                    });
                }
                ts
            }
            None => current_timestamp(),
        };
        let index = self.blocks.last().map(|b| b.index + 1).unwrap_or(1);
        Ok(Block {
            index,
            id: Uuid::new_v4().simple().to_string(),
            timestamp,
            plate: plate.to_string(),
            hash: block_hash(previous_hash, plate, &data),
            previous_hash: previous_hash.to_string(),
            data,
        })
    }

    /// Commits `block` as the new tail. The caller has already validated it;
    /// no re-validation happens here.
    pub fn append(&mut self, block: Block) {
        self.blocks.push(block);
    }

    /// Runs the three independent tip checks against `candidate`.
    pub fn validate(&self, candidate: &Block) -> Result<BlockValidation, ChainError> {
        let tip = self.tip()?;
        let expected = block_hash(&candidate.previous_hash, &candidate.plate, &candidate.data);
        Ok(BlockValidation {
            index_ok: candidate.index == tip.index + 1,
            linkage_ok: candidate.previous_hash == tip.hash,
            hash_ok: expected == candidate.hash,
        })
    }

    /// True if the committed chain already holds `hash` at chain position
    /// `index`. Detects late votes for already-decided blocks.
    ///
    /// The positional lookup assumes this chain starts at genesis; a light
    /// replica holding only a tail can miscompute it. Known limitation of
    /// non-full replicas.
    pub fn contains_committed(&self, hash: &str, index: u64) -> bool {
        if index == 0 {
            return false;
        }
        self.blocks
            .get(index as usize - 1)
            .map(|b| b.hash == hash)
            .unwrap_or(false)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Bulk replacement used only by the bootstrap sync collaborator.
    pub fn replace(&mut self, blocks: Vec<Block>) {
        self.blocks = blocks;
    }

    pub fn last_blocks(&self, count: usize) -> Vec<Block> {
        let start = self.blocks.len().saturating_sub(count);
        self.blocks[start..].to_vec()
    }

    pub fn total_pages(&self) -> usize {
        self.blocks.len().div_ceil(PAGE_SIZE)
    }

    /// 100-block window of the chain, empty past the end.
    pub fn page(&self, page: usize) -> Vec<Block> {
        let start = page.saturating_mul(PAGE_SIZE);
        if start >= self.blocks.len() {
            return Vec::new();
        }
        let end = (start + PAGE_SIZE).min(self.blocks.len());
        self.blocks[start..end].to_vec()
    }
}
