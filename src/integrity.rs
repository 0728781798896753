use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Chunk size of per-block hashes in ASAR integrity metadata.
pub const BLOCK_SIZE: usize = 4 * 1024 * 1024;
pub const ALGORITHM: &str = "SHA256";

/// Per-entry integrity record. Field order matches what Electron writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityBlock {
    pub algorithm: String,
    pub hash: String,
    pub block_size: u64,
    pub blocks: Vec<String>,
}

impl IntegrityBlock {
    /// Hash the whole entry and each 4 MiB block of it. Blocks are hashed on
    /// the rayon pool; their order is preserved.
    pub fn compute(data: &[u8]) -> Self {
        let blocks = data.par_chunks(BLOCK_SIZE).map(sha256_hex).collect();
        Self {
            algorithm: ALGORITHM.to_string(),
            hash: sha256_hex(data),
            block_size: BLOCK_SIZE as u64,
            blocks,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "algorithm": self.algorithm,
            "hash": self.hash,
            "blockSize": self.block_size,
            "blocks": self.blocks,
        })
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
