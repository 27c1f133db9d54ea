//! Record of outputs written into an output directory
//!
//! The ledger is a JSON-lines file, `.seo-ledger.jsonl`, next to the outputs.
//! One line is appended per written file. A snapshot of the existing lines is
//! loaded when a batch starts and answers all skip decisions for that batch.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{Result, ConverterError};

/// Hex encoded SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// One written output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub source: PathBuf,
    pub output: PathBuf,
    pub source_hash: String,
    pub output_hash: String,
    pub bytes: u64,
    pub timestamp: i64,
}

/// Append-only ledger for one output directory
#[derive(Debug)]
pub struct ProcessedLedger {
    path: PathBuf,
    /// Source and output hashes from the batch-start snapshot, mapped to the output path
    known: HashMap<String, PathBuf>,
    append_lock: Mutex<()>,
}

impl ProcessedLedger {
    pub const FILE_NAME: &'static str = ".seo-ledger.jsonl";

    /// Load the ledger in `output_dir`, or start an empty one
    pub fn open(output_dir: &Path) -> Result<Self> {
        let path = output_dir.join(Self::FILE_NAME);
        let mut known = HashMap::new();

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            for (line_no, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LedgerEntry>(line) {
                    Ok(entry) => {
                        known.insert(entry.source_hash, entry.output.clone());
                        known.insert(entry.output_hash, entry.output);
                    }
                    Err(e) => warn!("Ignoring ledger line {} in {:?}: {}", line_no + 1, path, e),
                }
            }
            debug!("Loaded {} ledger hashes from {:?}", known.len(), path);
        }

        Ok(Self {
            path,
            known,
            append_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of distinct hashes in the snapshot
    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Previously written output for content with this hash, if it still exists
    pub fn lookup(&self, hash: &str) -> Option<&Path> {
        self.known
            .get(hash)
            .map(PathBuf::as_path)
            .filter(|output| output.exists())
    }

    /// Append an entry; the in-memory snapshot is left unchanged
    pub fn record(&self, entry: &LedgerEntry) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        let _guard = self.append_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ConverterError::write(format!("Cannot open ledger: {}", e), self.path.clone()))?;

        writeln!(file, "{}", line)
            .map_err(|e| ConverterError::write(format!("Cannot append to ledger: {}", e), self.path.clone()))?;

        Ok(())
    }
}
