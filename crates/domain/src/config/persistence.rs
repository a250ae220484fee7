use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persistence Gateway (§4.1, §6.5)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Backs each entity with a bounded in-memory index plus an append-only
/// JSONL journal, matching the persistence idiom used elsewhere in this
/// codebase rather than pulling in a database driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Directory holding the per-entity `.jsonl` journals. Created on
    /// startup if missing.
    #[serde(default = "d_data_dir")]
    pub data_dir: String,
    /// Upper bound on how many rows of each entity are kept resident in
    /// memory; older rows remain on disk but are not index-searchable
    /// until reloaded. `0` means unbounded.
    #[serde(default = "d_max_rows_in_memory")]
    pub max_rows_in_memory: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: d_data_dir(),
            max_rows_in_memory: d_max_rows_in_memory(),
        }
    }
}

fn d_data_dir() -> String {
    "./data".into()
}
fn d_max_rows_in_memory() -> usize {
    50_000
}
