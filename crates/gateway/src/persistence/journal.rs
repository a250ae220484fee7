//! Append-only JSONL journal shared by every [`crate::persistence`] store.
//!
//! Each store keeps its authoritative copy in memory and mirrors every
//! mutation to a `.jsonl` file under `persistence.data_dir`; the file is
//! replayed once at startup to repopulate the in-memory index. This gives
//! the uniqueness/CAS guarantees Business-verb methods need (§4.1) without
//! depending on a database driver.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use fleet_domain::Result;

/// A single entity's append-only log file.
pub struct Journal {
    path: PathBuf,
    file: Mutex<File>,
}

impl Journal {
    pub fn open(data_dir: &Path, name: &str) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(format!("{name}.jsonl"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Replay every line of the journal into `apply`, in file order.
    /// Malformed trailing lines (e.g. a crash mid-write) are skipped with
    /// a warning rather than aborting startup.
    pub fn replay<T: DeserializeOwned>(&self, mut apply: impl FnMut(T)) -> Result<()> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(&line) {
                Ok(record) => apply(record),
                Err(e) => tracing::warn!(
                    path = %self.path.display(),
                    line = lineno + 1,
                    error = %e,
                    "skipping malformed journal line"
                ),
            }
        }
        Ok(())
    }

    /// Append one record as a single JSON line. Mutation order on disk
    /// matches mutation order in the in-memory index as long as callers
    /// hold their store's own lock across `append` + index update.
    pub fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let mut file = self.file.lock();
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Rec {
        id: u32,
    }

    #[test]
    fn append_then_replay_round_trips() {
        let dir = tempfile_dir();
        let journal = Journal::open(&dir, "widgets").unwrap();
        journal.append(&Rec { id: 1 }).unwrap();
        journal.append(&Rec { id: 2 }).unwrap();

        let journal2 = Journal::open(&dir, "widgets").unwrap();
        let mut seen = Vec::new();
        journal2.replay::<Rec>(|r| seen.push(r)).unwrap();
        assert_eq!(seen, vec![Rec { id: 1 }, Rec { id: 2 }]);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn replay_on_missing_file_is_a_noop() {
        let dir = tempfile_dir();
        let journal = Journal::open(&dir, "empty").unwrap();
        std::fs::remove_file(dir.join("empty.jsonl")).unwrap();
        let mut seen: Vec<Rec> = Vec::new();
        journal.replay(|r| seen.push(r)).unwrap();
        assert!(seen.is_empty());
        std::fs::remove_dir_all(dir).ok();
    }

    fn tempfile_dir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("fleet-gateway-journal-test-{}", uuid::Uuid::new_v4()));
        dir
    }
}
