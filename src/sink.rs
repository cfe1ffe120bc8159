use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::ledger::Ledger;
use crate::record::ReviewRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persisted {
    Written,
    Duplicate,
}

/// Writes one `{id}.json` per review, gated by the ledger.
///
/// Single owner: the check and the write happen in the same call, so two
/// copies of the same id can never race.
pub struct RecordSink {
    dir: PathBuf,
    ledger: Ledger,
}

impl RecordSink {
    pub fn new(dir: impl Into<PathBuf>, ledger: Ledger) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create dataset dir {}", dir.display()))?;
        Ok(Self { dir, ledger })
    }

    /// Seed the ledger from the directory's existing files.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let ledger = Ledger::seed_from_dir(&dir)?;
        Self::new(dir, ledger)
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a record unless its id is already known.
    ///
    /// The file appears atomically (temp file + rename). On error nothing
    /// is recorded and the id stays writable.
    pub fn persist(&mut self, record: &ReviewRecord) -> Result<Persisted> {
        let id = record.id.as_str();
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            bail!("refusing to persist record with invalid id {:?}", id);
        }
        if self.ledger.seen(id) {
            debug!("Skipping known review {}", id);
            return Ok(Persisted::Duplicate);
        }

        let json = serde_json::to_string_pretty(record)?;
        let target = self.dir.join(format!("{}.json", id));

        let mut tmp = NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("Failed to create temp file in {}", self.dir.display()))?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target)
            .with_context(|| format!("Failed to write {}", target.display()))?;

        self.ledger.record(id);
        Ok(Persisted::Written)
    }
}
