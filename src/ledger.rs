use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};

/// Ids of reviews already persisted in the dataset directory.
#[derive(Debug, Default, Clone)]
pub struct Ledger {
    ids: HashSet<String>,
}

impl Ledger {
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Seed from `{dir}/*.json` file stems. A missing directory seeds nothing.
    pub fn seed_from_dir(dir: &Path) -> Result<Self> {
        if !dir.exists() {
            return Ok(Self::default());
        }
        let mut ids = HashSet::new();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to list dataset dir {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.insert(stem.to_string());
            }
        }
        Ok(Self { ids })
    }

    pub fn seen(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Returns false if the id was already recorded.
    pub fn record(&mut self, id: &str) -> bool {
        self.ids.insert(id.to_string())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &HashSet<String> {
        &self.ids
    }
}
