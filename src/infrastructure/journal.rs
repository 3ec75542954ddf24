use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// What a journal record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    Params,
    Orders,
    VaR,
    Stress,
    Alert,
}

/// One append-only journal record. The payload is an opaque canonical JSON
/// value; the journal itself never interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub cycle_id: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: RecordKind,
    pub payload: serde_json::Value,
}

impl JournalRecord {
    pub fn new<T: Serialize>(
        cycle_id: u64,
        timestamp: DateTime<Utc>,
        kind: RecordKind,
        payload: &T,
    ) -> Result<Self> {
        Ok(Self {
            cycle_id,
            timestamp,
            kind,
            payload: serde_json::to_value(payload).context("journal payload serialization")?,
        })
    }

    /// Canonical single-line encoding: map keys sort lexicographically
    /// (serde_json objects are BTreeMap-backed) and floats print with
    /// round-trip precision, so identical records are byte-identical.
    pub fn encode(&self) -> Result<String> {
        let value = serde_json::to_value(self).context("journal record serialization")?;
        Ok(value.to_string())
    }
}

/// Append-only JSONL journal under the configured data root.
pub struct Journal {
    path: PathBuf,
    file: File,
}

impl Journal {
    /// Open (creating directories and the file as needed) the journal at
    /// `<data_root>/journal.jsonl`.
    pub fn open(data_root: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_root)
            .with_context(|| format!("creating journal directory {}", data_root.display()))?;
        let path = data_root.join("journal.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening journal {}", path.display()))?;
        info!(path = %path.display(), "journal opened");
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, record: &JournalRecord) -> Result<()> {
        let line = record.encode()?;
        writeln!(self.file, "{line}").context("appending journal record")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush().context("flushing journal")
    }
}
